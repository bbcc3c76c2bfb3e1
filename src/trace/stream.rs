use crate::{
    error::Error,
    parser::{cursor::PacketCursor, Decoder, PacketSource},
    types::{
        decl::{DeclArena, DeclId, Declaration, TraceDescription},
        def::{DefArena, DefId, ScopeRoots},
        Event, EventCount, EventId, ExtendedTimestamp, PacketIndexEntry, StreamId, Timestamp,
        CTF_MAGIC_NUMBER,
    },
};
use std::sync::Arc;
use tracing::{debug, warn};

/// A page of the stream file is mapped to decode the packet header and
/// packet context before the packet's real sizes are known.
pub(crate) const MAX_PACKET_HEADER_BYTES: u64 = 4096;

/// Whence argument of [`FileStream::packet_seek`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PacketSeek {
    /// Jump to the packet at this index.
    Set(usize),
    /// Advance to the next packet.
    Current,
}

/// Per-stream runtime state updated as packets and events are read.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct StreamState {
    /// Extended timestamp of the last event (or packet beginning).
    pub timestamp: ExtendedTimestamp,
    /// Timestamp before the last update.
    pub prev_timestamp: Timestamp,
    /// End timestamp of the packet most recently left behind.
    pub prev_timestamp_end: Timestamp,
    /// Events discarded between the previous packet and the current one.
    pub events_discarded: EventCount,
    /// Id of the most recently read event.
    pub event_id: EventId,
    /// Whether the most recently read event carried a timestamp.
    pub has_timestamp: bool,
}

/// Definitions instantiated for one event class of the bound stream
/// class.
#[derive(Copy, Clone, Debug)]
struct StreamEventDefs {
    context: Option<DefId>,
    fields: Option<DefId>,
}

/// One stream file (or supplied region) of an open trace: a packet
/// index, a bit cursor over the currently-mapped packet, and the
/// definition trees events are decoded into.
#[derive(Debug)]
pub struct FileStream {
    desc: Arc<TraceDescription>,
    source: PacketSource,
    file_size: u64,
    cursor: PacketCursor,
    index: Vec<PacketIndexEntry>,
    cur_index: usize,
    stream_id: StreamId,
    defs: DefArena,
    roots: ScopeRoots,
    events: Vec<Option<StreamEventDefs>>,
    state: StreamState,
}

impl FileStream {
    pub(crate) fn open(desc: Arc<TraceDescription>, source: PacketSource) -> Result<Self, Error> {
        let file_size = source.len()?;
        if file_size < MAX_PACKET_HEADER_BYTES {
            return Err(Error::StreamFileTooSmall { size: file_size });
        }

        let mut defs = DefArena::default();
        let mut roots = ScopeRoots::default();
        if let Some(decl) = desc.packet_header {
            ensure_struct(&desc.decls, decl, "trace packet header")?;
            roots.trace_packet_header = Some(defs.instantiate(&desc.decls, decl, None));
        }

        let mut stream = Self {
            desc,
            source,
            file_size,
            cursor: PacketCursor::default(),
            index: Vec::new(),
            cur_index: 0,
            stream_id: 0,
            defs,
            roots,
            events: Vec::new(),
            state: StreamState::default(),
        };
        stream.build_index()?;
        stream.packet_seek(PacketSeek::Set(0))?;
        Ok(stream)
    }

    /// The stream class id this file belongs to, taken from the first
    /// packet.
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn packet_index(&self) -> &[PacketIndexEntry] {
        &self.index
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Scan the whole file once, validating each packet header and
    /// recording one index entry per packet.
    fn build_index(&mut self) -> Result<(), Error> {
        let desc = Arc::clone(&self.desc);
        let decls = &desc.decls;
        let file_size = self.file_size;
        let mut byte_offset = 0_u64;
        let mut first_packet = true;

        while byte_offset < file_size {
            let map_len = MAX_PACKET_HEADER_BYTES.min(file_size - byte_offset);
            let data = self.source.map(byte_offset, map_len as usize)?;
            // Real sizes are unknown until the context is decoded.
            self.cursor.load(data, map_len * 8, map_len * 8);

            let mut stream_id = 0;
            if let Some(header) = self.roots.trace_packet_header {
                let mut decoder = Decoder {
                    decls,
                    defs: &mut self.defs,
                    cursor: &mut self.cursor,
                    roots: self.roots,
                };
                decoder.read(header)?;

                if let Some(magic) = self.defs.unsigned_field(decls, header, "magic") {
                    if magic != u64::from(CTF_MAGIC_NUMBER) {
                        return Err(Error::InvalidMagicNumber {
                            found: magic,
                            packet: self.index.len(),
                            offset: byte_offset,
                        });
                    }
                }
                if let (Some(found), Some(expected)) = (
                    self.defs.uuid_field(decls, header, "uuid"),
                    desc.uuid,
                ) {
                    if found != expected {
                        return Err(Error::UuidMismatch { expected, found });
                    }
                }
                if let Some(id) = self.defs.unsigned_field(decls, header, "stream_id") {
                    stream_id = id;
                }
            }

            if first_packet {
                self.bind_stream_class(stream_id)?;
                first_packet = false;
            } else if stream_id != self.stream_id {
                return Err(Error::StreamIdChanged {
                    expected: self.stream_id,
                    found: stream_id,
                });
            }

            let mut entry = PacketIndexEntry {
                offset: byte_offset,
                content_size_bits: 0,
                packet_size_bits: 0,
                timestamp_begin: 0,
                timestamp_end: 0,
                events_discarded: 0,
                data_offset_bits: 0,
            };

            if let Some(context) = self.roots.stream_packet_context {
                let mut decoder = Decoder {
                    decls,
                    defs: &mut self.defs,
                    cursor: &mut self.cursor,
                    roots: self.roots,
                };
                decoder.read(context)?;

                entry.content_size_bits = self
                    .defs
                    .unsigned_field(decls, context, "content_size")
                    .unwrap_or(file_size * 8);
                entry.packet_size_bits = self
                    .defs
                    .unsigned_field(decls, context, "packet_size")
                    .unwrap_or(if entry.content_size_bits != 0 {
                        entry.content_size_bits
                    } else {
                        file_size * 8
                    });
                entry.timestamp_begin = self
                    .defs
                    .unsigned_field(decls, context, "timestamp_begin")
                    .unwrap_or(0);
                entry.timestamp_end = self
                    .defs
                    .unsigned_field(decls, context, "timestamp_end")
                    .unwrap_or(0);
                entry.events_discarded = self
                    .defs
                    .unsigned_field(decls, context, "events_discarded")
                    .unwrap_or(0);
            } else {
                entry.content_size_bits = file_size * 8;
                entry.packet_size_bits = file_size * 8;
            }

            if entry.packet_size_bits == 0 || entry.packet_size_bits % 8 != 0 {
                return Err(Error::InvalidPacketSize(entry.packet_size_bits));
            }
            if entry.content_size_bits > entry.packet_size_bits {
                return Err(Error::ContentSizeExceedsPacketSize {
                    content_size: entry.content_size_bits,
                    packet_size: entry.packet_size_bits,
                });
            }
            let remaining = (file_size - byte_offset) * 8;
            if entry.packet_size_bits > remaining {
                return Err(Error::PacketSizeExceedsFile {
                    packet_size: entry.packet_size_bits,
                    remaining,
                });
            }

            debug_assert!(!self.cursor.is_end());
            entry.data_offset_bits = self.cursor.offset_bits().unwrap_or(0);
            debug!(
                offset = entry.offset,
                content_size = entry.content_size_bits,
                packet_size = entry.packet_size_bits,
                events_discarded = entry.events_discarded,
                "Indexed packet"
            );
            self.index.push(entry);
            byte_offset += entry.packet_size_bits / 8;
        }
        Ok(())
    }

    /// Bind this file to the stream class the first packet named and
    /// instantiate the per-stream and per-event definition trees.
    fn bind_stream_class(&mut self, stream_id: StreamId) -> Result<(), Error> {
        let desc = Arc::clone(&self.desc);
        let class = desc
            .stream(stream_id)
            .ok_or(Error::UndefinedStreamId(stream_id))?;
        self.stream_id = stream_id;

        let mut tail = self.roots.trace_packet_header;
        if let Some(decl) = class.packet_context {
            ensure_struct(&desc.decls, decl, "stream packet context")?;
            let id = self.defs.instantiate(&desc.decls, decl, tail);
            self.roots.stream_packet_context = Some(id);
            tail = Some(id);
        }
        if let Some(decl) = class.event_header {
            ensure_struct(&desc.decls, decl, "stream event header")?;
            let id = self.defs.instantiate(&desc.decls, decl, tail);
            self.roots.stream_event_header = Some(id);
            tail = Some(id);
        }
        if let Some(decl) = class.event_context {
            ensure_struct(&desc.decls, decl, "stream event context")?;
            let id = self.defs.instantiate(&desc.decls, decl, tail);
            self.roots.stream_event_context = Some(id);
            tail = Some(id);
        }

        for event in &class.events {
            match event {
                None => self.events.push(None),
                Some(ev) => {
                    let mut context = None;
                    if let Some(decl) = ev.context {
                        ensure_struct(&desc.decls, decl, "event context")?;
                        context = Some(self.defs.instantiate(&desc.decls, decl, tail));
                    }
                    let mut fields = None;
                    if let Some(decl) = ev.fields {
                        ensure_struct(&desc.decls, decl, "event fields")?;
                        fields =
                            Some(self.defs.instantiate(&desc.decls, decl, context.or(tail)));
                    }
                    self.events.push(Some(StreamEventDefs { context, fields }));
                }
            }
        }
        Ok(())
    }

    /// Move the cursor to another packet: unmap the old packet, map the
    /// new one, and re-decode its header and context.
    pub fn packet_seek(&mut self, whence: PacketSeek) -> Result<(), Error> {
        if whence == PacketSeek::Current && self.cursor.is_end() {
            return Ok(());
        }
        let desc = Arc::clone(&self.desc);
        let mut whence = whence;
        loop {
            match whence {
                PacketSeek::Set(index) => {
                    self.cur_index = index;
                    self.state.prev_timestamp = 0;
                    self.state.prev_timestamp_end = 0;
                }
                PacketSeek::Current => {
                    let cur = self.index[self.cur_index];
                    self.state.prev_timestamp_end = cur.timestamp_end;
                    self.state.events_discarded = discarded_since(
                        self.cur_index
                            .checked_sub(1)
                            .map(|i| &self.index[i]),
                        &cur,
                    );
                    self.state.prev_timestamp = self.state.timestamp.get();
                    self.cur_index += 1;
                }
            }
            whence = PacketSeek::Current;

            if self.cur_index >= self.index.len() {
                if self.state.events_discarded != 0 {
                    warn!(
                        events_discarded = self.state.events_discarded,
                        interval_begin = self.state.prev_timestamp,
                        interval_end = self.state.prev_timestamp_end,
                        "Tracer discarded events at end of stream; consider increasing the tracer buffer size"
                    );
                    self.state.events_discarded = 0;
                }
                self.cursor.set_end();
                return Ok(());
            }

            let entry = self.index[self.cur_index];
            self.state.timestamp.set(entry.timestamp_begin);
            if entry.data_offset_bits < entry.content_size_bits {
                let data = self
                    .source
                    .map(entry.offset, (entry.packet_size_bits / 8) as usize)?;
                self.cursor
                    .load(data, entry.packet_size_bits, entry.content_size_bits);

                // These decoded cleanly during indexing; failing now is a
                // defect, not bad input.
                if let Some(header) = self.roots.trace_packet_header {
                    Decoder {
                        decls: &desc.decls,
                        defs: &mut self.defs,
                        cursor: &mut self.cursor,
                        roots: self.roots,
                    }
                    .read(header)
                    .expect("packet header re-decode failed on an indexed packet");
                }
                if let Some(context) = self.roots.stream_packet_context {
                    Decoder {
                        decls: &desc.decls,
                        defs: &mut self.defs,
                        cursor: &mut self.cursor,
                        roots: self.roots,
                    }
                    .read(context)
                    .expect("packet context re-decode failed on an indexed packet");
                }
                debug_assert_eq!(self.cursor.offset_bits(), Some(entry.data_offset_bits));
                return Ok(());
            } else if entry.data_offset_bits == entry.content_size_bits {
                // Empty packet: account for it and move on.
                continue;
            } else {
                self.cursor.set_end();
                return Ok(());
            }
        }
    }

    /// Decode the next event of the stream.
    ///
    /// Returns `Ok(None)` once the stream is exhausted. On a decode
    /// error the cursor is restored to the pre-event offset.
    pub fn read_event(&mut self) -> Result<Option<Event>, Error> {
        if self.cursor.is_end() {
            return Ok(None);
        }
        if self.cursor.at_content_end() {
            self.packet_seek(PacketSeek::Current)?;
        }
        let Some(restore) = self.cursor.offset_bits() else {
            return Ok(None);
        };
        debug_assert!(restore < self.cursor.content_size_bits());

        match self.read_event_inner() {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                self.cursor.set_offset(restore);
                Err(e)
            }
        }
    }

    fn read_event_inner(&mut self) -> Result<Event, Error> {
        let desc = Arc::clone(&self.desc);
        let decls = &desc.decls;
        let class = desc
            .stream(self.stream_id)
            .ok_or(Error::UndefinedStreamId(self.stream_id))?;

        let mut id: EventId = 0;
        self.state.has_timestamp = false;

        if let Some(header) = self.roots.stream_event_header {
            Decoder {
                decls,
                defs: &mut self.defs,
                cursor: &mut self.cursor,
                roots: self.roots,
            }
            .read(header)?;

            if let Some(v) = self.defs.unsigned_field(decls, header, "id") {
                id = v;
            } else if let Some(v) = self.defs.enum_field(decls, header, "id") {
                id = v as EventId;
            }
            let branch = self
                .defs
                .variant_field(decls, header, "v")
                .and_then(|v| self.defs.selected_branch(v));
            if let Some(branch) = branch {
                if let Some(v) = self.defs.unsigned_field(decls, branch, "id") {
                    id = v;
                } else if let Some(v) = self.defs.single_unsigned_field(decls, branch) {
                    id = v;
                }
            }

            let timestamp = self
                .defs
                .integer_field(decls, header, "timestamp")
                .or_else(|| branch.and_then(|b| self.defs.integer_field(decls, b, "timestamp")));
            if let Some((raw, width)) = timestamp {
                self.state.prev_timestamp = self.state.timestamp.get();
                self.state.timestamp.update(raw, width);
                self.state.has_timestamp = true;
            }
            debug!(event_id = id, timestamp = self.state.timestamp.get(), "Read event header");
        }
        self.state.event_id = id;

        if let Some(context) = self.roots.stream_event_context {
            Decoder {
                decls,
                defs: &mut self.defs,
                cursor: &mut self.cursor,
                roots: self.roots,
            }
            .read(context)?;
        }

        let event_desc = class
            .events
            .get(id as usize)
            .and_then(|e| e.as_ref())
            .ok_or(Error::UndefinedEventId(id))?;
        let event_defs = *self
            .events
            .get(id as usize)
            .and_then(|e| e.as_ref())
            .ok_or(Error::UndefinedEventId(id))?;

        let mut roots = self.roots;
        roots.event_context = event_defs.context;
        roots.event_fields = event_defs.fields;
        if let Some(context) = event_defs.context {
            Decoder {
                decls,
                defs: &mut self.defs,
                cursor: &mut self.cursor,
                roots,
            }
            .read(context)?;
        }
        if let Some(fields) = event_defs.fields {
            Decoder {
                decls,
                defs: &mut self.defs,
                cursor: &mut self.cursor,
                roots,
            }
            .read(fields)?;
        }

        Ok(Event {
            id,
            name: event_desc.name,
            timestamp: self
                .state
                .has_timestamp
                .then(|| self.state.timestamp.get()),
            log_level: event_desc.log_level,
            common_context: self
                .roots
                .stream_event_context
                .map(|d| self.defs.struct_items(decls, d))
                .unwrap_or_default(),
            specific_context: event_defs
                .context
                .map(|d| self.defs.struct_items(decls, d))
                .unwrap_or_default(),
            payload: event_defs
                .fields
                .map(|d| self.defs.struct_items(decls, d))
                .unwrap_or_default(),
        })
    }
}

/// Discarded-event count between two consecutive packets; the counter is
/// a free-running snapshot, so the first packet reports its own value.
fn discarded_since(prev: Option<&PacketIndexEntry>, cur: &PacketIndexEntry) -> EventCount {
    match prev {
        Some(prev) => cur.events_discarded.saturating_sub(prev.events_discarded),
        None => cur.events_discarded,
    }
}

fn ensure_struct(decls: &DeclArena, id: DeclId, what: &str) -> Result<(), Error> {
    if matches!(decls.get(id), Declaration::Struct(_)) {
        Ok(())
    } else {
        Err(Error::Metadata(format!(
            "{what} is not a structure (found {})",
            decls.get(id).kind()
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(events_discarded: EventCount) -> PacketIndexEntry {
        PacketIndexEntry {
            offset: 0,
            content_size_bits: 0,
            packet_size_bits: 0,
            timestamp_begin: 0,
            timestamp_end: 0,
            events_discarded,
            data_offset_bits: 0,
        }
    }

    #[test]
    fn discarded_counter_is_a_snapshot_delta() {
        let first = entry(3);
        let second = entry(10);
        assert_eq!(discarded_since(None, &first), 3);
        assert_eq!(discarded_since(Some(&first), &second), 7);
        // A counter that went backwards clamps instead of wrapping.
        assert_eq!(discarded_since(Some(&second), &first), 0);
    }
}
