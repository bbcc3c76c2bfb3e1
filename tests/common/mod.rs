#![allow(dead_code)]

use ctf_reader::types::decl::{
    DeclArena, DeclId, Declaration, EventDescription, IntegerDecl, StructDecl, TraceDescription,
};
use ctf_reader::{
    ByteOrder, DisplayBase, Error, MetadataInterpreter, CTF_MAGIC_NUMBER, TSDL_MAGIC_NUMBER,
};
use internment::Intern;
use uuid::Uuid;

/// Stream files are scanned a page at a time; keep fixtures page-sized.
pub const PAGE: usize = 4096;

pub const BO: ByteOrder = ByteOrder::LittleEndian;

pub const TSDL_SNIPPET: &str = "/* CTF 1.8 */\n\
    trace {\n\
        major = 1; minor = 8;\n\
        byte_order = le;\n\
        packet.header := struct {\n\
            integer { size = 32; } magic;\n\
            integer { size = 8; } uuid[16];\n\
            integer { size = 32; } stream_id;\n\
        };\n\
    };\n";

pub fn named(s: &str) -> Intern<String> {
    Intern::new(s.to_owned())
}

/// An interpreter standing in for the TSDL front-end: hands back a
/// canned description regardless of the text.
pub struct FixedInterpreter(pub TraceDescription);

impl MetadataInterpreter for FixedInterpreter {
    fn interpret(&self, _tsdl: &str) -> Result<TraceDescription, Error> {
        Ok(self.0.clone())
    }
}

pub fn uint(decls: &mut DeclArena, len: u8, alignment: u64) -> DeclId {
    decls.push(Declaration::Integer(IntegerDecl {
        len,
        signed: false,
        byte_order: BO,
        base: DisplayBase::default(),
        alignment,
    }))
}

pub fn strukt(decls: &mut DeclArena, fields: Vec<(&str, DeclId)>) -> DeclId {
    decls.push(Declaration::Struct(StructDecl {
        min_alignment: 1,
        fields: fields.into_iter().map(|(n, d)| (named(n), d)).collect(),
    }))
}

/// `struct { u32 magic; u8 uuid[16]; u32 stream_id; }` (192 bits).
pub fn packet_header_decl(decls: &mut DeclArena) -> DeclId {
    let magic = uint(decls, 32, 8);
    let byte = uint(decls, 8, 8);
    let uuid = decls.push(Declaration::Array(ctf_reader::types::decl::ArrayDecl {
        length: 16,
        element: byte,
    }));
    let stream_id = uint(decls, 32, 8);
    strukt(
        decls,
        vec![("magic", magic), ("uuid", uuid), ("stream_id", stream_id)],
    )
}

/// `struct { u64 content_size; u64 packet_size; [u64 timestamp_begin;
/// u64 timestamp_end; u64 events_discarded;] }` (128 or 320 bits).
pub fn packet_context_decl(decls: &mut DeclArena, with_timestamps: bool) -> DeclId {
    let content_size = uint(decls, 64, 8);
    let packet_size = uint(decls, 64, 8);
    let mut fields = vec![("content_size", content_size), ("packet_size", packet_size)];
    if with_timestamps {
        let begin = uint(decls, 64, 8);
        let end = uint(decls, 64, 8);
        let discarded = uint(decls, 64, 8);
        fields.push(("timestamp_begin", begin));
        fields.push(("timestamp_end", end));
        fields.push(("events_discarded", discarded));
    }
    strukt(decls, fields)
}

/// `struct { u32 id; u<width> timestamp; }`
pub fn event_header_decl(decls: &mut DeclArena, timestamp_width: u8) -> DeclId {
    let id = uint(decls, 32, 8);
    let timestamp = uint(decls, timestamp_width, 8);
    strukt(decls, vec![("id", id), ("timestamp", timestamp)])
}

pub fn event_description(name: &str, fields: Option<DeclId>) -> EventDescription {
    EventDescription {
        name: named(name),
        log_level: None,
        context: None,
        fields,
    }
}

/// Bit-granular writer mirroring the reader's bit numbering: LSB-first
/// within bytes for little-endian data, MSB-first for big-endian.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: u64,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> u64 {
        self.bit_len
    }

    fn ensure(&mut self, bit: u64) {
        let need = (bit / 8 + 1) as usize;
        if self.bytes.len() < need {
            self.bytes.resize(need, 0);
        }
    }

    pub fn write_bits(&mut self, value: u64, len: u8, byte_order: ByteOrder) {
        for i in 0..u64::from(len) {
            let pos = self.bit_len + i;
            self.ensure(pos);
            let byte = (pos / 8) as usize;
            match byte_order {
                ByteOrder::LittleEndian => {
                    let bit = (value >> i) & 1;
                    self.bytes[byte] |= (bit as u8) << (pos % 8);
                }
                ByteOrder::BigEndian => {
                    let bit = (value >> (u64::from(len) - 1 - i)) & 1;
                    self.bytes[byte] |= (bit as u8) << (7 - (pos % 8));
                }
            }
        }
        self.bit_len += u64::from(len);
    }

    pub fn align(&mut self, bits: u64) {
        let aligned = (self.bit_len + bits - 1) / bits * bits;
        if aligned > 0 {
            self.ensure(aligned - 1);
        }
        self.bit_len = aligned;
    }

    pub fn pad_to(&mut self, total_bytes: usize) {
        assert!(total_bytes * 8 >= self.bit_len as usize);
        self.bytes.resize(total_bytes, 0);
        self.bit_len = total_bytes as u64 * 8;
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// One on-disk packet for the fixture layout above.
pub struct PacketSpec {
    pub uuid: Uuid,
    pub stream_id: u64,
    pub with_timestamps: bool,
    pub timestamp_begin: u64,
    pub timestamp_end: u64,
    pub events_discarded: u64,
    pub events: BitWriter,
    pub packet_bytes: usize,
}

impl PacketSpec {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            stream_id: 0,
            with_timestamps: false,
            timestamp_begin: 0,
            timestamp_end: 0,
            events_discarded: 0,
            events: BitWriter::new(),
            packet_bytes: PAGE,
        }
    }
}

pub fn build_packet(spec: PacketSpec) -> Vec<u8> {
    let data_offset: u64 = if spec.with_timestamps { 512 } else { 320 };
    let content_size = data_offset + spec.events.bit_len();

    let mut w = BitWriter::new();
    w.write_bits(u64::from(CTF_MAGIC_NUMBER), 32, BO);
    for b in spec.uuid.as_bytes() {
        w.write_bits(u64::from(*b), 8, BO);
    }
    w.write_bits(spec.stream_id, 32, BO);
    w.write_bits(content_size, 64, BO);
    w.write_bits(spec.packet_bytes as u64 * 8, 64, BO);
    if spec.with_timestamps {
        w.write_bits(spec.timestamp_begin, 64, BO);
        w.write_bits(spec.timestamp_end, 64, BO);
        w.write_bits(spec.events_discarded, 64, BO);
    }
    assert_eq!(w.bit_len(), data_offset);

    let mut bytes = w.into_bytes();
    bytes.extend_from_slice(&spec.events.into_bytes());
    assert!(bytes.len() <= spec.packet_bytes);
    bytes.resize(spec.packet_bytes, 0);
    bytes
}

/// Frame TSDL text as a single little-endian binary metadata packet.
pub fn framed_metadata(uuid: Uuid, payload: &str) -> Vec<u8> {
    const HEADER_BYTES: u32 = 37;
    let content_bits = (HEADER_BYTES + payload.len() as u32) * 8;
    let mut out = Vec::new();
    out.extend_from_slice(&TSDL_MAGIC_NUMBER.to_le_bytes());
    out.extend_from_slice(uuid.as_bytes());
    out.extend_from_slice(&0_u32.to_le_bytes()); // checksum
    out.extend_from_slice(&content_bits.to_le_bytes());
    out.extend_from_slice(&content_bits.to_le_bytes()); // no padding
    out.extend_from_slice(&[0, 0, 0]); // schemes
    out.extend_from_slice(&[1, 8]);
    out.extend_from_slice(payload.as_bytes());
    out
}

/// Lay a trace directory out on disk.
pub fn write_trace(metadata: &[u8], streams: &[(&str, &[u8])]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("metadata"), metadata).unwrap();
    for (name, data) in streams {
        std::fs::write(dir.path().join(name), data).unwrap();
    }
    dir
}
