use crate::{error::Error, parser::bitfield, trace::StreamData, types::ByteOrder};
use memmap2::MmapOptions;
use std::{fs::File, sync::Arc};

/// Where a stream's packets come from: an on-disk file mapped one packet
/// at a time, or a caller-supplied region windowed one packet at a time.
#[derive(Debug)]
pub(crate) enum PacketSource {
    File(File),
    Region(Arc<StreamData>),
}

impl PacketSource {
    pub fn len(&self) -> Result<u64, Error> {
        Ok(match self {
            PacketSource::File(f) => f.metadata()?.len(),
            PacketSource::Region(r) => r.as_ref().as_ref().len() as u64,
        })
    }

    /// Map `len` bytes at `offset` read-only.
    pub fn map(&self, offset: u64, len: usize) -> Result<PacketData, Error> {
        match self {
            PacketSource::File(f) => {
                // SAFETY: the mapping is private and read-only, and the file
                // handle stays open for as long as the map is held.
                let mmap = unsafe { MmapOptions::new().offset(offset).len(len).map(f)? };
                Ok(PacketData::Mapped(mmap))
            }
            PacketSource::Region(r) => {
                let total = r.as_ref().as_ref().len() as u64;
                if offset + len as u64 > total {
                    return Err(Error::PacketSizeExceedsFile {
                        packet_size: len as u64 * 8,
                        remaining: total.saturating_sub(offset) * 8,
                    });
                }
                Ok(PacketData::Window {
                    region: Arc::clone(r),
                    start: offset as usize,
                    len,
                })
            }
        }
    }
}

/// One live packet mapping.
#[derive(Debug)]
pub(crate) enum PacketData {
    Mapped(memmap2::Mmap),
    Window {
        region: Arc<StreamData>,
        start: usize,
        len: usize,
    },
}

impl PacketData {
    fn bytes(&self) -> &[u8] {
        match self {
            PacketData::Mapped(m) => m,
            PacketData::Window { region, start, len } => {
                &region.as_ref().as_ref()[*start..*start + *len]
            }
        }
    }
}

/// The bit cursor over the currently-mapped packet.
///
/// `offset_bits` of `None` is the end-of-stream state; otherwise the
/// offset lies in `[0, content_size_bits]`.
#[derive(Debug, Default)]
pub struct PacketCursor {
    data: Option<PacketData>,
    packet_size_bits: u64,
    content_size_bits: u64,
    offset_bits: Option<u64>,
}

impl PacketCursor {
    /// Replace the current mapping with a freshly-loaded packet and
    /// rewind to its first bit. The previous mapping, if any, is dropped.
    pub(crate) fn load(&mut self, data: PacketData, packet_size_bits: u64, content_size_bits: u64) {
        self.data = Some(data);
        self.packet_size_bits = packet_size_bits;
        self.content_size_bits = content_size_bits;
        self.offset_bits = Some(0);
    }

    /// Enter the end-of-stream state, dropping the mapping.
    pub(crate) fn set_end(&mut self) {
        self.data = None;
        self.offset_bits = None;
    }

    pub fn is_end(&self) -> bool {
        self.offset_bits.is_none()
    }

    pub fn offset_bits(&self) -> Option<u64> {
        self.offset_bits
    }

    pub(crate) fn set_offset(&mut self, offset_bits: u64) {
        debug_assert!(offset_bits <= self.content_size_bits);
        self.offset_bits = Some(offset_bits);
    }

    pub fn packet_size_bits(&self) -> u64 {
        self.packet_size_bits
    }

    pub fn content_size_bits(&self) -> u64 {
        self.content_size_bits
    }

    /// Whether the cursor sits exactly at the end of the packet content.
    pub fn at_content_end(&self) -> bool {
        self.offset_bits == Some(self.content_size_bits)
    }

    fn end_error(&self, offset: u64, len: u64) -> Error {
        Error::UnexpectedEndOfPacket {
            offset,
            len,
            content_size: self.content_size_bits,
        }
    }

    /// Advance to the next multiple of `alignment_bits`.
    pub fn align(&mut self, alignment_bits: u64) -> Result<(), Error> {
        debug_assert!(alignment_bits > 0);
        let offset = self
            .offset_bits
            .ok_or_else(|| self.end_error(self.content_size_bits, 0))?;
        let aligned = (offset + (alignment_bits - 1)) / alignment_bits * alignment_bits;
        tracing::trace!(align = alignment_bits, offset, aligned);
        if aligned > self.content_size_bits {
            return Err(self.end_error(offset, aligned - offset));
        }
        self.offset_bits = Some(aligned);
        Ok(())
    }

    /// Read `len` bits (1..=64) at the current offset and advance.
    pub fn read_bits(&mut self, len: u8, byte_order: ByteOrder) -> Result<u64, Error> {
        let offset = self
            .offset_bits
            .ok_or_else(|| self.end_error(self.content_size_bits, u64::from(len)))?;
        if offset + u64::from(len) > self.content_size_bits {
            return Err(self.end_error(offset, u64::from(len)));
        }
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| self.end_error(offset, u64::from(len)))?;
        let value = bitfield::read_bits(data.bytes(), offset, len, byte_order);
        self.offset_bits = Some(offset + u64::from(len));
        Ok(value)
    }
}
