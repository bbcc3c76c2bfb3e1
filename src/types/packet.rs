use crate::types::{EventCount, Timestamp};
use serde::{Deserialize, Serialize};

/// One packet of a stream file, as recorded by the indexer.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct PacketIndexEntry {
    /// Offset of the packet from the start of the file (bytes).
    pub offset: u64,
    /// Size of the packet content, header and context included (bits).
    pub content_size_bits: u64,
    /// Size of the packet, padding included (bits).
    pub packet_size_bits: u64,
    /// Timestamp at the beginning of the packet.
    pub timestamp_begin: Timestamp,
    /// Timestamp at the end of the packet.
    pub timestamp_end: Timestamp,
    /// Snapshot of the stream's free-running discarded-event counter.
    pub events_discarded: EventCount,
    /// Bit position just past the packet header and packet context.
    pub data_offset_bits: u64,
}

impl PacketIndexEntry {
    /// Packet size (bytes).
    pub fn packet_size(&self) -> u64 {
        self.packet_size_bits >> 3
    }

    /// Content size (bytes).
    pub fn content_size(&self) -> u64 {
        self.content_size_bits >> 3
    }
}
