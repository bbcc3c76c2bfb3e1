use crate::types::{EventId, StreamId};
use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Attempted to decode an invalid float size ({0})")]
    InvalidFloatSize(u64),

    #[error("Invalid magic number 0x{found:X} at packet {packet} (file offset {offset})")]
    InvalidMagicNumber {
        found: u64,
        packet: usize,
        offset: u64,
    },

    #[error("Trace UUIDs do not match: packet has {found}, metadata has {expected}")]
    UuidMismatch { expected: Uuid, found: Uuid },

    #[error("Stream ID is changing within a stream file ({expected} -> {found})")]
    StreamIdChanged {
        expected: StreamId,
        found: StreamId,
    },

    #[error("Encountered a CTF stream ID ({0}) that's not declared in the metadata")]
    UndefinedStreamId(StreamId),

    #[error("Encountered a CTF event ID ({0}) that's not declared in the metadata")]
    UndefinedEventId(EventId),

    #[error("Content size ({content_size} bits) is larger than packet size ({packet_size} bits)")]
    ContentSizeExceedsPacketSize { content_size: u64, packet_size: u64 },

    #[error(
        "Packet size ({packet_size} bits) is larger than the remaining file size ({remaining} bits)"
    )]
    PacketSizeExceedsFile { packet_size: u64, remaining: u64 },

    #[error("Packet size ({0} bits) is not a positive multiple of 8")]
    InvalidPacketSize(u64),

    #[error("Stream file ({size} bytes) is smaller than a packet header page")]
    StreamFileTooSmall { size: u64 },

    #[error(
        "Attempted to decode {len} bits at offset {offset} past the packet content ({content_size} bits)"
    )]
    UnexpectedEndOfPacket {
        offset: u64,
        len: u64,
        content_size: u64,
    },

    #[error("Variant tag '{0}' does not resolve to an enumeration that was already decoded")]
    UnresolvedVariantTag(String),

    #[error("Variant tag '{tag}' selected '{label}', which has no matching branch")]
    VariantBranchMissing { tag: String, label: String },

    #[error("Sequence length '{0}' does not resolve to an integer that was already decoded")]
    UnresolvedSequenceLength(String),

    #[error("Metadata packet compression scheme ({0}) is not supported")]
    UnsupportedCompression(u8),

    #[error("Metadata packet encryption scheme ({0}) is not supported")]
    UnsupportedEncryption(u8),

    #[error("Metadata packet checksum scheme ({0}) is not supported")]
    UnsupportedChecksum(u8),

    #[error("Opening a trace for writing is not supported")]
    UnsupportedWriteMode,

    #[error("Malformed metadata ({0})")]
    Metadata(String),

    #[error(
        "Encountered an IO error while reading the trace ({})",
        .0.kind()
    )]
    Io(#[from] io::Error),
}
