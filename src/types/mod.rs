use byteordered::Endianness;
use derive_more::Display;
use internment::Intern;
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

pub use event::Event;
pub use packet::PacketIndexEntry;

pub mod decl;
pub mod def;
pub mod event;
pub mod packet;

pub type StreamId = u64;

pub type EventId = u64;

/// Timestamp in clock cycles
pub type Timestamp = u64;

pub type EventCount = u64;

/// Magic number carried by stream packet headers, when declared.
pub const CTF_MAGIC_NUMBER: u32 = 0xC1FC_1FC1;

/// Magic number framing binary metadata packets.
pub const TSDL_MAGIC_NUMBER: u32 = 0x75D1_1D57;

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    #[serde(alias = "little")]
    #[serde(alias = "le")]
    #[display("le")]
    LittleEndian,
    #[serde(alias = "big")]
    #[serde(alias = "be")]
    #[display("be")]
    BigEndian,
}

impl ByteOrder {
    /// The byte order of the host this reader runs on.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            ByteOrder::LittleEndian => ByteOrder::BigEndian,
            ByteOrder::BigEndian => ByteOrder::LittleEndian,
        }
    }
}

impl From<ByteOrder> for Endianness {
    fn from(value: ByteOrder) -> Self {
        match value {
            ByteOrder::LittleEndian => Endianness::Little,
            ByteOrder::BigEndian => Endianness::Big,
        }
    }
}

/// The preferred base (radix) to use when displaying integer values,
/// from the TSDL `base` attribute.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Default,
    Display,
    TryFromPrimitive,
    IntoPrimitive,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum DisplayBase {
    #[serde(alias = "bin")]
    #[display("binary")]
    Binary = 2,
    #[serde(alias = "oct")]
    #[display("octal")]
    Octal = 8,
    #[default]
    #[serde(alias = "dec")]
    #[display("decimal")]
    Decimal = 10,
    #[serde(alias = "hex")]
    #[display("hexadecimal")]
    Hexadecimal = 16,
}

/// String encoding, from the TSDL `encoding` attribute.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    None,
    Ascii,
    #[default]
    Utf8,
}

#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    IntoPrimitive,
    FromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum LogLevel {
    #[display("EMERG")]
    Emergency = 0,
    #[display("ALERT")]
    Alert = 1,
    #[display("CRIT")]
    Critical = 2,
    #[display("ERR")]
    Error = 3,
    #[display("WARNING")]
    Warning = 4,
    #[display("NOTICE")]
    Notice = 5,
    #[display("INFO")]
    Info = 6,
    #[display("DEBUG_SYSTEM")]
    DebugSystem = 7,
    #[display("DEBUG_PROGRAM")]
    DebugProgram = 8,
    #[display("DEBUG_PROCESS")]
    DebugProcess = 9,
    #[display("DEBUG_MODULE")]
    DebugModule = 10,
    #[display("DEBUG_UNIT")]
    DebugUnit = 11,
    #[display("DEBUG_FUNCTION")]
    DebugFunction = 12,
    #[display("DEBUG_LINE")]
    DebugLine = 13,
    #[display("DEBUG")]
    Debug = 14,
    #[display("{_0}")]
    #[num_enum(catch_all)]
    Other(i32),
}

/// A decoded field value.
#[derive(Clone, PartialEq, PartialOrd, Debug, Serialize, Deserialize)]
pub enum FieldValue {
    UnsignedInteger(u64, DisplayBase),
    SignedInteger(i64, DisplayBase),
    Enumeration(i64, Option<Intern<String>>),
    String(String),
    F32(OrderedFloat<f32>),
    F64(OrderedFloat<f64>),
    Struct(Vec<(Intern<String>, FieldValue)>),
    Variant(Intern<String>, Box<FieldValue>),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UnsignedInteger(v, _) => Some(*v),
            FieldValue::SignedInteger(v, _) => Some(*v as u64),
            FieldValue::Enumeration(v, _) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::UnsignedInteger(v, _) => Some(*v as i64),
            FieldValue::SignedInteger(v, _) => Some(*v),
            FieldValue::Enumeration(v, _) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UnsignedInteger(v, DisplayBase::default())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::SignedInteger(v, DisplayBase::default())
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_owned())
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::F32(OrderedFloat(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(OrderedFloat(v))
    }
}

/// A 64-bit monotonic timestamp reconstructed from on-wire timestamp
/// fields that may be narrower than 64 bits.
///
/// A reading narrower than 64 bits replaces the low bits of the current
/// value; a low-bits decrease means the on-wire counter wrapped, and one
/// wrap's worth is carried into the high bits. Assumes no more than one
/// wrap occurs between consecutive readings.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct ExtendedTimestamp(Timestamp);

impl ExtendedTimestamp {
    pub fn new(value: Timestamp) -> Self {
        Self(value)
    }

    pub fn get(&self) -> Timestamp {
        self.0
    }

    pub fn set(&mut self, value: Timestamp) {
        self.0 = value;
    }

    /// Fold a `width_bits`-wide on-wire reading into the extended value,
    /// returning the updated timestamp.
    pub fn update(&mut self, raw: u64, width_bits: u8) -> Timestamp {
        debug_assert!((1..=64).contains(&width_bits));
        if width_bits == 64 {
            self.0 = raw;
            return self.0;
        }
        let mask = (1u64 << width_bits) - 1;
        let old_low = self.0 & mask;
        let mut new_low = raw;
        if new_low < old_low {
            new_low += 1u64 << width_bits;
        }
        self.0 = (self.0 & !mask) + new_low;
        self.0
    }
}
