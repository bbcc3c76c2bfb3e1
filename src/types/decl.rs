use crate::types::{ByteOrder, DisplayBase, Encoding, LogLevel, StreamId};
use fxhash::FxHashMap;
use internment::Intern;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Index of a declaration in a [`DeclArena`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct DeclId(pub(crate) usize);

/// The kind of a type declaration.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, derive_more::Display,
)]
pub enum DeclKind {
    #[display("integer")]
    Integer,
    #[display("float")]
    Float,
    #[display("enum")]
    Enum,
    #[display("string")]
    String,
    #[display("struct")]
    Struct,
    #[display("variant")]
    Variant,
    #[display("array")]
    Array,
    #[display("sequence")]
    Sequence,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct IntegerDecl {
    /// Field width in bits (1..=64).
    pub len: u8,
    pub signed: bool,
    pub byte_order: ByteOrder,
    pub base: DisplayBase,
    /// Alignment of the first bit within a packet (bits).
    pub alignment: u64,
}

impl IntegerDecl {
    /// Byte-packed when the width is a whole number of bytes, bit-packed
    /// otherwise.
    pub fn default_alignment(len: u8) -> u64 {
        if len % 8 == 0 {
            8
        } else {
            1
        }
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct FloatDecl {
    /// Exponent width in bits.
    pub exp_dig: u8,
    /// Mantissa width in bits, including the sign bit.
    pub mant_dig: u8,
    pub byte_order: ByteOrder,
    pub alignment: u64,
}

impl FloatDecl {
    pub fn len(&self) -> u8 {
        self.exp_dig + self.mant_dig
    }
}

/// One element of an enumeration mapping: either a single value or a
/// closed interval.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub enum EnumMapping {
    InclusiveRange(i64, i64),
    Value(i64),
}

impl EnumMapping {
    /// Returns true if the mapping element contains the value
    pub fn contains(&self, value: i64) -> bool {
        match self {
            Self::InclusiveRange(min, max) => (value >= *min) && (value <= *max),
            Self::Value(v) => *v == value,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct EnumDecl {
    /// The integer carrying the enumeration on the wire.
    pub container: IntegerDecl,
    /// Label mappings, in declaration order.
    pub mappings: Vec<(Intern<String>, Vec<EnumMapping>)>,
}

impl EnumDecl {
    /// Map a decoded container value to its label, if any mapping covers it.
    pub fn label(&self, v: i64) -> Option<Intern<String>> {
        self.mappings
            .iter()
            .find_map(|(label, values)| values.iter().any(|s| s.contains(v)).then_some(*label))
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct StringDecl {
    pub encoding: Encoding,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct StructDecl {
    /// Minimum alignment of the first bit (bits).
    pub min_alignment: u64,
    /// Named fields, in declaration order.
    pub fields: Vec<(Intern<String>, DeclId)>,
}

impl StructDecl {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n.as_str() == name)
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct VariantDecl {
    /// Path to the tag enumeration, resolved through the scope chain.
    pub tag: FieldPath,
    /// Named branches, in declaration order.
    pub branches: Vec<(Intern<String>, DeclId)>,
}

impl VariantDecl {
    pub fn branch_index(&self, label: &str) -> Option<usize> {
        self.branches.iter().position(|(n, _)| n.as_str() == label)
    }
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ArrayDecl {
    pub length: u64,
    pub element: DeclId,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct SequenceDecl {
    /// Path to the integer holding the element count, resolved through
    /// the scope chain.
    pub length: FieldPath,
    pub element: DeclId,
}

/// A node of the type declaration tree produced from metadata.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Declaration {
    Integer(IntegerDecl),
    Float(FloatDecl),
    Enum(EnumDecl),
    String(StringDecl),
    Struct(StructDecl),
    Variant(VariantDecl),
    Array(ArrayDecl),
    Sequence(SequenceDecl),
}

impl Declaration {
    pub fn kind(&self) -> DeclKind {
        match self {
            Declaration::Integer(_) => DeclKind::Integer,
            Declaration::Float(_) => DeclKind::Float,
            Declaration::Enum(_) => DeclKind::Enum,
            Declaration::String(_) => DeclKind::String,
            Declaration::Struct(_) => DeclKind::Struct,
            Declaration::Variant(_) => DeclKind::Variant,
            Declaration::Array(_) => DeclKind::Array,
            Declaration::Sequence(_) => DeclKind::Sequence,
        }
    }
}

/// Arena holding every declaration of a trace; cross-references are
/// [`DeclId`] indices, so the declaration graph is a DAG by construction.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct DeclArena {
    decls: Vec<Declaration>,
}

impl DeclArena {
    pub fn push(&mut self, decl: Declaration) -> DeclId {
        let id = DeclId(self.decls.len());
        self.decls.push(decl);
        id
    }

    pub fn get(&self, id: DeclId) -> &Declaration {
        &self.decls[id.0]
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Alignment of the first bit of a field of this declaration (bits).
    pub fn alignment(&self, id: DeclId) -> u64 {
        match self.get(id) {
            Declaration::Integer(d) => d.alignment,
            Declaration::Float(d) => d.alignment,
            Declaration::Enum(d) => d.container.alignment,
            Declaration::String(_) => 8,
            Declaration::Struct(d) => d
                .fields
                .iter()
                .map(|(_, f)| self.alignment(*f))
                .max()
                .unwrap_or(1)
                .max(d.min_alignment),
            // Each branch re-aligns itself once the tag is known.
            Declaration::Variant(_) => 1,
            Declaration::Array(d) => self.alignment(d.element),
            Declaration::Sequence(d) => self.alignment(d.element),
        }
    }
}

/// A dotted field reference (e.g. `stream.event.header.id` or a bare
/// `len`) used by variant tags and sequence lengths.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct FieldPath {
    components: Vec<Intern<String>>,
}

/// One of the six lookup root scopes, in priority order from outermost
/// to innermost.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum ScopePath {
    TracePacketHeader,
    StreamPacketContext,
    StreamEventHeader,
    StreamEventContext,
    EventContext,
    EventFields,
}

impl ScopePath {
    const ROOTS: [(ScopePath, &'static [&'static str]); 6] = [
        (ScopePath::TracePacketHeader, &["trace", "packet", "header"]),
        (
            ScopePath::StreamPacketContext,
            &["stream", "packet", "context"],
        ),
        (
            ScopePath::StreamEventHeader,
            &["stream", "event", "header"],
        ),
        (
            ScopePath::StreamEventContext,
            &["stream", "event", "context"],
        ),
        (ScopePath::EventContext, &["event", "context"]),
        (ScopePath::EventFields, &["event", "fields"]),
    ];
}

impl FieldPath {
    pub fn new<S: AsRef<str>>(path: S) -> Self {
        Self {
            components: path
                .as_ref()
                .split('.')
                .filter(|c| !c.is_empty())
                .map(|c| Intern::new(c.to_owned()))
                .collect(),
        }
    }

    pub fn components(&self) -> &[Intern<String>] {
        &self.components
    }

    /// Split an absolute path into its root scope and the remaining
    /// components; `None` for relative paths.
    pub fn split_root(&self) -> Option<(ScopePath, &[Intern<String>])> {
        ScopePath::ROOTS.iter().find_map(|(root, prefix)| {
            let matches = self.components.len() >= prefix.len()
                && self
                    .components
                    .iter()
                    .zip(prefix.iter())
                    .all(|(c, p)| c.as_str() == *p);
            matches.then(|| (*root, &self.components[prefix.len()..]))
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.components.iter().enumerate() {
            if i != 0 {
                f.write_str(".")?;
            }
            f.write_str(c)?;
        }
        Ok(())
    }
}

/// A clock described by the metadata.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
pub struct ClockDescription {
    pub name: String,
    /// Frequency (Hz).
    pub frequency: u64,
    /// Precision (cycles).
    pub precision: u64,
    /// Offset in seconds.
    pub offset_seconds: i64,
    /// Offset in cycles.
    pub offset_cycles: u64,
    /// True if the clock origin is the Unix epoch.
    pub absolute: bool,
    pub uuid: Option<Uuid>,
    pub description: Option<String>,
}

/// Everything a consumer needs to decode one stream class's files.
#[derive(Clone, Debug, Default)]
pub struct StreamDescription {
    pub packet_context: Option<DeclId>,
    pub event_header: Option<DeclId>,
    pub event_context: Option<DeclId>,
    /// Event classes, dense by event id; holes are permitted.
    pub events: Vec<Option<EventDescription>>,
}

#[derive(Clone, Debug)]
pub struct EventDescription {
    pub name: Intern<String>,
    pub log_level: Option<LogLevel>,
    pub context: Option<DeclId>,
    pub fields: Option<DeclId>,
}

/// The interpreted metadata: the declaration tree and trace-wide
/// attributes. Immutable once the trace is open.
#[derive(Clone, Debug)]
pub struct TraceDescription {
    pub byte_order: ByteOrder,
    pub uuid: Option<Uuid>,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    /// Trace-wide packet header struct, when declared.
    pub packet_header: Option<DeclId>,
    pub clock: Option<ClockDescription>,
    pub streams: FxHashMap<StreamId, StreamDescription>,
    pub decls: DeclArena,
}

impl TraceDescription {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            uuid: None,
            major: None,
            minor: None,
            packet_header: None,
            clock: None,
            streams: FxHashMap::default(),
            decls: DeclArena::default(),
        }
    }

    pub fn stream(&self, id: StreamId) -> Option<&StreamDescription> {
        self.streams.get(&id)
    }
}
