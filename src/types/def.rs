use crate::types::decl::{DeclArena, DeclId, Declaration, FieldPath, ScopePath};
use crate::types::FieldValue;
use internment::Intern;
use ordered_float::OrderedFloat;
use uuid::Uuid;

/// Index of a definition in a [`DefArena`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct DefId(pub(crate) usize);

/// A runtime instance of a declaration, holding the values decoded from
/// the current packet or event. The parent link is the scope chain used
/// for name resolution.
#[derive(Clone, Debug)]
pub struct DefNode {
    pub decl: DeclId,
    pub parent: Option<DefId>,
    pub payload: Definition,
}

#[derive(Clone, Debug)]
pub enum Definition {
    /// Both views of the raw bits; the sign-extended view follows the
    /// declared width.
    Integer { value: u64, svalue: i64 },
    Float { value: f64 },
    Enum {
        value: i64,
        label: Option<Intern<String>>,
    },
    String { value: String },
    Struct { fields: Vec<DefId> },
    Variant {
        branches: Vec<DefId>,
        selected: Option<usize>,
    },
    Array { elements: Vec<DefId> },
    Sequence { elements: Vec<DefId> },
}

/// The root definitions of the six lookup scopes, outermost first.
#[derive(Copy, Clone, Debug, Default)]
pub struct ScopeRoots {
    pub trace_packet_header: Option<DefId>,
    pub stream_packet_context: Option<DefId>,
    pub stream_event_header: Option<DefId>,
    pub stream_event_context: Option<DefId>,
    pub event_context: Option<DefId>,
    pub event_fields: Option<DefId>,
}

impl ScopeRoots {
    pub fn get(&self, root: ScopePath) -> Option<DefId> {
        match root {
            ScopePath::TracePacketHeader => self.trace_packet_header,
            ScopePath::StreamPacketContext => self.stream_packet_context,
            ScopePath::StreamEventHeader => self.stream_event_header,
            ScopePath::StreamEventContext => self.stream_event_context,
            ScopePath::EventContext => self.event_context,
            ScopePath::EventFields => self.event_fields,
        }
    }

    fn innermost_first(&self) -> [Option<DefId>; 6] {
        [
            self.event_fields,
            self.event_context,
            self.stream_event_context,
            self.stream_event_header,
            self.stream_packet_context,
            self.trace_packet_header,
        ]
    }
}

/// Arena holding one stream's instantiated definitions.
#[derive(Clone, Debug, Default)]
pub struct DefArena {
    nodes: Vec<DefNode>,
}

impl DefArena {
    pub fn node(&self, id: DefId) -> &DefNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: DefId) -> &mut DefNode {
        &mut self.nodes[id.0]
    }

    /// Instantiate a definition tree for `decl`. Structs, variants, and
    /// fixed arrays instantiate their children eagerly; sequences grow
    /// to their decoded length on each read.
    pub fn instantiate(
        &mut self,
        decls: &DeclArena,
        decl: DeclId,
        parent: Option<DefId>,
    ) -> DefId {
        let payload = match decls.get(decl) {
            Declaration::Integer(_) => Definition::Integer {
                value: 0,
                svalue: 0,
            },
            Declaration::Float(_) => Definition::Float { value: 0.0 },
            Declaration::Enum(_) => Definition::Enum {
                value: 0,
                label: None,
            },
            Declaration::String(_) => Definition::String {
                value: String::new(),
            },
            Declaration::Struct(_)
            | Declaration::Variant(_)
            | Declaration::Array(_)
            | Declaration::Sequence(_) => Definition::Struct { fields: Vec::new() },
        };
        let id = DefId(self.nodes.len());
        self.nodes.push(DefNode {
            decl,
            parent,
            payload,
        });

        match decls.get(decl).clone() {
            Declaration::Struct(d) => {
                let fields = d
                    .fields
                    .iter()
                    .map(|(_, f)| self.instantiate(decls, *f, Some(id)))
                    .collect();
                self.node_mut(id).payload = Definition::Struct { fields };
            }
            Declaration::Variant(d) => {
                let branches = d
                    .branches
                    .iter()
                    .map(|(_, b)| self.instantiate(decls, *b, Some(id)))
                    .collect();
                self.node_mut(id).payload = Definition::Variant {
                    branches,
                    selected: None,
                };
            }
            Declaration::Array(d) => {
                let elements = (0..d.length)
                    .map(|_| self.instantiate(decls, d.element, Some(id)))
                    .collect();
                self.node_mut(id).payload = Definition::Array { elements };
            }
            Declaration::Sequence(_) => {
                self.node_mut(id).payload = Definition::Sequence {
                    elements: Vec::new(),
                };
            }
            _ => (),
        }
        id
    }

    /// Direct field of a struct definition, by name.
    pub fn struct_field(&self, decls: &DeclArena, structure: DefId, name: &str) -> Option<DefId> {
        let node = self.node(structure);
        let Definition::Struct { fields } = &node.payload else {
            return None;
        };
        let Declaration::Struct(decl) = decls.get(node.decl) else {
            return None;
        };
        decl.field_index(name).map(|i| fields[i])
    }

    /// The branch definition a variant selected on its last read.
    pub fn selected_branch(&self, variant: DefId) -> Option<DefId> {
        match &self.node(variant).payload {
            Definition::Variant { branches, selected } => selected.map(|i| branches[i]),
            _ => None,
        }
    }

    fn child_by_name(&self, decls: &DeclArena, parent: DefId, name: &str) -> Option<DefId> {
        match &self.node(parent).payload {
            Definition::Struct { .. } => self.struct_field(decls, parent, name),
            Definition::Variant { .. } => {
                let branch = self.selected_branch(parent)?;
                self.struct_field(decls, branch, name)
            }
            _ => None,
        }
    }

    fn descend(
        &self,
        decls: &DeclArena,
        from: DefId,
        components: &[Intern<String>],
    ) -> Option<DefId> {
        let mut cur = from;
        for c in components {
            cur = self.child_by_name(decls, cur, c.as_str())?;
        }
        Some(cur)
    }

    /// Resolve a field reference against the scope chain.
    ///
    /// Absolute paths descend from their named root scope. Relative paths
    /// walk the parent chain from `from` outward, searching each
    /// enclosing struct, then fall back to the root scopes innermost
    /// first.
    pub fn resolve(
        &self,
        decls: &DeclArena,
        roots: &ScopeRoots,
        from: Option<DefId>,
        path: &FieldPath,
    ) -> Option<DefId> {
        if let Some((root, rest)) = path.split_root() {
            return self.descend(decls, roots.get(root)?, rest);
        }
        let (first, rest) = path.components().split_first()?;

        let mut cur = from;
        while let Some(id) = cur {
            if let Some(field) = self.child_by_name(decls, id, first.as_str()) {
                return self.descend(decls, field, rest);
            }
            cur = self.node(id).parent;
        }
        for root in self.innermost_roots(roots) {
            if let Some(field) = self.child_by_name(decls, root, first.as_str()) {
                return self.descend(decls, field, rest);
            }
        }
        None
    }

    fn innermost_roots<'a>(&self, roots: &'a ScopeRoots) -> impl Iterator<Item = DefId> + 'a {
        roots.innermost_first().into_iter().flatten()
    }

    /// Unsigned view of an integer field of a struct definition.
    pub fn unsigned_field(&self, decls: &DeclArena, structure: DefId, name: &str) -> Option<u64> {
        let id = self.struct_field(decls, structure, name)?;
        match self.node(id).payload {
            Definition::Integer { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Unsigned view and declared width of an integer field.
    pub fn integer_field(
        &self,
        decls: &DeclArena,
        structure: DefId,
        name: &str,
    ) -> Option<(u64, u8)> {
        let id = self.struct_field(decls, structure, name)?;
        let node = self.node(id);
        let Definition::Integer { value, .. } = node.payload else {
            return None;
        };
        let Declaration::Integer(decl) = decls.get(node.decl) else {
            return None;
        };
        Some((value, decl.len))
    }

    /// Integer value of an enumeration field of a struct definition.
    pub fn enum_field(&self, decls: &DeclArena, structure: DefId, name: &str) -> Option<i64> {
        let id = self.struct_field(decls, structure, name)?;
        match self.node(id).payload {
            Definition::Enum { value, .. } => Some(value),
            _ => None,
        }
    }

    /// A variant field of a struct definition.
    pub fn variant_field(&self, decls: &DeclArena, structure: DefId, name: &str) -> Option<DefId> {
        let id = self.struct_field(decls, structure, name)?;
        matches!(self.node(id).payload, Definition::Variant { .. }).then_some(id)
    }

    /// When a struct holds exactly one unsigned integer field, its
    /// unsigned view.
    pub fn single_unsigned_field(&self, decls: &DeclArena, structure: DefId) -> Option<u64> {
        let node = self.node(structure);
        let Definition::Struct { fields } = &node.payload else {
            return None;
        };
        let mut found = None;
        for id in fields {
            let field = self.node(*id);
            if let (Definition::Integer { value, .. }, Declaration::Integer(decl)) =
                (&field.payload, decls.get(field.decl))
            {
                if !decl.signed {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(*value);
                }
            }
        }
        found
    }

    /// A 16-element byte-array field decoded as a UUID.
    pub fn uuid_field(&self, decls: &DeclArena, structure: DefId, name: &str) -> Option<Uuid> {
        let id = self.struct_field(decls, structure, name)?;
        let Definition::Array { elements } = &self.node(id).payload else {
            return None;
        };
        if elements.len() != 16 {
            return None;
        }
        let mut bytes = [0_u8; 16];
        for (b, e) in bytes.iter_mut().zip(elements.iter()) {
            match self.node(*e).payload {
                Definition::Integer { value, .. } => *b = value as u8,
                _ => return None,
            }
        }
        Some(Uuid::from_bytes(bytes))
    }

    /// The decoded value of a definition, or `None` when the definition
    /// was never decoded or no longer matches its declaration.
    pub fn field_value(&self, decls: &DeclArena, id: DefId) -> Option<FieldValue> {
        let node = self.node(id);
        Some(match (&node.payload, decls.get(node.decl)) {
            (Definition::Integer { value, svalue }, Declaration::Integer(decl)) => {
                if decl.signed {
                    FieldValue::SignedInteger(*svalue, decl.base)
                } else {
                    FieldValue::UnsignedInteger(*value, decl.base)
                }
            }
            (Definition::Float { value }, Declaration::Float(decl)) => {
                if decl.len() == 32 {
                    FieldValue::F32(OrderedFloat(*value as f32))
                } else {
                    FieldValue::F64(OrderedFloat(*value))
                }
            }
            (Definition::Enum { value, label }, _) => FieldValue::Enumeration(*value, *label),
            (Definition::String { value }, _) => FieldValue::String(value.clone()),
            (Definition::Struct { .. }, _) => FieldValue::Struct(self.struct_items(decls, id)),
            (Definition::Variant { branches, selected }, Declaration::Variant(decl)) => {
                debug_assert!(
                    selected.is_some(),
                    "variant value extracted before it was decoded"
                );
                let i = (*selected)?;
                FieldValue::Variant(
                    decl.branches[i].0,
                    Box::new(self.field_value(decls, branches[i])?),
                )
            }
            (Definition::Array { elements }, _) | (Definition::Sequence { elements }, _) => {
                FieldValue::Array(
                    elements
                        .iter()
                        .filter_map(|e| self.field_value(decls, *e))
                        .collect(),
                )
            }
            (payload, decl) => {
                debug_assert!(
                    false,
                    "definition {payload:?} does not match declaration {decl:?}"
                );
                return None;
            }
        })
    }

    /// The `(name, value)` items of a struct definition, in field order.
    pub fn struct_items(
        &self,
        decls: &DeclArena,
        structure: DefId,
    ) -> Vec<(Intern<String>, FieldValue)> {
        let node = self.node(structure);
        let Definition::Struct { fields } = &node.payload else {
            return Vec::new();
        };
        let Declaration::Struct(decl) = decls.get(node.decl) else {
            return Vec::new();
        };
        decl.fields
            .iter()
            .zip(fields.iter())
            .filter_map(|((name, _), f)| Some((*name, self.field_value(decls, *f)?)))
            .collect()
    }
}
