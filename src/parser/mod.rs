use crate::{
    error::Error,
    parser::bitfield::sign_extend,
    parser::cursor::PacketCursor,
    types::decl::{DeclArena, DeclId, Declaration},
    types::def::{DefArena, DefId, Definition, ScopeRoots},
};
use tracing::trace;

pub mod bitfield;
pub mod cursor;

pub(crate) use cursor::PacketSource;

/// The typed reader: dispatches on a declaration's kind, consumes the
/// declared number of bits from the cursor, and stores the decoded value
/// in the matching definition. Structs and variants recurse.
pub(crate) struct Decoder<'a> {
    pub decls: &'a DeclArena,
    pub defs: &'a mut DefArena,
    pub cursor: &'a mut PacketCursor,
    pub roots: ScopeRoots,
}

impl Decoder<'_> {
    pub fn read(&mut self, def: DefId) -> Result<(), Error> {
        let decl = self.defs.node(def).decl;
        match self.decls.get(decl).clone() {
            Declaration::Integer(d) => self.read_integer(def, &d),
            Declaration::Float(d) => self.read_float(def, &d),
            Declaration::Enum(d) => self.read_enum(def, &d),
            Declaration::String(_) => self.read_string(def),
            Declaration::Struct(_) => self.read_struct(def, decl),
            Declaration::Variant(d) => self.read_variant(def, &d),
            Declaration::Array(_) => self.read_elements(def),
            Declaration::Sequence(d) => self.read_sequence(def, &d),
        }
    }

    fn read_integer(
        &mut self,
        def: DefId,
        decl: &crate::types::decl::IntegerDecl,
    ) -> Result<(), Error> {
        self.cursor.align(decl.alignment)?;
        let value = self.cursor.read_bits(decl.len, decl.byte_order)?;
        self.defs.node_mut(def).payload = Definition::Integer {
            value,
            svalue: sign_extend(value, decl.len),
        };
        Ok(())
    }

    fn read_float(
        &mut self,
        def: DefId,
        decl: &crate::types::decl::FloatDecl,
    ) -> Result<(), Error> {
        self.cursor.align(decl.alignment)?;
        let value = match decl.len() {
            32 => {
                let raw = self.cursor.read_bits(32, decl.byte_order)?;
                f64::from(f32::from_bits(raw as u32))
            }
            64 => {
                let raw = self.cursor.read_bits(64, decl.byte_order)?;
                f64::from_bits(raw)
            }
            n => return Err(Error::InvalidFloatSize(u64::from(n))),
        };
        self.defs.node_mut(def).payload = Definition::Float { value };
        Ok(())
    }

    fn read_enum(&mut self, def: DefId, decl: &crate::types::decl::EnumDecl) -> Result<(), Error> {
        let container = &decl.container;
        self.cursor.align(container.alignment)?;
        let raw = self.cursor.read_bits(container.len, container.byte_order)?;
        let value = if container.signed {
            sign_extend(raw, container.len)
        } else {
            raw as i64
        };
        self.defs.node_mut(def).payload = Definition::Enum {
            value,
            label: decl.label(value),
        };
        Ok(())
    }

    fn read_string(&mut self, def: DefId) -> Result<(), Error> {
        self.cursor.align(8)?;
        let byte_order = crate::types::ByteOrder::native();
        let mut cstr = Vec::new();
        loop {
            let b = self.cursor.read_bits(8, byte_order)? as u8;
            if b == 0 {
                break;
            }
            cstr.push(b);
        }
        self.defs.node_mut(def).payload = Definition::String {
            value: String::from_utf8_lossy(&cstr).to_string(),
        };
        Ok(())
    }

    fn read_struct(&mut self, def: DefId, decl: DeclId) -> Result<(), Error> {
        self.cursor.align(self.decls.alignment(decl))?;
        self.read_elements(def)
    }

    /// Read the already-instantiated children of a struct or fixed array
    /// in order; each child re-aligns itself.
    fn read_elements(&mut self, def: DefId) -> Result<(), Error> {
        let children = match &self.defs.node(def).payload {
            Definition::Struct { fields } => fields.clone(),
            Definition::Array { elements } => elements.clone(),
            payload => {
                debug_assert!(false, "composite definition expected, found {payload:?}");
                return Err(self.mismatched_definition(def));
            }
        };
        for child in children {
            self.read(child)?;
        }
        Ok(())
    }

    fn read_variant(
        &mut self,
        def: DefId,
        decl: &crate::types::decl::VariantDecl,
    ) -> Result<(), Error> {
        let tag = self
            .defs
            .resolve(self.decls, &self.roots, Some(def), &decl.tag)
            .ok_or_else(|| Error::UnresolvedVariantTag(decl.tag.to_string()))?;
        let Definition::Enum { value, label } = &self.defs.node(tag).payload else {
            return Err(Error::UnresolvedVariantTag(decl.tag.to_string()));
        };
        let label = match label {
            Some(l) => l.as_str().to_owned(),
            None => value.to_string(),
        };
        let selected = decl
            .branch_index(&label)
            .ok_or_else(|| Error::VariantBranchMissing {
                tag: decl.tag.to_string(),
                label: label.clone(),
            })?;
        trace!(tag = %decl.tag, %label, "Selected variant branch");

        let branch = match &mut self.defs.node_mut(def).payload {
            Definition::Variant { branches, selected: sel } => {
                *sel = Some(selected);
                Some(branches[selected])
            }
            payload => {
                debug_assert!(false, "variant definition expected, found {payload:?}");
                None
            }
        };
        let branch = branch.ok_or_else(|| self.mismatched_definition(def))?;
        self.read(branch)
    }

    fn read_sequence(
        &mut self,
        def: DefId,
        decl: &crate::types::decl::SequenceDecl,
    ) -> Result<(), Error> {
        let length = self
            .defs
            .resolve(self.decls, &self.roots, Some(def), &decl.length)
            .and_then(|id| match self.defs.node(id).payload {
                Definition::Integer { value, .. } => Some(value),
                _ => None,
            })
            .ok_or_else(|| Error::UnresolvedSequenceLength(decl.length.to_string()))?;

        let mut elements = match &self.defs.node(def).payload {
            Definition::Sequence { elements } => elements.clone(),
            payload => {
                debug_assert!(false, "sequence definition expected, found {payload:?}");
                return Err(self.mismatched_definition(def));
            }
        };
        while (elements.len() as u64) < length {
            elements.push(self.defs.instantiate(self.decls, decl.element, Some(def)));
        }
        elements.truncate(length as usize);
        match &mut self.defs.node_mut(def).payload {
            Definition::Sequence { elements: e } => *e = elements.clone(),
            payload => debug_assert!(false, "sequence definition expected, found {payload:?}"),
        }

        for element in elements {
            self.read(element)?;
        }
        Ok(())
    }

    fn mismatched_definition(&self, def: DefId) -> Error {
        Error::Metadata(format!(
            "definition does not match its {} declaration",
            self.decls.get(self.defs.node(def).decl).kind()
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::decl::{
        ArrayDecl, EnumDecl, EnumMapping, FieldPath, FloatDecl, IntegerDecl, SequenceDecl,
        StringDecl, StructDecl, VariantDecl,
    };
    use crate::types::{ByteOrder, DisplayBase, Encoding, FieldValue};
    use crate::{parser::cursor::PacketData, trace::StreamData};
    use internment::Intern;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn named(s: &str) -> Intern<String> {
        Intern::new(s.to_owned())
    }

    fn uint(len: u8, alignment: u64) -> Declaration {
        Declaration::Integer(IntegerDecl {
            len,
            signed: false,
            byte_order: ByteOrder::LittleEndian,
            base: DisplayBase::default(),
            alignment,
        })
    }

    fn int(len: u8, alignment: u64) -> Declaration {
        Declaration::Integer(IntegerDecl {
            len,
            signed: true,
            byte_order: ByteOrder::LittleEndian,
            base: DisplayBase::default(),
            alignment,
        })
    }

    fn cursor_over(bytes: Vec<u8>) -> PacketCursor {
        let len = bytes.len();
        let region = Arc::new(StreamData::Owned(bytes));
        let mut cursor = PacketCursor::default();
        cursor.load(
            PacketData::Window {
                region,
                start: 0,
                len,
            },
            len as u64 * 8,
            len as u64 * 8,
        );
        cursor
    }

    fn decode(
        decls: &DeclArena,
        root: DeclId,
        bytes: Vec<u8>,
    ) -> Result<(DefArena, DefId, u64), Error> {
        let mut defs = DefArena::default();
        let def = defs.instantiate(decls, root, None);
        let mut cursor = cursor_over(bytes);
        let mut decoder = Decoder {
            decls,
            defs: &mut defs,
            cursor: &mut cursor,
            roots: ScopeRoots::default(),
        };
        decoder.read(def)?;
        let offset = cursor.offset_bits().unwrap();
        Ok((defs, def, offset))
    }

    #[test]
    fn mixed_alignment_struct() {
        // struct { u8 a; u32 b (32-bit aligned); i16 c; }
        let mut decls = DeclArena::default();
        let a = decls.push(uint(8, 8));
        let b = decls.push(uint(32, 32));
        let c = decls.push(int(16, 16));
        let root = decls.push(Declaration::Struct(StructDecl {
            min_alignment: 1,
            fields: vec![(named("a"), a), (named("b"), b), (named("c"), c)],
        }));

        let bytes = vec![
            0x11, 0x00, 0x00, 0x00, // a + 3 bytes padding
            0x78, 0x56, 0x34, 0x12, // b
            0xFE, 0xFF, // c = -2
        ];
        let (defs, def, offset) = decode(&decls, root, bytes).unwrap();
        // Exactly the declared widths plus alignment padding were consumed.
        assert_eq!(offset, 80);
        assert_eq!(
            defs.struct_items(&decls, def),
            vec![
                (named("a"), FieldValue::UnsignedInteger(0x11, DisplayBase::Decimal)),
                (named("b"), FieldValue::UnsignedInteger(0x12345678, DisplayBase::Decimal)),
                (named("c"), FieldValue::SignedInteger(-2, DisplayBase::Decimal)),
            ]
        );
    }

    #[test]
    fn string_consumes_terminator() {
        let mut decls = DeclArena::default();
        let s = decls.push(Declaration::String(StringDecl {
            encoding: Encoding::Utf8,
        }));
        let tail = decls.push(uint(8, 8));
        let root = decls.push(Declaration::Struct(StructDecl {
            min_alignment: 1,
            fields: vec![(named("s"), s), (named("tail"), tail)],
        }));

        let bytes = b"hi\0\x42".to_vec();
        let (defs, def, offset) = decode(&decls, root, bytes).unwrap();
        assert_eq!(offset, 32);
        assert_eq!(
            defs.struct_items(&decls, def),
            vec![
                (named("s"), FieldValue::String("hi".to_owned())),
                (named("tail"), FieldValue::UnsignedInteger(0x42, DisplayBase::Decimal)),
            ]
        );
    }

    #[test]
    fn float_reinterprets_bits() {
        let mut decls = DeclArena::default();
        let f = decls.push(Declaration::Float(FloatDecl {
            exp_dig: 8,
            mant_dig: 24,
            byte_order: ByteOrder::LittleEndian,
            alignment: 32,
        }));
        let root = decls.push(Declaration::Struct(StructDecl {
            min_alignment: 1,
            fields: vec![(named("f"), f)],
        }));

        let bytes = 1.5_f32.to_bits().to_le_bytes().to_vec();
        let (defs, def, _) = decode(&decls, root, bytes).unwrap();
        assert_eq!(
            defs.struct_items(&decls, def),
            vec![(named("f"), FieldValue::from(1.5_f32))]
        );
    }

    #[test]
    fn invalid_float_size() {
        let mut decls = DeclArena::default();
        let f = decls.push(Declaration::Float(FloatDecl {
            exp_dig: 5,
            mant_dig: 11,
            byte_order: ByteOrder::LittleEndian,
            alignment: 16,
        }));
        let root = decls.push(Declaration::Struct(StructDecl {
            min_alignment: 1,
            fields: vec![(named("f"), f)],
        }));
        let err = decode(&decls, root, vec![0; 4]).unwrap_err();
        assert!(matches!(err, Error::InvalidFloatSize(16)));
    }

    #[test]
    fn sequence_length_from_scope() {
        // struct { u8 len; u16 data[len]; }
        let mut decls = DeclArena::default();
        let len = decls.push(uint(8, 8));
        let elem = decls.push(uint(16, 16));
        let seq = decls.push(Declaration::Sequence(SequenceDecl {
            length: FieldPath::new("len"),
            element: elem,
        }));
        let root = decls.push(Declaration::Struct(StructDecl {
            min_alignment: 1,
            fields: vec![(named("len"), len), (named("data"), seq)],
        }));

        let bytes = vec![
            0x02, 0x00, // len = 2, 1 byte padding
            0x01, 0x00, // data[0]
            0x02, 0x00, // data[1]
        ];
        let (defs, def, offset) = decode(&decls, root, bytes).unwrap();
        assert_eq!(offset, 48);
        assert_eq!(
            defs.struct_items(&decls, def),
            vec![
                (named("len"), FieldValue::UnsignedInteger(2, DisplayBase::Decimal)),
                (
                    named("data"),
                    FieldValue::Array(vec![
                        FieldValue::UnsignedInteger(1, DisplayBase::Decimal),
                        FieldValue::UnsignedInteger(2, DisplayBase::Decimal),
                    ])
                ),
            ]
        );
    }

    #[test]
    fn fixed_array() {
        let mut decls = DeclArena::default();
        let elem = decls.push(uint(8, 8));
        let arr = decls.push(Declaration::Array(ArrayDecl {
            length: 3,
            element: elem,
        }));
        let root = decls.push(Declaration::Struct(StructDecl {
            min_alignment: 1,
            fields: vec![(named("bytes"), arr)],
        }));
        let (defs, def, offset) = decode(&decls, root, vec![1, 2, 3]).unwrap();
        assert_eq!(offset, 24);
        assert_eq!(
            defs.struct_items(&decls, def),
            vec![(
                named("bytes"),
                FieldValue::Array(vec![
                    FieldValue::UnsignedInteger(1, DisplayBase::Decimal),
                    FieldValue::UnsignedInteger(2, DisplayBase::Decimal),
                    FieldValue::UnsignedInteger(3, DisplayBase::Decimal),
                ])
            )]
        );
    }

    #[test]
    fn variant_selected_by_enum_label() {
        // struct { enum : u8 { A = 0, B = 1 } tag; variant <tag> v { u16 A; u32 B; }; }
        let mut decls = DeclArena::default();
        let tag = decls.push(Declaration::Enum(EnumDecl {
            container: IntegerDecl {
                len: 8,
                signed: false,
                byte_order: ByteOrder::LittleEndian,
                base: DisplayBase::default(),
                alignment: 8,
            },
            mappings: vec![
                (named("A"), vec![EnumMapping::Value(0)]),
                (named("B"), vec![EnumMapping::Value(1)]),
            ],
        }));
        let a = decls.push(uint(16, 16));
        let b = decls.push(uint(32, 32));
        let v = decls.push(Declaration::Variant(VariantDecl {
            tag: FieldPath::new("tag"),
            branches: vec![(named("A"), a), (named("B"), b)],
        }));
        let root = decls.push(Declaration::Struct(StructDecl {
            min_alignment: 1,
            fields: vec![(named("tag"), tag), (named("v"), v)],
        }));

        let bytes = vec![
            0x01, 0x00, 0x00, 0x00, // tag = B, padding to 32
            0x0D, 0xF0, 0xAD, 0x8B, // v.B
        ];
        let (defs, def, offset) = decode(&decls, root, bytes).unwrap();
        assert_eq!(offset, 64);
        assert_eq!(
            defs.struct_items(&decls, def),
            vec![
                (named("tag"), FieldValue::Enumeration(1, Some(named("B")))),
                (
                    named("v"),
                    FieldValue::Variant(
                        named("B"),
                        Box::new(FieldValue::UnsignedInteger(0x8BADF00D, DisplayBase::Decimal))
                    )
                ),
            ]
        );
    }

    #[test]
    fn variant_without_matching_branch() {
        let mut decls = DeclArena::default();
        let tag = decls.push(Declaration::Enum(EnumDecl {
            container: IntegerDecl {
                len: 8,
                signed: false,
                byte_order: ByteOrder::LittleEndian,
                base: DisplayBase::default(),
                alignment: 8,
            },
            mappings: vec![(named("A"), vec![EnumMapping::Value(0)])],
        }));
        let a = decls.push(uint(16, 16));
        let v = decls.push(Declaration::Variant(VariantDecl {
            tag: FieldPath::new("tag"),
            branches: vec![(named("A"), a)],
        }));
        let root = decls.push(Declaration::Struct(StructDecl {
            min_alignment: 1,
            fields: vec![(named("tag"), tag), (named("v"), v)],
        }));

        // Tag value 7 has no label and therefore no branch.
        let err = decode(&decls, root, vec![0x07, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::VariantBranchMissing { .. }));
    }

    #[test]
    fn enum_out_of_range_keeps_value() {
        let mut decls = DeclArena::default();
        let e = decls.push(Declaration::Enum(EnumDecl {
            container: IntegerDecl {
                len: 8,
                signed: false,
                byte_order: ByteOrder::LittleEndian,
                base: DisplayBase::default(),
                alignment: 8,
            },
            mappings: vec![(named("A"), vec![EnumMapping::InclusiveRange(0, 3)])],
        }));
        let root = decls.push(Declaration::Struct(StructDecl {
            min_alignment: 1,
            fields: vec![(named("e"), e)],
        }));
        let (defs, def, _) = decode(&decls, root, vec![0x09]).unwrap();
        assert_eq!(
            defs.struct_items(&decls, def),
            vec![(named("e"), FieldValue::Enumeration(9, None))]
        );
    }
}
