//! Compiled schema model
//!
//! Types and enums live in arenas and are referenced by [`TypeId`] and
//! [`EnumId`], so recursive and mutually recursive types need no pointers.
//! A [`Schema`] is immutable once compiled and is shared behind `Arc`.

use crate::expr::Expr;
use bytescope_stream::{Endian, Process};
use std::collections::HashMap;

/// Index of a type in [`Schema::types`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

/// Index of an enum in [`Schema::enums`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumId(pub usize);

/// A compiled schema document
#[derive(Debug, Clone)]
pub struct Schema {
    pub meta: Meta,
    /// The document root, always `TypeId(0)`
    pub root: TypeId,
    pub types: Vec<TypeSpec>,
    pub enums: Vec<EnumSpec>,
}

/// Document-level metadata
#[derive(Debug, Clone, Default)]
pub struct Meta {
    pub id: String,
    pub title: Option<String>,
    pub endian: Option<EndianSpec>,
    pub file_extensions: Vec<String>,
    pub imports: Vec<String>,
    pub encoding: Option<String>,
    pub signature: Option<Signature>,
}

/// Magic bytes at a fixed offset, optionally masked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub offset: usize,
    pub bytes: Vec<u8>,
    pub mask: Option<Vec<u8>>,
}

/// Endianness of a type, fixed or chosen at parse time
#[derive(Debug, Clone, PartialEq)]
pub enum EndianSpec {
    Fixed(Endian),
    Switch {
        on: Expr,
        cases: Vec<(Expr, Endian)>,
    },
}

/// A user-defined type (the document root is one too)
#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub name: String,
    pub seq: Vec<FieldSpec>,
    pub instances: Vec<InstanceSpec>,
    /// Effective endianness after lexical inheritance
    pub endian: Option<EndianSpec>,
    /// Effective default string encoding after lexical inheritance
    pub encoding: Option<String>,
    /// Enclosing type
    pub parent: Option<TypeId>,
    pub nested_types: HashMap<String, TypeId>,
    pub nested_enums: HashMap<String, EnumId>,
}

/// One named entry in a sequence, or the body of a positioned instance
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub id: String,
    pub ty: FieldType,
    pub contents: Option<Vec<u8>>,
    pub size: Option<Expr>,
    pub size_eos: bool,
    pub terminator: Option<u8>,
    pub include: bool,
    pub consume: bool,
    pub encoding: Option<String>,
    pub enum_id: Option<EnumId>,
    pub condition: Option<Expr>,
    pub repeat: Option<Repeat>,
    pub valid: Option<Valid>,
    pub process: Option<ProcessSpec>,
    /// Absolute position within the current stream (instances only)
    pub pos: Option<Expr>,
    pub doc: Option<String>,
}

/// Resolved type of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Uint { width: usize, endian: Option<Endian> },
    Sint { width: usize, endian: Option<Endian> },
    Float { width: usize, endian: Option<Endian> },
    Bits(u32),
    /// Text sized by `size`, `size-eos` or `terminator`
    Str,
    /// Zero-terminated text
    Strz,
    /// Raw bytes (no `type`)
    Bytes,
    User(TypeId),
    Switch(SwitchSpec),
    /// A type name that could not be resolved at compile time
    Unknown(String),
}

/// Switch-on type selection
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchSpec {
    pub on: Expr,
    pub cases: Vec<(Expr, FieldType)>,
    /// The `_` case
    pub default: Option<Box<FieldType>>,
}

/// Byte transform attached to a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessSpec {
    Apply(Process),
    /// Recognised by name but not implemented (`zlib`, custom processors)
    Unsupported(String),
}

/// Repetition mode
#[derive(Debug, Clone, PartialEq)]
pub enum Repeat {
    Expr(Expr),
    Eos,
    Until(Expr),
}

/// A `valid` constraint
#[derive(Debug, Clone, PartialEq)]
pub enum Valid {
    Eq(Expr),
    Range { min: Option<Expr>, max: Option<Expr> },
    AnyOf(Vec<Expr>),
    Expr(Expr),
}

/// A lazily computed field
#[derive(Debug, Clone)]
pub enum InstanceSpec {
    /// `value:` instance
    Value {
        id: String,
        expr: Expr,
        condition: Option<Expr>,
        enum_id: Option<EnumId>,
    },
    /// A field read at `pos` (or the current position)
    Parse(FieldSpec),
}

/// Integer to label mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSpec {
    pub name: String,
    pub values: Vec<(i64, String)>,
}

impl Schema {
    /// Format id
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Root type
    pub fn root_type(&self) -> &TypeSpec {
        &self.types[self.root.0]
    }

    /// Type by id
    pub fn type_spec(&self, id: TypeId) -> &TypeSpec {
        &self.types[id.0]
    }

    /// Enum by id
    pub fn enum_spec(&self, id: EnumId) -> &EnumSpec {
        &self.enums[id.0]
    }

    /// Resolve a type name as seen from inside `scope`
    ///
    /// Looks in the scope's nested types, then each enclosing type. `a::b`
    /// paths descend through nested types.
    pub fn resolve_type(&self, scope: TypeId, name: &str) -> Option<TypeId> {
        let mut segments = name.split("::");
        let first = segments.next()?;
        let mut found = self.lookup_scoped(scope, |t| t.nested_types.get(first).copied())?;
        for segment in segments {
            found = self.types[found.0].nested_types.get(segment).copied()?;
        }
        Some(found)
    }

    /// Resolve an enum name as seen from inside `scope`
    pub fn resolve_enum(&self, scope: TypeId, name: &str) -> Option<EnumId> {
        match name.rsplit_once("::") {
            Some((type_path, enum_name)) => {
                let owner = self.resolve_type(scope, type_path)?;
                self.types[owner.0].nested_enums.get(enum_name).copied()
            }
            None => self.lookup_scoped(scope, |t| t.nested_enums.get(name).copied()),
        }
    }

    fn lookup_scoped<T>(&self, scope: TypeId, find: impl Fn(&TypeSpec) -> Option<T>) -> Option<T> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let spec = &self.types[id.0];
            if let Some(found) = find(spec) {
                return Some(found);
            }
            current = spec.parent;
        }
        None
    }

    /// Total number of fields over all types
    pub fn field_count(&self) -> usize {
        self.types.iter().map(|t| t.seq.len()).sum()
    }
}

impl TypeSpec {
    /// An empty type
    pub fn new(name: impl Into<String>, parent: Option<TypeId>) -> Self {
        Self {
            name: name.into(),
            seq: Vec::new(),
            instances: Vec::new(),
            endian: None,
            encoding: None,
            parent,
            nested_types: HashMap::new(),
            nested_enums: HashMap::new(),
        }
    }

    /// Instance by name
    pub fn instance(&self, id: &str) -> Option<&InstanceSpec> {
        self.instances.iter().find(|i| i.id() == id)
    }
}

impl FieldSpec {
    /// A raw-bytes field with only an id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ty: FieldType::Bytes,
            contents: None,
            size: None,
            size_eos: false,
            terminator: None,
            include: false,
            consume: true,
            encoding: None,
            enum_id: None,
            condition: None,
            repeat: None,
            valid: None,
            process: None,
            pos: None,
            doc: None,
        }
    }
}

impl FieldType {
    /// Parse a primitive type name (`u4`, `s2be`, `f8le`, `b3`, `str`, `strz`)
    pub fn primitive(name: &str) -> Option<FieldType> {
        if !name.is_ascii() {
            return None;
        }
        match name {
            "str" => return Some(FieldType::Str),
            "strz" => return Some(FieldType::Strz),
            _ => {}
        }

        let (kind, rest) = name.split_at(1.min(name.len()));
        if kind == "b" {
            let bits: u32 = rest.parse().ok()?;
            return (1..=64).contains(&bits).then_some(FieldType::Bits(bits));
        }

        let (digits, endian) = match rest.len() {
            1 => (rest, None),
            3 => (&rest[..1], Some(Endian::from_suffix(&rest[1..])?)),
            _ => return None,
        };
        let width: usize = digits.parse().ok()?;
        match (kind, width) {
            ("u" | "s", 1) if endian.is_some() => None,
            ("u", 1 | 2 | 4 | 8) => Some(FieldType::Uint { width, endian }),
            ("s", 1 | 2 | 4 | 8) => Some(FieldType::Sint { width, endian }),
            ("f", 4 | 8) => Some(FieldType::Float { width, endian }),
            _ => None,
        }
    }

    /// Whether reading this type depends on byte order
    pub fn needs_endian(&self) -> bool {
        match self {
            FieldType::Uint { width, endian } | FieldType::Sint { width, endian } => {
                *width > 1 && endian.is_none()
            }
            FieldType::Float { endian, .. } => endian.is_none(),
            FieldType::Switch(switch) => {
                switch.cases.iter().any(|(_, t)| t.needs_endian())
                    || switch.default.as_ref().is_some_and(|t| t.needs_endian())
            }
            _ => false,
        }
    }
}

impl InstanceSpec {
    /// Instance name
    pub fn id(&self) -> &str {
        match self {
            InstanceSpec::Value { id, .. } => id,
            InstanceSpec::Parse(field) => &field.id,
        }
    }
}

impl EnumSpec {
    /// Label for a value
    pub fn label(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, label)| label.as_str())
    }

    /// Value for a label
    pub fn value_of(&self, label: &str) -> Option<i64> {
        self.values.iter().find(|(_, l)| l == label).map(|(v, _)| *v)
    }
}

impl Signature {
    /// Whether `data` carries this signature
    pub fn matches(&self, data: &[u8]) -> bool {
        let Some(window) = data.get(self.offset..self.offset + self.bytes.len()) else {
            return false;
        };
        match &self.mask {
            Some(mask) => window
                .iter()
                .zip(&self.bytes)
                .zip(mask.iter().chain(std::iter::repeat(&0xFF)))
                .all(|((b, s), m)| b & m == s & m),
            None => window == self.bytes.as_slice(),
        }
    }
}
