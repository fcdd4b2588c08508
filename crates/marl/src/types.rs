use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    error::{EngineError, ExecResult},
    func::FuncId,
};

/// Stable identifier for a type, unique per engine.
///
/// Ids are allocated by a monotonically increasing counter; a type cloned
/// as a class field receives a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(u32);

impl TypeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("type id overflow"))
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Member visibility inside class bodies. Defaults to private, like the
/// guest language's `class` keyword implies.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
pub enum Visibility {
    Public,
    Protected,
    #[default]
    Private,
}

/// Metadata record for a primitive or user-defined type.
///
/// For classes, `fields` preserves declaration order: field insertion
/// order defines the memory layout, and the class size is the sum of its
/// field sizes in that order (no padding). Each field entry points at a
/// fresh `TypeInfo` clone carrying the field's byte `offset` and a back
/// link to the enclosing class.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub(crate) id: TypeId,
    pub(crate) name: String,
    pub(crate) size: usize,
    pub(crate) unsigned: bool,
    pub(crate) is_class: bool,
    /// Byte offset inside the enclosing class when this record describes a
    /// field; zero otherwise.
    pub(crate) offset: usize,
    pub(crate) parent_class: Option<TypeId>,
    pub(crate) fields: IndexMap<String, TypeId>,
    pub(crate) methods: AHashMap<String, FuncId>,
    pub(crate) visibility: Visibility,
}

impl TypeInfo {
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_unsigned(&self) -> bool {
        self.unsigned
    }

    #[must_use]
    pub fn is_class(&self) -> bool {
        self.is_class
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn parent_class(&self) -> Option<TypeId> {
        self.parent_class
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Ordered `(name, field type id)` view of the class fields.
    pub fn fields(&self) -> impl Iterator<Item = (&str, TypeId)> {
        self.fields.iter().map(|(name, id)| (name.as_str(), *id))
    }

    #[must_use]
    pub(crate) fn is_void(&self) -> bool {
        !self.is_class && self.size == 0
    }

    #[must_use]
    pub(crate) fn is_float(&self) -> bool {
        matches!(self.name.as_str(), "float" | "double")
    }

    #[must_use]
    pub(crate) fn field(&self, name: &str) -> Option<TypeId> {
        self.fields.get(name).copied()
    }

    #[must_use]
    pub(crate) fn method(&self, name: &str) -> Option<FuncId> {
        self.methods.get(name).copied()
    }
}

/// Ids of the built-in scalar types, in the order
/// [`TypeRegistry::seed_primitives`] allocates them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Primitives {
    pub void_: TypeId,
    pub bool_: TypeId,
    pub char_: TypeId,
    pub short_: TypeId,
    pub int_: TypeId,
    pub long_: TypeId,
    pub uchar: TypeId,
    pub ushort: TypeId,
    pub uint: TypeId,
    pub ulong: TypeId,
    pub float_: TypeId,
    pub double_: TypeId,
}

impl Primitives {
    pub fn from_seed(ids: &[TypeId]) -> Self {
        Self {
            void_: ids[0],
            bool_: ids[1],
            char_: ids[2],
            short_: ids[3],
            int_: ids[4],
            long_: ids[5],
            uchar: ids[6],
            ushort: ids[7],
            uint: ids[8],
            ulong: ids[9],
            float_: ids[10],
            double_: ids[11],
        }
    }
}

/// Owner of every `TypeInfo` in an engine; the vector index is the type id.
#[derive(Debug, Default)]
pub(crate) struct TypeRegistry {
    infos: Vec<TypeInfo>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new type with the next id.
    pub fn alloc(
        &mut self,
        name: impl Into<String>,
        size: usize,
        unsigned: bool,
        is_class: bool,
    ) -> TypeId {
        let id = TypeId::new(self.infos.len());
        self.infos.push(TypeInfo {
            id,
            name: name.into(),
            size,
            unsigned,
            is_class,
            offset: 0,
            parent_class: None,
            fields: IndexMap::new(),
            methods: AHashMap::new(),
            visibility: Visibility::default(),
        });
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeInfo {
        &self.infos[id.index()]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeInfo {
        &mut self.infos[id.index()]
    }

    pub fn try_get(&self, id: TypeId) -> Option<&TypeInfo> {
        self.infos.get(id.index())
    }

    /// Clones `src` as a class member: fresh id, the given byte offset,
    /// parent set to the enclosing class. Nested fields and methods carry
    /// over so members of class type stay fully usable.
    pub fn clone_as_member(
        &mut self,
        src: TypeId,
        offset: usize,
        parent: TypeId,
        visibility: Visibility,
    ) -> TypeId {
        let template = self.get(src).clone();
        let id = TypeId::new(self.infos.len());
        self.infos.push(TypeInfo {
            id,
            name: template.name,
            size: template.size,
            unsigned: template.unsigned,
            is_class: template.is_class,
            offset,
            parent_class: Some(parent),
            fields: template.fields,
            methods: template.methods,
            visibility,
        });
        id
    }

    /// Registers the built-in scalar types and returns their ids for scope
    /// registration, in declaration order.
    pub fn seed_primitives(&mut self) -> Vec<TypeId> {
        const PRIMITIVES: &[(&str, usize, bool)] = &[
            ("void", 0, false),
            ("bool", 1, true),
            ("char", 1, false),
            ("short", 2, false),
            ("int", 4, false),
            ("long", 8, false),
            ("unsigned char", 1, true),
            ("unsigned short", 2, true),
            ("unsigned int", 4, true),
            ("unsigned long", 8, true),
            ("float", 4, false),
            ("double", 8, false),
        ];
        PRIMITIVES
            .iter()
            .map(|&(name, size, unsigned)| self.alloc(name, size, unsigned, false))
            .collect()
    }

    /// Two scalar values convert between each other; two class values only
    /// convert when they are the same class: same id, or an equally-sized
    /// clone whose field names and types match pairwise (class members are
    /// cloned with fresh ids, so id equality alone is too strict).
    pub fn classes_compatible(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        let (lhs, rhs) = (self.get(a), self.get(b));
        if !lhs.is_class || !rhs.is_class || lhs.size != rhs.size || lhs.fields.len() != rhs.fields.len() {
            return false;
        }
        lhs.fields.iter().zip(rhs.fields.iter()).all(|((ln, lf), (rn, rf))| {
            if ln != rn {
                return false;
            }
            let (lf, rf) = (self.get(*lf), self.get(*rf));
            if lf.is_class != rf.is_class {
                return false;
            }
            if lf.is_class {
                self.classes_compatible(lf.id, rf.id)
            } else {
                lf.size == rf.size && lf.unsigned == rf.unsigned && lf.is_float() == rf.is_float()
            }
        })
    }

    /// Looks up a type by id, as registered host types may be queried back
    /// through the engine.
    pub fn by_id(&self, id: TypeId) -> ExecResult<&TypeInfo> {
        self.try_get(id)
            .ok_or_else(|| EngineError::type_error(format!("unknown type id {}", id.index())))
    }
}
