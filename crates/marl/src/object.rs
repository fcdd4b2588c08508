use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    error::{EngineError, ExecResult},
    types::{TypeId, TypeRegistry},
};

/// Identifier of a storage cell in the object arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(u32);

impl ObjectId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("object id overflow"))
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Modifier bits applied to an object at declaration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const CONST: Self = Self(1 << 0);
    pub const REFERENCE: Self = Self(1 << 1);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Where an object's bytes live.
#[derive(Debug, Clone)]
pub(crate) enum Storage {
    /// The object owns its buffer.
    Owned(Vec<u8>),
    /// A class field: a window into the parent instance's buffer starting
    /// at the field's byte offset.
    View { parent: ObjectId, offset: usize },
    /// A REFERENCE that aliases another object and holds one count on it.
    Alias(ObjectId),
    /// A REFERENCE that has not been bound yet. Reads and writes fail.
    Unbound,
}

/// A typed storage cell: the declared identifier, modifiers, refcount, the
/// storage itself, and, for class instances, the ordered field
/// sub-objects, each a view into this object's buffer.
#[derive(Debug, Clone)]
pub(crate) struct ObjectData {
    pub name: String,
    pub type_id: TypeId,
    pub modifiers: Modifiers,
    pub refcount: usize,
    pub storage: Storage,
    pub fields: IndexMap<String, ObjectId>,
    /// Back link from a field sub-object to its instance, used for
    /// receiver-write checks inside const methods.
    pub parent_obj: Option<ObjectId>,
}

impl ObjectData {
    #[must_use]
    pub fn is_const(&self) -> bool {
        self.modifiers.contains(Modifiers::CONST)
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.modifiers.contains(Modifiers::REFERENCE)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<ObjectId> {
        self.fields.get(name).copied()
    }
}

/// Snapshot of arena occupancy at a point in time.
///
/// Useful for checking that a run released everything it allocated: take
/// one before and one after and compare the live count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaStats {
    /// Number of live storage cells.
    pub live_objects: usize,
    /// Number of recycled slots available for reuse.
    pub free_slots: usize,
    /// Total arena capacity (live + free).
    pub total_slots: usize,
}

/// Slab of objects with free-slot reuse.
///
/// Every object holds one count on itself; reference copies add counts on
/// the referent. A slot is recycled when its count reaches zero, so the
/// buffer of an owner with live references outlives the owner's scope.
#[derive(Debug, Default)]
pub(crate) struct ObjectArena {
    slots: Vec<Option<ObjectData>>,
    free: Vec<u32>,
}

/// Bound on View/Alias chain length while locating a buffer, so reference
/// cycles (a program error the engine does not detect) fail instead of
/// spinning.
const MAX_INDIRECTION: usize = 64;

impl ObjectArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_slot(&mut self, data: ObjectData) -> ObjectId {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(data);
            ObjectId(index)
        } else {
            let id = ObjectId::new(self.slots.len());
            self.slots.push(Some(data));
            id
        }
    }

    /// Constructs an object of `type_id`.
    ///
    /// REFERENCE objects get no buffer and stay unbound until aliased.
    /// Everything else gets a zeroed buffer of the type's size; class
    /// instances additionally get one sub-object per field, aliasing the
    /// instance buffer at the field's offset.
    pub fn create(
        &mut self,
        types: &TypeRegistry,
        type_id: TypeId,
        name: impl Into<String>,
        modifiers: Modifiers,
    ) -> ObjectId {
        let info = types.get(type_id);
        let storage = if modifiers.contains(Modifiers::REFERENCE) {
            Storage::Unbound
        } else {
            Storage::Owned(vec![0u8; info.size()])
        };
        let id = self.alloc_slot(ObjectData {
            name: name.into(),
            type_id,
            modifiers,
            refcount: 1,
            storage,
            fields: IndexMap::new(),
            parent_obj: None,
        });
        if info.is_class() && !modifiers.contains(Modifiers::REFERENCE) {
            let field_types: Vec<(String, TypeId)> = types
                .get(type_id)
                .fields()
                .map(|(n, t)| (n.to_owned(), t))
                .collect();
            let mut fields = IndexMap::with_capacity(field_types.len());
            for (field_name, field_ty) in field_types {
                let offset = types.get(field_ty).offset();
                let sub = self.create_view(types, field_ty, &field_name, id, offset);
                fields.insert(field_name, sub);
            }
            self.get_mut(id).fields = fields;
        }
        id
    }

    /// Constructs a field sub-object viewing `parent` at `offset`.
    fn create_view(
        &mut self,
        types: &TypeRegistry,
        type_id: TypeId,
        name: &str,
        parent: ObjectId,
        offset: usize,
    ) -> ObjectId {
        let id = self.alloc_slot(ObjectData {
            name: name.to_owned(),
            type_id,
            modifiers: Modifiers::NONE,
            refcount: 1,
            storage: Storage::View { parent, offset },
            fields: IndexMap::new(),
            parent_obj: Some(parent),
        });
        if types.get(type_id).is_class() {
            let field_types: Vec<(String, TypeId)> = types
                .get(type_id)
                .fields()
                .map(|(n, t)| (n.to_owned(), t))
                .collect();
            let mut fields = IndexMap::with_capacity(field_types.len());
            for (field_name, field_ty) in field_types {
                let sub_offset = types.get(field_ty).offset();
                let sub = self.create_view(types, field_ty, &field_name, id, sub_offset);
                fields.insert(field_name, sub);
            }
            self.get_mut(id).fields = fields;
        }
        id
    }

    pub fn get(&self, id: ObjectId) -> &ObjectData {
        self.slots[id.index()].as_ref().expect("object slot freed")
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut ObjectData {
        self.slots[id.index()].as_mut().expect("object slot freed")
    }

    pub fn try_get(&self, id: ObjectId) -> Option<&ObjectData> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    #[cfg(test)]
    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.try_get(id).is_some()
    }

    pub fn inc_ref(&mut self, id: ObjectId) {
        self.get_mut(id).refcount += 1;
    }

    /// Drops one count; at zero the slot is recycled, sub-objects first,
    /// and an alias releases its count on the referent.
    pub fn dec_ref(&mut self, id: ObjectId) {
        let Some(slot) = self.slots.get_mut(id.index()).and_then(Option::as_mut) else {
            return;
        };
        slot.refcount -= 1;
        if slot.refcount > 0 {
            return;
        }
        let data = self.slots[id.index()].take().expect("slot checked above");
        self.free.push(id.index() as u32);
        for (_, field) in data.fields {
            self.dec_ref(field);
        }
        if let Storage::Alias(target) = data.storage {
            self.dec_ref(target);
        }
    }

    /// Scope-exit destruction of a declared object.
    pub fn destroy(&mut self, id: ObjectId) {
        self.dec_ref(id);
    }

    /// Binds a REFERENCE object to `target`, taking one count on it.
    pub fn bind_alias(&mut self, reference: ObjectId, target: ObjectId) -> ExecResult<()> {
        if !self.get(reference).is_reference() {
            return Err(EngineError::type_error("cannot rebind a non-reference object"));
        }
        if let Storage::Alias(old) = self.get(reference).storage {
            self.dec_ref(old);
        }
        self.get_mut(reference).storage = Storage::Alias(target);
        self.inc_ref(target);
        Ok(())
    }

    /// Resolves View/Alias indirection down to the owning buffer, returning
    /// the owner and the accumulated byte offset.
    fn locate(&self, id: ObjectId) -> ExecResult<(ObjectId, usize)> {
        let mut cursor = id;
        let mut offset = 0usize;
        for _ in 0..MAX_INDIRECTION {
            let data = self
                .try_get(cursor)
                .ok_or_else(|| EngineError::runtime("object refers to freed storage"))?;
            match data.storage {
                Storage::Owned(_) => return Ok((cursor, offset)),
                Storage::View { parent, offset: o } => {
                    offset += o;
                    cursor = parent;
                }
                Storage::Alias(target) => cursor = target,
                Storage::Unbound => {
                    return Err(EngineError::runtime(format!(
                        "reference '{}' used before it was bound",
                        data.name
                    )));
                }
            }
        }
        Err(EngineError::runtime("reference chain too deep"))
    }

    /// Copies `len` bytes out of the object's storage.
    pub fn read(&self, id: ObjectId, len: usize) -> ExecResult<SmallVec<[u8; 8]>> {
        let (owner, offset) = self.locate(id)?;
        let Storage::Owned(buf) = &self.get(owner).storage else {
            unreachable!("locate resolves to owned storage");
        };
        buf.get(offset..offset + len)
            .map(SmallVec::from_slice)
            .ok_or_else(|| EngineError::runtime("object read out of bounds"))
    }

    /// Writes `bytes` into the object's storage.
    pub fn write(&mut self, id: ObjectId, bytes: &[u8]) -> ExecResult<()> {
        let (owner, offset) = self.locate(id)?;
        let Storage::Owned(buf) = &mut self.get_mut(owner).storage else {
            unreachable!("locate resolves to owned storage");
        };
        let dest = buf
            .get_mut(offset..offset + bytes.len())
            .ok_or_else(|| EngineError::runtime("object write out of bounds"))?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    pub fn stats(&self) -> ArenaStats {
        let free_slots = self.free.len();
        let total_slots = self.slots.len();
        ArenaStats {
            live_objects: total_slots - free_slots,
            free_slots,
            total_slots,
        }
    }

    /// Snapshot of an object's state, used to save a function scope across
    /// a re-entrant call.
    pub fn clone_data(&self, id: ObjectId) -> Option<ObjectData> {
        self.try_get(id).cloned()
    }

    /// Restores a snapshot taken with [`ObjectArena::clone_data`].
    pub fn restore_data(&mut self, id: ObjectId, data: ObjectData) {
        self.slots[id.index()] = Some(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (TypeRegistry, TypeId) {
        let mut reg = TypeRegistry::new();
        let prims = reg.seed_primitives();
        (reg, prims[4]) // int
    }

    #[test]
    fn scalar_read_write_round_trip() {
        let (reg, int) = registry();
        let mut arena = ObjectArena::new();
        let obj = arena.create(&reg, int, "x", Modifiers::NONE);
        arena.write(obj, &42i32.to_le_bytes()).unwrap();
        assert_eq!(arena.read(obj, 4).unwrap().as_slice(), &42i32.to_le_bytes());
    }

    #[test]
    fn buffer_freed_only_after_owner_and_all_references_drop() {
        let (reg, int) = registry();
        let mut arena = ObjectArena::new();
        let owner = arena.create(&reg, int, "x", Modifiers::NONE);
        let r1 = arena.create(&reg, int, "r1", Modifiers::REFERENCE);
        let r2 = arena.create(&reg, int, "r2", Modifiers::REFERENCE);
        arena.bind_alias(r1, owner).unwrap();
        arena.bind_alias(r2, owner).unwrap();

        arena.destroy(r1);
        assert!(arena.is_alive(owner));
        arena.destroy(owner);
        // One reference still holds the buffer.
        assert!(arena.is_alive(owner));
        assert_eq!(arena.read(r2, 4).unwrap().len(), 4);
        arena.destroy(r2);
        assert!(!arena.is_alive(owner));
    }

    #[test]
    fn class_fields_alias_the_parent_buffer() {
        let (mut reg, int) = registry();
        let class = reg.alloc("P", 0, false, true);
        let f0 = reg.clone_as_member(int, 0, class, crate::types::Visibility::Public);
        let f1 = reg.clone_as_member(int, 4, class, crate::types::Visibility::Public);
        {
            let info = reg.get_mut(class);
            info.fields.insert("a".to_owned(), f0);
            info.fields.insert("b".to_owned(), f1);
            info.size = 8;
        }

        let mut arena = ObjectArena::new();
        let obj = arena.create(&reg, class, "p", Modifiers::NONE);
        let a = arena.get(obj).field("a").unwrap();
        let b = arena.get(obj).field("b").unwrap();
        arena.write(a, &7i32.to_le_bytes()).unwrap();
        arena.write(b, &9i32.to_le_bytes()).unwrap();
        // The instance buffer holds both fields back to back.
        let raw = arena.read(obj, 8).unwrap();
        assert_eq!(&raw[..4], &7i32.to_le_bytes());
        assert_eq!(&raw[4..], &9i32.to_le_bytes());
    }

    #[test]
    fn unbound_reference_read_fails() {
        let (reg, int) = registry();
        let mut arena = ObjectArena::new();
        let r = arena.create(&reg, int, "r", Modifiers::REFERENCE);
        assert!(arena.read(r, 4).is_err());
    }
}
