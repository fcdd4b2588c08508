use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{
    func::{FuncId, FuncRegistry},
    object::ObjectId,
    types::{TypeId, TypeRegistry},
};

/// Identifier of a node in the scope tree. The global scope is always
/// [`ScopeTree::GLOBAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(u32);

impl ScopeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("scope id overflow"))
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bit set describing what a scope is part of.
///
/// Child scopes inherit their parent's bits, so a block nested inside a
/// loop inside a function carries FUNCTION | LOOP and `return`/`break`
/// legality can be answered from the current scope alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ScopeKind(u8);

impl ScopeKind {
    pub const NONE: Self = Self(0);
    pub const FUNCTION: Self = Self(1 << 0);
    pub const LOOP: Self = Self(1 << 1);
    pub const CLASS: Self = Self(1 << 2);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// One lexical region: its kind bits, tree links, and the types, objects,
/// and functions declared in it.
#[derive(Debug, Default)]
pub(crate) struct ScopeData {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub types: Vec<TypeId>,
    /// Declaration-ordered objects. Runtime declarations are appended past
    /// a watermark recorded at scope entry and removed again at exit, so
    /// parse-time registrations (parameters) survive across runs.
    pub objects: Vec<(String, ObjectId)>,
    /// How many leading entries of `objects` were interned at parse time
    /// (parameters). Everything past this is runtime state.
    pub persistent: usize,
    pub funcs: Vec<FuncId>,
    /// The function this scope is the body of; set only on FUNCTION scopes
    /// created by a function declaration.
    pub parent_func: Option<FuncId>,
    /// Landing slot for the value of a `return` executed in this function
    /// scope.
    pub return_obj: Option<ObjectId>,
}

/// Arena of scopes. All cross-links are ids; nothing borrows.
#[derive(Debug)]
pub(crate) struct ScopeTree {
    scopes: Vec<ScopeData>,
}

impl ScopeTree {
    pub const GLOBAL: ScopeId = ScopeId(0);

    pub fn new() -> Self {
        Self {
            scopes: vec![ScopeData::default()],
        }
    }

    pub fn get(&self, id: ScopeId) -> &ScopeData {
        &self.scopes[id.index()]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut ScopeData {
        &mut self.scopes[id.index()]
    }

    /// Creates a child of `parent`, inheriting its kind bits plus `extra`.
    pub fn add_child(&mut self, parent: ScopeId, extra: ScopeKind) -> ScopeId {
        let kind = self.get(parent).kind.union(extra);
        let id = ScopeId::new(self.scopes.len());
        self.scopes.push(ScopeData {
            kind,
            parent: Some(parent),
            ..ScopeData::default()
        });
        self.get_mut(parent).children.push(id);
        id
    }

    pub fn register_type(&mut self, scope: ScopeId, ty: TypeId) {
        self.get_mut(scope).types.push(ty);
    }

    pub fn register_object(&mut self, scope: ScopeId, name: impl Into<String>, obj: ObjectId) {
        self.get_mut(scope).objects.push((name.into(), obj));
    }

    /// Parse-time registration: the object (a parameter) survives scope
    /// exits and re-runs.
    pub fn intern_object(&mut self, scope: ScopeId, name: impl Into<String>, obj: ObjectId) {
        let data = self.get_mut(scope);
        data.objects.push((name.into(), obj));
        data.persistent = data.objects.len();
    }

    pub fn register_func(&mut self, scope: ScopeId, func: FuncId) {
        self.get_mut(scope).funcs.push(func);
    }

    /// Iterates from `scope` to the root, inclusive.
    pub fn chain(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        let mut cursor = Some(scope);
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.get(id).parent;
            Some(id)
        })
    }

    /// Looks up an object declared directly in `scope`.
    pub fn object_in(&self, scope: ScopeId, name: &str) -> Option<ObjectId> {
        self.get(scope)
            .objects
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|&(_, id)| id)
    }

    fn func_in(&self, scope: ScopeId, name: &str, funcs: &FuncRegistry) -> Option<FuncId> {
        self.get(scope)
            .funcs
            .iter()
            .copied()
            .find(|&id| funcs.get(id).name() == name)
    }

    fn type_in(&self, scope: ScopeId, name: &str, types: &TypeRegistry) -> Option<TypeId> {
        self.get(scope)
            .types
            .iter()
            .copied()
            .find(|&id| types.get(id).name() == name)
    }

    /// Walks the chain looking for an object with this name.
    pub fn find_object(&self, scope: ScopeId, name: &str) -> Option<ObjectId> {
        self.chain(scope).find_map(|s| self.object_in(s, name))
    }

    /// Walks the chain looking for a free function with this name.
    pub fn find_func(&self, scope: ScopeId, name: &str, funcs: &FuncRegistry) -> Option<FuncId> {
        self.chain(scope).find_map(|s| self.func_in(s, name, funcs))
    }

    /// Walks the chain looking for a type with this name.
    pub fn find_type(&self, scope: ScopeId, name: &str, types: &TypeRegistry) -> Option<TypeId> {
        self.chain(scope).find_map(|s| self.type_in(s, name, types))
    }

    /// Finds the function whose body encloses `scope`, if any.
    pub fn enclosing_function(&self, scope: ScopeId) -> Option<(ScopeId, FuncId)> {
        self.chain(scope)
            .find_map(|s| self.get(s).parent_func.map(|f| (s, f)))
    }

    /// Collects `scope` and all scopes nested under it, breadth first.
    pub fn subtree(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut out = vec![scope];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.get(out[i]).children.iter().copied());
            i += 1;
        }
        out
    }

    /// Renders the tree for embedder debugging: one line per scope with its
    /// kind bits and declared names.
    pub fn debug_dump(&self, types: &TypeRegistry, funcs: &FuncRegistry) -> String {
        let mut out = String::new();
        self.dump_scope(Self::GLOBAL, 0, types, funcs, &mut out);
        out
    }

    fn dump_scope(&self, id: ScopeId, depth: usize, types: &TypeRegistry, funcs: &FuncRegistry, out: &mut String) {
        let data = self.get(id);
        let indent = "  ".repeat(depth);
        let mut bits = String::new();
        for (bit, label) in [
            (ScopeKind::FUNCTION, "fn"),
            (ScopeKind::LOOP, "loop"),
            (ScopeKind::CLASS, "class"),
        ] {
            if data.kind.contains(bit) {
                if !bits.is_empty() {
                    bits.push('|');
                }
                bits.push_str(label);
            }
        }
        if bits.is_empty() {
            bits.push('-');
        }
        let _ = writeln!(out, "{indent}scope #{} [{bits}]", id.index());
        for ty in &data.types {
            let _ = writeln!(out, "{indent}  type {}", types.get(*ty).name());
        }
        for (name, _) in &data.objects {
            let _ = writeln!(out, "{indent}  object {name}");
        }
        for func in &data.funcs {
            let _ = writeln!(out, "{indent}  func {}", funcs.get(*func).name());
        }
        for child in &data.children {
            self.dump_scope(*child, depth + 1, types, funcs, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectId;

    #[test]
    fn lookup_prefers_the_innermost_shadow() {
        let mut tree = ScopeTree::new();
        let inner = tree.add_child(ScopeTree::GLOBAL, ScopeKind::FUNCTION);
        let outer_obj = ObjectId::new(0);
        let inner_obj = ObjectId::new(1);
        tree.register_object(ScopeTree::GLOBAL, "x", outer_obj);
        tree.register_object(inner, "x", inner_obj);

        assert_eq!(tree.find_object(inner, "x"), Some(inner_obj));
        assert_eq!(tree.find_object(ScopeTree::GLOBAL, "x"), Some(outer_obj));
    }

    #[test]
    fn children_inherit_kind_bits() {
        let mut tree = ScopeTree::new();
        let func = tree.add_child(ScopeTree::GLOBAL, ScopeKind::FUNCTION);
        let body = tree.add_child(func, ScopeKind::LOOP);
        let nested = tree.add_child(body, ScopeKind::NONE);
        assert!(tree.get(nested).kind.contains(ScopeKind::FUNCTION));
        assert!(tree.get(nested).kind.contains(ScopeKind::LOOP));
        assert!(!tree.get(nested).kind.contains(ScopeKind::CLASS));
    }

    #[test]
    fn subtree_collects_all_descendants() {
        let mut tree = ScopeTree::new();
        let a = tree.add_child(ScopeTree::GLOBAL, ScopeKind::FUNCTION);
        let b = tree.add_child(a, ScopeKind::NONE);
        let c = tree.add_child(a, ScopeKind::LOOP);
        let d = tree.add_child(c, ScopeKind::NONE);
        let got = tree.subtree(a);
        assert_eq!(got, vec![a, b, c, d]);
    }
}
