use crate::{
    ast::NamePath,
    error::{EngineError, ExecResult},
    func::{BoundMethod, FuncId, FuncRegistry},
    object::{ObjectArena, ObjectId},
    scope::{ScopeId, ScopeKind, ScopeTree},
    types::{TypeId, TypeRegistry},
};

/// What a name resolved to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Resolved {
    Object(ObjectId),
    Func(FuncId),
    /// A method looked up through an object; the receiver travels with it.
    Method(BoundMethod),
    Type(TypeId),
}

/// Read-only view over the arenas that answers name lookups.
///
/// Resolution never mutates anything: method hits come back as
/// [`BoundMethod`] values instead of being written into shared function
/// state.
pub(crate) struct Resolver<'a> {
    pub scopes: &'a ScopeTree,
    pub types: &'a TypeRegistry,
    pub funcs: &'a FuncRegistry,
    pub objects: &'a ObjectArena,
}

impl Resolver<'_> {
    /// Resolves a possibly-dotted path starting from `scope`.
    ///
    /// The leftmost segment resolves lexically: objects, then functions,
    /// then (inside method scopes) the receiver's fields and methods,
    /// then types. Every following segment resolves against the previous
    /// result: object fields first, then the object's type's methods;
    /// nested fields for types.
    pub fn resolve(
        &self,
        scope: ScopeId,
        path: &NamePath,
        receiver: Option<ObjectId>,
    ) -> ExecResult<Resolved> {
        let mut current = self.resolve_simple(scope, &path.segments[0], receiver).ok_or_else(|| {
            EngineError::name(format!("unresolved name '{}'", path.segments[0])).at(path.loc)
        })?;

        for segment in &path.segments[1..] {
            current = match current {
                Resolved::Object(obj) => self.resolve_member(obj, segment).ok_or_else(|| {
                    EngineError::name(format!(
                        "'{}' has no field or method '{segment}'",
                        self.objects.get(obj).name
                    ))
                    .at(path.loc)
                })?,
                Resolved::Type(ty) => {
                    let field = self.types.get(ty).field(segment).ok_or_else(|| {
                        EngineError::name(format!(
                            "type '{}' has no member '{segment}'",
                            self.types.get(ty).name()
                        ))
                        .at(path.loc)
                    })?;
                    Resolved::Type(field)
                }
                Resolved::Func(_) | Resolved::Method(_) => {
                    return Err(EngineError::name(format!(
                        "cannot access '{segment}' through a function"
                    ))
                    .at(path.loc));
                }
            };
        }
        Ok(current)
    }

    /// Lexical lookup of a bare name.
    fn resolve_simple(&self, scope: ScopeId, name: &str, receiver: Option<ObjectId>) -> Option<Resolved> {
        if let Some(obj) = self.scopes.find_object(scope, name) {
            return Some(Resolved::Object(obj));
        }
        if let Some(func) = self.scopes.find_func(scope, name, self.funcs) {
            return Some(Resolved::Func(func));
        }
        // Inside a method body, unqualified misses retry against the
        // implicit receiver.
        if self.scopes.get(scope).kind.contains(ScopeKind::CLASS)
            && let Some(recv) = receiver
            && let Some(hit) = self.resolve_member(recv, name)
        {
            return Some(hit);
        }
        self.scopes
            .find_type(scope, name, self.types)
            .map(Resolved::Type)
    }

    /// Resolves one segment against an object: its fields first, then its
    /// type's methods (binding the object as the receiver).
    fn resolve_member(&self, obj: ObjectId, name: &str) -> Option<Resolved> {
        let data = self.objects.get(obj);
        if let Some(field) = data.field(name) {
            return Some(Resolved::Object(field));
        }
        self.types
            .get(data.type_id)
            .method(name)
            .map(|func| Resolved::Method(BoundMethod { func, receiver: obj }))
    }
}
