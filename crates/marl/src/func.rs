use std::{fmt, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{
    ast::Block,
    engine::HostFrame,
    error::EngineError,
    object::ObjectId,
    scope::ScopeId,
    types::{TypeId, Visibility},
    value::ScriptRval,
};

/// Identifier for a callable stored in the engine's function registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(u32);

impl FuncId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("function id overflow"))
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One declared parameter of a script or native function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub type_id: TypeId,
    pub is_const: bool,
}

/// Signature of a native callback.
///
/// Callbacks get a [`HostFrame`] (a re-entry view of the engine good for
/// type lookups, receiver access, and rvalue construction) plus the
/// evaluated argument rvalues in call order. Returning `Err` aborts the
/// current run.
pub type NativeFn = dyn Fn(&mut HostFrame<'_>, Vec<ScriptRval>) -> Result<ScriptRval, EngineError>;

/// Shared handle to a host-provided callback body.
#[derive(Clone)]
pub struct NativeHandler(pub(crate) Rc<NativeFn>);

impl NativeHandler {
    pub fn new(f: impl Fn(&mut HostFrame<'_>, Vec<ScriptRval>) -> Result<ScriptRval, EngineError> + 'static) -> Self {
        Self(Rc::new(f))
    }
}

impl fmt::Debug for NativeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeHandler(..)")
    }
}

/// A script-defined or host-provided callable.
///
/// Script functions carry an AST body (shared via `Rc` so the evaluator can
/// walk it while mutating engine state) and the FUNCTION scope created for
/// them at parse time. Native functions carry a callback instead and no
/// scope of their own.
#[derive(Debug, Clone)]
pub struct ScriptFunc {
    pub(crate) name: String,
    pub(crate) params: Vec<Param>,
    pub(crate) body: Option<Rc<Block>>,
    pub(crate) scope: Option<ScopeId>,
    pub(crate) return_type: TypeId,
    pub(crate) is_method: bool,
    pub(crate) is_const_method: bool,
    pub(crate) visibility: Visibility,
    pub(crate) native: Option<NativeHandler>,
}

impl ScriptFunc {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn return_type(&self) -> TypeId {
        self.return_type
    }

    #[must_use]
    pub fn is_const_method(&self) -> bool {
        self.is_const_method
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// True when the body is a native callback rather than script code.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }
}

/// A method resolved against a receiver.
///
/// Produced at lookup time so resolution never mutates shared function
/// state; the pair travels to the call site as a value.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoundMethod {
    pub func: FuncId,
    pub receiver: ObjectId,
}

/// Owner of every callable in an engine; the vector index is the id.
#[derive(Debug, Default)]
pub(crate) struct FuncRegistry {
    funcs: Vec<ScriptFunc>,
}

impl FuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, func: ScriptFunc) -> FuncId {
        let id = FuncId::new(self.funcs.len());
        self.funcs.push(func);
        id
    }

    pub fn get(&self, id: FuncId) -> &ScriptFunc {
        &self.funcs[id.index()]
    }
}
