use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    ast::Block,
    error::{Diagnostic, EngineError},
    eval::Evaluator,
    func::{FuncRegistry, NativeHandler, Param, ScriptFunc},
    io::{DiagnosticSink, StderrSink},
    lex::{Token, TokenKind, Tokenizer},
    limits::EngineLimits,
    object::{ArenaStats, ObjectArena, ObjectId},
    parse::Parser,
    scope::ScopeTree,
    types::{Primitives, TypeId, TypeInfo, TypeRegistry, Visibility},
    value::{
        assign_rval, format_scalar, read_object, read_scalar, rval_from_literal, scalar_to_bytes, scalar_truthy,
        Scalar, ScriptRval,
    },
};

/// One compilation unit: its restartable tokenizer, token vector,
/// module-level statement block, and error flag.
#[derive(Debug)]
pub(crate) struct Module {
    tokenizer: Tokenizer,
    toks: Vec<Token>,
    /// Index of the first unparsed token, so later sections build on.
    parsed: usize,
    block: Block,
    error: bool,
}

impl Module {
    fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new(),
            toks: Vec::new(),
            parsed: 0,
            block: Block {
                scope: ScopeTree::GLOBAL,
                stmts: Vec::new(),
            },
            error: false,
        }
    }
}

/// Options for [`Engine::register_type`].
///
/// A `parent` makes the new type a member of an already-registered class,
/// placed at `offset`; the parent's size grows to cover it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterTypeOptions {
    pub parent: Option<TypeId>,
    pub offset: usize,
    pub is_class: bool,
}

/// Top-level embedding handle.
///
/// An engine owns its modules, the scope tree, the type/function/object
/// arenas, and the type-id allocator. The expected host protocol is:
/// register native types, functions, and methods; create a module; feed it
/// source with [`Engine::add_section`]; [`Engine::build`]; [`Engine::run`].
///
/// # Example
/// ```
/// use marl::Engine;
///
/// let mut engine = Engine::new();
/// engine.new_module("demo").unwrap();
/// engine.add_section("demo", "int main() { return 0; }").unwrap();
/// engine.build("demo").unwrap();
/// engine.run("demo").unwrap();
/// ```
pub struct Engine {
    scopes: ScopeTree,
    types: TypeRegistry,
    funcs: FuncRegistry,
    objects: ObjectArena,
    prims: Primitives,
    modules: AHashMap<String, Module>,
    limits: EngineLimits,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(EngineLimits::default())
    }

    #[must_use]
    pub fn with_limits(limits: EngineLimits) -> Self {
        let mut scopes = ScopeTree::new();
        let mut types = TypeRegistry::new();
        let seeded = types.seed_primitives();
        for ty in &seeded {
            scopes.register_type(ScopeTree::GLOBAL, *ty);
        }
        Self {
            scopes,
            types,
            funcs: FuncRegistry::new(),
            objects: ObjectArena::new(),
            prims: Primitives::from_seed(&seeded),
            modules: AHashMap::new(),
            limits,
        }
    }

    // === Modules ===

    pub fn new_module(&mut self, name: &str) -> Result<(), Diagnostic> {
        if self.modules.contains_key(name) {
            return Err(EngineError::runtime(format!("module '{name}' already exists")).into());
        }
        self.modules.insert(name.to_owned(), Module::new());
        Ok(())
    }

    #[must_use]
    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Drops a module: its tokens and AST go away. Types and functions the
    /// module declared stay registered, like every other registration.
    pub fn destroy_module(&mut self, name: &str) -> Result<(), Diagnostic> {
        if self.modules.remove(name).is_none() {
            return Err(EngineError::runtime(format!("module '{name}' doesn't exist")).into());
        }
        Ok(())
    }

    /// Appends source text to a module. Sections concatenate: the lexer
    /// resumes at the first byte it has not read yet.
    pub fn add_section(&mut self, module: &str, code: &str) -> Result<(), Diagnostic> {
        let module = self.module_mut(module)?;
        module.tokenizer.add_source(code);
        Ok(())
    }

    /// Clears a module's error flag so it can build again (registrations
    /// and previously parsed statements stay).
    pub fn clear_error(&mut self, module: &str) -> Result<(), Diagnostic> {
        self.module_mut(module)?.error = false;
        Ok(())
    }

    fn module_mut(&mut self, name: &str) -> Result<&mut Module, Diagnostic> {
        self.modules
            .get_mut(name)
            .ok_or_else(|| EngineError::runtime(format!("module '{name}' doesn't exist")).into())
    }

    // === Build / run ===

    /// Tokenizes and parses everything added since the last build,
    /// reporting problems to standard error.
    pub fn build(&mut self, module: &str) -> Result<(), Diagnostic> {
        self.build_with(module, &mut StderrSink)
    }

    /// Like [`Engine::build`] with a caller-supplied diagnostic sink.
    ///
    /// A failed build sets the module's error flag and leaves its AST at
    /// the last successfully parsed statement.
    pub fn build_with(&mut self, module: &str, sink: &mut impl DiagnosticSink) -> Result<(), Diagnostic> {
        let Some(module) = self.modules.get_mut(module) else {
            return report(sink, EngineError::runtime(format!("module '{module}' doesn't exist")));
        };
        if module.error {
            return report(
                sink,
                EngineError::runtime("module has errors; clear them before building again"),
            );
        }

        loop {
            match module.tokenizer.next_token() {
                Ok(tok) if tok.kind == TokenKind::End => break,
                Ok(tok) => module.toks.push(tok),
                Err(err) => {
                    module.error = true;
                    return report(sink, err);
                }
            }
        }

        let mut parser = Parser::new(
            &module.toks,
            module.parsed,
            &mut self.scopes,
            &mut self.types,
            &mut self.funcs,
            &mut self.objects,
            self.prims,
            ScopeTree::GLOBAL,
            self.limits.max_parse_depth,
        );
        while !parser.at_end() {
            match parser.parse_statement() {
                Ok(stmt) => {
                    module.block.stmts.push(stmt);
                    module.parsed = parser.position();
                }
                Err(err) => {
                    module.error = true;
                    return report(sink, err);
                }
            }
        }
        Ok(())
    }

    /// Runs a built module, reporting problems to standard error.
    pub fn run(&mut self, module: &str) -> Result<(), Diagnostic> {
        self.run_with(module, &mut StderrSink)
    }

    /// Like [`Engine::run`] with a caller-supplied diagnostic sink.
    ///
    /// Module-level statements execute in source order until the
    /// definition of `main`, which is then invoked with no arguments; a
    /// module without `main` is an error. Runs are not transactional:
    /// side effects performed before a failure stay.
    pub fn run_with(&mut self, module: &str, sink: &mut impl DiagnosticSink) -> Result<(), Diagnostic> {
        let Some(module) = self.modules.get(module) else {
            return report(sink, EngineError::runtime(format!("module '{module}' doesn't exist")));
        };
        if module.error {
            return report(sink, EngineError::runtime("module has errors and cannot run"));
        }
        let mut evaluator = Evaluator::new(
            &mut self.scopes,
            &mut self.types,
            &mut self.funcs,
            &mut self.objects,
            self.prims,
            self.limits,
        );
        match evaluator.run_module(&module.block) {
            Ok(()) => Ok(()),
            Err(err) => report(sink, err),
        }
    }

    // === Host registration ===

    /// Registers a type so scripts can resolve it by name. With a class
    /// `parent`, the type also becomes a member of that class at `offset`.
    pub fn register_type(
        &mut self,
        name: &str,
        size: usize,
        options: RegisterTypeOptions,
    ) -> Result<TypeId, Diagnostic> {
        if self.scopes.find_type(ScopeTree::GLOBAL, name, &self.types).is_some() {
            return Err(EngineError::type_error(format!("type '{name}' already exists")).into());
        }
        let id = self.types.alloc(name, size, false, options.is_class);
        if let Some(parent) = options.parent {
            let Some(parent_info) = self.types.try_get(parent) else {
                return Err(EngineError::type_error("unknown parent type").into());
            };
            if !parent_info.is_class() {
                return Err(EngineError::type_error(format!(
                    "parent type '{}' is not a class",
                    parent_info.name()
                ))
                .into());
            }
            let info = self.types.get_mut(id);
            info.offset = options.offset;
            info.parent_class = Some(parent);
            let parent_info = self.types.get_mut(parent);
            parent_info.fields.insert(name.to_owned(), id);
            parent_info.size = parent_info.size.max(options.offset + size);
        }
        self.scopes.register_type(ScopeTree::GLOBAL, id);
        Ok(id)
    }

    /// Registers a free function whose body is a native callback.
    pub fn register_function(
        &mut self,
        name: &str,
        params: &[(TypeId, &str)],
        return_type: TypeId,
        callback: impl Fn(&mut HostFrame<'_>, Vec<ScriptRval>) -> Result<ScriptRval, EngineError> + 'static,
    ) -> Result<(), Diagnostic> {
        if self.scopes.find_func(ScopeTree::GLOBAL, name, &self.funcs).is_some() {
            return Err(EngineError::runtime(format!("function '{name}' already exists")).into());
        }
        let func = self.funcs.alloc(ScriptFunc {
            name: name.to_owned(),
            params: host_params(params),
            body: None,
            scope: None,
            return_type,
            is_method: false,
            is_const_method: false,
            visibility: Visibility::Public,
            native: Some(NativeHandler::new(callback)),
        });
        self.scopes.register_func(ScopeTree::GLOBAL, func);
        Ok(())
    }

    /// Registers a native method on a previously-registered class.
    pub fn register_method(
        &mut self,
        type_id: TypeId,
        name: &str,
        return_type: TypeId,
        is_const: bool,
        params: &[(TypeId, &str)],
        callback: impl Fn(&mut HostFrame<'_>, Vec<ScriptRval>) -> Result<ScriptRval, EngineError> + 'static,
    ) -> Result<(), Diagnostic> {
        let Some(info) = self.types.try_get(type_id) else {
            return Err(EngineError::type_error("unknown type").into());
        };
        if !info.is_class() {
            return Err(EngineError::type_error(format!("type '{}' is not a class", info.name())).into());
        }
        if info.method(name).is_some() {
            return Err(EngineError::runtime(format!(
                "method '{}::{name}' already exists",
                info.name()
            ))
            .into());
        }
        let func = self.funcs.alloc(ScriptFunc {
            name: name.to_owned(),
            params: host_params(params),
            body: None,
            scope: None,
            return_type,
            is_method: true,
            is_const_method: is_const,
            visibility: Visibility::Public,
            native: Some(NativeHandler::new(callback)),
        });
        self.types.get_mut(type_id).methods.insert(name.to_owned(), func);
        Ok(())
    }

    // === Lookups ===

    #[must_use]
    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.scopes.find_type(ScopeTree::GLOBAL, name, &self.types)
    }

    #[must_use]
    pub fn type_by_id(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types.try_get(id)
    }

    /// Looks up a method on a class, script-declared or native, for
    /// embedder introspection.
    #[must_use]
    pub fn method_of(&self, type_id: TypeId, name: &str) -> Option<&ScriptFunc> {
        self.types
            .try_get(type_id)?
            .method(name)
            .map(|id| self.funcs.get(id))
    }

    /// Renders the scope tree with its registered types, objects, and
    /// functions, for embedder debugging.
    #[must_use]
    pub fn debug_scope_tree(&self) -> String {
        self.scopes.debug_dump(&self.types, &self.funcs)
    }

    /// Occupancy of the object arena. A run that leaks nothing leaves the
    /// live count where it found it (module-level declarations excluded;
    /// those persist by design).
    #[must_use]
    pub fn object_stats(&self) -> ArenaStats {
        self.objects.stats()
    }
}

fn host_params(params: &[(TypeId, &str)]) -> Vec<Param> {
    params
        .iter()
        .map(|&(type_id, name)| Param {
            name: name.to_owned(),
            type_id,
            is_const: false,
        })
        .collect()
}

fn report<T>(sink: &mut impl DiagnosticSink, err: EngineError) -> Result<T, Diagnostic> {
    let diag: Diagnostic = err.into();
    sink.emit(&diag);
    Err(diag)
}

/// Re-entry view of the engine handed to native callbacks.
///
/// A frame can look up types, inspect and update the receiver of a method
/// call, and build or read rvalues. It deliberately cannot start another
/// build or run: callbacks observe and mutate existing state only.
pub struct HostFrame<'e> {
    types: &'e mut TypeRegistry,
    objects: &'e mut ObjectArena,
    scopes: &'e ScopeTree,
    prims: Primitives,
    receiver: Option<ObjectId>,
}

impl<'e> HostFrame<'e> {
    pub(crate) fn new(
        types: &'e mut TypeRegistry,
        objects: &'e mut ObjectArena,
        scopes: &'e ScopeTree,
        prims: Primitives,
        receiver: Option<ObjectId>,
    ) -> Self {
        Self {
            types,
            objects,
            scopes,
            prims,
            receiver,
        }
    }

    #[must_use]
    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.scopes.find_type(ScopeTree::GLOBAL, name, self.types)
    }

    #[must_use]
    pub fn type_by_id(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types.try_get(id)
    }

    /// The `TypeInfo` describing an rvalue.
    pub fn type_of(&self, value: &ScriptRval) -> Result<&TypeInfo, EngineError> {
        self.types.by_id(value.type_id())
    }

    #[must_use]
    pub fn has_receiver(&self) -> bool {
        self.receiver.is_some()
    }

    /// Reads a field of the method receiver.
    pub fn receiver_field(&self, name: &str) -> Result<ScriptRval, EngineError> {
        let receiver = self
            .receiver
            .ok_or_else(|| EngineError::host("no receiver bound to this callback"))?;
        let field = self
            .objects
            .get(receiver)
            .field(name)
            .ok_or_else(|| EngineError::host(format!("receiver has no field '{name}'")))?;
        read_object(self.objects, self.types, field)
    }

    /// Writes a field of the method receiver through the conversion
    /// matrix.
    pub fn set_receiver_field(&mut self, name: &str, value: &ScriptRval) -> Result<(), EngineError> {
        let receiver = self
            .receiver
            .ok_or_else(|| EngineError::host("no receiver bound to this callback"))?;
        let field = self
            .objects
            .get(receiver)
            .field(name)
            .ok_or_else(|| EngineError::host(format!("receiver has no field '{name}'")))?;
        assign_rval(self.objects, self.types, field, value)
    }

    // === Rvalue constructors ===

    #[must_use]
    pub fn void_value(&self) -> ScriptRval {
        ScriptRval::void(self.prims.void_)
    }

    #[must_use]
    pub fn int_value(&self, value: i32) -> ScriptRval {
        ScriptRval::scalar(self.prims.int_, SmallVec::from_slice(&value.to_le_bytes()))
    }

    #[must_use]
    pub fn long_value(&self, value: i64) -> ScriptRval {
        ScriptRval::scalar(self.prims.long_, SmallVec::from_slice(&value.to_le_bytes()))
    }

    #[must_use]
    pub fn float_value(&self, value: f32) -> ScriptRval {
        ScriptRval::scalar(self.prims.float_, SmallVec::from_slice(&value.to_le_bytes()))
    }

    #[must_use]
    pub fn double_value(&self, value: f64) -> ScriptRval {
        ScriptRval::scalar(self.prims.double_, SmallVec::from_slice(&value.to_le_bytes()))
    }

    #[must_use]
    pub fn bool_value(&self, value: bool) -> ScriptRval {
        ScriptRval::scalar(self.prims.bool_, SmallVec::from_slice(&[u8::from(value)]))
    }

    /// Builds a scalar rvalue of an arbitrary registered scalar type from
    /// a 64-bit integer, narrowing through the conversion rules.
    pub fn scalar_value(&self, type_id: TypeId, value: i64) -> Result<ScriptRval, EngineError> {
        let info = self.types.by_id(type_id)?;
        let bytes = scalar_to_bytes(Scalar::Signed(value), info)?;
        Ok(ScriptRval::scalar(type_id, bytes))
    }

    /// Builds an rvalue from literal text, typed exactly the way the
    /// evaluator types script literals: `int` when it fits 32 bits, `long`
    /// otherwise, `float` preferred for decimals with a `double` fallback.
    pub fn value_from_literal(&self, text: &str) -> Result<ScriptRval, EngineError> {
        let kind = if text.contains('.') {
            TokenKind::Decimal
        } else {
            TokenKind::Integer
        };
        rval_from_literal(&Token::new(kind, text, 0, 0), &self.prims)
    }

    // === Rvalue readers ===

    pub fn as_i64(&self, value: &ScriptRval) -> Result<i64, EngineError> {
        match self.read(value)? {
            Scalar::Signed(v) => Ok(v),
            Scalar::Unsigned(v) => Ok(v as i64),
            Scalar::Float(v) => Ok(v.trunc() as i64),
        }
    }

    pub fn as_u64(&self, value: &ScriptRval) -> Result<u64, EngineError> {
        match self.read(value)? {
            Scalar::Signed(v) => Ok(v as u64),
            Scalar::Unsigned(v) => Ok(v),
            Scalar::Float(v) => Ok(v.trunc() as u64),
        }
    }

    pub fn as_f64(&self, value: &ScriptRval) -> Result<f64, EngineError> {
        match self.read(value)? {
            Scalar::Signed(v) => Ok(v as f64),
            Scalar::Unsigned(v) => Ok(v as f64),
            Scalar::Float(v) => Ok(v),
        }
    }

    pub fn as_bool(&self, value: &ScriptRval) -> Result<bool, EngineError> {
        Ok(scalar_truthy(self.read(value)?))
    }

    fn read(&self, value: &ScriptRval) -> Result<Scalar, EngineError> {
        let info = self.types.by_id(value.type_id())?;
        read_scalar(value.scalar_bytes()?, info)
    }

    /// Renders an rvalue for host output: integers in decimal, floats in
    /// their shortest round-trip form, class instances by type name.
    #[must_use]
    pub fn display(&self, value: &ScriptRval) -> String {
        if value.is_void() {
            return "void".to_owned();
        }
        let info = self.types.get(value.type_id());
        if info.is_class() {
            return format!("<{} instance>", info.name());
        }
        match self.read(value) {
            Ok(scalar) => format_scalar(scalar),
            Err(_) => "<invalid>".to_owned(),
        }
    }
}
