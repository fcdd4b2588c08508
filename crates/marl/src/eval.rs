use crate::{
    ast::{AssignStmt, Block, CallExpr, Expr, ForStmt, IfStmt, ReturnStmt, Stmt, VarDeclStmt, WhileStmt},
    engine::HostFrame,
    error::{CodeLoc, EngineError, ExecResult},
    func::{FuncId, FuncRegistry},
    limits::EngineLimits,
    object::{Modifiers, ObjectArena, ObjectData, ObjectId},
    resolve::{Resolved, Resolver},
    scope::{ScopeId, ScopeTree},
    types::{Primitives, TypeRegistry},
    value::{
        apply_binary, assign_rval, copy_object, read_object, read_scalar, rval_from_literal, scalar_truthy, BinOp,
        ScriptRval,
    },
};

/// How a statement finished: fell through, hit `break`, or hit `return`.
/// Propagation is data, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Return,
}

/// Per-call context: the bound receiver for methods and whether writes to
/// its fields are forbidden.
struct Frame {
    receiver: Option<ObjectId>,
    const_method: bool,
}

/// Saved state of a function-scope subtree, taken before a re-entrant call
/// and restored after it, so overlapping invocations never see each
/// other's parameter and local values.
struct FrameSnapshot {
    scopes: Vec<(ScopeId, Vec<(String, ObjectId)>, Option<ObjectId>)>,
    objects: Vec<(ObjectId, ObjectData)>,
}

/// Depth-first tree walker over the parse-time scope graph.
///
/// Borrows the engine's arenas for the duration of one `run`; the scope
/// cursor and the frame stack live here, and every compound construct
/// restores the cursor on the way out, error paths included.
pub(crate) struct Evaluator<'e> {
    scopes: &'e mut ScopeTree,
    types: &'e mut TypeRegistry,
    funcs: &'e mut FuncRegistry,
    objects: &'e mut ObjectArena,
    prims: Primitives,
    limits: EngineLimits,
    current: ScopeId,
    call_depth: u32,
    /// Functions with an invocation on the stack, for re-entry detection.
    active: Vec<FuncId>,
    frames: Vec<Frame>,
    /// Class-instance return objects kept alive until the end of the
    /// statement that produced them.
    temps: Vec<ObjectId>,
}

impl<'e> Evaluator<'e> {
    pub fn new(
        scopes: &'e mut ScopeTree,
        types: &'e mut TypeRegistry,
        funcs: &'e mut FuncRegistry,
        objects: &'e mut ObjectArena,
        prims: Primitives,
        limits: EngineLimits,
    ) -> Self {
        Self {
            scopes,
            types,
            funcs,
            objects,
            prims,
            limits,
            current: ScopeTree::GLOBAL,
            call_depth: 0,
            active: Vec::new(),
            frames: Vec::new(),
            temps: Vec::new(),
        }
    }

    /// Runs a module block: non-definition statements execute in source
    /// order; reaching the definition of `main` invokes it with no
    /// arguments and ends the run. A module without `main` is an error.
    pub fn run_module(&mut self, block: &Block) -> ExecResult<()> {
        for stmt in &block.stmts {
            if let Stmt::FuncDef { func, loc } = stmt {
                if self.funcs.get(*func).name() == "main" {
                    let result = self.call_func(*func, &[], None, *loc);
                    self.clear_temps();
                    result?;
                    return Ok(());
                }
                continue;
            }
            let result = self.exec_stmt(stmt);
            self.clear_temps();
            result?;
        }
        Err(EngineError::runtime("module has no 'main' function"))
    }

    // === Scope bookkeeping ===

    /// Runs `f` with `scope` as the current scope, then destroys every
    /// object the scope gained and restores the cursor, also when `f`
    /// fails.
    fn in_scope<F>(&mut self, scope: ScopeId, f: F) -> ExecResult<Flow>
    where
        F: FnOnce(&mut Self) -> ExecResult<Flow>,
    {
        let prev = self.current;
        let mark = self.scopes.get(scope).objects.len();
        self.current = scope;
        let result = f(self);
        self.teardown(scope, mark);
        self.current = prev;
        result
    }

    /// Same teardown discipline without moving the cursor; used for the
    /// per-iteration locals of a `for` body, which shares the loop scope.
    fn with_watermark<F>(&mut self, scope: ScopeId, f: F) -> ExecResult<Flow>
    where
        F: FnOnce(&mut Self) -> ExecResult<Flow>,
    {
        let mark = self.scopes.get(scope).objects.len();
        let result = f(self);
        self.teardown(scope, mark);
        result
    }

    fn teardown(&mut self, scope: ScopeId, mark: usize) {
        let removed: Vec<ObjectId> = self
            .scopes
            .get_mut(scope)
            .objects
            .split_off(mark)
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        for id in removed {
            self.objects.destroy(id);
        }
    }

    fn clear_temps(&mut self) {
        for id in std::mem::take(&mut self.temps) {
            self.objects.destroy(id);
        }
    }

    fn resolve(&self, path: &crate::ast::NamePath) -> ExecResult<Resolved> {
        let receiver = self.frames.last().and_then(|f| f.receiver);
        Resolver {
            scopes: self.scopes,
            types: self.types,
            funcs: self.funcs,
            objects: self.objects,
        }
        .resolve(self.current, path, receiver)
    }

    // === Statements ===

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> ExecResult<Flow> {
        for stmt in stmts {
            let result = self.exec_stmt(stmt);
            self.clear_temps();
            let flow = result?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block(&mut self, block: &Block) -> ExecResult<Flow> {
        self.in_scope(block.scope, |ev| ev.exec_stmts(&block.stmts))
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ExecResult<Flow> {
        match stmt {
            Stmt::VarDecl(decl) => self.exec_var_decl(decl),
            Stmt::Assign(assign) => self.exec_assign(assign),
            Stmt::If(s) => self.exec_if(s),
            Stmt::While(s) => self.exec_while(s),
            Stmt::For(s) => self.exec_for(s),
            Stmt::Return(s) => self.exec_return(s),
            Stmt::Break => Ok(Flow::Break),
            Stmt::FuncDef { .. } | Stmt::ClassDecl => Ok(Flow::Normal),
            Stmt::Call(call) => {
                // Statement form: the result, if any, is discarded.
                self.eval_call(call)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_var_decl(&mut self, decl: &VarDeclStmt) -> ExecResult<Flow> {
        if self.scopes.object_in(self.current, &decl.name).is_some() {
            return Err(EngineError::runtime(format!("'{}' is already declared", decl.name)).at(decl.loc));
        }
        let modifiers = if decl.is_const { Modifiers::CONST } else { Modifiers::NONE };
        let obj = self.objects.create(self.types, decl.type_id, &decl.name, modifiers);
        self.scopes.register_object(self.current, &decl.name, obj);

        if let Some(init) = &decl.init {
            // An identifier initializer that resolves to an object copies
            // from that object directly.
            if let Expr::Name(path) = init {
                match self.resolve(path)? {
                    Resolved::Object(src) => {
                        copy_object(self.objects, self.types, obj, src).map_err(|e| e.at(decl.loc))?;
                        return Ok(Flow::Normal);
                    }
                    Resolved::Func(_) | Resolved::Method(_) | Resolved::Type(_) => {
                        return Err(EngineError::type_error(format!(
                            "'{}' cannot initialize a variable",
                            path.dotted()
                        ))
                        .at(path.loc));
                    }
                }
            }
            let value = self.eval_expr(init)?;
            assign_rval(self.objects, self.types, obj, &value).map_err(|e| e.at(decl.loc))?;
        }
        Ok(Flow::Normal)
    }

    fn exec_assign(&mut self, assign: &AssignStmt) -> ExecResult<Flow> {
        let target = match self.resolve(&assign.target)? {
            Resolved::Object(obj) => obj,
            Resolved::Func(_) | Resolved::Method(_) | Resolved::Type(_) => {
                return Err(
                    EngineError::type_error(format!("cannot assign to '{}'", assign.target.dotted()))
                        .at(assign.loc),
                );
            }
        };
        if self.objects.get(target).is_const() {
            return Err(EngineError::type_error(format!(
                "assignment to const '{}'",
                assign.target.dotted()
            ))
            .at(assign.loc));
        }
        if let Some(frame) = self.frames.last()
            && frame.const_method
            && let Some(receiver) = frame.receiver
            && self.rooted_in(target, receiver)
        {
            return Err(EngineError::type_error(format!(
                "cannot modify '{}' inside a const method",
                assign.target.dotted()
            ))
            .at(assign.loc));
        }
        let value = self.eval_expr(&assign.value)?;
        assign_rval(self.objects, self.types, target, &value).map_err(|e| e.at(assign.loc))?;
        Ok(Flow::Normal)
    }

    /// True when `obj` is `root` or one of its field sub-objects,
    /// transitively.
    fn rooted_in(&self, mut obj: ObjectId, root: ObjectId) -> bool {
        loop {
            if obj == root {
                return true;
            }
            match self.objects.get(obj).parent_obj {
                Some(parent) => obj = parent,
                None => return false,
            }
        }
    }

    fn exec_if(&mut self, s: &IfStmt) -> ExecResult<Flow> {
        let cond = self.eval_expr(&s.cond)?;
        if self.truthy(&cond, s.loc)? {
            self.exec_block(&s.then_block)
        } else if let Some(else_block) = &s.else_block {
            self.exec_block(else_block)
        } else {
            Ok(Flow::Normal)
        }
    }

    fn exec_while(&mut self, s: &WhileStmt) -> ExecResult<Flow> {
        loop {
            let cond = self.eval_expr(&s.cond)?;
            let truthy = self.truthy(&cond, s.loc)?;
            self.clear_temps();
            if !truthy {
                return Ok(Flow::Normal);
            }
            match self.exec_block(&s.body)? {
                Flow::Normal => {}
                Flow::Break => return Ok(Flow::Normal),
                Flow::Return => return Ok(Flow::Return),
            }
        }
    }

    fn exec_for(&mut self, s: &ForStmt) -> ExecResult<Flow> {
        self.in_scope(s.scope, |ev| {
            ev.exec_stmt(&s.init)?;
            ev.clear_temps();
            loop {
                let cond = ev.eval_expr(&s.cond)?;
                let truthy = ev.truthy(&cond, s.loc)?;
                ev.clear_temps();
                if !truthy {
                    return Ok(Flow::Normal);
                }
                // Body locals are per iteration even though the body shares
                // the loop scope with the induction variable.
                match ev.with_watermark(s.scope, |ev| ev.exec_stmts(&s.body))? {
                    Flow::Normal => {}
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return => return Ok(Flow::Return),
                }
                ev.exec_stmt(&s.step)?;
                ev.clear_temps();
            }
        })
    }

    fn exec_return(&mut self, s: &ReturnStmt) -> ExecResult<Flow> {
        let Some((func_scope, func)) = self.scopes.enclosing_function(self.current) else {
            return Err(EngineError::runtime("'return' outside of a function").at(s.loc));
        };
        let return_type = self.funcs.get(func).return_type;
        match &s.value {
            Some(expr) => {
                if self.types.get(return_type).is_void() {
                    return Err(EngineError::type_error("a void function cannot return a value").at(s.loc));
                }
                let value = self.eval_expr(expr)?;
                let obj = self.objects.create(self.types, return_type, "<return>", Modifiers::NONE);
                if let Err(err) = assign_rval(self.objects, self.types, obj, &value) {
                    self.objects.destroy(obj);
                    return Err(err.at(s.loc));
                }
                if let Some(old) = self.scopes.get_mut(func_scope).return_obj.replace(obj) {
                    self.objects.destroy(old);
                }
            }
            None => {
                if let Some(old) = self.scopes.get_mut(func_scope).return_obj.take() {
                    self.objects.destroy(old);
                }
            }
        }
        Ok(Flow::Return)
    }

    // === Expressions ===

    fn eval_expr(&mut self, expr: &Expr) -> ExecResult<ScriptRval> {
        match expr {
            Expr::Literal(token) => rval_from_literal(token, &self.prims),
            Expr::Name(path) => match self.resolve(path)? {
                Resolved::Object(obj) => read_object(self.objects, self.types, obj).map_err(|e| e.at(path.loc)),
                Resolved::Func(_) | Resolved::Method(_) => {
                    Err(EngineError::runtime(format!("function '{}' used as a value", path.dotted())).at(path.loc))
                }
                Resolved::Type(_) => {
                    Err(EngineError::runtime(format!("type '{}' used as a value", path.dotted())).at(path.loc))
                }
            },
            Expr::Binary { lhs, op, rhs } => {
                // Operands evaluate left to right, both fully; the surface
                // language has no short-circuit operators.
                let left = self.eval_expr(lhs)?;
                let right = self.eval_expr(rhs)?;
                let bin = BinOp::from_token(op.kind)
                    .ok_or_else(|| EngineError::runtime(format!("bad operator '{}'", op.lexeme)).at(op.loc()))?;
                apply_binary(bin, &left, &right, self.types, &self.prims).map_err(|e| e.at(op.loc()))
            }
            Expr::Call(call) => self.eval_call(call),
        }
    }

    fn eval_call(&mut self, call: &CallExpr) -> ExecResult<ScriptRval> {
        match self.resolve(&call.callee)? {
            Resolved::Func(func) => self.call_func(func, &call.args, None, call.loc),
            Resolved::Method(bound) => self.call_func(bound.func, &call.args, Some(bound.receiver), call.loc),
            Resolved::Object(_) | Resolved::Type(_) => {
                Err(EngineError::runtime(format!("'{}' is not callable", call.callee.dotted())).at(call.loc))
            }
        }
    }

    fn truthy(&self, value: &ScriptRval, loc: CodeLoc) -> ExecResult<bool> {
        let info = self.types.get(value.type_id());
        let scalar = read_scalar(value.scalar_bytes().map_err(|e| e.at(loc))?, info).map_err(|e| e.at(loc))?;
        Ok(scalar_truthy(scalar))
    }

    // === Calls ===

    /// Invokes a callable: a native callback gets the evaluated argument
    /// rvalues through a [`HostFrame`]; a script function gets its
    /// parameters bound through the conversion matrix, its body executed
    /// in its own scope, and its return slot read back.
    fn call_func(
        &mut self,
        func_id: FuncId,
        args: &[Expr],
        receiver: Option<ObjectId>,
        loc: CodeLoc,
    ) -> ExecResult<ScriptRval> {
        let func = self.funcs.get(func_id).clone();
        if args.len() != func.params.len() {
            return Err(EngineError::argument(format!(
                "'{}' expects {} argument(s), got {}",
                func.name,
                func.params.len(),
                args.len()
            ))
            .at(loc));
        }

        // Arguments evaluate left to right in the caller's scope, before
        // the call.
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg)?);
        }

        if let Some(handler) = &func.native {
            let mut frame = HostFrame::new(self.types, self.objects, self.scopes, self.prims, receiver);
            return (handler.0.as_ref())(&mut frame, values).map_err(|e| e.at(loc));
        }

        let body = func
            .body
            .clone()
            .ok_or_else(|| EngineError::runtime(format!("function '{}' has no body", func.name)).at(loc))?;
        let func_scope = func
            .scope
            .ok_or_else(|| EngineError::runtime(format!("function '{}' has no scope", func.name)).at(loc))?;

        if self.call_depth >= self.limits.max_call_depth {
            return Err(EngineError::runtime(format!(
                "call depth limit of {} exceeded",
                self.limits.max_call_depth
            ))
            .at(loc));
        }
        self.call_depth += 1;

        // A function scope is never shared between overlapping
        // invocations: re-entry saves its state and restores it after the
        // inner call.
        let snapshot = if self.active.contains(&func_id) {
            Some(self.save_frame_state(func_scope))
        } else {
            None
        };

        let result = self.call_script_func(&func, func_id, func_scope, &body, receiver, &values, loc);

        if let Some(snap) = snapshot {
            self.restore_frame_state(snap);
        }
        self.call_depth -= 1;
        result
    }

    #[expect(clippy::too_many_arguments, reason = "one call site, split for snapshot symmetry")]
    fn call_script_func(
        &mut self,
        func: &crate::func::ScriptFunc,
        func_id: FuncId,
        func_scope: ScopeId,
        body: &Block,
        receiver: Option<ObjectId>,
        values: &[ScriptRval],
        loc: CodeLoc,
    ) -> ExecResult<ScriptRval> {
        // Positional binding through the conversion matrix.
        for (param, value) in func.params.iter().zip(values) {
            let slot = self
                .scopes
                .object_in(func_scope, &param.name)
                .ok_or_else(|| EngineError::runtime(format!("missing parameter slot '{}'", param.name)).at(loc))?;
            assign_rval(self.objects, self.types, slot, value).map_err(|e| {
                EngineError::argument(format!("cannot bind argument '{}': {}", param.name, e.message())).at(loc)
            })?;
        }

        if let Some(stale) = self.scopes.get_mut(func_scope).return_obj.take() {
            self.objects.destroy(stale);
        }

        self.active.push(func_id);
        self.frames.push(Frame {
            receiver,
            const_method: func.is_const_method && receiver.is_some(),
        });

        let flow_result = self.in_scope(func_scope, |ev| ev.exec_stmts(&body.stmts));

        self.frames.pop();
        self.active.pop();

        let returned = self.scopes.get_mut(func_scope).return_obj.take();
        if let Err(err) = flow_result {
            if let Some(obj) = returned {
                self.objects.destroy(obj);
            }
            return Err(err);
        }

        match returned {
            Some(obj) => {
                let type_id = self.objects.get(obj).type_id;
                if self.types.get(type_id).is_class() {
                    // Keep the instance alive until the end of the
                    // enclosing statement.
                    self.temps.push(obj);
                    Ok(ScriptRval::instance(type_id, obj))
                } else {
                    let value = read_object(self.objects, self.types, obj)?;
                    self.objects.destroy(obj);
                    Ok(value)
                }
            }
            None => Ok(ScriptRval::void(self.prims.void_)),
        }
    }

    // === Re-entry snapshots ===

    /// Clones the objects and registration lists of a function-scope
    /// subtree, then resets the scopes to their parse-time state so the
    /// inner invocation starts clean.
    fn save_frame_state(&mut self, root: ScopeId) -> FrameSnapshot {
        let subtree = self.scopes.subtree(root);
        let mut scopes = Vec::with_capacity(subtree.len());
        let mut objects = Vec::new();
        for &sid in &subtree {
            let data = self.scopes.get(sid);
            for (_, oid) in &data.objects {
                if let Some(cloned) = self.objects.clone_data(*oid) {
                    objects.push((*oid, cloned));
                }
            }
            scopes.push((sid, data.objects.clone(), data.return_obj));
        }
        for &sid in &subtree {
            let data = self.scopes.get_mut(sid);
            data.objects.truncate(data.persistent);
            data.return_obj = None;
        }
        FrameSnapshot { scopes, objects }
    }

    fn restore_frame_state(&mut self, snapshot: FrameSnapshot) {
        for (sid, objects, return_obj) in snapshot.scopes {
            let data = self.scopes.get_mut(sid);
            data.objects = objects;
            data.return_obj = return_obj;
        }
        for (oid, data) in snapshot.objects {
            self.objects.restore_data(oid, data);
        }
    }
}
