use std::rc::Rc;

use crate::{
    ast::{AssignStmt, Block, CallExpr, Expr, ForStmt, IfStmt, NamePath, ReturnStmt, Stmt, VarDeclStmt, WhileStmt},
    error::{CodeLoc, EngineError, ExecResult},
    func::{FuncId, FuncRegistry, Param, ScriptFunc},
    lex::{Token, TokenKind},
    object::{Modifiers, ObjectArena},
    scope::{ScopeId, ScopeKind, ScopeTree},
    types::{Primitives, TypeId, TypeRegistry, Visibility},
};

/// Binding strength of a binary operator; zero means "not an operator".
/// Higher binds tighter.
fn precedence(kind: TokenKind) -> u8 {
    match kind {
        TokenKind::Star | TokenKind::Slash => 3,
        TokenKind::Plus | TokenKind::Minus => 2,
        TokenKind::Less
        | TokenKind::Leq
        | TokenKind::Greater
        | TokenKind::Geq
        | TokenKind::Neq
        | TokenKind::Eq => 1,
        _ => 0,
    }
}

/// Recursive-descent statement parser with a Pratt expression core.
///
/// The parser mirrors the static structure of the program into the scope
/// tree as it goes: every function body, class body, if arm, and loop body
/// gets its scope here, and function parameters are interned as objects in
/// their function's scope. The evaluator re-enters these same scopes at
/// run time.
pub(crate) struct Parser<'e> {
    toks: &'e [Token],
    pos: usize,
    end: Token,
    scopes: &'e mut ScopeTree,
    types: &'e mut TypeRegistry,
    funcs: &'e mut FuncRegistry,
    objects: &'e mut ObjectArena,
    prims: Primitives,
    current: ScopeId,
    depth: u32,
    max_depth: u32,
}

impl<'e> Parser<'e> {
    #[expect(clippy::too_many_arguments, reason = "borrows each engine arena separately")]
    pub fn new(
        toks: &'e [Token],
        start: usize,
        scopes: &'e mut ScopeTree,
        types: &'e mut TypeRegistry,
        funcs: &'e mut FuncRegistry,
        objects: &'e mut ObjectArena,
        prims: Primitives,
        scope: ScopeId,
        max_depth: u32,
    ) -> Self {
        let end_loc = toks.last().map_or(CodeLoc::new(1, 1), Token::loc);
        Self {
            toks,
            pos: start,
            end: Token::new(TokenKind::End, "", end_loc.row, end_loc.col),
            scopes,
            types,
            funcs,
            objects,
            prims,
            current: scope,
            depth: 0,
            max_depth,
        }
    }

    /// Index of the next unconsumed token, so an interrupted build can
    /// resume after more source is appended.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn peek(&self) -> &Token {
        self.toks.get(self.pos).unwrap_or(&self.end)
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_kind_at(&self, ahead: usize) -> TokenKind {
        self.toks.get(self.pos + ahead).map_or(TokenKind::End, |t| t.kind)
    }

    fn loc(&self) -> CodeLoc {
        self.peek().loc()
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.toks.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, what: &'static str) -> ExecResult<Token> {
        if self.peek_kind() == kind {
            Ok(self.bump())
        } else {
            let tok = self.peek();
            Err(EngineError::parse(format!("expected {what}, found '{}'", tok.lexeme)).at(tok.loc()))
        }
    }

    fn enter_depth(&mut self) -> ExecResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(EngineError::parse("nesting too deep").at(self.loc()));
        }
        Ok(())
    }

    fn leave_depth(&mut self) {
        self.depth -= 1;
    }

    // === Statements ===

    pub fn parse_statement(&mut self) -> ExecResult<Stmt> {
        self.enter_depth()?;
        let result = self.parse_statement_inner();
        self.leave_depth();
        result
    }

    /// First-token dispatch: type-ish tokens start declarations, known
    /// control keywords dispatch directly, and a bare identifier is
    /// disambiguated by looking ahead past the dotted chain for a `(`.
    fn parse_statement_inner(&mut self) -> ExecResult<Stmt> {
        match self.peek_kind() {
            TokenKind::Class => self.parse_class(),
            TokenKind::Const | TokenKind::Unsigned => self.parse_decl(),
            kind if kind.is_type_keyword() => self.parse_decl(),
            TokenKind::Identifier => {
                if self.scopes.find_type(self.current, &self.peek().lexeme, self.types).is_some() {
                    return self.parse_decl();
                }
                if self.call_follows() {
                    let call = self.parse_call(true)?;
                    Ok(Stmt::Call(call))
                } else {
                    self.parse_assign(true)
                }
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => self.parse_break(),
            _ => {
                let tok = self.peek();
                Err(EngineError::parse(format!("unexpected token '{}'", tok.lexeme)).at(tok.loc()))
            }
        }
    }

    /// Looks past `ident (. ident)*` for an opening parenthesis.
    fn call_follows(&self) -> bool {
        let mut ahead = 0;
        loop {
            match self.peek_kind_at(ahead) {
                TokenKind::Identifier => ahead += 1,
                TokenKind::Dot | TokenKind::DoubleColon => ahead += 1,
                TokenKind::OpenParen => return true,
                _ => return false,
            }
        }
    }

    /// A declaration starting with a type: either a variable or, when a
    /// `(` follows the declared name, a function.
    fn parse_decl(&mut self) -> ExecResult<Stmt> {
        let loc = self.loc();
        let is_const = if self.peek_kind() == TokenKind::Const {
            self.bump();
            true
        } else {
            false
        };
        let type_id = self.parse_type()?;
        let name = self.expect(TokenKind::Identifier, "a name")?;

        if self.peek_kind() == TokenKind::OpenParen {
            let func = self.parse_func_tail(type_id, &name.lexeme, false, Visibility::default())?;
            return Ok(Stmt::FuncDef { func, loc });
        }

        let init = if self.peek_kind() == TokenKind::Assign {
            self.bump();
            Some(self.parse_expression(0)?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "';'")?;

        if is_const && init.is_none() && !self.types.get(type_id).is_class() {
            return Err(
                EngineError::parse(format!("const '{}' must be initialized", name.lexeme)).at(name.loc()),
            );
        }

        Ok(Stmt::VarDecl(VarDeclStmt {
            type_id,
            name: name.lexeme,
            is_const,
            init,
            loc,
        }))
    }

    /// Resolves a type name: primitive keywords directly, `unsigned` plus
    /// an integer keyword as the unsigned sibling, and identifiers against
    /// the scope chain.
    fn parse_type(&mut self) -> ExecResult<TypeId> {
        let tok = self.bump();
        let id = match tok.kind {
            TokenKind::Void => self.prims.void_,
            TokenKind::Bool => self.prims.bool_,
            TokenKind::Char => self.prims.char_,
            TokenKind::Short => self.prims.short_,
            TokenKind::Int => self.prims.int_,
            TokenKind::Long => self.prims.long_,
            TokenKind::Float => self.prims.float_,
            TokenKind::Double => self.prims.double_,
            TokenKind::Unsigned => {
                let base = self.bump();
                match base.kind {
                    TokenKind::Char => self.prims.uchar,
                    TokenKind::Short => self.prims.ushort,
                    TokenKind::Int => self.prims.uint,
                    TokenKind::Long => self.prims.ulong,
                    _ => {
                        return Err(EngineError::parse(format!(
                            "expected an integer type after 'unsigned', found '{}'",
                            base.lexeme
                        ))
                        .at(base.loc()));
                    }
                }
            }
            TokenKind::Identifier => self
                .scopes
                .find_type(self.current, &tok.lexeme, self.types)
                .ok_or_else(|| EngineError::type_error(format!("unknown type '{}'", tok.lexeme)).at(tok.loc()))?,
            _ => {
                return Err(EngineError::parse(format!("expected a type, found '{}'", tok.lexeme)).at(tok.loc()));
            }
        };
        Ok(id)
    }

    /// Parses `(params) [const] { body }` after a function's return type
    /// and name. Creates the FUNCTION scope, interns the parameters into
    /// it as objects, and registers the resulting callable.
    fn parse_func_tail(
        &mut self,
        return_type: TypeId,
        name: &str,
        is_method: bool,
        visibility: Visibility,
    ) -> ExecResult<FuncId> {
        let extra = if is_method {
            ScopeKind::FUNCTION.union(ScopeKind::CLASS)
        } else {
            ScopeKind::FUNCTION
        };
        let func_scope = self.scopes.add_child(self.current, extra);

        self.expect(TokenKind::OpenParen, "'('")?;
        let mut params = Vec::new();
        if self.peek_kind() != TokenKind::CloseParen {
            loop {
                let is_const = if self.peek_kind() == TokenKind::Const {
                    self.bump();
                    true
                } else {
                    false
                };
                let type_id = self.parse_type()?;
                let pname = self.expect(TokenKind::Identifier, "a parameter name")?;
                let param = Param {
                    name: pname.lexeme,
                    type_id,
                    is_const,
                };
                let modifiers = if param.is_const { Modifiers::CONST } else { Modifiers::NONE };
                let obj = self.objects.create(self.types, type_id, &param.name, modifiers);
                self.scopes.intern_object(func_scope, &param.name, obj);
                params.push(param);
                if self.peek_kind() == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::CloseParen, "')'")?;

        let is_const_method = if self.peek_kind() == TokenKind::Const {
            let tok = self.bump();
            if !is_method {
                return Err(EngineError::parse("only methods can be declared const").at(tok.loc()));
            }
            true
        } else {
            false
        };

        let block = self.parse_body(func_scope)?;

        let func = self.funcs.alloc(ScriptFunc {
            name: name.to_owned(),
            params,
            body: Some(Rc::new(block)),
            scope: Some(func_scope),
            return_type,
            is_method,
            is_const_method,
            visibility,
            native: None,
        });
        self.scopes.get_mut(func_scope).parent_func = Some(func);
        if !is_method {
            self.scopes.register_func(self.current, func);
        }
        Ok(func)
    }

    /// Parses a body with `scope` as the current scope: either `{ stmt* }`
    /// or, without an opening brace, a single statement.
    fn parse_body(&mut self, scope: ScopeId) -> ExecResult<Block> {
        let saved = self.current;
        self.current = scope;
        let result = self.parse_body_stmts();
        self.current = saved;
        Ok(Block {
            scope,
            stmts: result?,
        })
    }

    fn parse_body_stmts(&mut self) -> ExecResult<Vec<Stmt>> {
        if self.peek_kind() != TokenKind::OpenBrace {
            return Ok(vec![self.parse_statement()?]);
        }
        self.bump();
        let mut stmts = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::CloseBrace => break,
                TokenKind::End => {
                    return Err(EngineError::parse("unexpected end of input inside a block").at(self.loc()));
                }
                _ => stmts.push(self.parse_statement()?),
            }
        }
        self.expect(TokenKind::CloseBrace, "'}'")?;
        Ok(stmts)
    }

    /// `class Name { [vis:] member* };`
    ///
    /// Fields get a fresh `TypeInfo` clone carrying their byte offset; the
    /// class size accumulates field sizes in declaration order. Methods are
    /// parsed like functions, flagged as methods, and stored on the type.
    fn parse_class(&mut self) -> ExecResult<Stmt> {
        self.bump(); // class
        let name = self.expect(TokenKind::Identifier, "a class name")?;
        if self
            .scopes
            .find_type(self.current, &name.lexeme, self.types)
            .is_some()
        {
            return Err(EngineError::type_error(format!("type '{}' already exists", name.lexeme)).at(name.loc()));
        }
        self.expect(TokenKind::OpenBrace, "'{'")?;

        let class_id = self.types.alloc(name.lexeme.clone(), 0, false, true);
        // Registered before the body so methods can mention the class.
        self.scopes.register_type(self.current, class_id);

        let body_scope = self.scopes.add_child(self.current, ScopeKind::CLASS);
        let saved = self.current;
        self.current = body_scope;
        let result = self.parse_class_body(class_id);
        self.current = saved;
        result?;

        self.expect(TokenKind::CloseBrace, "'}'")?;
        self.expect(TokenKind::Semicolon, "';' after a class body")?;
        Ok(Stmt::ClassDecl)
    }

    fn parse_class_body(&mut self, class_id: TypeId) -> ExecResult<()> {
        let mut visibility = Visibility::Private;
        let mut size = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::CloseBrace => break,
                TokenKind::End => {
                    return Err(EngineError::parse("unexpected end of input inside a class body").at(self.loc()));
                }
                TokenKind::Public => {
                    self.bump();
                    self.expect(TokenKind::Colon, "':' after 'public'")?;
                    visibility = Visibility::Public;
                }
                TokenKind::Protected => {
                    self.bump();
                    self.expect(TokenKind::Colon, "':' after 'protected'")?;
                    visibility = Visibility::Protected;
                }
                TokenKind::Private => {
                    self.bump();
                    self.expect(TokenKind::Colon, "':' after 'private'")?;
                    visibility = Visibility::Private;
                }
                _ => {
                    // `const` on a member is accepted and recorded nowhere,
                    // matching what the surface grammar allows.
                    if self.peek_kind() == TokenKind::Const {
                        self.bump();
                    }
                    let member_type = self.parse_type()?;
                    let member_name = self.expect(TokenKind::Identifier, "a member name")?;

                    if self.peek_kind() == TokenKind::OpenParen {
                        let func = self.parse_func_tail(member_type, &member_name.lexeme, true, visibility)?;
                        self.types
                            .get_mut(class_id)
                            .methods
                            .insert(member_name.lexeme, func);
                    } else {
                        self.expect(TokenKind::Semicolon, "';' after a field")?;
                        if self.types.get(class_id).field(&member_name.lexeme).is_some() {
                            return Err(EngineError::parse(format!(
                                "duplicate field '{}'",
                                member_name.lexeme
                            ))
                            .at(member_name.loc()));
                        }
                        let member_size = self.types.get(member_type).size();
                        let member_id = self.types.clone_as_member(member_type, size, class_id, visibility);
                        size += member_size;
                        self.types
                            .get_mut(class_id)
                            .fields
                            .insert(member_name.lexeme, member_id);
                    }
                }
            }
        }
        self.types.get_mut(class_id).size = size;
        Ok(())
    }

    fn parse_if(&mut self) -> ExecResult<Stmt> {
        let loc = self.loc();
        self.bump(); // if
        self.expect(TokenKind::OpenParen, "'('")?;
        let cond = self.parse_expression(0)?;
        self.expect(TokenKind::CloseParen, "')'")?;

        let then_scope = self.scopes.add_child(self.current, ScopeKind::NONE);
        let then_block = self.parse_body(then_scope)?;

        let else_block = if self.peek_kind() == TokenKind::Else {
            self.bump();
            let else_scope = self.scopes.add_child(self.current, ScopeKind::NONE);
            if self.peek_kind() == TokenKind::If {
                // `else if` chains nest as a single-statement else block.
                let saved = self.current;
                self.current = else_scope;
                let nested = self.parse_if();
                self.current = saved;
                Some(Block {
                    scope: else_scope,
                    stmts: vec![nested?],
                })
            } else {
                Some(self.parse_body(else_scope)?)
            }
        } else {
            None
        };

        Ok(Stmt::If(IfStmt {
            cond,
            then_block,
            else_block,
            loc,
        }))
    }

    fn parse_while(&mut self) -> ExecResult<Stmt> {
        let loc = self.loc();
        self.bump(); // while
        self.expect(TokenKind::OpenParen, "'('")?;
        let cond = self.parse_expression(0)?;
        self.expect(TokenKind::CloseParen, "')'")?;
        let body_scope = self.scopes.add_child(self.current, ScopeKind::LOOP);
        let body = self.parse_body(body_scope)?;
        Ok(Stmt::While(WhileStmt { cond, body, loc }))
    }

    /// `for (init; cond; step) { body }`: one LOOP scope shared by all
    /// four parts, so the induction variable is visible in the body.
    fn parse_for(&mut self) -> ExecResult<Stmt> {
        let loc = self.loc();
        self.bump(); // for
        self.expect(TokenKind::OpenParen, "'('")?;

        let scope = self.scopes.add_child(self.current, ScopeKind::LOOP);
        let saved = self.current;
        self.current = scope;
        let result = self.parse_for_parts(scope, loc);
        self.current = saved;
        result
    }

    fn parse_for_parts(&mut self, scope: ScopeId, loc: CodeLoc) -> ExecResult<Stmt> {
        let init = self.parse_statement()?;
        match init {
            Stmt::VarDecl(_) | Stmt::Assign(_) => {}
            _ => {
                return Err(EngineError::parse("a for loop starts with a declaration or an assignment").at(loc));
            }
        }
        let cond = self.parse_expression(0)?;
        self.expect(TokenKind::Semicolon, "';' after the loop condition")?;
        let step = if self.call_follows() {
            Stmt::Call(self.parse_call(false)?)
        } else {
            self.parse_assign(false)?
        };
        self.expect(TokenKind::CloseParen, "')'")?;

        self.expect(TokenKind::OpenBrace, "'{'")?;
        let mut body = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::CloseBrace => break,
                TokenKind::End => {
                    return Err(EngineError::parse("unexpected end of input inside a loop body").at(self.loc()));
                }
                _ => body.push(self.parse_statement()?),
            }
        }
        self.expect(TokenKind::CloseBrace, "'}'")?;

        Ok(Stmt::For(Box::new(ForStmt {
            scope,
            init,
            cond,
            step,
            body,
            loc,
        })))
    }

    fn parse_return(&mut self) -> ExecResult<Stmt> {
        let tok = self.bump();
        if !self.scopes.get(self.current).kind.contains(ScopeKind::FUNCTION) {
            return Err(EngineError::parse("'return' outside of a function").at(tok.loc()));
        }
        let value = if self.peek_kind() == TokenKind::Semicolon {
            None
        } else {
            Some(self.parse_expression(0)?)
        };
        self.expect(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::Return(ReturnStmt { value, loc: tok.loc() }))
    }

    fn parse_break(&mut self) -> ExecResult<Stmt> {
        let tok = self.bump();
        if !self.scopes.get(self.current).kind.contains(ScopeKind::LOOP) {
            return Err(EngineError::parse("'break' outside of a loop").at(tok.loc()));
        }
        self.expect(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::Break)
    }

    /// `target = expr` or `target op= expr`, the latter desugared into
    /// `target = target op expr` here.
    fn parse_assign(&mut self, expect_semi: bool) -> ExecResult<Stmt> {
        let target = self.parse_name_path()?;
        let op = self.bump();
        let value = match op.kind {
            TokenKind::Assign => self.parse_expression(0)?,
            kind if kind.is_compound_assign() => {
                let (base_kind, base_lexeme) = match kind {
                    TokenKind::PlusAssign => (TokenKind::Plus, "+"),
                    TokenKind::MinusAssign => (TokenKind::Minus, "-"),
                    TokenKind::StarAssign => (TokenKind::Star, "*"),
                    TokenKind::SlashAssign => (TokenKind::Slash, "/"),
                    _ => unreachable!("compound assign checked above"),
                };
                let rhs = self.parse_expression(0)?;
                Expr::Binary {
                    lhs: Box::new(Expr::Name(target.clone())),
                    op: Token::new(base_kind, base_lexeme, op.row, op.col),
                    rhs: Box::new(rhs),
                }
            }
            _ => {
                return Err(EngineError::parse(format!("expected an assignment, found '{}'", op.lexeme)).at(op.loc()));
            }
        };
        if expect_semi {
            self.expect(TokenKind::Semicolon, "';'")?;
        }
        Ok(Stmt::Assign(AssignStmt {
            target,
            value,
            loc: op.loc(),
        }))
    }

    fn parse_call(&mut self, expect_semi: bool) -> ExecResult<CallExpr> {
        let callee = self.parse_name_path()?;
        let loc = callee.loc;
        let args = self.parse_call_args()?;
        if expect_semi {
            self.expect(TokenKind::Semicolon, "';'")?;
        }
        Ok(CallExpr { callee, args, loc })
    }

    fn parse_call_args(&mut self) -> ExecResult<Vec<Expr>> {
        self.expect(TokenKind::OpenParen, "'('")?;
        let mut args = Vec::new();
        if self.peek_kind() != TokenKind::CloseParen {
            loop {
                args.push(self.parse_expression(0)?);
                if self.peek_kind() == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::CloseParen, "')'")?;
        Ok(args)
    }

    /// `ident (('.' | '::') ident)*`; both separators build the same
    /// path.
    fn parse_name_path(&mut self) -> ExecResult<NamePath> {
        let first = self.expect(TokenKind::Identifier, "a name")?;
        let loc = first.loc();
        let mut segments = vec![first.lexeme];
        while matches!(self.peek_kind(), TokenKind::Dot | TokenKind::DoubleColon) {
            self.bump();
            let seg = self.expect(TokenKind::Identifier, "a name after '.'")?;
            segments.push(seg.lexeme);
        }
        Ok(NamePath { segments, loc })
    }

    // === Expressions ===

    /// Pratt loop: keep folding while the next operator binds at least as
    /// tightly as the current floor.
    pub fn parse_expression(&mut self, min_prec: u8) -> ExecResult<Expr> {
        self.enter_depth()?;
        let result = self.parse_expression_inner(min_prec);
        self.leave_depth();
        result
    }

    fn parse_expression_inner(&mut self, min_prec: u8) -> ExecResult<Expr> {
        let mut left = self.parse_primary()?;
        loop {
            let prec = precedence(self.peek_kind());
            if prec == 0 || prec < min_prec {
                break;
            }
            let op = self.bump();
            let right = self.parse_expression(prec)?;
            left = Expr::Binary {
                lhs: Box::new(left),
                op,
                rhs: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> ExecResult<Expr> {
        match self.peek_kind() {
            TokenKind::Integer | TokenKind::Decimal => Ok(Expr::Literal(self.bump())),
            TokenKind::Identifier => {
                let path = self.parse_name_path()?;
                if self.peek_kind() == TokenKind::OpenParen {
                    let loc = path.loc;
                    let args = self.parse_call_args()?;
                    Ok(Expr::Call(CallExpr {
                        callee: path,
                        args,
                        loc,
                    }))
                } else {
                    Ok(Expr::Name(path))
                }
            }
            _ => {
                let tok = self.peek();
                Err(EngineError::parse(format!("expected an expression, found '{}'", tok.lexeme)).at(tok.loc()))
            }
        }
    }
}
