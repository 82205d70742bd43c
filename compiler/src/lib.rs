//! A single-pass Pratt compiler: no intermediate AST. Every grammar
//! production emits bytecode directly into the chunk of the function
//! currently being compiled.

mod error;

pub use error::CompileError;

use lexer::{Scanner, Token, TokenKind};
use std::rc::Rc;
use vmcore::diagnostics::{Report, Reporter};
use vmcore::object::{Function, Obj};
use vmcore::opcode::OpCode;
use vmcore::table::Interner;
use vmcore::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < <= > >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn higher(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }

    fn of(kind: TokenKind) -> Precedence {
        match kind {
            TokenKind::Minus | TokenKind::Plus => Precedence::Term,
            TokenKind::Slash | TokenKind::Star => Precedence::Factor,
            TokenKind::BangEqual | TokenKind::EqualEqual => Precedence::Equality,
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => Precedence::Comparison,
            TokenKind::And => Precedence::And,
            TokenKind::Or => Precedence::Or,
            TokenKind::LeftParen => Precedence::Call,
            _ => Precedence::None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
}

struct Local {
    name: String,
    /// `-1` means "declared but not yet initialized" — reading it is an error.
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct CompilerState {
    function: Function,
    function_type: FunctionType,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

enum LocalResolution {
    Found(u8),
    Uninitialized,
    NotFound,
}

fn resolve_local(state: &CompilerState, name: &str) -> LocalResolution {
    for (i, local) in state.locals.iter().enumerate().rev() {
        if local.name == name {
            return if local.depth == -1 {
                LocalResolution::Uninitialized
            } else {
                LocalResolution::Found(i as u8)
            };
        }
    }
    LocalResolution::NotFound
}

/// Single-pass Pratt compiler. Holds a stack of [`CompilerState`] — one per
/// function currently being compiled, innermost last — instead of a chain of
/// `enclosing` pointers: resolving an upvalue walks this stack by index,
/// which sidesteps the borrow-checker friction a linked chain of mutable
/// parents would otherwise cause.
struct Compiler<'src, 'rep> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    reporter: &'rep mut dyn Reporter,
    interner: &'rep mut Interner,
    compilers: Vec<CompilerState>,
}

impl<'src, 'rep> Compiler<'src, 'rep> {
    fn new(source: &'src str, interner: &'rep mut Interner, reporter: &'rep mut dyn Reporter) -> Self {
        let mut compiler = Self {
            scanner: Scanner::new(source),
            current: Token::new(TokenKind::Eof, "", 0),
            previous: Token::new(TokenKind::Eof, "", 0),
            had_error: false,
            panic_mode: false,
            reporter,
            interner,
            compilers: Vec::new(),
        };
        compiler.push_compiler(FunctionType::Script, None);
        compiler.advance();
        compiler
    }

    fn push_compiler(&mut self, function_type: FunctionType, name: Option<Rc<str>>) {
        let mut state = CompilerState {
            function: Function {
                arity: 0,
                upvalue_count: 0,
                chunk: vmcore::chunk::Chunk::new(),
                name,
            },
            function_type,
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
        };
        // Slot 0 is reserved for the callee's own Closure, matching the
        // invariant that `frame.slots[0]` always holds it.
        state.locals.push(Local {
            name: String::new(),
            depth: 0,
            is_captured: false,
        });
        self.compilers.push(state);
    }

    fn end_compiler(&mut self) -> (Function, Vec<UpvalueDesc>) {
        self.emit_return();
        let state = self.compilers.pop().unwrap();
        (state.function, state.upvalues)
    }

    fn current_chunk(&mut self) -> &mut vmcore::chunk::Chunk {
        &mut self.compilers.last_mut().unwrap().function.chunk
    }

    // -- token stream -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let msg = self.current.lexeme.to_string();
            self.error_at_current(CompileError::Lexical(msg));
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &'static str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(CompileError::Expect(message));
        }
    }

    // -- diagnostics --------------------------------------------------------

    fn error(&mut self, error: CompileError) {
        let token = self.previous;
        self.error_at(token, error);
    }

    fn error_at_current(&mut self, error: CompileError) {
        let token = self.current;
        self.error_at(token, error);
    }

    fn error_at(&mut self, token: Token<'src>, error: CompileError) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let at = if token.kind == TokenKind::Eof {
            None
        } else {
            Some(token.lexeme.to_string())
        };
        self.reporter.report(Report::Compile {
            line: token.line,
            at,
            message: error.to_string(),
        });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // -- bytecode emission --------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn emit_opcode(&mut self, op: OpCode) {
        self.emit_byte(op.into());
    }

    fn emit_return(&mut self) {
        self.emit_opcode(OpCode::Nil);
        self.emit_opcode(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let result = self.current_chunk().add_constant(value);
        match result {
            Ok(idx) if idx <= u8::MAX as u16 => idx as u8,
            Ok(_) => {
                self.error(CompileError::TooManyConstants);
                0
            }
            Err(_message) => {
                self.error(CompileError::TooManyConstants);
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_bytes(OpCode::Constant.into(), idx);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_opcode(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error(CompileError::JumpTooLarge);
            return;
        }
        self.current_chunk().patch_u16(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_opcode(OpCode::Loop);
        let offset = self.current_chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error(CompileError::JumpTooLarge);
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    // -- scopes & variables --------------------------------------------------

    fn begin_scope(&mut self) {
        self.compilers.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let depth = {
            let state = self.compilers.last_mut().unwrap();
            state.scope_depth -= 1;
            state.scope_depth
        };
        loop {
            let should_pop = {
                let state = self.compilers.last().unwrap();
                matches!(state.locals.last(), Some(local) if local.depth > depth)
            };
            if !should_pop {
                break;
            }
            let captured = self
                .compilers
                .last_mut()
                .unwrap()
                .locals
                .pop()
                .unwrap()
                .is_captured;
            if captured {
                self.emit_opcode(OpCode::CloseUpvalue);
            } else {
                self.emit_opcode(OpCode::Pop);
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let handle = self.interner.intern(name);
        self.make_constant(Value::Obj(Obj::Str(handle)))
    }

    fn declare_variable(&mut self) {
        let scope_depth = self.compilers.last().unwrap().scope_depth;
        if scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.to_string();
        let duplicate = {
            let state = self.compilers.last().unwrap();
            let mut found = false;
            for local in state.locals.iter().rev() {
                if local.depth != -1 && local.depth < scope_depth {
                    break;
                }
                if local.name == name {
                    found = true;
                    break;
                }
            }
            found
        };
        if duplicate {
            self.error(CompileError::DuplicateLocal);
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: String) {
        let too_many = self.compilers.last().unwrap().locals.len() >= 256;
        if too_many {
            self.error(CompileError::TooManyLocals);
            return;
        }
        self.compilers.last_mut().unwrap().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn parse_variable(&mut self, message: &'static str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.compilers.last().unwrap().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.to_string();
        self.identifier_constant(&name)
    }

    fn mark_initialized(&mut self) {
        let state = self.compilers.last_mut().unwrap();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        state.locals.last_mut().unwrap().depth = depth;
    }

    fn define_variable(&mut self, global: u8) {
        if self.compilers.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal.into(), global);
    }

    fn resolve_upvalue(&mut self, idx: usize, name: &str) -> Option<u8> {
        if idx == 0 {
            return None;
        }
        let enclosing = idx - 1;
        match resolve_local(&self.compilers[enclosing], name) {
            LocalResolution::Found(local_idx) => {
                self.compilers[enclosing].locals[local_idx as usize].is_captured = true;
                Some(self.add_upvalue(idx, local_idx, true))
            }
            LocalResolution::Uninitialized => {
                self.error(CompileError::SelfReferentialInitializer);
                None
            }
            LocalResolution::NotFound => {
                let upvalue_idx = self.resolve_upvalue(enclosing, name)?;
                Some(self.add_upvalue(idx, upvalue_idx, false))
            }
        }
    }

    fn add_upvalue(&mut self, idx: usize, index: u8, is_local: bool) -> u8 {
        let existing = self.compilers[idx]
            .upvalues
            .iter()
            .position(|uv| uv.index == index && uv.is_local == is_local);
        if let Some(i) = existing {
            return i as u8;
        }
        let count = self.compilers[idx].upvalues.len();
        if count >= 256 {
            self.error(CompileError::TooManyUpvalues);
            return 0;
        }
        let state = &mut self.compilers[idx];
        state.upvalues.push(UpvalueDesc { index, is_local });
        state.function.upvalue_count = state.upvalues.len() as u8;
        (state.upvalues.len() - 1) as u8
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let cur = self.compilers.len() - 1;
        let (get_op, set_op, arg) = match resolve_local(&self.compilers[cur], name) {
            LocalResolution::Found(i) => (OpCode::GetLocal, OpCode::SetLocal, i),
            LocalResolution::Uninitialized => {
                self.error(CompileError::SelfReferentialInitializer);
                (OpCode::GetLocal, OpCode::SetLocal, 0)
            }
            LocalResolution::NotFound => match self.resolve_upvalue(cur, name) {
                Some(i) => (OpCode::GetUpvalue, OpCode::SetUpvalue, i),
                None => {
                    let idx = self.identifier_constant(name);
                    (OpCode::GetGlobal, OpCode::SetGlobal, idx)
                }
            },
        };

        if can_assign && self.match_(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op.into(), arg);
        } else {
            self.emit_bytes(get_op.into(), arg);
        }
    }

    // -- expressions ----------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix_rule(self.previous.kind, can_assign) {
            self.error(CompileError::ExpectExpression);
            return;
        }
        while precedence <= Precedence::of(self.current.kind) {
            self.advance();
            self.infix_rule(self.previous.kind);
        }
        if can_assign && self.match_(TokenKind::Equal) {
            self.error(CompileError::InvalidAssignmentTarget);
        }
    }

    fn prefix_rule(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::False | TokenKind::Nil | TokenKind::True => self.literal(),
            TokenKind::Identifier => self.variable(can_assign),
            _ => return false,
        }
        true
    }

    fn infix_rule(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::BangEqual
            | TokenKind::EqualEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => self.binary(),
            TokenKind::LeftParen => self.call(),
            TokenKind::And => self.and(),
            TokenKind::Or => self.or(),
            _ => unreachable!("token {kind:?} has no infix rule"),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_opcode(OpCode::Negate),
            TokenKind::Bang => self.emit_opcode(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self) {
        let operator = self.previous.kind;
        let rule_prec = Precedence::of(operator);
        self.parse_precedence(rule_prec.higher());
        match operator {
            TokenKind::BangEqual => {
                self.emit_opcode(OpCode::Equal);
                self.emit_opcode(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_opcode(OpCode::Equal),
            TokenKind::Greater => self.emit_opcode(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_opcode(OpCode::Less);
                self.emit_opcode(OpCode::Not);
            }
            TokenKind::Less => self.emit_opcode(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_opcode(OpCode::Greater);
                self.emit_opcode(OpCode::Not);
            }
            TokenKind::Plus => self.emit_opcode(OpCode::Add),
            TokenKind::Minus => self.emit_opcode(OpCode::Subtract),
            TokenKind::Star => self.emit_opcode(OpCode::Multiply),
            TokenKind::Slash => self.emit_opcode(OpCode::Divide),
            _ => unreachable!(),
        }
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_bytes(OpCode::Call.into(), argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error(CompileError::TooManyArguments);
                }
                argc += 1;
                if !self.match_(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_opcode(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_opcode(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().expect("scanner only emits valid numbers");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let raw = self.previous.lexeme;
        let content = &raw[1..raw.len() - 1];
        let handle = self.interner.intern(content);
        self.emit_constant(Value::Obj(Obj::Str(handle)));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::False => self.emit_opcode(OpCode::False),
            TokenKind::Nil => self.emit_opcode(OpCode::Nil),
            TokenKind::True => self.emit_opcode(OpCode::True),
            _ => unreachable!(),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme.to_string();
        self.named_variable(&name, can_assign);
    }

    // -- statements -----------------------------------------------------------

    fn declaration(&mut self) {
        if self.match_(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        let name = self.previous.lexeme.to_string();
        self.mark_initialized();
        self.function(name, FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, name: String, function_type: FunctionType) {
        let name_handle = self.interner.intern(&name);
        self.push_compiler(function_type, Some(name_handle));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let arity = {
                    let state = self.compilers.last_mut().unwrap();
                    state.function.arity += 1;
                    state.function.arity
                };
                if arity > 255 {
                    self.error_at_current(CompileError::TooManyParameters);
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_compiler();
        let upvalue_count = function.upvalue_count;
        let idx = self.make_constant(Value::Obj(Obj::Function(Rc::new(function))));
        self.emit_bytes(OpCode::Closure.into(), idx);
        for uv in upvalues.into_iter().take(upvalue_count as usize) {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_opcode(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_(TokenKind::Print) {
            self.print_statement();
        } else if self.match_(TokenKind::For) {
            self.for_statement();
        } else if self.match_(TokenKind::If) {
            self.if_statement();
        } else if self.match_(TokenKind::Return) {
            self.return_statement();
        } else if self.match_(TokenKind::While) {
            self.while_statement();
        } else if self.match_(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_opcode(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.compilers.last().unwrap().function_type == FunctionType::Script {
            self.error(CompileError::ReturnFromTopLevel);
        }
        if self.match_(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_opcode(OpCode::Return);
        }
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_opcode(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_opcode(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_opcode(OpCode::Pop);

        if self.match_(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_opcode(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_opcode(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump = None;
        if !self.match_(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_opcode(OpCode::Pop);
        }

        if !self.match_(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_opcode(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_opcode(OpCode::Pop);
        }
        self.end_scope();
    }
}

/// Compiles `source` into the top-level script `Function`, or `None` if any
/// compile error was reported. String constants and global/variable names
/// are interned through `interner`, which callers share with the VM that
/// will execute the result so that identity-based string equality holds
/// across compile time and run time.
pub fn compile(source: &str, interner: &mut Interner, reporter: &mut dyn Reporter) -> Option<Function> {
    let mut compiler = Compiler::new(source, interner, reporter);
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.consume(TokenKind::Eof, "Expect end of expression.");
    let had_error = compiler.had_error;
    let (function, _upvalues) = compiler.end_compiler();
    if had_error {
        None
    } else {
        Some(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmcore::diagnostics::VecReporter;

    fn try_compile(source: &str) -> (Option<Function>, VecReporter) {
        let mut interner = Interner::new();
        let mut reporter = VecReporter::default();
        let function = compile(source, &mut interner, &mut reporter);
        (function, reporter)
    }

    fn first_message(reporter: &VecReporter) -> String {
        match &reporter.reports[0] {
            Report::Compile { message, .. } => message.clone(),
            Report::Runtime { message, .. } => message.clone(),
        }
    }

    #[test]
    fn compiles_a_simple_expression_statement() {
        let (function, reporter) = try_compile("1 + 2 * 3;");
        assert!(!reporter.had_error());
        assert!(function.is_some());
    }

    #[test]
    fn rejects_return_from_top_level() {
        let (function, reporter) = try_compile("return 1;");
        assert!(function.is_none());
        assert_eq!(first_message(&reporter), "Can't return from top-level code.");
    }

    #[test]
    fn rejects_duplicate_local_in_same_scope() {
        let (function, reporter) = try_compile("{ var a = 1; var a = 2; }");
        assert!(function.is_none());
        assert_eq!(
            first_message(&reporter),
            "Already a variable with this name in this scope."
        );
    }

    #[test]
    fn rejects_reading_local_in_its_own_initializer() {
        let (function, reporter) = try_compile("{ var a = a; }");
        assert!(function.is_none());
        assert_eq!(
            first_message(&reporter),
            "Can't read local variable in its own initializer."
        );
    }

    #[test]
    fn rejects_invalid_assignment_target() {
        let (function, reporter) = try_compile("1 + 2 = 3;");
        assert!(function.is_none());
        assert_eq!(first_message(&reporter), "Invalid assignment target.");
    }

    #[test]
    fn allows_recursive_function_declarations() {
        let (function, reporter) =
            try_compile("fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }");
        assert!(!reporter.had_error());
        assert!(function.is_some());
    }

    #[test]
    fn shadowing_in_nested_scope_is_allowed() {
        let (function, reporter) =
            try_compile("var x = 1; { var x = 2; print x; } print x;");
        assert!(!reporter.had_error());
        assert!(function.is_some());
    }

    #[test]
    fn panic_mode_suppresses_cascading_errors_until_synchronize() {
        let (_function, reporter) = try_compile("var ; var ; print 1;");
        // two independent `Expect variable name.` errors, not a cascade of
        // every token in between.
        assert_eq!(reporter.reports.len(), 2);
    }
}
