//! Single-pass Pratt compiler
//!
//! Parses and emits bytecode in one pass, no AST. A [`FunctionState`] per
//! function-in-progress tracks local slots, scope depth and upvalue
//! capture; nested function compilations chain through `enclosing`.
//! Errors are printed as they are found and collected into the returned
//! [`CompileError`]; panic mode swallows the cascade until the parser
//! resynchronizes at a statement boundary.

use tracing::trace;

use ember_core::{FunctionKind, Heap, ObjFunction, ObjRef, OpCode, Value};

use crate::scanner::{Scanner, Token, TokenKind};

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_CONSTANTS: usize = 256;
const MAX_LIST_ITEMS: usize = 256;

/// Compilation failed; every diagnostic was also printed to stderr.
#[derive(Debug)]
pub struct CompileError {
    pub diagnostics: Vec<String>,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compilation failed with {} error(s)", self.diagnostics.len())
    }
}

impl std::error::Error for CompileError {}

/// Compile a program. Returns the top-level script function; its chunk is
/// the program body and its name is absent.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, CompileError> {
    let mut compiler = Compiler::new(source, heap);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.emit_return();
    if compiler.had_error {
        return Err(CompileError { diagnostics: compiler.diagnostics });
    }
    trace!(bytes = compiler.state.function.chunk.code.len(), "compiled script");
    let function = compiler.state.function;
    Ok(heap.new_function(function))
}

// =============================================================================
// Precedence and rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Subscript,  // []
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
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
            Precedence::Call => Precedence::Subscript,
            Precedence::Subscript | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Compiler<'src, 'h>, bool);

struct Rule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

// =============================================================================
// Per-function compilation state
// =============================================================================

struct Local<'src> {
    name: &'src str,
    /// Scope depth, or -1 while declared but not yet initialized.
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct Upvalue {
    index: u8,
    is_local: bool,
}

struct FunctionState<'src> {
    enclosing: Option<Box<FunctionState<'src>>>,
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<Upvalue>,
    scope_depth: i32,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        // Slot 0 belongs to the call frame itself: the receiver in a
        // method, otherwise inaccessible.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        FunctionState {
            enclosing: None,
            function: ObjFunction::new(name),
            kind,
            locals: vec![Local { name: slot_zero, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Resolve a name among a function's locals. `Err` carries the
/// self-reference diagnostic.
fn resolve_local_in(state: &FunctionState<'_>, name: &str) -> Result<Option<u8>, &'static str> {
    for (index, local) in state.locals.iter().enumerate().rev() {
        if local.name == name {
            if local.depth == -1 {
                return Err("Can't read local variable in its own initializer.");
            }
            return Ok(Some(index as u8));
        }
    }
    Ok(None)
}

/// Resolve a name as an upvalue: a local of the enclosing function (which
/// becomes captured), or transitively an upvalue of the enclosing
/// function. Duplicate entries collapse to one.
fn resolve_upvalue_in(
    state: &mut FunctionState<'_>,
    name: &str,
) -> Result<Option<u8>, &'static str> {
    let local = {
        let Some(enclosing) = state.enclosing.as_deref_mut() else {
            return Ok(None);
        };
        match resolve_local_in(enclosing, name)? {
            Some(index) => {
                enclosing.locals[index as usize].is_captured = true;
                Some(index)
            }
            None => None,
        }
    };
    if let Some(index) = local {
        return add_upvalue_in(state, index, true).map(Some);
    }

    let upvalue = {
        let Some(enclosing) = state.enclosing.as_deref_mut() else {
            return Ok(None);
        };
        resolve_upvalue_in(enclosing, name)?
    };
    match upvalue {
        Some(index) => add_upvalue_in(state, index, false).map(Some),
        None => Ok(None),
    }
}

fn add_upvalue_in(
    state: &mut FunctionState<'_>,
    index: u8,
    is_local: bool,
) -> Result<u8, &'static str> {
    let candidate = Upvalue { index, is_local };
    for (i, existing) in state.upvalues.iter().enumerate() {
        if *existing == candidate {
            return Ok(i as u8);
        }
    }
    if state.upvalues.len() == MAX_UPVALUES {
        return Err("Too many closure variables in function.");
    }
    state.upvalues.push(candidate);
    state.function.upvalue_count = state.upvalues.len();
    Ok((state.upvalues.len() - 1) as u8)
}

/// Tracks `class` nesting for `this`/`super` validation.
struct ClassState {
    enclosing: Option<Box<ClassState>>,
    has_superclass: bool,
}

// =============================================================================
// The compiler proper
// =============================================================================

struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<String>,
    heap: &'h mut Heap,
    state: Box<FunctionState<'src>>,
    class_state: Option<Box<ClassState>>,
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        let placeholder = Token { kind: TokenKind::Eof, lexeme: "", line: 0 };
        Compiler {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            heap,
            state: Box::new(FunctionState::new(FunctionKind::Script, None)),
            class_state: None,
        }
    }

    // =========================================================================
    // Token plumbing and diagnostics
    // =========================================================================

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let mut diagnostic = format!("[line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => diagnostic.push_str(" at end"),
            // The lexeme of an error token is its message, not source text.
            TokenKind::Error => {}
            _ => {
                diagnostic.push_str(" at '");
                diagnostic.push_str(token.lexeme);
                diagnostic.push('\'');
            }
        }
        diagnostic.push_str(": ");
        diagnostic.push_str(message);
        eprintln!("{diagnostic}");
        self.diagnostics.push(diagnostic);
        self.had_error = true;
    }

    /// Skip to the next statement boundary after an error.
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

    // =========================================================================
    // Emission
    // =========================================================================

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.state.function.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_duo(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_return(&mut self) {
        if self.state.kind == FunctionKind::Initializer {
            // An initializer implicitly returns its receiver.
            self.emit_duo(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        if self.state.function.chunk.constants.len() >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        self.state.function.chunk.add_constant(value) as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_duo(OpCode::Constant, constant);
    }

    /// Emit a forward jump with a placeholder operand; returns the operand
    /// offset for [`Self::patch_jump`].
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.state.function.chunk.code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // Relative to the byte after the two-byte operand.
        let jump = self.state.function.chunk.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let bytes = (jump as u16).to_be_bytes();
        self.state.function.chunk.code[offset] = bytes[0];
        self.state.function.chunk.code[offset + 1] = bytes[1];
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.state.function.chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    // =========================================================================
    // Scopes, locals, upvalues
    // =========================================================================

    fn begin_scope(&mut self) {
        self.state.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state.scope_depth -= 1;
        loop {
            let captured = match self.state.locals.last() {
                Some(local) if local.depth > self.state.scope_depth => local.is_captured,
                _ => break,
            };
            self.state.locals.pop();
            // A captured local migrates into its upvalue instead of
            // vanishing with the stack slot.
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.heap.intern(name);
        self.make_constant(Value::object(interned))
    }

    fn add_local(&mut self, name: &'src str) {
        if self.state.locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.state.locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.state.scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let mut duplicate = false;
        for local in self.state.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.state.scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.state.scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn mark_initialized(&mut self) {
        if self.state.scope_depth == 0 {
            return;
        }
        let depth = self.state.scope_depth;
        if let Some(local) = self.state.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.state.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_duo(OpCode::DefineGlobal, global);
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let (get_op, set_op, argument) = match resolve_local_in(&self.state, name) {
            Err(message) => {
                self.error(message);
                return;
            }
            Ok(Some(slot)) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            Ok(None) => match resolve_upvalue_in(&mut self.state, name) {
                Err(message) => {
                    self.error(message);
                    return;
                }
                Ok(Some(index)) => (OpCode::GetUpvalue, OpCode::SetUpvalue, index),
                Ok(None) => {
                    let constant = self.identifier_constant(name);
                    (OpCode::GetGlobal, OpCode::SetGlobal, constant)
                }
            },
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_duo(set_op, argument);
        } else {
            self.emit_duo(get_op, argument);
        }
    }

    // =========================================================================
    // Pratt machinery
    // =========================================================================

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = Self::rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule(self.current.kind).precedence {
            self.advance();
            let Some(infix) = Self::rule(self.previous.kind).infix else {
                break;
            };
            infix(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn rule(kind: TokenKind) -> Rule<'src, 'h> {
        let (prefix, infix, precedence): (
            Option<ParseFn<'src, 'h>>,
            Option<ParseFn<'src, 'h>>,
            Precedence,
        ) = match kind {
            TokenKind::LeftParen => (Some(Self::grouping), Some(Self::call), Precedence::Call),
            TokenKind::LeftBracket => {
                (Some(Self::list), Some(Self::subscript), Precedence::Subscript)
            }
            TokenKind::Dot => (None, Some(Self::dot), Precedence::Call),
            TokenKind::Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            TokenKind::Plus => (None, Some(Self::binary), Precedence::Term),
            TokenKind::Slash | TokenKind::Star => (None, Some(Self::binary), Precedence::Factor),
            TokenKind::Bang => (Some(Self::unary), None, Precedence::None),
            TokenKind::BangEqual | TokenKind::EqualEqual => {
                (None, Some(Self::binary), Precedence::Equality)
            }
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => (None, Some(Self::binary), Precedence::Comparison),
            TokenKind::Identifier => (Some(Self::variable), None, Precedence::None),
            TokenKind::String => (Some(Self::string), None, Precedence::None),
            TokenKind::Number => (Some(Self::number), None, Precedence::None),
            TokenKind::And => (None, Some(Self::and_operator), Precedence::And),
            TokenKind::Or => (None, Some(Self::or_operator), Precedence::Or),
            TokenKind::False | TokenKind::True | TokenKind::Nil => {
                (Some(Self::literal), None, Precedence::None)
            }
            TokenKind::This => (Some(Self::this_expression), None, Precedence::None),
            TokenKind::Super => (Some(Self::super_expression), None, Precedence::None),
            _ => (None, None, Precedence::None),
        };
        Rule { prefix, infix, precedence }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let interned = self.heap.intern(text);
        self.emit_constant(Value::object(interned));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!("literal() dispatched on a non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary() dispatched on a non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = Self::rule(operator).precedence;
        self.parse_precedence(precedence.next());
        match operator {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!("binary() dispatched on a non-binary token"),
        }
    }

    fn and_operator(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_operator(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_duo(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_duo(OpCode::SetProperty, name);
        } else if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_duo(OpCode::Invoke, name);
            self.emit_byte(argc);
        } else {
            self.emit_duo(OpCode::GetProperty, name);
        }
    }

    fn list(&mut self, _can_assign: bool) {
        let mut item_count: usize = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                // Trailing comma case.
                if self.check(TokenKind::RightBracket) {
                    break;
                }
                self.parse_precedence(Precedence::Or);
                if item_count == MAX_LIST_ITEMS {
                    self.error("Cannot have more than 256 items in a list literal.");
                }
                item_count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after list literal.");
        self.emit_duo(OpCode::ListInit, item_count as u8);
    }

    fn subscript(&mut self, can_assign: bool) {
        self.parse_precedence(Precedence::Or);
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::ListSetIndex);
        } else {
            self.emit_op(OpCode::ListGetIndex);
        }
    }

    fn this_expression(&mut self, _can_assign: bool) {
        if self.class_state.is_none() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable("this", false);
    }

    fn super_expression(&mut self, _can_assign: bool) {
        match &self.class_state {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.");
            }
            Some(_) => {}
        }
        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_duo(OpCode::SuperInvoke, name);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_duo(OpCode::GetSuper, name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    // =========================================================================
    // Declarations and statements
    // =========================================================================

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
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
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Initialized before the body so the function can call itself.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.intern(self.previous.lexeme);
        self.push_function_state(kind, Some(name));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.state.function.arity += 1;
                if self.state.function.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the frame unwinds everything at once on return.
        let (function, upvalues) = self.pop_function_state();
        trace!(
            name = self.heap.string_chars(name),
            upvalues = upvalues.len(),
            "compiled function"
        );
        let function = self.heap.new_function(function);
        let constant = self.make_constant(Value::object(function));
        self.emit_duo(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn push_function_state(&mut self, kind: FunctionKind, name: Option<ObjRef>) {
        let fresh = Box::new(FunctionState::new(kind, name));
        let enclosing = std::mem::replace(&mut self.state, fresh);
        self.state.enclosing = Some(enclosing);
    }

    fn pop_function_state(&mut self) -> (ObjFunction, Vec<Upvalue>) {
        self.emit_return();
        let enclosing = self
            .state
            .enclosing
            .take()
            .unwrap_or_else(|| Box::new(FunctionState::new(FunctionKind::Script, None)));
        let finished = std::mem::replace(&mut self.state, enclosing);
        (finished.function, finished.upvalues)
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_duo(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        let enclosing = self.class_state.take();
        self.class_state = Some(Box::new(ClassState { enclosing, has_superclass: false }));

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // `super` lives in a scope of its own so each subclass body
            // captures its own superclass.
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            if let Some(class) = self.class_state.as_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let has_superclass =
            self.class_state.as_ref().map(|class| class.has_superclass).unwrap_or(false);
        if has_superclass {
            self.end_scope();
        }
        self.class_state = self.class_state.take().and_then(|class| class.enclosing);
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_duo(OpCode::Method, constant);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn return_statement(&mut self) {
        if self.state.kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.state.kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.state.function.chunk.code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.state.function.chunk.code.len();

        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            // The increment textually precedes the body but runs after
            // it: jump over it into the body, loop back to it at the end
            // of each iteration, and from it back to the condition.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.state.function.chunk.code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::debug::disassemble_chunk;
    use ember_core::{Obj, OpCode};

    fn compile_ok(source: &str) -> (Heap, ObjRef) {
        let mut heap = Heap::new();
        let function = compile(source, &mut heap).expect("program should compile");
        (heap, function)
    }

    fn compile_err(source: &str) -> Vec<String> {
        let mut heap = Heap::new();
        compile(source, &mut heap).expect_err("program should not compile").diagnostics
    }

    fn listing(source: &str) -> String {
        let (heap, function) = compile_ok(source);
        disassemble_chunk(&heap, &heap.function(function).chunk, "script")
    }

    #[test]
    fn test_expression_statement_bytecode() {
        let listing = listing("1 + 2;");
        assert!(listing.contains("CONSTANT"), "{listing}");
        assert!(listing.contains("ADD"), "{listing}");
        assert!(listing.contains("POP"), "{listing}");
        assert!(listing.contains("RETURN"), "{listing}");
    }

    #[test]
    fn test_print_statement() {
        let listing = listing("print 1;");
        assert!(listing.contains("PRINT"), "{listing}");
    }

    #[test]
    fn test_global_define_and_get() {
        let listing = listing("var x = 1; print x;");
        assert!(listing.contains("DEFINE_GLOBAL"), "{listing}");
        assert!(listing.contains("GET_GLOBAL"), "{listing}");
    }

    #[test]
    fn test_locals_use_slots_not_names() {
        let listing = listing("{ var x = 1; print x; }");
        assert!(listing.contains("GET_LOCAL"), "{listing}");
        assert!(!listing.contains("GET_GLOBAL"), "{listing}");
    }

    #[test]
    fn test_comparison_operators_compose() {
        let listing = listing("1 <= 2;");
        // <= is compiled as > followed by not.
        assert!(listing.contains("GREATER"), "{listing}");
        assert!(listing.contains("NOT"), "{listing}");
    }

    #[test]
    fn test_jump_operand_decodes_to_distance() {
        let (heap, function) = compile_ok("if (true) { print 1; }");
        let chunk = &heap.function(function).chunk;
        let mut offset = 0;
        let mut checked = 0;
        while offset < chunk.code.len() {
            let op = OpCode::from_byte(chunk.code[offset]);
            match op {
                OpCode::Jump | OpCode::JumpIfFalse => {
                    let operand =
                        u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]);
                    let target = offset + 3 + operand as usize;
                    assert!(target <= chunk.code.len(), "jump target escapes the chunk");
                    assert_eq!(operand as usize, target - (offset + 3));
                    checked += 1;
                    offset += 3;
                }
                OpCode::Constant => offset += 2,
                _ => offset += 1,
            }
        }
        assert!(checked >= 2, "if statement should emit two jumps");
    }

    #[test]
    fn test_loop_jumps_backward() {
        let (heap, function) = compile_ok("while (true) { print 1; }");
        let chunk = &heap.function(function).chunk;
        let mut found = false;
        let mut offset = 0;
        while offset < chunk.code.len() {
            let op = OpCode::from_byte(chunk.code[offset]);
            match op {
                OpCode::Loop => {
                    let operand =
                        u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]);
                    // Jumps back over its own operand to the loop start.
                    assert!(operand as usize >= 3);
                    assert!(offset + 3 >= operand as usize);
                    found = true;
                    offset += 3;
                }
                OpCode::Jump | OpCode::JumpIfFalse => offset += 3,
                OpCode::Constant => offset += 2,
                _ => offset += 1,
            }
        }
        assert!(found, "while should emit LOOP");
    }

    #[test]
    fn test_closure_upvalue_counts() {
        let (heap, function) = compile_ok(
            "fun outer() { var x = 1; fun inner() { return x; } return inner; }",
        );
        // Find the compiled functions among the script's constants.
        let chunk = &heap.function(function).chunk;
        let mut inner_seen = false;
        for constant in &chunk.constants {
            if constant.is_obj()
                && let Obj::Function(outer) = heap.get(constant.as_obj())
            {
                assert_eq!(outer.upvalue_count, 0);
                for inner_constant in &outer.chunk.constants {
                    if inner_constant.is_obj()
                        && let Obj::Function(inner) = heap.get(inner_constant.as_obj())
                    {
                        assert_eq!(inner.upvalue_count, 1);
                        inner_seen = true;
                    }
                }
            }
        }
        assert!(inner_seen, "inner function should be a chunk constant");
    }

    #[test]
    fn test_captured_local_closes_on_scope_exit() {
        let listing = listing("{ var x = 1; fun f() { return x; } }");
        assert!(listing.contains("CLOSE_UPVALUE"), "{listing}");
    }

    #[test]
    fn test_class_with_method_and_super() {
        let listing = listing(
            "class A { m() { return 1; } } class B < A { m() { return super.m(); } }",
        );
        assert!(listing.contains("CLASS"), "{listing}");
        assert!(listing.contains("METHOD"), "{listing}");
        assert!(listing.contains("INHERIT"), "{listing}");
    }

    #[test]
    fn test_list_literal_and_subscript() {
        let listing = listing("var xs = [1, 2,]; xs[0] = xs[1];");
        assert!(listing.contains("LIST_INIT"), "{listing}");
        assert!(listing.contains("LIST_GETIDX"), "{listing}");
        assert!(listing.contains("LIST_SETIDX"), "{listing}");
    }

    #[test]
    fn test_string_literals_are_interned_at_compile_time() {
        let (mut heap, _function) = compile_ok("var a = \"text\"; var b = \"text\";");
        let objects_before = heap.live_objects();
        heap.intern("text");
        assert_eq!(heap.live_objects(), objects_before, "re-interning must not allocate");
    }

    #[test]
    fn test_error_duplicate_local() {
        let diagnostics = compile_err("{ var a = 1; var a = 2; }");
        assert!(
            diagnostics
                .iter()
                .any(|d| d.contains("Already a variable with this name in this scope."))
        );
    }

    #[test]
    fn test_error_read_in_own_initializer() {
        let diagnostics = compile_err("{ var a = a; }");
        assert!(
            diagnostics
                .iter()
                .any(|d| d.contains("Can't read local variable in its own initializer."))
        );
    }

    #[test]
    fn test_error_invalid_assignment_target() {
        let diagnostics = compile_err("1 + 2 = 3;");
        assert!(diagnostics.iter().any(|d| d.contains("Invalid assignment target.")));
    }

    #[test]
    fn test_error_return_at_top_level() {
        let diagnostics = compile_err("return 1;");
        assert!(diagnostics.iter().any(|d| d.contains("Can't return from top-level code.")));
    }

    #[test]
    fn test_error_this_outside_class() {
        let diagnostics = compile_err("print this;");
        assert!(diagnostics.iter().any(|d| d.contains("Can't use 'this' outside of a class.")));
    }

    #[test]
    fn test_error_super_without_superclass() {
        let diagnostics = compile_err("class A { m() { return super.m(); } }");
        assert!(
            diagnostics
                .iter()
                .any(|d| d.contains("Can't use 'super' in a class with no superclass."))
        );
    }

    #[test]
    fn test_error_self_inheritance() {
        let diagnostics = compile_err("class A < A {}");
        assert!(diagnostics.iter().any(|d| d.contains("A class can't inherit from itself.")));
    }

    #[test]
    fn test_error_init_returning_value() {
        let diagnostics = compile_err("class A { init() { return 1; } }");
        assert!(
            diagnostics
                .iter()
                .any(|d| d.contains("Can't return a value from an initializer."))
        );
    }

    #[test]
    fn test_error_format_carries_line_and_lexeme() {
        let diagnostics = compile_err("var 1;\n");
        assert!(diagnostics.iter().any(|d| d.starts_with("[line 1] Error at '1'")), "{diagnostics:?}");
    }

    #[test]
    fn test_panic_mode_suppresses_cascades() {
        // Both statements are bad; resync at the ';' lets the second report.
        let diagnostics = compile_err("var 1; var 2;");
        assert_eq!(diagnostics.len(), 2, "{diagnostics:?}");
    }

    #[test]
    fn test_unterminated_string_diagnostic() {
        let diagnostics = compile_err("var a = \"oops;");
        assert!(diagnostics.iter().any(|d| d.contains("Unterminated string.")));
    }
}
