//! Single-pass Pratt compiler: reads tokens one at a time and emits bytecode
//! directly, with no intermediate parse tree. Scope/local/upvalue resolution,
//! control-flow jump patching, and class/method compilation all happen inline
//! as the token stream is consumed.

use crate::chunk::Chunk;
use crate::diagnostic::Diagnostic;
use crate::heap::{Heap, Obj, ObjFunction, ObjId};
use crate::lexer::Lexer;
use crate::opcode::Opcode;
use crate::table::{fnv1a_hash, InternTable};
use crate::token::{Token, TokenKind};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
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
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn = fn(&mut Compiler<'_>, bool);

struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

fn get_rule(kind: TokenKind) -> ParseRule {
    use TokenKind::*;
    let (prefix, infix, precedence): (Option<ParseFn>, Option<ParseFn>, Precedence) = match kind {
        LeftParen => (Some(grouping), Some(call), Precedence::Call),
        Dot => (None, Some(dot), Precedence::Call),
        Minus => (Some(unary), Some(binary), Precedence::Term),
        Plus => (None, Some(binary), Precedence::Term),
        Slash => (None, Some(binary), Precedence::Factor),
        Star => (None, Some(binary), Precedence::Factor),
        Bang => (Some(unary), None, Precedence::None),
        BangEqual => (None, Some(binary), Precedence::Equality),
        EqualEqual => (None, Some(binary), Precedence::Equality),
        Greater => (None, Some(binary), Precedence::Comparison),
        GreaterEqual => (None, Some(binary), Precedence::Comparison),
        Less => (None, Some(binary), Precedence::Comparison),
        LessEqual => (None, Some(binary), Precedence::Comparison),
        Identifier => (Some(variable), None, Precedence::None),
        String => (Some(string_literal), None, Precedence::None),
        Number => (Some(number), None, Precedence::None),
        And => (None, Some(and_), Precedence::And),
        False => (Some(literal), None, Precedence::None),
        Null => (Some(literal), None, Precedence::None),
        Or => (None, Some(or_), Precedence::Or),
        Super => (Some(super_), None, Precedence::None),
        This => (Some(this_), None, Precedence::None),
        True => (Some(literal), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    ParseRule { prefix, infix, precedence }
}

#[derive(Debug, Clone)]
struct Local {
    name: String,
    depth: i32,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy)]
struct UpvalueCapture {
    index: u8,
    is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Function,
    Initializer,
    Method,
    Script,
}

struct FunctionFrame {
    function_type: FunctionType,
    chunk: Chunk,
    name: Option<String>,
    arity: u8,
    locals: Vec<Local>,
    scope_depth: i32,
    upvalues: Vec<UpvalueCapture>,
}

impl FunctionFrame {
    fn new(function_type: FunctionType, name: Option<String>) -> Self {
        let receiver_name = if function_type == FunctionType::Function { "" } else { "this" };
        Self {
            function_type,
            chunk: Chunk::new(),
            name,
            arity: 0,
            // Slot 0 is always reserved: the receiver for methods/initializers,
            // an unaddressable placeholder for plain functions and the script.
            locals: vec![Local { name: receiver_name.to_string(), depth: 0, is_captured: false }],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

pub struct Compiler<'src> {
    lexer: Lexer<'src>,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
    heap: &'src mut Heap,
    interns: &'src mut InternTable,
    functions: Vec<FunctionFrame>,
    classes: Vec<ClassState>,
}

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 255;

impl<'src> Compiler<'src> {
    /// Compiles `source` into a top-level `Function` object, returning its
    /// handle in `heap`. On any compile error, returns the collected
    /// diagnostics instead (the first one is always present and stable).
    ///
    /// `interns` is shared with the VM so that identifier and string-literal
    /// constants compiled here reduce to the same handles the VM allocates
    /// for equal-content strings created at runtime.
    pub fn compile(source: &'src str, heap: &'src mut Heap, interns: &'src mut InternTable) -> Result<ObjId, Vec<Diagnostic>> {
        let lexer = Lexer::new(source);
        let mut compiler = Compiler {
            lexer,
            previous: Token::synthetic(TokenKind::Eof, ""),
            current: Token::synthetic(TokenKind::Eof, ""),
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            heap,
            interns,
            functions: vec![FunctionFrame::new(FunctionType::Script, None)],
            classes: Vec::new(),
        };

        compiler.advance();
        while !compiler.match_token(TokenKind::Eof) {
            compiler.declaration();
        }
        let function_id = compiler.end_function();

        if compiler.had_error {
            Err(compiler.diagnostics)
        } else {
            Ok(function_id)
        }
    }

    // ---- token stream plumbing ----------------------------------------

    fn advance(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.clone();
            self.error_at_current(&message);
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

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let location = match token.kind {
            TokenKind::Eof => Some(" at end".to_string()),
            TokenKind::Error => None,
            _ => Some(format!(" at '{}'", token.lexeme)),
        };
        self.diagnostics.push(Diagnostic::compile_error(token.line, location, message));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            use TokenKind::*;
            match self.current.kind {
                Class | Fun | Var | For | If | While | Print | Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- emission helpers -----------------------------------------------

    fn frame(&mut self) -> &mut FunctionFrame {
        self.functions.last_mut().expect("at least the script frame is always present")
    }

    fn line(&self) -> u32 {
        self.previous.line
    }

    fn emit_u8(&mut self, byte: u8) {
        let line = self.line();
        self.frame().chunk.write_u8(byte, line);
    }

    fn emit_op(&mut self, op: Opcode) {
        self.emit_u8(op as u8);
    }

    fn emit_op_u8(&mut self, op: Opcode, operand: u8) {
        self.emit_op(op);
        self.emit_u8(operand);
    }

    fn emit_return(&mut self) {
        if self.frame().function_type == FunctionType::Initializer {
            self.emit_op_u8(Opcode::GetLocal, 0);
        } else {
            self.emit_op(Opcode::Null);
        }
        self.emit_op(Opcode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        if self.frame().chunk.constants.len() >= 256 {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        self.frame().chunk.add_constant(value)
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_op_u8(Opcode::Constant, idx);
    }

    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit_op(op);
        let line = self.line();
        self.frame().chunk.write_u16(0xFFFF, line);
        self.frame().chunk.current_offset() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        if let Err(message) = self.frame().chunk.patch_jump(offset) {
            self.error(&message);
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Opcode::Loop);
        let jump = self.frame().chunk.current_offset() - loop_start + 2;
        if jump > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let line = self.line();
        self.frame().chunk.write_u16(jump as u16, line);
    }

    fn intern(&mut self, text: &str) -> ObjId {
        let bytes = text.as_bytes();
        let hash = fnv1a_hash(bytes);
        if let Some(id) = self.interns.find(bytes, hash) {
            return id;
        }
        let id = self.heap.alloc(Obj::String { bytes: bytes.to_vec(), hash });
        self.interns.insert(bytes.to_vec(), hash, id);
        id
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let id = self.intern(name);
        self.make_constant(Value::Obj(id))
    }

    // ---- scope & locals ---------------------------------------------------

    fn begin_scope(&mut self) {
        self.frame().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.frame().scope_depth -= 1;
        let depth = self.frame().scope_depth;
        while let Some(local) = self.frame().locals.last() {
            if local.depth <= depth {
                break;
            }
            let captured = local.is_captured;
            self.frame().locals.pop();
            if captured {
                self.emit_op(Opcode::CloseUpvalue);
            } else {
                self.emit_op(Opcode::Pop);
            }
        }
    }

    fn push_local_named(&mut self, name: String) {
        if self.frame().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.frame().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.frame().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.clone();
        let scope_depth = self.frame().scope_depth;
        let mut duplicate = false;
        for local in self.frame().locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
            return;
        }
        self.push_local_named(name);
    }

    fn parse_variable(&mut self, error_message: &str) -> u8 {
        self.consume(TokenKind::Identifier, error_message);
        self.declare_variable();
        if self.frame().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.clone();
        self.identifier_constant(&name)
    }

    fn mark_initialized(&mut self) {
        if self.frame().scope_depth == 0 {
            return;
        }
        let depth = self.frame().scope_depth;
        if let Some(local) = self.frame().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.frame().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_u8(Opcode::DefineGlobal, global);
    }

    fn resolve_local(&self, level: usize, name: &str) -> Option<(usize, bool)> {
        let frame = &self.functions[level];
        for (i, local) in frame.locals.iter().enumerate().rev() {
            if local.name == name {
                return Some((i, local.depth == -1));
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        let enclosing = level - 1;
        if let Some((local_idx, uninitialized)) = self.resolve_local(enclosing, name) {
            if uninitialized {
                self.error("Can't read local variable in its own initializer.");
            }
            self.functions[enclosing].locals[local_idx].is_captured = true;
            return Some(self.add_upvalue(level, local_idx as u8, true));
        }
        if let Some(upvalue_idx) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(level, upvalue_idx, false));
        }
        None
    }

    fn add_upvalue(&mut self, level: usize, index: u8, is_local: bool) -> u8 {
        let upvalues = &mut self.functions[level].upvalues;
        for (i, uv) in upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u8;
            }
        }
        if upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        upvalues.push(UpvalueCapture { index, is_local });
        (upvalues.len() - 1) as u8
    }

    // ---- function & class bodies -------------------------------------------

    fn end_function(&mut self) -> ObjId {
        self.emit_return();
        let frame = self.functions.pop().expect("frame pushed at function() start");
        let name_id = frame.name.as_ref().map(|n| self.intern(n));
        let function = ObjFunction {
            arity: frame.arity,
            upvalue_count: frame.upvalues.len() as u8,
            chunk: frame.chunk,
            name: name_id,
        };
        self.heap.alloc(Obj::Function(function))
    }

    fn function(&mut self, function_type: FunctionType) {
        let name = self.previous.lexeme.clone();
        self.functions.push(FunctionFrame::new(function_type, Some(name)));

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.frame().arity += 1;
                if self.frame().arity > 255 {
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

        let upvalues = self.functions.last().unwrap().upvalues.clone();
        let function_id = self.end_function();
        let idx = self.make_constant(Value::Obj(function_id));
        self.emit_op_u8(Opcode::Closure, idx);
        for uv in upvalues {
            self.emit_u8(if uv.is_local { 1 } else { 0 });
            self.emit_u8(uv.index);
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme.clone();
        let name_const = self.identifier_constant(&name);
        let function_type = if name == "init" { FunctionType::Initializer } else { FunctionType::Method };
        self.function(function_type);
        self.emit_op_u8(Opcode::Method, name_const);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.clone();
        let name_const = self.identifier_constant(&class_name.lexeme);
        self.declare_variable();

        self.emit_op_u8(Opcode::Class, name_const);
        self.define_variable(name_const);

        self.classes.push(ClassState { has_superclass: false });

        if self.match_token(TokenKind::LeftParen) {
            self.consume(TokenKind::Identifier, "Expect superclass name to inherit from.");
            let superclass_name = self.previous.clone();
            variable(self, false);

            if superclass_name.lexeme == class_name.lexeme {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.push_local_named("super".to_string());
            self.mark_initialized();

            self.named_variable(class_name.clone(), false);
            self.consume(TokenKind::RightParen, "Expected closing ')' parenthesis for declaring superclass for inheritance.");
            self.emit_op(Opcode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(Opcode::Pop);

        let class_state = self.classes.pop().unwrap();
        if class_state.has_superclass {
            self.end_scope();
        }
    }

    // ---- statements -----------------------------------------------------

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(Opcode::Null);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(Opcode::Pop);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(Opcode::Print);
    }

    fn return_statement(&mut self) {
        if self.frame().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.frame().function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(Opcode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.expression();
        let then_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.statement();

        let else_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(Opcode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.frame().chunk.current_offset();
        self.expression();
        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.statement();
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_op(Opcode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.frame().chunk.current_offset();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Opcode::JumpIfFalse));
            self.emit_op(Opcode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Opcode::Jump);
            let increment_start = self.frame().chunk.current_offset();
            self.expression();
            self.emit_op(Opcode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(Opcode::Pop);
        }

        self.end_scope();
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenKind::Break) {
            self.error("'break' is not supported.");
            self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
        } else {
            self.expression_statement();
        }
    }

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

    // ---- expressions ------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = get_rule(self.previous.kind).prefix;
        let Some(prefix) = prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix = get_rule(self.previous.kind).infix.expect("precedence table guarantees an infix fn here");
            infix(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc = argc.saturating_add(1);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc
    }

    fn named_variable(&mut self, name: Token, can_assign: bool) {
        let level = self.functions.len() - 1;
        let (get_op, set_op, arg) = if let Some((idx, uninitialized)) = self.resolve_local(level, &name.lexeme) {
            if uninitialized {
                self.error("Can't read local variable in its own initializer.");
            }
            (Opcode::GetLocal, Opcode::SetLocal, idx as u8)
        } else if let Some(idx) = self.resolve_upvalue(level, &name.lexeme) {
            (Opcode::GetUpvalue, Opcode::SetUpvalue, idx)
        } else {
            let idx = self.identifier_constant(&name.lexeme);
            (Opcode::GetGlobal, Opcode::SetGlobal, idx)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_u8(set_op, arg);
        } else {
            self.emit_op_u8(get_op, arg);
        }
    }
}

// ---- grammar functions (the prefix/infix table's targets) -----------------

fn number(c: &mut Compiler<'_>, _can_assign: bool) {
    let value: f64 = c.previous.lexeme.parse().expect("lexer only produces well-formed numeric lexemes");
    c.emit_constant(Value::Number(value));
}

fn string_literal(c: &mut Compiler<'_>, _can_assign: bool) {
    let lexeme = &c.previous.lexeme;
    // Strip the surrounding quotes; v1 has no escape sequences.
    let text = &lexeme[1..lexeme.len() - 1];
    let id = c.intern(text);
    c.emit_constant(Value::Obj(id));
}

fn literal(c: &mut Compiler<'_>, _can_assign: bool) {
    match c.previous.kind {
        TokenKind::False => c.emit_op(Opcode::False),
        TokenKind::Null => c.emit_op(Opcode::Null),
        TokenKind::True => c.emit_op(Opcode::True),
        _ => unreachable!("get_rule only routes literal() for False/Null/True"),
    }
}

fn grouping(c: &mut Compiler<'_>, _can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightParen, "Expect ')' after expression.");
}

fn unary(c: &mut Compiler<'_>, _can_assign: bool) {
    let operator = c.previous.kind;
    c.parse_precedence(Precedence::Unary);
    match operator {
        TokenKind::Bang => c.emit_op(Opcode::Not),
        TokenKind::Minus => c.emit_op(Opcode::Negate),
        _ => unreachable!("get_rule only routes unary() for Bang/Minus"),
    }
}

fn binary(c: &mut Compiler<'_>, _can_assign: bool) {
    let operator = c.previous.kind;
    let rule = get_rule(operator);
    c.parse_precedence(rule.precedence.next());
    match operator {
        TokenKind::BangEqual => {
            c.emit_op(Opcode::Equal);
            c.emit_op(Opcode::Not);
        }
        TokenKind::EqualEqual => c.emit_op(Opcode::Equal),
        TokenKind::Greater => c.emit_op(Opcode::Greater),
        TokenKind::GreaterEqual => {
            c.emit_op(Opcode::Less);
            c.emit_op(Opcode::Not);
        }
        TokenKind::Less => c.emit_op(Opcode::Less),
        TokenKind::LessEqual => {
            c.emit_op(Opcode::Greater);
            c.emit_op(Opcode::Not);
        }
        TokenKind::Plus => c.emit_op(Opcode::Add),
        TokenKind::Minus => c.emit_op(Opcode::Subtract),
        TokenKind::Star => c.emit_op(Opcode::Multiply),
        TokenKind::Slash => c.emit_op(Opcode::Divide),
        _ => unreachable!("get_rule only routes binary() for the operators handled above"),
    }
}

fn and_(c: &mut Compiler<'_>, _can_assign: bool) {
    let end_jump = c.emit_jump(Opcode::JumpIfFalse);
    c.emit_op(Opcode::Pop);
    c.parse_precedence(Precedence::And);
    c.patch_jump(end_jump);
}

fn or_(c: &mut Compiler<'_>, _can_assign: bool) {
    let else_jump = c.emit_jump(Opcode::JumpIfFalse);
    let end_jump = c.emit_jump(Opcode::Jump);
    c.patch_jump(else_jump);
    c.emit_op(Opcode::Pop);
    c.parse_precedence(Precedence::Or);
    c.patch_jump(end_jump);
}

fn call(c: &mut Compiler<'_>, _can_assign: bool) {
    let argc = c.argument_list();
    c.emit_op_u8(Opcode::Call, argc);
}

fn dot(c: &mut Compiler<'_>, can_assign: bool) {
    c.consume(TokenKind::Identifier, "Expect property name after '.'.");
    let name = c.previous.lexeme.clone();
    let name_const = c.identifier_constant(&name);

    if can_assign && c.match_token(TokenKind::Equal) {
        c.expression();
        c.emit_op_u8(Opcode::SetProperty, name_const);
    } else if c.match_token(TokenKind::LeftParen) {
        let argc = c.argument_list();
        c.emit_op_u8(Opcode::Invoke, name_const);
        c.emit_u8(argc);
    } else {
        c.emit_op_u8(Opcode::GetProperty, name_const);
    }
}

fn variable(c: &mut Compiler<'_>, can_assign: bool) {
    let name = c.previous.clone();
    c.named_variable(name, can_assign);
}

fn this_(c: &mut Compiler<'_>, _can_assign: bool) {
    if c.classes.is_empty() {
        c.error("Can't use 'this' outside of a class.");
        return;
    }
    variable(c, false);
}

fn super_(c: &mut Compiler<'_>, _can_assign: bool) {
    if c.classes.is_empty() {
        c.error("Can't use 'super' outside of a class.");
    } else if !c.classes.last().unwrap().has_superclass {
        c.error("Can't use 'super' in a class without inheriting from a superclass.");
    }

    c.consume(TokenKind::Dot, "Expect '.' after 'super'.");
    c.consume(TokenKind::Identifier, "Expect superclass method name.");
    let name = c.previous.lexeme.clone();
    let name_const = c.identifier_constant(&name);

    c.named_variable(Token::synthetic(TokenKind::This, "this"), false);
    if c.match_token(TokenKind::LeftParen) {
        let argc = c.argument_list();
        c.named_variable(Token::synthetic(TokenKind::Super, "super"), false);
        c.emit_op_u8(Opcode::SuperInvoke, name_const);
        c.emit_u8(argc);
    } else {
        c.named_variable(Token::synthetic(TokenKind::Super, "super"), false);
        c.emit_op_u8(Opcode::GetSuper, name_const);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::disassemble_chunk;

    fn compile_ok(src: &str) -> (ObjId, Heap) {
        let mut heap = Heap::new();
        let mut interns = InternTable::new();
        match Compiler::compile(src, &mut heap, &mut interns) {
            Ok(id) => (id, heap),
            Err(diags) => panic!("expected compile success, got: {:?}", diags),
        }
    }

    fn compile_err(src: &str) -> Vec<Diagnostic> {
        let mut heap = Heap::new();
        let mut interns = InternTable::new();
        match Compiler::compile(src, &mut heap, &mut interns) {
            Ok(_) => panic!("expected a compile error"),
            Err(diags) => diags,
        }
    }

    #[test]
    fn compiles_arithmetic_expression_statement() {
        let (id, heap) = compile_ok("print 1 + 2 * 3;");
        let Obj::Function(f) = heap.get(id) else { panic!() };
        let text = disassemble_chunk(&f.chunk, &heap, "script");
        assert!(text.contains("Constant"));
        assert!(text.contains("Multiply"));
        assert!(text.contains("Add"));
        assert!(text.contains("Print"));
    }

    #[test]
    fn self_referential_initializer_is_a_compile_error() {
        let diags = compile_err("{ var a = a; }");
        assert!(diags[0].message.contains("own initializer"));
    }

    #[test]
    fn class_inheriting_itself_is_a_compile_error() {
        let diags = compile_err("class A(A) {}");
        assert!(diags[0].message.contains("inherit from itself"));
    }

    #[test]
    fn break_is_rejected_as_unsupported() {
        let diags = compile_err("while (true) { break; }");
        assert!(diags[0].message.contains("not supported"));
    }

    #[test]
    fn comparison_lowers_to_two_instructions() {
        let (id, heap) = compile_ok("print 1 >= 2;");
        let Obj::Function(f) = heap.get(id) else { panic!() };
        let text = disassemble_chunk(&f.chunk, &heap, "script");
        assert!(text.contains("Less"));
        assert!(text.contains("Not"));
    }

    #[test]
    fn more_than_255_arguments_is_a_compile_error() {
        let args = (0..256).map(|_| "1").collect::<Vec<_>>().join(",");
        let src = format!("fun f() {{}} f({});", args);
        let diags = compile_err(&src);
        assert!(diags.iter().any(|d| d.message.contains("255 arguments")));
    }
}
