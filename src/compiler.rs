use std::io::Write;

use crate::{
    chunk::{Chunk, OpCode},
    objects::{object_function::ObjectFunction, object_manager::ObjectManager},
    scanner::{Scanner, Token, TokenType},
    table::Table,
    value::{intern_string, make_function_value, make_number_value, make_string_value, Value},
};

pub struct Parser<'a> {
    current: Token<'a>,
    previous: Token<'a>,
    scanner: Option<Box<Scanner<'a>>>,
    has_error: bool,
    panic_mode: bool,
    compilers: Vec<Compiler<'a>>,
    class_compilers: Vec<ClassCompiler>,
    object_manager: &'a mut ObjectManager,
    intern_strings: &'a mut Table,
}

struct Local<'a> {
    name: Token<'a>,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone)]
struct Upvalue {
    index: usize,
    is_local: bool,
}

#[derive(PartialEq, Clone, Copy)]
enum FunctionType {
    Function,
    Initializer,
    Method,
    Script,
}

// One entry per enclosing `class` declaration; used to reject `this` at top
// level.
struct ClassCompiler;

struct Compiler<'a> {
    function: Box<ObjectFunction>,
    function_type: FunctionType,
    locals: Vec<Local<'a>>,
    upvalues: Vec<Upvalue>,
    scope_depth: i32,
}

impl<'a> Compiler<'a> {
    pub fn new(function_type: FunctionType) -> Self {
        Compiler {
            function: Box::new(ObjectFunction::new(0)),
            function_type,
            locals: vec![],
            upvalues: vec![],
            scope_depth: 0,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
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

impl From<u8> for Precedence {
    fn from(value: u8) -> Self {
        match value {
            0 => Precedence::None,
            1 => Precedence::Assignment,
            2 => Precedence::Or,
            3 => Precedence::And,
            4 => Precedence::Equality,
            5 => Precedence::Comparison,
            6 => Precedence::Term,
            7 => Precedence::Factor,
            8 => Precedence::Unary,
            9 => Precedence::Call,
            10 => Precedence::Primary,
            _ => unreachable!("Invalid precedence value: {}", value),
        }
    }
}

type ParserFn = fn(&mut Parser<'_>, can_assign: bool);

#[derive(Debug, Clone, Copy)]
struct ParseRule {
    prefix: Option<ParserFn>,
    infix: Option<ParserFn>,
    precedence: Precedence,
}

impl ParseRule {
    const fn new(
        prefix: Option<ParserFn>,
        infix: Option<ParserFn>,
        precedence: Precedence,
    ) -> Self {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

const RULES: [ParseRule; TokenType::Eof as usize + 1] = {
    let mut rules = [ParseRule::new(None, None, Precedence::None); TokenType::Eof as usize + 1];

    rules[TokenType::LeftParen as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.grouping()),
        Some(|parser, can_assign| parser.call(can_assign)),
        Precedence::Call,
    );

    rules[TokenType::Dot as usize] = ParseRule::new(
        None,
        Some(|parser, can_assign| parser.dot(can_assign)),
        Precedence::Call,
    );

    rules[TokenType::Minus as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.unary()),
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Term,
    );

    rules[TokenType::Plus as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Term,
    );

    rules[TokenType::Slash as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Factor,
    );

    rules[TokenType::Star as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Factor,
    );

    rules[TokenType::Number as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.number()),
        None,
        Precedence::None,
    );

    rules[TokenType::String as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.string()),
        None,
        Precedence::None,
    );

    rules[TokenType::False as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::True as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::Nil as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.literal()),
        None,
        Precedence::None,
    );

    rules[TokenType::Bang as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.unary()),
        None,
        Precedence::None,
    );

    rules[TokenType::BangEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Equality,
    );

    rules[TokenType::EqualEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Equality,
    );

    rules[TokenType::Greater as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::GreaterEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::Less as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::LessEqual as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.binary()),
        Precedence::Comparison,
    );

    rules[TokenType::Identifier as usize] = ParseRule::new(
        Some(|parser, can_assign| parser.variable(can_assign)),
        None,
        Precedence::None,
    );

    rules[TokenType::This as usize] = ParseRule::new(
        Some(|parser, _can_assign| parser.this()),
        None,
        Precedence::None,
    );

    rules[TokenType::And as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.and()),
        Precedence::And,
    );

    rules[TokenType::Or as usize] = ParseRule::new(
        None,
        Some(|parser, _can_assign| parser.or()),
        Precedence::Or,
    );

    rules
};

impl<'a> Parser<'a> {
    pub fn new(
        object_manager: &'a mut ObjectManager,
        intern_strings: &'a mut Table,
    ) -> Box<Parser<'a>> {
        let mut parser = Box::new(Parser {
            current: Token {
                token_type: TokenType::Eof,
                value: "",
                line: 0,
            },
            previous: Token {
                token_type: TokenType::Eof,
                value: "",
                line: 0,
            },
            scanner: None,
            has_error: false,
            panic_mode: false,
            compilers: vec![],
            class_compilers: vec![],
            object_manager,
            intern_strings,
        });
        parser.init_compiler(FunctionType::Script);
        parser
    }

    pub fn compile(&mut self, source: &'a str) -> Option<Box<ObjectFunction>> {
        self.scanner = Some(Scanner::new(source));
        self.advance();

        while !self.match_token(TokenType::Eof) {
            self.declaration();
        }

        let (function, _) = self.end_compiler();
        if self.has_error {
            None
        } else {
            Some(function)
        }
    }

    fn specific_compiler(&self, compiler_index: usize) -> &Compiler<'a> {
        self.compilers
            .get(compiler_index)
            .expect("compiler index is invalid.")
    }

    fn specific_compiler_mut(&mut self, compiler_index: usize) -> &mut Compiler<'a> {
        self.compilers
            .get_mut(compiler_index)
            .expect("compiler index is invalid.")
    }

    fn current_compiler(&self) -> &Compiler<'a> {
        self.compilers.last().expect("No compiler.")
    }

    fn current_compiler_mut(&mut self) -> &mut Compiler<'a> {
        self.compilers.last_mut().expect("No compiler.")
    }

    fn current_function(&self) -> &ObjectFunction {
        &self.current_compiler().function
    }

    fn current_function_mut(&mut self) -> &mut ObjectFunction {
        &mut self.current_compiler_mut().function
    }

    fn current_chunk(&self) -> &Chunk {
        &self.current_function().chunk
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_function_mut().chunk
    }

    fn current_locals(&self) -> &Vec<Local<'a>> {
        &self.current_compiler().locals
    }

    fn current_locals_mut(&mut self) -> &mut Vec<Local<'a>> {
        &mut self.current_compiler_mut().locals
    }

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            if let Some(scanner) = &mut self.scanner {
                self.current = scanner.scan_token();
                if self.current.token_type != TokenType::Error {
                    break;
                }

                let message = self.current.value;
                self.error_at_current(message);
            } else {
                panic!("Compiler was not initialized correctly.");
            }
        }
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if !self.check(token_type) {
            return false;
        }

        self.advance();
        true
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current.token_type == token_type
    }

    fn consume(&mut self, token_type: TokenType, message: &str) {
        if self.current.token_type == token_type {
            self.advance();
            return;
        }

        self.error_at_current(message);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line as u32;
        self.current_chunk_mut().write(byte, line);
    }

    fn emit_bytes(&mut self, byte1: u8, byte2: u8) {
        self.emit_byte(byte1);
        self.emit_byte(byte2);
    }

    // Literal loads go through the chunk so pools past 255 entries switch to
    // the long encoding; name operands stay in make_constant's one-byte space.
    fn emit_constant(&mut self, value: Value) {
        let line = self.previous.line as u32;
        self.current_chunk_mut().write_constant(value, line);
    }

    fn emit_return(&mut self) {
        if self.current_compiler().function_type == FunctionType::Initializer {
            self.emit_bytes(OpCode::GetLocal.to_byte(), 0);
        } else {
            self.emit_byte(OpCode::Nil.to_byte());
        }
        self.emit_byte(OpCode::Return.to_byte());
    }

    fn init_compiler(&mut self, function_type: FunctionType) {
        let mut compiler = Compiler::new(function_type);
        // When compiling a function declaration, init_compiler() runs right
        // after the name was parsed, so the name is the previous token.
        if compiler.function_type != FunctionType::Script {
            compiler.function.name =
                intern_string(self.object_manager, self.intern_strings, self.previous.value);
        }

        // Stack slot zero holds the callable itself, or the receiver inside
        // methods where it is addressable as 'this'.
        let reserved_name = if matches!(
            compiler.function_type,
            FunctionType::Method | FunctionType::Initializer
        ) {
            Token {
                token_type: TokenType::This,
                value: "this",
                line: self.previous.line,
            }
        } else {
            Token {
                token_type: TokenType::Eof,
                value: "",
                line: 0,
            }
        };
        compiler.locals.push(Local {
            name: reserved_name,
            depth: 0,
            is_captured: false,
        });
        self.compilers.push(compiler);
    }

    fn end_compiler(&mut self) -> (Box<ObjectFunction>, Vec<Upvalue>) {
        self.emit_return();

        debug_feature::disassemble_chunk(self);

        let compiler = self.compilers.pop().expect("No compiler.");
        (compiler.function, compiler.upvalues)
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        if let Some(index) = self.current_chunk().find_constant(&value) {
            if index <= u8::MAX as usize {
                return index as u8;
            }
        }

        let constant_index = self.current_chunk_mut().add_constant(value);
        if constant_index > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        constant_index as u8
    }

    fn number(&mut self) {
        let value = self.previous.value.parse::<f64>().unwrap_or(0.0);
        self.emit_constant(make_number_value(value));
    }

    fn string(&mut self) {
        // Trim the leading and trailing quotation marks.
        let content = &self.previous.value[1..self.previous.value.len() - 1];
        let value = make_string_value(self.object_manager, self.intern_strings, content);
        self.emit_constant(value);
    }

    fn declaration(&mut self) {
        if self.match_token(TokenType::Class) {
            self.class_declaration();
        } else if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else if self.match_token(TokenType::Fun) {
            self.function_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect class name.");
        let class_name = self.previous.clone();
        let name_constant = self.identifier_constant(self.previous.clone());
        self.declare_variable();
        self.emit_bytes(OpCode::Class.to_byte(), name_constant);
        self.define_variable(name_constant);

        self.class_compilers.push(ClassCompiler);

        // Reload the class so each Method instruction finds it under the
        // method closure on the stack.
        self.named_variable(class_name, false);
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.method();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after class body.");
        self.emit_byte(OpCode::Pop.to_byte());

        self.class_compilers.pop();
    }

    fn method(&mut self) {
        self.consume(TokenType::Identifier, "Expect method name.");
        let name_token = self.previous.clone();
        let constant = self.identifier_constant(name_token.clone());

        let function_type = if name_token.value == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type);
        self.emit_bytes(OpCode::Method.to_byte(), constant);
    }

    fn variable_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_byte(OpCode::Nil.to_byte());
        }
        self.consume(
            TokenType::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenType::Identifier, message);

        self.declare_variable();
        if self.current_compiler().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.clone())
    }

    fn declare_variable(&mut self) {
        if self.current_compiler().scope_depth == 0 {
            // top level
            return;
        }

        let mut err = false;
        let variable_name = self.previous.clone();
        let scope_depth = self.current_compiler().scope_depth;
        for local in self.current_locals().iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }

            if Self::identifier_equal(&variable_name, &local.name) {
                err = true;
                break;
            }
        }
        if err {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(variable_name);
    }

    fn add_local(&mut self, variable_name: Token<'a>) {
        if self.current_locals().len() > u8::MAX as usize {
            self.error("Too many local variables in function.");
            return;
        }

        // Depth -1 marks the variable as declared but not yet usable; the
        // initializer must not read it.
        self.current_locals_mut().push(Local {
            name: variable_name,
            depth: -1,
            is_captured: false,
        });
    }

    fn function_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType) {
        self.init_compiler(function_type);

        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                if self.current_function().arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let arity = self.current_function().arity.saturating_add(1);
                self.current_function_mut().arity = arity;
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_compiler();
        let (function_ptr, _) = self.object_manager.adopt_function(function);
        let function_constant_index = self.make_constant(make_function_value(function_ptr));
        self.emit_bytes(OpCode::Closure.to_byte(), function_constant_index);

        for upvalue in upvalues.iter() {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index as u8);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argument_count: u32 = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if argument_count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argument_count += 1;

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        argument_count.min(255) as u8
    }

    fn identifier_constant(&mut self, token: Token) -> u8 {
        let value = make_string_value(self.object_manager, self.intern_strings, token.value);
        self.make_constant(value)
    }

    fn define_variable(&mut self, global: u8) {
        // > 0 means a local variable
        if self.current_compiler().scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        self.emit_bytes(OpCode::DefineGlobal.to_byte(), global);
    }

    fn mark_initialized(&mut self) {
        let scope_depth = self.current_compiler().scope_depth;
        if scope_depth == 0 {
            return;
        }

        self.current_locals_mut()
            .last_mut()
            .expect("No local to initialize.")
            .depth = scope_depth;
    }

    fn variable(&mut self, can_assign: bool) {
        let token = self.previous.clone();
        self.named_variable(token, can_assign)
    }

    fn this(&mut self) {
        if self.class_compilers.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let mut opcode_get = OpCode::GetLocal.to_byte();
        let mut opcode_set = OpCode::SetLocal.to_byte();
        let current_compiler_index = self.compilers.len() - 1;
        let mut index = self.resolve_local(current_compiler_index, &name);
        if index == -1 {
            index = self.resolve_upvalue(current_compiler_index, &name);
            if index == -1 {
                // global variable
                index = self.identifier_constant(name) as i32;
                opcode_get = OpCode::GetGlobal.to_byte();
                opcode_set = OpCode::SetGlobal.to_byte();
            } else {
                // upvalue
                opcode_get = OpCode::GetUpvalue.to_byte();
                opcode_set = OpCode::SetUpvalue.to_byte();
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_bytes(opcode_set, index as u8);
        } else {
            self.emit_bytes(opcode_get, index as u8);
        }
    }

    fn resolve_local(&mut self, compiler_index: usize, name: &Token) -> i32 {
        let mut found: Option<(usize, i32)> = None;
        for (index, local) in self
            .specific_compiler(compiler_index)
            .locals
            .iter()
            .enumerate()
            .rev()
        {
            if Self::identifier_equal(name, &local.name) {
                found = Some((index, local.depth));
                break;
            }
        }

        match found {
            Some((index, depth)) => {
                if depth == -1 {
                    // declared but not yet defined
                    self.error("Can't read local variable in its own initializer.");
                }
                index as i32
            }
            None => -1,
        }
    }

    fn identifier_equal(left: &Token, right: &Token) -> bool {
        left.token_type == right.token_type && left.value == right.value
    }

    fn resolve_upvalue(&mut self, compiler_index: usize, name: &Token) -> i32 {
        if compiler_index == 0 {
            return -1;
        }

        let local = self.resolve_local(compiler_index - 1, name);
        if local != -1 {
            self.specific_compiler_mut(compiler_index - 1).locals[local as usize].is_captured =
                true;
            return self.add_upvalue(compiler_index, local, true) as i32;
        }

        let upvalue = self.resolve_upvalue(compiler_index - 1, name);
        if upvalue != -1 {
            return self.add_upvalue(compiler_index, upvalue, false) as i32;
        }

        -1
    }

    fn add_upvalue(&mut self, compiler_index: usize, index: i32, is_local: bool) -> usize {
        let existing = self
            .specific_compiler(compiler_index)
            .upvalues
            .iter()
            .position(|upvalue| upvalue.is_local == is_local && upvalue.index == index as usize);
        if let Some(upvalue_index) = existing {
            return upvalue_index;
        }

        if self.specific_compiler(compiler_index).upvalues.len() > u8::MAX as usize {
            self.error("Too many closure variables in function.");
            return 0;
        }

        let compiler = self.specific_compiler_mut(compiler_index);
        compiler.upvalues.push(Upvalue {
            index: index as usize,
            is_local,
        });
        compiler.function.upvalue_count = compiler.upvalues.len();
        compiler.function.upvalue_count - 1
    }

    fn and(&mut self) {
        let jump_offset_operand = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        self.emit_byte(OpCode::Pop.to_byte());
        self.parse_precedence(Precedence::And);
        self.patch_jump_offset(jump_offset_operand);
    }

    fn or(&mut self) {
        // No jump-if-true in the instruction set: fall through the false
        // branch into a plain jump over the right operand.
        let else_jump_offset_operand = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        let end_jump_offset_operand = self.emit_jump_bytes(OpCode::Jump.to_byte());

        self.patch_jump_offset(else_jump_offset_operand);
        self.emit_byte(OpCode::Pop.to_byte());

        self.parse_precedence(Precedence::Or);
        self.patch_jump_offset(end_jump_offset_operand);
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::For) {
            self.for_statement();
        } else if self.match_token(TokenType::Return) {
            self.return_statement();
        } else if self.match_token(TokenType::Print) {
            self.print_statement();
        } else {
            self.expression_statement();
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let jump_offset_operand = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        self.emit_byte(OpCode::Pop.to_byte()); // pop the condition result
        self.statement();

        let else_jump_offset_operand = self.emit_jump_bytes(OpCode::Jump.to_byte());
        self.patch_jump_offset(jump_offset_operand);
        self.emit_byte(OpCode::Pop.to_byte()); // the condition result on the false path

        if self.match_token(TokenType::Else) {
            self.statement();
        }
        self.patch_jump_offset(else_jump_offset_operand);
    }

    fn emit_jump_bytes(&mut self, instruction: u8) -> usize {
        self.emit_byte(instruction);
        // use two bytes for the jump offset operand
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().len() - 2
    }

    fn patch_jump_offset(&mut self, offset: usize) {
        // -2 to adjust for the bytecode for the jump offset itself.
        let jump_offset = self.current_chunk().len() - offset - 2;
        if jump_offset > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }

        let current_chunk = self.current_chunk_mut();
        current_chunk.write_by_offset(offset, ((jump_offset >> 8) & 0xff) as u8);
        current_chunk.write_by_offset(offset + 1, (jump_offset & 0xff) as u8);
    }

    fn begin_scope(&mut self) {
        self.current_compiler_mut().scope_depth += 1
    }

    fn end_scope(&mut self) {
        self.current_compiler_mut().scope_depth -= 1;
        let scope_depth = self.current_compiler().scope_depth;
        loop {
            let escape = match self.current_locals().last() {
                None => break,
                Some(local) if local.depth <= scope_depth => break,
                Some(local) => local.is_captured,
            };

            // Captured locals outlive the slot; close them instead of
            // discarding.
            if escape {
                self.emit_byte(OpCode::CloseUpvalue.to_byte());
            } else {
                self.emit_byte(OpCode::Pop.to_byte());
            }
            self.current_locals_mut().pop();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn return_statement(&mut self) {
        if self.current_compiler().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenType::Semicolon) {
            self.emit_return();
        } else {
            if self.current_compiler().function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }

            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit_byte(OpCode::Return.to_byte());
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_byte(OpCode::Print.to_byte());
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();

        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let jump_offset_operand = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte());
        self.emit_byte(OpCode::Pop.to_byte());

        self.statement();
        self.emit_loop(loop_start); // jump back to the condition expression

        self.patch_jump_offset(jump_offset_operand);
        self.emit_byte(OpCode::Pop.to_byte());
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_byte(OpCode::Loop.to_byte());

        // +2 to skip the operand of the Loop instruction itself.
        let offset = self.current_chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }

        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenType::Semicolon) {
            // no initializer
        } else if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump_offset_operand: i32 = -1;
        if !self.match_token(TokenType::Semicolon) {
            // it has a condition clause
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");

            // Jump out of the loop if the condition is false.
            exit_jump_offset_operand = self.emit_jump_bytes(OpCode::JumpIfFalse.to_byte()) as i32;
            self.emit_byte(OpCode::Pop.to_byte()); // pop the condition result.
        }

        if !self.match_token(TokenType::RightParen) {
            // it has an increment clause
            let body_jump_offset_operand = self.emit_jump_bytes(OpCode::Jump.to_byte());
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_byte(OpCode::Pop.to_byte());
            self.consume(TokenType::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump_offset(body_jump_offset_operand);
        }

        self.statement();
        self.emit_loop(loop_start);

        if exit_jump_offset_operand != -1 {
            self.patch_jump_offset(exit_jump_offset_operand as usize);
            self.emit_byte(OpCode::Pop.to_byte()); // pop the condition result.
        }
        self.end_scope();
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_byte(OpCode::Pop.to_byte());
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn unary(&mut self) {
        let operator_type = self.previous.token_type;

        self.parse_precedence(Precedence::Unary);

        match operator_type {
            TokenType::Bang => self.emit_byte(OpCode::Not.to_byte()),
            TokenType::Minus => self.emit_byte(OpCode::Negate.to_byte()),
            _ => unreachable!("Expect unary operator."),
        }
    }

    fn binary(&mut self) {
        let operator_type = self.previous.token_type;
        let rule = &RULES[operator_type as usize];
        self.parse_precedence((rule.precedence as u8 + 1).into());

        match operator_type {
            TokenType::BangEqual => self.emit_bytes(OpCode::Equal.to_byte(), OpCode::Not.to_byte()),
            TokenType::EqualEqual => self.emit_byte(OpCode::Equal.to_byte()),
            TokenType::Greater => self.emit_byte(OpCode::Greater.to_byte()),
            TokenType::GreaterEqual => {
                self.emit_bytes(OpCode::Less.to_byte(), OpCode::Not.to_byte())
            }
            TokenType::Less => self.emit_byte(OpCode::Less.to_byte()),
            TokenType::LessEqual => {
                self.emit_bytes(OpCode::Greater.to_byte(), OpCode::Not.to_byte())
            }
            TokenType::Plus => self.emit_byte(OpCode::Add.to_byte()),
            TokenType::Minus => self.emit_byte(OpCode::Subtract.to_byte()),
            TokenType::Star => self.emit_byte(OpCode::Multiply.to_byte()),
            TokenType::Slash => self.emit_byte(OpCode::Divide.to_byte()),
            _ => unreachable!("Unexpected binary operator: {}", operator_type),
        }
    }

    fn literal(&mut self) {
        let operator_type = self.previous.token_type;
        match operator_type {
            TokenType::False => self.emit_byte(OpCode::False.to_byte()),
            TokenType::True => self.emit_byte(OpCode::True.to_byte()),
            TokenType::Nil => self.emit_byte(OpCode::Nil.to_byte()),
            _ => unreachable!("Unexpected literal operator: {}", operator_type),
        }
    }

    fn call(&mut self, _can_assign: bool) {
        let argument_count = self.argument_list();
        self.emit_bytes(OpCode::Call.to_byte(), argument_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenType::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.clone());

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_bytes(OpCode::SetProperty.to_byte(), name);
        } else if self.match_token(TokenType::LeftParen) {
            // Immediate call: skip the bound-method detour.
            let argument_count = self.argument_list();
            self.emit_bytes(OpCode::Invoke.to_byte(), name);
            self.emit_byte(argument_count);
        } else {
            self.emit_bytes(OpCode::GetProperty.to_byte(), name);
        }
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let can_assign = precedence <= Precedence::Assignment;
        if let Some(prefix) = &RULES[self.previous.token_type as usize].prefix {
            prefix(self, can_assign);
        } else {
            self.error("Expect expression.");
            return;
        }

        while precedence as u8 <= RULES[self.current.token_type as usize].precedence as u8 {
            self.advance();
            if let Some(infix) = &RULES[self.previous.token_type as usize].infix {
                infix(self, can_assign);
            } else {
                self.error("Expect infix parse function.");
                return;
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.token_type != TokenType::Eof {
            if self.previous.token_type == TokenType::Semicolon {
                return;
            }

            match self.current.token_type {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => (),
            }

            self.advance()
        }
    }

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }

        self.panic_mode = true;
        write!(&mut std::io::stderr(), "[line {}] Error", token.line)
            .expect("Failed to write to stderr");

        match token.token_type {
            TokenType::Eof => {
                write!(&mut std::io::stderr(), " at end").expect("Failed to write to stderr")
            }
            TokenType::Error => {}
            _ => write!(&mut std::io::stderr(), " at '{}'", token.value)
                .expect("Failed to write to stderr"),
        };

        writeln!(&mut std::io::stderr(), ": {}", message).expect("Failed to write to stderr");
        self.has_error = true;
    }
}

#[cfg(feature = "debug_print_code")]
mod debug_feature {
    use crate::debug;

    use super::*;

    pub fn disassemble_chunk(parser: &Parser) {
        if parser.has_error {
            return;
        }

        let name_ptr = parser.current_function().name;
        let name = if name_ptr.is_null() {
            "<script>".to_string()
        } else {
            unsafe { (*name_ptr).content.clone() }
        };
        debug::disassemble_chunk(parser.current_chunk(), &name);
    }
}

#[cfg(not(feature = "debug_print_code"))]
mod debug_feature {
    use super::*;

    pub fn disassemble_chunk(_parser: &Parser) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{as_function_object, is_function, is_string};

    fn compile_source(source: &str) -> (ObjectManager, Table, Option<Box<ObjectFunction>>) {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();
        let function = {
            let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
            parser.compile(source)
        };
        (object_manager, intern_strings, function)
    }

    #[test]
    fn test_compile_expression_statement() {
        let (_manager, _strings, result) = compile_source("!(5 - 4 > 3 * 2 == !nil);");
        let function = result.expect("expression must compile");
        let chunk = function.chunk();

        assert_eq!(*chunk.get_constant(0), make_number_value(5.0));
        assert_eq!(*chunk.get_constant(1), make_number_value(4.0));

        let expected = [
            OpCode::Constant.to_byte(),
            0,
            OpCode::Constant.to_byte(),
            1,
            OpCode::Subtract.to_byte(),
            OpCode::Constant.to_byte(),
            2,
            OpCode::Constant.to_byte(),
            3,
            OpCode::Multiply.to_byte(),
            OpCode::Greater.to_byte(),
            OpCode::Nil.to_byte(),
            OpCode::Not.to_byte(),
            OpCode::Equal.to_byte(),
            OpCode::Not.to_byte(),
            OpCode::Pop.to_byte(),
            OpCode::Nil.to_byte(),
            OpCode::Return.to_byte(),
        ];
        for (offset, &byte) in expected.iter().enumerate() {
            assert_eq!(chunk.read(offset), byte, "mismatch at offset {}", offset);
        }
    }

    #[test]
    fn test_string_literals_are_interned_across_compiles() {
        let mut object_manager = ObjectManager::new();
        let mut intern_strings = Table::new();

        {
            let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
            assert!(parser.compile("\"this is a test string\";").is_some());
        }
        {
            let mut parser = Parser::new(&mut object_manager, &mut intern_strings);
            assert!(parser.compile("\"this is a test string\";").is_some());
        }

        assert_eq!(intern_strings.len(), 1);
    }

    #[test]
    fn test_function_declaration() {
        let (_manager, _strings, result) = compile_source(
            "fun areWeHavingItYet() {
                print \"Yes we are!\";
            }
            print areWeHavingItYet;",
        );
        assert!(result.is_some());
    }

    #[test]
    fn test_nested_closure_tracks_upvalues() {
        let (_manager, _strings, result) = compile_source(
            "fun outer() {
                var x = 1;
                fun inner() { return x; }
                return inner;
            }",
        );
        let script = result.expect("closures must compile");

        let outer = script
            .chunk()
            .iter_constants()
            .find(|constant| is_function(constant))
            .map(as_function_object)
            .expect("outer function constant");
        let inner = unsafe { &*outer }
            .chunk()
            .iter_constants()
            .find(|constant| is_function(constant))
            .map(as_function_object)
            .expect("inner function constant");

        assert_eq!(unsafe { &*outer }.upvalue_count, 0);
        assert_eq!(unsafe { &*inner }.upvalue_count, 1);
    }

    #[test]
    fn test_class_declaration_with_methods() {
        let (_manager, _strings, result) = compile_source(
            "class Point {
                init(x) { this.x = x; }
                get() { return this.x; }
            }
            print Point;",
        );
        assert!(result.is_some());
    }

    #[test]
    fn test_this_outside_class_is_rejected() {
        let (_manager, _strings, result) = compile_source("print this;");
        assert!(result.is_none());
    }

    #[test]
    fn test_return_at_top_level_is_rejected() {
        let (_manager, _strings, result) = compile_source("return 1;");
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_assignment_target() {
        let (_manager, _strings, result) = compile_source("1 + 2 = 3;");
        assert!(result.is_none());
    }

    #[test]
    fn test_method_calls_compile_to_invoke() {
        let (_manager, _strings, result) = compile_source(
            "class Greeter { hello() { return 1; } }
            var g = Greeter();
            g.hello();",
        );
        let script = result.expect("invoke must compile");
        let chunk = script.chunk();

        let mut saw_invoke = false;
        let mut offset = 0;
        while offset < chunk.len() {
            let byte = chunk.read(offset);
            if byte == OpCode::Invoke.to_byte() {
                saw_invoke = true;
                // name operand must resolve to the interned method name
                let name_index = chunk.read(offset + 1) as usize;
                assert!(is_string(chunk.get_constant(name_index)));
                break;
            }
            offset += 1;
        }
        assert!(saw_invoke, "dot-call should use the Invoke fast path");
    }

    #[test]
    fn test_large_constant_pools_use_long_loads() {
        let mut source = String::new();
        for index in 0..300 {
            source.push_str(&format!("{}.5;", index));
        }

        let (_manager, _strings, result) = compile_source(&source);
        let script = result.expect("many constants must compile");
        let chunk = script.chunk();

        assert_eq!(chunk.constants_len(), 300);
        let mut saw_long = false;
        let mut offset = 0;
        while offset < chunk.len() {
            match OpCode::from_byte(chunk.read(offset)) {
                Some(OpCode::Constant) => offset += 2,
                Some(OpCode::ConstantLong) => {
                    saw_long = true;
                    offset += 4;
                }
                Some(OpCode::Pop) | Some(OpCode::Nil) | Some(OpCode::Return) => offset += 1,
                other => panic!("unexpected opcode {:?} at {}", other, offset),
            }
        }
        assert!(saw_long, "pool index 256+ must use ConstantLong");
    }
}
