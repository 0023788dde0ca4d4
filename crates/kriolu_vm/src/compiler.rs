use std::mem;

use kriolu_lexer::{tokenize, Token, TokenKind};

use crate::ast::{Expression, Statement};
use crate::chunk::Chunk;
use crate::heap::Heap;
use crate::object::{Gc, ObjFunction, ObjString, Object};
use crate::opcode::Op;
use crate::value::Value;

const LOCALS_MAX: usize = 256;
const CAPTURES_MAX: usize = 256;

// ── Record di compilazione ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// Variabile locale. `depth == -1`: dichiarata ma non ancora
/// inizializzata, leggerla è un errore di compilazione.
struct Local {
    name: String,
    depth: i32,
    /// Una funzione interna la cattura: a fine scope lo slot va promosso
    /// a heap value chiuso invece di essere poppato.
    captured: bool,
}

/// Descrittore di variabile catturata, deduplicato per funzione.
#[derive(Clone, Copy, PartialEq)]
struct Capture {
    index: u8,
    /// `true`: slot nello stack della funzione che racchiude;
    /// `false`: cattura della funzione che racchiude.
    from_parent_stack: bool,
}

/// Funzione in corso di compilazione. La pila di questi record è il
/// collegamento alle funzioni che racchiudono; in cima c'è la funzione
/// attiva che riceve le emissioni.
struct FunctionState {
    kind: FunctionKind,
    name: Option<Gc<ObjString>>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local>,
    captures: Vec<Capture>,
    scope_depth: i32,
}

impl FunctionState {
    fn new(kind: FunctionKind, name: Option<Gc<ObjString>>) -> Self {
        // Lo slot 0 è riservato al chiamato; nei metodi è il ricevitore.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "keli",
            _ => "",
        };
        FunctionState {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local { name: slot_zero.to_string(), depth: 0, captured: false }],
            captures: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

struct LoopState {
    /// Bersaglio di `salta`: inizio condizione, o inizio incremento nei
    /// cicli `pa` che ne hanno uno.
    continue_target: usize,
    /// Salti in avanti di `sai`, patchati alla chiusura del ciclo.
    break_jumps: Vec<usize>,
    /// Profondità di scope all'ingresso: `sai`/`salta` scartano i locali
    /// più profondi prima di saltare.
    scope_depth: i32,
}

// ── Precedenze Pratt ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Exponent,
    Unary,
    Call,
}

// ── Compiler ──────────────────────────────────────────────────────────────

pub struct Compiler<'h> {
    tokens: Vec<Token>,
    pos: usize,
    previous: Token,
    current: Token,
    heap: &'h mut Heap,
    functions: Vec<FunctionState>,
    classes: Vec<ClassState>,
    loops: Vec<LoopState>,
    /// Nome del globale il cui inizializzatore è in compilazione: anche i
    /// globali rifiutano l'auto-riferimento nella dichiarazione.
    declaring_global: Option<String>,
    had_error: bool,
    panic_mode: bool,
}

impl<'h> Compiler<'h> {
    /// Compila il sorgente in una funzione radice. Restituisce anche
    /// l'albero diagnostico per il dump `-ast`. `None` se un qualunque
    /// errore (lessicale, sintattico o semantico) è stato riportato.
    pub fn compile(source: &str, heap: &mut Heap) -> (Option<Gc<ObjFunction>>, Vec<Statement>) {
        let (tokens, lex_errors) = tokenize(source);

        let mut compiler = Compiler {
            current: tokens[0].clone(),
            previous: Token::new(TokenKind::Eof, "", 0),
            pos: 1,
            tokens,
            heap,
            functions: vec![FunctionState::new(FunctionKind::Script, None)],
            classes: Vec::new(),
            loops: Vec::new(),
            declaring_global: None,
            had_error: false,
            panic_mode: false,
        };

        for e in &lex_errors {
            eprintln!("{}", e);
            compiler.had_error = true;
        }

        let mut statements = Vec::new();
        while !compiler.check(&TokenKind::Eof) {
            statements.push(compiler.declaration());
        }

        compiler.emit_return();
        compiler.collect_if_needed();
        let state = match compiler.functions.pop() {
            Some(state) => state,
            None => return (None, statements),
        };
        let function = compiler.heap.alloc_function(0, 0, state.chunk, None);

        if compiler.had_error {
            (None, statements)
        } else {
            (Some(function), statements)
        }
    }

    // ── Cursore ───────────────────────────────────────────────────────────

    fn advance(&mut self) {
        let next = if self.pos < self.tokens.len() {
            let t = self.tokens[self.pos].clone();
            self.pos += 1;
            t
        } else {
            Token::new(TokenKind::Eof, "", self.current.line)
        };
        self.previous = mem::replace(&mut self.current, next);
    }

    fn check(&self, kind: &TokenKind) -> bool {
        mem::discriminant(&self.current.kind) == mem::discriminant(kind)
    }

    fn match_advance(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    // ── Errori ────────────────────────────────────────────────────────────

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
        self.had_error = true;
        if token.kind == TokenKind::Eof {
            eprintln!("[line {}] Error at end: {}", token.line, message);
        } else {
            eprintln!("[line {}] Error at '{}': {}", token.line, token.lexeme, message);
        }
    }

    /// Riallinea al confine di statement successivo e riattiva la
    /// diagnostica.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(&TokenKind::Eof) {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Klasi
                | TokenKind::Funson
                | TokenKind::Mimoria
                | TokenKind::Si
                | TokenKind::Timenti
                | TokenKind::Di
                | TokenKind::Pa
                | TokenKind::Sai
                | TokenKind::Salta
                | TokenKind::Imprimi
                | TokenKind::Divolvi => return,
                _ => self.advance(),
            }
        }
    }

    // ── Emissione ─────────────────────────────────────────────────────────

    fn function_mut(&mut self) -> &mut FunctionState {
        self.functions.last_mut().unwrap()
    }

    fn function(&self) -> &FunctionState {
        self.functions.last().unwrap()
    }

    fn emit(&mut self, op: Op) {
        let line = self.previous.line;
        self.function_mut().chunk.emit(op, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.function_mut().chunk.emit_byte(byte, line);
    }

    fn emit_pair(&mut self, op: Op, byte: u8) {
        self.emit(op);
        self.emit_byte(byte);
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        let line = self.previous.line;
        self.function_mut().chunk.emit_jump(op, line)
    }

    fn patch_jump(&mut self, operand: usize) {
        if !self.function_mut().chunk.patch_jump(operand) {
            self.error("Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.line;
        if !self.function_mut().chunk.emit_loop(loop_start, line) {
            self.error("Loop body too large.");
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.previous.line;
        if !self.function_mut().chunk.emit_constant(value, line) {
            self.error("Too many constants in one chunk.");
        }
    }

    fn emit_return(&mut self) {
        if self.function().kind == FunctionKind::Initializer {
            self.emit_pair(Op::LocalRead, 0);
        } else {
            self.emit(Op::PushNil);
        }
        self.emit(Op::Return);
    }

    fn code_len(&self) -> usize {
        self.function().chunk.code.len()
    }

    // ── Heap (con radici del compilatore) ─────────────────────────────────

    /// Le radici del compilatore sono le funzioni in corso: i loro pool di
    /// costanti tengono vive stringhe internate e funzioni già emesse.
    fn collect_if_needed(&mut self) {
        if !self.heap.wants_collection() {
            return;
        }
        let mut roots: Vec<Object> = Vec::new();
        for state in &self.functions {
            if let Some(name) = state.name {
                roots.push(Object::String(name));
            }
            for constant in &state.chunk.constants {
                if let Value::Object(object) = constant {
                    roots.push(*object);
                }
            }
        }
        self.heap.collect(&roots);
    }

    fn intern(&mut self, s: &str) -> Gc<ObjString> {
        self.collect_if_needed();
        self.heap.intern(s)
    }

    /// Interna il nome e lo salva nel pool di costanti; l'indice deve
    /// stare in un byte perché le istruzioni sui nomi hanno operandi u8.
    fn identifier_constant(&mut self, name: &str) -> u8 {
        let string = self.intern(name);
        let index = self
            .function_mut()
            .chunk
            .add_constant(Value::Object(Object::String(string)));
        if index > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    // ── Scope e variabili ─────────────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.function_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let line = self.previous.line;
        let state = self.function_mut();
        state.scope_depth -= 1;
        while let Some(local) = state.locals.last() {
            if local.depth <= state.scope_depth {
                break;
            }
            if local.captured {
                state.chunk.emit(Op::CloseHeapValue, line);
            } else {
                state.chunk.emit(Op::Pop, line);
            }
            state.locals.pop();
        }
    }

    /// Scarta dallo stack i locali più profondi di `depth` senza toccarne
    /// la contabilità: serve a `sai`/`salta` prima del salto.
    fn discard_locals_to(&mut self, depth: i32) {
        let line = self.previous.line;
        let state = self.function_mut();
        for local in state.locals.iter().rev() {
            if local.depth <= depth {
                break;
            }
            if local.captured {
                state.chunk.emit(Op::CloseHeapValue, line);
            } else {
                state.chunk.emit(Op::Pop, line);
            }
        }
    }

    fn declare_variable(&mut self, name: &str) {
        if self.function().scope_depth == 0 {
            return;
        }
        let mut duplicate = false;
        {
            let state = self.function();
            for local in state.locals.iter().rev() {
                if local.depth != -1 && local.depth < state.scope_depth {
                    break;
                }
                if local.name == name {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &str) {
        if self.function().locals.len() >= LOCALS_MAX {
            self.error("Too many local variables in function.");
            return;
        }
        self.function_mut().locals.push(Local {
            name: name.to_string(),
            depth: -1,
            captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        let state = self.function_mut();
        if state.scope_depth == 0 {
            return;
        }
        if let Some(local) = state.locals.last_mut() {
            local.depth = state.scope_depth;
        }
    }

    fn define_variable(&mut self, name_idx: u8) {
        if self.function().scope_depth > 0 {
            self.mark_initialized();
        } else {
            self.emit_pair(Op::DefineGlobal, name_idx);
        }
    }

    fn resolve_local(&mut self, func_index: usize, name: &str) -> Option<u8> {
        let mut uninitialized = false;
        let mut found = None;
        for (i, local) in self.functions[func_index].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    uninitialized = true;
                }
                found = Some(i as u8);
                break;
            }
        }
        if uninitialized {
            self.error("Can't read variable in its own initializer.");
        }
        found
    }

    /// Risoluzione a catena attraverso le funzioni che racchiudono: il
    /// primo livello fornisce un descrittore sul suo stack, i livelli
    /// intermedi incatenano descrittori sulle loro catture. Il locale
    /// bersaglio viene marcato per la promozione a heap value.
    fn resolve_captured(&mut self, func_index: usize, name: &str) -> Option<u8> {
        if func_index == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(func_index - 1, name) {
            self.functions[func_index - 1].locals[local as usize].captured = true;
            return Some(self.add_capture(func_index, local, true));
        }
        if let Some(capture) = self.resolve_captured(func_index - 1, name) {
            return Some(self.add_capture(func_index, capture, false));
        }
        None
    }

    fn add_capture(&mut self, func_index: usize, index: u8, from_parent_stack: bool) -> u8 {
        let capture = Capture { index, from_parent_stack };
        if let Some(existing) = self.functions[func_index]
            .captures
            .iter()
            .position(|c| *c == capture)
        {
            return existing as u8;
        }
        if self.functions[func_index].captures.len() >= CAPTURES_MAX {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.functions[func_index].captures.push(capture);
        (self.functions[func_index].captures.len() - 1) as u8
    }

    // ── Dichiarazioni ─────────────────────────────────────────────────────

    fn declaration(&mut self) -> Statement {
        let statement = if self.match_advance(&TokenKind::Klasi) {
            self.class_declaration()
        } else if self.match_advance(&TokenKind::Funson) {
            self.funson_declaration()
        } else if self.match_advance(&TokenKind::Mimoria) {
            self.var_declaration()
        } else {
            self.statement()
        };
        if self.panic_mode {
            self.synchronize();
        }
        statement
    }

    fn var_declaration(&mut self) -> Statement {
        self.consume(&TokenKind::Identifier(String::new()), "Expect variable name.");
        let name = self.previous.lexeme.clone();
        self.declare_variable(&name);
        let name_idx = if self.function().scope_depth == 0 {
            self.identifier_constant(&name)
        } else {
            0
        };

        if self.function().scope_depth == 0 {
            self.declaring_global = Some(name.clone());
        }
        let initializer = if self.match_advance(&TokenKind::Equal) {
            Some(self.expression())
        } else {
            self.emit(Op::PushNil);
            None
        };
        self.declaring_global = None;
        self.consume(&TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(name_idx);

        Statement::VariableDeclaration { name, initializer }
    }

    fn funson_declaration(&mut self) -> Statement {
        self.consume(&TokenKind::Identifier(String::new()), "Expect function name.");
        let name = self.previous.lexeme.clone();
        self.declare_variable(&name);
        let name_idx = if self.function().scope_depth == 0 {
            self.identifier_constant(&name)
        } else {
            0
        };
        // Inizializzata prima del corpo: una funzione può chiamare se stessa.
        self.mark_initialized();
        let (parameters, body) = self.function_body(FunctionKind::Function, &name);
        self.define_variable(name_idx);

        Statement::Funson { name, parameters, body }
    }

    /// Parametri e corpo; alla fine emette `MakeClosure` con i descrittori
    /// di cattura nella funzione che racchiude.
    fn function_body(&mut self, kind: FunctionKind, name: &str) -> (Vec<String>, Vec<Statement>) {
        let interned = self.intern(name);
        self.functions.push(FunctionState::new(kind, Some(interned)));
        self.begin_scope();

        let mut parameters = Vec::new();
        self.consume(&TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(&TokenKind::RightParen) {
            loop {
                if self.function().arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let state = self.function_mut();
                state.arity = state.arity.wrapping_add(1);
                self.consume(&TokenKind::Identifier(String::new()), "Expect parameter name.");
                let param = self.previous.lexeme.clone();
                self.declare_variable(&param);
                self.mark_initialized();
                parameters.push(param);
                if !self.match_advance(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(&TokenKind::LeftBrace, "Expect '{' before function body.");
        let body = self.block_statements();

        self.emit_return();
        self.collect_if_needed();
        let state = self.functions.pop().unwrap();
        let function = self.heap.alloc_function(
            state.arity,
            state.captures.len(),
            state.chunk,
            state.name,
        );

        let const_idx = self
            .function_mut()
            .chunk
            .add_constant(Value::Object(Object::Function(function)));
        if const_idx > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return (parameters, body);
        }
        self.emit_pair(Op::MakeClosure, const_idx as u8);
        for capture in &state.captures {
            let location = if capture.from_parent_stack { 1 } else { 0 };
            self.emit_byte(location);
            self.emit_byte(capture.index);
        }

        (parameters, body)
    }

    fn class_declaration(&mut self) -> Statement {
        self.consume(&TokenKind::Identifier(String::new()), "Expect class name.");
        let class_name = self.previous.lexeme.clone();
        let name_idx = self.identifier_constant(&class_name);
        self.declare_variable(&class_name);

        self.emit_pair(Op::Class, name_idx);
        self.define_variable(name_idx);

        self.classes.push(ClassState { has_superclass: false });

        let mut superclass = None;
        if self.match_advance(&TokenKind::Less) {
            self.consume(&TokenKind::Identifier(String::new()), "Expect superclass name.");
            let super_name = self.previous.lexeme.clone();
            if super_name == class_name {
                self.error("A class can't inherit from itself.");
            }
            // Scope sintetico: la superclasse resta viva come locale
            // `riba`, catturabile dai metodi.
            self.begin_scope();
            self.named_variable(super_name.clone(), false);
            self.add_local("riba");
            self.mark_initialized();

            self.named_variable(class_name.clone(), false);
            self.named_variable(super_name.clone(), false);
            self.emit(Op::Inherit);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
            superclass = Some(super_name);
        } else {
            self.named_variable(class_name.clone(), false);
        }

        let mut methods = Vec::new();
        self.consume(&TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            methods.push(self.method());
        }
        self.consume(&TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit(Op::Pop);

        let has_superclass = self.classes.last().map_or(false, |c| c.has_superclass);
        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();

        Statement::Klasi { name: class_name, superclass, methods }
    }

    fn method(&mut self) -> Statement {
        self.consume(&TokenKind::Identifier(String::new()), "Expect method name.");
        let name = self.previous.lexeme.clone();
        let name_idx = self.identifier_constant(&name);
        let kind = if name == "konstrutor" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        let (parameters, body) = self.function_body(kind, &name);
        self.emit_pair(Op::Method, name_idx);

        Statement::Funson { name, parameters, body }
    }

    // ── Statement ─────────────────────────────────────────────────────────

    fn statement(&mut self) -> Statement {
        if self.match_advance(&TokenKind::Imprimi) {
            self.print_statement()
        } else if self.match_advance(&TokenKind::Si) {
            self.si_statement()
        } else if self.match_advance(&TokenKind::Timenti) {
            self.timenti_statement()
        } else if self.match_advance(&TokenKind::Di) || self.match_advance(&TokenKind::Pa) {
            self.pa_statement()
        } else if self.match_advance(&TokenKind::Sai) {
            self.sai_statement()
        } else if self.match_advance(&TokenKind::Salta) {
            self.salta_statement()
        } else if self.match_advance(&TokenKind::Divolvi) {
            self.divolvi_statement()
        } else if self.match_advance(&TokenKind::LeftBrace) {
            self.begin_scope();
            let statements = self.block_statements();
            self.end_scope();
            Statement::Block(statements)
        } else {
            self.expression_statement()
        }
    }

    fn block_statements(&mut self) -> Vec<Statement> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            statements.push(self.declaration());
        }
        self.consume(&TokenKind::RightBrace, "Expect '}' after block.");
        statements
    }

    fn print_statement(&mut self) -> Statement {
        let expression = self.expression();
        self.consume(&TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(Op::Print);
        Statement::Print(expression)
    }

    fn expression_statement(&mut self) -> Statement {
        let expression = self.expression();
        self.consume(&TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(Op::Pop);
        Statement::Expression(expression)
    }

    /// I due `Pop` lasciano lo stack senza residui della condizione su
    /// entrambi i rami.
    fn si_statement(&mut self) -> Statement {
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'si'.");
        let condition = self.expression();
        self.consume(&TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);
        let then_branch = Box::new(self.statement());
        let else_jump = self.emit_jump(Op::Jump);

        self.patch_jump(then_jump);
        self.emit(Op::Pop);
        let else_branch = if self.match_advance(&TokenKind::Sinou) {
            Some(Box::new(self.statement()))
        } else {
            None
        };
        self.patch_jump(else_jump);

        Statement::Si { condition, then_branch, else_branch }
    }

    fn timenti_statement(&mut self) -> Statement {
        let loop_start = self.code_len();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'timenti'.");
        let condition = self.expression();
        self.consume(&TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);

        self.loops.push(LoopState {
            continue_target: loop_start,
            break_jumps: Vec::new(),
            scope_depth: self.function().scope_depth,
        });
        let body = Box::new(self.statement());
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(Op::Pop);

        let finished = self.loops.pop().unwrap();
        for jump in finished.break_jumps {
            self.patch_jump(jump);
        }

        Statement::Timenti { condition, body }
    }

    /// `di` e `pa` aprono lo stesso ciclo con clausole opzionali.
    fn pa_statement(&mut self) -> Statement {
        self.begin_scope();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'pa'.");

        let initializer = if self.match_advance(&TokenKind::Semicolon) {
            None
        } else if self.match_advance(&TokenKind::Mimoria) {
            Some(Box::new(self.var_declaration()))
        } else {
            Some(Box::new(self.expression_statement()))
        };

        let mut loop_start = self.code_len();
        let mut exit_jump = None;
        let condition = if !self.match_advance(&TokenKind::Semicolon) {
            let condition = self.expression();
            self.consume(&TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Op::JumpIfFalse));
            self.emit(Op::Pop);
            Some(condition)
        } else {
            None
        };

        let increment = if !self.match_advance(&TokenKind::RightParen) {
            let body_jump = self.emit_jump(Op::Jump);
            let increment_start = self.code_len();
            let increment = self.expression();
            self.emit(Op::Pop);
            self.consume(&TokenKind::RightParen, "Expect ')' after for clauses.");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
            Some(increment)
        } else {
            None
        };

        self.loops.push(LoopState {
            continue_target: loop_start,
            break_jumps: Vec::new(),
            scope_depth: self.function().scope_depth,
        });
        let body = Box::new(self.statement());
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(Op::Pop);
        }

        let finished = self.loops.pop().unwrap();
        for jump in finished.break_jumps {
            self.patch_jump(jump);
        }

        self.end_scope();
        Statement::Pa { initializer, condition, increment, body }
    }

    fn sai_statement(&mut self) -> Statement {
        self.consume(&TokenKind::Semicolon, "Expect ';' after 'sai'.");
        if self.loops.is_empty() {
            self.error("Can't use 'sai' outside of a loop.");
            return Statement::Sai;
        }
        let depth = self.loops.last().unwrap().scope_depth;
        self.discard_locals_to(depth);
        let jump = self.emit_jump(Op::Jump);
        self.loops.last_mut().unwrap().break_jumps.push(jump);
        Statement::Sai
    }

    fn salta_statement(&mut self) -> Statement {
        self.consume(&TokenKind::Semicolon, "Expect ';' after 'salta'.");
        if self.loops.is_empty() {
            self.error("Can't use 'salta' outside of a loop.");
            return Statement::Salta;
        }
        let state = self.loops.last().unwrap();
        let (depth, target) = (state.scope_depth, state.continue_target);
        self.discard_locals_to(depth);
        self.emit_loop(target);
        Statement::Salta
    }

    fn divolvi_statement(&mut self) -> Statement {
        if self.function().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_advance(&TokenKind::Semicolon) {
            self.emit_return();
            return Statement::Divolvi(None);
        }
        if self.function().kind == FunctionKind::Initializer {
            self.error("Can't return a value from an initializer.");
        }
        let value = self.expression();
        self.consume(&TokenKind::Semicolon, "Expect ';' after return value.");
        self.emit(Op::Return);
        Statement::Divolvi(Some(value))
    }

    // ── Espressioni (Pratt) ───────────────────────────────────────────────

    fn expression(&mut self) -> Expression {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Expression {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        let mut expression = self.prefix(can_assign);

        while precedence <= Self::precedence_of(&self.current.kind) {
            self.advance();
            expression = self.infix(expression, can_assign);
        }

        if can_assign && self.match_advance(&TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
        expression
    }

    fn precedence_of(kind: &TokenKind) -> Precedence {
        match kind {
            TokenKind::Ou => Precedence::Or,
            TokenKind::E => Precedence::And,
            TokenKind::EqualEqual | TokenKind::NotEqual => Precedence::Equality,
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => Precedence::Comparison,
            TokenKind::Plus | TokenKind::Minus => Precedence::Term,
            TokenKind::Asterisk | TokenKind::Slash => Precedence::Factor,
            TokenKind::Caret => Precedence::Exponent,
            TokenKind::LeftParen | TokenKind::LeftBrace | TokenKind::Dot => Precedence::Call,
            _ => Precedence::None,
        }
    }

    fn prefix(&mut self, can_assign: bool) -> Expression {
        match self.previous.kind.clone() {
            TokenKind::Number(n) => {
                self.emit_constant(Value::Number(n));
                Expression::Number(n)
            }
            TokenKind::Str(s) => {
                let string = self.intern(&s);
                self.emit_constant(Value::Object(Object::String(string)));
                Expression::Str(s)
            }
            TokenKind::Interpolation(first) => self.interpolation(first),
            TokenKind::Verdadi => {
                self.emit(Op::PushTrue);
                Expression::Boolean(true)
            }
            TokenKind::Falsu => {
                self.emit(Op::PushFalse);
                Expression::Boolean(false)
            }
            TokenKind::Nulo => {
                self.emit(Op::PushNil);
                Expression::Nil
            }
            TokenKind::Identifier(name) => self.named_variable(name, can_assign),
            TokenKind::Keli => self.keli_expression(),
            TokenKind::Riba => self.riba_expression(),
            TokenKind::LeftParen => {
                let expression = self.expression();
                self.consume(&TokenKind::RightParen, "Expect ')' after expression.");
                expression
            }
            TokenKind::Minus => {
                let operand = self.parse_precedence(Precedence::Unary);
                self.emit(Op::Negate);
                Expression::Unary { operator: "-", operand: Box::new(operand) }
            }
            TokenKind::Ka => {
                let operand = self.parse_precedence(Precedence::Unary);
                self.emit(Op::Not);
                Expression::Unary { operator: "ka", operand: Box::new(operand) }
            }
            _ => {
                self.error("Expect expression.");
                Expression::Nil
            }
        }
    }

    fn infix(&mut self, lhs: Expression, can_assign: bool) -> Expression {
        match self.previous.kind.clone() {
            TokenKind::Plus => self.binary(lhs, "+", Precedence::Factor, &[Op::Add]),
            TokenKind::Minus => self.binary(lhs, "-", Precedence::Factor, &[Op::Subtract]),
            TokenKind::Asterisk => self.binary(lhs, "*", Precedence::Exponent, &[Op::Multiply]),
            TokenKind::Slash => self.binary(lhs, "/", Precedence::Exponent, &[Op::Divide]),
            // Associativa a destra: stessa precedenza nella ricorsione.
            TokenKind::Caret => self.binary(lhs, "^", Precedence::Exponent, &[Op::Power]),
            TokenKind::EqualEqual => self.binary(lhs, "==", Precedence::Comparison, &[Op::Equal]),
            TokenKind::NotEqual => {
                self.binary(lhs, "=/=", Precedence::Comparison, &[Op::Equal, Op::Not])
            }
            TokenKind::Less => self.binary(lhs, "<", Precedence::Term, &[Op::Less]),
            TokenKind::LessEqual => {
                self.binary(lhs, "<=", Precedence::Term, &[Op::Greater, Op::Not])
            }
            TokenKind::Greater => self.binary(lhs, ">", Precedence::Term, &[Op::Greater]),
            TokenKind::GreaterEqual => {
                self.binary(lhs, ">=", Precedence::Term, &[Op::Less, Op::Not])
            }
            TokenKind::E => self.and_expression(lhs),
            TokenKind::Ou => self.or_expression(lhs),
            TokenKind::LeftParen => {
                let (argc, arguments) =
                    self.argument_list(&TokenKind::RightParen, "Expect ')' after arguments.");
                self.emit_pair(Op::Call, argc);
                Expression::Call { callee: Box::new(lhs), arguments }
            }
            TokenKind::LeftBrace => {
                let (argc, arguments) =
                    self.argument_list(&TokenKind::RightBrace, "Expect '}' after arguments.");
                self.emit_pair(Op::CallClass, argc);
                Expression::ClassCall { callee: Box::new(lhs), arguments }
            }
            TokenKind::Dot => self.dot(lhs, can_assign),
            _ => {
                self.error("Expect expression.");
                lhs
            }
        }
    }

    fn binary(
        &mut self,
        lhs: Expression,
        operator: &'static str,
        next: Precedence,
        ops: &[Op],
    ) -> Expression {
        let rhs = self.parse_precedence(next);
        for op in ops {
            self.emit(*op);
        }
        Expression::Binary {
            operator,
            left: Box::new(lhs),
            right: Box::new(rhs),
        }
    }

    fn and_expression(&mut self, lhs: Expression) -> Expression {
        let end_jump = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);
        let rhs = self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
        Expression::Binary { operator: "e", left: Box::new(lhs), right: Box::new(rhs) }
    }

    fn or_expression(&mut self, lhs: Expression) -> Expression {
        let else_jump = self.emit_jump(Op::JumpIfFalse);
        let end_jump = self.emit_jump(Op::Jump);
        self.patch_jump(else_jump);
        self.emit(Op::Pop);
        let rhs = self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
        Expression::Binary { operator: "ou", left: Box::new(lhs), right: Box::new(rhs) }
    }

    fn dot(&mut self, lhs: Expression, can_assign: bool) -> Expression {
        self.consume(&TokenKind::Identifier(String::new()), "Expect property name after '.'.");
        let name = self.previous.lexeme.clone();
        let name_idx = self.identifier_constant(&name);

        if can_assign && self.match_advance(&TokenKind::Equal) {
            let value = self.expression();
            self.emit_pair(Op::SetProperty, name_idx);
            Expression::Assign {
                target: Box::new(Expression::Property { object: Box::new(lhs), name }),
                value: Box::new(value),
            }
        } else if self.match_advance(&TokenKind::LeftParen) {
            // Get e chiamata fusi: niente bound method nel caso comune.
            let (argc, arguments) =
                self.argument_list(&TokenKind::RightParen, "Expect ')' after arguments.");
            self.emit(Op::Invoke);
            self.emit_byte(name_idx);
            self.emit_byte(argc);
            Expression::Call {
                callee: Box::new(Expression::Property { object: Box::new(lhs), name }),
                arguments,
            }
        } else {
            self.emit_pair(Op::GetProperty, name_idx);
            Expression::Property { object: Box::new(lhs), name }
        }
    }

    fn named_variable(&mut self, name: String, can_assign: bool) -> Expression {
        enum Target {
            Local(u8),
            Captured(u8),
            Global(u8),
        }

        let func_index = self.functions.len() - 1;
        let target = if let Some(slot) = self.resolve_local(func_index, &name) {
            Target::Local(slot)
        } else if let Some(index) = self.resolve_captured(func_index, &name) {
            Target::Captured(index)
        } else {
            if self.declaring_global.as_deref() == Some(name.as_str()) {
                self.error("Can't read variable in its own initializer.");
            }
            Target::Global(self.identifier_constant(&name))
        };

        if can_assign && self.match_advance(&TokenKind::Equal) {
            let value = self.expression();
            match target {
                Target::Local(slot) => self.emit_pair(Op::LocalWrite, slot),
                Target::Captured(index) => self.emit_pair(Op::CapturedWrite, index),
                Target::Global(idx) => self.emit_pair(Op::AssignGlobal, idx),
            }
            Expression::Assign {
                target: Box::new(Expression::Variable(name)),
                value: Box::new(value),
            }
        } else {
            match target {
                Target::Local(slot) => self.emit_pair(Op::LocalRead, slot),
                Target::Captured(index) => self.emit_pair(Op::CapturedRead, index),
                Target::Global(idx) => self.emit_pair(Op::ReadGlobal, idx),
            }
            Expression::Variable(name)
        }
    }

    fn keli_expression(&mut self) -> Expression {
        if self.classes.is_empty() {
            self.error("Can't use 'keli' outside of a class.");
            return Expression::Nil;
        }
        self.named_variable("keli".to_string(), false);
        Expression::Keli
    }

    fn riba_expression(&mut self) -> Expression {
        if self.classes.is_empty() {
            self.error("Can't use 'riba' outside of a class.");
        } else if !self.classes.last().map_or(false, |c| c.has_superclass) {
            self.error("Can't use 'riba' in a class with no superclass.");
        }
        self.consume(&TokenKind::Dot, "Expect '.' after 'riba'.");
        self.consume(&TokenKind::Identifier(String::new()), "Expect superclass method name.");
        let method = self.previous.lexeme.clone();
        let name_idx = self.identifier_constant(&method);

        self.named_variable("keli".to_string(), false);
        if self.match_advance(&TokenKind::LeftParen) {
            let (argc, _arguments) =
                self.argument_list(&TokenKind::RightParen, "Expect ')' after arguments.");
            self.named_variable("riba".to_string(), false);
            self.emit(Op::InvokeSuper);
            self.emit_byte(name_idx);
            self.emit_byte(argc);
        } else {
            self.named_variable("riba".to_string(), false);
            self.emit_pair(Op::GetSuper, name_idx);
        }
        Expression::Riba { method }
    }

    fn argument_list(&mut self, terminator: &TokenKind, message: &str) -> (u8, Vec<Expression>) {
        let mut arguments = Vec::new();
        if !self.check(terminator) {
            loop {
                if arguments.len() == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                arguments.push(self.expression());
                if !self.match_advance(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(terminator, message);
        (arguments.len().min(255) as u8, arguments)
    }

    /// Letterale templato: costanti e espressioni alternate, chiuso da
    /// `Interpolate n` con n = valori spinti.
    fn interpolation(&mut self, first: String) -> Expression {
        let mut parts = Vec::new();
        let mut count: usize = 0;
        let mut piece = first;
        loop {
            if !piece.is_empty() {
                let string = self.intern(&piece);
                self.emit_constant(Value::Object(Object::String(string)));
                parts.push(Expression::Str(piece.clone()));
                count += 1;
            }
            parts.push(self.expression());
            count += 1;

            self.advance();
            match self.previous.kind.clone() {
                TokenKind::Interpolation(next) => piece = next,
                TokenKind::Str(tail) => {
                    if !tail.is_empty() {
                        let string = self.intern(&tail);
                        self.emit_constant(Value::Object(Object::String(string)));
                        parts.push(Expression::Str(tail));
                        count += 1;
                    }
                    break;
                }
                _ => {
                    self.error("Expect end of string interpolation.");
                    break;
                }
            }
        }
        if count > u8::MAX as usize {
            self.error("Too many segments in string interpolation.");
        }
        self.emit_pair(Op::Interpolate, count.min(255) as u8);
        Expression::Interpolation { parts }
    }
}
