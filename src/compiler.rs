// compiler.rs - Recursive-descent compiler from the C subset to ARM64 assembly

use std::fmt;
use std::io::{self, Write};

use crate::codegen::{Category, Gen, FRAME_SIZE};
use crate::lexer::{LexError, Lexer, Tok};
use crate::source::Source;

/// Per-function symbol capacity.
pub const MAX_SYMBOLS: usize = 64;

/// Arguments beyond the first eight registers are rejected.
pub const MAX_ARGS: usize = 8;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug)]
pub enum CompileError {
    Lex(LexError),
    Syntax(Tok),
    UndefinedSymbol(String),
    ExpectedLvalue,
    ExpectedPointer,
    ExpectedInt,
    TooManyArguments,
    TooManySymbols,
    FrameOverflow,
    Io(io::Error),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompileError::Lex(e) => write!(f, "{}", e),
            CompileError::Syntax(tok) => write!(f, "unexpected token `{}`", tok),
            CompileError::UndefinedSymbol(name) => write!(f, "undefined symbol `{}`", name),
            CompileError::ExpectedLvalue => write!(f, "expected an lvalue"),
            CompileError::ExpectedPointer => write!(f, "expected a pointer value"),
            CompileError::ExpectedInt => write!(f, "expected an integer value"),
            CompileError::TooManyArguments => write!(f, "more than 8 arguments"),
            CompileError::TooManySymbols => write!(f, "too many locals"),
            CompileError::FrameOverflow => write!(f, "locals exceed the stack frame"),
            CompileError::Io(e) => write!(f, "write failed: {}", e),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<io::Error> for CompileError {
    fn from(e: io::Error) -> Self {
        CompileError::Io(e)
    }
}

// ============================================================================
// SYMBOL TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymKind {
    Int,
    Ptr,
    Array,
}

struct Sym {
    name: String,
    kind: SymKind,
    /// Positive distance below the frame pointer.
    offset: u32,
}

// ============================================================================
// COMPILER
// ============================================================================

/// Compile a whole translation unit from `src`, writing assembly to `out`.
/// The first error emits `ERR\n` on the output stream and stops.
pub fn compile(src: &mut Source, out: &mut dyn Write) -> Result<(), CompileError> {
    let result = run(src, out);
    if result.is_err() {
        let _ = out.write_all(b"ERR\n");
        let _ = out.flush();
    }
    result
}

fn run(src: &mut Source, out: &mut dyn Write) -> Result<(), CompileError> {
    let mut cc = Compiler {
        lx: Lexer::new(src)?,
        gen: Gen::new(out),
        syms: Vec::new(),
        frame: 0,
        ret_label: 0,
    };
    cc.program()
}

struct Compiler<'a> {
    lx: Lexer<'a>,
    gen: Gen<'a>,
    syms: Vec<Sym>,
    /// Frame cursor: bytes of frame space handed out so far.
    frame: u32,
    ret_label: u32,
}

impl<'a> Compiler<'a> {
    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn expect(&mut self, tok: Tok) -> Result<(), CompileError> {
        if *self.lx.cur() != tok {
            return Err(CompileError::Syntax(self.lx.cur().clone()));
        }
        self.lx.advance()?;
        Ok(())
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        match self.lx.cur().clone() {
            Tok::Ident(name) => {
                self.lx.advance()?;
                Ok(name)
            }
            other => Err(CompileError::Syntax(other)),
        }
    }

    fn expect_num(&mut self) -> Result<i64, CompileError> {
        match self.lx.cur().clone() {
            Tok::Num(n) => {
                self.lx.advance()?;
                Ok(n)
            }
            other => Err(CompileError::Syntax(other)),
        }
    }

    fn at(&self, tok: &Tok) -> bool {
        self.lx.cur() == tok
    }

    // ------------------------------------------------------------------
    // Symbols
    // ------------------------------------------------------------------

    fn add_sym(&mut self, name: String, kind: SymKind, count: u32) -> Result<u32, CompileError> {
        if self.syms.len() >= MAX_SYMBOLS {
            return Err(CompileError::TooManySymbols);
        }
        let size = match kind {
            SymKind::Array => (count * 4).div_ceil(8) * 8,
            _ => 8,
        };
        self.frame += size;
        if self.frame > FRAME_SIZE {
            return Err(CompileError::FrameOverflow);
        }
        let offset = self.frame;
        self.syms.push(Sym { name, kind, offset });
        Ok(offset)
    }

    /// Most recent declaration wins.
    fn find_sym(&self, name: &str) -> Option<&Sym> {
        self.syms.iter().rev().find(|s| s.name == name)
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn program(&mut self) -> Result<(), CompileError> {
        while !self.at(&Tok::Eof) {
            self.function()?;
        }
        Ok(())
    }

    fn function(&mut self) -> Result<(), CompileError> {
        self.expect(Tok::Int)?;
        while self.at(&Tok::Star) {
            self.lx.advance()?;
        }
        let name = self.expect_ident()?;
        self.expect(Tok::LParen)?;

        self.syms.clear();
        self.frame = 0;

        let mut params = 0usize;
        if !self.at(&Tok::RParen) {
            loop {
                self.expect(Tok::Int)?;
                let mut kind = SymKind::Int;
                while self.at(&Tok::Star) {
                    kind = SymKind::Ptr;
                    self.lx.advance()?;
                }
                let pname = self.expect_ident()?;
                self.add_sym(pname, kind, 0)?;
                params += 1;
                if params > MAX_ARGS {
                    return Err(CompileError::TooManyArguments);
                }
                if self.at(&Tok::Comma) {
                    self.lx.advance()?;
                } else {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;

        // Prototype only.
        if self.at(&Tok::Semi) {
            self.lx.advance()?;
            return Ok(());
        }

        self.expect(Tok::LBrace)?;
        self.ret_label = self.gen.new_label();
        self.gen.prologue(&name)?;
        for i in 0..params {
            let (offset, pointer) = {
                let sym = &self.syms[i];
                (sym.offset, sym.kind == SymKind::Ptr)
            };
            self.gen.store_param(i, offset, pointer)?;
        }

        while !self.at(&Tok::RBrace) {
            if self.at(&Tok::Eof) {
                return Err(CompileError::Syntax(Tok::Eof));
            }
            self.statement()?;
        }
        self.lx.advance()?;

        self.gen.default_return()?;
        self.gen.label(self.ret_label)?;
        self.gen.epilogue()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Result<(), CompileError> {
        match self.lx.cur().clone() {
            Tok::LBrace => {
                self.lx.advance()?;
                while !self.at(&Tok::RBrace) {
                    if self.at(&Tok::Eof) {
                        return Err(CompileError::Syntax(Tok::Eof));
                    }
                    self.statement()?;
                }
                self.lx.advance()?;
                Ok(())
            }
            Tok::Semi => {
                self.lx.advance()?;
                Ok(())
            }
            Tok::Return => {
                self.lx.advance()?;
                if !self.at(&Tok::Semi) {
                    let cat = self.expression()?;
                    self.gen.materialize(cat)?;
                }
                self.gen.branch(self.ret_label)?;
                self.expect(Tok::Semi)
            }
            Tok::If => self.if_statement(),
            Tok::While => self.while_statement(),
            Tok::For => self.for_statement(),
            Tok::Int => self.declaration(),
            _ => {
                self.expression()?;
                self.expect(Tok::Semi)
            }
        }
    }

    fn if_statement(&mut self) -> Result<(), CompileError> {
        self.lx.advance()?;
        self.expect(Tok::LParen)?;
        let cat = self.expression()?;
        let cat = self.gen.materialize(cat)?;
        self.expect(Tok::RParen)?;

        let else_label = self.gen.new_label();
        self.gen.branch_if_zero(cat, else_label)?;
        self.statement()?;

        if self.at(&Tok::Else) {
            let end_label = self.gen.new_label();
            self.gen.branch(end_label)?;
            self.gen.label(else_label)?;
            self.lx.advance()?;
            self.statement()?;
            self.gen.label(end_label)?;
        } else {
            self.gen.label(else_label)?;
        }
        Ok(())
    }

    fn while_statement(&mut self) -> Result<(), CompileError> {
        self.lx.advance()?;
        let top_label = self.gen.new_label();
        let end_label = self.gen.new_label();

        self.gen.label(top_label)?;
        self.expect(Tok::LParen)?;
        let cat = self.expression()?;
        let cat = self.gen.materialize(cat)?;
        self.expect(Tok::RParen)?;
        self.gen.branch_if_zero(cat, end_label)?;

        self.statement()?;
        self.gen.branch(top_label)?;
        self.gen.label(end_label)?;
        Ok(())
    }

    fn for_statement(&mut self) -> Result<(), CompileError> {
        self.lx.advance()?;
        self.expect(Tok::LParen)?;

        if !self.at(&Tok::Semi) {
            self.expression()?;
        }
        self.expect(Tok::Semi)?;

        let top_label = self.gen.new_label();
        let end_label = self.gen.new_label();
        self.gen.label(top_label)?;

        // An absent condition is true.
        if !self.at(&Tok::Semi) {
            let cat = self.expression()?;
            let cat = self.gen.materialize(cat)?;
            self.gen.branch_if_zero(cat, end_label)?;
        }
        self.expect(Tok::Semi)?;

        // The update clause runs after the body; hold its tokens until then.
        let update = self.lx.capture_update()?;

        self.statement()?;

        if !update.is_empty() {
            self.lx.begin_replay(update);
            self.expression()?;
            if !self.at(&Tok::Eof) {
                return Err(CompileError::Syntax(self.lx.cur().clone()));
            }
            self.lx.end_replay();
        }

        self.gen.branch(top_label)?;
        self.gen.label(end_label)?;
        Ok(())
    }

    fn declaration(&mut self) -> Result<(), CompileError> {
        self.lx.advance()?;
        let mut kind = SymKind::Int;
        while self.at(&Tok::Star) {
            kind = SymKind::Ptr;
            self.lx.advance()?;
        }
        let name = self.expect_ident()?;
        let mut count = 0u32;
        if self.at(&Tok::LBracket) {
            self.lx.advance()?;
            let n = self.expect_num()?;
            if n <= 0 {
                return Err(CompileError::Syntax(Tok::Num(n)));
            }
            count = n as u32;
            kind = SymKind::Array;
            self.expect(Tok::RBracket)?;
        }
        self.add_sym(name, kind, count)?;
        self.expect(Tok::Semi)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Result<Category, CompileError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Category, CompileError> {
        let lhs = self.equality()?;
        if !self.at(&Tok::Assign) {
            return Ok(lhs);
        }
        if !lhs.is_lvalue() {
            return Err(CompileError::ExpectedLvalue);
        }
        self.gen.push()?;
        self.lx.advance()?;
        let rhs = self.assignment()?;
        self.gen.materialize(rhs)?;
        self.gen.pop()?;
        self.gen.store_through(lhs.is_pointer())?;
        Ok(if lhs.is_pointer() {
            Category::PtrRv
        } else {
            Category::IntRv
        })
    }

    fn equality(&mut self) -> Result<Category, CompileError> {
        let mut lhs = self.relational()?;
        loop {
            let cond = match self.lx.cur() {
                Tok::EqEq => "eq",
                Tok::NotEq => "ne",
                _ => break,
            };
            lhs = self.compare_with(lhs, cond, Self::relational)?;
        }
        Ok(lhs)
    }

    fn relational(&mut self) -> Result<Category, CompileError> {
        let mut lhs = self.additive()?;
        loop {
            let cond = match self.lx.cur() {
                Tok::Lt => "lt",
                Tok::Le => "le",
                Tok::Gt => "gt",
                Tok::Ge => "ge",
                _ => break,
            };
            lhs = self.compare_with(lhs, cond, Self::additive)?;
        }
        Ok(lhs)
    }

    fn compare_with(
        &mut self,
        lhs: Category,
        cond: &str,
        operand: fn(&mut Self) -> Result<Category, CompileError>,
    ) -> Result<Category, CompileError> {
        self.int_rvalue(lhs)?;
        self.gen.push()?;
        self.lx.advance()?;
        let rhs = operand(self)?;
        self.int_rvalue(rhs)?;
        self.gen.pop()?;
        self.gen.compare(cond)?;
        Ok(Category::IntRv)
    }

    fn additive(&mut self) -> Result<Category, CompileError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.lx.cur() {
                Tok::Plus => "add",
                Tok::Minus => "sub",
                _ => break,
            };
            self.int_rvalue(lhs)?;
            self.gen.push()?;
            self.lx.advance()?;
            let rhs = self.multiplicative()?;
            self.int_rvalue(rhs)?;
            self.gen.pop()?;
            self.gen.binop(op)?;
            lhs = Category::IntRv;
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Category, CompileError> {
        let mut lhs = self.unary()?;
        loop {
            let op = self.lx.cur().clone();
            if op != Tok::Star && op != Tok::Slash && op != Tok::Percent {
                break;
            }
            self.int_rvalue(lhs)?;
            self.gen.push()?;
            self.lx.advance()?;
            let rhs = self.unary()?;
            self.int_rvalue(rhs)?;
            self.gen.pop()?;
            match op {
                Tok::Star => self.gen.binop("mul")?,
                Tok::Slash => self.gen.div()?,
                _ => self.gen.rem()?,
            }
            lhs = Category::IntRv;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Category, CompileError> {
        match self.lx.cur().clone() {
            Tok::Minus => {
                self.lx.advance()?;
                let cat = self.unary()?;
                self.int_rvalue(cat)?;
                self.gen.neg()?;
                Ok(Category::IntRv)
            }
            Tok::Amp => {
                self.lx.advance()?;
                let cat = self.unary()?;
                if !cat.is_lvalue() {
                    return Err(CompileError::ExpectedLvalue);
                }
                Ok(Category::PtrRv)
            }
            Tok::Star => {
                self.lx.advance()?;
                let cat = self.unary()?;
                let cat = self.gen.materialize(cat)?;
                if cat != Category::PtrRv {
                    return Err(CompileError::ExpectedPointer);
                }
                Ok(Category::IntLv)
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Category, CompileError> {
        let mut cat = self.primary()?;
        while self.at(&Tok::LBracket) {
            let base = self.gen.materialize(cat)?;
            if base != Category::PtrRv {
                return Err(CompileError::ExpectedPointer);
            }
            self.gen.push()?;
            self.lx.advance()?;
            let idx = self.expression()?;
            self.int_rvalue(idx)?;
            self.gen.index()?;
            self.expect(Tok::RBracket)?;
            cat = Category::IntLv;
        }
        Ok(cat)
    }

    fn primary(&mut self) -> Result<Category, CompileError> {
        match self.lx.cur().clone() {
            Tok::Num(n) => {
                self.lx.advance()?;
                self.gen.mov_imm(n)?;
                Ok(Category::IntRv)
            }
            Tok::LParen => {
                self.lx.advance()?;
                let cat = self.expression()?;
                self.expect(Tok::RParen)?;
                Ok(cat)
            }
            Tok::Ident(name) => {
                self.lx.advance()?;
                if self.at(&Tok::LParen) {
                    return self.call(&name);
                }
                let (kind, offset) = match self.find_sym(&name) {
                    Some(sym) => (sym.kind, sym.offset),
                    None => return Err(CompileError::UndefinedSymbol(name)),
                };
                self.gen.local_addr(offset)?;
                Ok(match kind {
                    SymKind::Int => Category::IntLv,
                    SymKind::Ptr => Category::PtrLv,
                    // Arrays decay to a pointer to their first element.
                    SymKind::Array => Category::PtrRv,
                })
            }
            other => Err(CompileError::Syntax(other)),
        }
    }

    fn call(&mut self, name: &str) -> Result<Category, CompileError> {
        self.lx.advance()?;
        let mut argc = 0usize;
        if !self.at(&Tok::RParen) {
            loop {
                let cat = self.assignment()?;
                self.gen.materialize(cat)?;
                self.gen.push()?;
                argc += 1;
                if argc > MAX_ARGS {
                    return Err(CompileError::TooManyArguments);
                }
                if self.at(&Tok::Comma) {
                    self.lx.advance()?;
                } else {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;
        for i in (0..argc).rev() {
            self.gen.pop_arg(i)?;
        }
        self.gen.call(name)?;
        Ok(Category::IntRv)
    }

    /// Materialize and require an int rvalue.
    fn int_rvalue(&mut self, cat: Category) -> Result<(), CompileError> {
        let cat = self.gen.materialize(cat)?;
        if cat != Category::IntRv {
            return Err(CompileError::ExpectedInt);
        }
        Ok(())
    }
}
