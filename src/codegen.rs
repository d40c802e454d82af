// codegen.rs - ARM64 assembly text emission

use std::io::{self, Write};

/// Fixed stack frame reserved below the frame pointer in every function.
pub const FRAME_SIZE: u32 = 512;

// ============================================================================
// EXPRESSION CATEGORIES
// ============================================================================

/// What an expression left behind: a loaded value or an address, of int or
/// pointer base. An lvalue keeps its address in x0 until materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    IntRv,
    PtrRv,
    IntLv,
    PtrLv,
}

impl Category {
    pub fn is_lvalue(self) -> bool {
        matches!(self, Category::IntLv | Category::PtrLv)
    }

    /// Whether the base type is a pointer.
    pub fn is_pointer(self) -> bool {
        matches!(self, Category::PtrRv | Category::PtrLv)
    }
}

// ============================================================================
// EMITTER
// ============================================================================

/// Assembly writer. Data-processing immediates print as `#0x` plus eight
/// lowercase hex digits of the 32-bit value; memory-operand offsets stay
/// decimal because the pre/post-index forms carry a sign. Labels are `.L`
/// plus eight hex digits from one monotone counter.
pub struct Gen<'a> {
    out: &'a mut dyn Write,
    labels: u32,
}

impl<'a> Gen<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Gen { out, labels: 0 }
    }

    pub fn new_label(&mut self) -> u32 {
        let label = self.labels;
        self.labels += 1;
        label
    }

    pub fn label(&mut self, label: u32) -> io::Result<()> {
        writeln!(self.out, ".L{:08x}:", label)
    }

    pub fn prologue(&mut self, name: &str) -> io::Result<()> {
        writeln!(self.out, ".global _{}", name)?;
        writeln!(self.out, ".align 4")?;
        writeln!(self.out, "_{}:", name)?;
        writeln!(self.out, "  stp x29, x30, [sp, #-16]!")?;
        writeln!(self.out, "  mov x29, sp")?;
        writeln!(self.out, "  sub sp, sp, #0x{:08x}", FRAME_SIZE)
    }

    pub fn epilogue(&mut self) -> io::Result<()> {
        writeln!(self.out, "  mov sp, x29")?;
        writeln!(self.out, "  ldp x29, x30, [sp], #16")?;
        writeln!(self.out, "  ret")
    }

    /// Store the i-th incoming argument register to its frame slot.
    pub fn store_param(&mut self, index: usize, offset: u32, pointer: bool) -> io::Result<()> {
        if pointer {
            writeln!(self.out, "  str x{}, [x29, #-{}]", index, offset)
        } else {
            writeln!(self.out, "  str w{}, [x29, #-{}]", index, offset)
        }
    }

    /// Load a 32-bit immediate into w0, in 16-bit chunks.
    pub fn mov_imm(&mut self, value: i64) -> io::Result<()> {
        let v = value as u32;
        let low = v & 0xffff;
        let high = v >> 16;
        writeln!(self.out, "  mov w0, #0x{:08x}", low)?;
        if high != 0 {
            writeln!(self.out, "  movk w0, #0x{:08x}, lsl #16", high)?;
        }
        Ok(())
    }

    /// Address of a frame slot into x0.
    pub fn local_addr(&mut self, offset: u32) -> io::Result<()> {
        writeln!(self.out, "  sub x0, x29, #0x{:08x}", offset)
    }

    /// Spill x0 (16-byte slot keeps sp aligned).
    pub fn push(&mut self) -> io::Result<()> {
        writeln!(self.out, "  str x0, [sp, #-16]!")
    }

    /// Reload the spilled value into x1.
    pub fn pop(&mut self) -> io::Result<()> {
        writeln!(self.out, "  ldr x1, [sp], #16")
    }

    /// Pop a call argument into its register.
    pub fn pop_arg(&mut self, index: usize) -> io::Result<()> {
        writeln!(self.out, "  ldr x{}, [sp], #16", index)
    }

    /// Turn an lvalue into a loaded value; rvalues pass through.
    pub fn materialize(&mut self, cat: Category) -> io::Result<Category> {
        match cat {
            Category::IntLv => {
                writeln!(self.out, "  ldr w0, [x0]")?;
                Ok(Category::IntRv)
            }
            Category::PtrLv => {
                writeln!(self.out, "  ldr x0, [x0]")?;
                Ok(Category::PtrRv)
            }
            other => Ok(other),
        }
    }

    /// Store the value in w0/x0 through the address in x1, at the width of
    /// the target base.
    pub fn store_through(&mut self, pointer: bool) -> io::Result<()> {
        if pointer {
            writeln!(self.out, "  str x0, [x1]")
        } else {
            writeln!(self.out, "  str w0, [x1]")
        }
    }

    /// w0 = w1 <op> w0 for add/sub/mul.
    pub fn binop(&mut self, op: &str) -> io::Result<()> {
        writeln!(self.out, "  {} w0, w1, w0", op)
    }

    pub fn div(&mut self) -> io::Result<()> {
        writeln!(self.out, "  sdiv w0, w1, w0")
    }

    pub fn rem(&mut self) -> io::Result<()> {
        writeln!(self.out, "  sdiv w2, w1, w0")?;
        writeln!(self.out, "  msub w0, w2, w0, w1")
    }

    pub fn neg(&mut self) -> io::Result<()> {
        writeln!(self.out, "  neg w0, w0")
    }

    /// Compare w1 against w0 and set w0 to 0/1.
    pub fn compare(&mut self, cond: &str) -> io::Result<()> {
        writeln!(self.out, "  cmp w1, w0")?;
        writeln!(self.out, "  cset w0, {}", cond)
    }

    /// Scale the int index in w0 by the 4-byte element size and add the
    /// base popped into x1; the sum lands in x0.
    pub fn index(&mut self) -> io::Result<()> {
        writeln!(self.out, "  sxtw x0, w0")?;
        writeln!(self.out, "  lsl x0, x0, #2")?;
        self.pop()?;
        writeln!(self.out, "  add x0, x1, x0")
    }

    pub fn branch(&mut self, label: u32) -> io::Result<()> {
        writeln!(self.out, "  b .L{:08x}", label)
    }

    /// Branch to `label` when the just-materialized condition is zero.
    pub fn branch_if_zero(&mut self, cat: Category, label: u32) -> io::Result<()> {
        let reg = if cat.is_pointer() { "x0" } else { "w0" };
        writeln!(self.out, "  cbz {}, .L{:08x}", reg, label)
    }

    pub fn call(&mut self, name: &str) -> io::Result<()> {
        writeln!(self.out, "  bl _{}", name)
    }

    pub fn default_return(&mut self) -> io::Result<()> {
        self.mov_imm(0)
    }
}
