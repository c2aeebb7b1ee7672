//! x86-64 SysV back-end.
//!
//! Register allocation: `rbp` holds the cell pointer, `rbx` the print
//! callback, `r12` the read callback; all three are callee-saved so calling
//! out needs no spills. Cell accesses always use the `[rbp + disp32]` form
//! parameterized by cell width. Forward branches get a placeholder disp32
//! and a fix-up entry that the matching back branch patches in place.

use crate::cell::CellWidth;
use crate::error::Error;
use crate::insn::{Insn, Op};

/// Encode the `REX` byte.
const fn rex(w: bool, r: u8, x: u8, b: u8) -> u8 {
    let w = if w { 1 } else { 0 };
    let r = (r >> 3) & 1;
    let x = (x >> 3) & 1;
    let b = (b >> 3) & 1;
    0b0100_0000 | ((w & 1) << 3) | (r << 2) | (x << 1) | b
}

/// Encode the `ModR/M` byte.
const fn modrm(mod_: u8, reg: u8, rm: u8) -> u8 {
    ((mod_ & 0b11) << 6) | ((reg & 0b111) << 3) | (rm & 0b111)
}

// Register indices used by the templates.
const RAX: u8 = 0;
const RCX: u8 = 1;
const RBP: u8 = 5;

struct Asm {
    buf: Vec<u8>,
    width: CellWidth,
    /// Byte offsets of pending forward-jump disp32 patch sites.
    fixups: Vec<usize>,
}

impl Asm {
    fn new(width: CellWidth) -> Asm {
        Asm { buf: Vec::with_capacity(1024), width, fixups: Vec::new() }
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Patch a previously emitted placeholder.
    fn emit_at(&mut self, pos: usize, bytes: &[u8]) {
        self.buf[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    /// Scale a cell offset to a byte displacement.
    fn disp(&self, off: i64) -> Result<i32, Error> {
        let disp = off * self.width.bytes() as i64;
        i32::try_from(disp).map_err(|_| Error::UnsupportedLargeOffset(off))
    }

    /// Opcode prefix and width-adjusted opcode for a `[rbp + disp32]`
    /// operand, `reg` in the ModR/M reg slot (register index or opcode
    /// extension).
    fn mem_op(&mut self, opc8: u8, opc: u8, reg: u8, disp: i32) {
        match self.width {
            CellWidth::C8 => {
                if reg >= 8 {
                    self.emit(&[rex(false, reg, 0, RBP)]);
                }
                self.emit(&[opc8]);
            }
            CellWidth::C16 => {
                self.emit(&[0x66]);
                if reg >= 8 {
                    self.emit(&[rex(false, reg, 0, RBP)]);
                }
                self.emit(&[opc]);
            }
            CellWidth::C32 => {
                if reg >= 8 {
                    self.emit(&[rex(false, reg, 0, RBP)]);
                }
                self.emit(&[opc]);
            }
            CellWidth::C64 => {
                self.emit(&[rex(true, reg, 0, RBP), opc]);
            }
        }
        self.emit(&[modrm(0b10, reg, RBP)]);
        self.emit(&disp.to_le_bytes());
    }

    /// Cell-width immediate, emitted after the displacement of an MI form.
    fn mem_imm(&mut self, v: i64) {
        match self.width {
            CellWidth::C8 => self.emit(&[v as u8]),
            CellWidth::C16 => self.emit(&(v as u16).to_le_bytes()),
            // The 64-bit forms sign-extend their imm32; callers handle
            // values beyond that range.
            CellWidth::C32 | CellWidth::C64 => self.emit(&(v as u32).to_le_bytes()),
        }
    }

    fn mov_imm64(&mut self, reg: u8, v: i64) {
        self.emit(&[rex(true, 0, 0, reg), 0xb8 + (reg & 0b111)]);
        self.emit(&v.to_le_bytes());
    }

    /// `add cell[disp], v` wrapping at the cell width.
    fn add_mem(&mut self, disp: i32, v: i64) {
        if self.width == CellWidth::C64 && i32::try_from(v).is_err() {
            // Immediate would be sign-extended; go through a register.
            self.mov_imm64(RAX, v);
            self.mem_op(0x00, 0x01, RAX, disp);
            return;
        }
        self.mem_op(0x80, 0x81, 0, disp);
        self.mem_imm(v);
    }

    /// `mov cell[disp], v`.
    fn set_mem(&mut self, disp: i32, v: i64) {
        if self.width == CellWidth::C64 && i32::try_from(v).is_err() {
            self.mov_imm64(RAX, v);
            self.mem_op(0x88, 0x89, RAX, disp);
            return;
        }
        self.mem_op(0xc6, 0xc7, 0, disp);
        self.mem_imm(v);
    }

    /// `cmp cell[disp], 0`.
    fn cmp_mem_zero(&mut self, disp: i32) {
        match self.width {
            CellWidth::C8 => self.mem_op(0x80, 0x80, 7, disp),
            // Sign-extended imm8 form.
            _ => self.mem_op(0x83, 0x83, 7, disp),
        }
        self.emit(&[0]);
    }

    /// `add rbp, bytes` moving the cell pointer.
    fn move_ptr(&mut self, cells: i64) -> Result<(), Error> {
        let bytes = cells * self.width.bytes() as i64;
        let bytes = i32::try_from(bytes).map_err(|_| Error::UnsupportedLargeOffset(cells))?;
        self.emit(&[rex(true, 0, 0, RBP), 0x81, modrm(0b11, 0, RBP)]);
        self.emit(&bytes.to_le_bytes());
        Ok(())
    }

    /// Load the cell at `disp` into `rdi` (zero-extended) and call the print
    /// callback held in `rbx`.
    fn print(&mut self, disp: i32) {
        match self.width {
            CellWidth::C8 => {
                // movzx edi, byte [rbp + disp]
                self.emit(&[0x0f, 0xb6, modrm(0b10, 7, RBP)]);
                self.emit(&disp.to_le_bytes());
            }
            CellWidth::C16 => {
                // movzx edi, word [rbp + disp]
                self.emit(&[0x0f, 0xb7, modrm(0b10, 7, RBP)]);
                self.emit(&disp.to_le_bytes());
            }
            CellWidth::C32 => {
                // mov edi, [rbp + disp]
                self.emit(&[0x8b, modrm(0b10, 7, RBP)]);
                self.emit(&disp.to_le_bytes());
            }
            CellWidth::C64 => {
                // mov rdi, [rbp + disp]
                self.emit(&[rex(true, 7, 0, RBP), 0x8b, modrm(0b10, 7, RBP)]);
                self.emit(&disp.to_le_bytes());
            }
        }
        // call rbx
        self.emit(&[0xff, modrm(0b11, 2, 3)]);
    }

    /// Call the read callback held in `r12` and store the returned byte,
    /// zero-extended to the cell width, at `disp`.
    fn read(&mut self, disp: i32) {
        // call r12
        self.emit(&[rex(false, 0, 0, 12), 0xff, modrm(0b11, 2, 12)]);
        if self.width != CellWidth::C8 {
            // movzx eax, al
            self.emit(&[0x0f, 0xb6, modrm(0b11, 0, 0)]);
        }
        self.mem_op(0x88, 0x89, RAX, disp);
    }

    /// `cmp cell[disp], 0` followed by `je` to the not-yet-known loop exit.
    fn jump_forward(&mut self, disp: i32) {
        self.cmp_mem_zero(disp);
        self.emit(&[0x0f, 0x84]);
        self.fixups.push(self.buf.len());
        self.emit(&[0u8; 4]);
    }

    /// `cmp cell[disp], 0` + `jne` back to the loop body, patching the
    /// pending forward `je` to the instruction after this one.
    fn jump_back(&mut self, disp: i32) -> Result<(), Error> {
        let site = self.fixups.pop().ok_or(Error::UnmatchedJumpBack(0))?;
        self.cmp_mem_zero(disp);
        // Displacements are relative to the end of the branch instruction.
        let body = site as i64 + 4;
        let end = self.buf.len() as i64 + 6;
        let back =
            i32::try_from(body - end).map_err(|_| Error::UnsupportedLargeOffset(body - end))?;
        self.emit(&[0x0f, 0x85]);
        self.emit(&back.to_le_bytes());

        let exit = self.buf.len() as i64 - (site as i64 + 4);
        let exit = i32::try_from(exit).map_err(|_| Error::UnsupportedLargeOffset(exit))?;
        self.emit_at(site, &exit.to_le_bytes());
        Ok(())
    }

    /// `cell[dst] += cell[src] * m`, strength-reduced for `m = ±1`.
    fn mac(&mut self, src: i32, dst: i32, m: i64) {
        match m {
            1 | -1 => {
                // mov reg, [src]; add/sub [dst], reg
                self.mem_op(0x8a, 0x8b, RAX, src);
                if m == 1 {
                    self.mem_op(0x00, 0x01, RAX, dst);
                } else {
                    self.mem_op(0x28, 0x29, RAX, dst);
                }
            }
            _ if self.width == CellWidth::C8 => {
                // mul only has the implicit-al form for bytes.
                //   mov eax, m; mul byte [src]; add [dst], al
                self.emit(&[0xb8]);
                self.emit(&(m as u8 as u32).to_le_bytes());
                self.mem_op(0xf6, 0xf6, 4, src);
                self.mem_op(0x00, 0x01, RAX, dst);
            }
            _ if self.width == CellWidth::C64 && i32::try_from(m).is_err() => {
                // mov rcx, m; mov rax, [src]; imul rax, rcx; add [dst], rax
                self.mov_imm64(RCX, m);
                self.mem_op(0x8a, 0x8b, RAX, src);
                self.emit(&[rex(true, RAX, 0, RCX), 0x0f, 0xaf, modrm(0b11, RAX, RCX)]);
                self.mem_op(0x00, 0x01, RAX, dst);
            }
            _ => {
                // imul reg, [src], m; add [dst], reg
                self.mem_op(0x69, 0x69, RAX, src);
                match self.width {
                    CellWidth::C16 => self.emit(&(m as u16).to_le_bytes()),
                    _ => self.emit(&(m as u32).to_le_bytes()),
                }
                self.mem_op(0x00, 0x01, RAX, dst);
            }
        }
    }

    /// Save callee-saved registers, keep `rsp` 16-byte aligned across calls
    /// and move the arguments into their home registers.
    fn prologue(&mut self) {
        self.emit(&[0x55]); // push rbp
        self.emit(&[0x53]); // push rbx
        self.emit(&[0x41, 0x54]); // push r12
        self.emit(&[0x41, 0x55]); // push r13
        self.emit(&[0x41, 0x56]); // push r14
        self.emit(&[0x41, 0x57]); // push r15
        self.emit(&[0x48, 0x83, 0xec, 0x08]); // sub rsp, 8
        self.emit(&[0x48, 0x89, 0xfd]); // mov rbp, rdi
        self.emit(&[0x49, 0x89, 0xf4]); // mov r12, rsi
        self.emit(&[0x48, 0x89, 0xd3]); // mov rbx, rdx
    }

    /// Return the final cell pointer and restore in reverse order.
    fn epilogue(&mut self) {
        self.emit(&[0x48, 0x89, 0xe8]); // mov rax, rbp
        self.emit(&[0x48, 0x83, 0xc4, 0x08]); // add rsp, 8
        self.emit(&[0x41, 0x5f]); // pop r15
        self.emit(&[0x41, 0x5e]); // pop r14
        self.emit(&[0x41, 0x5d]); // pop r13
        self.emit(&[0x41, 0x5c]); // pop r12
        self.emit(&[0x5b]); // pop rbx
        self.emit(&[0x5d]); // pop rbp
        self.emit(&[0xc3]); // ret
    }
}

/// Compile a finalized program to x86-64 machine code.
pub fn compile(insns: &[Insn], width: CellWidth) -> Result<Vec<u8>, Error> {
    let mut asm = Asm::new(width);
    asm.prologue();
    for ins in insns {
        let disp = asm.disp(ins.off)?;
        match ins.op {
            Op::Add(v) => asm.add_mem(disp, v),
            Op::Move(v) => asm.move_ptr(v)?,
            Op::Print => asm.print(disp),
            Op::Read => asm.read(disp),
            Op::JumpForward(_) => asm.jump_forward(disp),
            Op::JumpBack(_) => asm.jump_back(disp)?,
            Op::Set(v) => asm.set_mem(disp, v),
            Op::Mac { offset, multiplier } => {
                let dst = asm.disp(offset)?;
                asm.mac(disp, dst, multiplier);
            }
        }
    }
    asm.epilogue();
    debug_assert!(asm.fixups.is_empty());
    Ok(asm.buf)
}
