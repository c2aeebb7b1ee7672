//! Transpilation of optimized instruction streams to C and to Rust.
//!
//! The emitters work off the same extended opcode the interpreter runs, so
//! transpiled programs keep the benefit of set/mac/offset optimizations.
//! Brackets always pair up at the same cell offset, which lets them map onto
//! structured `while` loops.

use std::fmt::Write;

use crate::cell::CellWidth;
use crate::insn::{Insn, Op};

fn c_type(width: CellWidth) -> &'static str {
    match width {
        CellWidth::C8 => "uint8_t",
        CellWidth::C16 => "uint16_t",
        CellWidth::C32 => "uint32_t",
        CellWidth::C64 => "uint64_t",
    }
}

fn rust_type(width: CellWidth) -> &'static str {
    match width {
        CellWidth::C8 => "u8",
        CellWidth::C16 => "u16",
        CellWidth::C32 => "u32",
        CellWidth::C64 => "u64",
    }
}

/// Emit a self-contained C program.
pub fn to_c(
    insns: &[Insn],
    width: CellWidth,
    cell_count: usize,
    start_cell: usize,
    eof_byte: u8,
) -> String {
    let cell = c_type(width);
    let mut out = String::new();
    let _ = writeln!(out, "#include <stdint.h>");
    let _ = writeln!(out, "#include <stdio.h>");
    let _ = writeln!(out, "#include <stdlib.h>");
    let _ = writeln!(out);
    let _ = writeln!(out, "static {cell} cells[{cell_count}];");
    let _ = writeln!(out);
    let _ = writeln!(out, "static {cell} bf_read(void) {{");
    let _ = writeln!(out, "    static int eof_seen;");
    let _ = writeln!(out, "    int c = getchar();");
    let _ = writeln!(out, "    if (c == EOF) {{");
    let _ = writeln!(out, "        if (eof_seen++)");
    let _ = writeln!(out, "            exit(1);");
    let _ = writeln!(out, "        return ({cell}){eof_byte};");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "    return ({cell})c;");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "int main(void) {{");
    let _ = writeln!(out, "    {cell} *p = cells + {start_cell};");

    let mut depth = 1;
    for ins in insns {
        let off = ins.off;
        let pad = "    ".repeat(depth);
        match ins.op {
            Op::Add(v) => {
                let _ = writeln!(out, "{pad}p[{off}] += ({cell}){v};");
            }
            Op::Move(v) => {
                let _ = writeln!(out, "{pad}p += {v};");
            }
            Op::Print => {
                let _ = writeln!(out, "{pad}putchar((int)(uint8_t)p[{off}]);");
            }
            Op::Read => {
                let _ = writeln!(out, "{pad}p[{off}] = bf_read();");
            }
            Op::JumpForward(_) => {
                let _ = writeln!(out, "{pad}while (p[{off}]) {{");
                depth += 1;
            }
            Op::JumpBack(_) => {
                depth -= 1;
                let _ = writeln!(out, "{}}}", "    ".repeat(depth));
            }
            Op::Set(v) => {
                let _ = writeln!(out, "{pad}p[{off}] = ({cell}){v};");
            }
            Op::Mac { offset, multiplier } => {
                let _ = writeln!(
                    out,
                    "{pad}p[{offset}] += ({cell})(p[{off}] * ({cell}){multiplier});"
                );
            }
        }
    }
    let _ = writeln!(out, "    return 0;");
    let _ = writeln!(out, "}}");
    out
}

/// Emit a self-contained Rust program.
pub fn to_rust(
    insns: &[Insn],
    width: CellWidth,
    cell_count: usize,
    start_cell: usize,
    eof_byte: u8,
) -> String {
    let cell = rust_type(width);
    let mut out = String::new();
    let _ = writeln!(out, "use std::io::{{Read, Write}};");
    let _ = writeln!(out);
    let _ = writeln!(out, "fn bf_read(eof_seen: &mut bool) -> {cell} {{");
    let _ = writeln!(out, "    let mut buf = [0u8; 1];");
    let _ = writeln!(out, "    match std::io::stdin().read(&mut buf) {{");
    let _ = writeln!(out, "        Ok(1) => buf[0] as {cell},");
    let _ = writeln!(out, "        _ if *eof_seen => std::process::exit(1),");
    let _ = writeln!(out, "        _ => {{");
    let _ = writeln!(out, "            *eof_seen = true;");
    let _ = writeln!(out, "            {eof_byte}");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "fn main() {{");
    let _ = writeln!(out, "    let mut cells = [0{cell}; {cell_count}];");
    let _ = writeln!(out, "    let mut p: isize = {start_cell};");
    let _ = writeln!(out, "    let mut eof_seen = false;");

    let mut depth = 1;
    for ins in insns {
        let off = ins.off;
        let pad = "    ".repeat(depth);
        let at = |off: i64| format!("cells[(p + {off}) as usize]");
        match ins.op {
            Op::Add(v) => {
                let _ = writeln!(
                    out,
                    "{pad}{lhs} = {lhs}.wrapping_add({v}i64 as {cell});",
                    lhs = at(off)
                );
            }
            Op::Move(v) => {
                let _ = writeln!(out, "{pad}p += {v};");
            }
            Op::Print => {
                let _ = writeln!(
                    out,
                    "{pad}let _ = std::io::stdout().write_all(&[{} as u8]);",
                    at(off)
                );
            }
            Op::Read => {
                let _ = writeln!(out, "{pad}{} = bf_read(&mut eof_seen);", at(off));
            }
            Op::JumpForward(_) => {
                let _ = writeln!(out, "{pad}while {} != 0 {{", at(off));
                depth += 1;
            }
            Op::JumpBack(_) => {
                depth -= 1;
                let _ = writeln!(out, "{}}}", "    ".repeat(depth));
            }
            Op::Set(v) => {
                let _ = writeln!(out, "{pad}{} = {v}i64 as {cell};", at(off));
            }
            Op::Mac { offset, multiplier } => {
                let _ = writeln!(
                    out,
                    "{pad}{lhs} = {lhs}.wrapping_add({src}.wrapping_mul({multiplier}i64 as {cell}));",
                    lhs = at(offset),
                    src = at(off)
                );
            }
        }
    }
    let _ = writeln!(out, "    let _ = std::io::stdout().flush();");
    let _ = writeln!(out, "}}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Program;

    #[test]
    fn c_output_contains_optimized_forms() {
        let prog = Program::compile(b"[-]++>+++[<+>-]", 3).unwrap();
        let c = to_c(&prog.insns, CellWidth::C8, 30000, 0, 0);
        assert!(c.contains("p[0] = (uint8_t)2;"), "{c}");
        assert!(c.contains("p[-1] += (uint8_t)(p[0] * (uint8_t)1);"), "{c}");
    }

    #[test]
    fn rust_output_balances_braces() {
        let prog = Program::compile(b"+[>[-]<-]", 2).unwrap();
        let rs = to_rust(&prog.insns, CellWidth::C32, 256, 0, 0);
        assert_eq!(rs.matches('{').count(), rs.matches('}').count());
    }
}
