//! Execution profiling for the interpreter.

use std::fmt::Write;

use crate::insn::Insn;

/// Counters recorded while interpreting a program.
#[derive(Debug)]
pub struct Profile {
    /// Executions per program counter.
    pub counts: Vec<u64>,
    pub min_cell: i64,
    pub max_cell: i64,
    pub min_value: u64,
    pub max_value: u64,
}

impl Profile {
    pub fn new(program_len: usize) -> Profile {
        Profile {
            counts: vec![0; program_len],
            min_cell: i64::MAX,
            max_cell: i64::MIN,
            min_value: u64::MAX,
            max_value: 0,
        }
    }

    pub(crate) fn record(&mut self, pc: usize, cell: Option<i64>, value: Option<u64>) {
        self.counts[pc] += 1;
        if let Some(cell) = cell {
            self.min_cell = self.min_cell.min(cell);
            self.max_cell = self.max_cell.max(cell);
        }
        if let Some(value) = value {
            self.min_value = self.min_value.min(value);
            self.max_value = self.max_value.max(value);
        }
    }

    /// Plain-text report: hottest instructions first, then the observed cell
    /// and value ranges.
    pub fn report(&self, insns: &[Insn], top: usize) -> String {
        let mut hot: Vec<(usize, u64)> = self
            .counts
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, n)| n > 0)
            .collect();
        hot.sort_by_key(|&(pc, n)| (std::cmp::Reverse(n), pc));

        let mut out = String::new();
        let _ = writeln!(out, "{:>6}  {:>12}  instruction", "pc", "count");
        for &(pc, count) in hot.iter().take(top) {
            let _ = writeln!(out, "{pc:>6}  {count:>12}  {}", insns[pc]);
        }
        if self.min_cell <= self.max_cell {
            let _ = writeln!(out, "cells touched: {}..={}", self.min_cell, self.max_cell);
        }
        if self.min_value <= self.max_value {
            let _ = writeln!(out, "values seen:   {}..={}", self.min_value, self.max_value);
        }
        out
    }
}
