//! The optimization pipeline, levels 0 to 4.
//!
//! Every level is a pure rewrite of the instruction stream and consumes the
//! output of the previous one. None of the passes needs resolved bracket
//! targets; brackets come out with zeroed targets and are re-linked by
//! [`crate::parse::finalize`].

use tracing::debug;

use crate::insn::{Insn, Op};

/// Run all passes up to and including `level` (clamped to 4).
pub fn optimize(insns: &[Insn], level: u8) -> Vec<Insn> {
    let mut out = insns.to_vec();
    if level >= 1 {
        out = fold_constants(&out);
    }
    if level >= 2 {
        out = clear_loops(&out);
    }
    if level >= 3 {
        out = mac_loops(&out);
    }
    if level >= 4 {
        out = fold_offsets(&out);
    }
    debug!(level, before = insns.len(), after = out.len(), "optimized");
    out
}

/// Level 1: merge adjacent same-kind arithmetic.
///
/// Runs of `add` sum their values, runs of `move` likewise. Sums may wrap and
/// zero results are kept; later passes do not depend on their removal.
fn fold_constants(insns: &[Insn]) -> Vec<Insn> {
    let mut out: Vec<Insn> = Vec::with_capacity(insns.len());
    for ins in insns {
        match (out.last_mut(), ins.op) {
            (Some(last), Op::Add(v)) if last.off == ins.off => {
                if let Op::Add(acc) = &mut last.op {
                    *acc = acc.wrapping_add(v);
                    continue;
                }
                out.push(*ins);
            }
            (Some(last), Op::Move(v)) => {
                if let Op::Move(acc) = &mut last.op {
                    *acc = acc.wrapping_add(v);
                    continue;
                }
                out.push(*ins);
            }
            _ => out.push(*ins),
        }
    }
    out
}

/// Level 2: rewrite clear loops `[-]` to `set 0`, and fold `add` into a
/// directly preceding `set` on the same cell.
fn clear_loops(insns: &[Insn]) -> Vec<Insn> {
    let mut out: Vec<Insn> = Vec::with_capacity(insns.len());
    let mut pc = 0;
    while pc < insns.len() {
        let ins = insns[pc];
        if pc + 2 < insns.len()
            && matches!(ins.op, Op::JumpForward(_))
            && insns[pc + 1].off == ins.off
            && matches!(insns[pc + 1].op, Op::Add(-1))
            && matches!(insns[pc + 2].op, Op::JumpBack(_))
        {
            out.push(Insn { off: ins.off, op: Op::Set(0) });
            pc += 3;
            continue;
        }
        if let Op::Add(v) = ins.op {
            if let Some(&Insn { off, op: Op::Set(s) }) = out.last() {
                if off == ins.off {
                    *out.last_mut().unwrap() = Insn { off, op: Op::Set(s.wrapping_add(v)) };
                    pc += 1;
                    continue;
                }
            }
        }
        out.push(ins);
        pc += 1;
    }
    out
}

/// Level 3: rewrite balanced decrement loops into multiply-accumulates.
///
/// A loop qualifies when its body consists of only `add` and `move`, the move
/// balance at the closing bracket is zero and the total delta on the entry
/// cell is `-1`. Each add on a non-entry cell becomes one `mac` keyed by the
/// move balance at that point; entry-cell adds are absorbed. The loop is
/// replaced by the macs followed by `set 0` on the entry cell.
fn mac_loops(insns: &[Insn]) -> Vec<Insn> {
    let mut out: Vec<Insn> = Vec::with_capacity(insns.len());
    let mut pc = 0;
    'outer: while pc < insns.len() {
        if let Op::JumpForward(_) = insns[pc].op {
            let mut balance = 0i64;
            let mut entry_delta = 0i64;
            let mut macs = Vec::new();
            let mut end = pc + 1;
            while end < insns.len() {
                match insns[end].op {
                    Op::Add(v) if balance == 0 => entry_delta = entry_delta.wrapping_add(v),
                    Op::Add(v) => macs.push(Op::Mac { offset: balance, multiplier: v }),
                    Op::Move(v) => balance += v,
                    Op::JumpBack(_) => {
                        if balance == 0 && entry_delta == -1 && end > pc + 1 {
                            let off = insns[pc].off;
                            out.extend(macs.into_iter().map(|op| Insn { off, op }));
                            out.push(Insn { off, op: Op::Set(0) });
                            pc = end + 1;
                            continue 'outer;
                        }
                        break;
                    }
                    // Anything else (nested brackets, I/O, set, mac) keeps
                    // the loop as-is.
                    _ => break,
                }
                end += 1;
            }
        }
        out.push(insns[pc]);
        pc += 1;
    }
    out
}

/// Level 4: fold moves into instruction offsets.
///
/// Standalone moves vanish into a running offset that is applied to every
/// emitted instruction. Brackets delimit offset scopes: the offset at `[` is
/// pushed, and if the body ends with a different offset an explicit `move`
/// re-syncs the data pointer ahead of the `]` so every iteration starts from
/// the same shape. A trailing `move` materializes whatever offset is left at
/// the end of the stream.
fn fold_offsets(insns: &[Insn]) -> Vec<Insn> {
    let mut out: Vec<Insn> = Vec::with_capacity(insns.len());
    let mut offset = 0i64;
    let mut starts: Vec<i64> = Vec::new();
    for ins in insns {
        match ins.op {
            Op::Move(v) => offset += v,
            Op::JumpForward(_) => {
                starts.push(offset);
                out.push(Insn { off: ins.off + offset, op: Op::JumpForward(0) });
            }
            Op::JumpBack(_) => {
                let start = starts.pop().unwrap_or(0);
                if offset != start {
                    out.push(Insn { off: offset, op: Op::Move(offset - start) });
                    offset = start;
                }
                out.push(Insn { off: ins.off + offset, op: Op::JumpBack(0) });
            }
            Op::Mac { offset: target, multiplier } => {
                out.push(Insn {
                    off: ins.off + offset,
                    op: Op::Mac { offset: target + offset, multiplier },
                });
            }
            _ => out.push(Insn { off: ins.off + offset, op: ins.op }),
        }
    }
    if offset != 0 {
        out.push(Insn { off: offset, op: Op::Move(offset) });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn ops(insns: &[Insn]) -> Vec<Op> {
        insns.iter().map(|i| i.op).collect()
    }

    #[test]
    fn level1_folds_runs() {
        let insns = optimize(&parse(b"+++--<<<>"), 1);
        assert_eq!(ops(&insns), [Op::Add(1), Op::Move(-2)]);
    }

    #[test]
    fn level1_keeps_zero_sums() {
        let insns = optimize(&parse(b"+-"), 1);
        assert_eq!(ops(&insns), [Op::Add(0)]);
    }

    #[test]
    fn level2_rewrites_clear_loop() {
        let insns = optimize(&parse(b"[-]"), 2);
        assert_eq!(ops(&insns), [Op::Set(0)]);
    }

    #[test]
    fn level2_merges_add_into_set() {
        let insns = optimize(&parse(b"[-]+++++"), 2);
        assert_eq!(ops(&insns), [Op::Set(5)]);
    }

    #[test]
    fn level2_leaves_other_loops() {
        let insns = optimize(&parse(b"[->+<]"), 2);
        assert_eq!(insns.len(), 6);
    }

    #[test]
    fn level3_rewrites_transfer_loop() {
        // [->>+++<<] moves 3x the entry cell two to the right.
        let insns = optimize(&parse(b"[->>+++<<]"), 3);
        assert_eq!(
            ops(&insns),
            [Op::Mac { offset: 2, multiplier: 3 }, Op::Set(0)]
        );
    }

    #[test]
    fn level3_emits_macs_in_encounter_order() {
        let insns = optimize(&parse(b"[->+>++<<-<--->+]"), 3);
        // Body: - >+ >++ << - < --- > +
        //   balance 0: add -1, add -1, add 1 -> entry delta -1
        //   balance 1: add 1, balance 2: add 2, balance -1: add -3
        //   balance ends at 0: qualifies.
        assert_eq!(
            ops(&insns),
            [
                Op::Mac { offset: 1, multiplier: 1 },
                Op::Mac { offset: 2, multiplier: 2 },
                Op::Mac { offset: -1, multiplier: -3 },
                Op::Set(0),
            ]
        );
    }

    #[test]
    fn level3_rejects_unbalanced_loop() {
        let insns = optimize(&parse(b"[->+]"), 3);
        assert!(insns.iter().all(|i| !matches!(i.op, Op::Mac { .. })));
    }

    #[test]
    fn level3_rejects_io_in_loop() {
        let insns = optimize(&parse(b"[-.>+<]"), 3);
        assert!(insns.iter().all(|i| !matches!(i.op, Op::Mac { .. })));
    }

    #[test]
    fn level3_rejects_empty_loop() {
        let insns = optimize(&parse(b"[]"), 3);
        assert_eq!(insns.len(), 2);
    }

    #[test]
    fn level4_folds_moves_into_offsets() {
        let insns = optimize(&parse(b">>+<."), 4);
        assert_eq!(
            insns,
            [
                Insn { off: 2, op: Op::Add(1) },
                Insn { off: 1, op: Op::Print },
                Insn { off: 1, op: Op::Move(1) },
            ]
        );
    }

    #[test]
    fn level4_resyncs_unbalanced_loop_body() {
        // [>] scans right for a zero cell: the bracket offsets stay at the
        // scope entry and the body's net move becomes explicit.
        let insns = optimize(&parse(b"[>]"), 4);
        assert_eq!(
            insns,
            [
                Insn { off: 0, op: Op::JumpForward(0) },
                Insn { off: 1, op: Op::Move(1) },
                Insn { off: 0, op: Op::JumpBack(0) },
            ]
        );
    }

    #[test]
    fn level4_balanced_loop_needs_no_resync() {
        let insns = optimize(&parse(b"[>+<-]"), 4);
        assert_eq!(
            insns,
            [
                Insn { off: 0, op: Op::JumpForward(0) },
                Insn { off: 1, op: Op::Add(1) },
                Insn { off: 0, op: Op::Add(-1) },
                Insn { off: 0, op: Op::JumpBack(0) },
            ]
        );
    }

    #[test]
    fn level4_retargets_mac_offsets() {
        let insns = optimize(&parse(b">[->+<]"), 4);
        assert_eq!(
            insns,
            [
                Insn { off: 1, op: Op::Mac { offset: 2, multiplier: 1 } },
                Insn { off: 1, op: Op::Set(0) },
                Insn { off: 1, op: Op::Move(1) },
            ]
        );
    }
}
