//! Call frames and control labels. Control targets (else/end offsets) are
//! precomputed per activation in a single prescan over the body, so the
//! interpreter never searches forward for a matching `end` while running.

use std::collections::HashMap;
use std::sync::Arc;

use crate::exec::opcodes::op;
use crate::module::Module;

/// Else/end offsets of one structured instruction, keyed by the offset of
/// its opening opcode. `end` points past the `end` byte.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockTargets {
    pub else_pc: Option<usize>,
    pub end: usize,
}

/// A live control label. Branching truncates the stack to `height`, carries
/// `arity` values across, and jumps to `target` (loops target their own
/// opening opcode, so the label is re-pushed on the back edge).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Label {
    pub target: usize,
    pub height: usize,
    pub arity: usize,
}

pub(crate) struct Frame {
    pub module: Arc<Module>,
    pub def_index: usize,
    /// Owning instance, as an index into `Store.instances`.
    pub instance: usize,
    pub locals: Vec<u64>,
    pub pc: usize,
    /// Value-stack height at entry, after the arguments were consumed.
    pub base: usize,
    pub results: usize,
    pub labels: Vec<Label>,
    pub targets: HashMap<usize, BlockTargets>,
    /// Cached store address of the instance's memory 0 (0 if none; memory
    /// instructions cannot validate without one).
    pub mem_addr: usize,
}

fn skip_leb(code: &[u8], mut pc: usize) -> usize {
    while code[pc] & 0x80 != 0 {
        pc += 1;
    }
    pc + 1
}

/// Offset of the next opcode, given `pc` just past the current opcode byte.
fn skip_immediates(code: &[u8], pc: usize, opcode: u8) -> usize {
    match opcode {
        op::BLOCK | op::LOOP | op::IF => pc + 1,
        op::BR
        | op::BR_IF
        | op::CALL
        | op::LOCAL_GET
        | op::LOCAL_SET
        | op::LOCAL_TEE
        | op::GLOBAL_GET
        | op::GLOBAL_SET => skip_leb(code, pc),
        op::BR_TABLE => {
            let mut count = 0u32;
            let mut shift = 0;
            let mut p = pc;
            loop {
                let b = code[p];
                p += 1;
                count |= ((b & 0x7F) as u32) << shift;
                if b & 0x80 == 0 {
                    break;
                }
                shift += 7;
            }
            for _ in 0..=count {
                p = skip_leb(code, p);
            }
            p
        }
        op::CALL_INDIRECT => skip_leb(code, pc) + 1,
        0x28..=0x3E => skip_leb(code, skip_leb(code, pc)),
        op::MEMORY_SIZE | op::MEMORY_GROW => pc + 1,
        op::I32_CONST | op::I64_CONST => skip_leb(code, pc),
        op::F32_CONST => pc + 4,
        op::F64_CONST => pc + 8,
        _ => pc,
    }
}

/// One linear scan collecting the else/end offset of every structured
/// instruction in a validated body.
pub(crate) fn scan_targets(code: &[u8]) -> HashMap<usize, BlockTargets> {
    let mut map = HashMap::new();
    let mut openers: Vec<(usize, Option<usize>)> = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let opcode_pc = pc;
        let opcode = code[pc];
        pc = skip_immediates(code, pc + 1, opcode);
        match opcode {
            op::BLOCK | op::LOOP | op::IF => openers.push((opcode_pc, None)),
            op::ELSE => {
                if let Some(top) = openers.last_mut() {
                    top.1 = Some(opcode_pc);
                }
            }
            op::END => {
                // the final end closes the body itself, not an opener
                if let Some((start, else_pc)) = openers.pop() {
                    map.insert(
                        start,
                        BlockTargets {
                            else_pc,
                            end: opcode_pc + 1,
                        },
                    );
                }
            }
            _ => {}
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_blocks() {
        // block; block; end; end; end(function)
        let code = [0x02, 0x40, 0x02, 0x40, 0x0B, 0x0B, 0x0B];
        let t = scan_targets(&code);
        assert_eq!(t[&0].end, 6);
        assert_eq!(t[&2].end, 5);
        assert!(t[&0].else_pc.is_none());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn if_else_offsets() {
        // i32.const 1; if; nop; else; nop; end; end
        let code = [0x41, 0x01, 0x04, 0x40, 0x01, 0x05, 0x01, 0x0B, 0x0B];
        let t = scan_targets(&code);
        assert_eq!(t[&2].else_pc, Some(5));
        assert_eq!(t[&2].end, 8);
    }

    #[test]
    fn immediates_are_skipped() {
        // f32.const <4 bytes that look like opcodes>; end
        let code = [0x43, 0x02, 0x0B, 0x04, 0x05, 0x0B];
        let t = scan_targets(&code);
        assert!(t.is_empty());
    }
}
