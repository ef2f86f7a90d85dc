//! Function-body validation: abstract interpretation over value types with
//! a control-frame stack and unreachable polymorphism. A body that passes
//! cannot underflow or mis-type the operand stack at run time, which is
//! what lets the interpreter skip per-instruction type checks.

use crate::decode::{cursor::Cursor, leb128};
use crate::error::ValidationError;
use crate::exec::opcodes::op;
use crate::module::{CodeBody, Module};
use crate::types::{FuncType, ValType};

type VResult<T> = Result<T, ValidationError>;

/// `None` stands for the unknown (polymorphic) type after `unreachable`.
type AbstractVal = Option<ValType>;

struct CtrlFrame {
    opcode: u8,
    /// Types a branch to this label expects (loop: params, others: results).
    start_types: Vec<ValType>,
    end_types: Vec<ValType>,
    height: usize,
    unreachable: bool,
}

impl CtrlFrame {
    fn label_types(&self) -> &[ValType] {
        if self.opcode == op::LOOP {
            &self.start_types
        } else {
            &self.end_types
        }
    }
}

struct BodyValidator<'a, 'b> {
    module: &'a Module,
    func: u32,
    cur: Cursor<'b>,
    locals: Vec<ValType>,
    vals: Vec<AbstractVal>,
    ctrls: Vec<CtrlFrame>,
}

pub fn validate_body(module: &Module, func: u32, body: &CodeBody) -> VResult<()> {
    let ty = module
        .func_type(func)
        .ok_or(ValidationError::IndexOutOfRange {
            space: "function",
            index: func,
        })?
        .clone();

    let mut locals: Vec<ValType> = ty.params.clone();
    for decl in &body.locals {
        for _ in 0..decl.count {
            locals.push(decl.ty);
        }
    }

    let mut v = BodyValidator {
        module,
        func,
        cur: Cursor::new(&body.code),
        locals,
        vals: Vec::new(),
        ctrls: Vec::new(),
    };
    v.push_ctrl(op::BLOCK, Vec::new(), ty.results.clone());
    v.run(&ty)
}

impl BodyValidator<'_, '_> {
    fn err(&self, msg: &'static str) -> ValidationError {
        ValidationError::Body {
            func: self.func,
            offset: self.cur.offset(),
            msg,
        }
    }

    fn read_u8(&mut self) -> VResult<u8> {
        self.cur
            .read_u8()
            .map_err(|_| self.err("truncated instruction stream"))
    }

    fn read_u32(&mut self) -> VResult<u32> {
        leb128::read_u32(&mut self.cur).map_err(|_| self.err("bad immediate"))
    }

    /* ----- abstract operand stack ----- */

    fn push_val(&mut self, ty: ValType) {
        self.vals.push(Some(ty));
    }

    fn pop_any(&mut self) -> VResult<AbstractVal> {
        let frame = self.ctrls.last().ok_or_else(|| self.err("control stack underflow"))?;
        if self.vals.len() == frame.height {
            if frame.unreachable {
                return Ok(None);
            }
            return Err(self.err("operand stack underflow"));
        }
        Ok(self.vals.pop().flatten())
    }

    fn pop_expect(&mut self, want: ValType) -> VResult<()> {
        match self.pop_any()? {
            None => Ok(()),
            Some(got) if got == want => Ok(()),
            Some(_) => Err(self.err("operand type mismatch")),
        }
    }

    fn pop_expect_all(&mut self, types: &[ValType]) -> VResult<()> {
        for &t in types.iter().rev() {
            self.pop_expect(t)?;
        }
        Ok(())
    }

    /* ----- control frames ----- */

    fn push_ctrl(&mut self, opcode: u8, start_types: Vec<ValType>, end_types: Vec<ValType>) {
        self.ctrls.push(CtrlFrame {
            opcode,
            start_types,
            end_types,
            height: self.vals.len(),
            unreachable: false,
        });
    }

    fn pop_ctrl(&mut self) -> VResult<CtrlFrame> {
        let end_types = self
            .ctrls
            .last()
            .ok_or_else(|| self.err("control stack underflow"))?
            .end_types
            .clone();
        self.pop_expect_all(&end_types)?;
        let frame = self
            .ctrls
            .pop()
            .ok_or_else(|| self.err("control stack underflow"))?;
        if self.vals.len() != frame.height {
            return Err(self.err("operand stack not empty at block end"));
        }
        Ok(frame)
    }

    fn mark_unreachable(&mut self) -> VResult<()> {
        let err = self.err("control stack underflow");
        let frame = self.ctrls.last_mut().ok_or(err)?;
        frame.unreachable = true;
        let height = frame.height;
        self.vals.truncate(height);
        Ok(())
    }

    fn label_types_at(&self, depth: u32) -> VResult<Vec<ValType>> {
        let depth = depth as usize;
        if depth >= self.ctrls.len() {
            return Err(self.err("branch depth out of range"));
        }
        Ok(self.ctrls[self.ctrls.len() - 1 - depth]
            .label_types()
            .to_vec())
    }

    /* ----- immediates ----- */

    /// Block result type: 0x40 (empty) or a single value type. The MVP
    /// format has no type-index block forms.
    fn read_block_type(&mut self) -> VResult<Vec<ValType>> {
        match self.read_u8()? {
            0x40 => Ok(Vec::new()),
            0x7F => Ok(vec![ValType::I32]),
            0x7E => Ok(vec![ValType::I64]),
            0x7D => Ok(vec![ValType::F32]),
            0x7C => Ok(vec![ValType::F64]),
            _ => Err(self.err("unsupported block type")),
        }
    }

    /// Read a memarg and check the alignment exponent against the access
    /// width; returns nothing the validator needs beyond the check.
    fn check_memarg(&mut self, access_bytes: u32) -> VResult<()> {
        let align = self.read_u32()?;
        let _offset = self.read_u32()?;
        if align > access_bytes.trailing_zeros() {
            return Err(self.err("alignment larger than access width"));
        }
        self.require_memory()
    }

    fn require_memory(&mut self) -> VResult<()> {
        if self.module.total_memories() == 0 {
            return Err(self.err("memory instruction without a memory"));
        }
        Ok(())
    }

    /* ----- instruction groups ----- */

    fn testop(&mut self, t: ValType) -> VResult<()> {
        self.pop_expect(t)?;
        self.push_val(ValType::I32);
        Ok(())
    }

    fn relop(&mut self, t: ValType) -> VResult<()> {
        self.pop_expect(t)?;
        self.pop_expect(t)?;
        self.push_val(ValType::I32);
        Ok(())
    }

    fn unop(&mut self, t: ValType) -> VResult<()> {
        self.pop_expect(t)?;
        self.push_val(t);
        Ok(())
    }

    fn binop(&mut self, t: ValType) -> VResult<()> {
        self.pop_expect(t)?;
        self.pop_expect(t)?;
        self.push_val(t);
        Ok(())
    }

    fn cvtop(&mut self, from: ValType, to: ValType) -> VResult<()> {
        self.pop_expect(from)?;
        self.push_val(to);
        Ok(())
    }

    fn load(&mut self, access_bytes: u32, t: ValType) -> VResult<()> {
        self.check_memarg(access_bytes)?;
        self.pop_expect(ValType::I32)?;
        self.push_val(t);
        Ok(())
    }

    fn store(&mut self, access_bytes: u32, t: ValType) -> VResult<()> {
        self.check_memarg(access_bytes)?;
        self.pop_expect(t)?;
        self.pop_expect(ValType::I32)?;
        Ok(())
    }

    fn local_ty(&self, idx: u32) -> VResult<ValType> {
        self.locals
            .get(idx as usize)
            .copied()
            .ok_or_else(|| self.err("local index out of range"))
    }

    /* ----- main loop ----- */

    fn run(&mut self, func_ty: &FuncType) -> VResult<()> {
        use ValType::*;

        while !self.ctrls.is_empty() {
            if self.cur.is_eof() {
                return Err(self.err("body ended inside a block"));
            }
            let opcode = self.read_u8()?;
            match opcode {
                op::UNREACHABLE => self.mark_unreachable()?,
                op::NOP => {}

                op::BLOCK => {
                    let results = self.read_block_type()?;
                    self.push_ctrl(op::BLOCK, Vec::new(), results);
                }
                op::LOOP => {
                    let results = self.read_block_type()?;
                    self.push_ctrl(op::LOOP, Vec::new(), results);
                }
                op::IF => {
                    let results = self.read_block_type()?;
                    self.pop_expect(I32)?;
                    self.push_ctrl(op::IF, Vec::new(), results);
                }
                op::ELSE => {
                    let frame = self.pop_ctrl()?;
                    if frame.opcode != op::IF {
                        return Err(self.err("else without matching if"));
                    }
                    self.push_ctrl(op::ELSE, frame.start_types, frame.end_types);
                }
                op::END => {
                    let frame = self.pop_ctrl()?;
                    // An if without an else must not produce results the
                    // false path cannot supply.
                    if frame.opcode == op::IF && frame.end_types != frame.start_types {
                        return Err(self.err("if without else cannot have results"));
                    }
                    for &t in &frame.end_types {
                        self.push_val(t);
                    }
                }

                op::BR => {
                    let depth = self.read_u32()?;
                    let types = self.label_types_at(depth)?;
                    self.pop_expect_all(&types)?;
                    self.mark_unreachable()?;
                }
                op::BR_IF => {
                    let depth = self.read_u32()?;
                    self.pop_expect(I32)?;
                    let types = self.label_types_at(depth)?;
                    self.pop_expect_all(&types)?;
                    for &t in &types {
                        self.push_val(t);
                    }
                }
                op::BR_TABLE => {
                    let count = self.read_u32()?;
                    let mut targets = Vec::with_capacity(count.min(1024) as usize);
                    for _ in 0..count {
                        targets.push(self.read_u32()?);
                    }
                    let default = self.read_u32()?;
                    self.pop_expect(I32)?;
                    let default_types = self.label_types_at(default)?;
                    for &t in &targets {
                        if self.label_types_at(t)? != default_types {
                            return Err(self.err("br_table targets disagree on arity"));
                        }
                    }
                    self.pop_expect_all(&default_types)?;
                    self.mark_unreachable()?;
                }
                op::RETURN => {
                    self.pop_expect_all(&func_ty.results.clone())?;
                    self.mark_unreachable()?;
                }

                op::CALL => {
                    let idx = self.read_u32()?;
                    let callee = self
                        .module
                        .func_type(idx)
                        .ok_or_else(|| self.err("call target out of range"))?
                        .clone();
                    self.pop_expect_all(&callee.params)?;
                    for &t in &callee.results {
                        self.push_val(t);
                    }
                }
                op::CALL_INDIRECT => {
                    let type_idx = self.read_u32()?;
                    if self.read_u8()? != 0x00 {
                        return Err(self.err("call_indirect reserved byte must be zero"));
                    }
                    if self.module.total_tables() == 0 {
                        return Err(self.err("call_indirect without a table"));
                    }
                    let callee = self
                        .module
                        .types
                        .get(type_idx as usize)
                        .ok_or_else(|| self.err("call_indirect type out of range"))?
                        .clone();
                    self.pop_expect(I32)?;
                    self.pop_expect_all(&callee.params)?;
                    for &t in &callee.results {
                        self.push_val(t);
                    }
                }

                op::DROP => {
                    self.pop_any()?;
                }
                op::SELECT => {
                    self.pop_expect(I32)?;
                    let b = self.pop_any()?;
                    let a = self.pop_any()?;
                    let chosen = match (a, b) {
                        (Some(x), Some(y)) if x != y => {
                            return Err(self.err("select operands differ in type"))
                        }
                        (Some(x), _) => Some(x),
                        (None, y) => y,
                    };
                    self.vals.push(chosen);
                }

                op::LOCAL_GET => {
                    let idx = self.read_u32()?;
                    let t = self.local_ty(idx)?;
                    self.push_val(t);
                }
                op::LOCAL_SET => {
                    let idx = self.read_u32()?;
                    let t = self.local_ty(idx)?;
                    self.pop_expect(t)?;
                }
                op::LOCAL_TEE => {
                    let idx = self.read_u32()?;
                    let t = self.local_ty(idx)?;
                    self.pop_expect(t)?;
                    self.push_val(t);
                }
                op::GLOBAL_GET => {
                    let idx = self.read_u32()?;
                    let gt = self
                        .module
                        .global_type(idx)
                        .ok_or_else(|| self.err("global index out of range"))?;
                    self.push_val(gt.content);
                }
                op::GLOBAL_SET => {
                    let idx = self.read_u32()?;
                    let gt = self
                        .module
                        .global_type(idx)
                        .ok_or_else(|| self.err("global index out of range"))?;
                    if !gt.mutable {
                        return Err(self.err("global.set on immutable global"));
                    }
                    self.pop_expect(gt.content)?;
                }

                op::I32_LOAD => self.load(4, I32)?,
                op::I64_LOAD => self.load(8, I64)?,
                op::F32_LOAD => self.load(4, F32)?,
                op::F64_LOAD => self.load(8, F64)?,
                op::I32_LOAD8_S | op::I32_LOAD8_U => self.load(1, I32)?,
                op::I32_LOAD16_S | op::I32_LOAD16_U => self.load(2, I32)?,
                op::I64_LOAD8_S | op::I64_LOAD8_U => self.load(1, I64)?,
                op::I64_LOAD16_S | op::I64_LOAD16_U => self.load(2, I64)?,
                op::I64_LOAD32_S | op::I64_LOAD32_U => self.load(4, I64)?,

                op::I32_STORE => self.store(4, I32)?,
                op::I64_STORE => self.store(8, I64)?,
                op::F32_STORE => self.store(4, F32)?,
                op::F64_STORE => self.store(8, F64)?,
                op::I32_STORE8 => self.store(1, I32)?,
                op::I32_STORE16 => self.store(2, I32)?,
                op::I64_STORE8 => self.store(1, I64)?,
                op::I64_STORE16 => self.store(2, I64)?,
                op::I64_STORE32 => self.store(4, I64)?,

                op::MEMORY_SIZE => {
                    if self.read_u8()? != 0x00 {
                        return Err(self.err("memory.size reserved byte must be zero"));
                    }
                    self.require_memory()?;
                    self.push_val(I32);
                }
                op::MEMORY_GROW => {
                    if self.read_u8()? != 0x00 {
                        return Err(self.err("memory.grow reserved byte must be zero"));
                    }
                    self.require_memory()?;
                    self.pop_expect(I32)?;
                    self.push_val(I32);
                }

                op::I32_CONST => {
                    leb128::read_i32(&mut self.cur).map_err(|_| self.err("bad immediate"))?;
                    self.push_val(I32);
                }
                op::I64_CONST => {
                    leb128::read_i64(&mut self.cur).map_err(|_| self.err("bad immediate"))?;
                    self.push_val(I64);
                }
                op::F32_CONST => {
                    self.cur
                        .read_f32_bits()
                        .map_err(|_| self.err("bad immediate"))?;
                    self.push_val(F32);
                }
                op::F64_CONST => {
                    self.cur
                        .read_f64_bits()
                        .map_err(|_| self.err("bad immediate"))?;
                    self.push_val(F64);
                }

                op::I32_EQZ => self.testop(I32)?,
                0x46..=0x4F => self.relop(I32)?,
                op::I64_EQZ => self.testop(I64)?,
                0x51..=0x5A => self.relop(I64)?,
                0x5B..=0x60 => self.relop(F32)?,
                0x61..=0x66 => self.relop(F64)?,

                0x67..=0x69 => self.unop(I32)?,
                0x6A..=0x78 => self.binop(I32)?,
                0x79..=0x7B => self.unop(I64)?,
                0x7C..=0x8A => self.binop(I64)?,
                0x8B..=0x91 => self.unop(F32)?,
                0x92..=0x98 => self.binop(F32)?,
                0x99..=0x9F => self.unop(F64)?,
                0xA0..=0xA6 => self.binop(F64)?,

                op::I32_WRAP_I64 => self.cvtop(I64, I32)?,
                op::I32_TRUNC_F32_S | op::I32_TRUNC_F32_U => self.cvtop(F32, I32)?,
                op::I32_TRUNC_F64_S | op::I32_TRUNC_F64_U => self.cvtop(F64, I32)?,
                op::I64_EXTEND_I32_S | op::I64_EXTEND_I32_U => self.cvtop(I32, I64)?,
                op::I64_TRUNC_F32_S | op::I64_TRUNC_F32_U => self.cvtop(F32, I64)?,
                op::I64_TRUNC_F64_S | op::I64_TRUNC_F64_U => self.cvtop(F64, I64)?,
                op::F32_CONVERT_I32_S | op::F32_CONVERT_I32_U => self.cvtop(I32, F32)?,
                op::F32_CONVERT_I64_S | op::F32_CONVERT_I64_U => self.cvtop(I64, F32)?,
                op::F32_DEMOTE_F64 => self.cvtop(F64, F32)?,
                op::F64_CONVERT_I32_S | op::F64_CONVERT_I32_U => self.cvtop(I32, F64)?,
                op::F64_CONVERT_I64_S | op::F64_CONVERT_I64_U => self.cvtop(I64, F64)?,
                op::F64_PROMOTE_F32 => self.cvtop(F32, F64)?,
                op::I32_REINTERPRET_F32 => self.cvtop(F32, I32)?,
                op::I64_REINTERPRET_F64 => self.cvtop(F64, I64)?,
                op::F32_REINTERPRET_I32 => self.cvtop(I32, F32)?,
                op::F64_REINTERPRET_I64 => self.cvtop(I64, F64)?,

                _ => return Err(self.err("unknown opcode")),
            }
        }

        if !self.cur.is_eof() {
            return Err(self.err("trailing bytes after function end"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::CodeBody;
    use crate::types::FuncType;

    fn module_with_body(ty: FuncType, code: Vec<u8>) -> Module {
        let mut m = Module::default();
        m.types.push(ty);
        m.func_types.push(0);
        m.code.push(CodeBody {
            locals: vec![],
            code,
        });
        m
    }

    #[test]
    fn add_body_validates() {
        // i32.const 1; i32.const 2; i32.add; end — for () -> (i32)
        let m = module_with_body(
            FuncType::new(vec![], vec![ValType::I32]),
            vec![0x41, 0x01, 0x41, 0x02, 0x6A, 0x0B],
        );
        validate_body(&m, 0, &m.code[0]).unwrap();
    }

    #[test]
    fn stack_underflow_rejected() {
        // i32.add with an empty stack
        let m = module_with_body(
            FuncType::new(vec![], vec![]),
            vec![0x6A, 0x0B],
        );
        assert!(matches!(
            validate_body(&m, 0, &m.code[0]),
            Err(ValidationError::Body { .. })
        ));
    }

    #[test]
    fn type_mismatch_rejected() {
        // i64.const 1; i32.eqz
        let m = module_with_body(
            FuncType::new(vec![], vec![]),
            vec![0x42, 0x01, 0x45, 0x1A, 0x0B],
        );
        assert!(matches!(
            validate_body(&m, 0, &m.code[0]),
            Err(ValidationError::Body { .. })
        ));
    }

    #[test]
    fn missing_result_rejected() {
        // () -> (i32) with an empty body
        let m = module_with_body(FuncType::new(vec![], vec![ValType::I32]), vec![0x0B]);
        assert!(matches!(
            validate_body(&m, 0, &m.code[0]),
            Err(ValidationError::Body { .. })
        ));
    }

    #[test]
    fn code_after_unreachable_is_polymorphic() {
        // unreachable; i32.add; end — for () -> (i32)
        let m = module_with_body(
            FuncType::new(vec![], vec![ValType::I32]),
            vec![0x00, 0x6A, 0x0B],
        );
        validate_body(&m, 0, &m.code[0]).unwrap();
    }

    #[test]
    fn if_without_else_cannot_yield() {
        // i32.const 1; if (result i32); i32.const 2; end; drop
        let m = module_with_body(
            FuncType::new(vec![], vec![]),
            vec![0x41, 0x01, 0x04, 0x7F, 0x41, 0x02, 0x0B, 0x1A, 0x0B],
        );
        assert!(matches!(
            validate_body(&m, 0, &m.code[0]),
            Err(ValidationError::Body { .. })
        ));
    }
}
