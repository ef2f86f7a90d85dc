//! Shared operand stack. Slots are raw 64-bit patterns; validation proved
//! the types, so the stack itself is untyped. i32 values are zero-extended,
//! floats are their IEEE-754 bit patterns. This makes the four reinterpret
//! instructions no-ops.

use crate::types::ValType;
use crate::values::Value;

pub(crate) fn value_to_raw(v: Value) -> u64 {
    match v {
        Value::I32(x) => x as u32 as u64,
        Value::I64(x) => x as u64,
        Value::F32(bits) => bits as u64,
        Value::F64(bits) => bits,
    }
}

pub(crate) fn raw_to_value(raw: u64, ty: ValType) -> Value {
    match ty {
        ValType::I32 => Value::I32(raw as u32 as i32),
        ValType::I64 => Value::I64(raw as i64),
        ValType::F32 => Value::F32(raw as u32),
        ValType::F64 => Value::F64(raw),
    }
}

#[derive(Default)]
pub(crate) struct ValueStack {
    slots: Vec<u64>,
}

impl ValueStack {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    pub fn split_off(&mut self, at: usize) -> Vec<u64> {
        self.slots.split_off(at)
    }

    pub fn extend(&mut self, raws: impl IntoIterator<Item = u64>) {
        self.slots.extend(raws);
    }

    pub fn push(&mut self, raw: u64) {
        self.slots.push(raw);
    }

    pub fn pop(&mut self) -> u64 {
        match self.slots.pop() {
            Some(v) => v,
            // unreachable on validated code
            None => panic!("operand stack underflow"),
        }
    }

    pub fn push_i32(&mut self, v: i32) {
        self.push(v as u32 as u64);
    }

    pub fn push_u32(&mut self, v: u32) {
        self.push(v as u64);
    }

    pub fn push_i64(&mut self, v: i64) {
        self.push(v as u64);
    }

    pub fn push_u64(&mut self, v: u64) {
        self.push(v);
    }

    pub fn push_f32(&mut self, v: f32) {
        self.push(v.to_bits() as u64);
    }

    pub fn push_f64(&mut self, v: f64) {
        self.push(v.to_bits());
    }

    pub fn push_bool(&mut self, v: bool) {
        self.push_i32(v as i32);
    }

    pub fn pop_i32(&mut self) -> i32 {
        self.pop() as u32 as i32
    }

    pub fn pop_u32(&mut self) -> u32 {
        self.pop() as u32
    }

    pub fn pop_i64(&mut self) -> i64 {
        self.pop() as i64
    }

    pub fn pop_u64(&mut self) -> u64 {
        self.pop()
    }

    pub fn pop_f32(&mut self) -> f32 {
        f32::from_bits(self.pop() as u32)
    }

    pub fn pop_f64(&mut self) -> f64 {
        f64::from_bits(self.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trips_preserve_nan_bits() {
        let payload = Value::F32(0x7FC0_0001);
        assert_eq!(raw_to_value(value_to_raw(payload), ValType::F32), payload);
        let negative = Value::I32(-1);
        assert_eq!(raw_to_value(value_to_raw(negative), ValType::I32), negative);
    }

    #[test]
    fn i32_sign_round_trip() {
        let mut s = ValueStack::default();
        s.push_i32(-5);
        assert_eq!(s.pop_i32(), -5);
        s.push_i32(i32::MIN);
        assert_eq!(s.pop_u32(), 0x8000_0000);
    }
}
