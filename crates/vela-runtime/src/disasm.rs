//! Bytecode disassembler. Not part of the observable language interface — useful
//! for debugging the compiler and for tests that assert on emitted instruction shape.

use std::fmt::Write;

use crate::chunk::Chunk;
use crate::heap::{Heap, Obj};
use crate::opcode::Opcode;
use crate::value::Value;

pub fn disassemble_chunk(chunk: &Chunk, heap: &Heap, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (line, next) = disassemble_instruction(chunk, heap, offset);
        let _ = writeln!(out, "{line}");
        offset = next;
    }
    out
}

/// Disassembles one instruction at `offset`, returning its text and the offset
/// of the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, heap: &Heap, offset: usize) -> (String, usize) {
    let byte = chunk.code[offset];
    let Some(op) = Opcode::from_u8(byte) else {
        return (format!("{offset:04} Unknown opcode {byte}"), offset + 1);
    };

    let prefix = format!("{:04} {:4} {:?}", offset, chunk.lines[offset], op);

    match op {
        Opcode::Null | Opcode::True | Opcode::False | Opcode::Pop | Opcode::Equal
        | Opcode::Greater | Opcode::Less | Opcode::Add | Opcode::Subtract | Opcode::Multiply
        | Opcode::Divide | Opcode::Not | Opcode::Negate | Opcode::Print | Opcode::CloseUpvalue
        | Opcode::Return | Opcode::Inherit => (prefix, offset + 1),

        Opcode::Constant | Opcode::GetGlobal | Opcode::SetGlobal | Opcode::DefineGlobal
        | Opcode::GetProperty | Opcode::SetProperty | Opcode::Class | Opcode::Method
        | Opcode::GetSuper => {
            let idx = chunk.code[offset + 1];
            let value = &chunk.constants[idx as usize];
            (format!("{prefix} {idx} ({})", format_value(value, heap)), offset + 2)
        }

        Opcode::GetLocal | Opcode::SetLocal | Opcode::GetUpvalue | Opcode::SetUpvalue
        | Opcode::Call => {
            let operand = chunk.code[offset + 1];
            (format!("{prefix} {operand}"), offset + 2)
        }

        Opcode::Invoke | Opcode::SuperInvoke => {
            let idx = chunk.code[offset + 1];
            let argc = chunk.code[offset + 2];
            let value = &chunk.constants[idx as usize];
            (format!("{prefix} {idx} ({}) argc={argc}", format_value(value, heap)), offset + 3)
        }

        Opcode::Jump | Opcode::JumpIfFalse => {
            let dist = chunk.read_u16(offset + 1);
            let target = offset + 3 + dist as usize;
            (format!("{prefix} -> {target:04}"), offset + 3)
        }

        Opcode::Loop => {
            let dist = chunk.read_u16(offset + 1);
            let target = (offset + 3).saturating_sub(dist as usize);
            (format!("{prefix} -> {target:04}"), offset + 3)
        }

        Opcode::Closure => {
            let idx = chunk.code[offset + 1];
            let value = &chunk.constants[idx as usize];
            let mut next = offset + 2;
            let mut text = format!("{prefix} {idx} ({})", format_value(value, heap));
            if let Value::Obj(id) = value {
                if let Obj::Function(f) = heap.get(*id) {
                    for _ in 0..f.upvalue_count {
                        let is_local = chunk.code[next];
                        let index = chunk.code[next + 1];
                        let _ = write!(text, "\n      | {} {}", if is_local == 1 { "local" } else { "upvalue" }, index);
                        next += 2;
                    }
                }
            }
            (text, next)
        }
    }
}

pub fn format_value(value: &Value, heap: &Heap) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::Obj(id) => format_obj(*id, heap),
    }
}

pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn format_obj(id: crate::heap::ObjId, heap: &Heap) -> String {
    match heap.get(id) {
        Obj::String { bytes, .. } => String::from_utf8_lossy(bytes).into_owned(),
        Obj::Function(f) => match f.name {
            Some(name_id) => format!("<fn {}>", format_obj(name_id, heap)),
            None => "<script>".to_string(),
        },
        Obj::Native(_) => "<native fn>".to_string(),
        Obj::Closure(c) => format_obj(c.function, heap),
        Obj::Upvalue(_) => "upvalue".to_string(),
        Obj::Class(class) => format_obj(class.name, heap),
        Obj::Instance(inst) => format!("{} instance", format_obj(inst.class, heap)),
        Obj::BoundMethod(bound) => format_obj(bound.method, heap),
        Obj::List(_) => "<list>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_integral_numbers_without_trailing_zero() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(3.5), "3.5");
    }

    #[test]
    fn disassembles_a_simple_constant_load() {
        let mut heap = Heap::new();
        let mut chunk = Chunk::new();
        let k = chunk.add_constant(Value::Number(42.0));
        chunk.write_u8(Opcode::Constant as u8, 1);
        chunk.write_u8(k, 1);
        chunk.write_u8(Opcode::Return as u8, 1);
        let text = disassemble_chunk(&chunk, &heap, "test");
        assert!(text.contains("Constant"));
        assert!(text.contains("(42)"));
    }
}
