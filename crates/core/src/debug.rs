//! Chunk disassembler
//!
//! Renders a chunk as an offset/line/opcode listing. Trace mode dumps the
//! listing before execution, and compiler tests assert against it.

use std::fmt::Write as _;

use crate::chunk::{Chunk, OpCode};
use crate::object::Heap;

/// Disassemble a whole chunk under a header line.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (line, next) = disassemble_instruction(heap, chunk, offset);
        let _ = writeln!(out, "{line}");
        offset = next;
    }
    out
}

/// Disassemble the instruction at `offset`; returns the rendered line and
/// the offset of the next instruction.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut out = String::new();
    let _ = write!(out, "{offset:04} ");
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        out.push_str("   | ");
    } else {
        let _ = write!(out, "{:4} ", chunk.lines[offset]);
    }

    let op = OpCode::from_byte(chunk.code[offset]);
    let next = match op {
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method => constant_instruction(&mut out, heap, chunk, op, offset),
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call
        | OpCode::ListInit => byte_instruction(&mut out, chunk, op, offset),
        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(&mut out, chunk, op, 1, offset),
        OpCode::Loop => jump_instruction(&mut out, chunk, op, -1, offset),
        OpCode::Invoke | OpCode::SuperInvoke => invoke_instruction(&mut out, heap, chunk, op, offset),
        OpCode::Closure => closure_instruction(&mut out, heap, chunk, offset),
        _ => {
            let _ = write!(out, "{}", op_name(op));
            offset + 1
        }
    };
    (out, next)
}

fn op_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Constant => "CONSTANT",
        OpCode::Nil => "NIL",
        OpCode::True => "TRUE",
        OpCode::False => "FALSE",
        OpCode::Pop => "POP",
        OpCode::GetLocal => "GET_LOCAL",
        OpCode::SetLocal => "SET_LOCAL",
        OpCode::GetGlobal => "GET_GLOBAL",
        OpCode::DefineGlobal => "DEFINE_GLOBAL",
        OpCode::SetGlobal => "SET_GLOBAL",
        OpCode::GetUpvalue => "GET_UPVALUE",
        OpCode::SetUpvalue => "SET_UPVALUE",
        OpCode::GetProperty => "GET_PROPERTY",
        OpCode::SetProperty => "SET_PROPERTY",
        OpCode::GetSuper => "GET_SUPER",
        OpCode::Equal => "EQUAL",
        OpCode::Greater => "GREATER",
        OpCode::Less => "LESS",
        OpCode::Add => "ADD",
        OpCode::Subtract => "SUBTRACT",
        OpCode::Multiply => "MULTIPLY",
        OpCode::Divide => "DIVIDE",
        OpCode::Not => "NOT",
        OpCode::Negate => "NEGATE",
        OpCode::Print => "PRINT",
        OpCode::Jump => "JUMP",
        OpCode::JumpIfFalse => "JUMP_IF_FALSE",
        OpCode::Loop => "LOOP",
        OpCode::Call => "CALL",
        OpCode::Invoke => "INVOKE",
        OpCode::SuperInvoke => "SUPER_INVOKE",
        OpCode::Closure => "CLOSURE",
        OpCode::CloseUpvalue => "CLOSE_UPVALUE",
        OpCode::ListInit => "LIST_INIT",
        OpCode::ListGetIndex => "LIST_GETIDX",
        OpCode::ListSetIndex => "LIST_SETIDX",
        OpCode::Class => "CLASS",
        OpCode::Inherit => "INHERIT",
        OpCode::Method => "METHOD",
        OpCode::Return => "RETURN",
    }
}

fn constant_instruction(
    out: &mut String,
    heap: &Heap,
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
) -> usize {
    let index = chunk.code[offset + 1];
    let value = chunk.constants[index as usize];
    let _ = write!(out, "{:<16} {:4} '{}'", op_name(op), index, heap.value_to_string(value));
    offset + 2
}

fn byte_instruction(out: &mut String, chunk: &Chunk, op: OpCode, offset: usize) -> usize {
    let operand = chunk.code[offset + 1];
    let _ = write!(out, "{:<16} {operand:4}", op_name(op));
    offset + 2
}

fn jump_instruction(out: &mut String, chunk: &Chunk, op: OpCode, sign: i64, offset: usize) -> usize {
    let jump = u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]) as i64;
    let target = offset as i64 + 3 + sign * jump;
    let _ = write!(out, "{:<16} {offset:4} -> {target}", op_name(op));
    offset + 3
}

fn invoke_instruction(
    out: &mut String,
    heap: &Heap,
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
) -> usize {
    let index = chunk.code[offset + 1];
    let argc = chunk.code[offset + 2];
    let value = chunk.constants[index as usize];
    let _ = write!(
        out,
        "{:<16} ({argc} args) {:4} '{}'",
        op_name(op),
        index,
        heap.value_to_string(value)
    );
    offset + 3
}

fn closure_instruction(out: &mut String, heap: &Heap, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1];
    let value = chunk.constants[index as usize];
    let _ = write!(out, "{:<16} {:4} {}", "CLOSURE", index, heap.value_to_string(value));
    let mut offset = offset + 2;
    // One (is_local, index) pair trails the instruction per upvalue.
    let upvalue_count = heap.function(value.as_obj()).upvalue_count;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[offset];
        let slot = chunk.code[offset + 1];
        let _ = write!(
            out,
            "\n{:04}    |                     {} {}",
            offset,
            if is_local == 1 { "local" } else { "upvalue" },
            slot
        );
        offset += 2;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_simple_listing() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Return, 1);
        let listing = disassemble_chunk(&heap, &chunk, "test");
        assert!(listing.contains("== test =="));
        assert!(listing.contains("NIL"));
        assert!(listing.contains("RETURN"));
    }

    #[test]
    fn test_constant_operand_renders_value() {
        let mut heap = Heap::new();
        let mut chunk = Chunk::new();
        let s = heap.intern("greeting");
        let index = chunk.add_constant(Value::object(s)) as u8;
        chunk.write_op(OpCode::Constant, 3);
        chunk.write(index, 3);
        let (line, next) = disassemble_instruction(&heap, &chunk, 0);
        assert!(line.contains("CONSTANT"));
        assert!(line.contains("'greeting'"));
        assert_eq!(next, 2);
    }

    #[test]
    fn test_jump_target_arithmetic() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, 1);
        chunk.write(0x00, 1);
        chunk.write(0x05, 1);
        let (line, next) = disassemble_instruction(&heap, &chunk, 0);
        // Relative to the byte after the operand: 0 + 3 + 5.
        assert!(line.contains("-> 8"), "got: {line}");
        assert_eq!(next, 3);

        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Loop, 1);
        chunk.write(0x00, 1);
        chunk.write(0x03, 1);
        let (line, _) = disassemble_instruction(&heap, &chunk, 0);
        assert!(line.contains("-> 0"), "got: {line}");
    }
}
