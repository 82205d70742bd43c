//! Textual dump of a chunk's bytecode. Gated behind the `debug-bytecode`
//! feature so it costs nothing in a release build — mirrors the donor's
//! `#[cfg(feature = "debug-bytecode")]` convention.

use crate::chunk::Chunk;
use crate::opcode::OpCode;

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {name} ==");
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

/// Disassembles a single instruction starting at `offset` and returns the
/// offset of the next one.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{offset:04} ");
    if offset > 0 && chunk.line(offset) == chunk.line(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.line(offset));
    }

    let op = OpCode::from(chunk.byte(offset));
    match op {
        OpCode::Constant => constant_instr("OP_CONSTANT", chunk, offset),
        OpCode::Nil => simple_instr("OP_NIL", offset),
        OpCode::True => simple_instr("OP_TRUE", offset),
        OpCode::False => simple_instr("OP_FALSE", offset),
        OpCode::Pop => simple_instr("OP_POP", offset),
        OpCode::GetLocal => byte_instr("OP_GET_LOCAL", chunk, offset),
        OpCode::SetLocal => byte_instr("OP_SET_LOCAL", chunk, offset),
        OpCode::GetGlobal => constant_instr("OP_GET_GLOBAL", chunk, offset),
        OpCode::SetGlobal => constant_instr("OP_SET_GLOBAL", chunk, offset),
        OpCode::DefineGlobal => constant_instr("OP_DEFINE_GLOBAL", chunk, offset),
        OpCode::GetUpvalue => byte_instr("OP_GET_UPVALUE", chunk, offset),
        OpCode::SetUpvalue => byte_instr("OP_SET_UPVALUE", chunk, offset),
        OpCode::Equal => simple_instr("OP_EQUAL", offset),
        OpCode::Greater => simple_instr("OP_GREATER", offset),
        OpCode::Less => simple_instr("OP_LESS", offset),
        OpCode::Add => simple_instr("OP_ADD", offset),
        OpCode::Subtract => simple_instr("OP_SUBTRACT", offset),
        OpCode::Multiply => simple_instr("OP_MULTIPLY", offset),
        OpCode::Divide => simple_instr("OP_DIVIDE", offset),
        OpCode::Not => simple_instr("OP_NOT", offset),
        OpCode::Negate => simple_instr("OP_NEGATE", offset),
        OpCode::Print => simple_instr("OP_PRINT", offset),
        OpCode::Jump => jump_instr("OP_JUMP", 1, chunk, offset),
        OpCode::JumpIfFalse => jump_instr("OP_JUMP_IF_FALSE", 1, chunk, offset),
        OpCode::Loop => jump_instr("OP_LOOP", -1, chunk, offset),
        OpCode::Call => byte_instr("OP_CALL", chunk, offset),
        OpCode::Closure => closure_instr(chunk, offset),
        OpCode::CloseUpvalue => simple_instr("OP_CLOSE_UPVALUE", offset),
        OpCode::Return => simple_instr("OP_RETURN", offset),
    }
}

fn simple_instr(name: &str, offset: usize) -> usize {
    println!("{name}");
    offset + 1
}

fn byte_instr(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.byte(offset + 1);
    println!("{name:<16} {slot:4}");
    offset + 2
}

fn constant_instr(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let idx = chunk.byte(offset + 1) as usize;
    println!("{name:<16} {idx:4} '{:?}'", chunk.constant(idx));
    offset + 2
}

fn jump_instr(name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let jump = chunk.read_u16(offset + 1) as i32;
    let target = offset as i32 + 3 + sign * jump;
    println!("{name:<16} {offset:4} -> {target}");
    offset + 3
}

fn closure_instr(chunk: &Chunk, offset: usize) -> usize {
    let idx = chunk.byte(offset + 1) as usize;
    println!("OP_CLOSURE       {idx:4} '{:?}'", chunk.constant(idx));
    let mut pos = offset + 2;
    if let crate::value::Value::Obj(crate::object::Obj::Function(fun)) = chunk.constant(idx) {
        for _ in 0..fun.upvalue_count {
            let is_local = chunk.byte(pos);
            let index = chunk.byte(pos + 1);
            let kind = if is_local != 0 { "local" } else { "upvalue" };
            println!("{pos:04}      |                     {kind} {index}");
            pos += 2;
        }
    }
    pos
}
