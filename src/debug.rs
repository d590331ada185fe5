use crate::chunk::{Chunk, OpCode};
use crate::value::{as_function_object, print_value};

#[allow(dead_code)]
pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);

    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

#[allow(dead_code)]
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);
    if offset > 0 && chunk.read_line_from_offset(offset) == chunk.read_line_from_offset(offset - 1)
    {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.read_line_from_offset(offset).unwrap_or(0));
    }

    let byte = match chunk.read_from_offset(offset) {
        Some(byte) => byte,
        None => return offset + 1,
    };

    match OpCode::from_byte(byte) {
        Some(op) => match op {
            OpCode::Constant
            | OpCode::DefineGlobal
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::Class
            | OpCode::Method => constant_instruction(op, chunk, offset),
            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::Call => byte_instruction(op, chunk, offset),
            OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(op, 1, chunk, offset),
            OpCode::Loop => jump_instruction(op, -1, chunk, offset),
            OpCode::Invoke => invoke_instruction(op, chunk, offset),
            OpCode::Closure => closure_instruction(chunk, offset),
            _ => simple_instruction(op, offset),
        },
        None => {
            println!("Unknown opcode {}", byte);
            offset + 1
        }
    }
}

fn simple_instruction(op: OpCode, offset: usize) -> usize {
    println!("{}", op);
    offset + 1
}

fn byte_instruction(op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.read_from_offset(offset + 1).unwrap_or(0);
    println!("{:<16} {:>4}", op.to_string(), slot);
    offset + 2
}

fn constant_instruction(op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.read_from_offset(offset + 1).unwrap_or(0) as usize;
    print!("{:<16} {:>4} '", op.to_string(), constant);
    print_value(chunk.get_constant(constant));
    println!("'");
    offset + 2
}

fn jump_instruction(op: OpCode, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let mut jump = (chunk.read_from_offset(offset + 1).unwrap_or(0) as u16) << 8;
    jump |= chunk.read_from_offset(offset + 2).unwrap_or(0) as u16;

    let target = (offset as isize + 3 + sign as isize * jump as isize) as usize;
    println!("{:<16} {:>4} -> {}", op.to_string(), offset, target);
    offset + 3
}

fn invoke_instruction(op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.read_from_offset(offset + 1).unwrap_or(0) as usize;
    let argument_count = chunk.read_from_offset(offset + 2).unwrap_or(0);
    print!("{:<16} ({} args) {:>4} '", op.to_string(), argument_count, constant);
    print_value(chunk.get_constant(constant));
    println!("'");
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.read_from_offset(offset + 1).unwrap_or(0) as usize;
    print!("{:<16} {:>4} '", OpCode::Closure.to_string(), constant);
    print_value(chunk.get_constant(constant));
    println!("'");

    let function = as_function_object(chunk.get_constant(constant));
    let upvalue_count = unsafe { (*function).upvalue_count };
    let mut offset = offset + 2;
    for _ in 0..upvalue_count {
        let is_local = chunk.read_from_offset(offset).unwrap_or(0);
        let index = chunk.read_from_offset(offset + 1).unwrap_or(0);
        println!(
            "{:04}    |                     {} {}",
            offset,
            if is_local == 1 { "local" } else { "upvalue" },
            index
        );
        offset += 2;
    }
    offset
}
