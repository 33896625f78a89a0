use crate::chunk::{Chunk, OpCode};
use crate::value::{as_function_object, print_value};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);

    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:08} ", offset);
    if offset > 0 && chunk.line_of(offset) == chunk.line_of(offset - 1) {
        print!("       | ");
    } else {
        print!("{:08} ", chunk.line_of(offset).unwrap_or(0));
    }

    let instruction = match OpCode::from_byte(chunk.read(offset)) {
        Some(instruction) => instruction,
        None => {
            println!("Unknown opcode {}", chunk.read(offset));
            return offset + 1;
        }
    };

    match instruction {
        OpCode::Constant
        | OpCode::DefineGlobal
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::Class
        | OpCode::Method => constant_instruction(&instruction.to_string(), chunk, offset),
        OpCode::ConstantLong => long_constant_instruction(&instruction.to_string(), chunk, offset),
        OpCode::Nil
        | OpCode::True
        | OpCode::False
        | OpCode::Pop
        | OpCode::Equal
        | OpCode::Greater
        | OpCode::Less
        | OpCode::Add
        | OpCode::Subtract
        | OpCode::Multiply
        | OpCode::Divide
        | OpCode::Not
        | OpCode::Negate
        | OpCode::Print
        | OpCode::CloseUpvalue
        | OpCode::Return => simple_instruction(&instruction.to_string(), offset),
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => byte_instruction(&instruction.to_string(), chunk, offset),
        OpCode::Jump | OpCode::JumpIfFalse => {
            jump_instruction(&instruction.to_string(), 1, chunk, offset)
        }
        OpCode::Loop => jump_instruction(&instruction.to_string(), -1, chunk, offset),
        OpCode::Invoke => invoke_instruction(&instruction.to_string(), chunk, offset),
        OpCode::Closure => closure_instruction(chunk, offset),
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{}", name);
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.read(offset + 1);
    println!("{:<16} {:>4}", name, slot);
    offset + 2
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.read(offset + 1) as usize;
    print!("{:<16} {:>4} '", name, constant);
    print_value(chunk.get_constant(constant));
    println!("'");
    offset + 2
}

fn long_constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = ((chunk.read(offset + 1) as usize) << 16)
        | ((chunk.read(offset + 2) as usize) << 8)
        | chunk.read(offset + 3) as usize;
    print!("{:<16} {:>4} '", name, constant);
    print_value(chunk.get_constant(constant));
    println!("'");
    offset + 4
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let mut jump_offset = (chunk.read(offset + 1) as u16) << 8;
    jump_offset |= chunk.read(offset + 2) as u16;

    let signed_jump = (sign as isize) * (jump_offset as isize);
    let target = (offset as isize + 3 + signed_jump) as usize;

    println!("{:<16} {:>4} -> {}", name, offset, target);
    offset + 3
}

fn invoke_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.read(offset + 1) as usize;
    let arg_count = chunk.read(offset + 2);
    print!("{:<16} ({} args) {:>4} '", name, arg_count, constant);
    print_value(chunk.get_constant(constant));
    println!("'");
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let mut offset = offset + 1;
    let constant = chunk.read(offset) as usize;
    offset += 1;
    print!("{:<16} {:>4} ", "Closure", constant);
    print_value(chunk.get_constant(constant));
    println!();

    let function = as_function_object(chunk.get_constant(constant));
    for _ in 0..unsafe { (*function).upvalue_count } {
        let is_local = chunk.read(offset);
        let index = chunk.read(offset + 1);
        println!(
            "{:08}       |                     {} {}",
            offset,
            if is_local == 1 { "local" } else { "upvalue" },
            index
        );
        offset += 2;
    }
    offset
}
