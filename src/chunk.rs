use num_enum::TryFromPrimitive;
use strum_macros::Display;

use crate::value::{Value, ValueArray};

/// One byte of opcode, then 0-3 operand bytes. Jump offsets are 16-bit
/// big-endian; Closure trails (is_local, index) pairs, one per upvalue.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive)]
pub enum OpCode {
    Constant,
    Nil,
    True,
    False,
    Pop,
    GetLocal,
    SetLocal,
    GetGlobal,
    DefineGlobal,
    SetGlobal,
    GetUpvalue,
    SetUpvalue,
    GetProperty,
    SetProperty,
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,
    Print,
    Jump,
    JumpIfFalse,
    Loop,
    Call,
    Invoke,
    Closure,
    CloseUpvalue,
    Return,
    Class,
    Method,
}

impl OpCode {
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<OpCode> {
        OpCode::try_from(byte).ok()
    }
}

pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<usize>,
    constants: ValueArray,
}

impl Chunk {
    pub fn new() -> Chunk {
        Chunk {
            code: vec![],
            lines: vec![],
            constants: vec![],
        }
    }

    pub fn write(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Back-patch a byte written earlier (jump operands).
    pub fn write_by_offset(&mut self, offset: usize, byte: u8) {
        self.code[offset] = byte;
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn read_from_offset(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    pub fn read_line_from_offset(&self, offset: usize) -> Option<usize> {
        self.lines.get(offset).copied()
    }

    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Identical constants share a pool slot (numbers by value, objects by
    /// identity), which keeps identifier-heavy chunks under the 256 cap.
    pub fn find_constant(&self, value: Value) -> Option<usize> {
        self.constants.iter().position(|constant| *constant == value)
    }

    pub fn get_constant(&self, index: usize) -> &Value {
        &self.constants[index]
    }

    #[allow(dead_code)]
    pub fn constants_len(&self) -> usize {
        self.constants.len()
    }

    pub fn iter_constants(&self) -> impl Iterator<Item = &Value> {
        self.constants.iter()
    }

    pub fn deep_size(&self) -> usize {
        std::mem::size_of::<Chunk>()
            + self.code.capacity()
            + self.lines.capacity() * std::mem::size_of::<usize>()
            + self.constants.capacity() * std::mem::size_of::<Value>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{make_number_value, make_nil_value};

    #[test]
    fn test_write_keeps_lines_parallel() {
        let mut chunk = Chunk::new();
        chunk.write(OpCode::Nil.to_byte(), 1);
        chunk.write(OpCode::Return.to_byte(), 2);

        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.read_from_offset(0), Some(OpCode::Nil.to_byte()));
        assert_eq!(chunk.read_from_offset(1), Some(OpCode::Return.to_byte()));
        assert_eq!(chunk.read_line_from_offset(0), Some(1));
        assert_eq!(chunk.read_line_from_offset(1), Some(2));
        assert_eq!(chunk.read_from_offset(2), None);
    }

    #[test]
    fn test_add_and_find_constant() {
        let mut chunk = Chunk::new();
        let first = chunk.add_constant(make_number_value(1.0));
        let second = chunk.add_constant(make_number_value(2.0));
        assert_eq!(first, 0);
        assert_eq!(second, 1);

        assert_eq!(chunk.find_constant(make_number_value(2.0)), Some(1));
        assert_eq!(chunk.find_constant(make_number_value(3.0)), None);
        assert_eq!(chunk.find_constant(make_nil_value()), None);
        assert!(*chunk.get_constant(0) == make_number_value(1.0));
    }

    #[test]
    fn test_write_by_offset_patches_in_place() {
        let mut chunk = Chunk::new();
        chunk.write(OpCode::Jump.to_byte(), 1);
        chunk.write(0xff, 1);
        chunk.write(0xff, 1);
        chunk.write_by_offset(1, 0x01);
        chunk.write_by_offset(2, 0x02);

        assert_eq!(chunk.read_from_offset(1), Some(0x01));
        assert_eq!(chunk.read_from_offset(2), Some(0x02));
    }

    #[test]
    fn test_opcode_round_trips_through_bytes() {
        assert_eq!(OpCode::from_byte(OpCode::Constant.to_byte()), Some(OpCode::Constant));
        assert_eq!(OpCode::from_byte(OpCode::Method.to_byte()), Some(OpCode::Method));
        assert_eq!(OpCode::from_byte(0xff), None);
    }
}
