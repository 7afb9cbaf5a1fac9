//! Primitive vocabulary shared by the source and target trees: fixed-width
//! machine integers and the operator set.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    SizeT,
}

impl Width {
    pub const ALL: [Width; 9] = [
        Width::U8,
        Width::U16,
        Width::U32,
        Width::U64,
        Width::I8,
        Width::I16,
        Width::I32,
        Width::I64,
        Width::SizeT,
    ];

    /// The `<stdint.h>` spelling of this width.
    pub fn c_name(self) -> &'static str {
        match self {
            Width::U8 => "uint8_t",
            Width::U16 => "uint16_t",
            Width::U32 => "uint32_t",
            Width::U64 => "uint64_t",
            Width::I8 => "int8_t",
            Width::I16 => "int16_t",
            Width::I32 => "int32_t",
            Width::I64 => "int64_t",
            Width::SizeT => "size_t",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Width::I8 | Width::I16 | Width::I32 | Width::I64)
    }

    pub fn bits(self) -> u32 {
        match self {
            Width::U8 | Width::I8 => 8,
            Width::U16 | Width::I16 => 16,
            Width::U32 | Width::I32 => 32,
            Width::U64 | Width::I64 | Width::SizeT => 64,
        }
    }

    /// Truncate `value` to this width, keeping the two's complement bit
    /// pattern in the low bits.
    pub fn truncate(self, value: u64) -> u64 {
        match self.bits() {
            64 => value,
            bits => value & ((1u64 << bits) - 1),
        }
    }

    /// Smallest unsigned width able to hold `count` distinct tags.
    pub fn for_tags(count: usize) -> Width {
        if count <= u8::MAX as usize + 1 {
            Width::U8
        } else if count <= u16::MAX as usize + 1 {
            Width::U16
        } else {
            Width::U32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    BOr,
    BAnd,
    BXor,
    BShiftL,
    BShiftR,
    BNot,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Not,
    Neg,
}

impl Op {
    pub fn token(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mult => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::BOr => "|",
            Op::BAnd => "&",
            Op::BXor => "^",
            Op::BShiftL => "<<",
            Op::BShiftR => ">>",
            Op::BNot => "~",
            Op::Eq => "==",
            Op::Neq => "!=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::And => "&&",
            Op::Or => "||",
            Op::Not => "!",
            Op::Neg => "-",
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Op::BNot | Op::Not | Op::Neg)
    }

    pub fn arity(self) -> usize {
        if self.is_unary() {
            1
        } else {
            2
        }
    }

    /// Operators whose result is `bool` regardless of operand type.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Op::Eq | Op::Neq | Op::Lt | Op::Lte | Op::Gt | Op::Gte
        )
    }

    /// Operators whose exact result can fall outside the range of their
    /// operand width.
    pub fn may_leave_range(self) -> bool {
        matches!(
            self,
            Op::Add | Op::Sub | Op::Mult | Op::Div | Op::BShiftL | Op::BNot | Op::Neg
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Op::And | Op::Or | Op::Not)
    }

    /// C binding strength; larger binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Op::BNot | Op::Not | Op::Neg => 14,
            Op::Mult | Op::Div | Op::Mod => 13,
            Op::Add | Op::Sub => 12,
            Op::BShiftL | Op::BShiftR => 11,
            Op::Lt | Op::Lte | Op::Gt | Op::Gte => 10,
            Op::Eq | Op::Neq => 9,
            Op::BAnd => 8,
            Op::BXor => 7,
            Op::BOr => 6,
            Op::And => 5,
            Op::Or => 4,
        }
    }
}
