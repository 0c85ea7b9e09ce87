//! Operand and memory-address value types produced by the decoder.

use std::fmt;
use serde::Serialize;

/// Bit width of a register, immediate or memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Width {
    /// 8 bits
    Byte,
    /// 16 bits
    Word,
    /// 32 bits
    Dword,
}

impl Width {
    /// Number of bits
    pub fn bits(self) -> u32 {
        match self {
            Width::Byte => 8,
            Width::Word => 16,
            Width::Dword => 32,
        }
    }

    /// Number of bytes
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    fn ptr_name(self) -> &'static str {
        match self {
            Width::Byte => "byte",
            Width::Word => "word",
            Width::Dword => "dword",
        }
    }
}

const BYTE_REGS: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];
const WORD_REGS: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];
const DWORD_REGS: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];

/// A register operand or addressing component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    /// General-purpose register, numbered as in the instruction encoding
    General { number: u8, width: Width },
    /// Instruction pointer, only used as a base for IP-relative addressing
    InstructionPointer { width: Width },
}

impl Register {
    /// General-purpose register `number` (0..=7, masked) of `width`.
    pub fn general(number: u8, width: Width) -> Self {
        Register::General { number: number & 7, width }
    }

    /// Width class of the register
    pub fn width(&self) -> Width {
        match *self {
            Register::General { width, .. } | Register::InstructionPointer { width } => width,
        }
    }

    /// Conventional lowercase register name.
    pub fn name(&self) -> &'static str {
        match *self {
            Register::General { number, width } => {
                let table = match width {
                    Width::Byte => &BYTE_REGS,
                    Width::Word => &WORD_REGS,
                    Width::Dword => &DWORD_REGS,
                };
                table[(number & 7) as usize]
            }
            Register::InstructionPointer { width: Width::Dword } => "eip",
            Register::InstructionPointer { .. } => "ip",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Segment register selected by a segment-override prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

impl Segment {
    /// Map a prefix byte to its segment, if it is a segment override.
    pub fn from_prefix(byte: u8) -> Option<Self> {
        match byte {
            0x26 => Some(Segment::Es),
            0x2E => Some(Segment::Cs),
            0x36 => Some(Segment::Ss),
            0x3E => Some(Segment::Ds),
            0x64 => Some(Segment::Fs),
            0x65 => Some(Segment::Gs),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Segment::Es => "es",
            Segment::Cs => "cs",
            Segment::Ss => "ss",
            Segment::Ds => "ds",
            Segment::Fs => "fs",
            Segment::Gs => "gs",
        }
    }
}

/// Encoded displacement of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Displacement {
    None,
    Disp8(i8),
    Disp16(i16),
    Disp32(i32),
}

impl Displacement {
    /// Sign-extended displacement value (0 when absent).
    pub fn value(self) -> i64 {
        match self {
            Displacement::None => 0,
            Displacement::Disp8(d) => d as i64,
            Displacement::Disp16(d) => d as i64,
            Displacement::Disp32(d) => d as i64,
        }
    }

    pub fn is_present(self) -> bool {
        !matches!(self, Displacement::None)
    }
}

/// A memory-addressing expression: `segment:[base + index*scale + disp]`.
///
/// Always names at least one of base, index or displacement; see
/// [`MemoryAddress::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryAddress {
    base: Option<Register>,
    index: Option<Register>,
    scale: u8,
    displacement: Displacement,
    segment: Option<Segment>,
    address_width: Width,
}

impl MemoryAddress {
    /// Build an address expression.
    ///
    /// Returns `None` when base, index and displacement are all absent, or
    /// when `scale` is not 1, 2, 4 or 8. Without an index the scale is
    /// normalised to 1.
    pub fn new(
        base: Option<Register>,
        index: Option<Register>,
        scale: u8,
        displacement: Displacement,
        segment: Option<Segment>,
        address_width: Width,
    ) -> Option<Self> {
        if base.is_none() && index.is_none() && !displacement.is_present() {
            return None;
        }
        if !matches!(scale, 1 | 2 | 4 | 8) {
            return None;
        }
        Some(Self {
            base,
            index,
            scale: if index.is_some() { scale } else { 1 },
            displacement,
            segment,
            address_width,
        })
    }

    pub fn base(&self) -> Option<Register> {
        self.base
    }

    pub fn index(&self) -> Option<Register> {
        self.index
    }

    /// Index scale; always 1 without an index register
    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn displacement(&self) -> Displacement {
        self.displacement
    }

    pub fn segment(&self) -> Option<Segment> {
        self.segment
    }

    /// Width of the effective-address computation (16 or 32 bits)
    pub fn address_width(&self) -> Width {
        self.address_width
    }

    /// True when the base is the instruction pointer.
    pub fn is_ip_relative(&self) -> bool {
        matches!(self.base, Some(Register::InstructionPointer { .. }))
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(seg) = self.segment {
            write!(f, "{}:", seg.name())?;
        }
        f.write_str("[")?;
        let mut wrote = false;
        if let Some(base) = self.base {
            write!(f, "{}", base)?;
            wrote = true;
        }
        if let Some(index) = self.index {
            if wrote {
                f.write_str("+")?;
            }
            write!(f, "{}", index)?;
            if self.scale != 1 {
                write!(f, "*{}", self.scale)?;
            }
            wrote = true;
        }
        if self.displacement.is_present() {
            let disp = self.displacement.value();
            if !wrote {
                let mask = (1u64 << self.address_width.bits()) - 1;
                write!(f, "0x{:x}", disp as u64 & mask)?;
            } else if disp < 0 {
                write!(f, "-0x{:x}", disp.unsigned_abs())?;
            } else {
                write!(f, "+0x{:x}", disp)?;
            }
        }
        f.write_str("]")
    }
}

/// An immediate value, already extended to 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Immediate {
    /// Extended value
    pub value: i64,
    /// Width the value was encoded with
    pub width: Width,
    /// Whether `value` was sign-extended from `width`
    pub signed: bool,
}

impl Immediate {
    /// Zero-extend `raw` from `width`.
    pub fn unsigned(raw: u32, width: Width) -> Self {
        let mask = if width == Width::Dword { u32::MAX } else { (1u32 << width.bits()) - 1 };
        Self { value: (raw & mask) as i64, width, signed: false }
    }

    /// Sign-extend `raw` from `width`.
    pub fn signed(raw: u32, width: Width) -> Self {
        let value = match width {
            Width::Byte => raw as u8 as i8 as i64,
            Width::Word => raw as u16 as i16 as i64,
            Width::Dword => raw as i32 as i64,
        };
        Self { value, width, signed: true }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value < 0 {
            write!(f, "-0x{:x}", self.value.unsigned_abs())
        } else {
            write!(f, "0x{:x}", self.value)
        }
    }
}

/// One resolved instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Register-direct operand
    Register(Register),
    /// Immediate value or relative displacement
    Immediate(Immediate),
    /// Memory operand with its access width
    Memory { address: MemoryAddress, width: Width },
}

impl Operand {
    /// Access width of the operand.
    pub fn width(&self) -> Width {
        match self {
            Operand::Register(reg) => reg.width(),
            Operand::Immediate(imm) => imm.width,
            Operand::Memory { width, .. } => *width,
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Register(_))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory { .. })
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => write!(f, "{}", reg),
            Operand::Immediate(imm) => write!(f, "{}", imm),
            Operand::Memory { address, width } => write!(f, "{} ptr {}", width.ptr_name(), address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_names() {
        assert_eq!(Register::general(0, Width::Dword).name(), "eax");
        assert_eq!(Register::general(4, Width::Byte).name(), "ah");
        assert_eq!(Register::general(7, Width::Word).name(), "di");
        assert_eq!(Register::InstructionPointer { width: Width::Dword }.name(), "eip");
    }

    #[test]
    fn test_memory_address_requires_a_component() {
        let empty = MemoryAddress::new(None, None, 1, Displacement::None, None, Width::Dword);
        assert!(empty.is_none());

        let disp_only = MemoryAddress::new(None, None, 1, Displacement::Disp32(0), None, Width::Dword);
        assert!(disp_only.is_some());
    }

    #[test]
    fn test_memory_address_rejects_bad_scale() {
        let eax = Register::general(0, Width::Dword);
        assert!(MemoryAddress::new(Some(eax), Some(eax), 3, Displacement::None, None, Width::Dword).is_none());
    }

    #[test]
    fn test_scale_normalised_without_index() {
        let ebx = Register::general(3, Width::Dword);
        let addr = MemoryAddress::new(Some(ebx), None, 8, Displacement::None, None, Width::Dword).unwrap();
        assert_eq!(addr.scale(), 1);
    }

    #[test]
    fn test_memory_display() {
        let eax = Register::general(0, Width::Dword);
        let ecx = Register::general(1, Width::Dword);
        let addr = MemoryAddress::new(
            Some(eax),
            Some(ecx),
            4,
            Displacement::Disp8(-8),
            Some(Segment::Fs),
            Width::Dword,
        )
        .unwrap();
        let op = Operand::Memory { address: addr, width: Width::Dword };
        assert_eq!(op.to_string(), "dword ptr fs:[eax+ecx*4-0x8]");
    }

    #[test]
    fn test_immediate_extension() {
        assert_eq!(Immediate::signed(0xFE, Width::Byte).value, -2);
        assert_eq!(Immediate::unsigned(0xFE, Width::Byte).value, 0xFE);
        assert_eq!(Immediate::signed(0x8000, Width::Word).value, -0x8000);
        assert_eq!(Immediate::unsigned(0xFFFF_FFFF, Width::Dword).value, 0xFFFF_FFFF);
    }
}
