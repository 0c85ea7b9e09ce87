//! Addressing-mode resolution: the mode byte, the SIB byte and displacements.

use crate::config::{DecoderConfig, DisplacementOnly};
use crate::cursor::Cursor;
use crate::operand::{Displacement, MemoryAddress, Operand, Register, Width};
use crate::prefix::PrefixState;
use crate::DecodeError;

/// Register numbers used by the 16-bit addressing forms.
const BX: u8 = 3;
const BP: u8 = 5;
const SI: u8 = 6;
const DI: u8 = 7;

/// The mode/reg/rm byte following an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    /// bits 7-6
    pub mode: u8,
    /// bits 5-3
    pub reg: u8,
    /// bits 2-0
    pub rm: u8,
}

impl ModRm {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            mode: byte >> 6,
            reg: (byte >> 3) & 7,
            rm: byte & 7,
        }
    }

    /// Consume the mode byte at the cursor.
    pub fn read(image: &[u8], cursor: Cursor) -> Result<(Self, Cursor), DecodeError> {
        let (byte, cursor) = cursor.read_u8(image)?;
        Ok((Self::from_byte(byte), cursor))
    }

    /// `mod == 11`: the r/m field names a register.
    pub fn is_register_direct(&self) -> bool {
        self.mode == 3
    }
}

/// The scale/index/base byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sib {
    pub scale: u8,
    pub index: u8,
    pub base: u8,
}

impl Sib {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            scale: byte >> 6,
            index: (byte >> 3) & 7,
            base: byte & 7,
        }
    }
}

/// Which forms an r/m operand accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmKind {
    Any,
    RegisterOnly,
    MemoryOnly,
}

/// Resolve the r/m operand described by `modrm`.
///
/// `cursor` must sit just past the mode byte. Register-direct forms consume
/// nothing further; memory forms consume the SIB byte and displacement.
/// A form the caller does not accept fails before any further byte is read.
pub fn resolve_address(
    image: &[u8],
    cursor: Cursor,
    prefixes: &PrefixState,
    config: &DecoderConfig,
    modrm: ModRm,
    kind: RmKind,
    width: Width,
) -> Result<(Operand, Cursor), DecodeError> {
    if modrm.is_register_direct() {
        if kind == RmKind::MemoryOnly {
            return Err(DecodeError::InvalidOperandEncoding {
                offset: cursor.start(),
                reason: "register form where a memory operand is required",
            });
        }
        return Ok((Operand::Register(Register::general(modrm.rm, width)), cursor));
    }
    if kind == RmKind::RegisterOnly {
        return Err(DecodeError::InvalidOperandEncoding {
            offset: cursor.start(),
            reason: "memory form where a register operand is required",
        });
    }

    let (address, cursor) = match config.address_width(prefixes) {
        Width::Word => resolve_16(image, cursor, prefixes, modrm)?,
        _ => resolve_32(image, cursor, prefixes, config, modrm)?,
    };
    Ok((Operand::Memory { address, width }, cursor))
}

fn read_displacement(
    image: &[u8],
    cursor: Cursor,
    mode: u8,
    wide: Width,
) -> Result<(Displacement, Cursor), DecodeError> {
    match (mode, wide) {
        (1, _) => {
            let (d, cursor) = cursor.read_u8(image)?;
            Ok((Displacement::Disp8(d as i8), cursor))
        }
        (_, Width::Word) => {
            let (d, cursor) = cursor.read_u16(image)?;
            Ok((Displacement::Disp16(d as i16), cursor))
        }
        _ => {
            let (d, cursor) = cursor.read_u32(image)?;
            Ok((Displacement::Disp32(d as i32), cursor))
        }
    }
}

fn memory(
    cursor: Cursor,
    base: Option<Register>,
    index: Option<Register>,
    scale: u8,
    displacement: Displacement,
    prefixes: &PrefixState,
    address_width: Width,
) -> Result<MemoryAddress, DecodeError> {
    MemoryAddress::new(base, index, scale, displacement, prefixes.segment, address_width).ok_or(
        DecodeError::InvalidOperandEncoding {
            offset: cursor.start(),
            reason: "memory form names no addressing component",
        },
    )
}

fn resolve_32(
    image: &[u8],
    cursor: Cursor,
    prefixes: &PrefixState,
    config: &DecoderConfig,
    modrm: ModRm,
) -> Result<(MemoryAddress, Cursor), DecodeError> {
    let gpr = |n: u8| Register::general(n, Width::Dword);

    if modrm.rm == 4 {
        let (byte, cursor) = cursor.read_u8(image)?;
        let sib = Sib::from_byte(byte);
        let index = (sib.index != 4).then(|| gpr(sib.index));
        // base=101 with mod=00 means disp32 and no base register
        let no_base = sib.base == 5 && modrm.mode == 0;
        let base = (!no_base).then(|| gpr(sib.base));
        let (displacement, cursor) = match modrm.mode {
            0 if no_base => read_displacement(image, cursor, 2, Width::Dword)?,
            0 => (Displacement::None, cursor),
            mode => read_displacement(image, cursor, mode, Width::Dword)?,
        };
        let address = memory(cursor, base, index, 1 << sib.scale, displacement, prefixes, Width::Dword)?;
        return Ok((address, cursor));
    }

    if modrm.mode == 0 && modrm.rm == 5 {
        let (displacement, cursor) = read_displacement(image, cursor, 2, Width::Dword)?;
        let base = match config.displacement_only {
            DisplacementOnly::Absolute => None,
            DisplacementOnly::InstructionPointerRelative => {
                Some(Register::InstructionPointer { width: Width::Dword })
            }
        };
        let address = memory(cursor, base, None, 1, displacement, prefixes, Width::Dword)?;
        return Ok((address, cursor));
    }

    let (displacement, cursor) = match modrm.mode {
        0 => (Displacement::None, cursor),
        mode => read_displacement(image, cursor, mode, Width::Dword)?,
    };
    let address = memory(cursor, Some(gpr(modrm.rm)), None, 1, displacement, prefixes, Width::Dword)?;
    Ok((address, cursor))
}

fn resolve_16(
    image: &[u8],
    cursor: Cursor,
    prefixes: &PrefixState,
    modrm: ModRm,
) -> Result<(MemoryAddress, Cursor), DecodeError> {
    let gpr = |n: u8| Some(Register::general(n, Width::Word));

    if modrm.mode == 0 && modrm.rm == 6 {
        let (displacement, cursor) = read_displacement(image, cursor, 2, Width::Word)?;
        let address = memory(cursor, None, None, 1, displacement, prefixes, Width::Word)?;
        return Ok((address, cursor));
    }

    let (base, index) = match modrm.rm {
        0 => (gpr(BX), gpr(SI)),
        1 => (gpr(BX), gpr(DI)),
        2 => (gpr(BP), gpr(SI)),
        3 => (gpr(BP), gpr(DI)),
        4 => (gpr(SI), None),
        5 => (gpr(DI), None),
        6 => (gpr(BP), None),
        _ => (gpr(BX), None),
    };
    let (displacement, cursor) = match modrm.mode {
        0 => (Displacement::None, cursor),
        mode => read_displacement(image, cursor, mode, Width::Word)?,
    };
    let address = memory(cursor, base, index, 1, displacement, prefixes, Width::Word)?;
    Ok((address, cursor))
}
