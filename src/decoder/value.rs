//! Operand-type resolution: immediates, relative displacements and direct offsets.

use crate::config::DecoderConfig;
use crate::cursor::Cursor;
use crate::decoder::table::{AddrMode, OperandSpec, OperandType};
use crate::operand::{Displacement, Immediate, MemoryAddress, Operand, Width};
use crate::prefix::PrefixState;
use crate::DecodeError;

/// Width an operand type denotes once the operand size is known.
pub fn operand_width(ty: OperandType, prefixes: &PrefixState, config: &DecoderConfig) -> Width {
    match ty {
        OperandType::Byte => Width::Byte,
        OperandType::Word => Width::Word,
        OperandType::Dword => Width::Dword,
        OperandType::Variable | OperandType::ByteSignExtended => config.operand_width(prefixes),
    }
}

/// Width of the bytes actually stored in the instruction for `ty`.
fn encoded_width(ty: OperandType, prefixes: &PrefixState, config: &DecoderConfig) -> Width {
    match ty {
        OperandType::ByteSignExtended => Width::Byte,
        other => operand_width(other, prefixes, config),
    }
}

/// Resolve an `I`, `J` or `Offset` operand at the cursor.
///
/// Immediates are zero-extended unless the type is a sign-extended byte;
/// relative displacements are always signed.
pub fn resolve_value(
    image: &[u8],
    cursor: Cursor,
    prefixes: &PrefixState,
    config: &DecoderConfig,
    spec: OperandSpec,
) -> Result<(Operand, Cursor), DecodeError> {
    match spec.mode {
        AddrMode::I => {
            let width = encoded_width(spec.ty, prefixes, config);
            let (raw, cursor) = cursor.read_sized(image, width.bytes())?;
            let imm = match spec.ty {
                OperandType::ByteSignExtended => Immediate::signed(raw, width),
                _ => Immediate::unsigned(raw, width),
            };
            Ok((Operand::Immediate(imm), cursor))
        }
        AddrMode::J => {
            let width = encoded_width(spec.ty, prefixes, config);
            let (raw, cursor) = cursor.read_sized(image, width.bytes())?;
            Ok((Operand::Immediate(Immediate::signed(raw, width)), cursor))
        }
        AddrMode::Offset => {
            let address_width = config.address_width(prefixes);
            let (raw, cursor) = cursor.read_sized(image, address_width.bytes())?;
            let displacement = match address_width {
                Width::Word => Displacement::Disp16(raw as u16 as i16),
                _ => Displacement::Disp32(raw as i32),
            };
            let address = MemoryAddress::new(None, None, 1, displacement, prefixes.segment, address_width)
                .ok_or(DecodeError::InvalidOperandEncoding {
                    offset: cursor.start(),
                    reason: "direct offset names no addressing component",
                })?;
            let width = operand_width(spec.ty, prefixes, config);
            Ok((Operand::Memory { address, width }, cursor))
        }
        _ => Err(DecodeError::InvalidOperandEncoding {
            offset: cursor.start(),
            reason: "operand is not an immediate, relative or offset form",
        }),
    }
}
