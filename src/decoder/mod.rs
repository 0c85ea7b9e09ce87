//! Table-driven x86 instruction decoder.
//!
//! Decoding one instruction runs prefix scan, opcode dispatch, operand
//! resolution and construction in that order, threading an explicit
//! [`Cursor`] through each stage. Nothing is mutated between stages, so one
//! [`X86Decoder`] can be shared across threads.

use std::fmt;
use std::sync::Arc;

pub mod builtin;
pub mod modrm;
pub mod table;
pub mod value;

use crate::config::DecoderConfig;
use crate::cursor::Cursor;
use crate::instruction::{self, DecodedInstruction};
use crate::operand::{Immediate, Operand, Register, Width};
use crate::prefix::{self, PrefixState};
use crate::{Address, DecodeError, Decoder};

use self::modrm::{ModRm, RmKind};
use self::table::{AddrMode, DecoderTable, Descriptor, Entry, OpcodeKey, TableError};

pub use self::table::TWO_BYTE_ESCAPE;

/// x86 decoder over a shared, read-only opcode table.
#[derive(Debug, Clone)]
pub struct X86Decoder {
    table: Arc<DecoderTable>,
    config: DecoderConfig,
}

impl X86Decoder {
    /// Decoder over the built-in table with the default configuration.
    pub fn new() -> Result<Self, TableError> {
        Self::with_config(DecoderConfig::default())
    }

    /// Decoder over the built-in table.
    pub fn with_config(config: DecoderConfig) -> Result<Self, TableError> {
        Ok(Self::with_table(builtin::table()?, config))
    }

    /// Decoder over a caller-assembled table.
    pub fn with_table(table: Arc<DecoderTable>, config: DecoderConfig) -> Self {
        Self { table, config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn table(&self) -> &DecoderTable {
        &self.table
    }

    /// Length of the instruction starting at `at`.
    pub fn length_at(&self, image: &[u8], at: usize) -> Result<usize, DecodeError> {
        self.decode_one(image, at, None).map(|insn| insn.size())
    }

    fn decode_one(&self, image: &[u8], at: usize, base: Option<Address>) -> Result<DecodedInstruction, DecodeError> {
        if at > image.len() {
            return Err(DecodeError::InvalidOffset { offset: at, len: image.len() });
        }

        let (prefixes, next) = prefix::scan(image, at);
        let cursor = Cursor::new(at).advance_to(next);
        let (key, cursor) = read_opcode(image, cursor)?;
        let (descriptor, grouped) = self.select(image, cursor, key)?;

        let (modrm, cursor) = if grouped || descriptor.needs_modrm() {
            let (modrm, cursor) = ModRm::read(image, cursor)?;
            (Some(modrm), cursor)
        } else {
            (None, cursor)
        };

        let (operands, cursor) = self.resolve_operands(image, cursor, &prefixes, key, modrm, descriptor)?;

        let limit = self.config.length_limit();
        if cursor.consumed() > limit {
            return Err(DecodeError::InstructionTooLong { offset: at, limit });
        }

        let operand_width = self.config.operand_width(&prefixes);
        let insn = instruction::build(descriptor, operands, prefixes, operand_width, image, cursor, base)?;
        log::trace!("0x{:x}: {}", at, insn);
        Ok(insn)
    }

    /// Look up the descriptor for `key`, descending into a group by peeking
    /// at the mode byte. Returns whether a group was involved.
    fn select(&self, image: &[u8], cursor: Cursor, key: OpcodeKey) -> Result<(&Descriptor, bool), DecodeError> {
        let unsupported = |key| DecodeError::UnsupportedOpcode { offset: cursor.start(), key };
        match self.table.dispatch(key.map, key.opcode) {
            None => Err(unsupported(key)),
            Some(Entry::Instruction(descriptor)) => Ok((descriptor, false)),
            Some(Entry::Group(group)) => {
                let extension = ModRm::from_byte(cursor.peek_u8(image)?).reg;
                group
                    .member(extension)
                    .map(|descriptor| (descriptor, true))
                    .ok_or_else(|| unsupported(key.with_extension(extension)))
            }
        }
    }

    fn resolve_operands(
        &self,
        image: &[u8],
        mut cursor: Cursor,
        prefixes: &PrefixState,
        key: OpcodeKey,
        modrm: Option<ModRm>,
        descriptor: &Descriptor,
    ) -> Result<(Vec<Operand>, Cursor), DecodeError> {
        let config = &self.config;
        let mut slots: Vec<Option<Operand>> = vec![None; descriptor.operands.len()];

        // The r/m operand's SIB and displacement precede any immediate, so it
        // is resolved first whatever its operand position.
        let rm = descriptor.operands.iter().position(|spec| spec.mode.uses_rm());
        if let Some(i) = rm {
            let spec = descriptor.operands[i];
            let kind = match spec.mode {
                AddrMode::R => RmKind::RegisterOnly,
                AddrMode::M => RmKind::MemoryOnly,
                _ => RmKind::Any,
            };
            let width = value::operand_width(spec.ty, prefixes, config);
            let modrm = require_modrm(modrm, cursor)?;
            let (operand, next) = modrm::resolve_address(image, cursor, prefixes, config, modrm, kind, width)?;
            slots[i] = Some(operand);
            cursor = next;
        }

        for (i, spec) in descriptor.operands.iter().enumerate() {
            if Some(i) == rm {
                continue;
            }
            let width = value::operand_width(spec.ty, prefixes, config);
            let operand = match spec.mode {
                AddrMode::G => Operand::Register(Register::general(require_modrm(modrm, cursor)?.reg, width)),
                AddrMode::OpReg => Operand::Register(Register::general(key.opcode, width)),
                AddrMode::Reg(number) => Operand::Register(Register::general(number, width)),
                AddrMode::One => Operand::Immediate(Immediate::unsigned(1, Width::Byte)),
                AddrMode::I | AddrMode::J | AddrMode::Offset => {
                    let (operand, next) = value::resolve_value(image, cursor, prefixes, config, *spec)?;
                    cursor = next;
                    operand
                }
                AddrMode::E | AddrMode::R | AddrMode::M => {
                    return Err(DecodeError::InvalidOperandEncoding {
                        offset: cursor.start(),
                        reason: "descriptor declares more than one r/m operand",
                    });
                }
            };
            slots[i] = Some(operand);
        }

        Ok((slots.into_iter().flatten().collect(), cursor))
    }
}

impl fmt::Display for X86Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X86Decoder::{:?} ({} descriptors)", self.config.code_size, self.table.len())
    }
}

impl Decoder for X86Decoder {
    fn decode(&self, image: &[u8], at: usize, base: Option<Address>) -> Result<DecodedInstruction, DecodeError> {
        self.decode_one(image, at, base)
    }
}

/// Read the opcode, following the two-byte escape into the secondary map.
fn read_opcode(image: &[u8], cursor: Cursor) -> Result<(OpcodeKey, Cursor), DecodeError> {
    let (byte, cursor) = cursor.read_u8(image)?;
    if byte != TWO_BYTE_ESCAPE {
        return Ok((OpcodeKey::primary(byte), cursor));
    }
    let (byte, cursor) = cursor.read_u8(image)?;
    Ok((OpcodeKey::secondary(byte), cursor))
}

fn require_modrm(modrm: Option<ModRm>, cursor: Cursor) -> Result<ModRm, DecodeError> {
    modrm.ok_or(DecodeError::InvalidOperandEncoding {
        offset: cursor.start(),
        reason: "operand requires a mode byte",
    })
}
