//! Decoder configuration.

use serde::{Deserialize, Serialize};

use crate::operand::Width;
use crate::prefix::PrefixState;
use crate::MAX_INSTRUCTION_SIZE;

/// Default operand and address size of the code being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSize {
    /// 16-bit code segment (real mode, 16-bit protected mode)
    Bits16,
    /// 32-bit code segment
    #[default]
    Bits32,
}

impl CodeSize {
    fn natural_width(self) -> Width {
        match self {
            CodeSize::Bits16 => Width::Word,
            CodeSize::Bits32 => Width::Dword,
        }
    }

    /// The width selected when an override prefix is present.
    fn overridden_width(self) -> Width {
        match self {
            CodeSize::Bits16 => Width::Dword,
            CodeSize::Bits32 => Width::Word,
        }
    }
}

/// Interpretation of the `mod=00 rm=101` form of 32-bit addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplacementOnly {
    /// Absolute 32-bit displacement with no base register (IA-32)
    #[default]
    Absolute,
    /// Displacement relative to the next instruction
    InstructionPointerRelative,
}

/// Settings shared by every decode made with one decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Default operand/address size
    pub code_size: CodeSize,
    /// Meaning of displacement-only 32-bit addressing
    pub displacement_only: DisplacementOnly,
    /// Longest accepted instruction, in bytes
    pub max_instruction_length: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            code_size: CodeSize::Bits32,
            displacement_only: DisplacementOnly::Absolute,
            max_instruction_length: MAX_INSTRUCTION_SIZE,
        }
    }
}

impl DecoderConfig {
    /// Effective operand size for "variable" operand types.
    pub fn operand_width(&self, prefixes: &PrefixState) -> Width {
        if prefixes.operand_size_override {
            self.code_size.overridden_width()
        } else {
            self.code_size.natural_width()
        }
    }

    /// Effective address size for memory operands and offsets.
    pub fn address_width(&self, prefixes: &PrefixState) -> Width {
        if prefixes.address_size_override {
            self.code_size.overridden_width()
        } else {
            self.code_size.natural_width()
        }
    }

    /// Longest accepted instruction, capped at the size of the raw byte buffer.
    pub fn length_limit(&self) -> usize {
        self.max_instruction_length.clamp(1, MAX_INSTRUCTION_SIZE)
    }
}
