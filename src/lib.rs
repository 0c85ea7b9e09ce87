//! Table-driven decoder for 32-bit x86 machine code.
//!
//! This library turns raw code bytes, typically captured from an inspected
//! process or a static image, into structured instruction records. Decoding
//! is driven by a read-only opcode table of data descriptors; the decoder
//! itself holds no mutable state, so it can be shared freely across threads.
//!
//! # Basic Usage
//!
//! ```rust
//! use sa_x86_decode::{driver, X86Decoder};
//!
//! // push ebp; mov ebp, esp; ret
//! let code = [0x55, 0x89, 0xE5, 0xC3];
//!
//! let decoder = X86Decoder::new().unwrap();
//! for insn in driver::decode_all(&decoder, &code, 0, Some(0x0804_8000)) {
//!     let insn = insn.unwrap();
//!     println!("{:08x}  {}", insn.address().unwrap_or_default(), insn);
//! }
//! ```

pub mod config;
pub mod cursor;
pub mod decoder;
pub mod driver;
pub mod instruction;
pub mod operand;
pub mod prefix;
#[cfg(test)]
mod stream_tests;

/// Represents an address in memory
pub type Address = u64;

/// Maximum instruction size in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 15;

pub use config::{CodeSize, DecoderConfig, DisplacementOnly};
pub use decoder::table::{DecoderTable, Descriptor, OpcodeKey, TableBuilder, TableError};
pub use decoder::X86Decoder;
pub use driver::{decode_all, sweep, Sweep};
pub use instruction::{DecodedInstruction, Shape};
pub use operand::{MemoryAddress, Operand, Register, Width};
pub use prefix::PrefixState;

/// Decoder trait: turns the bytes at one offset into one instruction.
pub trait Decoder: Send + Sync {
    /// Decode a single instruction at offset `at`.
    ///
    /// # Arguments
    /// * `image` - The code bytes to decode
    /// * `at` - Offset of the instruction's first byte within `image`
    /// * `base` - Absolute address of `image[0]`, used only to stamp addresses
    ///
    /// # Returns
    /// The decoded instruction, or the reason the bytes at `at` do not form one
    fn decode(&self, image: &[u8], at: usize, base: Option<Address>) -> Result<DecodedInstruction, DecodeError>;
}

/// Error type for decode operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// No descriptor is registered for the opcode
    #[error("Unsupported opcode {key} at offset 0x{offset:x}")]
    UnsupportedOpcode { offset: usize, key: OpcodeKey },

    /// The image ends before the instruction does
    #[error("Truncated instruction at offset 0x{offset:x}: only {available} bytes available")]
    TruncatedInstruction { offset: usize, available: usize },

    /// Operand encoding the descriptor does not accept
    #[error("Invalid operand encoding at offset 0x{offset:x}: {reason}")]
    InvalidOperandEncoding { offset: usize, reason: &'static str },

    /// Instruction longer than the configured limit
    #[error("Instruction at offset 0x{offset:x} exceeds {limit} bytes")]
    InstructionTooLong { offset: usize, limit: usize },

    /// Decode requested outside the image
    #[error("Invalid offset: {offset} is outside the image bounds ({len} bytes)")]
    InvalidOffset { offset: usize, len: usize },
}

impl DecodeError {
    /// Offset of the instruction the error refers to.
    pub fn offset(&self) -> usize {
        match *self {
            DecodeError::UnsupportedOpcode { offset, .. }
            | DecodeError::TruncatedInstruction { offset, .. }
            | DecodeError::InvalidOperandEncoding { offset, .. }
            | DecodeError::InstructionTooLong { offset, .. }
            | DecodeError::InvalidOffset { offset, .. } => offset,
        }
    }

    /// True when more bytes could turn the failure into a successful decode.
    pub fn is_truncation(&self) -> bool {
        matches!(self, DecodeError::TruncatedInstruction { .. })
    }
}
