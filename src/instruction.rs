//! Decoded instructions and the factory that builds them.

use std::fmt;
use serde::Serialize;

use crate::cursor::Cursor;
use crate::decoder::table::{Class, Condition, Descriptor};
use crate::operand::{Operand, Width};
use crate::prefix::{PrefixState, Repeat};
use crate::{Address, DecodeError, MAX_INSTRUCTION_SIZE};

/// Kind of control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Jump,
    ConditionalJump(Condition),
    Call,
    Return,
}

/// Where a jump or call goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Displacement from the next instruction; `target` is known only when
    /// the image was decoded with a base address.
    Relative { displacement: i64, target: Option<Address> },
    /// Register or memory holding the destination
    Indirect(Operand),
}

/// Closed set of instruction shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// No operands (`nop`, `ret`-less forms, `hlt`, ...)
    NoOperand,
    /// Jump, call or return
    ControlTransfer { flow: Flow, destination: Option<Destination> },
    /// Any other instruction with operands
    Operation,
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedInstruction {
    mnemonic: &'static str,
    shape: Shape,
    operands: Vec<Operand>,
    size: u8,
    offset: usize,
    address: Option<Address>,
    prefixes: PrefixState,
    bytes: [u8; MAX_INSTRUCTION_SIZE],
}

impl DecodedInstruction {
    pub fn mnemonic(&self) -> &'static str {
        self.mnemonic
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Operands in Intel order
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Length in bytes, prefixes included
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Offset of the first byte (first prefix, if any) in the image
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Absolute address, when a base address was supplied
    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn prefixes(&self) -> &PrefixState {
        &self.prefixes
    }

    /// Raw encoding of the instruction.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.size as usize]
    }

    /// Image offset of the following instruction
    pub fn next_offset(&self) -> usize {
        self.offset + self.size as usize
    }

    /// Absolute address of the following instruction
    pub fn next_address(&self) -> Option<Address> {
        self.address.map(|a| a.wrapping_add(self.size as Address))
    }

    pub fn is_control_transfer(&self) -> bool {
        matches!(self.shape, Shape::ControlTransfer { .. })
    }

    pub fn is_call(&self) -> bool {
        matches!(self.shape, Shape::ControlTransfer { flow: Flow::Call, .. })
    }

    /// Absolute target of a relative jump or call, if the address is known.
    pub fn branch_target(&self) -> Option<Address> {
        match self.shape {
            Shape::ControlTransfer {
                destination: Some(Destination::Relative { target, .. }),
                ..
            } => target,
            _ => None,
        }
    }

    /// Address a call returns to, i.e. the address after the call.
    pub fn return_address(&self) -> Option<Address> {
        if self.is_call() {
            self.next_address()
        } else {
            None
        }
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefixes.lock {
            f.write_str("lock ")?;
        }
        match self.prefixes.repeat {
            Some(Repeat::Rep) => f.write_str("rep ")?,
            Some(Repeat::Repne) => f.write_str("repne ")?,
            None => {}
        }
        f.write_str(self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            match (&self.shape, self.branch_target()) {
                (Shape::ControlTransfer { .. }, Some(target)) if i == 0 => write!(f, "0x{:x}", target)?,
                _ => write!(f, "{}", op)?,
            }
        }
        Ok(())
    }
}

/// Build the instruction decoded between `cursor.start()` and `cursor.pos()`.
///
/// Performs no decoding; routes on the descriptor class to pick the shape.
/// `operand_width` is the effective operand size, which selects the
/// mnemonic of size-named instructions and the wrap of relative targets.
/// Fails if the span is empty, longer than [`MAX_INSTRUCTION_SIZE`], or runs
/// past the end of `image`.
pub(crate) fn build(
    descriptor: &Descriptor,
    operands: Vec<Operand>,
    prefixes: PrefixState,
    operand_width: Width,
    image: &[u8],
    cursor: Cursor,
    base: Option<Address>,
) -> Result<DecodedInstruction, DecodeError> {
    debug_assert_eq!(operands.len(), descriptor.operands.len(), "operand count mismatch for {}", descriptor.mnemonic);

    let offset = cursor.start();
    let size = cursor.consumed();
    if size > MAX_INSTRUCTION_SIZE {
        return Err(DecodeError::InstructionTooLong { offset, limit: MAX_INSTRUCTION_SIZE });
    }
    let encoding = match image.get(offset..cursor.pos()) {
        Some(encoding) if !encoding.is_empty() => encoding,
        _ => return Err(cursor.truncated(image)),
    };
    let mut bytes = [0u8; MAX_INSTRUCTION_SIZE];
    bytes[..size].copy_from_slice(encoding);

    let address = base.map(|b| b.wrapping_add(offset as Address));
    let shape = match descriptor.class {
        Class::General if operands.is_empty() => Shape::NoOperand,
        Class::General => Shape::Operation,
        Class::Return => Shape::ControlTransfer { flow: Flow::Return, destination: None },
        Class::Jump => transfer(Flow::Jump, &operands, operand_width, address, size),
        Class::ConditionalJump(cond) => transfer(Flow::ConditionalJump(cond), &operands, operand_width, address, size),
        Class::Call => transfer(Flow::Call, &operands, operand_width, address, size),
    };

    Ok(DecodedInstruction {
        mnemonic: descriptor.mnemonic_for(operand_width),
        shape,
        operands,
        size: size as u8,
        offset,
        address,
        prefixes,
        bytes,
    })
}

fn transfer(
    flow: Flow,
    operands: &[Operand],
    operand_width: Width,
    address: Option<Address>,
    size: usize,
) -> Shape {
    let destination = operands.first().map(|op| match op {
        Operand::Immediate(imm) => {
            let target = address.map(|a| {
                let next = a.wrapping_add(size as Address);
                let target = next.wrapping_add(imm.value as Address);
                // a 16-bit operand size truncates the new instruction pointer
                if operand_width == Width::Word {
                    target & 0xFFFF
                } else {
                    target
                }
            });
            Destination::Relative { displacement: imm.value, target }
        }
        other => Destination::Indirect(*other),
    });
    Shape::ControlTransfer { flow, destination }
}
