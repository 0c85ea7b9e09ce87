//! Decode driver: walks a buffer one instruction at a time.
//!
//! Every entry point here is a linear sweep. A sweep stops at the first
//! failure and never guesses where the next instruction might begin, since
//! boundaries are only known once an instruction decodes.

use std::iter::FusedIterator;
use std::time::Instant;

use rayon::prelude::*;

use crate::{Address, DecodeError, DecodedInstruction, Decoder};

/// Lazy sequence of instructions starting at a given offset.
///
/// Ends without error when the cursor reaches the end of the image exactly,
/// and ends after yielding the first error otherwise.
pub struct DecodeIter<'a> {
    decoder: &'a dyn Decoder,
    image: &'a [u8],
    offset: usize,
    base: Option<Address>,
    done: bool,
}

impl DecodeIter<'_> {
    /// Offset the next pull decodes from; after an error, the failing offset.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = Result<DecodedInstruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset == self.image.len() {
            self.done = true;
            return None;
        }
        match self.decoder.decode(self.image, self.offset, self.base) {
            Ok(insn) => {
                debug_assert!(insn.size() > 0, "zero-sized instruction at 0x{:x}", self.offset);
                self.offset = insn.next_offset();
                Some(Ok(insn))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for DecodeIter<'_> {}

/// Decode `image` from `start` onwards, one instruction per pull.
///
/// # Arguments
/// * `decoder` - The decoder to use
/// * `image` - The code bytes
/// * `start` - Offset of the first instruction
/// * `base` - Absolute address of `image[0]`, if known
pub fn decode_all<'a>(
    decoder: &'a dyn Decoder,
    image: &'a [u8],
    start: usize,
    base: Option<Address>,
) -> DecodeIter<'a> {
    DecodeIter { decoder, image, offset: start, base, done: false }
}

/// Result of a complete linear sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sweep {
    /// Instructions decoded before the sweep stopped
    pub instructions: Vec<DecodedInstruction>,
    /// Error that stopped the sweep, if it did not reach the end
    pub error: Option<DecodeError>,
    /// Offset the sweep stopped at
    pub end_offset: usize,
}

impl Sweep {
    /// True if the sweep consumed the image up to its end.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Number of bytes covered by the decoded instructions.
    pub fn bytes_decoded(&self) -> usize {
        self.instructions.iter().map(DecodedInstruction::size).sum()
    }
}

/// Linear sweep from `start`, collecting everything up to the end or the
/// first error.
pub fn sweep(decoder: &dyn Decoder, image: &[u8], start: usize, base: Option<Address>) -> Sweep {
    log::debug!("Starting linear sweep at offset 0x{:x} over {} bytes", start, image.len());
    let start_time = Instant::now();

    let mut iter = decode_all(decoder, image, start, base);
    let mut instructions = Vec::new();
    let mut error = None;
    for result in iter.by_ref() {
        match result {
            Ok(insn) => instructions.push(insn),
            Err(err) => error = Some(err),
        }
    }
    let end_offset = iter.offset();

    if let Some(err) = &error {
        log::warn!("Linear sweep stopped at offset 0x{:x}: {}", end_offset, err);
    }
    log::debug!(
        "Linear sweep completed in {:?}: {} instructions, stopped at 0x{:x}",
        start_time.elapsed(),
        instructions.len(),
        end_offset
    );

    Sweep { instructions, error, end_offset }
}

/// Start offsets of every instruction from `start` to the end of `image`.
pub fn instruction_boundaries(decoder: &dyn Decoder, image: &[u8], start: usize) -> Result<Vec<usize>, DecodeError> {
    decode_all(decoder, image, start, None)
        .map(|result| result.map(|insn| insn.offset()))
        .collect()
}

/// An independent code region for [`decode_regions`].
#[derive(Debug, Clone, Copy)]
pub struct Region<'a> {
    /// Code bytes of the region
    pub bytes: &'a [u8],
    /// Offset of the first instruction within `bytes`
    pub start: usize,
    /// Absolute address of `bytes[0]`, if known
    pub base: Option<Address>,
}

/// Sweep independent regions in parallel; results keep the input order.
pub fn decode_regions(decoder: &dyn Decoder, regions: &[Region<'_>]) -> Vec<Sweep> {
    log::debug!("Decoding {} regions in parallel", regions.len());
    regions
        .par_iter()
        .map(|region| sweep(decoder, region.bytes, region.start, region.base))
        .collect()
}
