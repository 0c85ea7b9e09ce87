//! Explicit decode position, threaded through every resolver.

use crate::DecodeError;

/// Position inside the image for the instruction being decoded.
///
/// `pos` only moves forward; `pos - start` is the number of bytes consumed
/// so far. Reads return a new cursor instead of mutating shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    start: usize,
    pos: usize,
}

impl Cursor {
    /// Cursor for an instruction beginning at `start`.
    pub fn new(start: usize) -> Self {
        Self { start, pos: start }
    }

    /// Offset at which the current instruction began
    pub fn start(&self) -> usize {
        self.start
    }

    /// Offset of the next unread byte
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes consumed since `start`
    pub fn consumed(&self) -> usize {
        self.pos - self.start
    }

    /// Jump forward to `pos` (e.g. past a prefix run).
    pub fn advance_to(self, pos: usize) -> Self {
        debug_assert!(pos >= self.pos, "cursor moved backwards");
        Self { pos: pos.max(self.pos), ..self }
    }

    /// Error describing a read past the end of `image`.
    pub fn truncated(&self, image: &[u8]) -> DecodeError {
        DecodeError::TruncatedInstruction {
            offset: self.start,
            available: image.len().saturating_sub(self.start),
        }
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self, image: &[u8]) -> Result<u8, DecodeError> {
        image.get(self.pos).copied().ok_or_else(|| self.truncated(image))
    }

    pub fn read_u8(self, image: &[u8]) -> Result<(u8, Self), DecodeError> {
        let byte = self.peek_u8(image)?;
        Ok((byte, Self { pos: self.pos + 1, ..self }))
    }

    pub fn read_u16(self, image: &[u8]) -> Result<(u16, Self), DecodeError> {
        let (bytes, next) = self.read_array::<2>(image)?;
        Ok((u16::from_le_bytes(bytes), next))
    }

    pub fn read_u32(self, image: &[u8]) -> Result<(u32, Self), DecodeError> {
        let (bytes, next) = self.read_array::<4>(image)?;
        Ok((u32::from_le_bytes(bytes), next))
    }

    /// Read a little-endian value of `bytes` length (1, 2 or 4).
    pub fn read_sized(self, image: &[u8], bytes: usize) -> Result<(u32, Self), DecodeError> {
        match bytes {
            1 => self.read_u8(image).map(|(v, c)| (v as u32, c)),
            2 => self.read_u16(image).map(|(v, c)| (v as u32, c)),
            _ => self.read_u32(image),
        }
    }

    fn read_array<const N: usize>(self, image: &[u8]) -> Result<([u8; N], Self), DecodeError> {
        let end = self.pos.checked_add(N).ok_or_else(|| self.truncated(image))?;
        let slice = image.get(self.pos..end).ok_or_else(|| self.truncated(image))?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(slice);
        Ok((bytes, Self { pos: end, ..self }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_advance() {
        let image = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let cursor = Cursor::new(0);
        let (b, cursor) = cursor.read_u8(&image).unwrap();
        let (w, cursor) = cursor.read_u16(&image).unwrap();
        let (d, cursor) = cursor.read_u32(&image).unwrap();
        assert_eq!((b, w, d), (0x01, 0x1234, 0x1234_5678));
        assert_eq!(cursor.consumed(), 7);
    }

    #[test]
    fn test_truncated_read_reports_available() {
        let image = [0x00, 0xAA, 0xBB];
        let cursor = Cursor::new(1).advance_to(2);
        let err = cursor.read_u32(&image).unwrap_err();
        assert_eq!(err, DecodeError::TruncatedInstruction { offset: 1, available: 2 });
    }

    #[test]
    fn test_peek_does_not_consume() {
        let image = [0x5A];
        let cursor = Cursor::new(0);
        assert_eq!(cursor.peek_u8(&image).unwrap(), 0x5A);
        assert_eq!(cursor.consumed(), 0);
    }
}
