//! Prefix scanning.

use serde::Serialize;

use crate::operand::Segment;

/// Operand-size override prefix
pub const OPERAND_SIZE_OVERRIDE: u8 = 0x66;
/// Address-size override prefix
pub const ADDRESS_SIZE_OVERRIDE: u8 = 0x67;
/// LOCK prefix
pub const LOCK: u8 = 0xF0;
/// REPNE/REPNZ prefix
pub const REPNE: u8 = 0xF2;
/// REP/REPE/REPZ prefix
pub const REP: u8 = 0xF3;

/// Repeat class selected by an `F2`/`F3` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    Rep,
    Repne,
}

/// Flags collected from the prefix bytes preceding an opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PrefixState {
    pub operand_size_override: bool,
    pub address_size_override: bool,
    pub segment: Option<Segment>,
    pub lock: bool,
    pub repeat: Option<Repeat>,
}

impl PrefixState {
    /// True when no prefix byte was seen.
    pub fn is_empty(&self) -> bool {
        *self == PrefixState::default()
    }

    /// Fold one byte into the state. Returns `false` if it is not a prefix.
    fn absorb(&mut self, byte: u8) -> bool {
        match byte {
            OPERAND_SIZE_OVERRIDE => self.operand_size_override = true,
            ADDRESS_SIZE_OVERRIDE => self.address_size_override = true,
            LOCK => self.lock = true,
            REP => self.repeat = Some(Repeat::Rep),
            REPNE => self.repeat = Some(Repeat::Repne),
            _ => match Segment::from_prefix(byte) {
                Some(seg) => self.segment = Some(seg),
                None => return false,
            },
        }
        true
    }
}

/// True if `byte` is consumed by [`scan`] rather than read as an opcode.
pub fn is_prefix(byte: u8) -> bool {
    PrefixState::default().absorb(byte)
}

/// Scan prefix bytes starting at `offset`.
///
/// Returns the collected state and the offset of the first non-prefix byte
/// (which is `image.len()` if the buffer ends inside the prefix run). Never
/// fails: an empty run yields the default state. Repeated segment or repeat
/// prefixes keep the last one seen.
pub fn scan(image: &[u8], offset: usize) -> (PrefixState, usize) {
    let mut state = PrefixState::default();
    let mut at = offset;
    while let Some(&byte) = image.get(at) {
        if !state.absorb(byte) {
            break;
        }
        at += 1;
    }
    (state, at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_no_prefix() {
        let (state, next) = scan(&[0x90], 0);
        assert!(state.is_empty());
        assert_eq!(next, 0);
    }

    #[rstest]
    #[case(&[0x66, 0x90], 1)]
    #[case(&[0x67, 0x66, 0x90], 2)]
    #[case(&[0xF0, 0xF3, 0x2E, 0x90], 3)]
    fn test_prefix_run_length(#[case] bytes: &[u8], #[case] expected: usize) {
        let (_, next) = scan(bytes, 0);
        assert_eq!(next, expected);
    }

    #[test]
    fn test_all_flags() {
        let (state, next) = scan(&[0xF0, 0xF2, 0x64, 0x66, 0x67, 0x01], 0);
        assert_eq!(next, 5);
        assert!(state.lock);
        assert_eq!(state.repeat, Some(Repeat::Repne));
        assert_eq!(state.segment, Some(Segment::Fs));
        assert!(state.operand_size_override);
        assert!(state.address_size_override);
    }

    #[test]
    fn test_is_prefix() {
        assert!(is_prefix(0x66));
        assert!(is_prefix(0x3E));
        assert!(!is_prefix(0x0F));
        assert!(!is_prefix(0x90));
    }

    #[test]
    fn test_last_segment_wins() {
        let (state, _) = scan(&[0x2E, 0x65, 0x90], 0);
        assert_eq!(state.segment, Some(Segment::Gs));
    }

    #[test]
    fn test_scan_from_offset() {
        let (state, next) = scan(&[0x90, 0x66, 0x90], 1);
        assert!(state.operand_size_override);
        assert_eq!(next, 2);
    }

    #[test]
    fn test_only_prefixes_stops_at_end() {
        let (state, next) = scan(&[0x66, 0x66], 0);
        assert!(state.operand_size_override);
        assert_eq!(next, 2);
    }
}
