//! Decoder descriptors, the dispatch table and its builder.
//!
//! A [`Descriptor`] is pure data: a mnemonic, a [`Class`] that tells the
//! instruction factory which shape to build, and one [`OperandSpec`] per
//! operand. New instructions are added by registering descriptors, never by
//! adding code.

use std::fmt;
use serde::Serialize;

use crate::operand::Width;
use crate::prefix;

/// Maximum number of operands a descriptor may declare.
pub const MAX_OPERANDS: usize = 3;

/// Escape byte selecting the secondary opcode map.
pub const TWO_BYTE_ESCAPE: u8 = 0x0F;

/// Opcode map a byte is looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpcodeMap {
    /// One-byte opcodes
    Primary,
    /// Opcodes following the `0x0F` escape byte
    Secondary,
}

/// Key a descriptor is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OpcodeKey {
    pub map: OpcodeMap,
    pub opcode: u8,
    /// Reg sub-field of the mode byte, for group opcodes
    pub extension: Option<u8>,
}

impl OpcodeKey {
    pub fn primary(opcode: u8) -> Self {
        Self { map: OpcodeMap::Primary, opcode, extension: None }
    }

    pub fn secondary(opcode: u8) -> Self {
        Self { map: OpcodeMap::Secondary, opcode, extension: None }
    }

    /// Same opcode, selected further by the mode byte's reg field.
    pub fn with_extension(self, extension: u8) -> Self {
        Self { extension: Some(extension), ..self }
    }
}

impl fmt::Display for OpcodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.map == OpcodeMap::Secondary {
            f.write_str("0x0f ")?;
        }
        write!(f, "0x{:02x}", self.opcode)?;
        if let Some(ext) = self.extension {
            write!(f, " /{}", ext)?;
        }
        Ok(())
    }
}

/// Where an operand's bits come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrMode {
    /// Mode byte r/m field: register or memory
    E,
    /// Mode byte r/m field, register-direct form only
    R,
    /// Mode byte r/m field, memory form only
    M,
    /// Mode byte reg field names a general register
    G,
    /// Immediate following the addressing bytes
    I,
    /// Signed displacement relative to the next instruction
    J,
    /// Register number in the low three opcode bits
    OpReg,
    /// Fixed general register
    Reg(u8),
    /// Implicit constant 1 (shift-by-one forms)
    One,
    /// Direct memory offset, address-size wide
    Offset,
}

impl AddrMode {
    /// Operand is taken from the r/m field and its trailing SIB/displacement.
    pub fn uses_rm(self) -> bool {
        matches!(self, AddrMode::E | AddrMode::R | AddrMode::M)
    }

    /// Operand needs the mode byte in some form.
    pub fn uses_modrm(self) -> bool {
        self.uses_rm() || self == AddrMode::G
    }
}

/// How wide an operand is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    Byte,
    Word,
    Dword,
    /// 16 or 32 bits, selected by the operand size
    Variable,
    /// 8-bit source sign-extended to the operand size
    ByteSignExtended,
}

/// Addressing mode and operand type for one operand position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperandSpec {
    pub mode: AddrMode,
    pub ty: OperandType,
}

impl OperandSpec {
    pub const fn new(mode: AddrMode, ty: OperandType) -> Self {
        Self { mode, ty }
    }
}

/// x86 condition codes, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Overflow,
    NotOverflow,
    Below,
    AboveOrEqual,
    Equal,
    NotEqual,
    BelowOrEqual,
    Above,
    Sign,
    NotSign,
    Parity,
    NotParity,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    Greater,
}

impl Condition {
    /// Condition encoded in the low nibble of a Jcc/SETcc/CMOVcc opcode.
    pub fn from_nibble(nibble: u8) -> Self {
        use Condition::*;
        const ALL: [Condition; 16] = [
            Overflow, NotOverflow, Below, AboveOrEqual, Equal, NotEqual, BelowOrEqual, Above,
            Sign, NotSign, Parity, NotParity, Less, GreaterOrEqual, LessOrEqual, Greater,
        ];
        ALL[(nibble & 0xF) as usize]
    }
}

/// Instruction class, used by the factory to pick the output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    General,
    Jump,
    ConditionalJump(Condition),
    Call,
    Return,
}

/// Immutable description of how to decode one opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub mnemonic: &'static str,
    /// Name used when the operand size is 16 bits (`cwd` for `cdq`)
    pub word_mnemonic: Option<&'static str>,
    pub class: Class,
    pub operands: Vec<OperandSpec>,
}

impl Descriptor {
    pub fn new(mnemonic: &'static str, class: Class, operands: &[OperandSpec]) -> Self {
        Self { mnemonic, word_mnemonic: None, class, operands: operands.to_vec() }
    }

    /// Give the instruction a distinct name under a 16-bit operand size.
    pub fn with_word_form(self, word_mnemonic: &'static str) -> Self {
        Self { word_mnemonic: Some(word_mnemonic), ..self }
    }

    /// Mnemonic for the effective operand size.
    pub fn mnemonic_for(&self, operand_width: Width) -> &'static str {
        match (operand_width, self.word_mnemonic) {
            (Width::Word, Some(word)) => word,
            _ => self.mnemonic,
        }
    }

    /// Operand-less general instruction.
    pub fn plain(mnemonic: &'static str) -> Self {
        Self::new(mnemonic, Class::General, &[])
    }

    /// General instruction with the given operands.
    pub fn general(mnemonic: &'static str, operands: &[OperandSpec]) -> Self {
        Self::new(mnemonic, Class::General, operands)
    }

    /// Whether decoding needs the mode byte.
    pub fn needs_modrm(&self) -> bool {
        self.operands.iter().any(|spec| spec.mode.uses_modrm())
    }

    /// Check the descriptor is well-formed for its class.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.mnemonic.is_empty() || self.word_mnemonic == Some("") {
            return Err("empty mnemonic");
        }
        if self.operands.len() > MAX_OPERANDS {
            return Err("too many operands");
        }
        if self.operands.iter().filter(|spec| spec.mode.uses_rm()).count() > 1 {
            return Err("more than one r/m operand");
        }
        for spec in &self.operands {
            match (spec.mode, spec.ty) {
                (AddrMode::I, _) => {}
                (_, OperandType::ByteSignExtended) => {
                    return Err("sign-extended byte type requires an immediate operand");
                }
                (AddrMode::Reg(n), _) if n > 7 => return Err("fixed register number out of range"),
                _ => {}
            }
        }
        match self.class {
            Class::Jump | Class::ConditionalJump(_) | Class::Call => {
                let [target] = self.operands.as_slice() else {
                    return Err("control transfer takes exactly one operand");
                };
                match target.mode {
                    AddrMode::J | AddrMode::E | AddrMode::M => {}
                    _ => return Err("control transfer operand must be relative or r/m"),
                }
            }
            Class::Return => match self.operands.as_slice() {
                [] => {}
                [spec] if spec.mode == AddrMode::I => {}
                _ => return Err("return takes no operand or one immediate"),
            },
            Class::General => {
                if self.operands.iter().any(|spec| spec.mode == AddrMode::J) {
                    return Err("relative operand on a non-branch instruction");
                }
            }
        }
        Ok(())
    }
}

/// Group of descriptors selected by the mode byte's reg field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    members: [Option<Descriptor>; 8],
}

impl Group {
    /// Descriptor for reg field `extension`, if registered.
    pub fn member(&self, extension: u8) -> Option<&Descriptor> {
        self.members.get(extension as usize).and_then(Option::as_ref)
    }
}

/// Dispatch table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Instruction(Descriptor),
    Group(Group),
}

/// Errors raised while building a table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// Two registrations for the same opcode key
    #[error("Duplicate registration for opcode {0}")]
    DuplicateOpcode(OpcodeKey),

    /// Descriptor failed validation
    #[error("Malformed descriptor '{mnemonic}' for opcode {key}: {reason}")]
    MalformedDescriptor {
        key: OpcodeKey,
        mnemonic: &'static str,
        reason: &'static str,
    },

    /// Group extension outside 0..=7
    #[error("Invalid group extension for opcode {0}")]
    InvalidExtension(OpcodeKey),

    /// Primary-map byte the decoder consumes as a prefix or escape
    #[error("Opcode {0} is a prefix or escape byte and can never be dispatched")]
    ReservedOpcode(OpcodeKey),
}

/// Read-only opcode dispatch table.
#[derive(Debug, Clone)]
pub struct DecoderTable {
    primary: Vec<Option<Entry>>,
    secondary: Vec<Option<Entry>>,
}

impl DecoderTable {
    /// Entry registered for `opcode` in `map`.
    pub fn dispatch(&self, map: OpcodeMap, opcode: u8) -> Option<&Entry> {
        let slots = match map {
            OpcodeMap::Primary => &self.primary,
            OpcodeMap::Secondary => &self.secondary,
        };
        slots[opcode as usize].as_ref()
    }

    /// Number of registered descriptors, counting group members.
    pub fn len(&self) -> usize {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .flatten()
            .map(|entry| match entry {
                Entry::Instruction(_) => 1,
                Entry::Group(group) => group.members.iter().flatten().count(),
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Primary bytes taken by the prefix scanner or the two-byte escape.
fn is_reserved(opcode: u8) -> bool {
    opcode == TWO_BYTE_ESCAPE || prefix::is_prefix(opcode)
}

/// Collects registrations and produces a [`DecoderTable`].
#[derive(Debug, Clone)]
pub struct TableBuilder {
    table: DecoderTable,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        Self {
            table: DecoderTable {
                primary: vec![None; 256],
                secondary: vec![None; 256],
            },
        }
    }

    /// Register `descriptor` under `key`.
    ///
    /// A key with an extension fills one slot of a group; a key without one
    /// claims the whole opcode.
    pub fn register(&mut self, key: OpcodeKey, descriptor: Descriptor) -> Result<&mut Self, TableError> {
        descriptor.validate().map_err(|reason| TableError::MalformedDescriptor {
            key,
            mnemonic: descriptor.mnemonic,
            reason,
        })?;

        if key.map == OpcodeMap::Primary && is_reserved(key.opcode) {
            return Err(TableError::ReservedOpcode(key));
        }

        let slots = match key.map {
            OpcodeMap::Primary => &mut self.table.primary,
            OpcodeMap::Secondary => &mut self.table.secondary,
        };
        let slot = &mut slots[key.opcode as usize];

        match key.extension {
            None => {
                if slot.is_some() {
                    return Err(TableError::DuplicateOpcode(key));
                }
                *slot = Some(Entry::Instruction(descriptor));
            }
            Some(ext) => {
                if ext > 7 {
                    return Err(TableError::InvalidExtension(key));
                }
                let entry = slot.get_or_insert_with(|| Entry::Group(Group::default()));
                let Entry::Group(group) = entry else {
                    return Err(TableError::DuplicateOpcode(key));
                };
                let member = &mut group.members[ext as usize];
                if member.is_some() {
                    return Err(TableError::DuplicateOpcode(key));
                }
                *member = Some(descriptor);
            }
        }
        Ok(self)
    }

    /// Finish building.
    pub fn build(self) -> DecoderTable {
        log::debug!("Built decoder table with {} descriptors", self.table.len());
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const JB: OperandSpec = OperandSpec::new(AddrMode::J, OperandType::Byte);
    const EV: OperandSpec = OperandSpec::new(AddrMode::E, OperandType::Variable);
    const GV: OperandSpec = OperandSpec::new(AddrMode::G, OperandType::Variable);
    const IB: OperandSpec = OperandSpec::new(AddrMode::I, OperandType::Byte);

    #[test]
    fn test_register_and_dispatch() {
        let mut builder = TableBuilder::new();
        builder
            .register(OpcodeKey::primary(0x90), Descriptor::plain("nop"))
            .unwrap()
            .register(OpcodeKey::primary(0xEB), Descriptor::new("jmp", Class::Jump, &[JB]))
            .unwrap();
        let table = builder.build();

        assert_eq!(table.len(), 2);
        assert!(matches!(
            table.dispatch(OpcodeMap::Primary, 0x90),
            Some(Entry::Instruction(d)) if d.mnemonic == "nop"
        ));
        assert!(table.dispatch(OpcodeMap::Primary, 0xFF).is_none());
        assert!(table.dispatch(OpcodeMap::Secondary, 0x90).is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut builder = TableBuilder::new();
        builder.register(OpcodeKey::primary(0x90), Descriptor::plain("nop")).unwrap();
        let err = builder.register(OpcodeKey::primary(0x90), Descriptor::plain("xchg")).unwrap_err();
        assert_eq!(err, TableError::DuplicateOpcode(OpcodeKey::primary(0x90)));
    }

    #[test]
    fn test_group_members() {
        let key = OpcodeKey::primary(0xFF);
        let mut builder = TableBuilder::new();
        builder
            .register(key.with_extension(0), Descriptor::general("inc", &[EV]))
            .unwrap()
            .register(key.with_extension(2), Descriptor::new("call", Class::Call, &[EV]))
            .unwrap();

        let err = builder
            .register(key.with_extension(2), Descriptor::new("call", Class::Call, &[EV]))
            .unwrap_err();
        assert_eq!(err, TableError::DuplicateOpcode(key.with_extension(2)));

        let err = builder.register(key, Descriptor::plain("bogus")).unwrap_err();
        assert_eq!(err, TableError::DuplicateOpcode(key));

        let table = builder.build();
        let Some(Entry::Group(group)) = table.dispatch(OpcodeMap::Primary, 0xFF) else {
            panic!("expected group entry");
        };
        assert_eq!(group.member(2).map(|d| d.mnemonic), Some("call"));
        assert!(group.member(1).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_group_over_instruction_rejected() {
        let mut builder = TableBuilder::new();
        builder.register(OpcodeKey::primary(0x80), Descriptor::plain("x")).unwrap();
        let err = builder
            .register(OpcodeKey::primary(0x80).with_extension(0), Descriptor::general("add", &[EV, IB]))
            .unwrap_err();
        assert!(matches!(err, TableError::DuplicateOpcode(_)));
    }

    #[test]
    fn test_invalid_extension() {
        let mut builder = TableBuilder::new();
        let key = OpcodeKey::primary(0xF7).with_extension(8);
        let err = builder.register(key, Descriptor::general("not", &[EV])).unwrap_err();
        assert_eq!(err, TableError::InvalidExtension(key));
    }

    #[rstest]
    #[case::jump_without_operand(Descriptor::new("jmp", Class::Jump, &[]))]
    #[case::jump_with_two(Descriptor::new("jmp", Class::Jump, &[JB, JB]))]
    #[case::jump_to_register_field(Descriptor::new("jmp", Class::Jump, &[GV]))]
    #[case::return_with_register(Descriptor::new("ret", Class::Return, &[GV]))]
    #[case::two_rm_operands(Descriptor::general("mov", &[EV, EV]))]
    #[case::relative_on_general(Descriptor::general("mov", &[JB]))]
    #[case::too_many(Descriptor::general("op", &[GV, EV, IB, IB]))]
    #[case::sign_extended_register(Descriptor::general(
        "op",
        &[OperandSpec::new(AddrMode::G, OperandType::ByteSignExtended)]
    ))]
    #[case::empty_mnemonic(Descriptor::plain(""))]
    #[case::empty_word_form(Descriptor::plain("cdq").with_word_form(""))]
    fn test_malformed_descriptors(#[case] descriptor: Descriptor) {
        let mut builder = TableBuilder::new();
        let err = builder.register(OpcodeKey::primary(0x01), descriptor).unwrap_err();
        assert!(matches!(err, TableError::MalformedDescriptor { .. }), "{err}");
    }

    #[rstest]
    #[case::escape(0x0F)]
    #[case::operand_size(0x66)]
    #[case::address_size(0x67)]
    #[case::segment_cs(0x2E)]
    #[case::segment_gs(0x65)]
    #[case::lock(0xF0)]
    #[case::repne(0xF2)]
    #[case::rep(0xF3)]
    fn test_prefix_and_escape_bytes_rejected(#[case] opcode: u8) {
        let mut builder = TableBuilder::new();
        let key = OpcodeKey::primary(opcode);
        let err = builder.register(key, Descriptor::plain("bogus")).unwrap_err();
        assert_eq!(err, TableError::ReservedOpcode(key));

        let err = builder.register(key.with_extension(0), Descriptor::plain("bogus")).unwrap_err();
        assert!(matches!(err, TableError::ReservedOpcode(_)));

        // the same byte is an ordinary opcode in the secondary map
        builder.register(OpcodeKey::secondary(opcode), Descriptor::plain("ok")).unwrap();
    }

    #[test]
    fn test_word_form_selection() {
        let d = Descriptor::plain("cwde").with_word_form("cbw");
        assert_eq!(d.mnemonic_for(Width::Dword), "cwde");
        assert_eq!(d.mnemonic_for(Width::Word), "cbw");
        assert_eq!(Descriptor::plain("nop").mnemonic_for(Width::Word), "nop");
    }

    #[test]
    fn test_key_display() {
        assert_eq!(OpcodeKey::primary(0x90).to_string(), "0x90");
        assert_eq!(OpcodeKey::secondary(0xaf).to_string(), "0x0f 0xaf");
        assert_eq!(OpcodeKey::primary(0xff).with_extension(3).to_string(), "0xff /3");
    }

    #[test]
    fn test_condition_from_nibble() {
        assert_eq!(Condition::from_nibble(0x4), Condition::Equal);
        assert_eq!(Condition::from_nibble(0x7F), Condition::Greater);
    }
}
