//! Built-in IA-32 opcode table.
//!
//! Covers the integer instructions compilers emit for 32-bit code: the ALU
//! block, moves, stack operations, shifts, multiply/divide, string moves and
//! every branch form. The table is built once and shared.

use std::sync::{Arc, OnceLock};

use super::table::{
    AddrMode, Class, Condition, DecoderTable, Descriptor, OpcodeKey, OperandSpec, OperandType, TableBuilder,
    TableError,
};

const EB: OperandSpec = OperandSpec::new(AddrMode::E, OperandType::Byte);
const EW: OperandSpec = OperandSpec::new(AddrMode::E, OperandType::Word);
const EV: OperandSpec = OperandSpec::new(AddrMode::E, OperandType::Variable);
const GB: OperandSpec = OperandSpec::new(AddrMode::G, OperandType::Byte);
const GV: OperandSpec = OperandSpec::new(AddrMode::G, OperandType::Variable);
const MV: OperandSpec = OperandSpec::new(AddrMode::M, OperandType::Variable);
const IB: OperandSpec = OperandSpec::new(AddrMode::I, OperandType::Byte);
const IW: OperandSpec = OperandSpec::new(AddrMode::I, OperandType::Word);
const IV: OperandSpec = OperandSpec::new(AddrMode::I, OperandType::Variable);
const IBS: OperandSpec = OperandSpec::new(AddrMode::I, OperandType::ByteSignExtended);
const JB: OperandSpec = OperandSpec::new(AddrMode::J, OperandType::Byte);
const JV: OperandSpec = OperandSpec::new(AddrMode::J, OperandType::Variable);
const ZB: OperandSpec = OperandSpec::new(AddrMode::OpReg, OperandType::Byte);
const ZV: OperandSpec = OperandSpec::new(AddrMode::OpReg, OperandType::Variable);
const OB: OperandSpec = OperandSpec::new(AddrMode::Offset, OperandType::Byte);
const OV: OperandSpec = OperandSpec::new(AddrMode::Offset, OperandType::Variable);
const ONE: OperandSpec = OperandSpec::new(AddrMode::One, OperandType::Byte);
const AL: OperandSpec = OperandSpec::new(AddrMode::Reg(0), OperandType::Byte);
const CL: OperandSpec = OperandSpec::new(AddrMode::Reg(1), OperandType::Byte);
const EAX: OperandSpec = OperandSpec::new(AddrMode::Reg(0), OperandType::Variable);

/// Mnemonics of the eight ALU operations, in opcode order.
const ARITHMETIC: [&str; 8] = ["add", "or", "adc", "sbb", "and", "sub", "xor", "cmp"];

/// Shift/rotate group; /6 is left unassigned.
const SHIFTS: [Option<&str>; 8] = [
    Some("rol"),
    Some("ror"),
    Some("rcl"),
    Some("rcr"),
    Some("shl"),
    Some("shr"),
    None,
    Some("sar"),
];

/// Unary group 3, /1 unassigned; /0 is `test` and takes an immediate.
const UNARY: [(u8, &str); 6] = [(2, "not"), (3, "neg"), (4, "mul"), (5, "imul"), (6, "div"), (7, "idiv")];

const JCC: [&str; 16] = [
    "jo", "jno", "jb", "jae", "je", "jne", "jbe", "ja", "js", "jns", "jp", "jnp", "jl", "jge", "jle", "jg",
];
const SETCC: [&str; 16] = [
    "seto", "setno", "setb", "setae", "sete", "setne", "setbe", "seta", "sets", "setns", "setp", "setnp", "setl",
    "setge", "setle", "setg",
];
const CMOVCC: [&str; 16] = [
    "cmovo", "cmovno", "cmovb", "cmovae", "cmove", "cmovne", "cmovbe", "cmova", "cmovs", "cmovns", "cmovp",
    "cmovnp", "cmovl", "cmovge", "cmovle", "cmovg",
];

/// Operand-less one-byte instructions.
const PLAIN: [(u8, &str); 14] = [
    (0x90, "nop"),
    (0xA4, "movsb"),
    (0xA6, "cmpsb"),
    (0xAA, "stosb"),
    (0xAC, "lodsb"),
    (0xAE, "scasb"),
    (0xC9, "leave"),
    (0xCC, "int3"),
    (0xF4, "hlt"),
    (0xF5, "cmc"),
    (0xF8, "clc"),
    (0xF9, "stc"),
    (0xFC, "cld"),
    (0xFD, "std"),
];

/// Operand-less instructions named after the operand size: 32-bit and 16-bit names.
const SIZED: [(u8, &str, &str); 7] = [
    (0x98, "cwde", "cbw"),
    (0x99, "cdq", "cwd"),
    (0x9C, "pushfd", "pushf"),
    (0x9D, "popfd", "popf"),
    (0xA5, "movsd", "movsw"),
    (0xAB, "stosd", "stosw"),
    (0xAD, "lodsd", "lodsw"),
];

static TABLE: OnceLock<Result<Arc<DecoderTable>, TableError>> = OnceLock::new();

/// Shared built-in table, built on first use.
pub fn table() -> Result<Arc<DecoderTable>, TableError> {
    TABLE.get_or_init(|| build().map(Arc::new)).clone()
}

/// Build a fresh copy of the built-in table.
pub fn build() -> Result<DecoderTable, TableError> {
    let mut builder = TableBuilder::new();
    register_primary(&mut builder)?;
    register_secondary(&mut builder)?;
    Ok(builder.build())
}

fn primary(opcode: u8) -> OpcodeKey {
    OpcodeKey::primary(opcode)
}

fn secondary(opcode: u8) -> OpcodeKey {
    OpcodeKey::secondary(opcode)
}

fn general(mnemonic: &'static str, operands: &[OperandSpec]) -> Descriptor {
    Descriptor::general(mnemonic, operands)
}

fn register_primary(b: &mut TableBuilder) -> Result<(), TableError> {
    for (op, &name) in (0u8..).zip(ARITHMETIC.iter()) {
        let base = op << 3;
        b.register(primary(base), general(name, &[EB, GB]))?
            .register(primary(base + 1), general(name, &[EV, GV]))?
            .register(primary(base + 2), general(name, &[GB, EB]))?
            .register(primary(base + 3), general(name, &[GV, EV]))?
            .register(primary(base + 4), general(name, &[AL, IB]))?
            .register(primary(base + 5), general(name, &[EAX, IV]))?
            .register(primary(0x80).with_extension(op), general(name, &[EB, IB]))?
            .register(primary(0x81).with_extension(op), general(name, &[EV, IV]))?
            .register(primary(0x83).with_extension(op), general(name, &[EV, IBS]))?;
    }

    for reg in 0u8..8 {
        b.register(primary(0x40 + reg), general("inc", &[ZV]))?
            .register(primary(0x48 + reg), general("dec", &[ZV]))?
            .register(primary(0x50 + reg), general("push", &[ZV]))?
            .register(primary(0x58 + reg), general("pop", &[ZV]))?
            .register(primary(0xB0 + reg), general("mov", &[ZB, IB]))?
            .register(primary(0xB8 + reg), general("mov", &[ZV, IV]))?;
        if reg != 0 {
            b.register(primary(0x90 + reg), general("xchg", &[EAX, ZV]))?;
        }
    }

    for (cc, &name) in (0u8..).zip(JCC.iter()) {
        let class = Class::ConditionalJump(Condition::from_nibble(cc));
        b.register(primary(0x70 + cc), Descriptor::new(name, class, &[JB]))?;
    }

    for (opcode, name) in PLAIN {
        b.register(primary(opcode), Descriptor::plain(name))?;
    }
    for (opcode, name, word) in SIZED {
        b.register(primary(opcode), Descriptor::plain(name).with_word_form(word))?;
    }

    b.register(primary(0x68), general("push", &[IV]))?
        .register(primary(0x69), general("imul", &[GV, EV, IV]))?
        .register(primary(0x6A), general("push", &[IBS]))?
        .register(primary(0x6B), general("imul", &[GV, EV, IBS]))?
        .register(primary(0x84), general("test", &[EB, GB]))?
        .register(primary(0x85), general("test", &[EV, GV]))?
        .register(primary(0x86), general("xchg", &[EB, GB]))?
        .register(primary(0x87), general("xchg", &[EV, GV]))?
        .register(primary(0x88), general("mov", &[EB, GB]))?
        .register(primary(0x89), general("mov", &[EV, GV]))?
        .register(primary(0x8A), general("mov", &[GB, EB]))?
        .register(primary(0x8B), general("mov", &[GV, EV]))?
        .register(primary(0x8D), general("lea", &[GV, MV]))?
        .register(primary(0x8F).with_extension(0), general("pop", &[EV]))?
        .register(primary(0xA0), general("mov", &[AL, OB]))?
        .register(primary(0xA1), general("mov", &[EAX, OV]))?
        .register(primary(0xA2), general("mov", &[OB, AL]))?
        .register(primary(0xA3), general("mov", &[OV, EAX]))?
        .register(primary(0xA8), general("test", &[AL, IB]))?
        .register(primary(0xA9), general("test", &[EAX, IV]))?
        .register(primary(0xC2), Descriptor::new("ret", Class::Return, &[IW]))?
        .register(primary(0xC3), Descriptor::new("ret", Class::Return, &[]))?
        .register(primary(0xC6).with_extension(0), general("mov", &[EB, IB]))?
        .register(primary(0xC7).with_extension(0), general("mov", &[EV, IV]))?
        .register(primary(0xCD), general("int", &[IB]))?
        .register(primary(0xE8), Descriptor::new("call", Class::Call, &[JV]))?
        .register(primary(0xE9), Descriptor::new("jmp", Class::Jump, &[JV]))?
        .register(primary(0xEB), Descriptor::new("jmp", Class::Jump, &[JB]))?;

    for (ext, name) in (0u8..).zip(SHIFTS) {
        let Some(name) = name else { continue };
        b.register(primary(0xC0).with_extension(ext), general(name, &[EB, IB]))?
            .register(primary(0xC1).with_extension(ext), general(name, &[EV, IB]))?
            .register(primary(0xD0).with_extension(ext), general(name, &[EB, ONE]))?
            .register(primary(0xD1).with_extension(ext), general(name, &[EV, ONE]))?
            .register(primary(0xD2).with_extension(ext), general(name, &[EB, CL]))?
            .register(primary(0xD3).with_extension(ext), general(name, &[EV, CL]))?;
    }

    b.register(primary(0xF6).with_extension(0), general("test", &[EB, IB]))?
        .register(primary(0xF7).with_extension(0), general("test", &[EV, IV]))?;
    for (ext, name) in UNARY {
        b.register(primary(0xF6).with_extension(ext), general(name, &[EB]))?
            .register(primary(0xF7).with_extension(ext), general(name, &[EV]))?;
    }

    b.register(primary(0xFE).with_extension(0), general("inc", &[EB]))?
        .register(primary(0xFE).with_extension(1), general("dec", &[EB]))?
        .register(primary(0xFF).with_extension(0), general("inc", &[EV]))?
        .register(primary(0xFF).with_extension(1), general("dec", &[EV]))?
        .register(primary(0xFF).with_extension(2), Descriptor::new("call", Class::Call, &[EV]))?
        .register(primary(0xFF).with_extension(4), Descriptor::new("jmp", Class::Jump, &[EV]))?
        .register(primary(0xFF).with_extension(6), general("push", &[EV]))?;

    Ok(())
}

fn register_secondary(b: &mut TableBuilder) -> Result<(), TableError> {
    b.register(secondary(0x0B), Descriptor::plain("ud2"))?
        .register(secondary(0x1F).with_extension(0), general("nop", &[EV]))?
        .register(secondary(0x31), Descriptor::plain("rdtsc"))?
        .register(secondary(0xA2), Descriptor::plain("cpuid"))?
        .register(secondary(0xAF), general("imul", &[GV, EV]))?
        .register(secondary(0xB6), general("movzx", &[GV, EB]))?
        .register(secondary(0xB7), general("movzx", &[GV, EW]))?
        .register(secondary(0xBE), general("movsx", &[GV, EB]))?
        .register(secondary(0xBF), general("movsx", &[GV, EW]))?;

    for cc in 0u8..16 {
        let class = Class::ConditionalJump(Condition::from_nibble(cc));
        let i = cc as usize;
        b.register(secondary(0x40 + cc), general(CMOVCC[i], &[GV, EV]))?
            .register(secondary(0x80 + cc), Descriptor::new(JCC[i], class, &[JV]))?
            .register(secondary(0x90 + cc), general(SETCC[i], &[EB]))?;
    }

    Ok(())
}
