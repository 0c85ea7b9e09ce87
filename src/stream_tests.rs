#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use crate::decoder::table::{AddrMode, Class, OperandSpec, OperandType};
    use crate::driver::{decode_all, instruction_boundaries, sweep};
    use crate::instruction::{Destination, Flow, Shape};
    use crate::{
        DecodeError, Decoder, DecoderConfig, Descriptor, OpcodeKey, Operand, TableBuilder, Width, X86Decoder,
    };

    /// Decoder over a table holding only `nop` (0x90) and a short `jmp` (0xEB).
    fn minimal() -> X86Decoder {
        let mut builder = TableBuilder::new();
        builder
            .register(OpcodeKey::primary(0x90), Descriptor::plain("nop"))
            .unwrap()
            .register(
                OpcodeKey::primary(0xEB),
                Descriptor::new("jmp", Class::Jump, &[OperandSpec::new(AddrMode::J, OperandType::Byte)]),
            )
            .unwrap();
        X86Decoder::with_table(Arc::new(builder.build()), DecoderConfig::default())
    }

    fn builtin() -> X86Decoder {
        X86Decoder::new().unwrap()
    }

    #[test]
    fn test_nops_then_jump() {
        let decoder = minimal();
        let image = [0x90, 0x90, 0xEB, 0x02];
        let mut iter = decode_all(&decoder, &image, 0, None);

        let insns: Vec<_> = iter.by_ref().map(Result::unwrap).collect();
        assert_eq!(insns.len(), 3);
        assert_eq!(iter.offset(), 4);

        let layout: Vec<_> = insns.iter().map(|i| (i.mnemonic(), i.offset(), i.size())).collect();
        assert_eq!(layout, [("nop", 0, 1), ("nop", 1, 1), ("jmp", 2, 2)]);
        assert_eq!(
            insns[2].shape(),
            &Shape::ControlTransfer {
                flow: Flow::Jump,
                destination: Some(Destination::Relative { displacement: 2, target: None }),
            }
        );
    }

    #[test]
    fn test_jump_missing_displacement() {
        let decoder = minimal();
        let results: Vec<_> = decode_all(&decoder, &[0xEB], 0, None).collect();
        assert_eq!(results, vec![Err(DecodeError::TruncatedInstruction { offset: 0, available: 1 })]);
    }

    #[test]
    fn test_unregistered_opcode() {
        let decoder = minimal();
        let err = decoder.decode(&[0xFF], 0, None).unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedOpcode { offset: 0, key: OpcodeKey::primary(0xFF) });
    }

    #[test]
    fn test_override_before_jump() {
        let decoder = minimal();
        let plain = decoder.decode(&[0xEB, 0x02], 0, None).unwrap();
        let prefixed = decoder.decode(&[0x66, 0xEB, 0x02], 0, None).unwrap();

        assert_eq!(prefixed.mnemonic(), plain.mnemonic());
        assert_eq!(prefixed.operands(), plain.operands());
        assert!(prefixed.prefixes().operand_size_override);
        assert!(!plain.prefixes().operand_size_override);
        assert_eq!(prefixed.size(), 3);
    }

    #[rstest]
    #[case::prologue(&[0x55, 0x89, 0xE5, 0x83, 0xEC, 0x18, 0xC7, 0x04, 0x24, 0x01, 0x00, 0x00, 0x00])]
    #[case::prefixed(&[0x66, 0x05, 0x34, 0x12, 0xF3, 0xA5, 0x64, 0xA1, 0x30, 0x00, 0x00, 0x00])]
    #[case::branches(&[0x74, 0x02, 0x0F, 0x85, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xE0, 0xC3])]
    fn test_deterministic(#[case] image: &[u8]) {
        let decoder = builtin();
        let first = sweep(&decoder, image, 0, Some(0x1000));
        let second = sweep(&decoder, image, 0, Some(0x1000));
        assert_eq!(first, second);
        assert!(first.is_complete());
    }

    #[rstest]
    #[case::prologue(&[0x55, 0x89, 0xE5, 0x83, 0xEC, 0x18, 0xC7, 0x04, 0x24, 0x01, 0x00, 0x00, 0x00], 4)]
    #[case::prefixed(&[0x66, 0x05, 0x34, 0x12, 0xF3, 0xA5, 0x64, 0xA1, 0x30, 0x00, 0x00, 0x00], 3)]
    #[case::branches(&[0x74, 0x02, 0x0F, 0x85, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xE0, 0xC3], 4)]
    fn test_lengths_cover_buffer(#[case] image: &[u8], #[case] count: usize) {
        let decoder = builtin();
        let result = sweep(&decoder, image, 0, None);

        assert_eq!(result.instructions.len(), count);
        assert_eq!(result.end_offset, image.len());

        let mut expected_offset = 0;
        for insn in &result.instructions {
            assert_eq!(insn.offset(), expected_offset, "gap or overlap before {}", insn);
            assert_eq!(insn.bytes(), &image[insn.offset()..insn.next_offset()]);
            expected_offset = insn.next_offset();
        }
        assert_eq!(expected_offset, image.len());
    }

    #[test]
    fn test_boundaries_match_single_decodes() {
        let decoder = builtin();
        let image = [0x8D, 0x4C, 0x24, 0x04, 0x83, 0xE4, 0xF0, 0xFF, 0x71, 0xFC, 0x51, 0x31, 0xC0];
        let boundaries = instruction_boundaries(&decoder, &image, 0).unwrap();
        assert_eq!(boundaries, vec![0, 4, 7, 10, 11]);
        for window in boundaries.windows(2) {
            assert_eq!(decoder.length_at(&image, window[0]).unwrap(), window[1] - window[0]);
        }
    }

    #[test]
    fn test_override_changes_only_width() {
        let decoder = builtin();
        let dword = decoder.decode(&[0x81, 0xC3, 0x34, 0x12, 0x00, 0x00], 0, None).unwrap();
        let word = decoder.decode(&[0x66, 0x81, 0xC3, 0x34, 0x12], 0, None).unwrap();

        assert_eq!(dword.mnemonic(), word.mnemonic());
        for (a, b) in dword.operands().iter().zip(word.operands()) {
            assert_eq!(std::mem::discriminant(a), std::mem::discriminant(b));
            assert_eq!(a.width(), Width::Dword);
            assert_eq!(b.width(), Width::Word);
        }
    }

    #[test]
    fn test_register_only_operand_rejects_memory() {
        let mut builder = TableBuilder::new();
        builder
            .register(
                OpcodeKey::secondary(0x20),
                Descriptor::general(
                    "movr",
                    &[
                        OperandSpec::new(AddrMode::R, OperandType::Dword),
                        OperandSpec::new(AddrMode::G, OperandType::Dword),
                    ],
                ),
            )
            .unwrap();
        let decoder = X86Decoder::with_table(Arc::new(builder.build()), DecoderConfig::default());

        // mod=10 would be followed by a disp32 that is not present
        let err = decoder.decode(&[0x0F, 0x20, 0x80], 0, None).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidOperandEncoding { offset: 0, .. }), "{err}");

        let insn = decoder.decode(&[0x0F, 0x20, 0xC8], 0, None).unwrap();
        assert_eq!(insn.operands()[0], Operand::Register(crate::Register::general(0, Width::Dword)));
        assert_eq!(insn.to_string(), "movr eax, ecx");
    }

    #[rstest]
    #[case::immediate(&[0x66, 0x68])]
    #[case::displacement(&[0x8B, 0x45])]
    #[case::sib_displacement(&[0x8B, 0x04, 0x25, 0x00])]
    #[case::relative(&[0xE8, 0x00, 0x00])]
    #[case::moffs(&[0xA1, 0x00])]
    fn test_truncation_is_reported(#[case] image: &[u8]) {
        let decoder = builtin();
        let err = decoder.decode(image, 0, None).unwrap_err();
        assert_eq!(err, DecodeError::TruncatedInstruction { offset: 0, available: image.len() });
    }

    #[test]
    fn test_decoder_shared_across_threads() {
        let decoder = Arc::new(builtin());
        let image: Arc<[u8]> = Arc::from(&[0x55, 0x89, 0xE5, 0x5D, 0xC3][..]);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let decoder = Arc::clone(&decoder);
                let image = Arc::clone(&image);
                std::thread::spawn(move || sweep(decoder.as_ref(), &image, 0, None).instructions.len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4);
        }
    }
}
