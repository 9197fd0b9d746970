#[cfg(test)]
mod tests {
    use crate::vm::isa::{Opcode, OperandKind, OPCODE_MAX};

    macro_rules! collect_isa {
        (
            $(
                $(#[$doc:meta])*
                $name:ident = $opcode:expr, $mnemonic:literal => [
                    $( $field:ident : $kind:ident ),* $(,)?
                ]
            ),* $(,)?
        ) => {
            vec![ $( ($opcode as u8, $mnemonic) ),* ]
        };
    }

    fn isa_table() -> Vec<(u8, &'static str)> {
        crate::for_each_opcode!(collect_isa)
    }

    /// The dispatch table is the binary contract with every compiled
    /// program in the wild: exactly 27 opcodes, contiguous from 0x00, and
    /// the table never grows into the inline-draw bit space.
    #[test]
    fn table_is_closed_and_contiguous() {
        let table = isa_table();
        assert_eq!(table.len(), usize::from(OPCODE_MAX) + 1);
        for (expected, (opcode, _)) in table.iter().enumerate() {
            assert_eq!(usize::from(*opcode), expected);
        }
        assert!(OPCODE_MAX < 0x40);
    }

    #[test]
    fn mnemonics_are_unique() {
        let table = isa_table();
        for (i, (_, a)) in table.iter().enumerate() {
            for (_, b) in &table[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn mnemonics_match_generated_enum() {
        for (opcode, mnemonic) in isa_table() {
            let decoded = Opcode::try_from(opcode).unwrap();
            assert_eq!(decoded.mnemonic(), mnemonic);
        }
    }

    #[test]
    fn operand_widths_match_kind_metadata() {
        for (opcode, _) in isa_table() {
            let decoded = Opcode::try_from(opcode).unwrap();
            let total: usize = decoded.operand_kinds().iter().map(OperandKind::width).sum();
            assert_eq!(decoded.operand_len(), total);
        }
    }
}
