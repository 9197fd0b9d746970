//! Instruction Set Architecture (ISA) definitions.
//!
//! Defines the dispatch-table tier of the VM's instruction set. The
//! [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode definitions and invokes a callback macro for code generation, so
//! multiple modules (decoder, assembler, static checks) can generate
//! opcode-related code without duplicating the table.
//!
//! This module generates:
//! - The [`Opcode`] enum with opcode byte mappings
//! - `TryFrom<u8>` for decoding opcode bytes
//! - Mnemonic and operand-width metadata
//!
//! The two inline draw-command tiers (opcode bit 7 / bit 6 set) never reach
//! this table; they are decoded directly in the dispatcher. The table covers
//! the closed range `0x00..=0x1A` only — anything else is a fatal decode
//! fault.
//!
//! # Bytecode Format
//!
//! Operands follow the opcode byte with no padding:
//! - `Reg`: 1 byte (register index 0-255)
//! - `Byte`: 1 byte (raw unsigned value)
//! - `Word`: 2 bytes (big-endian unsigned, matching the resource format)
//! - `Imm`: 2 bytes (big-endian, interpreted as signed 16-bit)
//! - `Addr`: 2 bytes (big-endian code offset)
//!
//! `CJMP` is the one table instruction with a mode-dependent tail; its
//! operand list here covers only the fixed prefix and the handler fetches
//! the rest.

use crate::vm::errors::VmError;

/// Operand encoding classes used by the ISA table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperandKind {
    /// Register index, one byte.
    Reg,
    /// Raw unsigned byte.
    Byte,
    /// Unsigned 16-bit value, big-endian.
    Word,
    /// Signed 16-bit immediate, big-endian.
    Imm,
    /// 16-bit code offset, big-endian.
    Addr,
}

impl OperandKind {
    /// Encoded width in bytes.
    pub const fn width(&self) -> usize {
        match self {
            OperandKind::Reg | OperandKind::Byte => 1,
            OperandKind::Word | OperandKind::Imm | OperandKind::Addr => 2,
        }
    }
}

/// Invokes a callback macro with the complete opcode definition list.
///
/// This macro enables code generation for opcodes in multiple modules
/// without duplicating the definitions.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Register file
            // =========================
            /// SETI rd, imm ; rd = imm
            MovConst = 0x00, "SETI" => [rd: Reg, imm: Imm],
            /// MOV rd, rs ; rd = rs
            Mov = 0x01, "MOV" => [rd: Reg, rs: Reg],
            /// ADD rd, rs ; rd += rs
            Add = 0x02, "ADD" => [rd: Reg, rs: Reg],
            /// ADDI rd, imm ; rd += imm
            AddConst = 0x03, "ADDI" => [rd: Reg, imm: Imm],
            // =========================
            // Control flow
            // =========================
            /// CALL addr ; push return offset, jump to addr
            Call = 0x04, "CALL" => [addr: Addr],
            /// RET ; pop return offset, jump back
            Ret = 0x05, "RET" => [],
            /// YIELD ; end this channel's turn, resume here next time
            Yield = 0x06, "YIELD" => [],
            /// JMP addr ; unconditional jump
            Jmp = 0x07, "JMP" => [addr: Addr],
            /// SPAWN ch, addr ; schedule channel ch at addr from next frame
            Spawn = 0x08, "SPAWN" => [ch: Byte, addr: Addr],
            /// DJNZ rd, addr ; decrement rd, jump if nonzero
            Djnz = 0x09, "DJNZ" => [rd: Reg, addr: Addr],
            /// CJMP op, ... ; conditional jump, mode-dependent tail
            CondJmp = 0x0A, "CJMP" => [],
            // =========================
            // Video
            // =========================
            /// PAL num ; select palette (high byte of num)
            SetPalette = 0x0B, "PAL" => [num: Word],
            /// CHST first, last, mode ; bulk pause/resume/kill channel range
            ChannelCtl = 0x0C, "CHST" => [first: Byte, last: Byte, mode: Byte],
            /// PAGE p ; select working page
            SelectPage = 0x0D, "PAGE" => [page: Byte],
            /// FILL p, color ; clear page to color
            FillPage = 0x0E, "FILL" => [page: Byte, color: Byte],
            /// COPY src, dst ; copy page with current vertical scroll
            CopyPage = 0x0F, "COPY" => [src: Byte, dst: Byte],
            /// FLIP p ; pace the frame and present page p
            Blit = 0x10, "FLIP" => [page: Byte],
            /// HALT ; stop this channel until rescheduled
            Halt = 0x11, "HALT" => [],
            /// TEXT id, x, y, color ; draw string resource
            DrawString = 0x12, "TEXT" => [id: Word, x: Byte, y: Byte, color: Byte],
            // =========================
            // Register file (second bank)
            // =========================
            /// SUB rd, rs ; rd -= rs
            Sub = 0x13, "SUB" => [rd: Reg, rs: Reg],
            /// ANDI rd, imm ; rd &= imm (unsigned)
            AndConst = 0x14, "ANDI" => [rd: Reg, imm: Word],
            /// ORI rd, imm ; rd |= imm
            OrConst = 0x15, "ORI" => [rd: Reg, imm: Word],
            /// SHLI rd, count ; logical shift left
            ShlConst = 0x16, "SHLI" => [rd: Reg, imm: Word],
            /// SHRI rd, count ; logical shift right
            ShrConst = 0x17, "SHRI" => [rd: Reg, imm: Word],
            // =========================
            // Audio / resources
            // =========================
            /// SND res, freq, vol, ch ; play sound effect
            PlaySound = 0x18, "SND" => [res: Word, freq: Byte, vol: Byte, ch: Byte],
            /// LOAD res ; request resource load (0 flushes everything)
            LoadResource = 0x19, "LOAD" => [res: Word],
            /// MUS res, delay, pos ; start music module
            PlayMusic = 0x1A, "MUS" => [res: Word, delay: Word, pos: Byte],
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        /// Dispatch-table instruction selectors (tier three of the decoder).
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VmError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Opcode::$name), )*
                    _ => Err(VmError::IllegalOpcode {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl Opcode {
            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the fixed operand bytes following the opcode byte.
            ///
            /// `CJMP` reports only its fixed prefix; the actual tail length
            /// depends on the comparison byte's addressing-mode bits.
            pub const fn operand_len(&self) -> usize {
                match self {
                    $( Opcode::$name => 0 $( + define_opcodes!(@width $field $kind) )*, )*
                }
            }

            /// Operand encoding classes for this instruction, in order.
            pub fn operand_kinds(&self) -> &'static [OperandKind] {
                match self {
                    $( Opcode::$name => &[ $( OperandKind::$kind ),* ], )*
                }
            }
        }
    };

    (@width $field:ident Reg) => { 1 };
    (@width $field:ident Byte) => { 1 };
    (@width $field:ident Word) => { 2 };
    (@width $field:ident Imm) => { 2 };
    (@width $field:ident Addr) => { 2 };
}

for_each_opcode!(define_opcodes);

/// Highest valid dispatch-table opcode byte.
pub const OPCODE_MAX: u8 = 0x1A;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_try_from_invalid() {
        for value in (OPCODE_MAX + 1)..=0x3F {
            assert!(matches!(
                Opcode::try_from(value),
                Err(VmError::IllegalOpcode { opcode, .. }) if opcode == value
            ));
        }
    }

    #[test]
    fn opcode_try_from_valid_range() {
        for value in 0..=OPCODE_MAX {
            let op = Opcode::try_from(value).unwrap();
            assert_eq!(op as u8, value);
        }
    }

    #[test]
    fn mnemonic_spot_checks() {
        assert_eq!(Opcode::MovConst.mnemonic(), "SETI");
        assert_eq!(Opcode::CondJmp.mnemonic(), "CJMP");
        assert_eq!(Opcode::Blit.mnemonic(), "FLIP");
        assert_eq!(Opcode::PlayMusic.mnemonic(), "MUS");
    }

    #[test]
    fn operand_lengths() {
        assert_eq!(Opcode::MovConst.operand_len(), 3);
        assert_eq!(Opcode::Mov.operand_len(), 2);
        assert_eq!(Opcode::Call.operand_len(), 2);
        assert_eq!(Opcode::Ret.operand_len(), 0);
        assert_eq!(Opcode::Spawn.operand_len(), 3);
        assert_eq!(Opcode::ChannelCtl.operand_len(), 3);
        assert_eq!(Opcode::DrawString.operand_len(), 5);
        assert_eq!(Opcode::PlaySound.operand_len(), 5);
        assert_eq!(Opcode::PlayMusic.operand_len(), 5);
        // CJMP reports only the fixed prefix (nothing).
        assert_eq!(Opcode::CondJmp.operand_len(), 0);
    }

    #[test]
    fn operand_kind_widths() {
        assert_eq!(OperandKind::Reg.width(), 1);
        assert_eq!(OperandKind::Byte.width(), 1);
        assert_eq!(OperandKind::Word.width(), 2);
        assert_eq!(OperandKind::Imm.width(), 2);
        assert_eq!(OperandKind::Addr.width(), 2);
    }
}
