//! Register file and reserved register indices.

/// Number of registers in the file.
pub const REGISTER_COUNT: usize = 256;

/// Reserved register indices.
///
/// The index-to-meaning mapping is otherwise program-defined; these slots
/// are the contract between the scripts and the engine. The input mailbox
/// registers are written by [`Vm::update_input`](super::Vm::update_input)
/// before a frame, `MUSIC_SYNC` by the music player, and the rest are read
/// by the VM itself.
pub mod reg {
    /// Pseudo-random seed, seeded from the clock at startup.
    pub const RANDOM_SEED: u8 = 0x3C;
    /// Last character typed (code-entry screens poll this).
    pub const LAST_KEYCHAR: u8 = 0xDA;
    /// Up/down direction mailbox (-1 up, 0 neutral, 1 down).
    pub const HERO_POS_UP_DOWN: u8 = 0xE5;
    /// Music row-mark mailbox written by the music player.
    pub const MUSIC_SYNC: u8 = 0xF4;
    /// Cleared to zero by every display flip.
    pub const FLIP_SCRATCH: u8 = 0xF7;
    /// Vertical scroll applied by the page-copy command.
    pub const SCROLL_Y: u8 = 0xF9;
    /// Action button state (0 or 1).
    pub const HERO_ACTION: u8 = 0xFA;
    /// Jump/down mailbox, mirrors up/down except while jumping.
    pub const HERO_POS_JUMP_DOWN: u8 = 0xFB;
    /// Left/right direction mailbox (-1 left, 0 neutral, 1 right).
    pub const HERO_POS_LEFT_RIGHT: u8 = 0xFC;
    /// Direction bitmask (1 right, 2 left, 4 down, 8 up).
    pub const HERO_POS_MASK: u8 = 0xFD;
    /// Direction bitmask with bit 7 set while the action button is held.
    pub const HERO_ACTION_POS_MASK: u8 = 0xFE;
    /// Frame pacing: display flips wait `PAUSE_SLICES * 20` ms.
    pub const PAUSE_SLICES: u8 = 0xFF;
}

/// Register file holding the VM's 256 signed 16-bit variables.
///
/// An 8-bit index always lands inside the file, so access is infallible;
/// arithmetic on register values is defined to wrap.
#[derive(Clone)]
pub struct Registers {
    regs: [i16; REGISTER_COUNT],
}

impl Registers {
    /// Creates a zeroed register file.
    pub fn new() -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
        }
    }

    /// Returns the value in register `idx`.
    pub fn get(&self, idx: u8) -> i16 {
        self.regs[idx as usize]
    }

    /// Stores a value into register `idx`.
    pub fn set(&mut self, idx: u8, v: i16) {
        self.regs[idx as usize] = v;
    }

    /// Full contents, for serialization.
    pub fn as_array(&self) -> &[i16; REGISTER_COUNT] {
        &self.regs
    }

    /// Replaces the full contents, for restoration.
    pub fn restore(&mut self, values: [i16; REGISTER_COUNT]) {
        self.regs = values;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let regs = Registers::new();
        for idx in 0..=255u8 {
            assert_eq!(regs.get(idx), 0);
        }
    }

    #[test]
    fn set_get_roundtrip() {
        let mut regs = Registers::new();
        regs.set(0, -1);
        regs.set(255, i16::MAX);
        assert_eq!(regs.get(0), -1);
        assert_eq!(regs.get(255), i16::MAX);
        assert_eq!(regs.get(1), 0);
    }

    #[test]
    fn reserved_indices_are_distinct() {
        let all = [
            reg::RANDOM_SEED,
            reg::LAST_KEYCHAR,
            reg::HERO_POS_UP_DOWN,
            reg::MUSIC_SYNC,
            reg::FLIP_SCRATCH,
            reg::SCROLL_Y,
            reg::HERO_ACTION,
            reg::HERO_POS_JUMP_DOWN,
            reg::HERO_POS_LEFT_RIGHT,
            reg::HERO_POS_MASK,
            reg::HERO_ACTION_POS_MASK,
            reg::PAUSE_SLICES,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
