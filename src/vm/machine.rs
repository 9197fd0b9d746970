//! Core virtual machine implementation.
//!
//! Drives one logical game tick at a time: commit pending channel state,
//! then run every unpaused channel once in ascending index order. Within a
//! turn the dispatcher fetches one opcode byte, resolves the two inline
//! draw-command tiers, and otherwise executes a dispatch-table instruction,
//! until the channel halts or yields. All register arithmetic wraps.

use crate::trace;
use crate::types::bytes::Bytes;
use crate::vm::errors::VmError;
use crate::vm::host::{Host, PlayerInput, ShapeBank, DEFAULT_ZOOM};
use crate::vm::isa::Opcode;
use crate::vm::operand::{cond_rhs_mode, AddrMode};
use crate::vm::program::CodeStore;
use crate::warn;

pub mod channels;
pub mod registers;

use channels::{ChannelTable, Pending, Resume, CHANNEL_COUNT, OFFSET_IDLE};
use registers::{reg, Registers};

/// Per-turn call stack capacity; a 257th nested call is a fatal fault.
pub const CALL_STACK_DEPTH: usize = 256;

/// Milliseconds per pause slice when pacing display flips.
const SLICE_MS: i32 = 20;

/// Cursor value the halt opcode parks a channel at. Matches the idle
/// sentinel so a halted channel persists as unscheduled.
const HALT_CURSOR: usize = OFFSET_IDLE as usize;

/// How a frame ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameOutcome {
    /// Every scheduled channel took its turn.
    Completed,
    /// The quit signal interrupted the frame; remaining channels did not
    /// run and no cleanup was performed.
    Quit,
}

macro_rules! exec_op {
    // Entry point
    (
        vm = $vm:ident,
        host = $host:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident $args:tt ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Opcode::$variant => exec_op!(@call $vm, $host, $handler, $args),
            )*
        }
    }};

    // Handler taking the collaborator bundle (semicolon separator)
    (@call $vm:ident, $host:ident, $handler:ident,
        (host; $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_op!(@read $vm, $kind); )*
        $vm.$handler($host, $( $field ),*)
    }};

    // Handler touching VM state only (no semicolon)
    (@call $vm:ident, $host:ident, $handler:ident,
        ( $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_op!(@read $vm, $kind); )*
        $vm.$handler($( $field ),*)
    }};

    // Decode a register index or raw byte
    (@read $vm:ident, Reg) => { $vm.fetch_byte()? };
    (@read $vm:ident, Byte) => { $vm.fetch_byte()? };
    // Decode a big-endian unsigned word
    (@read $vm:ident, Word) => { $vm.fetch_word()? };
    // Decode a big-endian signed immediate
    (@read $vm:ident, Imm) => { $vm.fetch_word()? as i16 };
    // Decode a big-endian code offset
    (@read $vm:ident, Addr) => { $vm.fetch_word()? };
}

/// Cooperative script virtual machine.
///
/// Owns the register file and channel table across frames; borrows the
/// installed code segment read-only for the duration of each frame. The
/// per-turn call stack and halt flag are scratch state reset at the start
/// of every channel turn.
pub struct Vm {
    /// Installed code segment (read-only to the VM).
    code: CodeStore,
    /// Read position within the code segment during a turn.
    cursor: usize,
    /// Offset of the instruction currently being decoded, for diagnostics.
    instr_offset: usize,
    /// The 256-slot register file.
    regs: Registers,
    /// The 64-channel scheduling table.
    channels: ChannelTable,
    /// Return offsets for the running turn.
    call_stack: [u16; CALL_STACK_DEPTH],
    /// Next free call stack slot.
    stack_ptr: usize,
    /// Set by halt/yield to end the running turn.
    halted: bool,
    /// Index of the channel currently executing, for diagnostics.
    active_channel: u8,
    /// Timestamp of the previous display flip, for frame pacing.
    frame_stamp: u32,
}

impl Vm {
    /// Creates a VM over an installed code segment.
    ///
    /// All registers start at zero and every channel is unscheduled; call
    /// [`Vm::restart`] to schedule channel 0 at the program entry point.
    pub fn new(code: CodeStore) -> Self {
        Self {
            code,
            cursor: 0,
            instr_offset: 0,
            regs: Registers::new(),
            channels: ChannelTable::new(),
            call_stack: [0; CALL_STACK_DEPTH],
            stack_ptr: 0,
            halted: false,
            active_channel: 0,
            frame_stamp: 0,
        }
    }

    /// Seeds the pseudo-random seed register (conventionally from the clock).
    pub fn seed_random(&mut self, seed: i16) {
        self.regs.set(reg::RANDOM_SEED, seed);
    }

    /// Reads a register. Hosts use this for the engine-reserved slots.
    pub fn reg(&self, idx: u8) -> i16 {
        self.regs.get(idx)
    }

    /// Writes a register (e.g. the music-sync mailbox).
    pub fn set_reg(&mut self, idx: u8, value: i16) {
        self.regs.set(idx, value);
    }

    /// Replaces the installed code segment.
    ///
    /// Channel offsets are logical, so they stay valid across the swap as
    /// long as the new program uses a compatible layout.
    pub fn install_code(&mut self, data: Bytes) -> Result<(), VmError> {
        self.code.install(data)
    }

    /// Full scheduling reset: every channel becomes unscheduled and
    /// unpaused, then channel 0 is scheduled at `entry`.
    ///
    /// Used at program start and when the program switches to a different
    /// compiled overlay. Registers persist across restarts; the scripts use
    /// them to carry state between overlays.
    pub fn restart(&mut self, host: &mut Host<'_>, entry: u16) {
        host.audio.stop_all();
        self.channels.restart_at(entry);
        self.frame_stamp = host.clock.now_ms();
    }

    /// Maps an input snapshot into the reserved mailbox registers.
    ///
    /// Hosts call this once per frame before [`Vm::run_frame`].
    pub fn update_input(&mut self, input: &PlayerInput) {
        let mut mask: i16 = 0;
        let mut lr: i16 = 0;
        let mut ud: i16 = 0;
        if input.dir & PlayerInput::DIR_RIGHT != 0 {
            lr = 1;
            mask |= 1;
        }
        if input.dir & PlayerInput::DIR_LEFT != 0 {
            lr = -1;
            mask |= 2;
        }
        if input.dir & PlayerInput::DIR_DOWN != 0 {
            ud = 1;
            mask |= 4;
        }
        self.regs.set(reg::HERO_POS_UP_DOWN, ud);
        if input.dir & PlayerInput::DIR_UP != 0 {
            ud = -1;
            mask |= 8;
            self.regs.set(reg::HERO_POS_UP_DOWN, -1);
        }
        self.regs.set(reg::HERO_POS_JUMP_DOWN, ud);
        self.regs.set(reg::HERO_POS_LEFT_RIGHT, lr);
        self.regs.set(reg::HERO_POS_MASK, mask);

        let action: i16 = if input.action {
            mask |= 0x80;
            1
        } else {
            0
        };
        self.regs.set(reg::HERO_ACTION, action);
        self.regs.set(reg::HERO_ACTION_POS_MASK, mask);

        if input.last_char != 0 {
            self.regs.set(reg::LAST_KEYCHAR, i16::from(input.last_char));
        }
    }

    /// Drives exactly one logical game tick.
    pub fn run_frame(&mut self, host: &mut Host<'_>) -> Result<FrameOutcome, VmError> {
        self.setup_channels();
        self.run_channels(host)
    }

    /// Frame setup: commits every channel's pending scheduling state.
    ///
    /// This is the only point where rescheduling requests made during the
    /// previous frame become visible.
    fn setup_channels(&mut self) {
        self.channels.commit_all();
    }

    /// Runs every unpaused, scheduled channel once in ascending order.
    ///
    /// Lower-indexed channels always execute first, so their register
    /// writes and video commands are visible to higher-indexed channels in
    /// the same frame.
    fn run_channels(&mut self, host: &mut Host<'_>) -> Result<FrameOutcome, VmError> {
        for idx in 0..CHANNEL_COUNT as u8 {
            if host.input.quit_requested() {
                return Ok(FrameOutcome::Quit);
            }
            let channel = self.channels.get(idx);
            if channel.paused {
                continue;
            }
            let offset = match channel.run {
                Resume::Idle => continue,
                Resume::At(offset) => offset,
            };

            self.cursor = offset as usize;
            self.stack_ptr = 0;
            self.halted = false;
            self.active_channel = idx;
            let outcome = self.run_turn(host)?;

            // Persist the final cursor so the channel resumes exactly where
            // it stopped; the halt opcode parks the cursor at the idle
            // sentinel, which unschedules it here.
            self.channels.get_mut(idx).run = if self.cursor >= HALT_CURSOR {
                Resume::Idle
            } else {
                Resume::At(self.cursor as u16)
            };

            if outcome == FrameOutcome::Quit {
                return Ok(FrameOutcome::Quit);
            }
        }
        Ok(FrameOutcome::Completed)
    }

    /// Executes the active channel until it halts or yields.
    fn run_turn(&mut self, host: &mut Host<'_>) -> Result<FrameOutcome, VmError> {
        while !self.halted {
            if host.input.quit_requested() {
                return Ok(FrameOutcome::Quit);
            }
            self.step(host)?;
        }
        Ok(FrameOutcome::Completed)
    }

    /// Fetches, decodes, and executes exactly one instruction.
    fn step(&mut self, host: &mut Host<'_>) -> Result<(), VmError> {
        self.instr_offset = self.cursor;
        let opcode = self.fetch_byte()?;

        if opcode & 0x80 != 0 {
            return self.draw_shape_fast(opcode, host);
        }
        if opcode & 0x40 != 0 {
            return self.draw_shape_scaled(opcode, host);
        }

        let instr = Opcode::try_from(opcode).map_err(|_| VmError::IllegalOpcode {
            opcode,
            offset: self.instr_offset as u16,
        })?;
        trace!(
            "ch{:02} {:04X} {}",
            self.active_channel,
            self.instr_offset,
            instr.mnemonic()
        );
        self.exec(instr, host)
    }

    /// Reads one byte at the cursor, advancing it.
    fn fetch_byte(&mut self) -> Result<u8, VmError> {
        let b = self.code.byte_at(self.cursor)?;
        self.cursor += 1;
        Ok(b)
    }

    /// Reads a big-endian word at the cursor, advancing it.
    fn fetch_word(&mut self) -> Result<u16, VmError> {
        let w = self.code.word_at(self.cursor)?;
        self.cursor += 2;
        Ok(w)
    }

    /// Resolves the conditional jump's right operand: register-indirect,
    /// 16-bit immediate, or unsigned 8-bit immediate, per the mode bits.
    fn fetch_rhs(&mut self, op: u8) -> Result<i16, VmError> {
        match cond_rhs_mode(op) {
            AddrMode::Register => {
                let idx = self.fetch_byte()?;
                Ok(self.regs.get(idx))
            }
            AddrMode::Imm16 => Ok(self.fetch_word()? as i16),
            AddrMode::Imm8 => Ok(i16::from(self.fetch_byte()?)),
        }
    }

    /// Tier one: "draw shape, large offset". The opcode byte's low 7 bits
    /// supply the high half of a 15-bit shape offset (doubled), followed by
    /// raw x and y bytes; y overflow past 199 is carried into x.
    fn draw_shape_fast(&mut self, opcode: u8, host: &mut Host<'_>) -> Result<(), VmError> {
        let offset = (u16::from(opcode) << 8 | u16::from(self.fetch_byte()?)).wrapping_mul(2);
        let mut x = i16::from(self.fetch_byte()?);
        let mut y = i16::from(self.fetch_byte()?);
        let h = y - 199;
        if h > 0 {
            y = 199;
            x += h;
        }
        host.video
            .draw_shape(ShapeBank::Cinematic, offset, x, y, DEFAULT_ZOOM);
        Ok(())
    }

    /// Tier two: "draw shape, explicit scale". x, y, and zoom each resolve
    /// through two mode bits of the opcode byte; the number of bytes
    /// consumed depends on the mode, so resolution order is fixed.
    fn draw_shape_scaled(&mut self, opcode: u8, host: &mut Host<'_>) -> Result<(), VmError> {
        let offset = self.fetch_word()?.wrapping_mul(2);
        let mut bank = ShapeBank::Cinematic;

        let mut x = i16::from(self.fetch_byte()?);
        if opcode & 0x20 == 0 {
            if opcode & 0x10 == 0 {
                x = x << 8 | i16::from(self.fetch_byte()?);
            } else {
                x = self.regs.get(x as u8);
            }
        } else if opcode & 0x10 != 0 {
            x += 0x100;
        }

        let mut y = i16::from(self.fetch_byte()?);
        if opcode & 0x08 == 0 {
            if opcode & 0x04 == 0 {
                y = y << 8 | i16::from(self.fetch_byte()?);
            } else {
                y = self.regs.get(y as u8);
            }
        }

        let mut zoom = DEFAULT_ZOOM;
        match opcode & 0x03 {
            0 => {}
            1 => {
                let idx = self.fetch_byte()?;
                zoom = self.regs.get(idx) as u16;
            }
            2 => {
                zoom = u16::from(self.fetch_byte()?);
            }
            _ => {
                bank = ShapeBank::Auxiliary;
            }
        }

        host.video.draw_shape(bank, offset, x, y, zoom);
        Ok(())
    }

    /// Executes a single dispatch-table instruction.
    fn exec(&mut self, instruction: Opcode, host: &mut Host<'_>) -> Result<(), VmError> {
        exec_op! {
            vm = self,
            host = host,
            instr = instruction,
            {
                // Register file
                MovConst => op_mov_const(rd: Reg, imm: Imm),
                Mov => op_mov(rd: Reg, rs: Reg),
                Add => op_add(rd: Reg, rs: Reg),
                AddConst => op_add_const(rd: Reg, imm: Imm),
                // Control flow
                Call => op_call(addr: Addr),
                Ret => op_ret(),
                Yield => op_yield(),
                Jmp => op_jmp(addr: Addr),
                Spawn => op_spawn(ch: Byte, addr: Addr),
                Djnz => op_djnz(rd: Reg, addr: Addr),
                CondJmp => op_cond_jmp(),
                // Video
                SetPalette => op_set_palette(host; num: Word),
                ChannelCtl => op_channel_ctl(first: Byte, last: Byte, mode: Byte),
                SelectPage => op_select_page(host; page: Byte),
                FillPage => op_fill_page(host; page: Byte, color: Byte),
                CopyPage => op_copy_page(host; src: Byte, dst: Byte),
                Blit => op_blit(host; page: Byte),
                Halt => op_halt(),
                DrawString => op_draw_string(host; id: Word, x: Byte, y: Byte, color: Byte),
                // Register file (second bank)
                Sub => op_sub(rd: Reg, rs: Reg),
                AndConst => op_and_const(rd: Reg, imm: Word),
                OrConst => op_or_const(rd: Reg, imm: Word),
                ShlConst => op_shl_const(rd: Reg, imm: Word),
                ShrConst => op_shr_const(rd: Reg, imm: Word),
                // Audio / resources
                PlaySound => op_play_sound(host; res: Word, freq: Byte, vol: Byte, ch: Byte),
                LoadResource => op_load_resource(host; res: Word),
                PlayMusic => op_play_music(host; res: Word, delay: Word, pos: Byte),
            }
        }
    }

    fn op_mov_const(&mut self, rd: u8, imm: i16) -> Result<(), VmError> {
        self.regs.set(rd, imm);
        Ok(())
    }

    fn op_mov(&mut self, rd: u8, rs: u8) -> Result<(), VmError> {
        self.regs.set(rd, self.regs.get(rs));
        Ok(())
    }

    fn op_add(&mut self, rd: u8, rs: u8) -> Result<(), VmError> {
        let v = self.regs.get(rd).wrapping_add(self.regs.get(rs));
        self.regs.set(rd, v);
        Ok(())
    }

    fn op_add_const(&mut self, rd: u8, imm: i16) -> Result<(), VmError> {
        let v = self.regs.get(rd).wrapping_add(imm);
        self.regs.set(rd, v);
        Ok(())
    }

    fn op_sub(&mut self, rd: u8, rs: u8) -> Result<(), VmError> {
        let v = self.regs.get(rd).wrapping_sub(self.regs.get(rs));
        self.regs.set(rd, v);
        Ok(())
    }

    fn op_and_const(&mut self, rd: u8, imm: u16) -> Result<(), VmError> {
        let v = (self.regs.get(rd) as u16 & imm) as i16;
        self.regs.set(rd, v);
        Ok(())
    }

    fn op_or_const(&mut self, rd: u8, imm: u16) -> Result<(), VmError> {
        let v = (self.regs.get(rd) as u16 | imm) as i16;
        self.regs.set(rd, v);
        Ok(())
    }

    fn op_shl_const(&mut self, rd: u8, imm: u16) -> Result<(), VmError> {
        let v = (self.regs.get(rd) as u16).wrapping_shl(u32::from(imm)) as i16;
        self.regs.set(rd, v);
        Ok(())
    }

    fn op_shr_const(&mut self, rd: u8, imm: u16) -> Result<(), VmError> {
        let v = (self.regs.get(rd) as u16).wrapping_shr(u32::from(imm)) as i16;
        self.regs.set(rd, v);
        Ok(())
    }

    fn op_call(&mut self, addr: u16) -> Result<(), VmError> {
        if self.stack_ptr == CALL_STACK_DEPTH {
            return Err(VmError::CallStackOverflow {
                channel: self.active_channel,
                depth: self.stack_ptr,
            });
        }
        // The cursor already sits past the operand: that is the return
        // offset. A target outside the segment faults on the next fetch,
        // not here.
        self.call_stack[self.stack_ptr] = self.cursor as u16;
        self.stack_ptr += 1;
        self.cursor = addr as usize;
        Ok(())
    }

    fn op_ret(&mut self) -> Result<(), VmError> {
        if self.stack_ptr == 0 {
            return Err(VmError::CallStackUnderflow {
                channel: self.active_channel,
            });
        }
        self.stack_ptr -= 1;
        self.cursor = self.call_stack[self.stack_ptr] as usize;
        Ok(())
    }

    /// Ends the turn without moving the cursor: the channel resumes at the
    /// following instruction next time it runs.
    fn op_yield(&mut self) -> Result<(), VmError> {
        self.halted = true;
        Ok(())
    }

    /// Ends the turn and parks the cursor at the idle sentinel: the channel
    /// stays unscheduled until something respawns it.
    fn op_halt(&mut self) -> Result<(), VmError> {
        self.halted = true;
        self.cursor = HALT_CURSOR;
        Ok(())
    }

    fn op_jmp(&mut self, addr: u16) -> Result<(), VmError> {
        self.cursor = addr as usize;
        Ok(())
    }

    fn op_spawn(&mut self, ch: u8, addr: u16) -> Result<(), VmError> {
        if ch as usize >= CHANNEL_COUNT {
            return Err(VmError::InvalidChannel {
                channel: ch,
                offset: self.instr_offset as u16,
            });
        }
        self.channels.get_mut(ch).pending_run = Pending::At(addr);
        Ok(())
    }

    fn op_djnz(&mut self, rd: u8, addr: u16) -> Result<(), VmError> {
        let v = self.regs.get(rd).wrapping_sub(1);
        self.regs.set(rd, v);
        if v != 0 {
            self.cursor = addr as usize;
        }
        Ok(())
    }

    fn op_cond_jmp(&mut self) -> Result<(), VmError> {
        let op = self.fetch_byte()?;
        let lhs_reg = self.fetch_byte()?;
        let lhs = self.regs.get(lhs_reg);
        let rhs = self.fetch_rhs(op)?;

        let taken = match op & 0x07 {
            0 => lhs == rhs,
            1 => lhs != rhs,
            2 => lhs > rhs,
            3 => lhs >= rhs,
            4 => lhs < rhs,
            5 => lhs <= rhs,
            // Conditions 6 and 7 are not defined by the ISA; the target is
            // still consumed so decoding stays in sync.
            _ => false,
        };

        let target = self.fetch_word()?;
        if taken {
            self.cursor = target as usize;
        }
        Ok(())
    }

    fn op_channel_ctl(&mut self, first: u8, last: u8, mode: u8) -> Result<(), VmError> {
        let last = last & 0x3F;
        if last < first {
            warn!("CHST with inverted channel range {}..{}", first, last);
            return Ok(());
        }
        for idx in first..=last {
            let channel = self.channels.get_mut(idx);
            if mode == 2 {
                channel.pending_run = Pending::Kill;
            } else if mode < 2 {
                channel.pending_paused = mode == 1;
            }
        }
        Ok(())
    }

    fn op_set_palette(&mut self, host: &mut Host<'_>, num: u16) -> Result<(), VmError> {
        host.video.set_palette((num >> 8) as u8);
        Ok(())
    }

    fn op_select_page(&mut self, host: &mut Host<'_>, page: u8) -> Result<(), VmError> {
        host.video.select_page(page);
        Ok(())
    }

    fn op_fill_page(&mut self, host: &mut Host<'_>, page: u8, color: u8) -> Result<(), VmError> {
        host.video.fill_page(page, color);
        Ok(())
    }

    fn op_copy_page(&mut self, host: &mut Host<'_>, src: u8, dst: u8) -> Result<(), VmError> {
        host.video.copy_page(src, dst, self.regs.get(reg::SCROLL_Y));
        Ok(())
    }

    /// The one blocking point in the ISA: waits out the remainder of the
    /// pacing budget (`PAUSE_SLICES` x 20 ms since the previous flip), then
    /// presents the page.
    fn op_blit(&mut self, host: &mut Host<'_>, page: u8) -> Result<(), VmError> {
        let budget = i32::from(self.regs.get(reg::PAUSE_SLICES)) * SLICE_MS;
        let elapsed = host.clock.now_ms().wrapping_sub(self.frame_stamp) as i32;
        let wait = budget - elapsed;
        if wait > 0 {
            host.clock.sleep_ms(wait as u32);
        }
        self.frame_stamp = host.clock.now_ms();
        self.regs.set(reg::FLIP_SCRATCH, 0);
        host.video.flip(page);
        Ok(())
    }

    fn op_draw_string(
        &mut self,
        host: &mut Host<'_>,
        id: u16,
        x: u8,
        y: u8,
        color: u8,
    ) -> Result<(), VmError> {
        host.video
            .draw_string(color, u16::from(x), u16::from(y), id);
        Ok(())
    }

    fn op_play_sound(
        &mut self,
        host: &mut Host<'_>,
        res: u16,
        freq: u8,
        vol: u8,
        ch: u8,
    ) -> Result<(), VmError> {
        host.audio.play_sound(res, freq, vol, ch);
        Ok(())
    }

    fn op_load_resource(&mut self, host: &mut Host<'_>, res: u16) -> Result<(), VmError> {
        if res == 0 {
            host.audio.stop_all();
            host.resources.flush();
        } else {
            host.resources.request(res);
        }
        Ok(())
    }

    fn op_play_music(
        &mut self,
        host: &mut Host<'_>,
        res: u16,
        delay: u16,
        pos: u8,
    ) -> Result<(), VmError> {
        host.audio.play_music(res, delay, pos);
        Ok(())
    }

    // Accessors for the snapshot module.

    pub(crate) fn registers(&self) -> &Registers {
        &self.regs
    }

    pub(crate) fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub(crate) fn channel_table(&self) -> &ChannelTable {
        &self.channels
    }

    pub(crate) fn channel_table_mut(&mut self) -> &mut ChannelTable {
        &mut self.channels
    }
}
