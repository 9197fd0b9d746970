//! Channel table: 64 cooperative resumption points.
//!
//! Each channel carries two generations of scheduling state. The *current*
//! generation is what the frame loop consults; the *pending* generation is
//! written by opcodes during a frame and committed at the next frame's setup
//! step. That double buffering is what makes mid-frame rescheduling
//! deterministic: a channel rescheduling another (or itself) never alters
//! what runs in the frame already underway.
//!
//! The serialized form keeps the engine's original sentinel encoding
//! (`0xFFFF` idle, `0xFFFE` kill request); in memory both are explicit
//! variants instead.

/// Number of channels in the table.
pub const CHANNEL_COUNT: usize = 64;

/// Serialized offset meaning "not scheduled".
pub const OFFSET_IDLE: u16 = 0xFFFF;

/// Serialized pending offset meaning "kill requested".
pub const OFFSET_KILL: u16 = 0xFFFE;

/// Where a channel resumes on its next turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Resume {
    /// Not scheduled; the channel does nothing until something schedules it.
    #[default]
    Idle,
    /// Resume executing at this code offset.
    At(u16),
}

impl Resume {
    /// Sentinel-encoded form used by snapshots.
    pub fn to_word(self) -> u16 {
        match self {
            Resume::Idle => OFFSET_IDLE,
            Resume::At(offset) => offset,
        }
    }

    /// Decodes the sentinel-encoded form.
    pub fn from_word(word: u16) -> Self {
        if word == OFFSET_IDLE {
            Resume::Idle
        } else {
            Resume::At(word)
        }
    }
}

/// A deferred rescheduling request, committed at frame setup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Pending {
    /// No request outstanding.
    #[default]
    None,
    /// Unschedule the channel.
    Kill,
    /// Schedule the channel at this offset.
    At(u16),
}

impl Pending {
    /// Sentinel-encoded form used by snapshots.
    pub fn to_word(self) -> u16 {
        match self {
            Pending::None => OFFSET_IDLE,
            Pending::Kill => OFFSET_KILL,
            Pending::At(offset) => offset,
        }
    }

    /// Decodes the sentinel-encoded form.
    pub fn from_word(word: u16) -> Self {
        match word {
            OFFSET_IDLE => Pending::None,
            OFFSET_KILL => Pending::Kill,
            offset => Pending::At(offset),
        }
    }
}

/// One cooperative channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Channel {
    /// Where this channel resumes, consulted by the frame loop.
    pub run: Resume,
    /// Rescheduling request for the next frame.
    pub pending_run: Pending,
    /// Whether this channel is skipped this frame.
    pub paused: bool,
    /// Pause flag for the next frame; copied over at every setup step.
    pub pending_paused: bool,
}

impl Channel {
    /// Commits pending state at a frame boundary.
    ///
    /// The pause flag is copied unconditionally (it is the persistent
    /// authority); the resume offset changes only when a request is
    /// outstanding, and the request slot is cleared afterwards.
    pub fn commit(&mut self) {
        self.paused = self.pending_paused;
        match std::mem::take(&mut self.pending_run) {
            Pending::None => {}
            Pending::Kill => self.run = Resume::Idle,
            Pending::At(offset) => self.run = Resume::At(offset),
        }
    }
}

/// The fixed-size channel table.
#[derive(Clone)]
pub struct ChannelTable {
    channels: [Channel; CHANNEL_COUNT],
}

impl ChannelTable {
    /// Creates a table with every channel idle, unpaused, no requests.
    pub fn new() -> Self {
        Self {
            channels: [Channel::default(); CHANNEL_COUNT],
        }
    }

    /// Commits every channel's pending state (the frame setup step).
    pub fn commit_all(&mut self) {
        for channel in &mut self.channels {
            channel.commit();
        }
    }

    /// Resets every channel to idle/unpaused and schedules channel 0 at
    /// `entry`. Used at program start and when switching overlays.
    pub fn restart_at(&mut self, entry: u16) {
        self.channels = [Channel::default(); CHANNEL_COUNT];
        self.channels[0].run = Resume::At(entry);
    }

    /// Borrows a channel. Callers validate `idx < 64` at the decode boundary.
    pub fn get(&self, idx: u8) -> &Channel {
        &self.channels[idx as usize]
    }

    pub fn get_mut(&mut self, idx: u8) -> &mut Channel {
        &mut self.channels[idx as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_applies_pending_offset_once() {
        let mut ch = Channel::default();
        ch.pending_run = Pending::At(0x1234);
        ch.commit();
        assert_eq!(ch.run, Resume::At(0x1234));
        assert_eq!(ch.pending_run, Pending::None);

        // A second commit with no new request leaves the offset alone.
        ch.commit();
        assert_eq!(ch.run, Resume::At(0x1234));
    }

    #[test]
    fn commit_kill_unschedules() {
        let mut ch = Channel {
            run: Resume::At(10),
            pending_run: Pending::Kill,
            ..Channel::default()
        };
        ch.commit();
        assert_eq!(ch.run, Resume::Idle);
        assert_eq!(ch.pending_run, Pending::None);
    }

    #[test]
    fn commit_copies_pause_flag_every_frame() {
        let mut ch = Channel::default();
        ch.pending_paused = true;
        ch.commit();
        assert!(ch.paused);

        // The pending flag persists; an unpause request is an explicit write.
        ch.commit();
        assert!(ch.paused);

        ch.pending_paused = false;
        ch.commit();
        assert!(!ch.paused);
    }

    #[test]
    fn restart_schedules_channel_zero_only() {
        let mut table = ChannelTable::new();
        table.get_mut(5).run = Resume::At(99);
        table.get_mut(5).pending_paused = true;
        table.restart_at(0x20);
        assert_eq!(table.get(0).run, Resume::At(0x20));
        for idx in 1..CHANNEL_COUNT as u8 {
            assert_eq!(table.get(idx).run, Resume::Idle);
            assert!(!table.get(idx).paused);
            assert!(!table.get(idx).pending_paused);
        }
    }

    #[test]
    fn sentinel_words_roundtrip() {
        assert_eq!(Resume::Idle.to_word(), 0xFFFF);
        assert_eq!(Resume::At(0x0042).to_word(), 0x0042);
        assert_eq!(Resume::from_word(0xFFFF), Resume::Idle);
        assert_eq!(Resume::from_word(0x0042), Resume::At(0x0042));

        assert_eq!(Pending::None.to_word(), 0xFFFF);
        assert_eq!(Pending::Kill.to_word(), 0xFFFE);
        assert_eq!(Pending::At(7).to_word(), 7);
        assert_eq!(Pending::from_word(0xFFFF), Pending::None);
        assert_eq!(Pending::from_word(0xFFFE), Pending::Kill);
        assert_eq!(Pending::from_word(7), Pending::At(7));
    }
}
