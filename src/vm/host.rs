//! Collaborator interfaces injected into the VM.
//!
//! The VM owns only registers, channels, and the running turn's call stack;
//! everything else — rasterization, audio playback, input, timing, resource
//! paging — lives behind these traits. Commands are fire-and-forget: the VM
//! never inspects results except for timing, which flows through [`Clock`].
//!
//! The trait-object bundle in [`Host`] keeps the opcode handlers free of
//! ambient globals: every frame receives explicit handles.

/// Which polygon bank a draw command reads its shape data from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShapeBank {
    /// The main cinematic shape segment.
    Cinematic,
    /// The auxiliary shape segment selected by the scaled-draw mode bits.
    Auxiliary,
}

/// Default zoom factor (1:1 scale) applied when a draw command's mode bits
/// leave the zoom unspecified.
pub const DEFAULT_ZOOM: u16 = 0x40;

/// Rasterizer-facing command sink.
///
/// The page argument convention follows the engine's working-page model:
/// `select_page` sets the implicit target for draw commands, while the
/// page-wide operations name their pages explicitly.
pub trait VideoSink {
    /// Draws a shape from `bank` at table offset `offset`.
    fn draw_shape(&mut self, bank: ShapeBank, offset: u16, x: i16, y: i16, zoom: u16);
    /// Selects the working page subsequent draw commands target.
    fn select_page(&mut self, page: u8);
    /// Clears a page to a solid color.
    fn fill_page(&mut self, page: u8, color: u8);
    /// Copies one page onto another with a vertical scroll offset.
    fn copy_page(&mut self, src: u8, dst: u8, vscroll: i16);
    /// Presents a page (the frame boundary the scripts pace themselves by).
    fn flip(&mut self, page: u8);
    /// Activates a palette by index.
    fn set_palette(&mut self, index: u8);
    /// Draws a string resource at character-cell coordinates.
    fn draw_string(&mut self, color: u8, x: u16, y: u16, id: u16);
}

/// Sound and music command sink.
pub trait AudioSink {
    /// Plays a sound resource on a mixer channel.
    fn play_sound(&mut self, resource: u16, freq: u8, volume: u8, channel: u8);
    /// Starts a music module, `delay` ticks between rows, from `position`.
    fn play_music(&mut self, resource: u16, delay: u16, position: u8);
    /// Stops all sound and music playback.
    fn stop_all(&mut self);
}

/// Resource paging bridge.
///
/// `request` may evict previously loaded, currently-unreferenced resources
/// under memory pressure; the VM has no visibility into the eviction policy
/// and tolerates the code segment being swapped between frames as a result.
pub trait ResourceHub {
    /// Requests that a resource ordinal be resident.
    fn request(&mut self, resource: u16);
    /// Drops every loaded resource (the LOAD 0 path).
    fn flush(&mut self);
}

/// Time source used to pace the display flip.
pub trait Clock {
    /// Monotonic milliseconds.
    fn now_ms(&mut self) -> u32;
    /// Sleeps the calling thread.
    fn sleep_ms(&mut self, ms: u32);
}

/// One poll of the player controls.
///
/// The VM consumes the direction mask, action button, and last character
/// through [`Vm::update_input`](crate::vm::machine::Vm::update_input); the
/// remaining flags are host-loop concerns carried in the same snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlayerInput {
    /// Direction bits, see the `DIR_*` constants.
    pub dir: u8,
    /// Action button held.
    pub action: bool,
    /// Last character typed, 0 if none (code-entry screens read this).
    pub last_char: u8,
    /// Pause toggle requested.
    pub pause: bool,
    /// Quit requested (mirrored by [`InputSource::quit_requested`]).
    pub quit: bool,
    /// Save-state requested.
    pub save: bool,
    /// Load-state requested.
    pub load: bool,
    /// Fast-forward mode active.
    pub fast: bool,
}

impl PlayerInput {
    pub const DIR_RIGHT: u8 = 1 << 0;
    pub const DIR_LEFT: u8 = 1 << 1;
    pub const DIR_DOWN: u8 = 1 << 2;
    pub const DIR_UP: u8 = 1 << 3;
}

/// Input provider plus the global quit signal.
///
/// `quit_requested` is polled once per channel and once per instruction, so
/// worst-case shutdown latency is bounded by a single opcode.
pub trait InputSource {
    /// Returns the current input snapshot.
    fn poll(&mut self) -> PlayerInput;
    /// True once the player asked to quit; never resets within a run.
    fn quit_requested(&self) -> bool;
}

/// The collaborator bundle handed to the VM for each frame.
pub struct Host<'a> {
    pub video: &'a mut dyn VideoSink,
    pub audio: &'a mut dyn AudioSink,
    pub input: &'a mut dyn InputSource,
    pub clock: &'a mut dyn Clock,
    pub resources: &'a mut dyn ResourceHub,
}

/// Recording and scripted collaborator implementations shared by the test
/// suites in this crate.
#[cfg(test)]
pub mod tests {
    use super::*;
    use std::cell::Cell;

    /// Every video command, in issue order.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum VideoCall {
        Shape {
            bank: ShapeBank,
            offset: u16,
            x: i16,
            y: i16,
            zoom: u16,
        },
        SelectPage(u8),
        Fill(u8, u8),
        Copy(u8, u8, i16),
        Flip(u8),
        Palette(u8),
        Text {
            color: u8,
            x: u16,
            y: u16,
            id: u16,
        },
    }

    #[derive(Default)]
    pub struct RecordingVideo {
        pub calls: Vec<VideoCall>,
    }

    impl VideoSink for RecordingVideo {
        fn draw_shape(&mut self, bank: ShapeBank, offset: u16, x: i16, y: i16, zoom: u16) {
            self.calls.push(VideoCall::Shape {
                bank,
                offset,
                x,
                y,
                zoom,
            });
        }
        fn select_page(&mut self, page: u8) {
            self.calls.push(VideoCall::SelectPage(page));
        }
        fn fill_page(&mut self, page: u8, color: u8) {
            self.calls.push(VideoCall::Fill(page, color));
        }
        fn copy_page(&mut self, src: u8, dst: u8, vscroll: i16) {
            self.calls.push(VideoCall::Copy(src, dst, vscroll));
        }
        fn flip(&mut self, page: u8) {
            self.calls.push(VideoCall::Flip(page));
        }
        fn set_palette(&mut self, index: u8) {
            self.calls.push(VideoCall::Palette(index));
        }
        fn draw_string(&mut self, color: u8, x: u16, y: u16, id: u16) {
            self.calls.push(VideoCall::Text { color, x, y, id });
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum AudioCall {
        Sound {
            resource: u16,
            freq: u8,
            volume: u8,
            channel: u8,
        },
        Music {
            resource: u16,
            delay: u16,
            position: u8,
        },
        StopAll,
    }

    #[derive(Default)]
    pub struct RecordingAudio {
        pub calls: Vec<AudioCall>,
    }

    impl AudioSink for RecordingAudio {
        fn play_sound(&mut self, resource: u16, freq: u8, volume: u8, channel: u8) {
            self.calls.push(AudioCall::Sound {
                resource,
                freq,
                volume,
                channel,
            });
        }
        fn play_music(&mut self, resource: u16, delay: u16, position: u8) {
            self.calls.push(AudioCall::Music {
                resource,
                delay,
                position,
            });
        }
        fn stop_all(&mut self) {
            self.calls.push(AudioCall::StopAll);
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum ResourceCall {
        Request(u16),
        Flush,
    }

    #[derive(Default)]
    pub struct RecordingResources {
        pub calls: Vec<ResourceCall>,
    }

    impl ResourceHub for RecordingResources {
        fn request(&mut self, resource: u16) {
            self.calls.push(ResourceCall::Request(resource));
        }
        fn flush(&mut self) {
            self.calls.push(ResourceCall::Flush);
        }
    }

    /// Deterministic clock: `sleep_ms` records the request and advances time.
    #[derive(Default)]
    pub struct FakeClock {
        pub now: u32,
        pub slept: Vec<u32>,
    }

    impl Clock for FakeClock {
        fn now_ms(&mut self) -> u32 {
            self.now
        }
        fn sleep_ms(&mut self, ms: u32) {
            self.slept.push(ms);
            self.now = self.now.wrapping_add(ms);
        }
    }

    /// Scripted input: a fixed snapshot plus an optional quit countdown
    /// decremented on every `quit_requested` poll.
    #[derive(Default)]
    pub struct ScriptedInput {
        pub snapshot: PlayerInput,
        pub quit: bool,
        pub quit_after_polls: Cell<Option<u32>>,
    }

    impl InputSource for ScriptedInput {
        fn poll(&mut self) -> PlayerInput {
            self.snapshot
        }
        fn quit_requested(&self) -> bool {
            if self.quit {
                return true;
            }
            match self.quit_after_polls.get() {
                Some(0) => true,
                Some(n) => {
                    self.quit_after_polls.set(Some(n - 1));
                    false
                }
                None => false,
            }
        }
    }

    /// The five collaborators in one bag, with a [`Host`] projection.
    #[derive(Default)]
    pub struct Rig {
        pub video: RecordingVideo,
        pub audio: RecordingAudio,
        pub input: ScriptedInput,
        pub clock: FakeClock,
        pub resources: RecordingResources,
    }

    impl Rig {
        pub fn host(&mut self) -> Host<'_> {
            Host {
                video: &mut self.video,
                audio: &mut self.audio,
                input: &mut self.input,
                clock: &mut self.clock,
                resources: &mut self.resources,
            }
        }
    }
}
