//! Headless demo driver for the script VM.
//!
//! Loads a program image (or assembles a source file), then runs frames
//! against logging host stubs: video/audio/resource commands are printed
//! instead of rendered. Useful for exercising compiled scripts without a
//! display backend.
//!
//! # Usage
//! ```text
//! outworld <program.img|program.s> [OPTIONS]
//! ```
//!
//! # Options
//! - `--frames <n>`: Number of frames to run (default 50)
//! - `--trace`: Log every dispatched instruction
//! - `--quiet`: Suppress host command logging

use outworld::utils::log::SHOW_TRACE;
use outworld::vm::assembler::assemble_file;
use outworld::vm::host::{
    AudioSink, Clock, Host, InputSource, PlayerInput, ResourceHub, ShapeBank, VideoSink,
};
use outworld::vm::machine::{FrameOutcome, Vm};
use outworld::vm::program::{CodeStore, ProgramImage};
use outworld::{error, info};
use std::path::Path;
use std::process;
use std::sync::atomic::Ordering;
use std::time::Instant;

struct LoggingVideo {
    quiet: bool,
}

impl VideoSink for LoggingVideo {
    fn draw_shape(&mut self, bank: ShapeBank, offset: u16, x: i16, y: i16, zoom: u16) {
        if !self.quiet {
            info!("video: shape {bank:?} off=0x{offset:04X} at ({x},{y}) zoom={zoom}");
        }
    }
    fn select_page(&mut self, page: u8) {
        if !self.quiet {
            info!("video: select page {page}");
        }
    }
    fn fill_page(&mut self, page: u8, color: u8) {
        if !self.quiet {
            info!("video: fill page {page} color {color}");
        }
    }
    fn copy_page(&mut self, src: u8, dst: u8, vscroll: i16) {
        if !self.quiet {
            info!("video: copy page {src} -> {dst} vscroll {vscroll}");
        }
    }
    fn flip(&mut self, page: u8) {
        if !self.quiet {
            info!("video: flip page {page}");
        }
    }
    fn set_palette(&mut self, index: u8) {
        if !self.quiet {
            info!("video: palette {index}");
        }
    }
    fn draw_string(&mut self, color: u8, x: u16, y: u16, id: u16) {
        if !self.quiet {
            info!("video: string 0x{id:04X} at ({x},{y}) color {color}");
        }
    }
}

struct LoggingAudio {
    quiet: bool,
}

impl AudioSink for LoggingAudio {
    fn play_sound(&mut self, resource: u16, freq: u8, volume: u8, channel: u8) {
        if !self.quiet {
            info!("audio: sound {resource} freq={freq} vol={volume} ch={channel}");
        }
    }
    fn play_music(&mut self, resource: u16, delay: u16, position: u8) {
        if !self.quiet {
            info!("audio: music {resource} delay={delay} pos={position}");
        }
    }
    fn stop_all(&mut self) {
        if !self.quiet {
            info!("audio: stop all");
        }
    }
}

struct LoggingResources {
    quiet: bool,
}

impl ResourceHub for LoggingResources {
    fn request(&mut self, resource: u16) {
        if !self.quiet {
            info!("resources: request {resource}");
        }
    }
    fn flush(&mut self) {
        if !self.quiet {
            info!("resources: flush");
        }
    }
}

struct SystemClock {
    start: Instant,
}

impl Clock for SystemClock {
    fn now_ms(&mut self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
    fn sleep_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}

/// No interactive input in the headless driver; the frame budget is the
/// only stop condition.
struct HeadlessInput;

impl InputSource for HeadlessInput {
    fn poll(&mut self) -> PlayerInput {
        PlayerInput::default()
    }
    fn quit_requested(&self) -> bool {
        false
    }
}

fn usage() -> ! {
    eprintln!("Usage: outworld <program.img|program.s> [--frames <n>] [--trace] [--quiet]");
    process::exit(2);
}

fn load_program(path: &Path) -> ProgramImage {
    if path.extension().is_some_and(|e| e.to_str() == Some("s")) {
        return assemble_file(path).unwrap_or_else(|_| process::exit(1));
    }
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            error!("cannot read {}: {e}", path.display());
            process::exit(1);
        }
    };
    match ProgramImage::from_bytes(&raw) {
        Ok(image) => image,
        Err(e) => {
            error!("cannot load {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut path: Option<String> = None;
    let mut frames: usize = 50;
    let mut quiet = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--frames" => {
                frames = iter
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage());
            }
            "--trace" => SHOW_TRACE.store(true, Ordering::Relaxed),
            "--quiet" => quiet = true,
            other if path.is_none() && !other.starts_with('-') => {
                path = Some(other.to_string());
            }
            _ => usage(),
        }
    }
    let path = path.unwrap_or_else(|| usage());

    let image = load_program(Path::new(&path));
    let entry = image.entry;
    let store = match CodeStore::from_image(&image) {
        Ok(store) => store,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let mut video = LoggingVideo { quiet };
    let mut audio = LoggingAudio { quiet };
    let mut input = HeadlessInput;
    let mut clock = SystemClock {
        start: Instant::now(),
    };
    let mut resources = LoggingResources { quiet };

    let mut vm = Vm::new(store);
    {
        let mut host = Host {
            video: &mut video,
            audio: &mut audio,
            input: &mut input,
            clock: &mut clock,
            resources: &mut resources,
        };
        vm.seed_random(0x1234);
        vm.restart(&mut host, entry);
    }

    info!("running {} for {frames} frames (entry 0x{entry:04X})", path);
    for frame in 0..frames {
        let snapshot = input.poll();
        vm.update_input(&snapshot);
        let mut host = Host {
            video: &mut video,
            audio: &mut audio,
            input: &mut input,
            clock: &mut clock,
            resources: &mut resources,
        };
        match vm.run_frame(&mut host) {
            Ok(FrameOutcome::Completed) => {}
            Ok(FrameOutcome::Quit) => {
                info!("quit requested at frame {frame}");
                break;
            }
            Err(fault) => {
                error!("vm fault at frame {frame}: {fault}");
                process::exit(1);
            }
        }
    }
    info!("done");
}
