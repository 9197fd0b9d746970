//! VM benchmark binary.
//!
//! Measures frame throughput of the dispatch loop for representative
//! scripts. Run with: `cargo run --release --bin bench`

use outworld::vm::assembler::assemble_source;
use outworld::vm::host::{
    AudioSink, Clock, Host, InputSource, PlayerInput, ResourceHub, ShapeBank, VideoSink,
};
use outworld::vm::machine::Vm;
use outworld::vm::program::CodeStore;
use std::time::{Duration, Instant};

struct NullVideo;
impl VideoSink for NullVideo {
    fn draw_shape(&mut self, _: ShapeBank, _: u16, _: i16, _: i16, _: u16) {}
    fn select_page(&mut self, _: u8) {}
    fn fill_page(&mut self, _: u8, _: u8) {}
    fn copy_page(&mut self, _: u8, _: u8, _: i16) {}
    fn flip(&mut self, _: u8) {}
    fn set_palette(&mut self, _: u8) {}
    fn draw_string(&mut self, _: u8, _: u16, _: u16, _: u16) {}
}

struct NullAudio;
impl AudioSink for NullAudio {
    fn play_sound(&mut self, _: u16, _: u8, _: u8, _: u8) {}
    fn play_music(&mut self, _: u16, _: u16, _: u8) {}
    fn stop_all(&mut self) {}
}

struct NullResources;
impl ResourceHub for NullResources {
    fn request(&mut self, _: u16) {}
    fn flush(&mut self) {}
}

/// Fixed clock: pacing never sleeps, so the bench measures dispatch only.
struct FixedClock;
impl Clock for FixedClock {
    fn now_ms(&mut self) -> u32 {
        0
    }
    fn sleep_ms(&mut self, _: u32) {}
}

struct NullInput;
impl InputSource for NullInput {
    fn poll(&mut self) -> PlayerInput {
        PlayerInput::default()
    }
    fn quit_requested(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Benchmark harness
// ---------------------------------------------------------------------------

struct BenchResult {
    name: &'static str,
    frames: u64,
    total: Duration,
    /// Estimated instructions executed per frame.
    est_instructions: u64,
}

impl BenchResult {
    fn report(&self) {
        let per_frame = self.total.as_secs_f64() / self.frames as f64;
        let instr_per_sec =
            (self.est_instructions * self.frames) as f64 / self.total.as_secs_f64();
        println!(
            "{:<12} {:>8} frames  {:>10.1} us/frame  {:>12.0} instr/s",
            self.name,
            self.frames,
            per_frame * 1e6,
            instr_per_sec
        );
    }
}

fn bench(name: &'static str, source: &str, frames: u64, est_instructions: u64) -> BenchResult {
    let image = assemble_source(source).expect("bench assembly failed");
    let entry = image.entry;
    let mut vm = Vm::new(CodeStore::from_image(&image).expect("code store"));

    let mut video = NullVideo;
    let mut audio = NullAudio;
    let mut input = NullInput;
    let mut clock = FixedClock;
    let mut resources = NullResources;
    let mut host = Host {
        video: &mut video,
        audio: &mut audio,
        input: &mut input,
        clock: &mut clock,
        resources: &mut resources,
    };
    vm.restart(&mut host, entry);

    let start = Instant::now();
    for _ in 0..frames {
        vm.run_frame(&mut host).expect("bench vm fault");
    }
    BenchResult {
        name,
        frames,
        total: start.elapsed(),
        est_instructions,
    }
}

fn main() {
    // 200 iterations of ADD+ANDI+DJNZ, plus loop setup and the yield.
    let arith = "\
frame: SETI r0, 200
loop:  ADD r1, r2
       ANDI r1, 0x0FFF
       DJNZ r0, loop
       YIELD
       JMP frame
";

    // 100 call/return pairs per frame.
    let calls = "\
frame: SETI r0, 100
loop:  CALL sub
       DJNZ r0, loop
       YIELD
       JMP frame
sub:   ADDI r3, 1
       RET
";

    // 100 conditional jumps per frame, alternating taken/untaken.
    let branches = "\
frame: SETI r0, 100
loop:  JGT r0, 50, high
       ADDI r2, 1
high:  DJNZ r0, loop
       YIELD
       JMP frame
";

    println!("script VM dispatch throughput");
    bench("arith", arith, 20_000, 1 + 200 * 3 + 2).report();
    bench("calls", calls, 20_000, 1 + 100 * 4 + 2).report();
    bench("branches", branches, 20_000, 1 + 100 * 2 + 50 + 2).report();
}
