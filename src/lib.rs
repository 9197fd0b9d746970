//! Cooperative script virtual machine for a cinematic adventure engine.
//!
//! The engine's game logic ships as compiled bytecode in a resource segment;
//! this crate interprets it: 64 cooperative channels scheduled in fixed
//! order, a 256-slot signed 16-bit register file, and a byte-stream ISA with
//! two inline draw-command tiers plus a 27-entry dispatch table. Video,
//! audio, input, timing, and resource management are injected collaborators
//! behind traits; the VM itself owns only registers, channels, and the call
//! stack for the running turn.

pub mod types;
pub mod utils;
pub mod vm;
