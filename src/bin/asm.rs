//! Assembler CLI.
//!
//! Compiles assembly source into a portable program image.
//! Run with: `cargo run --bin asm -- <input.s> <output.img>`

use outworld::vm::assembler::assemble_file;
use outworld::{error, info};
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [input, output] = args.as_slice() else {
        eprintln!("Usage: asm <input.s> <output.img>");
        process::exit(2);
    };

    let image = match assemble_file(Path::new(input)) {
        Ok(image) => image,
        // assemble_file already printed the diagnostic.
        Err(_) => process::exit(1),
    };

    let bytes = image.to_bytes();
    if let Err(e) = std::fs::write(output, bytes.as_slice()) {
        error!("cannot write {output}: {e}");
        process::exit(1);
    }
    info!(
        "{output}: {} code bytes, entry 0x{:04X}",
        image.code.len(),
        image.entry
    );
}
