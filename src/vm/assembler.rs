//! Assembly language parser and bytecode compiler.
//!
//! Converts human-readable assembly source into an executable
//! [`ProgramImage`]. Uses [`for_each_opcode!`](crate::for_each_opcode) to
//! generate the mnemonic table, so the assembler can never drift from the
//! decoder.
//!
//! # Syntax
//!
//! ```text
//! loop:  DJNZ r0, loop      # optional comment
//! ```
//!
//! - Mnemonics are uppercase (e.g., `SETI`, `DJNZ`)
//! - Registers use `r` prefix (e.g., `r0`, `r255`)
//! - Immediates are decimal (`42`, `-1`) or hex (`0x2A`)
//! - Labels end with `:` at definition, bare at use
//! - Comments start with `#`; commas between operands are optional
//! - `DB`/`DW` emit raw bytes/big-endian words
//! - `ENTRY <label|number>` sets the image entry offset (default 0)
//!
//! The conditional jump is written through comparison aliases — `JEQ`,
//! `JNE`, `JGT`, `JGE`, `JLT`, `JLE` — taking a left register, a right
//! operand (register or immediate), and a target. The right operand picks
//! the tightest encoding: register-indirect, 8-bit immediate for 0..=255,
//! 16-bit immediate otherwise.

use crate::for_each_opcode;
use crate::vm::errors::VmError;
use crate::vm::isa::OperandKind;
use crate::vm::program::ProgramImage;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: char = '#';
const LABEL_SUFFIX: char = ':';

macro_rules! gen_mnemonic_table {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        /// Maps a mnemonic to its opcode byte and operand classes.
        fn table_entry(mnemonic: &str) -> Option<(u8, &'static [OperandKind])> {
            match mnemonic {
                $( $mnemonic => Some(($opcode, &[ $( OperandKind::$kind ),* ])), )*
                _ => None,
            }
        }
    };
}

for_each_opcode!(gen_mnemonic_table);

/// Comparison aliases for the conditional jump, low 3 bits of its mode byte.
fn cond_alias(mnemonic: &str) -> Option<u8> {
    match mnemonic {
        "JEQ" => Some(0),
        "JNE" => Some(1),
        "JGT" => Some(2),
        "JGE" => Some(3),
        "JLT" => Some(4),
        "JLE" => Some(5),
        _ => None,
    }
}

/// Right operand of a conditional jump alias.
#[derive(Debug, Clone)]
enum Rhs {
    Reg(u8),
    Imm(i64),
}

/// An operand that may be a number, register, or label reference.
#[derive(Debug, Clone)]
enum Operand {
    Reg(u8),
    Num(i64),
    Label(String),
}

/// One assembled statement with its encoded size precomputed.
#[derive(Debug, Clone)]
enum Statement {
    TableOp {
        opcode: u8,
        kinds: &'static [OperandKind],
        operands: Vec<Operand>,
    },
    CondJmp {
        cond: u8,
        lhs: u8,
        rhs: Rhs,
        target: Operand,
    },
    Data(Vec<u8>),
}

impl Statement {
    fn size(&self) -> usize {
        match self {
            Statement::TableOp { kinds, .. } => {
                1 + kinds.iter().map(|k| k.width()).sum::<usize>()
            }
            Statement::CondJmp { rhs, .. } => {
                let rhs_width = match rhs {
                    Rhs::Reg(_) => 1,
                    Rhs::Imm(v) => {
                        if (0..=255).contains(v) {
                            1
                        } else {
                            2
                        }
                    }
                };
                // opcode + mode + lhs register + rhs + target word
                1 + 1 + 1 + rhs_width + 2
            }
            Statement::Data(bytes) => bytes.len(),
        }
    }
}

/// Label definitions mapping names to code offsets.
struct LabelMap {
    labels: HashMap<String, usize>,
}

impl LabelMap {
    fn new() -> Self {
        Self {
            labels: HashMap::new(),
        }
    }

    fn define(&mut self, name: &str, offset: usize) -> Result<(), VmError> {
        if self.labels.contains_key(name) {
            return Err(VmError::DuplicateLabel(name.to_string()));
        }
        self.labels.insert(name.to_string(), offset);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<usize, VmError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| VmError::UndefinedLabel(name.to_string()))
    }
}

/// Splits a source line into tokens, dropping comments and commas.
fn tokenize(line: &str) -> Vec<&str> {
    let code = match line.find(COMMENT_CHAR) {
        Some(pos) => &line[..pos],
        None => line,
    };
    code.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_number(token: &str) -> Result<i64, VmError> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).map_err(|_| VmError::InvalidOperand(token.to_string()))
    } else {
        body.parse::<i64>()
            .map_err(|_| VmError::InvalidOperand(token.to_string()))
    }?;
    Ok(if negative { -value } else { value })
}

fn parse_register(token: &str) -> Result<u8, VmError> {
    let body = token
        .strip_prefix('r')
        .ok_or_else(|| VmError::ExpectedRegister(token.to_string()))?;
    body.parse::<u8>()
        .map_err(|_| VmError::InvalidRegister(token.to_string()))
}

fn parse_operand(token: &str) -> Result<Operand, VmError> {
    if token.starts_with('r') && token[1..].chars().all(|c| c.is_ascii_digit()) {
        return Ok(Operand::Reg(parse_register(token)?));
    }
    if token.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        return Ok(Operand::Num(parse_number(token)?));
    }
    Ok(Operand::Label(token.to_string()))
}

fn check_range(value: i64, min: i64, max: i64, width: u8) -> Result<i64, VmError> {
    if value < min || value > max {
        return Err(VmError::OperandOutOfRange { value, width });
    }
    Ok(value)
}

/// Encodes one operand of a table instruction.
fn encode_operand(
    kind: OperandKind,
    operand: &Operand,
    labels: &LabelMap,
    out: &mut Vec<u8>,
) -> Result<(), VmError> {
    match kind {
        OperandKind::Reg => match operand {
            Operand::Reg(idx) => out.push(*idx),
            other => return Err(VmError::ExpectedRegister(format!("{:?}", other))),
        },
        OperandKind::Byte => match operand {
            Operand::Num(v) => out.push(check_range(*v, 0, 0xFF, 8)? as u8),
            other => return Err(VmError::InvalidOperand(format!("{:?}", other))),
        },
        OperandKind::Word => match operand {
            Operand::Num(v) => {
                let v = check_range(*v, i64::from(i16::MIN), 0xFFFF, 16)?;
                out.extend_from_slice(&(v as u16).to_be_bytes());
            }
            other => return Err(VmError::InvalidOperand(format!("{:?}", other))),
        },
        OperandKind::Imm => match operand {
            Operand::Num(v) => {
                let v = check_range(*v, i64::from(i16::MIN), i64::from(i16::MAX), 16)?;
                out.extend_from_slice(&(v as i16).to_be_bytes());
            }
            other => return Err(VmError::InvalidOperand(format!("{:?}", other))),
        },
        OperandKind::Addr => {
            let target = resolve_target(operand, labels)?;
            out.extend_from_slice(&target.to_be_bytes());
        }
    }
    Ok(())
}

fn resolve_target(operand: &Operand, labels: &LabelMap) -> Result<u16, VmError> {
    let offset = match operand {
        Operand::Label(name) => labels.resolve(name)? as i64,
        Operand::Num(v) => *v,
        Operand::Reg(idx) => {
            return Err(VmError::InvalidOperand(format!("r{}", idx)));
        }
    };
    Ok(check_range(offset, 0, 0xFFFF, 16)? as u16)
}

/// Parses the tokens of one statement (label already stripped).
fn parse_statement(tokens: &[&str]) -> Result<Statement, VmError> {
    let mnemonic = tokens[0];
    let operands = &tokens[1..];

    if let Some(cond) = cond_alias(mnemonic) {
        if operands.len() != 3 {
            return Err(VmError::ArityMismatch {
                mnemonic: mnemonic.to_string(),
                expected: 3,
                actual: operands.len(),
            });
        }
        let lhs = parse_register(operands[0])?;
        let rhs = match parse_operand(operands[1])? {
            Operand::Reg(idx) => Rhs::Reg(idx),
            Operand::Num(v) => {
                Rhs::Imm(check_range(v, i64::from(i16::MIN), i64::from(i16::MAX), 16)?)
            }
            Operand::Label(name) => return Err(VmError::InvalidOperand(name)),
        };
        let target = parse_operand(operands[2])?;
        return Ok(Statement::CondJmp {
            cond,
            lhs,
            rhs,
            target,
        });
    }

    match mnemonic {
        "DB" => {
            let mut bytes = Vec::with_capacity(operands.len());
            for token in operands {
                bytes.push(check_range(parse_number(token)?, 0, 0xFF, 8)? as u8);
            }
            return Ok(Statement::Data(bytes));
        }
        "DW" => {
            let mut bytes = Vec::with_capacity(operands.len() * 2);
            for token in operands {
                let v = check_range(parse_number(token)?, i64::from(i16::MIN), 0xFFFF, 16)?;
                bytes.extend_from_slice(&(v as u16).to_be_bytes());
            }
            return Ok(Statement::Data(bytes));
        }
        // The raw conditional jump has a mode-dependent tail; it is only
        // written through its comparison aliases.
        "CJMP" => {
            return Err(VmError::InvalidMnemonic(
                "CJMP (use JEQ/JNE/JGT/JGE/JLT/JLE)".to_string(),
            ));
        }
        _ => {}
    }

    let (opcode, kinds) =
        table_entry(mnemonic).ok_or_else(|| VmError::InvalidMnemonic(mnemonic.to_string()))?;
    if operands.len() != kinds.len() {
        return Err(VmError::ArityMismatch {
            mnemonic: mnemonic.to_string(),
            expected: kinds.len(),
            actual: operands.len(),
        });
    }
    let operands = operands
        .iter()
        .map(|t| parse_operand(t))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Statement::TableOp {
        opcode,
        kinds,
        operands,
    })
}

fn emit_statement(
    statement: &Statement,
    labels: &LabelMap,
    out: &mut Vec<u8>,
) -> Result<(), VmError> {
    match statement {
        Statement::TableOp {
            opcode,
            kinds,
            operands,
        } => {
            out.push(*opcode);
            for (kind, operand) in kinds.iter().zip(operands) {
                encode_operand(*kind, operand, labels, out)?;
            }
        }
        Statement::CondJmp {
            cond,
            lhs,
            rhs,
            target,
        } => {
            out.push(0x0A);
            match rhs {
                Rhs::Reg(idx) => {
                    out.push(cond | 0x80);
                    out.push(*lhs);
                    out.push(*idx);
                }
                Rhs::Imm(v) if (0..=255).contains(v) => {
                    out.push(*cond);
                    out.push(*lhs);
                    out.push(*v as u8);
                }
                Rhs::Imm(v) => {
                    out.push(cond | 0x40);
                    out.push(*lhs);
                    out.extend_from_slice(&(*v as i16).to_be_bytes());
                }
            }
            let target = resolve_target(target, labels)?;
            out.extend_from_slice(&target.to_be_bytes());
        }
        Statement::Data(bytes) => out.extend_from_slice(bytes),
    }
    Ok(())
}

/// Assembles source text into a program image.
pub fn assemble_source(source: &str) -> Result<ProgramImage, VmError> {
    let mut labels = LabelMap::new();
    let mut statements: Vec<(usize, Statement)> = Vec::new();
    let mut entry: Option<(usize, Operand)> = None;
    let mut offset = 0usize;

    // Pass 1: record labels and statement sizes. Sizes depend only on the
    // operand text, never on label values, so one sizing pass suffices.
    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let mut tokens = tokenize(line);

        let wrap = |err: VmError| VmError::AssemblyError {
            line: line_no,
            source: err.to_string(),
        };

        while let Some(first) = tokens.first() {
            if let Some(name) = first.strip_suffix(LABEL_SUFFIX) {
                labels.define(name, offset).map_err(wrap)?;
                tokens.remove(0);
            } else {
                break;
            }
        }
        if tokens.is_empty() {
            continue;
        }

        if tokens[0] == "ENTRY" {
            if tokens.len() != 2 {
                return Err(wrap(VmError::ArityMismatch {
                    mnemonic: "ENTRY".to_string(),
                    expected: 1,
                    actual: tokens.len() - 1,
                }));
            }
            entry = Some((line_no, parse_operand(tokens[1]).map_err(wrap)?));
            continue;
        }

        let statement = parse_statement(&tokens).map_err(wrap)?;
        offset += statement.size();
        statements.push((line_no, statement));
    }

    // Pass 2: emit with every label known.
    let mut code = Vec::with_capacity(offset);
    for (line_no, statement) in &statements {
        emit_statement(statement, &labels, &mut code).map_err(|err| VmError::AssemblyError {
            line: *line_no,
            source: err.to_string(),
        })?;
    }

    let entry = match entry {
        Some((line_no, operand)) => {
            resolve_target(&operand, &labels).map_err(|err| VmError::AssemblyError {
                line: line_no,
                source: err.to_string(),
            })?
        }
        None => 0,
    };

    ProgramImage::new(entry, code)
}

/// Assembles a source file into a program image.
pub fn assemble_file(path: &Path) -> Result<ProgramImage, VmError> {
    let source = fs::read_to_string(path).map_err(|e| VmError::IoError(e.to_string()))?;
    assemble_source(&source).map_err(|err| {
        log_assembly_error(&path.display().to_string(), &source, &err);
        err
    })
}

/// Formats a compiler-style diagnostic for assembly failures.
fn render_assembly_diagnostic(file: &str, source: &str, line: usize, message: &str) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
    }

    diag
}

/// Emits a helpful diagnostic to stderr for assembly errors.
pub fn log_assembly_error(file: &str, source: &str, err: &VmError) {
    if let VmError::AssemblyError { line, source: msg } = err {
        eprintln!(
            "{}",
            render_assembly_diagnostic(file, source, *line, msg)
        );
    } else {
        eprintln!("error: {err}");
    }
}
