//! Dalvik instructions in smali syntax.
//!
//! Only the opcodes the deobfuscator reasons about are decoded into structured
//! variants. Everything else is kept as [`Instruction::Other`] with its register
//! operands, which is enough for the register tracker to invalidate whatever the
//! instruction may have overwritten.

use std::{fmt, str::FromStr};

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    smali::{
        literal::{parse_integer, split_quoted, JavaString},
        types::{FieldRef, MethodRef},
    },
    Result,
};

/// A register operand, either a local (`vN`) or a parameter alias (`pN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// `vN`
    Local(u16),
    /// `pN`
    Param(u16),
}

impl Register {
    /// Parse `v12` / `p0`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (ctor, digits): (fn(u16) -> Register, &str) = match text.as_bytes().first()? {
            b'v' => (Register::Local, &text[1..]),
            b'p' => (Register::Param, &text[1..]),
            _ => return None,
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(ctor)
    }

    /// The register following this one, used for the high half of wide values.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Register::Local(n) => Register::Local(n.wrapping_add(1)),
            Register::Param(n) => Register::Param(n.wrapping_add(1)),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Local(n) => write!(f, "v{n}"),
            Register::Param(n) => write!(f, "p{n}"),
        }
    }
}

/// Dispatch flavour of an `invoke-*` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum InvokeKind {
    /// `invoke-virtual`
    Virtual,
    /// `invoke-super`
    Super,
    /// `invoke-direct`
    Direct,
    /// `invoke-static`
    Static,
    /// `invoke-interface`
    Interface,
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `const-string[/jumbo] vA, "..."`
    ConstString {
        /// Destination register
        dst: Register,
        /// Decoded literal
        value: JavaString,
    },
    /// `const`, `const/4`, `const/16`, `const/high16`
    Const {
        /// Destination register
        dst: Register,
        /// Literal value
        value: i64,
    },
    /// `const-wide`, `const-wide/16`, `const-wide/32`, `const-wide/high16`
    ConstWide {
        /// Low register of the destination pair
        dst: Register,
        /// Literal value
        value: i64,
    },
    /// `new-array vA, vB, type`
    NewArray {
        /// Destination register
        dst: Register,
        /// Register holding the element count
        size: Register,
        /// Array type descriptor
        ty: String,
    },
    /// `filled-new-array[/range] {..}, type`; the array is picked up by `move-result-object`.
    FilledNewArray {
        /// Element registers
        args: Vec<Register>,
        /// Array type descriptor
        ty: String,
    },
    /// `aget-object vA, vB, vC`
    ArrayGetObject {
        /// Destination register
        dst: Register,
        /// Array register
        array: Register,
        /// Index register
        index: Register,
    },
    /// `aput-object vA, vB, vC`
    ArrayPutObject {
        /// Stored value register
        src: Register,
        /// Array register
        array: Register,
        /// Index register
        index: Register,
    },
    /// Any `sget*`
    StaticGet {
        /// Destination register
        dst: Register,
        /// Field read
        field: FieldRef,
    },
    /// Any `sput*`
    StaticPut {
        /// Stored value register
        src: Register,
        /// Field written
        field: FieldRef,
    },
    /// `invoke-{virtual,super,direct,static,interface}[/range]`
    Invoke {
        /// Dispatch flavour
        kind: InvokeKind,
        /// Argument registers, ranges expanded
        args: Vec<Register>,
        /// Target method
        method: MethodRef,
    },
    /// `move-result`, `move-result-wide`, `move-result-object`
    MoveResult {
        /// Destination register
        dst: Register,
        /// `move-result-wide`
        wide: bool,
        /// `move-result-object`
        object: bool,
    },
    /// `move*`, `move-wide*`, `move-object*`
    Move {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
        /// Register pair move
        wide: bool,
    },
    /// `nop`
    Nop,
    /// Everything else.
    Other {
        /// The opcode mnemonic
        mnemonic: String,
        /// Every register mentioned in the operands, in order
        registers: Vec<Register>,
    },
}

/// Mnemonic prefixes of instructions that never write their first register operand.
const NON_WRITING_PREFIXES: &[&str] = &[
    "if-",
    "goto",
    "return",
    "throw",
    "monitor-",
    "aput",
    "iput",
    "sput",
    "fill-array-data",
    "packed-switch",
    "sparse-switch",
    "invoke",
];

impl Instruction {
    /// Parse one instruction from comment-free, trimmed text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] (line 0) when a recognised opcode has
    /// operands of the wrong shape.
    pub fn parse(text: &str) -> Result<Self> {
        let (mnemonic, rest) = match text.find(char::is_whitespace) {
            Some(pos) => (&text[..pos], text[pos..].trim()),
            None => (text, ""),
        };
        let ops = split_operands(rest)?;

        let instruction = match mnemonic {
            "const-string" | "const-string/jumbo" => {
                let [dst, literal] = expect_operands::<2>(mnemonic, &ops)?;
                let (value, tail) = split_quoted(literal)?;
                if !tail.trim().is_empty() {
                    return Err(malformed_error!(0, "trailing text after {} literal", mnemonic));
                }
                Instruction::ConstString {
                    dst: register(mnemonic, dst)?,
                    value,
                }
            }
            "const" | "const/4" | "const/16" | "const/high16" => {
                let [dst, value] = expect_operands::<2>(mnemonic, &ops)?;
                Instruction::Const {
                    dst: register(mnemonic, dst)?,
                    value: integer(mnemonic, value)?,
                }
            }
            "const-wide" | "const-wide/16" | "const-wide/32" | "const-wide/high16" => {
                let [dst, value] = expect_operands::<2>(mnemonic, &ops)?;
                Instruction::ConstWide {
                    dst: register(mnemonic, dst)?,
                    value: integer(mnemonic, value)?,
                }
            }
            "new-array" => {
                let [dst, size, ty] = expect_operands::<3>(mnemonic, &ops)?;
                Instruction::NewArray {
                    dst: register(mnemonic, dst)?,
                    size: register(mnemonic, size)?,
                    ty: ty.to_string(),
                }
            }
            "filled-new-array" | "filled-new-array/range" => {
                let [args, ty] = expect_operands::<2>(mnemonic, &ops)?;
                Instruction::FilledNewArray {
                    args: register_list(mnemonic, args)?,
                    ty: ty.to_string(),
                }
            }
            "aget-object" => {
                let [dst, array, index] = expect_operands::<3>(mnemonic, &ops)?;
                Instruction::ArrayGetObject {
                    dst: register(mnemonic, dst)?,
                    array: register(mnemonic, array)?,
                    index: register(mnemonic, index)?,
                }
            }
            "aput-object" => {
                let [src, array, index] = expect_operands::<3>(mnemonic, &ops)?;
                Instruction::ArrayPutObject {
                    src: register(mnemonic, src)?,
                    array: register(mnemonic, array)?,
                    index: register(mnemonic, index)?,
                }
            }
            "move-result" | "move-result-wide" | "move-result-object" => {
                let [dst] = expect_operands::<1>(mnemonic, &ops)?;
                Instruction::MoveResult {
                    dst: register(mnemonic, dst)?,
                    wide: mnemonic == "move-result-wide",
                    object: mnemonic == "move-result-object",
                }
            }
            "move" | "move/from16" | "move/16" | "move-wide" | "move-wide/from16"
            | "move-wide/16" | "move-object" | "move-object/from16" | "move-object/16" => {
                let [dst, src] = expect_operands::<2>(mnemonic, &ops)?;
                Instruction::Move {
                    dst: register(mnemonic, dst)?,
                    src: register(mnemonic, src)?,
                    wide: mnemonic.starts_with("move-wide"),
                }
            }
            "nop" => Instruction::Nop,
            _ if mnemonic.starts_with("sget") || mnemonic.starts_with("sput") => {
                let [reg, field] = expect_operands::<2>(mnemonic, &ops)?;
                let field = FieldRef::parse(field)
                    .ok_or_else(|| malformed_error!(0, "bad field reference in {}", mnemonic))?;
                let reg = register(mnemonic, reg)?;
                if mnemonic.starts_with("sget") {
                    Instruction::StaticGet { dst: reg, field }
                } else {
                    Instruction::StaticPut { src: reg, field }
                }
            }
            _ if mnemonic.starts_with("invoke-") => match parse_invoke(mnemonic, &ops)? {
                Some(invoke) => invoke,
                None => other(mnemonic, &ops),
            },
            _ => other(mnemonic, &ops),
        };

        Ok(instruction)
    }

    /// The register this instruction writes, with `true` if it writes a register pair.
    ///
    /// Unknown opcodes are assumed to write their first register operand unless their
    /// mnemonic is known not to. The answer may over-approximate, never under-approximate.
    #[must_use]
    pub fn destination(&self) -> Option<(Register, bool)> {
        match self {
            Instruction::ConstString { dst, .. }
            | Instruction::Const { dst, .. }
            | Instruction::NewArray { dst, .. }
            | Instruction::ArrayGetObject { dst, .. } => Some((*dst, false)),
            Instruction::ConstWide { dst, .. } => Some((*dst, true)),
            Instruction::StaticGet { dst, field } => {
                Some((*dst, field.ty == "J" || field.ty == "D"))
            }
            Instruction::MoveResult { dst, wide, .. } | Instruction::Move { dst, wide, .. } => {
                Some((*dst, *wide))
            }
            Instruction::Other {
                mnemonic,
                registers,
            } => {
                if NON_WRITING_PREFIXES
                    .iter()
                    .any(|prefix| mnemonic.starts_with(prefix))
                {
                    return None;
                }
                let base = mnemonic.split('/').next().unwrap_or(mnemonic);
                let wide =
                    base.contains("-wide") || base.ends_with("-long") || base.ends_with("-double");
                registers.first().map(|reg| (*reg, wide))
            }
            Instruction::FilledNewArray { .. }
            | Instruction::ArrayPutObject { .. }
            | Instruction::StaticPut { .. }
            | Instruction::Invoke { .. }
            | Instruction::Nop => None,
        }
    }

    /// Returns `true` for instructions that leave a value for `move-result*`.
    #[must_use]
    pub fn produces_result(&self) -> bool {
        matches!(
            self,
            Instruction::Invoke { .. } | Instruction::FilledNewArray { .. }
        ) || matches!(self, Instruction::Other { mnemonic, .. } if mnemonic.starts_with("invoke"))
    }
}

fn parse_invoke(mnemonic: &str, ops: &[&str]) -> Result<Option<Instruction>> {
    let flavour = mnemonic
        .trim_start_matches("invoke-")
        .trim_end_matches("/range");
    let Ok(kind) = InvokeKind::from_str(flavour) else {
        return Ok(None);
    };
    let [args, target] = expect_operands::<2>(mnemonic, ops)?;
    let method = MethodRef::parse(target)
        .ok_or_else(|| malformed_error!(0, "bad method reference in {}", mnemonic))?;
    Ok(Some(Instruction::Invoke {
        kind,
        args: register_list(mnemonic, args)?,
        method,
    }))
}

fn other(mnemonic: &str, ops: &[&str]) -> Instruction {
    let mut registers = Vec::new();
    for op in ops {
        if op.starts_with('{') {
            if let Ok(list) = register_list(mnemonic, op) {
                registers.extend(list);
            }
        } else if let Some(reg) = Register::parse(op) {
            registers.push(reg);
        }
    }
    Instruction::Other {
        mnemonic: mnemonic.to_string(),
        registers,
    }
}

fn expect_operands<'a, const N: usize>(mnemonic: &str, ops: &[&'a str]) -> Result<[&'a str; N]> {
    <[&str; N]>::try_from(ops).map_err(|_| {
        malformed_error!(
            0,
            "{} expects {} operands, found {}",
            mnemonic,
            N,
            ops.len()
        )
    })
}

fn register(mnemonic: &str, text: &str) -> Result<Register> {
    Register::parse(text)
        .ok_or_else(|| malformed_error!(0, "{}: expected register, found '{}'", mnemonic, text))
}

fn integer(mnemonic: &str, text: &str) -> Result<i64> {
    parse_integer(text)
        .ok_or_else(|| malformed_error!(0, "{}: bad integer literal '{}'", mnemonic, text))
}

/// Parse `{v0, v1}`, `{}` or `{v0 .. v4}`; ranges are expanded.
fn register_list(mnemonic: &str, text: &str) -> Result<Vec<Register>> {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| malformed_error!(0, "{}: expected register list", mnemonic))?
        .trim();

    if inner.is_empty() {
        return Ok(Vec::new());
    }

    if let Some((first, last)) = inner.split_once("..") {
        let first = register(mnemonic, first)?;
        let last = register(mnemonic, last)?;
        return match (first, last) {
            (Register::Local(a), Register::Local(b)) if a <= b => {
                Ok((a..=b).map(Register::Local).collect())
            }
            (Register::Param(a), Register::Param(b)) if a <= b => {
                Ok((a..=b).map(Register::Param).collect())
            }
            _ => Err(malformed_error!(0, "{}: bad register range", mnemonic)),
        };
    }

    inner.split(',').map(|r| register(mnemonic, r)).collect()
}

/// Split an operand string on top-level commas, respecting string literals and braces.
fn split_operands(text: &str) -> Result<Vec<&str>> {
    let mut ops = Vec::new();
    if text.is_empty() {
        return Ok(ops);
    }

    let bytes = text.as_bytes();
    let mut start = 0;
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(malformed_error!(0, "unterminated string literal"));
                }
            }
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                ops.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    ops.push(text[start..].trim());
    Ok(ops)
}
