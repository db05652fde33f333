//! Tokenizing CB-16 assembly.
//!
//! [`Token`] lists everything the parser can encounter in a source file;
//! [`parse_program`](crate::parse::parse_program) consumes the stream this
//! module produces.
//!
//! The token set is small: numbers (decimal, `#`-decimal, or `x`-hex, all
//! optionally negative), registers, identifiers (mnemonics and labels),
//! and a handful of punctuation. Numeric tokens carry an `i32` that is
//! checked against the 16-bit machine word here; the tighter 6-bit
//! literal check belongs to the parser, which knows the operand position.

use logos::{Lexer, Logos};

/// A unit of information in CB-16 source code.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t]+", error = LexErr)]
pub enum Token {
    // The numeric patterns deliberately over-match: `3Q` lexes as one
    // numeric token and is rejected whole by the callback, rather than
    // splitting into the surprising pair `3`, `Q`.

    /// A numeric value (e.g. `9`, `-3`, `#14`, `#-2`, `x7F`, `x-1`).
    ///
    /// The payload fits a 16-bit machine word under a signed or an
    /// unsigned reading, i.e. it lies in `[-32768, 65535]`.
    #[regex(r"\d\w*", lex_dec)]
    #[regex(r"#-?\w*", lex_dec)]
    #[regex(r"-\w*", lex_dec)]
    #[regex(r"[Xx][0-9A-Fa-f]\w*", lex_hex)]
    #[regex(r"[Xx]-\w*", lex_hex)]
    Int(i32),

    /// A register (`R0`-`R15`).
    #[regex(r"[Rr]\d+", lex_reg)]
    Reg(u8),

    /// An identifier: a mnemonic, or a label name. See [`Ident`].
    #[regex(r"[A-Za-z_]\w*", |lx| Ident::classify(lx.slice()))]
    Ident(Ident),

    /// An opening bracket, which starts a memory operand (e.g. `[R2]`).
    #[token("[")]
    LBracket,

    /// A closing bracket, which ends a memory operand.
    #[token("]")]
    RBracket,

    /// A colon, which terminates a label definition.
    #[token(":")]
    Colon,

    /// A comma, which delineates operands of an instruction.
    #[token(",")]
    Comma,

    /// A comment: a semicolon through the end of the line.
    #[regex(r";.*")]
    Comment,

    /// A new line.
    #[regex(r"\r?\n")]
    NewLine,
}
impl Token {
    pub(crate) fn is_whitespace(&self) -> bool {
        matches!(self, Token::NewLine)
    }
}

/// An identifier, classified case-insensitively: one of the fifteen
/// instruction mnemonics, or a label name for anything else.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Ident {
    /// `ADD`
    Add,
    /// `SUB`
    Sub,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `XOR`
    Xor,
    /// `MOVE`
    Move,
    /// `SHR`
    Shr,
    /// `SHL`
    Shl,
    /// `JUMP`
    Jump,
    /// `BEQ`
    Beq,
    /// `BNE`
    Bne,
    /// `BLT`
    Blt,
    /// `BGT`
    Bgt,
    /// `BLE`
    Ble,
    /// `BGE`
    Bge,
    /// Anything that is not a mnemonic.
    Label(String),
}
impl Ident {
    fn classify(text: &str) -> Self {
        match text.to_uppercase().as_str() {
            "ADD"  => Ident::Add,
            "SUB"  => Ident::Sub,
            "AND"  => Ident::And,
            "OR"   => Ident::Or,
            "XOR"  => Ident::Xor,
            "MOVE" => Ident::Move,
            "SHR"  => Ident::Shr,
            "SHL"  => Ident::Shl,
            "JUMP" => Ident::Jump,
            "BEQ"  => Ident::Beq,
            "BNE"  => Ident::Bne,
            "BLT"  => Ident::Blt,
            "BGT"  => Ident::Bgt,
            "BLE"  => Ident::Ble,
            "BGE"  => Ident::Bge,
            _ => Ident::Label(text.to_string()),
        }
    }
}

/// The ways a piece of input can fail to be a token.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum LexErr {
    /// Numeric literal falls outside the 16-bit machine word range.
    OutOfRange,
    /// Decimal literal contains a character that is not a digit.
    BadDigit,
    /// Hex literal contains a character that is not a hex digit.
    BadHexDigit,
    /// A numeric prefix (`#`, `#-`, `x-`) with no digits after it.
    EmptyNumber,
    /// Register index out of range (registers are `R0`-`R15`).
    BadReg,
    /// A character that no CB-16 token starts with.
    #[default]
    Unexpected,
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::OutOfRange  => f.write_str("numeric literal does not fit a 16-bit word"),
            LexErr::BadDigit    => f.write_str("invalid digit in decimal literal"),
            LexErr::BadHexDigit => f.write_str("invalid digit in hex literal"),
            LexErr::EmptyNumber => f.write_str("numeric literal has no digits"),
            LexErr::BadReg      => f.write_str("no such register"),
            LexErr::Unexpected  => f.write_str("unrecognized character"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::OutOfRange  => Some(format!("machine words cover [{}, {}]", i16::MIN, u16::MAX).into()),
            LexErr::BadDigit    => Some("decimal literals use digits 0-9".into()),
            LexErr::BadHexDigit => Some("hex literals use digits 0-9, A-F".into()),
            LexErr::EmptyNumber => Some("digits must follow the '#' or 'x' prefix".into()),
            LexErr::BadReg      => Some("registers run R0 through R15".into()),
            LexErr::Unexpected  => None,
        }
    }
}

fn lex_dec(lx: &Lexer<'_, Token>) -> Result<i32, LexErr> {
    parse_int(lx.slice().trim_start_matches('#'), 10)
}

fn lex_hex(lx: &Lexer<'_, Token>) -> Result<i32, LexErr> {
    parse_int(&lx.slice()[1..], 16)
}

fn lex_reg(lx: &Lexer<'_, Token>) -> Result<u8, LexErr> {
    match lx.slice()[1..].parse::<u8>() {
        Ok(n) if n < 16 => Ok(n),
        _ => Err(LexErr::BadReg),
    }
}

/// The validator behind the numeric tokens: an optional minus, then
/// digits of the given radix, the whole thing within the 16-bit machine
/// word range (either reading, so `[-32768, 65535]`).
fn parse_int(text: &str, radix: u32) -> Result<i32, LexErr> {
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1, text),
    };

    if digits.is_empty() {
        return Err(LexErr::EmptyNumber);
    }
    if !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(match radix {
            16 => LexErr::BadHexDigit,
            _  => LexErr::BadDigit,
        });
    }

    // a ridiculous run of digits overflows even i64; saturate and let the
    // range check below throw it out
    let magnitude = i64::from_str_radix(digits, radix).unwrap_or(i64::MAX);
    let value = sign * magnitude;
    match (i64::from(i16::MIN)..=i64::from(u16::MAX)).contains(&value) {
        true  => Ok(value as i32),
        false => Err(LexErr::OutOfRange),
    }
}
