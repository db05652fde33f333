//! Parsing CB-16 assembly source code into an AST.
//!
//! This module is used to convert source code into a list of statements
//! ([`Stmt`]) that the assembler can process. The grammar is line-based:
//!
//! ```text
//! line  := label* [instr] [comment]
//! label := IDENT ':'
//! ```
//!
//! Labels may share a line with their instruction or stand on a line of
//! their own, in which case they attach to the next instruction.
//!
//! The module's key function is [`parse_program`].

pub mod lex;

use std::borrow::Cow;
use std::ops::Range;

use logos::Logos;

use crate::ast::asm::{AsmInstr, Stmt};
use crate::ast::sim::{ArithOp, BranchCond};
use crate::ast::{BranchTarget, ImmOrReg, Label, Literal, Reg};
use crate::err::ErrSpan;
use lex::{Ident, LexErr, Token};

/// Parses an assembly source file into a list of statements.
///
/// # Example
/// ```
/// use cb16::parse::parse_program;
///
/// let ast = parse_program("
///     MOVE R1, #10
///     LOOP: SUB R1, #1
///     BNE R1, LOOP
/// ").unwrap();
/// assert_eq!(ast.len(), 3);
/// assert_eq!(ast[1].labels[0].name, "LOOP");
/// ```
pub fn parse_program(src: &str) -> Result<Vec<Stmt>, ParseErr> {
    let mut tokens = vec![];
    for (m_token, span) in Token::lexer(src).spanned() {
        let token = m_token.map_err(|e| ParseErr::new(ParseErrKind::Lex(e), span.clone()))?;
        // comments carry no content, drop them here
        if !matches!(token, Token::Comment) {
            tokens.push((token, span));
        }
    }

    Parser { tokens, index: 0 }.parse_program()
}

/// Kinds of errors that can occur from parsing assembly code.
///
/// See [`ParseErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ParseErrKind {
    /// The lexer rejected a token.
    Lex(LexErr),
    /// Expected an instruction mnemonic, found something else.
    ExpectedInstr,
    /// Found an identifier where an instruction should be (a mnemonic typo,
    /// or a label missing its colon).
    UnknownMnemonic,
    /// Expected a register operand.
    ExpectedReg,
    /// Expected a comma between operands.
    ExpectedComma,
    /// Expected a closing bracket after a memory operand.
    ExpectedRBracket,
    /// Expected a register or immediate operand.
    ExpectedOperand,
    /// Expected a branch target (label or immediate offset).
    ExpectedTarget,
    /// Expected the end of the line after a complete instruction.
    ExpectedLineEnd,
    /// An immediate operand does not fit the 6-bit signed literal field.
    ImmOutOfRange,
    /// Labels at the end of the file with no instruction to attach to.
    DanglingLabels,
}
impl std::fmt::Display for ParseErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lex(e)           => e.fmt(f),
            Self::ExpectedInstr    => f.write_str("expected an instruction"),
            Self::UnknownMnemonic  => f.write_str("unknown instruction mnemonic"),
            Self::ExpectedReg      => f.write_str("expected a register"),
            Self::ExpectedComma    => f.write_str("expected a comma between operands"),
            Self::ExpectedRBracket => f.write_str("expected a closing bracket"),
            Self::ExpectedOperand  => f.write_str("expected a register or immediate operand"),
            Self::ExpectedTarget   => f.write_str("expected a label or immediate offset"),
            Self::ExpectedLineEnd  => f.write_str("expected the end of the line"),
            Self::ImmOutOfRange    => f.write_str("immediate value does not fit 6 signed bits"),
            Self::DanglingLabels   => f.write_str("label is not attached to an instruction"),
        }
    }
}

/// Error from parsing assembly code.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseErr {
    /// The kind of error.
    pub kind: ParseErrKind,
    /// The span in the source associated with this error.
    pub span: ErrSpan,
}
impl ParseErr {
    fn new<E: Into<ErrSpan>>(kind: ParseErrKind, span: E) -> Self {
        ParseErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for ParseErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrKind::Lex(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for ParseErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<Cow<str>> {
        match &self.kind {
            ParseErrKind::Lex(e)           => crate::err::Error::help(e),
            ParseErrKind::ExpectedInstr    => None,
            ParseErrKind::UnknownMnemonic  => Some("valid mnemonics are ADD, SUB, AND, OR, XOR, MOVE, SHR, SHL, JUMP, BEQ, BNE, BLT, BGT, BLE, BGE; labels are defined with a trailing colon".into()),
            ParseErrKind::ExpectedReg      => Some("registers are R0-R15".into()),
            ParseErrKind::ExpectedComma    => None,
            ParseErrKind::ExpectedRBracket => Some("memory operands look like [R2]".into()),
            ParseErrKind::ExpectedOperand  => None,
            ParseErrKind::ExpectedTarget   => None,
            ParseErrKind::ExpectedLineEnd  => Some("each line holds at most one instruction".into()),
            ParseErrKind::ImmOutOfRange    => Some(format!("literals cover [{}, {}]", Literal::MIN, Literal::MAX).into()),
            ParseErrKind::DanglingLabels   => Some("labels must precede an instruction".into()),
        }
    }
}

/// Validates a lexed number against the 6-bit signed literal field.
fn imm6(value: i32, span: Range<usize>) -> Result<Literal, ParseErr> {
    i16::try_from(value).ok()
        .and_then(Literal::new)
        .ok_or_else(|| ParseErr::new(ParseErrKind::ImmOutOfRange, span))
}

struct Parser {
    tokens: Vec<(Token, Range<usize>)>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(t, _)| t)
    }
    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.index + 1).map(|(t, _)| t)
    }
    fn advance(&mut self) -> Option<(Token, Range<usize>)> {
        let pair = self.tokens.get(self.index).cloned();
        if pair.is_some() { self.index += 1; }
        pair
    }
    /// The span of the current token (or an empty span at the end of input).
    fn here(&self) -> Range<usize> {
        match self.tokens.get(self.index) {
            Some((_, span)) => span.clone(),
            None => {
                let end = self.tokens.last().map_or(0, |(_, s)| s.end);
                end..end
            }
        }
    }

    fn parse_program(mut self) -> Result<Vec<Stmt>, ParseErr> {
        let mut stmts = vec![];
        let mut labels: Vec<Label> = vec![];
        let mut stmt_start: Option<usize> = None;

        loop {
            // skip blank lines (but not pending labels)
            while matches!(self.peek(), Some(t) if t.is_whitespace()) {
                self.index += 1;
            }

            let Some(token) = self.peek() else {
                break;
            };

            // label definition: IDENT ':'
            if matches!(token, Token::Ident(Ident::Label(_))) && matches!(self.peek2(), Some(Token::Colon)) {
                let Some((Token::Ident(Ident::Label(name)), span)) = self.advance() else {
                    unreachable!("peeked a label token");
                };
                self.index += 1; // colon
                stmt_start.get_or_insert(span.start);
                labels.push(Label::new(name, span));
                continue;
            }

            let start = stmt_start.take().unwrap_or_else(|| self.here().start);
            let instr = self.parse_instr()?;
            let end = self.tokens[..self.index].last().map_or(start, |(_, s)| s.end);

            // a complete instruction runs to the end of its line
            match self.peek() {
                None => {},
                Some(t) if t.is_whitespace() => { self.index += 1; },
                Some(_) => return Err(ParseErr::new(ParseErrKind::ExpectedLineEnd, self.here())),
            }

            stmts.push(Stmt {
                labels: std::mem::take(&mut labels),
                instr,
                span: start..end,
            });
        }

        if !labels.is_empty() {
            let spans: Vec<_> = labels.iter().map(|l| l.span()).collect();
            return Err(ParseErr::new(ParseErrKind::DanglingLabels, spans));
        }

        Ok(stmts)
    }

    fn parse_instr(&mut self) -> Result<AsmInstr, ParseErr> {
        let span = self.here();
        let Some((Token::Ident(id), _)) = self.advance() else {
            return Err(ParseErr::new(ParseErrKind::ExpectedInstr, span));
        };

        match id {
            Ident::Add => self.parse_arith(ArithOp::Add),
            Ident::Sub => self.parse_arith(ArithOp::Sub),
            Ident::And => self.parse_arith(ArithOp::And),
            Ident::Or  => self.parse_arith(ArithOp::Or),
            Ident::Xor => self.parse_arith(ArithOp::Xor),
            Ident::Shr => Ok(AsmInstr::Shr(self.parse_reg()?)),
            Ident::Shl => Ok(AsmInstr::Shl(self.parse_reg()?)),
            Ident::Move => self.parse_move(),
            Ident::Jump => Ok(AsmInstr::Jump(self.parse_reg()?)),
            Ident::Beq => self.parse_branch(BranchCond::Eq),
            Ident::Bne => self.parse_branch(BranchCond::Ne),
            Ident::Blt => self.parse_branch(BranchCond::Lt),
            Ident::Bgt => self.parse_branch(BranchCond::Gt),
            Ident::Ble => self.parse_branch(BranchCond::Le),
            Ident::Bge => self.parse_branch(BranchCond::Ge),
            Ident::Label(_) => Err(ParseErr::new(ParseErrKind::UnknownMnemonic, span)),
        }
    }

    /// Parses `op Rd, Rs` or `op Rd, #imm`.
    fn parse_arith(&mut self, op: ArithOp) -> Result<AsmInstr, ParseErr> {
        let r1 = self.parse_reg()?;
        self.parse_comma()?;

        let span = self.here();
        match self.advance() {
            Some((Token::Reg(n), _)) => Ok(AsmInstr::Arith(op, r1, ImmOrReg::Reg(Reg(n)))),
            Some((Token::Int(n), span)) => Ok(AsmInstr::Arith(op, r1, ImmOrReg::Imm(imm6(n, span)?))),
            _ => Err(ParseErr::new(ParseErrKind::ExpectedOperand, span)),
        }
    }

    /// Parses the three `MOVE` forms: `Rd, #imm`, `Rd, [Rs]`, `[Rd], Rs`.
    fn parse_move(&mut self) -> Result<AsmInstr, ParseErr> {
        if matches!(self.peek(), Some(Token::LBracket)) {
            // MOVE [Rd], Rs
            let addr = self.parse_mem_operand()?;
            self.parse_comma()?;
            let src = self.parse_reg()?;
            return Ok(AsmInstr::MoveToMem(addr, src));
        }

        let dst = self.parse_reg()?;
        self.parse_comma()?;

        let span = self.here();
        match self.peek() {
            Some(Token::LBracket) => {
                let addr = self.parse_mem_operand()?;
                Ok(AsmInstr::MoveFromMem(dst, addr))
            },
            Some(&Token::Int(n)) => {
                self.index += 1;
                Ok(AsmInstr::MoveImm(dst, imm6(n, span)?))
            },
            _ => Err(ParseErr::new(ParseErrKind::ExpectedOperand, span)),
        }
    }

    /// Parses `cc Rc, target` where the target is a label or immediate.
    fn parse_branch(&mut self, cc: BranchCond) -> Result<AsmInstr, ParseErr> {
        let r1 = self.parse_reg()?;
        self.parse_comma()?;

        let span = self.here();
        match self.advance() {
            Some((Token::Ident(Ident::Label(name)), span)) => {
                Ok(AsmInstr::Br(cc, r1, BranchTarget::Label(Label::new(name, span))))
            },
            Some((Token::Int(n), span)) => Ok(AsmInstr::Br(cc, r1, BranchTarget::Offset(imm6(n, span)?))),
            _ => Err(ParseErr::new(ParseErrKind::ExpectedTarget, span)),
        }
    }

    fn parse_reg(&mut self) -> Result<Reg, ParseErr> {
        let span = self.here();
        match self.advance() {
            Some((Token::Reg(n), _)) => Ok(Reg(n)),
            _ => Err(ParseErr::new(ParseErrKind::ExpectedReg, span)),
        }
    }

    /// Parses `[Rn]`.
    fn parse_mem_operand(&mut self) -> Result<Reg, ParseErr> {
        self.index += 1; // caller peeked the bracket
        let reg = self.parse_reg()?;
        let span = self.here();
        match self.advance() {
            Some((Token::RBracket, _)) => Ok(reg),
            _ => Err(ParseErr::new(ParseErrKind::ExpectedRBracket, span)),
        }
    }

    fn parse_comma(&mut self) -> Result<(), ParseErr> {
        let span = self.here();
        match self.advance() {
            Some((Token::Comma, _)) => Ok(()),
            _ => Err(ParseErr::new(ParseErrKind::ExpectedComma, span)),
        }
    }
}
