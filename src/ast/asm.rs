//! Source-code instructions.
//!
//! The types here represent parsed assembly statements before label
//! resolution:
//! - [`AsmInstr`]: one instruction as written in source (branch targets
//!   may still be labels),
//! - [`Stmt`]: an instruction plus the labels defined at its address and
//!   its source span.
//!
//! The assembler lowers these into [`SimInstr`]s by resolving labels
//! against the symbol table.
//!
//! [`SimInstr`]: crate::ast::sim::SimInstr

use std::ops::Range;

use crate::ast::sim::{ArithOp, BranchCond};
use crate::ast::{BranchTarget, ImmOrReg, Label, Literal, Reg};

/// An instruction as it appears in assembly source code.
///
/// This mirrors [`SimInstr`] except that conditional branch targets are
/// [`BranchTarget`]s, which may be unresolved labels.
///
/// [`SimInstr`]: crate::ast::sim::SimInstr
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AsmInstr {
    /// An arithmetic/logical instruction (`ADD`, `SUB`, `AND`, `OR`,
    /// `XOR`): `op Rd, Rs` or `op Rd, #imm`.
    Arith(ArithOp, Reg, ImmOrReg),
    /// `SHR Rd`: logical right shift by one.
    Shr(Reg),
    /// `SHL Rd`: left shift by one.
    Shl(Reg),
    /// `MOVE Rd, #imm`
    MoveImm(Reg, Literal),
    /// `MOVE Rd, [Ra]`
    MoveFromMem(Reg, Reg),
    /// `MOVE [Ra], Rs`
    MoveToMem(Reg, Reg),
    /// `JUMP Rs`
    Jump(Reg),
    /// A conditional branch (`BEQ`, `BNE`, `BLT`, `BGT`, `BLE`, `BGE`):
    /// `cc Rc, target`, where the target is a label or a signed offset.
    Br(BranchCond, Reg, BranchTarget),
}
impl std::fmt::Display for AsmInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsmInstr::Arith(op, r1, src)    => write!(f, "{op} {r1}, {src}"),
            AsmInstr::Shr(r1)               => write!(f, "SHR {r1}"),
            AsmInstr::Shl(r1)               => write!(f, "SHL {r1}"),
            AsmInstr::MoveImm(r1, imm)      => write!(f, "MOVE {r1}, {imm}"),
            AsmInstr::MoveFromMem(r1, r2)   => write!(f, "MOVE {r1}, [{r2}]"),
            AsmInstr::MoveToMem(r1, r2)     => write!(f, "MOVE [{r1}], {r2}"),
            AsmInstr::Jump(r1)              => write!(f, "JUMP {r1}"),
            AsmInstr::Br(cc, r1, target)    => write!(f, "{cc} {r1}, {target}"),
        }
    }
}

/// A statement in assembly source code: one instruction, any labels
/// defined at its address, and the source span it occupies.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stmt {
    /// The labels defined at this statement's address.
    pub labels: Vec<Label>,
    /// The instruction.
    pub instr: AsmInstr,
    /// The span of the statement (including its labels).
    pub span: Range<usize>,
}
