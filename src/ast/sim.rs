//! Bytecode instructions.
//!
//! The key type here is [`SimInstr`], a decoded machine instruction.
//! [`SimInstr::decode`] and [`SimInstr::encode`] are the two halves of the
//! encoding contract shared by the assembler and the simulator; decoding
//! also enforces the ISA's valid (opcode, mode) table, rejecting anything
//! else as an illegal opcode.
//!
//! A machine word is laid out as:
//!
//! ```text
//! bit   15 14 13 | 12 11 10 | 9 8 7 6 | 5 4 3 2 | 1 0
//! field  opcode  |   mode   |   r1    |   r2    | imm_lo
//! ```
//!
//! The 6-bit literal spans bits 5..0 and therefore overlaps the `r2`
//! field; an instruction form carries either a register in `r2` or a
//! literal, never both.

use crate::ast::{ImmOrReg, Literal, Reg};
use crate::sim::SimErr;

const OP_ADD: u16    = 0b000;
const OP_SUB: u16    = 0b001;
const OP_AND: u16    = 0b010;
const OP_OR: u16     = 0b011;
const OP_XOR: u16    = 0b100;
const OP_MOVE: u16   = 0b101;
const OP_SHIFT: u16  = 0b110;
const OP_BRANCH: u16 = 0b111;

/// An operation of the arithmetic/logical group.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ArithOp {
    /// Signed 16-bit addition (wrapping).
    Add,
    /// Signed 16-bit subtraction (wrapping).
    Sub,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
}
impl ArithOp {
    fn opcode(self) -> u16 {
        match self {
            ArithOp::Add => OP_ADD,
            ArithOp::Sub => OP_SUB,
            ArithOp::And => OP_AND,
            ArithOp::Or  => OP_OR,
            ArithOp::Xor => OP_XOR,
        }
    }

    fn from_opcode(opcode: u16) -> Option<Self> {
        match opcode {
            OP_ADD => Some(ArithOp::Add),
            OP_SUB => Some(ArithOp::Sub),
            OP_AND => Some(ArithOp::And),
            OP_OR  => Some(ArithOp::Or),
            OP_XOR => Some(ArithOp::Xor),
            _ => None,
        }
    }
}
impl std::fmt::Display for ArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArithOp::Add => f.write_str("ADD"),
            ArithOp::Sub => f.write_str("SUB"),
            ArithOp::And => f.write_str("AND"),
            ArithOp::Or  => f.write_str("OR"),
            ArithOp::Xor => f.write_str("XOR"),
        }
    }
}

/// Direction of a `SHIFT` instruction (always by one bit, logical).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ShiftDir {
    /// Logical right shift by 1 (mode 0).
    Right,
    /// Left shift by 1 (mode 1).
    Left,
}

/// A decoded `MOVE` instruction.
///
/// The mode grid (mode bit 1 must be clear):
///
/// | mode | form |
/// |------|------|
/// | 0    | literal → register |
/// | 1    | memory → register (cache read) |
/// | 4, 5 | register → memory (cache write) |
///
/// Memory-to-memory moves do not exist. Mode 5 decodes identically to
/// mode 4: bit 0 is ignored whenever bit 2 is set.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MoveInstr {
    /// `MOVE Rd, #imm`: loads a sign-extended literal into `Rd`.
    Imm(Reg, Literal),
    /// `MOVE Rd, [Ra]`: reads data memory at the address in `Ra` into `Rd`.
    FromMem(Reg, Reg),
    /// `MOVE [Ra], Rs`: writes `Rs` to data memory at the address in `Ra`.
    ToMem(Reg, Reg),
}

/// The condition of a conditional branch, encoded in the mode field.
///
/// All conditions compare the instruction's register operand (signed)
/// against `R0` (signed).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BranchCond {
    /// `BEQ` (mode 1): branch if `R[r] == R[0]`.
    Eq,
    /// `BNE` (mode 2): branch if `R[r] != R[0]`.
    Ne,
    /// `BLT` (mode 3): branch if `R[r] < R[0]`.
    Lt,
    /// `BGT` (mode 4): branch if `R[r] > R[0]`.
    Gt,
    /// `BLE` (mode 5): branch if `R[r] <= R[0]`.
    Le,
    /// `BGE` (mode 6): branch if `R[r] >= R[0]`.
    Ge,
}
impl BranchCond {
    fn mode(self) -> u16 {
        match self {
            BranchCond::Eq => 1,
            BranchCond::Ne => 2,
            BranchCond::Lt => 3,
            BranchCond::Gt => 4,
            BranchCond::Le => 5,
            BranchCond::Ge => 6,
        }
    }

    fn from_mode(mode: u16) -> Option<Self> {
        match mode {
            1 => Some(BranchCond::Eq),
            2 => Some(BranchCond::Ne),
            3 => Some(BranchCond::Lt),
            4 => Some(BranchCond::Gt),
            5 => Some(BranchCond::Le),
            6 => Some(BranchCond::Ge),
            _ => None,
        }
    }

    /// Evaluates the condition against the operand register and `R0`.
    pub fn passes(self, operand: i16, r0: i16) -> bool {
        match self {
            BranchCond::Eq => operand == r0,
            BranchCond::Ne => operand != r0,
            BranchCond::Lt => operand < r0,
            BranchCond::Gt => operand > r0,
            BranchCond::Le => operand <= r0,
            BranchCond::Ge => operand >= r0,
        }
    }
}
impl std::fmt::Display for BranchCond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchCond::Eq => f.write_str("BEQ"),
            BranchCond::Ne => f.write_str("BNE"),
            BranchCond::Lt => f.write_str("BLT"),
            BranchCond::Gt => f.write_str("BGT"),
            BranchCond::Le => f.write_str("BLE"),
            BranchCond::Ge => f.write_str("BGE"),
        }
    }
}

/// A decoded `BRANCH` instruction.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum BranchInstr {
    /// `JUMP Rs` (mode 0): unconditional jump through a register.
    ///
    /// Because the write-back phase increments the PC after every
    /// instruction, the machine lands at `R[Rs] + 1`. A program that
    /// wants to reach address `A` must hold `A - 1` in the register.
    Jump(Reg),
    /// Conditional branch: compares the register against `R0` and, if the
    /// condition passes, moves the PC by the signed offset (relative to
    /// the branch instruction itself).
    Cond(BranchCond, Reg, Literal),
}

/// A decoded machine instruction.
///
/// This is a tagged variant over the four instruction groups; each form
/// carries only the fields it uses. [`SimInstr::encode`] produces the
/// canonical machine word for a form, and [`SimInstr::decode`] rejects any
/// (opcode, mode) pair outside the ISA table with
/// [`SimErr::IllegalOpcode`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// An arithmetic/logical instruction: `op Rd, Rs` or `op Rd, #imm`.
    ///
    /// `Rd` is both the left operand and the destination.
    Arith(ArithOp, Reg, ImmOrReg),
    /// `SHR Rd` / `SHL Rd`: logical shift of `Rd` by one.
    Shift(Reg, ShiftDir),
    /// A data-movement instruction. See [`MoveInstr`].
    Move(MoveInstr),
    /// A control-flow instruction. See [`BranchInstr`].
    Branch(BranchInstr),
}

/// Assembles the fields into a machine word.
///
/// `low` is the combined `r2`/`imm_lo` field (bits 5..0).
fn join(opcode: u16, mode: u16, r1: Reg, low: u16) -> u16 {
    debug_assert!(mode < 8 && low < 64);
    (opcode << 13) | (mode << 10) | (u16::from(r1.reg_no()) << 6) | low
}

fn reg_field(r2: Reg) -> u16 {
    u16::from(r2.reg_no()) << 2
}

impl SimInstr {
    /// Encodes this instruction as its canonical 16-bit machine word.
    pub fn encode(&self) -> u16 {
        match *self {
            SimInstr::Arith(op, r1, ImmOrReg::Imm(imm)) => join(op.opcode(), 0b000, r1, imm.bits()),
            SimInstr::Arith(op, r1, ImmOrReg::Reg(r2))  => join(op.opcode(), 0b001, r1, reg_field(r2)),
            SimInstr::Shift(r1, ShiftDir::Right)        => join(OP_SHIFT, 0b000, r1, 0),
            SimInstr::Shift(r1, ShiftDir::Left)         => join(OP_SHIFT, 0b001, r1, 0),
            SimInstr::Move(MoveInstr::Imm(r1, imm))     => join(OP_MOVE, 0b000, r1, imm.bits()),
            SimInstr::Move(MoveInstr::FromMem(r1, r2))  => join(OP_MOVE, 0b001, r1, reg_field(r2)),
            SimInstr::Move(MoveInstr::ToMem(r1, r2))    => join(OP_MOVE, 0b100, r1, reg_field(r2)),
            SimInstr::Branch(BranchInstr::Jump(r1))     => join(OP_BRANCH, 0b000, r1, 0),
            SimInstr::Branch(BranchInstr::Cond(cc, r1, off)) => join(OP_BRANCH, cc.mode(), r1, off.bits()),
        }
    }

    /// Decodes a 16-bit machine word.
    ///
    /// Any (opcode, mode) pair outside the ISA's table results in
    /// [`SimErr::IllegalOpcode`]. In particular, the `0xFFFF` word that
    /// fills unused code memory is illegal (`BRANCH` with mode 7), which
    /// is what makes running off the end of a program halt.
    pub fn decode(word: u16) -> Result<Self, SimErr> {
        let opcode = word >> 13;
        let mode = (word >> 10) & 0b111;
        let r1 = Reg(((word >> 6) & 0xF) as u8);
        let r2 = Reg(((word >> 2) & 0xF) as u8);
        let imm = Literal::from_bits(word);

        match opcode {
            OP_ADD | OP_SUB | OP_AND | OP_OR | OP_XOR => {
                let op = ArithOp::from_opcode(opcode).unwrap_or_else(|| unreachable!("opcode was matched as arithmetic"));
                match mode {
                    0b000 => Ok(SimInstr::Arith(op, r1, ImmOrReg::Imm(imm))),
                    0b001 => Ok(SimInstr::Arith(op, r1, ImmOrReg::Reg(r2))),
                    _ => Err(SimErr::IllegalOpcode),
                }
            },
            OP_SHIFT => match mode {
                0b000 => Ok(SimInstr::Shift(r1, ShiftDir::Right)),
                0b001 => Ok(SimInstr::Shift(r1, ShiftDir::Left)),
                _ => Err(SimErr::IllegalOpcode),
            },
            OP_MOVE => match mode {
                // mode bit 1 set would be a memory-to-memory move
                0b000 => Ok(SimInstr::Move(MoveInstr::Imm(r1, imm))),
                0b001 => Ok(SimInstr::Move(MoveInstr::FromMem(r1, r2))),
                // bit 0 is ignored when bit 2 is set
                0b100 | 0b101 => Ok(SimInstr::Move(MoveInstr::ToMem(r1, r2))),
                _ => Err(SimErr::IllegalOpcode),
            },
            OP_BRANCH => match mode {
                0b000 => Ok(SimInstr::Branch(BranchInstr::Jump(r1))),
                0b111 => Err(SimErr::IllegalOpcode),
                _ => {
                    let cc = BranchCond::from_mode(mode).unwrap_or_else(|| unreachable!("mode 1-6 is a valid condition"));
                    Ok(SimInstr::Branch(BranchInstr::Cond(cc, r1, imm)))
                },
            },
            _ => unreachable!("opcode field is 3 bits"),
        }
    }
}
impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimInstr::Arith(op, r1, src) => write!(f, "{op} {r1}, {src}"),
            SimInstr::Shift(r1, ShiftDir::Right) => write!(f, "SHR {r1}"),
            SimInstr::Shift(r1, ShiftDir::Left)  => write!(f, "SHL {r1}"),
            SimInstr::Move(MoveInstr::Imm(r1, imm))    => write!(f, "MOVE {r1}, {imm}"),
            SimInstr::Move(MoveInstr::FromMem(r1, r2)) => write!(f, "MOVE {r1}, [{r2}]"),
            SimInstr::Move(MoveInstr::ToMem(r1, r2))   => write!(f, "MOVE [{r1}], {r2}"),
            SimInstr::Branch(BranchInstr::Jump(r1))    => write!(f, "JUMP {r1}"),
            SimInstr::Branch(BranchInstr::Cond(cc, r1, off)) => write!(f, "{cc} {r1}, {off}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::ast::reg_consts::{R1, R2};

    fn roundtrip(instr: SimInstr) {
        let word = instr.encode();
        let back = SimInstr::decode(word).unwrap_or_else(|_| panic!("{instr} ({word:04X}) should decode"));
        assert_eq!(back, instr, "{instr} did not roundtrip through {word:04X}");
    }

    fn rand_reg(rng: &mut StdRng) -> Reg {
        Reg(rng.gen_range(0..16))
    }
    fn rand_imm(rng: &mut StdRng) -> Literal {
        Literal::new(rng.gen_range(-32..32)).unwrap()
    }

    #[test]
    fn test_field_layout() {
        // ADD R9, #-1: opcode 0, mode 0, r1 = 9, imm = 0b111111
        let instr = SimInstr::Arith(ArithOp::Add, Reg(9), ImmOrReg::Imm(Literal::new(-1).unwrap()));
        assert_eq!(instr.encode(), 0b000_000_1001_111111);

        // XOR R15, R3: opcode 4, mode 1, r1 = 15, r2 = 3
        let instr = SimInstr::Arith(ArithOp::Xor, Reg(15), ImmOrReg::Reg(Reg(3)));
        assert_eq!(instr.encode(), 0b100_001_1111_0011_00);

        // MOVE [R2], R7: opcode 5, mode 4
        let instr = SimInstr::Move(MoveInstr::ToMem(R2, Reg(7)));
        assert_eq!(instr.encode(), 0b101_100_0010_0111_00);

        // BEQ R1, #2: opcode 7, mode 1
        let instr = SimInstr::Branch(BranchInstr::Cond(BranchCond::Eq, R1, Literal::new(2).unwrap()));
        assert_eq!(instr.encode(), 0b111_001_0001_000010);
    }

    #[test]
    fn test_roundtrip_exhaustive_modes() {
        let imm = Literal::new(-32).unwrap();
        let off = Literal::new(31).unwrap();

        for op in [ArithOp::Add, ArithOp::Sub, ArithOp::And, ArithOp::Or, ArithOp::Xor] {
            roundtrip(SimInstr::Arith(op, R1, ImmOrReg::Imm(imm)));
            roundtrip(SimInstr::Arith(op, R1, ImmOrReg::Reg(R2)));
        }
        roundtrip(SimInstr::Shift(R1, ShiftDir::Right));
        roundtrip(SimInstr::Shift(R1, ShiftDir::Left));
        roundtrip(SimInstr::Move(MoveInstr::Imm(R1, imm)));
        roundtrip(SimInstr::Move(MoveInstr::FromMem(R1, R2)));
        roundtrip(SimInstr::Move(MoveInstr::ToMem(R1, R2)));
        roundtrip(SimInstr::Branch(BranchInstr::Jump(R1)));
        for cc in [BranchCond::Eq, BranchCond::Ne, BranchCond::Lt, BranchCond::Gt, BranchCond::Le, BranchCond::Ge] {
            roundtrip(SimInstr::Branch(BranchInstr::Cond(cc, R1, off)));
        }
    }

    #[test]
    fn test_roundtrip_random_fields() {
        let mut rng = StdRng::seed_from_u64(0x0CB1_6CB1);

        for _ in 0..5000 {
            let instr = match rng.gen_range(0..6) {
                0 => {
                    let op = [ArithOp::Add, ArithOp::Sub, ArithOp::And, ArithOp::Or, ArithOp::Xor][rng.gen_range(0..5)];
                    SimInstr::Arith(op, rand_reg(&mut rng), ImmOrReg::Imm(rand_imm(&mut rng)))
                },
                1 => {
                    let op = [ArithOp::Add, ArithOp::Sub, ArithOp::And, ArithOp::Or, ArithOp::Xor][rng.gen_range(0..5)];
                    SimInstr::Arith(op, rand_reg(&mut rng), ImmOrReg::Reg(rand_reg(&mut rng)))
                },
                2 => SimInstr::Shift(rand_reg(&mut rng), if rng.gen() { ShiftDir::Left } else { ShiftDir::Right }),
                3 => match rng.gen_range(0..3) {
                    0 => SimInstr::Move(MoveInstr::Imm(rand_reg(&mut rng), rand_imm(&mut rng))),
                    1 => SimInstr::Move(MoveInstr::FromMem(rand_reg(&mut rng), rand_reg(&mut rng))),
                    _ => SimInstr::Move(MoveInstr::ToMem(rand_reg(&mut rng), rand_reg(&mut rng))),
                },
                4 => SimInstr::Branch(BranchInstr::Jump(rand_reg(&mut rng))),
                _ => {
                    let cc = [BranchCond::Eq, BranchCond::Ne, BranchCond::Lt, BranchCond::Gt, BranchCond::Le, BranchCond::Ge][rng.gen_range(0..6)];
                    SimInstr::Branch(BranchInstr::Cond(cc, rand_reg(&mut rng), rand_imm(&mut rng)))
                },
            };
            roundtrip(instr);
        }
    }

    #[test]
    fn test_decode_rejects_invalid_modes() {
        // arithmetic/logical and shift: modes 2-7 are invalid
        for opcode in [0b000u16, 0b001, 0b010, 0b011, 0b100, 0b110] {
            for mode in 2..8 {
                let word = (opcode << 13) | (mode << 10);
                assert!(SimInstr::decode(word).is_err(), "opcode {opcode} mode {mode} should be illegal");
            }
        }
        // MOVE: any mode with bit 1 set is invalid
        for mode in [0b010u16, 0b011, 0b110, 0b111] {
            let word = (OP_MOVE << 13) | (mode << 10);
            assert!(SimInstr::decode(word).is_err(), "MOVE mode {mode} should be illegal");
        }
        // BRANCH: mode 7 is invalid
        assert!(SimInstr::decode((OP_BRANCH << 13) | (0b111 << 10)).is_err());
    }

    #[test]
    fn test_decode_mem_filler_is_illegal() {
        assert!(SimInstr::decode(0xFFFF).is_err());
    }

    #[test]
    fn test_decode_move_mode_5_alias() {
        // mode 5 decodes as register-to-memory, same as mode 4
        let canonical = SimInstr::Move(MoveInstr::ToMem(R1, R2));
        let word = canonical.encode() | (0b001 << 10);
        assert_eq!(SimInstr::decode(word).unwrap(), canonical);
    }

    #[test]
    fn test_literal_sign_extension() {
        // imm = 0b100000 must decode as -32, not 32
        let word = 0b000_000_0001_100000;
        let SimInstr::Arith(ArithOp::Add, r1, ImmOrReg::Imm(imm)) = SimInstr::decode(word).unwrap() else {
            panic!("expected ADD immediate");
        };
        assert_eq!(r1, R1);
        assert_eq!(imm.get(), -32);
    }
}
