//! Simulating and execution of CB-16 machine code.
//!
//! This module is focused on executing fully assembled code (i.e., [`ObjectFile`]).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates assembled code.
//! - [`mem`]: The module holding the machine constants, memories, and register file.
//! - [`cache`]: The module handling the data cache.
//!
//! # Execution model
//!
//! The simulator retires one instruction per revolution of a six-phase
//! state machine:
//!
//! ```text
//! FETCH_INSTR -> DECODE_INSTR -> CALCULATE_EA -> FETCH_OPERANDS
//!             -> EXECUTE_INSTR -> WRITE_BACK -> FETCH_INSTR ...
//! ```
//!
//! Not every instruction visits every phase: only `MOVE` computes an
//! effective address, and `MOVE` skips the execute phase entirely (its
//! operand fetch routes straight to write-back). Each phase hands over to
//! the next or stops the machine with a [`SimErr`].
//!
//! Every program terminates. Code memory is pre-filled with an illegal
//! instruction pattern, so falling off the end halts with
//! [`SimErr::IllegalOpcode`] (the ordinary way for a CB-16 program to
//! finish), and a branch counter bounds runaway loops. On any termination
//! the cache is flushed so data memory holds the program's final state.

pub mod mem;
pub mod cache;

use crate::asm::ObjectFile;
use crate::ast::reg_consts::R0;
use crate::ast::sim::{ArithOp, BranchInstr, MoveInstr, ShiftDir, SimInstr};
use crate::ast::ImmOrReg;

use self::cache::Cache;
use self::mem::{CodeMem, DataMem, HexLoadErr, RegFile};
use self::mem::{BRANCH_LIMIT, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_BLOCKS};

/// The causes that stop the machine.
///
/// Note that [`SimErr::IllegalOpcode`] is the ordinary way for a program
/// to end: code memory is pre-filled with an illegal pattern, so execution
/// falls off the end of the program and into a halt.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SimErr {
    /// The fetched word's (opcode, mode) pair is not a valid instruction.
    IllegalOpcode,
    /// The PC left code memory at fetch, or a data access was out of range.
    IllegalAddress,
    /// The branch counter exceeded [`BRANCH_LIMIT`].
    InfiniteLoop,
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::IllegalOpcode  => f.write_str("illegal instruction"),
            SimErr::IllegalAddress => f.write_str("illegal address"),
            SimErr::InfiniteLoop   => f.write_str("possible infinite loop"),
        }
    }
}
impl std::error::Error for SimErr {}
impl crate::err::Error for SimErr {}

/// The six phases of the instruction cycle.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Phase {
    /// Load `IR` from `code[PC]`.
    FetchInstr,
    /// Validate and decode `IR`.
    DecodeInstr,
    /// Latch the memory address register for `MOVE`.
    CalculateEa,
    /// Load the ALU inputs (or the MDR, for `MOVE`).
    FetchOperands,
    /// Run the ALU or evaluate the branch.
    ExecuteInstr,
    /// Commit the result and advance the PC.
    WriteBack,
}

/// Build-time machine configuration: the cache geometry.
///
/// Everything else about the machine (memory sizes, register count, the
/// branch limit) is fixed; see the constants in [`mem`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimConfig {
    /// Number of cache entries. Must be at least 1.
    pub cache_blocks: usize,
    /// Words per cache block. Must divide the data area evenly.
    pub block_size: usize,
}
impl Default for SimConfig {
    /// The default geometry: a single block of 8 words.
    fn default() -> Self {
        Self {
            cache_blocks: DEFAULT_CACHE_BLOCKS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// The processor-internal registers driven by the phase machine.
///
/// These are exposed for inspection (tests, halt diagnostics); mutating
/// them mid-run puts the machine in a state no program could reach.
#[derive(Debug, Default, Clone, Copy)]
pub struct Latches {
    /// Program counter (word index into code memory).
    pub pc: u16,
    /// Memory address register (word index into data memory).
    pub mar: u16,
    /// Memory data register.
    pub mdr: u16,
    /// The fetched instruction bytes, MSB first.
    pub ir: [u8; 2],
    /// Left ALU input.
    pub alu_x: u16,
    /// Right ALU input.
    pub alu_y: u16,
    /// ALU output.
    pub alu_z: u16,
}

/// Executes assembled code.
#[derive(Debug, Clone)]
pub struct Simulator {
    /// Instruction memory.
    pub code: CodeMem,
    /// Data memory. During execution, all traffic goes through [`Simulator::cache`].
    pub data: DataMem,
    /// The data cache.
    pub cache: Cache,
    /// The register file.
    pub reg_file: RegFile,
    /// The processor latches.
    pub latches: Latches,

    /// The instruction produced by the decode phase of the current cycle.
    decoded: Option<SimInstr>,
    /// Counted branches (jumps and taken conditional branches).
    branch_count: u64,
    /// The number of instructions retired since construction.
    pub instructions_run: u64,
}

impl Simulator {
    /// Creates a machine with empty memories and zeroed registers.
    ///
    /// # Panics
    ///
    /// Panics on an invalid cache geometry (see [`cache::Cache::new`]).
    pub fn new(config: SimConfig) -> Self {
        Self {
            code: CodeMem::new(),
            data: DataMem::new(),
            cache: Cache::new(config.cache_blocks, config.block_size),
            reg_file: RegFile::new(),
            latches: Latches::default(),
            decoded: None,
            branch_count: 0,
            instructions_run: 0,
        }
    }

    /// Loads an object file into code memory.
    pub fn load_object(&mut self, obj: &ObjectFile) {
        self.load_code_bytes(&obj.to_bytes());
    }

    /// Loads a raw object byte stream into code memory.
    ///
    /// See [`CodeMem::load_bytes`] for how short and over-long streams are
    /// handled.
    pub fn load_code_bytes(&mut self, bytes: &[u8]) {
        self.code.load_bytes(bytes);
    }

    /// Loads the hex data format into data memory. Returns the number of
    /// words loaded.
    pub fn load_data_hex(&mut self, src: &str) -> Result<usize, HexLoadErr> {
        self.data.load_hex(src)
    }

    /// The number of branches counted so far (jumps plus taken
    /// conditional branches).
    pub fn branch_count(&self) -> u64 {
        self.branch_count
    }

    /// Runs the machine to termination and returns the halt cause.
    ///
    /// The cache is flushed before returning, so [`Simulator::data`]
    /// reflects the program's final state.
    pub fn run(&mut self) -> SimErr {
        let cause = loop {
            if let Err(e) = self.step() {
                break e;
            }
        };

        self.cache.flush(&mut self.data);
        tracing::debug!(%cause, pc = self.latches.pc, "machine halted");
        cause
    }

    /// Runs at most `max_steps` instructions.
    ///
    /// Returns the halt cause (after flushing the cache) if the machine
    /// stopped, or `None` if the step budget ran out first.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Option<SimErr> {
        for _ in 0..max_steps {
            if let Err(e) = self.step() {
                self.cache.flush(&mut self.data);
                return Some(e);
            }
        }
        None
    }

    /// Executes one full instruction: a revolution of the phase machine.
    pub fn step(&mut self) -> Result<(), SimErr> {
        let mut phase = Phase::FetchInstr;
        loop {
            phase = self.run_phase(phase)?;
            if phase == Phase::FetchInstr {
                break;
            }
        }

        self.instructions_run += 1;
        Ok(())
    }

    /// Runs a single phase, returning the phase to run next.
    fn run_phase(&mut self, phase: Phase) -> Result<Phase, SimErr> {
        match phase {
            Phase::FetchInstr    => self.fetch_instr(),
            Phase::DecodeInstr   => self.decode_instr(),
            Phase::CalculateEa   => self.calculate_ea(),
            Phase::FetchOperands => self.fetch_operands(),
            Phase::ExecuteInstr  => self.execute_instr(),
            Phase::WriteBack     => self.write_back(),
        }
    }

    /// The instruction decoded in this cycle.
    fn instr(&self) -> SimInstr {
        self.decoded.unwrap_or_else(|| unreachable!("phases after decode always have an instruction"))
    }

    /// FETCH_INSTR: pull the word at the PC into the IR.
    fn fetch_instr(&mut self) -> Result<Phase, SimErr> {
        let Some(word) = self.code.get(self.latches.pc) else {
            return Err(SimErr::IllegalAddress);
        };

        // The MAR/MDR mirror the fetch the way the datapath would drive
        // them, even though the PC indexes code memory directly.
        self.latches.mar = self.latches.pc;
        self.latches.mdr = word;
        self.latches.ir = word.to_be_bytes();

        tracing::trace!(pc = self.latches.pc, ir = format_args!("{word:04x}"), "FETCH_INSTR");
        Ok(Phase::DecodeInstr)
    }

    /// DECODE_INSTR: validate the (opcode, mode) pair and classify the
    /// instruction. Only `MOVE` needs an effective address; everything
    /// else skips to the operand fetch.
    fn decode_instr(&mut self) -> Result<Phase, SimErr> {
        let instr = SimInstr::decode(u16::from_be_bytes(self.latches.ir))?;
        tracing::trace!(%instr, "DECODE_INSTR");

        let next = match instr {
            SimInstr::Move(_) => Phase::CalculateEa,
            _ => Phase::FetchOperands,
        };
        self.decoded = Some(instr);
        Ok(next)
    }

    /// CALCULATE_EA: latch the MAR from whichever register holds the
    /// memory address (the destination register for stores, the source
    /// register for loads). MOVE-immediate has no address.
    fn calculate_ea(&mut self) -> Result<Phase, SimErr> {
        match self.instr() {
            SimInstr::Move(MoveInstr::FromMem(_, addr) | MoveInstr::ToMem(addr, _)) => {
                self.latches.mar = self.reg_file[addr];
                tracing::trace!(mar = self.latches.mar, reg = %addr, "CALCULATE_EA");
            },
            _ => {}
        }
        Ok(Phase::FetchOperands)
    }

    /// FETCH_OPERANDS: load the ALU inputs, or for `MOVE` the MDR.
    ///
    /// All `MOVE` forms leave here for write-back directly; a memory
    /// source reads through the cache on the way.
    fn fetch_operands(&mut self) -> Result<Phase, SimErr> {
        let next = match self.instr() {
            SimInstr::Arith(_, r1, src) => {
                self.latches.alu_x = self.reg_file[r1];
                self.latches.alu_y = match src {
                    ImmOrReg::Imm(imm) => imm.get() as u16,
                    ImmOrReg::Reg(r2)  => self.reg_file[r2],
                };
                Phase::ExecuteInstr
            },
            SimInstr::Shift(r1, _) => {
                self.latches.alu_x = self.reg_file[r1];
                Phase::ExecuteInstr
            },
            SimInstr::Branch(BranchInstr::Jump(r1)) => {
                self.latches.alu_x = self.reg_file[r1];
                Phase::ExecuteInstr
            },
            SimInstr::Branch(BranchInstr::Cond(_, r1, off)) => {
                self.latches.alu_x = self.reg_file[r1];
                self.latches.alu_y = off.get() as u16;
                Phase::ExecuteInstr
            },
            SimInstr::Move(MoveInstr::Imm(_, imm)) => {
                self.latches.mdr = imm.get() as u16;
                Phase::WriteBack
            },
            SimInstr::Move(MoveInstr::ToMem(_, src)) => {
                self.latches.mdr = self.reg_file[src];
                Phase::WriteBack
            },
            SimInstr::Move(MoveInstr::FromMem(..)) => {
                self.latches.mdr = self.cache.read(self.latches.mar, &mut self.data)?;
                Phase::WriteBack
            },
        };

        tracing::trace!(
            alu_x = self.latches.alu_x,
            alu_y = self.latches.alu_y,
            mdr = self.latches.mdr,
            "FETCH_OPERANDS"
        );
        Ok(next)
    }

    /// EXECUTE_INSTR: run the ALU or evaluate the branch into `ALU_z`.
    fn execute_instr(&mut self) -> Result<Phase, SimErr> {
        let x = self.latches.alu_x;
        let y = self.latches.alu_y;

        self.latches.alu_z = match self.instr() {
            SimInstr::Arith(op, ..) => match op {
                ArithOp::Add => (x as i16).wrapping_add(y as i16) as u16,
                ArithOp::Sub => (x as i16).wrapping_sub(y as i16) as u16,
                ArithOp::And => x & y,
                ArithOp::Or  => x | y,
                ArithOp::Xor => x ^ y,
            },
            SimInstr::Shift(_, ShiftDir::Right) => x >> 1,
            SimInstr::Shift(_, ShiftDir::Left)  => x << 1,
            SimInstr::Branch(BranchInstr::Jump(_)) => {
                // the write-back increment makes the landing address x + 1
                self.count_branch()?;
                x
            },
            SimInstr::Branch(BranchInstr::Cond(cc, ..)) => {
                match cc.passes(x as i16, self.reg_file[R0] as i16) {
                    true => {
                        self.count_branch()?;
                        // the -1 cancels the unconditional increment,
                        // so the branch lands at PC + offset
                        self.latches.pc.wrapping_add(y).wrapping_sub(1)
                    },
                    // not taken: the PC rewrites itself (then increments)
                    false => self.latches.pc,
                }
            },
            SimInstr::Move(_) => unreachable!("MOVE routes from operand fetch to write-back"),
        };

        tracing::trace!(alu_z = self.latches.alu_z, "EXECUTE_INSTR");
        Ok(Phase::WriteBack)
    }

    /// WRITE_BACK: commit the result to a register, the PC, or data
    /// memory, then advance the PC.
    fn write_back(&mut self) -> Result<Phase, SimErr> {
        match self.instr() {
            SimInstr::Arith(_, r1, _) | SimInstr::Shift(r1, _) => {
                self.reg_file[r1] = self.latches.alu_z;
            },
            SimInstr::Branch(_) => {
                self.latches.pc = self.latches.alu_z;
            },
            SimInstr::Move(MoveInstr::Imm(r1, _) | MoveInstr::FromMem(r1, _)) => {
                self.reg_file[r1] = self.latches.mdr;
            },
            SimInstr::Move(MoveInstr::ToMem(..)) => {
                self.cache.write(self.latches.mar, self.latches.mdr, &mut self.data)?;
            },
        }

        // every instruction ends here, including branches that just wrote
        // the PC
        self.latches.pc = self.latches.pc.wrapping_add(1);

        tracing::trace!(pc = self.latches.pc, "WRITE_BACK");
        Ok(Phase::FetchInstr)
    }

    /// Counts a branch against the infinite-loop guard.
    fn count_branch(&mut self) -> Result<(), SimErr> {
        self.branch_count += 1;
        match self.branch_count > BRANCH_LIMIT {
            true  => Err(SimErr::InfiniteLoop),
            false => Ok(()),
        }
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}
