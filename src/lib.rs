//! A CB-16 parser, assembler, and simulator.
//!
//! CB-16 is a tiny 16-bit teaching ISA: 8 opcodes, 16 registers, and a
//! data memory that is only reachable through a write-back, LRU-replaced
//! block cache. This crate is the full toolchain for it.
//!
//! # Usage
//!
//! To convert CB-16 source code to an object file, it must be parsed and assembled:
//! ```
//! use cb16::parse::parse_program;
//! use cb16::asm::{assemble, ObjectFile};
//!
//! let code = "
//!     MOVE R1, #3
//!     ADD R1, #4
//! ";
//! let ast = parse_program(code).unwrap();
//! let obj: ObjectFile = assemble(ast).unwrap();
//! ```
//!
//! Once an object file has been created, it can be executed with the simulator:
//! ```
//! # use cb16::parse::parse_program;
//! # use cb16::asm::assemble;
//! #
//! # let ast = parse_program("MOVE R1, #3\nADD R1, #4").unwrap();
//! # let obj = assemble(ast).unwrap();
//! #
//! use cb16::sim::Simulator;
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load_object(&obj);
//! let halt = simulator.run(); // <-- every program ends with a halt cause
//! assert_eq!(halt, cb16::sim::SimErr::IllegalOpcode); // ran off the end
//! assert_eq!(simulator.reg_file[cb16::ast::reg_consts::R1], 7);
//! ```
//!
//! Execution always terminates: code memory is pre-filled with an illegal
//! instruction, so running off the end of a program halts the machine, and
//! a branch counter catches runaway loops. See the [`sim`] module for
//! stepping, cache statistics, and the halt causes.
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
pub mod err;
