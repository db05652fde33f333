//! The CB-16 simulator front end.
//!
//! `sim <code.o> <data.hex>` loads an object file and an initial data
//! image, runs the machine to termination, and prints the halt cause, the
//! cache statistics, and a dump of final data memory.
//!
//! A halted program is a *successful* run (halting on an illegal opcode is
//! how CB-16 programs end), so the exit code is 0 for any halt and 1 only
//! for load failures. Set `RUST_LOG=cb16=trace` to watch the phase
//! machine work.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cb16::sim::{SimConfig, SimErr, Simulator};

#[derive(Parser, Debug)]
#[command(name = "sim", about = "Run a CB-16 object file on the cache-phased simulator")]
struct Opts {
    /// Object file produced by the assembler
    #[arg(value_name = "CODE.o")]
    code: PathBuf,

    /// Initial data memory as lines of 4-digit hex words
    #[arg(value_name = "DATA.hex")]
    data: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let code = std::fs::read(&opts.code)
        .with_context(|| format!("could not read code file {}", opts.code.display()))?;
    let data = std::fs::read_to_string(&opts.data)
        .with_context(|| format!("could not read data file {}", opts.data.display()))?;

    let mut sim = Simulator::new(SimConfig::default());
    sim.load_code_bytes(&code);
    sim.load_data_hex(&data)
        .with_context(|| format!("could not load data file {}", opts.data.display()))?;

    let halt = sim.run();

    let [ir0, ir1] = sim.latches.ir;
    let pc = sim.latches.pc;
    match halt {
        SimErr::IllegalOpcode => {
            println!("illegal instruction {ir0:02x}{ir1:02x} detected at address {pc:04x}");
        }
        SimErr::InfiniteLoop => {
            println!("possible infinite loop detected with instruction {ir0:02x}{ir1:02x} at address {pc:04x}");
        }
        SimErr::IllegalAddress => {
            println!(
                "illegal address {:04x} detected with instruction {ir0:02x}{ir1:02x} at address {pc:04x}",
                sim.latches.mar
            );
        }
    }
    println!();

    println!("There were a total of {}.", sim.cache.stats());
    println!();

    print!("{}", sim.data.hex_dump());
    Ok(())
}
