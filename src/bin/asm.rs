//! The CB-16 assembler front end.
//!
//! `asm <input.asm>` assembles a source file and writes the object bytes
//! next to it as `<input>.o`. Exits 0 on success, 1 on any error, with
//! diagnostics (including source positions) on stderr.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cb16::asm::assemble;
use cb16::err;
use cb16::parse::parse_program;

#[derive(Parser, Debug)]
#[command(name = "asm", about = "Assemble CB-16 assembly into an object file")]
struct Opts {
    /// CB-16 assembly source file
    #[arg(value_name = "INPUT.asm")]
    input: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let filename = opts.input.display().to_string();
    let src = std::fs::read_to_string(&opts.input)
        .with_context(|| format!("could not read {filename}"))?;

    let ast = match parse_program(&src) {
        Ok(ast) => ast,
        Err(e) => bail!("{}", err::report(&filename, &src, &e).trim_end()),
    };
    let obj = match assemble(ast) {
        Ok(obj) => obj,
        Err(e) => bail!("{}", err::report(&filename, &src, &e).trim_end()),
    };

    let output = opts.input.with_extension("o");
    std::fs::write(&output, obj.to_bytes())
        .with_context(|| format!("could not write {}", output.display()))?;

    println!("assembled {} instruction(s) to {}", obj.len(), output.display());
    Ok(())
}
