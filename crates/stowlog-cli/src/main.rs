mod cli;
mod commands;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stowlog_core::SystemClock;
use stowlog_logging::DiagnosticsBuilder;

use cli::{Cli, Command};
use commands::RangeArgs;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr; stdout carries decoded records
    let _diagnostics = DiagnosticsBuilder::new()
        .with_level(&cli.log_level)
        .with_stderr(true)
        .init();

    let stdout = io::stdout();
    match cli.command {
        Command::List { dir } => commands::list(&dir, &mut stdout.lock())?,

        Command::Decode { file, params } => {
            let mut out = BufWriter::new(stdout.lock());
            commands::decode(&file, &params, &mut out)?;
            out.flush()?;
        }

        Command::Select {
            dir,
            params,
            types,
            begin,
            end,
            days,
            output,
        } => {
            let range = RangeArgs { begin, end, days };
            let clock = Arc::new(SystemClock);
            match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("cannot create {}", path.display()))?;
                    let mut out = BufWriter::new(file);
                    commands::select(&dir, &params, types, range, clock, &mut out)?;
                    out.flush()?;
                }
                None => {
                    let mut out = BufWriter::new(stdout.lock());
                    commands::select(&dir, &params, types, range, clock, &mut out)?;
                    out.flush()?;
                }
            }
        }
    }

    Ok(())
}
