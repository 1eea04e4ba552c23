// SPDX-License-Identifier: BSD-3-Clause
use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;

use tracing_subscriber::{fmt, prelude::*};

use points_to::{analysis, Options, Pointee, Values};

mod cli;

fn setup_global_subscriber() {
    let filter_layer = tracing::level_filters::LevelFilter::TRACE;
    let fmt_layer = fmt::Layer::default().with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn pointee(values: &Values, p: &Pointee) -> String {
    let (v, off) = p;
    if *off >= 0 {
        format!("{} + {}", values.display(*v), off)
    } else {
        format!("{}", values.display(*v))
    }
}

fn main() -> Result<()> {
    let args = cli::Args::parse();

    if args.tracing {
        setup_global_subscriber();
    }

    let module_string = std::fs::read_to_string(&args.module)
        .with_context(|| format!("Couldn't read IR module at {}", args.module.display()))?;
    let ir_module: points_to::ir::Module =
        serde_json::from_str(&module_string).context("Couldn't deserialize IR module")?;
    let module = points_to::Module::new(&ir_module).context("Malformed IR module")?;

    let opts = Options { debug: args.debug };
    let sets = analysis(&module, &opts);

    if !args.quiet {
        let values = module.values();
        let mut entries: Vec<_> = sets.iter().collect();
        entries.sort_by_key(|(ptr, _)| **ptr);

        let mut stdout = io::stdout().lock();
        writeln!(stdout, "points-to")?;
        writeln!(stdout, "---------")?;
        for (ptr, set) in entries {
            let mut pointees: Vec<_> = set.iter().collect();
            pointees.sort();
            writeln!(
                stdout,
                "{} --> {{{}}}",
                pointee(values, ptr),
                pointees
                    .into_iter()
                    .map(|p| pointee(values, p))
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
        }
    }

    Ok(())
}
