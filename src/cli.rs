// SPDX-License-Identifier: BSD-3-Clause
use std::path::PathBuf;

/// Points-to analysis for pre-lowered IR modules
#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Dump the extracted rule codes before solving
    #[arg(long)]
    pub debug: bool,

    /// Don't print the points-to listing
    #[arg(long)]
    pub quiet: bool,

    /// IR module (JSON)
    #[arg()]
    pub module: PathBuf,

    /// Tracing
    #[arg(long)]
    pub tracing: bool,
}
