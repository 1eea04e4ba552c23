// SPDX-License-Identifier: BSD-3-Clause
//! Flow-insensitive, field-sensitive, inclusion-based points-to analysis.
//!
//! The pipeline: the program-structure builder turns a module into a flat
//! rule-code sequence (resolving calls and returns through the call maps),
//! the solver runs the sequence to a fixpoint over the points-to store, and
//! a final pass prunes function-valued keys. [`analysis`] drives the whole
//! thing; the pieces stay public for clients that want the phases
//! separately.

pub mod rules;
pub mod solver;
pub mod structure;

use crate::module::Module;

pub use rules::{RuleCode, RuleKind};
pub use solver::{compute_points_to_sets, Pointee, Pointer, PointsToSet, PointsToSets};
pub use structure::ProgramStructure;

#[derive(Debug, Default)]
pub struct Options {
    /// Dump the extracted rule sequence to stderr before solving.
    pub debug: bool,
}

/// Run the analysis on a lowered module and hand back the finished store.
pub fn analysis(module: &Module, opts: &Options) -> PointsToSets {
    let program = ProgramStructure::new(module);

    if opts.debug {
        let values = module.values();
        eprintln!("rule codes");
        eprintln!("----------");
        for rc in program.rules() {
            eprintln!(
                "{:?} L={} R={}",
                rc.kind,
                values.display(rc.lvalue),
                values.display(rc.rvalue)
            );
        }
    }

    let mut sets = PointsToSets::new();
    compute_points_to_sets(&program, &mut sets);
    sets
}
