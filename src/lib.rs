// SPDX-License-Identifier: BSD-3-Clause
//! Andersen-style points-to analysis over a pre-lowered IR.
//!
//! Given the IR of a whole program, the analysis computes, for every
//! pointer-typed location, an over-approximation of the `(value, offset)`
//! pairs it may reference at runtime. It is flow-, context-, and
//! path-insensitive, field-sensitive through constant gep offsets, and
//! resolves indirect calls by return- and parameter-type compatibility.
//!
//! See [`analysis::analysis`] for the entry point and [`ir`] for the input
//! language.

pub mod analysis;
pub mod ir;
pub mod layout;
pub mod module;

pub use analysis::{analysis, Options, Pointee, Pointer, PointsToSet, PointsToSets};
pub use layout::DataLayout;
pub use module::{Module, ValueId, Values};
