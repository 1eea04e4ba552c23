// SPDX-License-Identifier: BSD-3-Clause
use serde::{Deserialize, Serialize};

/// Constants as they appear in global initializers and instruction operands.
///
/// `BitCast` and `GetElementPtr` are constant-expression wrappers around
/// another constant; the analysis only ever looks through them via
/// [`Constant::elim_const_expr`].
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constant {
    Int { value: i64 },
    Null,
    /// The address of a global variable, function, or declaration.
    Global(String),
    BitCast(Box<Constant>),
    GetElementPtr { base: Box<Constant> },
    Array(Vec<Constant>),
    Struct(Vec<Constant>),
    /// `zeroinitializer`, `undef`, and anything else without pointer content.
    Zero,
}

impl Constant {
    /// Strip constant-expression wrappers down to the underlying constant.
    /// Offsets of constant GEP expressions are dropped.
    pub fn elim_const_expr(&self) -> &Constant {
        match self {
            Constant::BitCast(inner) => inner.elim_const_expr(),
            Constant::GetElementPtr { base } => base.elim_const_expr(),
            c => c,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.elim_const_expr(), Constant::Null)
    }
}
