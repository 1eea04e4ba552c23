// SPDX-License-Identifier: BSD-3-Clause
//! The rule algebra: the closed set of abstract pointer assignments the
//! solver understands, and the translation from instructions and global
//! initializers into it. Each rule is a tag plus two value handles; the
//! solver dispatches on the tag.

use crate::ir::Constant;
use crate::module::{Instruction, Module, Opcode, ValueId, Values};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum RuleKind {
    /// `v = alloc(a)` — the call's value doubles as the allocation site.
    VarAsgnAlloc,
    /// `v = null`
    VarAsgnNull,
    /// `v = w`
    VarAsgnVar,
    /// `v = gep(..)` — the rvalue is the gep's own value; its base and
    /// indices live in the value table.
    VarAsgnGep,
    /// `v = &w`
    VarAsgnRefVar,
    /// `v = *w`
    VarAsgnDrefVar,
    /// `*v = null`
    DrefVarAsgnNull,
    /// `*v = w`
    DrefVarAsgnVar,
    /// `*v = &w`
    DrefVarAsgnRefVar,
    /// `*v = *w`
    DrefVarAsgnDrefVar,
    /// `dealloc(v)` — kept in the algebra; the transfer is a no-op.
    Dealloc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuleCode {
    pub kind: RuleKind,
    pub lvalue: ValueId,
    pub rvalue: ValueId,
}

impl RuleCode {
    pub fn new(kind: RuleKind, lvalue: ValueId, rvalue: ValueId) -> Self {
        RuleCode {
            kind,
            lvalue,
            rvalue,
        }
    }
}

/// Rule kind for passing `r` into `l` (formals and actuals, returns and
/// call results). The choice only looks at nullness and at which side
/// names a storage location.
pub(crate) fn arg_pass_rule_code(values: &Values, l: ValueId, r: ValueId) -> RuleCode {
    if values.is_null(r) {
        return RuleCode::new(RuleKind::VarAsgnNull, l, r);
    }
    let kind = match (values.has_extra_reference(l), values.has_extra_reference(r)) {
        (true, true) => RuleKind::VarAsgnVar,
        (true, false) => RuleKind::VarAsgnDrefVar,
        (false, true) => RuleKind::VarAsgnRefVar,
        (false, false) => RuleKind::VarAsgnVar,
    };
    RuleCode::new(kind, l, r)
}

/// Rules for one pointer-manipulating instruction (loads, stores, geps,
/// pass-thrus). Calls and returns are handled by the call maps.
pub(crate) fn instruction_rule_codes(values: &Values, i: &Instruction, out: &mut Vec<RuleCode>) {
    match &i.opcode {
        Opcode::Load { pointer: Some(p) } => {
            let x = i.result.expect("pointer load without result");
            if values.has_extra_reference(*p) {
                out.push(RuleCode::new(RuleKind::VarAsgnVar, x, *p));
            } else {
                out.push(RuleCode::new(RuleKind::VarAsgnDrefVar, x, *p));
            }
        }
        Opcode::Store {
            value: Some(r),
            pointer: Some(l),
        } => out.push(store_rule_code(values, *l, *r)),
        Opcode::Gep => {
            let g = i.result.expect("gep without result");
            debug_assert!(values.gep_info(g).is_some());
            out.push(RuleCode::new(RuleKind::VarAsgnGep, g, g));
        }
        Opcode::PassThru { sources } => {
            let x = i.result.expect("pass-thru without result");
            for s in sources.iter().flatten() {
                out.push(arg_pass_rule_code(values, x, *s));
            }
        }
        _ => {}
    }
}

fn store_rule_code(values: &Values, l: ValueId, r: ValueId) -> RuleCode {
    if values.has_extra_reference(l) {
        if values.is_null(r) {
            RuleCode::new(RuleKind::VarAsgnNull, l, r)
        } else if values.has_extra_reference(r) {
            RuleCode::new(RuleKind::VarAsgnRefVar, l, r)
        } else {
            RuleCode::new(RuleKind::VarAsgnVar, l, r)
        }
    } else if values.is_null(r) {
        RuleCode::new(RuleKind::DrefVarAsgnNull, l, r)
    } else if values.has_extra_reference(r) {
        RuleCode::new(RuleKind::DrefVarAsgnRefVar, l, r)
    } else if let Some(q) = values.loaded_from(r).filter(|q| !values.has_extra_reference(*q)) {
        // Storing a loaded pointer through a computed pointer is the
        // `*l = *q` form of the algebra.
        RuleCode::new(RuleKind::DrefVarAsgnDrefVar, l, q)
    } else {
        RuleCode::new(RuleKind::DrefVarAsgnVar, l, r)
    }
}

/// Rules for a global's pointer initializer: every referenced symbol is an
/// address the global's storage starts out holding. Aggregates recurse;
/// field offsets of aggregate initializers are not tracked.
pub(crate) fn global_init_rule_codes(
    module: &Module,
    g: ValueId,
    init: &Constant,
    out: &mut Vec<RuleCode>,
) {
    match init.elim_const_expr() {
        Constant::Null => out.push(RuleCode::new(RuleKind::VarAsgnNull, g, Values::NULL)),
        Constant::Global(s) => {
            if let Some(v) = module.value_named(s) {
                out.push(RuleCode::new(RuleKind::VarAsgnRefVar, g, v));
            } else {
                tracing::warn!("initializer of {} references unknown symbol @{}",
                    module.values().display(g), s);
            }
        }
        Constant::Array(elems) | Constant::Struct(elems) => {
            for c in elems {
                global_init_rule_codes(module, g, c, out);
            }
        }
        Constant::Int { .. } | Constant::Zero => {}
        // elim_const_expr never returns a wrapper.
        Constant::BitCast(_) | Constant::GetElementPtr { .. } => unreachable!(),
    }
}
