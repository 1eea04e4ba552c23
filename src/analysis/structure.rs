// SPDX-License-Identifier: BSD-3-Clause
//! The program structure: the flat rule-code sequence extracted from a
//! module, and the call maps that bind call sites to callees.
//!
//! Extraction order is source order (globals first, then every function's
//! body front to back), so repeated runs over the same module produce the
//! same sequence. The fixpoint's result doesn't depend on it; iteration
//! counts do.

use std::collections::HashMap;

use tracing::warn;

use crate::ir::{Type, TypeRef};
use crate::module::{
    is_memory_allocation, memory_man_stuff, Call, Callee, Module, Opcode, ValueId,
};

use super::rules::{
    arg_pass_rule_code, global_init_rule_codes, instruction_rule_codes, RuleCode, RuleKind,
};

pub struct ProgramStructure<'m> {
    module: &'m Module,
    rules: Vec<RuleCode>,
}

impl<'m> ProgramStructure<'m> {
    pub fn new(module: &'m Module) -> Self {
        let mut rules = Vec::new();

        for g in &module.globals {
            if g.is_pointer_initialization() {
                let init = g.initializer.as_ref().expect("checked initializer");
                global_init_rule_codes(module, g.value, init, &mut rules);
            }
        }

        let mut call_maps = CallMaps::new(module);

        for (f_idx, f) in module.functions.iter().enumerate() {
            for i in &f.body {
                if module.is_pointer_manipulation(i) {
                    instruction_rule_codes(module.values(), i, &mut rules);
                } else if let Opcode::Call(call) = &i.opcode {
                    if !matches!(call.callee, Callee::Asm) {
                        call_maps.collect_call_rule_codes(module, i.result, call, &mut rules);
                    }
                } else if let Opcode::Ret { value: Some(v) } = &i.opcode {
                    call_maps.collect_return_rule_codes(module, f_idx, *v, &mut rules);
                }
            }
        }

        ProgramStructure { module, rules }
    }

    pub fn module(&self) -> &'m Module {
        self.module
    }

    pub fn rules(&self) -> &[RuleCode] {
        &self.rules
    }
}

fn return_type(fun_ty: &TypeRef) -> &TypeRef {
    match &**fun_ty {
        Type::Function { ret, .. } => ret,
        _ => unreachable!("call prototype is not a function type"),
    }
}

/// Casting is lax in the source languages this IR comes from; any pointer
/// may be passed where another pointer is expected. Over-approximate.
fn compatible_types(t1: &TypeRef, t2: &TypeRef) -> bool {
    (t1.is_pointer() && t2.is_pointer()) || t1 == t2
}

/// Prototype compatibility: arity must match when neither side is
/// variadic, return types must be compatible, and so must every parameter
/// pair in the common prefix.
fn compatible_fun_types(f1: &TypeRef, f2: &TypeRef) -> bool {
    let (Type::Function {
        ret: ret1,
        params: params1,
        var_arg: var_arg1,
    }, Type::Function {
        ret: ret2,
        params: params2,
        var_arg: var_arg2,
    }) = (&**f1, &**f2)
    else {
        return false;
    };

    if !*var_arg1 && !*var_arg2 && params1.len() != params2.len() {
        return false;
    }
    if !compatible_types(ret1, ret2) {
        return false;
    }
    params1
        .iter()
        .zip(params2)
        .all(|(p1, p2)| compatible_types(p1, p2))
}

/// One call site as the return-rule collection sees it.
struct CallSite {
    value: Option<ValueId>,
    callee: Callee,
    fun_ty: TypeRef,
}

/// Two multimaps keyed by return type: `functions` holds every defined
/// function (plus memory managers whose address is stored somewhere), and
/// `calls` holds every call site that isn't inline assembly or a
/// memory-management intrinsic. Both exist only while rules are extracted.
pub(crate) struct CallMaps {
    functions: HashMap<TypeRef, Vec<usize>>,
    calls: HashMap<TypeRef, Vec<CallSite>>,
    vararg_warnings: u32,
}

impl CallMaps {
    pub(crate) fn new(module: &Module) -> Self {
        let mut functions: HashMap<TypeRef, Vec<usize>> = HashMap::new();
        let mut calls: HashMap<TypeRef, Vec<CallSite>> = HashMap::new();
        let values = module.values();

        for (idx, f) in module.functions.iter().enumerate() {
            if f.defined {
                functions
                    .entry(f.return_type().clone())
                    .or_default()
                    .push(idx);
            }

            for i in &f.body {
                match &i.opcode {
                    Opcode::Call(call) => {
                        if matches!(call.callee, Callee::Asm) {
                            continue;
                        }
                        if let Callee::Function(callee_idx) = call.callee {
                            if memory_man_stuff(&module.functions[callee_idx].name) {
                                continue;
                            }
                        }
                        calls
                            .entry(return_type(&call.fun_ty).clone())
                            .or_default()
                            .push(CallSite {
                                value: i.result,
                                callee: call.callee.clone(),
                                fun_ty: call.fun_ty.clone(),
                            });
                    }
                    Opcode::Store { value: Some(r), .. } => {
                        // A memory manager whose address is taken is never
                        // defined in the module but may still be called
                        // indirectly; index it.
                        if values.has_extra_reference(*r) {
                            if let Some(fn_idx) = values.function_index(*r) {
                                let f = &module.functions[fn_idx];
                                if memory_man_stuff(&f.name) {
                                    functions
                                        .entry(f.return_type().clone())
                                        .or_default()
                                        .push(fn_idx);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        CallMaps {
            functions,
            calls,
            vararg_warnings: 0,
        }
    }

    /// Rules for one call site. Direct callees are handled immediately;
    /// indirect calls try every known function with the same return type
    /// and a compatible prototype.
    pub(crate) fn collect_call_rule_codes(
        &mut self,
        module: &Module,
        result: Option<ValueId>,
        call: &Call,
        out: &mut Vec<RuleCode>,
    ) {
        assert!(
            !matches!(call.callee, Callee::Asm),
            "inline assembly is not supported"
        );

        match &call.callee {
            Callee::Function(idx) => self.collect_callee_rule_codes(module, result, call, *idx, out),
            Callee::Pointer(_) => {
                let candidates = match self.functions.get(return_type(&call.fun_ty)) {
                    Some(c) => c.clone(),
                    None => return,
                };
                for idx in candidates {
                    if compatible_fun_types(&call.fun_ty, &module.functions[idx].fun_ty) {
                        self.collect_callee_rule_codes(module, result, call, idx, out);
                    }
                }
            }
            Callee::Asm => unreachable!(),
        }
    }

    fn collect_callee_rule_codes(
        &mut self,
        module: &Module,
        result: Option<ValueId>,
        call: &Call,
        callee_idx: usize,
        out: &mut Vec<RuleCode>,
    ) {
        let f = &module.functions[callee_idx];

        if memory_man_stuff(&f.name) && !is_memory_allocation(&f.name) {
            return;
        }
        if is_memory_allocation(&f.name) {
            if let Some(v) = result {
                out.push(RuleCode::new(RuleKind::VarAsgnAlloc, v, v));
            }
            return;
        }

        let values = module.values();
        let mut i = 0;
        while i < f.params.len() && i < call.args.len() {
            let formal = f.params[i];
            if values.is_pointer_value(formal) {
                if let Some(actual) = call.args[i] {
                    out.push(arg_pass_rule_code(values, formal, actual));
                }
            }
            i += 1;
        }

        if i < call.args.len() && self.vararg_warnings < 3 {
            self.vararg_warnings += 1;
            warn!(
                "skipped some vararg arguments in '{}({}, {})'",
                f.name,
                i,
                call.args.len()
            );
        }
    }

    /// Rules flowing a function's pointer-typed return value into every
    /// call site that may observe it: direct calls of the function, and
    /// indirect calls with a compatible prototype.
    pub(crate) fn collect_return_rule_codes(
        &self,
        module: &Module,
        f_idx: usize,
        ret_val: ValueId,
        out: &mut Vec<RuleCode>,
    ) {
        let values = module.values();
        if !values.is_pointer_value(ret_val) {
            return;
        }

        let f = &module.functions[f_idx];
        let Some(sites) = self.calls.get(f.return_type()) else {
            return;
        };
        for site in sites {
            let matched = match &site.callee {
                Callee::Function(idx) => *idx == f_idx,
                Callee::Pointer(_) => compatible_fun_types(&f.fun_ty, &site.fun_ty),
                Callee::Asm => false,
            };
            if matched {
                if let Some(call_value) = site.value {
                    out.push(arg_pass_rule_code(values, call_value, ret_val));
                }
            }
        }
    }
}
