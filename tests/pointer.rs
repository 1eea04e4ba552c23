// To debug or develop a test, try `analysis(&module, &Options { debug: true })`

use std::collections::HashSet;

use points_to::analysis::{Options, ProgramStructure, RuleKind};
use points_to::ir::types::{array, function, int, pointer, structure, void, TypeRef};
use points_to::ir::{self, Callee, Constant, Instruction as I, Operand, Parameter};
use points_to::{analysis, Module, PointsToSets, ValueId};

// ------------------------------------------------------------------
// Helpers

fn module(globals: Vec<ir::Global>, functions: Vec<ir::Function>) -> ir::Module {
    ir::Module {
        name: "test".to_string(),
        pointer_size: 8,
        globals,
        functions,
    }
}

fn global(name: &str, ty: TypeRef) -> ir::Global {
    ir::Global {
        name: name.to_string(),
        ty,
        initializer: None,
        is_const: false,
    }
}

fn global_init(name: &str, ty: TypeRef, init: Constant) -> ir::Global {
    ir::Global {
        name: name.to_string(),
        ty,
        initializer: Some(init),
        is_const: false,
    }
}

fn func(name: &str, ret: TypeRef, params: Vec<Parameter>, body: Vec<I>) -> ir::Function {
    ir::Function {
        name: name.to_string(),
        ret,
        params,
        var_arg: false,
        body: Some(body),
    }
}

fn decl(name: &str, ret: TypeRef, params: Vec<Parameter>, var_arg: bool) -> ir::Function {
    ir::Function {
        name: name.to_string(),
        ret,
        params,
        var_arg,
        body: None,
    }
}

fn run(m: &ir::Module) -> (Module, PointsToSets) {
    let module = Module::new(m).unwrap();
    let sets = analysis(&module, &Options::default());
    (module, sets)
}

/// The points-to set under `(v, idx)` as a plain set of pairs.
fn pts(module: &Module, sets: &PointsToSets, v: ValueId, idx: i64) -> HashSet<(ValueId, i64)> {
    sets.get_points_to_set(module.values(), v, idx)
        .iter()
        .copied()
        .collect()
}

fn null() -> ValueId {
    points_to::Values::NULL
}

// ------------------------------------------------------------------
// Scenarios

/// Direct pointer assignment: a chain of pass-thru copies of `&a` leaves
/// every link pointing at `a`.
#[test]
fn direct_pointer_assignment() {
    let i8p = pointer(int(8));
    let m = module(
        vec![global("a", int(8)), global("b", int(8))],
        vec![func(
            "main",
            void(),
            vec![],
            vec![
                I::BitCast {
                    result: "p".to_string(),
                    ty: i8p.clone(),
                    value: Operand::global("a"),
                },
                I::BitCast {
                    result: "q".to_string(),
                    ty: i8p.clone(),
                    value: Operand::local("p"),
                },
                I::BitCast {
                    result: "r".to_string(),
                    ty: i8p,
                    value: Operand::local("q"),
                },
            ],
        )],
    );
    let (module, sets) = run(&m);
    let a = module.value_named("a").unwrap();
    for local in ["p", "q", "r"] {
        let v = module.local_named("main", local).unwrap();
        assert_eq!(pts(&module, &sets, v, -1), HashSet::from([(a, 0)]));
    }

    // Inclusion closure for `q = p` and `r = q`.
    let p = module.local_named("main", "p").unwrap();
    let q = module.local_named("main", "q").unwrap();
    let r = module.local_named("main", "r").unwrap();
    assert!(pts(&module, &sets, p, -1).is_subset(&pts(&module, &sets, q, -1)));
    assert!(pts(&module, &sets, q, -1).is_subset(&pts(&module, &sets, r, -1)));
}

/// Struct field sensitivity: a gep to field 1 of `{i32, i32*}` lands at
/// byte 8 of the slot, and a load through it sees what was stored there.
#[test]
fn struct_field_sensitivity() {
    let node = structure(vec![int(32), pointer(int(32))]);
    let m = module(
        vec![global("g", int(32))],
        vec![func(
            "main",
            void(),
            vec![],
            vec![
                I::Alloca {
                    result: "s".to_string(),
                    allocated: node.clone(),
                    count: None,
                },
                I::GetElementPtr {
                    result: "f1".to_string(),
                    ty: pointer(pointer(int(32))),
                    source: node,
                    base: Operand::local("s"),
                    indices: vec![Operand::int(0), Operand::int(1)],
                },
                I::Store {
                    value: Operand::global("g"),
                    pointer: Operand::local("f1"),
                },
                I::Load {
                    result: "x".to_string(),
                    ty: pointer(int(32)),
                    pointer: Operand::local("f1"),
                },
            ],
        )],
    );
    let (module, sets) = run(&m);
    let s = module.local_named("main", "s").unwrap();
    let f1 = module.local_named("main", "f1").unwrap();
    let x = module.local_named("main", "x").unwrap();
    let g = module.value_named("g").unwrap();

    assert_eq!(pts(&module, &sets, f1, -1), HashSet::from([(s, 8)]));
    assert_eq!(pts(&module, &sets, x, -1), HashSet::from([(g, 0)]));
    // The stored pointer lives under the field key.
    assert_eq!(pts(&module, &sets, s, 8), HashSet::from([(g, 0)]));
}

/// Array clamp: a gep past index 8 of a pointer array saturates at byte
/// offset 64 instead of recording the real offset.
#[test]
fn array_offsets_clamp_at_64() {
    let arr = array(pointer(int(8)), 100);
    let m = module(
        vec![global("a", int(8))],
        vec![func(
            "main",
            void(),
            vec![],
            vec![
                I::Alloca {
                    result: "slots".to_string(),
                    allocated: arr.clone(),
                    count: None,
                },
                I::GetElementPtr {
                    result: "gep".to_string(),
                    ty: pointer(pointer(int(8))),
                    source: arr,
                    base: Operand::local("slots"),
                    indices: vec![Operand::int(0), Operand::int(100)],
                },
                I::Store {
                    value: Operand::global("a"),
                    pointer: Operand::local("gep"),
                },
            ],
        )],
    );
    let (module, sets) = run(&m);
    let slots = module.local_named("main", "slots").unwrap();
    let gep = module.local_named("main", "gep").unwrap();
    // 100 * 8 = 800, clamped to 64.
    assert_eq!(pts(&module, &sets, gep, -1), HashSet::from([(slots, 64)]));
}

/// Indirect call resolution: a call through a function pointer of type
/// `i8* (i8*)` reaches both compatible definitions, passes the argument to
/// both formals, and flows both returns back into the call's value. The
/// functions themselves never become pointer keys.
#[test]
fn indirect_call_resolution() {
    let i8p = pointer(int(8));
    let fnty = function(i8p.clone(), vec![i8p.clone()], false);
    let id_body = |param: &str| {
        vec![I::Ret {
            value: Some(Operand::local(param)),
        }]
    };
    let m = module(
        vec![
            global("a", int(8)),
            global_init("fp_slot", pointer(fnty.clone()), Constant::Global("f".to_string())),
        ],
        vec![
            func("f", i8p.clone(), vec![Parameter::new("x", i8p.clone())], id_body("x")),
            func("g", i8p.clone(), vec![Parameter::new("y", i8p.clone())], id_body("y")),
            func(
                "main",
                void(),
                vec![],
                vec![
                    I::Store {
                        value: Operand::global("g"),
                        pointer: Operand::global("fp_slot"),
                    },
                    I::Load {
                        result: "fp".to_string(),
                        ty: pointer(fnty.clone()),
                        pointer: Operand::global("fp_slot"),
                    },
                    I::Call {
                        result: Some("call".to_string()),
                        fun_ty: fnty,
                        callee: Callee::Pointer(Operand::local("fp")),
                        args: vec![Operand::global("a")],
                    },
                ],
            ),
        ],
    );
    let (module, sets) = run(&m);
    let a = module.value_named("a").unwrap();
    let f = module.value_named("f").unwrap();
    let g = module.value_named("g").unwrap();
    let fp = module.local_named("main", "fp").unwrap();
    let call = module.local_named("main", "call").unwrap();
    let x = module.local_named("f", "x").unwrap();
    let y = module.local_named("g", "y").unwrap();

    // The loaded function pointer sees both the initializer and the store.
    assert_eq!(
        pts(&module, &sets, fp, -1),
        HashSet::from([(f, 0), (g, 0)])
    );
    // Argument rules fired for both candidates.
    assert_eq!(pts(&module, &sets, x, -1), HashSet::from([(a, 0)]));
    assert_eq!(pts(&module, &sets, y, -1), HashSet::from([(a, 0)]));
    // Return rules flowed back.
    assert_eq!(pts(&module, &sets, call, -1), HashSet::from([(a, 0)]));
    // No function-valued keys survive the prune.
    assert!(!sets.contains_key(f, -1));
    assert!(!sets.contains_key(g, -1));
}

/// Recursion guard: once three pointees over the same base accumulate in a
/// gep's set, further same-base offsets are suppressed.
#[test]
fn same_base_multiplicity_saturates_at_three() {
    let i8p = pointer(int(8));
    let node = structure(vec![int(32), i8p.clone()]);
    let node_p = pointer(node.clone());
    let gep = |result: &str, base: &str| I::GetElementPtr {
        result: result.to_string(),
        ty: node_p.clone(),
        source: node.clone(),
        base: Operand::local(base),
        indices: vec![Operand::int(0), Operand::int(1)],
    };
    let m = module(
        vec![],
        vec![func(
            "main",
            void(),
            vec![],
            vec![
                I::Call {
                    result: Some("n".to_string()),
                    fun_ty: function(node_p.clone(), vec![int(64)], false),
                    callee: Callee::Symbol("malloc".to_string()),
                    args: vec![Operand::int(16)],
                },
                gep("g1", "n"),
                gep("g2", "g1"),
                gep("g3", "g2"),
                I::Phi {
                    result: "p".to_string(),
                    ty: node_p.clone(),
                    values: vec![
                        Operand::local("n"),
                        Operand::local("g1"),
                        Operand::local("g2"),
                        Operand::local("g3"),
                    ],
                },
                gep("walk", "p"),
            ],
        ),
        decl("malloc", node_p.clone(), vec![Parameter::new("size", int(64))], false)],
    );
    let (module, sets) = run(&m);
    let n = module.local_named("main", "n").unwrap();
    let p = module.local_named("main", "p").unwrap();
    let walk = module.local_named("main", "walk").unwrap();

    // The phi accumulates four distinct offsets over the allocation.
    assert_eq!(
        pts(&module, &sets, p, -1),
        HashSet::from([(n, 0), (n, 8), (n, 16), (n, 24)])
    );
    // The gep over it never accumulates more than three pointees with the
    // same base; which ones survive depends on set iteration order.
    let walk_set = pts(&module, &sets, walk, -1);
    assert!(!walk_set.is_empty() && walk_set.len() <= 3);
    assert!(walk_set
        .iter()
        .all(|(v, off)| *v == n && [8, 16, 24, 32].contains(off)));
}

/// Unknown query: a value the rules never mention has no key; the query
/// returns the shared empty set.
#[test]
fn unknown_query_returns_empty_set() {
    let m = module(
        vec![],
        vec![func(
            "idle",
            void(),
            vec![Parameter::new("p", pointer(int(8)))],
            vec![],
        )],
    );
    let (module, sets) = run(&m);
    let p = module.local_named("idle", "p").unwrap();
    assert!(!sets.contains_key(p, -1));
    assert!(sets.get_points_to_set(module.values(), p, -1).is_empty());
}

// ------------------------------------------------------------------
// Properties

/// Adding instructions never removes pointees from previously computed
/// sets.
#[test]
fn rule_addition_is_monotone() {
    let i8p = pointer(int(8));
    let base_body = vec![
        I::Alloca {
            result: "s".to_string(),
            allocated: i8p.clone(),
            count: None,
        },
        I::Store {
            value: Operand::global("a"),
            pointer: Operand::local("s"),
        },
    ];
    let mut extended_body = base_body.clone();
    extended_body.push(I::Store {
        value: Operand::global("b"),
        pointer: Operand::local("s"),
    });

    let globals = || vec![global("a", int(8)), global("b", int(8))];
    let (m1, s1) = run(&module(globals(), vec![func("main", void(), vec![], base_body)]));
    let (m2, s2) = run(&module(globals(), vec![func("main", void(), vec![], extended_body)]));

    for (ptr, set) in s1.iter() {
        let bigger = pts(&m2, &s2, ptr.0, ptr.1);
        assert!(
            set.iter().all(|p| bigger.contains(p)),
            "set under {:?} shrank",
            ptr
        );
    }
    let s = m1.local_named("main", "s").unwrap();
    let a = m1.value_named("a").unwrap();
    let b = m2.value_named("b").unwrap();
    assert_eq!(pts(&m1, &s1, s, -1), HashSet::from([(a, 0)]));
    assert_eq!(pts(&m2, &s2, s, -1), HashSet::from([(a, 0), (b, 0)]));
}

/// Null stores propagate the shared sentinel.
#[test]
fn null_assignment_records_the_sentinel() {
    let i8p = pointer(int(8));
    let m = module(
        vec![],
        vec![func(
            "main",
            void(),
            vec![],
            vec![
                I::Alloca {
                    result: "s".to_string(),
                    allocated: i8p,
                    count: None,
                },
                I::Store {
                    value: Operand::null(),
                    pointer: Operand::local("s"),
                },
            ],
        )],
    );
    let (module, sets) = run(&m);
    let s = module.local_named("main", "s").unwrap();
    assert_eq!(pts(&module, &sets, s, -1), HashSet::from([(null(), 0)]));
}

/// Aggregate global initializers contribute one rule per referenced
/// symbol, nulls included.
#[test]
fn global_initializers_cover_aggregates() {
    let m = module(
        vec![
            global("a", int(8)),
            global_init(
                "tab",
                array(pointer(int(8)), 2),
                Constant::Array(vec![
                    Constant::Global("a".to_string()),
                    Constant::Null,
                ]),
            ),
        ],
        vec![],
    );
    let (module, sets) = run(&m);
    let tab = module.value_named("tab").unwrap();
    let a = module.value_named("a").unwrap();
    assert_eq!(
        pts(&module, &sets, tab, -1),
        HashSet::from([(a, 0), (null(), 0)])
    );
}

/// Allocation calls bind the call's value to itself as an allocation site;
/// non-allocating memory management contributes nothing.
#[test]
fn allocation_and_free_calls() {
    let i8p = pointer(int(8));
    let m = module(
        vec![],
        vec![
            func(
                "main",
                void(),
                vec![],
                vec![
                    I::Call {
                        result: Some("buf".to_string()),
                        fun_ty: function(i8p.clone(), vec![int(64)], false),
                        callee: Callee::Symbol("malloc".to_string()),
                        args: vec![Operand::int(32)],
                    },
                    I::Call {
                        result: None,
                        fun_ty: function(void(), vec![i8p.clone()], false),
                        callee: Callee::Symbol("free".to_string()),
                        args: vec![Operand::local("buf")],
                    },
                ],
            ),
            decl("malloc", i8p.clone(), vec![Parameter::new("size", int(64))], false),
            decl("free", void(), vec![Parameter::new("p", i8p)], false),
        ],
    );
    let (module, sets) = run(&m);
    let buf = module.local_named("main", "buf").unwrap();
    assert_eq!(pts(&module, &sets, buf, -1), HashSet::from([(buf, 0)]));
    // The free neither added rules nor keys for its formal.
    let free_p = module.local_named("free", "p").unwrap();
    assert!(!sets.contains_key(free_p, -1));
}

/// Calls with more actuals than formals skip the surplus; pointer formals
/// in the fixed prefix still get their rules.
#[test]
fn vararg_surplus_is_skipped() {
    let i8p = pointer(int(8));
    let m = module(
        vec![global("fmt", int(8)), global("x", int(8))],
        vec![
            func(
                "main",
                void(),
                vec![],
                vec![I::Call {
                    result: None,
                    fun_ty: function(void(), vec![i8p.clone()], true),
                    callee: Callee::Symbol("logmsg".to_string()),
                    args: vec![
                        Operand::global("fmt"),
                        Operand::global("x"),
                        Operand::int(7),
                    ],
                }],
            ),
            decl("logmsg", void(), vec![Parameter::new("fmt", i8p)], true),
        ],
    );
    let (module, sets) = run(&m);
    let fmt_param = module.local_named("logmsg", "fmt").unwrap();
    let fmt = module.value_named("fmt").unwrap();
    assert_eq!(
        pts(&module, &sets, fmt_param, -1),
        HashSet::from([(fmt, 0)])
    );
}

/// Offsets past the end of a bounded object are dropped rather than
/// recorded.
#[test]
fn out_of_bounds_gep_offsets_are_dropped() {
    let m = module(
        vec![global_init("cell", int(64), Constant::Int { value: 0 })],
        vec![func(
            "main",
            void(),
            vec![],
            vec![
                I::BitCast {
                    result: "p".to_string(),
                    ty: pointer(int(64)),
                    value: Operand::global("cell"),
                },
                I::GetElementPtr {
                    result: "past".to_string(),
                    ty: pointer(int(64)),
                    source: int(64),
                    base: Operand::local("p"),
                    indices: vec![Operand::int(2)],
                },
            ],
        )],
    );
    let (module, sets) = run(&m);
    let past = module.local_named("main", "past").unwrap();
    // (cell, 16) is past the 8-byte allocation; the set stays empty.
    assert!(sets.contains_key(past, -1));
    assert!(pts(&module, &sets, past, -1).is_empty());
}

/// Storing a loaded pointer through a computed pointer uses the
/// `*dst = *src` rule and copies cell contents.
#[test]
fn store_of_load_copies_through_both_derefs() {
    let i8p = pointer(int(8));
    let i8pp = pointer(i8p.clone());
    let m = module(
        vec![global("a", int(8))],
        vec![
            func(
                "copy",
                void(),
                vec![
                    Parameter::new("dst", i8pp.clone()),
                    Parameter::new("src", i8pp.clone()),
                ],
                vec![
                    I::Load {
                        result: "v".to_string(),
                        ty: i8p.clone(),
                        pointer: Operand::local("src"),
                    },
                    I::Store {
                        value: Operand::local("v"),
                        pointer: Operand::local("dst"),
                    },
                ],
            ),
            func(
                "main",
                void(),
                vec![],
                vec![
                    I::Alloca {
                        result: "as".to_string(),
                        allocated: i8p.clone(),
                        count: None,
                    },
                    I::Alloca {
                        result: "bs".to_string(),
                        allocated: i8p.clone(),
                        count: None,
                    },
                    I::BitCast {
                        result: "ap".to_string(),
                        ty: i8pp.clone(),
                        value: Operand::local("as"),
                    },
                    I::BitCast {
                        result: "bp".to_string(),
                        ty: i8pp.clone(),
                        value: Operand::local("bs"),
                    },
                    I::Store {
                        value: Operand::global("a"),
                        pointer: Operand::local("ap"),
                    },
                    I::Call {
                        result: None,
                        fun_ty: function(void(), vec![i8pp.clone(), i8pp.clone()], false),
                        callee: Callee::Symbol("copy".to_string()),
                        args: vec![Operand::local("bp"), Operand::local("ap")],
                    },
                ],
            ),
        ],
    );

    let module = Module::new(&m).unwrap();
    let program = ProgramStructure::new(&module);
    assert!(program
        .rules()
        .iter()
        .any(|rc| rc.kind == RuleKind::DrefVarAsgnDrefVar));

    let sets = analysis(&module, &Options::default());
    let a = module.value_named("a").unwrap();
    let asl = module.local_named("main", "as").unwrap();
    let bsl = module.local_named("main", "bs").unwrap();
    // The store through %ap filled (as, 0); copy moved it to (bs, 0).
    assert_eq!(pts(&module, &sets, asl, 0), HashSet::from([(a, 0)]));
    assert_eq!(pts(&module, &sets, bsl, 0), HashSet::from([(a, 0)]));
}

/// Direct calls to declarations still pair formals with actuals.
#[test]
fn direct_call_to_declaration_passes_arguments() {
    let i8p = pointer(int(8));
    let m = module(
        vec![global("a", int(8))],
        vec![
            func(
                "main",
                void(),
                vec![],
                vec![I::Call {
                    result: None,
                    fun_ty: function(void(), vec![i8p.clone()], false),
                    callee: Callee::Symbol("sink".to_string()),
                    args: vec![Operand::global("a")],
                }],
            ),
            decl("sink", void(), vec![Parameter::new("p", i8p)], false),
        ],
    );
    let (module, sets) = run(&m);
    let p = module.local_named("sink", "p").unwrap();
    let a = module.value_named("a").unwrap();
    assert_eq!(pts(&module, &sets, p, -1), HashSet::from([(a, 0)]));
}

/// Inline-assembly calls are skipped without touching the store.
#[test]
fn inline_assembly_calls_are_ignored() {
    let m = module(
        vec![],
        vec![func(
            "main",
            void(),
            vec![],
            vec![I::Call {
                result: None,
                fun_ty: function(void(), vec![], false),
                callee: Callee::Asm,
                args: vec![],
            }],
        )],
    );
    let (_, sets) = run(&m);
    assert!(sets.is_empty());
}

/// Indirect calls only reach prototype-compatible candidates: a callee
/// with a different arity is passed over.
#[test]
fn incompatible_arity_candidates_are_skipped() {
    let i8p = pointer(int(8));
    let unary = function(i8p.clone(), vec![i8p.clone()], false);
    let m = module(
        vec![global("a", int(8))],
        vec![
            func("one", i8p.clone(), vec![Parameter::new("x", i8p.clone())], vec![]),
            func(
                "two",
                i8p.clone(),
                vec![
                    Parameter::new("x", i8p.clone()),
                    Parameter::new("y", i8p.clone()),
                ],
                vec![],
            ),
            func(
                "main",
                void(),
                vec![Parameter::new("fp", pointer(unary.clone()))],
                vec![I::Call {
                    result: Some("call".to_string()),
                    fun_ty: unary,
                    callee: Callee::Pointer(Operand::local("fp")),
                    args: vec![Operand::global("a")],
                }],
            ),
        ],
    );
    let (module, sets) = run(&m);
    let a = module.value_named("a").unwrap();
    let one_x = module.local_named("one", "x").unwrap();
    let two_x = module.local_named("two", "x").unwrap();
    assert_eq!(pts(&module, &sets, one_x, -1), HashSet::from([(a, 0)]));
    assert!(!sets.contains_key(two_x, -1));
}
