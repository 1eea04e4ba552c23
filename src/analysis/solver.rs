// SPDX-License-Identifier: BSD-3-Clause
//! The constraint solver: a monotone fixpoint over the points-to store,
//! with one transfer per rule kind and a field-sensitive gep transfer that
//! accumulates constant byte offsets with saturation.
//!
//! The store only ever grows, offsets are bounded by object sizes and the
//! array clamp, and the universe of values is finite, so the fixpoint
//! terminates.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

use crate::ir::Type;
use crate::layout::DataLayout;
use crate::module::{GepInfo, ValueId, Values};

use super::rules::{RuleCode, RuleKind};
use super::structure::ProgramStructure;

/// A location key: `(value, offset)`. Offset `-1` is the variable itself;
/// offsets `>= 0` are byte offsets into the object the value denotes.
pub type Pointer = (ValueId, i64);

/// Same shape as [`Pointer`]; the relation is typed purely by position.
pub type Pointee = (ValueId, i64);

pub type PointsToSet = HashSet<Pointee>;

/// The points-to relation. Reads during solving default-construct empty
/// sets, so every location a rule mentions ends up with a key; queries
/// after solving do not.
#[derive(Debug, Default)]
pub struct PointsToSets {
    sets: HashMap<Pointer, PointsToSet>,
    empty: PointsToSet,
}

impl PointsToSets {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, p: Pointer) -> &mut PointsToSet {
        self.sets.entry(p).or_default()
    }

    /// Snapshot of the set under `p`, creating the key if absent.
    fn snapshot(&mut self, p: Pointer) -> Vec<Pointee> {
        self.entry(p).iter().copied().collect()
    }

    fn insert(&mut self, p: Pointer, pointee: Pointee) -> bool {
        self.entry(p).insert(pointee)
    }

    fn extend(&mut self, p: Pointer, pointees: &[Pointee]) -> bool {
        let set = self.entry(p);
        let old_size = set.len();
        set.extend(pointees.iter().copied());
        old_size != set.len()
    }

    /// The points-to set recorded under `(v, idx)`. Unknown keys yield a
    /// shared empty set and a warning naming the value.
    pub fn get_points_to_set(&self, values: &Values, v: ValueId, idx: i64) -> &PointsToSet {
        match self.sets.get(&(v, idx)) {
            Some(set) => set,
            None => {
                warn!(
                    target: "PointsTo",
                    "No points-to set has been found: {}",
                    values.display(v)
                );
                &self.empty
            }
        }
    }

    pub fn contains_key(&self, v: ValueId, idx: i64) -> bool {
        self.sets.contains_key(&(v, idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pointer, &PointsToSet)> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Copy `PTS(w, -1)` into the set under `dest` — the `v = *w` transfer,
/// parameterized by destination so the `*v = *w` transfer can reuse it.
fn load_into(s: &mut PointsToSets, dest: Pointer, w: ValueId) -> bool {
    let pointers = s.snapshot((w, -1));
    let mut incoming: Vec<Pointee> = Vec::new();
    for p in pointers {
        incoming.extend(s.snapshot(p));
    }
    s.extend(dest, &incoming)
}

fn apply_rule(
    s: &mut PointsToSets,
    values: &Values,
    layout: &DataLayout,
    rc: &RuleCode,
) -> bool {
    let l = rc.lvalue;
    let r = rc.rvalue;
    match rc.kind {
        RuleKind::VarAsgnAlloc => s.insert((l, -1), (r, 0)),
        RuleKind::VarAsgnNull => s.insert((l, -1), (Values::NULL, 0)),
        RuleKind::VarAsgnVar => {
            let from = s.snapshot((r, -1));
            s.extend((l, -1), &from)
        }
        RuleKind::VarAsgnGep => apply_gep_rule(s, values, layout, l, r),
        RuleKind::VarAsgnRefVar => s.insert((l, -1), (r, 0)),
        RuleKind::VarAsgnDrefVar => load_into(s, (l, -1), r),
        RuleKind::DrefVarAsgnNull => {
            let dests = s.snapshot((l, -1));
            let mut change = false;
            for p in dests {
                change |= s.insert(p, (Values::NULL, 0));
            }
            change
        }
        RuleKind::DrefVarAsgnVar => {
            let dests = s.snapshot((l, -1));
            let from = s.snapshot((r, -1));
            let mut change = false;
            for p in dests {
                change |= s.extend(p, &from);
            }
            change
        }
        RuleKind::DrefVarAsgnRefVar => {
            let dests = s.snapshot((l, -1));
            let mut change = false;
            for p in dests {
                change |= s.insert(p, (r, 0));
            }
            change
        }
        RuleKind::DrefVarAsgnDrefVar => {
            let dests = s.snapshot((l, -1));
            let mut change = false;
            for p in dests {
                change |= load_into(s, p, r);
            }
            change
        }
        RuleKind::Dealloc => false,
    }
}

/// Walk the gep's indices through its source type, adding struct field
/// offsets and sequential element strides. Non-constant indices contribute
/// zero. Returns the accumulated byte offset and whether any sequential
/// step was taken.
fn accumulate_constant_offset(layout: &DataLayout, info: &GepInfo) -> (i64, bool) {
    let mut off: i64 = 0;
    let mut is_array = false;
    let mut cur = info.source.clone();

    for (step, idx) in info.indices.iter().enumerate() {
        if step == 0 {
            // The first index steps over the source type as a whole.
            if let Some(i) = idx {
                if *i != 0 {
                    off += i * layout.type_store_size(&cur) as i64;
                    is_array = true;
                }
            }
            continue;
        }
        match &*cur.clone() {
            Type::Struct { fields, packed } => {
                let field = (*idx)
                    .and_then(|i| usize::try_from(i).ok())
                    .filter(|i| *i < fields.len());
                let Some(i) = field else {
                    debug_assert!(false, "bad struct index in gep");
                    break;
                };
                if i != 0 {
                    let sl = layout.struct_layout(fields, *packed);
                    off += sl.element_offset(i) as i64;
                }
                cur = fields[i].clone();
            }
            Type::Array { element, .. } => {
                if let Some(i) = idx {
                    if *i != 0 {
                        off += i * layout.type_store_size(element) as i64;
                        is_array = true;
                    }
                }
                cur = element.clone();
            }
            _ => break,
        }
    }

    (off, is_array)
}

/// Offsets past the end of a bounded object are dropped. Only globals with
/// initializers and non-array stack slots have a known bound; negative sums
/// compare as huge unsigned values and are dropped with them.
fn check_offset(values: &Values, layout: &DataLayout, rv: ValueId, sum: i64) -> bool {
    if let Some(ty) = values.allocation_bound(rv) {
        if (sum as u64) >= layout.type_alloc_size(ty) {
            return false;
        }
    }
    true
}

fn clamp_offset(mut off: i64, is_array: bool) -> i64 {
    if off < 0 {
        debug!("negative gep offset, cropping to 0: {}", off);
        off = 0;
    }
    // Bounding array fanout trades soundness for termination speed on
    // large arrays.
    if is_array && off > 64 {
        off = 64;
    }
    off
}

fn apply_gep_rule(
    s: &mut PointsToSets,
    values: &Values,
    layout: &DataLayout,
    lval: ValueId,
    rval: ValueId,
) -> bool {
    let info = values
        .gep_info(rval)
        .expect("gep rule over a value with no gep record");
    let (off, is_array) = accumulate_constant_offset(layout, info);
    let base = info.base;

    if values.has_extra_reference(base) {
        return s.insert((lval, -1), (base, clamp_offset(off, is_array)));
    }

    let base_set = s.snapshot((base, -1));
    let l = s.entry((lval, -1));
    let mut change = false;
    for (rv, base_off) in base_set {
        debug_assert!(base_off >= 0);

        // Recursive structures would otherwise shift the same pointee
        // forever.
        if l.contains(&(rv, base_off)) {
            continue;
        }
        if off != 0 && (values.is_function(rv) || values.is_null(rv)) {
            continue;
        }

        let sum = base_off + off;
        if !check_offset(values, layout, rv, sum) {
            continue;
        }

        let mut same_count = 0;
        for (other, _) in l.iter() {
            if *other == rv {
                same_count += 1;
                if same_count >= 5 {
                    break;
                }
            }
        }
        if same_count >= 3 {
            debug!(
                "dropping gep pointee {} + {} (multiplicity)",
                values.display(rv),
                sum
            );
            continue;
        }

        change |= l.insert((rv, clamp_offset(sum, is_array)));
    }
    change
}

/// Iterate the rule sequence until a whole pass grows nothing, then drop
/// function-valued keys.
pub fn compute_points_to_sets(p: &ProgramStructure<'_>, s: &mut PointsToSets) {
    let layout = DataLayout::new(p.module());
    let values = p.module().values();

    let mut passes = 0usize;
    loop {
        let mut change = false;
        for rc in p.rules() {
            change |= apply_rule(s, values, &layout, rc);
        }
        passes += 1;
        if !change {
            break;
        }
    }
    trace!(passes, rules = p.rules().len(), "fixpoint converged");

    prune_by_type(values, s);
}

/// Drop every key whose value is a function; calling through one is
/// resolved by the call maps, so the keys carry no information. Pruning
/// pointee sets by pointed-to type is deliberately not done — it discards
/// too much in the presence of bitcasts.
pub fn prune_by_type(values: &Values, s: &mut PointsToSets) {
    s.sets.retain(|(v, _), _| !values.is_function(*v));
}
