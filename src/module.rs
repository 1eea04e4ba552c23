// SPDX-License-Identifier: BSD-3-Clause
//! The analysis-amenable form of a program. [`Module::new`] interns every
//! value that can participate in the points-to relation into a side table
//! ([`Values`]) and lowers instruction operands to [`ValueId`]s. Handles are
//! plain indices: `Copy`, totally ordered, hashable, and stable for the
//! lifetime of the module, so the analysis never has to chase the IR
//! structure itself.
//!
//! Lowering happens in two passes per function because bodies may reference
//! a local before its defining instruction.

use std::collections::HashMap;
use std::fmt::Display;

use crate::ir::{self, Constant, Type, TypeRef};

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, thiserror::Error)]
pub struct Error(pub String);

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed module: {}", self.0)
    }
}

/// Handle of an interned value. Identity is the index into [`Values`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a gep needs at solve time: the (const-expr-stripped) base, the type
/// its indices walk into, and the indices themselves (`None` = not a
/// constant integer).
#[derive(Clone, Debug)]
pub struct GepInfo {
    pub base: ValueId,
    pub source: TypeRef,
    pub indices: Vec<Option<i64>>,
}

#[derive(Clone, Debug)]
pub(crate) enum LocalDef {
    Alloca { allocated: TypeRef, array: bool },
    Load { pointer: Option<ValueId> },
    Gep(GepInfo),
    Plain,
}

#[derive(Clone, Debug)]
enum ValueKind {
    Null,
    Global {
        allocated: TypeRef,
        has_initializer: bool,
    },
    Function {
        index: usize,
    },
    Parameter,
    Local(LocalDef),
}

#[derive(Clone, Debug)]
struct ValueInfo {
    name: String,
    ty: TypeRef,
    kind: ValueKind,
}

/// The value side table. All classification predicates of the analysis live
/// here.
#[derive(Debug)]
pub struct Values {
    infos: Vec<ValueInfo>,
}

impl Values {
    /// The shared null sentinel; always interned first.
    pub const NULL: ValueId = ValueId(0);

    fn new() -> Self {
        let mut values = Values { infos: Vec::new() };
        values.push(ValueInfo {
            name: "null".to_string(),
            ty: ir::types::pointer(ir::types::void()),
            kind: ValueKind::Null,
        });
        values
    }

    fn push(&mut self, info: ValueInfo) -> ValueId {
        let id = ValueId(self.infos.len() as u32);
        self.infos.push(info);
        id
    }

    fn set_local_def(&mut self, v: ValueId, def: LocalDef) {
        self.infos[v.index()].kind = ValueKind::Local(def);
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn ty(&self, v: ValueId) -> &TypeRef {
        &self.infos[v.index()].ty
    }

    pub fn name(&self, v: ValueId) -> &str {
        &self.infos[v.index()].name
    }

    pub fn is_pointer_value(&self, v: ValueId) -> bool {
        self.ty(v).is_pointer()
    }

    /// Whether `v` names a storage location (a global, a stack slot, or a
    /// function symbol) rather than carrying a pointer at runtime.
    pub fn has_extra_reference(&self, v: ValueId) -> bool {
        matches!(
            self.infos[v.index()].kind,
            ValueKind::Global { .. }
                | ValueKind::Function { .. }
                | ValueKind::Local(LocalDef::Alloca { .. })
        )
    }

    pub fn is_null(&self, v: ValueId) -> bool {
        v == Self::NULL
    }

    pub fn is_function(&self, v: ValueId) -> bool {
        matches!(self.infos[v.index()].kind, ValueKind::Function { .. })
    }

    pub fn function_index(&self, v: ValueId) -> Option<usize> {
        match self.infos[v.index()].kind {
            ValueKind::Function { index } => Some(index),
            _ => None,
        }
    }

    pub fn gep_info(&self, v: ValueId) -> Option<&GepInfo> {
        match &self.infos[v.index()].kind {
            ValueKind::Local(LocalDef::Gep(info)) => Some(info),
            _ => None,
        }
    }

    /// For load results, the pointer the value was loaded through.
    pub fn loaded_from(&self, v: ValueId) -> Option<ValueId> {
        match self.infos[v.index()].kind {
            ValueKind::Local(LocalDef::Load { pointer }) => pointer,
            _ => None,
        }
    }

    /// The allocated type bounding gep offsets into `v`: present for globals
    /// with initializers and for non-array stack slots.
    pub fn allocation_bound(&self, v: ValueId) -> Option<&TypeRef> {
        match &self.infos[v.index()].kind {
            ValueKind::Global {
                allocated,
                has_initializer: true,
            } => Some(allocated),
            ValueKind::Local(LocalDef::Alloca {
                allocated,
                array: false,
            }) => Some(allocated),
            _ => None,
        }
    }

    pub fn display(&self, v: ValueId) -> DisplayValue<'_> {
        DisplayValue { values: self, v }
    }
}

pub struct DisplayValue<'a> {
    values: &'a Values,
    v: ValueId,
}

impl Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = &self.values.infos[self.v.index()];
        match info.kind {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Global { .. } | ValueKind::Function { .. } => write!(f, "@{}", info.name),
            ValueKind::Parameter | ValueKind::Local(_) => write!(f, "%{}", info.name),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Callee {
    /// Direct call; index into [`Module::functions`].
    Function(usize),
    /// Indirect call through a value; `None` if the operand had no pointer
    /// meaning.
    Pointer(Option<ValueId>),
    Asm,
}

#[derive(Clone, Debug)]
pub struct Call {
    pub callee: Callee,
    pub args: Vec<Option<ValueId>>,
    /// The callee prototype as a `Type::Function`.
    pub fun_ty: TypeRef,
}

#[derive(Clone, Debug)]
pub enum Opcode {
    Alloca,
    Load {
        pointer: Option<ValueId>,
    },
    Store {
        value: Option<ValueId>,
        pointer: Option<ValueId>,
    },
    Gep,
    /// Bitcasts, pointer/int casts, phis, selects: the result is fed from
    /// every source.
    PassThru {
        sources: Vec<Option<ValueId>>,
    },
    Call(Call),
    Ret {
        value: Option<ValueId>,
    },
    Other,
}

#[derive(Clone, Debug)]
pub struct Instruction {
    pub result: Option<ValueId>,
    pub opcode: Opcode,
}

#[derive(Debug)]
pub struct Function {
    pub value: ValueId,
    pub name: String,
    pub fun_ty: TypeRef,
    pub params: Vec<ValueId>,
    pub defined: bool,
    pub body: Vec<Instruction>,
    locals: HashMap<String, ValueId>,
}

impl Function {
    pub fn return_type(&self) -> &TypeRef {
        match &*self.fun_ty {
            Type::Function { ret, .. } => ret,
            _ => unreachable!("function value without function type"),
        }
    }
}

#[derive(Debug)]
pub struct Global {
    pub value: ValueId,
    pub name: String,
    pub allocated: TypeRef,
    pub initializer: Option<Constant>,
    pub is_const: bool,
}

impl Global {
    /// Globals whose allocated type can hold pointers and that carry an
    /// initializer contribute rules at module load.
    pub fn is_pointer_initialization(&self) -> bool {
        self.initializer.is_some() && self.allocated.contains_pointer()
    }
}

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub pointer_size: u64,
    values: Values,
    symbols: HashMap<String, ValueId>,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(m: &ir::Module) -> Result<Self, Error> {
        let mut values = Values::new();
        let mut symbols: HashMap<String, ValueId> = HashMap::new();

        let mut globals = Vec::with_capacity(m.globals.len());
        for g in &m.globals {
            let value = values.push(ValueInfo {
                name: g.name.clone(),
                ty: ir::types::pointer(g.ty.clone()),
                kind: ValueKind::Global {
                    allocated: g.ty.clone(),
                    has_initializer: g.initializer.is_some(),
                },
            });
            if symbols.insert(g.name.clone(), value).is_some() {
                return Err(Error(format!("duplicate symbol @{}", g.name)));
            }
            globals.push(Global {
                value,
                name: g.name.clone(),
                allocated: g.ty.clone(),
                initializer: g.initializer.clone(),
                is_const: g.is_const,
            });
        }

        for (index, f) in m.functions.iter().enumerate() {
            let fun_ty = f.fun_ty();
            let value = values.push(ValueInfo {
                name: f.name.clone(),
                ty: ir::types::pointer(fun_ty),
                kind: ValueKind::Function { index },
            });
            if symbols.insert(f.name.clone(), value).is_some() {
                return Err(Error(format!("duplicate symbol @{}", f.name)));
            }
        }

        let mut functions = Vec::with_capacity(m.functions.len());
        for f in &m.functions {
            functions.push(Self::lower_function(&mut values, &symbols, f)?);
        }

        Ok(Module {
            name: m.name.clone(),
            pointer_size: m.pointer_size,
            values,
            symbols,
            globals,
            functions,
        })
    }

    fn lower_function(
        values: &mut Values,
        symbols: &HashMap<String, ValueId>,
        f: &ir::Function,
    ) -> Result<Function, Error> {
        let mut locals: HashMap<String, ValueId> = HashMap::new();

        let mut params = Vec::with_capacity(f.params.len());
        for p in &f.params {
            let value = values.push(ValueInfo {
                name: format!("{}:{}", f.name, p.name),
                ty: p.ty.clone(),
                kind: ValueKind::Parameter,
            });
            locals.insert(p.name.clone(), value);
            params.push(value);
        }

        let body = f.body.as_deref().unwrap_or(&[]);

        // First pass: intern every result so operands can refer to locals
        // defined later in the body.
        let mut results: Vec<Option<ValueId>> = Vec::with_capacity(body.len());
        for i in body {
            results.push(Self::intern_result(values, &mut locals, f, i)?);
        }

        // Second pass: resolve operands.
        let mut lowered = Vec::with_capacity(body.len());
        for (i, result) in body.iter().zip(&results) {
            lowered.push(Self::lower_instruction(
                values, symbols, &locals, f, i, *result,
            )?);
        }

        Ok(Function {
            value: *symbols.get(&f.name).expect("function symbol interned"),
            name: f.name.clone(),
            fun_ty: f.fun_ty(),
            params,
            defined: !f.is_declaration(),
            body: lowered,
            locals,
        })
    }

    fn intern_result(
        values: &mut Values,
        locals: &mut HashMap<String, ValueId>,
        f: &ir::Function,
        i: &ir::Instruction,
    ) -> Result<Option<ValueId>, Error> {
        let (name, ty, kind) = match i {
            ir::Instruction::Alloca {
                result,
                allocated,
                count,
            } => (
                result,
                ir::types::pointer(allocated.clone()),
                ValueKind::Local(LocalDef::Alloca {
                    allocated: allocated.clone(),
                    array: count.map_or(false, |c| c != 1),
                }),
            ),
            ir::Instruction::Load { result, ty, .. } => (
                result,
                ty.clone(),
                ValueKind::Local(LocalDef::Load { pointer: None }),
            ),
            ir::Instruction::GetElementPtr { result, ty, .. } => {
                (result, ty.clone(), ValueKind::Local(LocalDef::Plain))
            }
            ir::Instruction::BitCast { result, ty, .. }
            | ir::Instruction::PtrToInt { result, ty, .. }
            | ir::Instruction::IntToPtr { result, ty, .. }
            | ir::Instruction::Phi { result, ty, .. }
            | ir::Instruction::Select { result, ty, .. } => {
                (result, ty.clone(), ValueKind::Local(LocalDef::Plain))
            }
            ir::Instruction::Call {
                result: Some(result),
                fun_ty,
                ..
            } => {
                let ret = match &**fun_ty {
                    Type::Function { ret, .. } => ret.clone(),
                    _ => {
                        return Err(Error(format!(
                            "call prototype of %{} in @{} is not a function type",
                            result, f.name
                        )))
                    }
                };
                (result, ret, ValueKind::Local(LocalDef::Plain))
            }
            ir::Instruction::Other {
                result: Some(param),
            } => (
                &param.name,
                param.ty.clone(),
                ValueKind::Local(LocalDef::Plain),
            ),
            ir::Instruction::Store { .. }
            | ir::Instruction::Ret { .. }
            | ir::Instruction::Call { result: None, .. }
            | ir::Instruction::Other { result: None } => return Ok(None),
        };
        let value = values.push(ValueInfo {
            name: format!("{}:{}", f.name, name),
            ty,
            kind,
        });
        if locals.insert(name.clone(), value).is_some() {
            return Err(Error(format!("duplicate local %{} in @{}", name, f.name)));
        }
        Ok(Some(value))
    }

    fn lower_instruction(
        values: &mut Values,
        symbols: &HashMap<String, ValueId>,
        locals: &HashMap<String, ValueId>,
        f: &ir::Function,
        i: &ir::Instruction,
        result: Option<ValueId>,
    ) -> Result<Instruction, Error> {
        let resolve = |op: &ir::Operand| -> Result<Option<ValueId>, Error> {
            match op {
                ir::Operand::Local(name) => locals
                    .get(name)
                    .copied()
                    .map(Some)
                    .ok_or_else(|| Error(format!("bad local %{} in @{}", name, f.name))),
                ir::Operand::Constant(c) => match c.elim_const_expr() {
                    Constant::Null => Ok(Some(Values::NULL)),
                    Constant::Global(s) => symbols
                        .get(s)
                        .copied()
                        .map(Some)
                        .ok_or_else(|| Error(format!("unknown symbol @{}", s))),
                    _ => Ok(None),
                },
            }
        };

        let opcode = match i {
            ir::Instruction::Alloca { .. } => Opcode::Alloca,
            ir::Instruction::Load { pointer, .. } => {
                let pointer = resolve(pointer)?;
                values.set_local_def(
                    result.expect("load result interned"),
                    LocalDef::Load { pointer },
                );
                Opcode::Load { pointer }
            }
            ir::Instruction::Store { value, pointer } => Opcode::Store {
                value: resolve(value)?,
                pointer: resolve(pointer)?,
            },
            ir::Instruction::GetElementPtr {
                source,
                base,
                indices,
                ..
            } => {
                if let Some(base) = resolve(base)? {
                    let indices = indices
                        .iter()
                        .map(|op| match op {
                            ir::Operand::Constant(Constant::Int { value }) => Some(*value),
                            _ => None,
                        })
                        .collect();
                    values.set_local_def(
                        result.expect("gep result interned"),
                        LocalDef::Gep(GepInfo {
                            base,
                            source: source.clone(),
                            indices,
                        }),
                    );
                }
                Opcode::Gep
            }
            ir::Instruction::BitCast { value, .. }
            | ir::Instruction::PtrToInt { value, .. }
            | ir::Instruction::IntToPtr { value, .. } => Opcode::PassThru {
                sources: vec![resolve(value)?],
            },
            ir::Instruction::Phi {
                values: incoming, ..
            } => Opcode::PassThru {
                sources: incoming.iter().map(&resolve).collect::<Result<_, _>>()?,
            },
            ir::Instruction::Select {
                true_value,
                false_value,
                ..
            } => Opcode::PassThru {
                sources: vec![resolve(true_value)?, resolve(false_value)?],
            },
            ir::Instruction::Call {
                fun_ty,
                callee,
                args,
                ..
            } => {
                if !matches!(&**fun_ty, Type::Function { .. }) {
                    return Err(Error(format!(
                        "call prototype in @{} is not a function type",
                        f.name
                    )));
                }
                let callee = match callee {
                    ir::Callee::Symbol(name) => {
                        let v = symbols
                            .get(name)
                            .copied()
                            .ok_or_else(|| Error(format!("unknown symbol @{}", name)))?;
                        match values.function_index(v) {
                            Some(index) => Callee::Function(index),
                            None => {
                                return Err(Error(format!(
                                    "call of non-function symbol @{}",
                                    name
                                )))
                            }
                        }
                    }
                    ir::Callee::Pointer(op) => match resolve(op)? {
                        Some(v) => match values.function_index(v) {
                            Some(index) => Callee::Function(index),
                            None => Callee::Pointer(Some(v)),
                        },
                        None => Callee::Pointer(None),
                    },
                    ir::Callee::Asm => Callee::Asm,
                };
                Opcode::Call(Call {
                    callee,
                    args: args.iter().map(&resolve).collect::<Result<_, _>>()?,
                    fun_ty: fun_ty.clone(),
                })
            }
            ir::Instruction::Ret { value } => Opcode::Ret {
                value: value.as_ref().map(&resolve).transpose()?.flatten(),
            },
            ir::Instruction::Other { .. } => Opcode::Other,
        };
        Ok(Instruction { result, opcode })
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// Look up a global or function by name.
    pub fn value_named(&self, name: &str) -> Option<ValueId> {
        self.symbols.get(name).copied()
    }

    /// Look up a parameter or instruction result by function and name.
    pub fn local_named(&self, function: &str, name: &str) -> Option<ValueId> {
        self.functions
            .iter()
            .find(|f| f.name == function)
            .and_then(|f| f.locals.get(name).copied())
    }

    /// Whether the instruction assigns through or between pointers, i.e.
    /// whether rule extraction owns it. Calls and returns are never pointer
    /// manipulations; the builder's call-map branches own those.
    pub fn is_pointer_manipulation(&self, i: &Instruction) -> bool {
        match &i.opcode {
            Opcode::Load { pointer } => {
                pointer.is_some()
                    && i.result
                        .map_or(false, |r| self.values.is_pointer_value(r))
            }
            Opcode::Store { value, pointer } => {
                pointer.is_some()
                    && value.map_or(false, |v| self.values.is_pointer_value(v))
            }
            Opcode::Gep => i
                .result
                .map_or(false, |r| self.values.gep_info(r).is_some()),
            Opcode::PassThru { sources } => i.result.map_or(false, |r| {
                self.values.is_pointer_value(r)
                    || sources
                        .iter()
                        .flatten()
                        .any(|s| self.values.is_pointer_value(*s))
            }),
            Opcode::Alloca | Opcode::Call(_) | Opcode::Ret { .. } | Opcode::Other => false,
        }
    }
}

/// Functions that allocate memory; a call to one binds the call's value to
/// a fresh allocation site.
pub fn is_memory_allocation(name: &str) -> bool {
    matches!(
        name,
        "malloc" | "calloc" | "realloc" | "reallocarray" | "_Znwm" | "_Znam"
    )
}

/// Memory-management functions, allocating or not. Calls to the
/// non-allocating ones contribute no rules.
pub fn memory_man_stuff(name: &str) -> bool {
    is_memory_allocation(name) || matches!(name, "free" | "cfree" | "_ZdlPv" | "_ZdaPv")
}
