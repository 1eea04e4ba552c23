// SPDX-License-Identifier: BSD-3-Clause
use serde::{Deserialize, Serialize};

use super::constant::Constant;
use super::types::TypeRef;
use super::Parameter;

#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Local(String),
    Constant(Constant),
}

impl Operand {
    pub fn local(name: impl Into<String>) -> Self {
        Operand::Local(name.into())
    }

    pub fn global(name: impl Into<String>) -> Self {
        Operand::Constant(Constant::Global(name.into()))
    }

    pub fn null() -> Self {
        Operand::Constant(Constant::Null)
    }

    pub fn int(value: i64) -> Self {
        Operand::Constant(Constant::Int { value })
    }
}

/// What a call goes through. `Symbol` is a direct reference to a function by
/// name; `Pointer` is an indirect call through an operand; `Asm` is an
/// inline-assembly block, which the analysis does not model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Callee {
    Symbol(String),
    Pointer(Operand),
    Asm,
}

/// One pre-lowered instruction. Only pointer-relevant opcodes are
/// distinguished; everything else is `Other`, kept solely so its result name
/// stays resolvable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Instruction {
    Alloca {
        result: String,
        allocated: TypeRef,
        /// Element count; `None` means a single slot. Counts other than one
        /// mark an array allocation.
        #[serde(default)]
        count: Option<u64>,
    },
    Load {
        result: String,
        ty: TypeRef,
        pointer: Operand,
    },
    Store {
        value: Operand,
        pointer: Operand,
    },
    GetElementPtr {
        result: String,
        ty: TypeRef,
        /// The type the base pointer points at; indices walk into it.
        source: TypeRef,
        base: Operand,
        indices: Vec<Operand>,
    },
    BitCast {
        result: String,
        ty: TypeRef,
        value: Operand,
    },
    PtrToInt {
        result: String,
        ty: TypeRef,
        value: Operand,
    },
    IntToPtr {
        result: String,
        ty: TypeRef,
        value: Operand,
    },
    Phi {
        result: String,
        ty: TypeRef,
        values: Vec<Operand>,
    },
    Select {
        result: String,
        ty: TypeRef,
        true_value: Operand,
        false_value: Operand,
    },
    Call {
        #[serde(default)]
        result: Option<String>,
        /// The callee prototype as a `Type::Function`.
        fun_ty: TypeRef,
        callee: Callee,
        args: Vec<Operand>,
    },
    Ret {
        #[serde(default)]
        value: Option<Operand>,
    },
    Other {
        #[serde(default)]
        result: Option<Parameter>,
    },
}
