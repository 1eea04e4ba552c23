// SPDX-License-Identifier: BSD-3-Clause
//! The pre-lowered IR of a whole program: types, constants, instructions,
//! functions, globals, and the module that ties them together. This is the
//! surface the analysis consumes; producing it (parsing, linking, lowering
//! from a frontend) is somebody else's job. Everything derives serde so a
//! module can be loaded from JSON.
//!
//! Bodies are flat instruction lists. The analysis is flow-insensitive, so
//! the IR carries no basic-block structure.

use serde::{Deserialize, Serialize};

pub mod constant;
pub mod instruction;
pub mod types;

pub use constant::Constant;
pub use instruction::{Callee, Instruction, Operand};
pub use types::{Type, TypeRef};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeRef,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Parameter {
            name: name.into(),
            ty,
        }
    }
}

/// A function definition or declaration; `body: None` is a declaration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub ret: TypeRef,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub var_arg: bool,
    #[serde(default)]
    pub body: Option<Vec<Instruction>>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    /// The function's prototype as a `Type::Function`.
    pub fn fun_ty(&self) -> TypeRef {
        types::function(
            self.ret.clone(),
            self.params.iter().map(|p| p.ty.clone()).collect(),
            self.var_arg,
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    /// The allocated type, i.e. what the global's address points at.
    pub ty: TypeRef,
    #[serde(default)]
    pub initializer: Option<Constant>,
    #[serde(default)]
    pub is_const: bool,
}

fn default_pointer_size() -> u64 {
    8
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_pointer_size")]
    pub pointer_size: u64,
    #[serde(default)]
    pub globals: Vec<Global>,
    #[serde(default)]
    pub functions: Vec<Function>,
}
