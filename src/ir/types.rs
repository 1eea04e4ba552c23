// SPDX-License-Identifier: BSD-3-Clause
use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub type TypeRef = Arc<Type>;

/// The type language of the pre-lowered IR. Types are compared and hashed
/// structurally; the lowering shares them behind [`TypeRef`].
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Void,
    Int {
        bits: u32,
    },
    Double,
    Pointer {
        pointee: TypeRef,
    },
    Array {
        element: TypeRef,
        len: u64,
    },
    Struct {
        fields: Vec<TypeRef>,
        packed: bool,
    },
    Function {
        ret: TypeRef,
        params: Vec<TypeRef>,
        var_arg: bool,
    },
}

impl Type {
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    pub fn pointee(&self) -> Option<&TypeRef> {
        match self {
            Type::Pointer { pointee } => Some(pointee),
            _ => None,
        }
    }

    /// Whether a value of this type can transitively hold a pointer.
    pub fn contains_pointer(&self) -> bool {
        match self {
            Type::Pointer { .. } => true,
            Type::Array { element, .. } => element.contains_pointer(),
            Type::Struct { fields, .. } => fields.iter().any(|f| f.contains_pointer()),
            Type::Void | Type::Int { .. } | Type::Double | Type::Function { .. } => false,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int { bits } => write!(f, "i{}", bits),
            Type::Double => write!(f, "double"),
            Type::Pointer { pointee } => write!(f, "{}*", pointee),
            Type::Array { element, len } => write!(f, "[{} x {}]", len, element),
            Type::Struct { fields, packed } => {
                if *packed {
                    write!(f, "<")?;
                }
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, "}}")?;
                if *packed {
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Function {
                ret,
                params,
                var_arg,
            } => {
                write!(f, "{} (", ret)?;
                for (i, param) in params.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                if *var_arg {
                    if !params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
        }
    }
}

pub fn void() -> TypeRef {
    Arc::new(Type::Void)
}

pub fn int(bits: u32) -> TypeRef {
    Arc::new(Type::Int { bits })
}

pub fn double() -> TypeRef {
    Arc::new(Type::Double)
}

pub fn pointer(pointee: TypeRef) -> TypeRef {
    Arc::new(Type::Pointer { pointee })
}

pub fn array(element: TypeRef, len: u64) -> TypeRef {
    Arc::new(Type::Array { element, len })
}

pub fn structure(fields: Vec<TypeRef>) -> TypeRef {
    Arc::new(Type::Struct {
        fields,
        packed: false,
    })
}

pub fn packed_structure(fields: Vec<TypeRef>) -> TypeRef {
    Arc::new(Type::Struct {
        fields,
        packed: true,
    })
}

pub fn function(ret: TypeRef, params: Vec<TypeRef>, var_arg: bool) -> TypeRef {
    Arc::new(Type::Function {
        ret,
        params,
        var_arg,
    })
}
