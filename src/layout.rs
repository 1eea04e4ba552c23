// SPDX-License-Identifier: BSD-3-Clause
//! Byte-level layout of IR types: store sizes, alloc sizes, and struct
//! field offsets. The gep rule asks these questions at solve time; sizes
//! follow the usual ABI rules (integers align to their width capped at the
//! pointer size, aggregates to their widest field, packed structs to one).

use crate::ir::{Type, TypeRef};
use crate::module::Module;

#[derive(Clone, Copy, Debug)]
pub struct DataLayout {
    pointer_size: u64,
}

#[derive(Clone, Debug)]
pub struct StructLayout {
    pub offsets: Vec<u64>,
    pub size: u64,
}

impl StructLayout {
    pub fn element_offset(&self, idx: usize) -> u64 {
        self.offsets[idx]
    }
}

fn round_up(n: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    n.div_ceil(align) * align
}

impl DataLayout {
    pub fn new(module: &Module) -> Self {
        DataLayout {
            pointer_size: module.pointer_size,
        }
    }

    pub fn type_alignment(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void | Type::Function { .. } => 1,
            Type::Int { bits } => {
                let bytes = u64::from(*bits).div_ceil(8);
                bytes.next_power_of_two().min(self.pointer_size).max(1)
            }
            Type::Double => 8,
            Type::Pointer { .. } => self.pointer_size,
            Type::Array { element, .. } => self.type_alignment(element),
            Type::Struct { fields, packed } => {
                if *packed {
                    1
                } else {
                    fields
                        .iter()
                        .map(|f| self.type_alignment(f))
                        .max()
                        .unwrap_or(1)
                }
            }
        }
    }

    /// Bytes written when a value of `ty` is stored.
    pub fn type_store_size(&self, ty: &Type) -> u64 {
        match ty {
            Type::Void | Type::Function { .. } => 0,
            Type::Int { bits } => u64::from(*bits).div_ceil(8),
            Type::Double => 8,
            Type::Pointer { .. } => self.pointer_size,
            Type::Array { element, len } => len * self.type_alloc_size(element),
            Type::Struct { fields, packed } => self.struct_layout(fields, *packed).size,
        }
    }

    /// Bytes an object of `ty` occupies in memory, padding included.
    pub fn type_alloc_size(&self, ty: &Type) -> u64 {
        round_up(self.type_store_size(ty), self.type_alignment(ty))
    }

    pub fn struct_layout(&self, fields: &[TypeRef], packed: bool) -> StructLayout {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut align = 1;
        for field in fields {
            let field_align = if packed {
                1
            } else {
                self.type_alignment(field)
            };
            offset = round_up(offset, field_align);
            offsets.push(offset);
            offset += self.type_store_size(field);
            align = align.max(field_align);
        }
        StructLayout {
            offsets,
            size: round_up(offset, align),
        }
    }
}
