// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

/// Kind tag of a SQL value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TypeKind {
    Int64,
    Double,
    String,
    Bool,
    Bytes,
    Date,
}

impl TypeKind {
    /// The upper-case SQL name of the type, as produced by TYPEOF().
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Int64 => "INT64",
            TypeKind::Double => "DOUBLE",
            TypeKind::String => "STRING",
            TypeKind::Bool => "BOOL",
            TypeKind::Bytes => "BYTES",
            TypeKind::Date => "DATE",
        }
    }
}

/// An interned SQL value type. Obtain instances from a [`TypeFactory`];
/// equality is structural but interning makes clones cheap and pointer
/// comparisons meaningful within one factory.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Type {
    kind: TypeKind,
}

/// Shared handle to an interned [`Type`].
pub type TypeRef = Arc<Type>;

impl Type {
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_int64(&self) -> bool {
        self.kind == TypeKind::Int64
    }

    pub fn is_string(&self) -> bool {
        self.kind == TypeKind::String
    }

    pub fn is_bool(&self) -> bool {
        self.kind == TypeKind::Bool
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Produces interned [`Type`] objects. The factory must outlive every tree
/// that holds types it produced; in practice it outlives the driver call.
#[derive(Debug, Default)]
pub struct TypeFactory {
    cache: DashMap<TypeKind, TypeRef>,
}

impl TypeFactory {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Returns the interned type for `kind`, creating it on first use.
    pub fn get(&self, kind: TypeKind) -> TypeRef {
        self.cache
            .entry(kind)
            .or_insert_with(|| Arc::new(Type { kind }))
            .clone()
    }

    pub fn int64(&self) -> TypeRef {
        self.get(TypeKind::Int64)
    }

    pub fn string(&self) -> TypeRef {
        self.get(TypeKind::String)
    }

    pub fn bool(&self) -> TypeRef {
        self.get(TypeKind::Bool)
    }
}
