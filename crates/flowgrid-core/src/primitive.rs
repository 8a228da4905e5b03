//! The tagged primitive value stored at each leaf path.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single stored value.
///
/// Larger structured values (vectors, matrices, adjacency lists) are encoded
/// under multiple child paths rather than as compound primitives. The
/// untagged serde representation writes the bare JSON value, which is what
/// the `.fls` state format expects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    /// Boolean flag.
    Bool(bool),
    /// Signed 32-bit integer.
    Int(i32),
    /// Unsigned 32-bit integer.
    UInt(u32),
    /// 32-bit float.
    Float(f32),
    /// UTF-8 string.
    Str(String),
}

impl Primitive {
    /// The boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Primitive::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The unsigned payload, widening `Int` when non-negative.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Primitive::UInt(v) => Some(*v),
            Primitive::Int(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// The signed payload, narrowing `UInt` when it fits.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Primitive::Int(v) => Some(*v),
            Primitive::UInt(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// The float payload, widening integer variants.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Primitive::Float(v) => Some(*v),
            Primitive::Int(v) => Some(*v as f32),
            Primitive::UInt(v) => Some(*v as f32),
            _ => None,
        }
    }

    /// The string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the flipped value for a `Bool`, or `None` for other variants.
    pub fn toggled(&self) -> Option<Primitive> {
        self.as_bool().map(|b| Primitive::Bool(!b))
    }
}

impl From<bool> for Primitive {
    fn from(v: bool) -> Self {
        Primitive::Bool(v)
    }
}

impl From<i32> for Primitive {
    fn from(v: i32) -> Self {
        Primitive::Int(v)
    }
}

impl From<u32> for Primitive {
    fn from(v: u32) -> Self {
        Primitive::UInt(v)
    }
}

impl From<f32> for Primitive {
    fn from(v: f32) -> Self {
        Primitive::Float(v)
    }
}

impl From<&str> for Primitive {
    fn from(v: &str) -> Self {
        Primitive::Str(v.to_owned())
    }
}

impl From<String> for Primitive {
    fn from(v: String) -> Self {
        Primitive::Str(v)
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Bool(v) => write!(f, "{v}"),
            Primitive::Int(v) => write!(f, "{v}"),
            Primitive::UInt(v) => write!(f, "{v}"),
            Primitive::Float(v) => write!(f, "{v}"),
            Primitive::Str(v) => f.write_str(v),
        }
    }
}
