// types.rs — Value types and their runtime data-type mapping
//
// Structural types carried by IR values (`tensor<2x?xf32>`, `tensor<*xi32>`,
// `!tf.string`, ...) plus the conversion to the runtime `DataType` enum that
// the compile metadata records for every argument.
//
// Preconditions: none.
// Postconditions: `Display` output re-parses through `Type::parse`.
// Failure modes: unknown element names → `TypeParseError`; opaque types have
//                no data type → `UnsupportedType`.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel for a dimension whose size is not statically known.
pub const DYNAMIC_DIM: i64 = -1;

// ── Element types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    I1,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    BF16,
    F16,
    F32,
    F64,
    String,
    Resource,
    Variant,
}

impl ElementType {
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "i1" => ElementType::I1,
            "i8" => ElementType::I8,
            "i16" => ElementType::I16,
            "i32" => ElementType::I32,
            "i64" => ElementType::I64,
            "ui8" => ElementType::U8,
            "ui16" => ElementType::U16,
            "ui32" => ElementType::U32,
            "ui64" => ElementType::U64,
            "bf16" => ElementType::BF16,
            "f16" => ElementType::F16,
            "f32" => ElementType::F32,
            "f64" => ElementType::F64,
            "!tf.string" => ElementType::String,
            "!tf.resource" => ElementType::Resource,
            "!tf.variant" => ElementType::Variant,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::I1 => "i1",
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "ui8",
            ElementType::U16 => "ui16",
            ElementType::U32 => "ui32",
            ElementType::U64 => "ui64",
            ElementType::BF16 => "bf16",
            ElementType::F16 => "f16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::String => "!tf.string",
            ElementType::Resource => "!tf.resource",
            ElementType::Variant => "!tf.variant",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Tensor and value types ──────────────────────────────────────────────────

/// A tensor type. `shape == None` means unranked (`tensor<*xT>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub element: ElementType,
    pub shape: Option<Vec<i64>>,
}

impl TensorType {
    pub fn ranked(element: ElementType, dims: Vec<i64>) -> Self {
        TensorType {
            element,
            shape: Some(dims),
        }
    }

    pub fn unranked(element: ElementType) -> Self {
        TensorType {
            element,
            shape: None,
        }
    }

    pub fn scalar(element: ElementType) -> Self {
        TensorType::ranked(element, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Tensor(TensorType),
    /// A bare element type (`i32`, `!tf.string`).
    Element(ElementType),
    /// Anything else (`index`, `none`, `!foo.bar`); has no data type.
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeParseError {
    #[error("unknown element type '{0}' in tensor type")]
    UnknownElement(String),
    #[error("malformed dimension '{0}' in tensor type")]
    BadDimension(String),
}

impl Type {
    /// Parse the body of a `tensor<...>` type (the text between the brackets).
    pub fn parse_tensor_body(body: &str) -> Result<Type, TypeParseError> {
        // Dimensions are peeled off the front; element names may contain 'x'.
        let mut dims = Vec::new();
        let mut rest = body;
        while let Some(i) = rest.find('x') {
            let token = rest[..i].trim();
            let is_dim = !token.is_empty()
                && token
                    .chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '?' | '*' | '-'));
            if !is_dim {
                break;
            }
            dims.push(token);
            rest = &rest[i + 1..];
        }
        let elem = rest.trim();
        let element = ElementType::from_name(elem)
            .ok_or_else(|| TypeParseError::UnknownElement(elem.to_string()))?;

        if dims.len() == 1 && dims[0] == "*" {
            return Ok(Type::Tensor(TensorType::unranked(element)));
        }
        let mut shape = Vec::with_capacity(dims.len());
        for dim in dims {
            let value = match dim {
                "?" => DYNAMIC_DIM,
                other => other
                    .parse::<i64>()
                    .ok()
                    .filter(|d| *d >= 0)
                    .ok_or_else(|| TypeParseError::BadDimension(other.to_string()))?,
            };
            shape.push(value);
        }
        Ok(Type::Tensor(TensorType::ranked(element, shape)))
    }

    /// Interpret a bare type name (`i32`, `!tf.string`, `index`).
    pub fn from_name(name: &str) -> Type {
        match ElementType::from_name(name) {
            Some(elem) => Type::Element(elem),
            None => Type::Opaque(name.to_string()),
        }
    }

    pub fn string_tensor() -> Type {
        Type::Tensor(TensorType::scalar(ElementType::String))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(t) => {
                write!(f, "tensor<")?;
                match &t.shape {
                    None => write!(f, "*x")?,
                    Some(dims) => {
                        for d in dims {
                            if *d == DYNAMIC_DIM {
                                write!(f, "?x")?;
                            } else {
                                write!(f, "{d}x")?;
                            }
                        }
                    }
                }
                write!(f, "{}>", t.element)
            }
            Type::Element(e) => write!(f, "{e}"),
            Type::Opaque(name) => f.write_str(name),
        }
    }
}

// ── Runtime data types ──────────────────────────────────────────────────────

/// Runtime data type recorded in compile metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "DT_BOOL")]
    Bool,
    #[serde(rename = "DT_INT8")]
    Int8,
    #[serde(rename = "DT_INT16")]
    Int16,
    #[serde(rename = "DT_INT32")]
    Int32,
    #[serde(rename = "DT_INT64")]
    Int64,
    #[serde(rename = "DT_UINT8")]
    UInt8,
    #[serde(rename = "DT_UINT16")]
    UInt16,
    #[serde(rename = "DT_UINT32")]
    UInt32,
    #[serde(rename = "DT_UINT64")]
    UInt64,
    #[serde(rename = "DT_BFLOAT16")]
    BFloat16,
    #[serde(rename = "DT_HALF")]
    Half,
    #[serde(rename = "DT_FLOAT")]
    Float,
    #[serde(rename = "DT_DOUBLE")]
    Double,
    #[serde(rename = "DT_STRING")]
    String,
    #[serde(rename = "DT_RESOURCE")]
    Resource,
    #[serde(rename = "DT_VARIANT")]
    Variant,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported type {0} for conversion to a data type")]
pub struct UnsupportedType(pub String);

impl From<ElementType> for DataType {
    fn from(elem: ElementType) -> Self {
        match elem {
            ElementType::I1 => DataType::Bool,
            ElementType::I8 => DataType::Int8,
            ElementType::I16 => DataType::Int16,
            ElementType::I32 => DataType::Int32,
            ElementType::I64 => DataType::Int64,
            ElementType::U8 => DataType::UInt8,
            ElementType::U16 => DataType::UInt16,
            ElementType::U32 => DataType::UInt32,
            ElementType::U64 => DataType::UInt64,
            ElementType::BF16 => DataType::BFloat16,
            ElementType::F16 => DataType::Half,
            ElementType::F32 => DataType::Float,
            ElementType::F64 => DataType::Double,
            ElementType::String => DataType::String,
            ElementType::Resource => DataType::Resource,
            ElementType::Variant => DataType::Variant,
        }
    }
}

impl TryFrom<&Type> for DataType {
    type Error = UnsupportedType;

    fn try_from(ty: &Type) -> Result<Self, Self::Error> {
        match ty {
            Type::Tensor(t) => Ok(t.element.into()),
            Type::Element(e) => Ok((*e).into()),
            Type::Opaque(_) => Err(UnsupportedType(ty.to_string())),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
