use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Element type of a tensor, as reported by the computation runtime.
///
/// The runtime knows more types than the bridge can move. Only the
/// fixed-width numeric types (booleans, 8/16/32/64-bit integers, and
/// 16/32/64-bit floats) are transferable; every other variant is rejected
/// with [`TypeError::UnsupportedDType`] wherever a size or wire tag is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    BFloat16,
    Complex64,
    Complex128,
    QInt8,
    QInt16,
    QInt32,
    QUInt8,
    QUInt16,
    String,
    Resource,
    Variant,
    Invalid,
}

impl DType {
    /// Every transferable dtype, in wire-tag order.
    pub const SUPPORTED: [DType; 12] = [
        DType::Bool,
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::UInt8,
        DType::UInt16,
        DType::UInt32,
        DType::UInt64,
        DType::Float16,
        DType::Float32,
        DType::Float64,
    ];

    /// Returns `true` if tensors of this dtype can be moved through the store.
    pub fn is_supported(&self) -> bool {
        self.tag().is_ok()
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> Result<usize, TypeError> {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => Ok(1),
            DType::Int16 | DType::UInt16 | DType::Float16 => Ok(2),
            DType::Int32 | DType::UInt32 | DType::Float32 => Ok(4),
            DType::Int64 | DType::UInt64 | DType::Float64 => Ok(8),
            other => Err(TypeError::UnsupportedDType(*other)),
        }
    }

    /// One-byte tag used in serialized headers.
    pub fn tag(&self) -> Result<u8, TypeError> {
        Self::SUPPORTED
            .iter()
            .position(|d| d == self)
            .map(|pos| pos as u8 + 1)
            .ok_or(TypeError::UnsupportedDType(*self))
    }

    /// Inverse of [`DType::tag`].
    pub fn from_tag(tag: u8) -> Result<Self, TypeError> {
        match tag {
            1..=12 => Ok(Self::SUPPORTED[tag as usize - 1]),
            other => Err(TypeError::UnknownTag(other)),
        }
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::BFloat16 => "bfloat16",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
            DType::QInt8 => "qint8",
            DType::QInt16 => "qint16",
            DType::QInt32 => "qint32",
            DType::QUInt8 => "quint8",
            DType::QUInt16 => "quint16",
            DType::String => "string",
            DType::Resource => "resource",
            DType::Variant => "variant",
            DType::Invalid => "invalid",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = Self::SUPPORTED.iter().chain(
            [
                DType::BFloat16,
                DType::Complex64,
                DType::Complex128,
                DType::QInt8,
                DType::QInt16,
                DType::QInt32,
                DType::QUInt8,
                DType::QUInt16,
                DType::String,
                DType::Resource,
                DType::Variant,
                DType::Invalid,
            ]
            .iter(),
        );
        let lower = s.to_ascii_lowercase();
        let alias = match lower.as_str() {
            "float" | "f32" => "float32",
            "double" | "f64" => "float64",
            "half" | "f16" => "float16",
            "i32" => "int32",
            "i64" => "int64",
            "u8" => "uint8",
            other => other,
        };
        all.copied()
            .find(|d| d.name() == alias)
            .ok_or_else(|| TypeError::UnknownDType(s.to_string()))
    }
}

/// A Rust scalar with a transferable [`DType`].
///
/// Values are stored little-endian in tensor storage.
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn write_le(self, out: &mut Vec<u8>);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut arr = [0u8; std::mem::size_of::<$ty>()];
                arr.copy_from_slice(bytes);
                <$ty>::from_le_bytes(arr)
            }
        }
    };
}

impl_element!(i8, DType::Int8);
impl_element!(i16, DType::Int16);
impl_element!(i32, DType::Int32);
impl_element!(i64, DType::Int64);
impl_element!(u8, DType::UInt8);
impl_element!(u16, DType::UInt16);
impl_element!(u32, DType::UInt32);
impl_element!(u64, DType::UInt64);
impl_element!(f32, DType::Float32);
impl_element!(f64, DType::Float64);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}
