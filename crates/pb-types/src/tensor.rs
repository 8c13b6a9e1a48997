use std::collections::TryReserveError;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::dtype::{DType, Element};
use crate::error::TypeError;

/// Ordered sequence of non-negative dimension sizes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape(Vec<u64>);

impl TensorShape {
    pub fn new(dims: Vec<u64>) -> Self {
        Self(dims)
    }

    /// A one-dimensional shape of `len` elements.
    pub fn vector(len: u64) -> Self {
        Self(vec![len])
    }

    pub fn dims(&self) -> &[u64] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Product of all dimensions, or `None` if it overflows `u64`.
    /// A rank-0 shape holds one element.
    pub fn checked_num_elements(&self) -> Option<u64> {
        if self.0.contains(&0) {
            return Some(0);
        }
        self.0.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
    }

    /// Product of all dimensions, saturating at `u64::MAX`.
    pub fn num_elements(&self) -> u64 {
        self.checked_num_elements().unwrap_or(u64::MAX)
    }
}

impl From<Vec<u64>> for TensorShape {
    fn from(dims: Vec<u64>) -> Self {
        Self(dims)
    }
}

impl From<&[u64]> for TensorShape {
    fn from(dims: &[u64]) -> Self {
        Self(dims.to_vec())
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

/// Dtype and shape of a tensor, without its data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDescriptor {
    pub dtype: DType,
    pub shape: TensorShape,
}

impl TensorDescriptor {
    pub fn new(dtype: DType, shape: impl Into<TensorShape>) -> Self {
        Self {
            dtype,
            shape: shape.into(),
        }
    }

    /// Number of payload bytes a tensor with this descriptor carries.
    ///
    /// Dimensions come from untrusted headers, so the product is checked.
    pub fn payload_bytes(&self) -> Result<u64, TypeError> {
        let width = self.dtype.element_size()? as u64;
        self.shape
            .checked_num_elements()
            .and_then(|n| n.checked_mul(width))
            .ok_or_else(|| TypeError::ShapeOverflow(self.shape.to_string()))
    }
}

/// Where a tensor's storage lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Placement {
    /// Ordinary host memory.
    Host,
    /// Memory owned by the device with the given ordinal.
    Device(u32),
}

/// Shared, lock-guarded byte storage backing a tensor.
///
/// Cloning is cheap and yields another handle to the same bytes, which is how
/// asynchronous copy operations keep their source or destination alive until
/// they run.
#[derive(Clone, Default)]
pub struct TensorStorage {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl TensorStorage {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Allocate `len` zeroed bytes, reporting allocation failure instead of
    /// aborting.
    pub fn try_zeroed(len: usize) -> Result<Self, TryReserveError> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len)?;
        bytes.resize(len, 0);
        Ok(Self::from_vec(bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.read().expect("storage lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with shared access to the bytes.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.bytes.read().expect("storage lock poisoned");
        f(&guard)
    }

    /// Run `f` with exclusive access to the bytes.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.bytes.write().expect("storage lock poisoned");
        f(&mut guard)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read(|b| b.to_vec())
    }

    /// Returns `true` if both handles refer to the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for TensorStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorStorage")
            .field("len", &self.len())
            .finish()
    }
}

/// A typed tensor: descriptor plus placement-tagged storage.
#[derive(Clone, Debug)]
pub struct Tensor {
    descriptor: TensorDescriptor,
    storage: TensorStorage,
    placement: Placement,
}

impl Tensor {
    /// Wrap existing storage, checking that its size matches the descriptor.
    pub fn from_storage(
        dtype: DType,
        shape: impl Into<TensorShape>,
        storage: TensorStorage,
        placement: Placement,
    ) -> Result<Self, TypeError> {
        let descriptor = TensorDescriptor::new(dtype, shape);
        let expected = descriptor.payload_bytes()?;
        let actual = storage.len();
        if expected != actual as u64 {
            return Err(TypeError::SizeMismatch {
                dtype,
                elements: descriptor.shape.num_elements(),
                actual,
            });
        }
        Ok(Self {
            descriptor,
            storage,
            placement,
        })
    }

    /// Host tensor from raw little-endian bytes.
    pub fn from_bytes(
        dtype: DType,
        shape: impl Into<TensorShape>,
        bytes: Vec<u8>,
    ) -> Result<Self, TypeError> {
        Self::from_storage(dtype, shape, TensorStorage::from_vec(bytes), Placement::Host)
    }

    /// Host tensor from typed values.
    pub fn from_elements<T: Element>(
        values: &[T],
        shape: impl Into<TensorShape>,
    ) -> Result<Self, TypeError> {
        let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
        for v in values {
            v.write_le(&mut bytes);
        }
        Self::from_bytes(T::DTYPE, shape, bytes)
    }

    /// One-dimensional host tensor from typed values.
    pub fn vector<T: Element>(values: &[T]) -> Self {
        let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
        for v in values {
            v.write_le(&mut bytes);
        }
        Self {
            descriptor: TensorDescriptor::new(T::DTYPE, TensorShape::vector(values.len() as u64)),
            storage: TensorStorage::from_vec(bytes),
            placement: Placement::Host,
        }
    }

    /// The same storage re-tagged with another placement.
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn dtype(&self) -> DType {
        self.descriptor.dtype
    }

    pub fn shape(&self) -> &TensorShape {
        &self.descriptor.shape
    }

    pub fn descriptor(&self) -> &TensorDescriptor {
        &self.descriptor
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn storage(&self) -> &TensorStorage {
        &self.storage
    }

    pub fn num_elements(&self) -> u64 {
        self.descriptor.shape.num_elements()
    }

    pub fn total_bytes(&self) -> usize {
        self.storage.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.storage.to_vec()
    }

    /// Decode the storage as values of `T`.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, TypeError> {
        if T::DTYPE != self.dtype() {
            return Err(TypeError::DTypeMismatch {
                expected: self.dtype(),
                actual: T::DTYPE,
            });
        }
        let width = std::mem::size_of::<T>();
        Ok(self
            .storage
            .read(|bytes| bytes.chunks_exact(width).map(T::read_le).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_elements() {
        assert_eq!(TensorShape::new(vec![2, 3, 4]).num_elements(), 24);
        assert_eq!(TensorShape::new(vec![]).num_elements(), 1);
        assert_eq!(TensorShape::new(vec![5, 0]).num_elements(), 0);
        assert_eq!(TensorShape::vector(7).to_string(), "[7]");
    }

    #[test]
    fn oversized_shapes_do_not_wrap() {
        let huge = TensorShape::new(vec![1 << 40, 1 << 40]);
        assert_eq!(huge.checked_num_elements(), None);
        assert_eq!(huge.num_elements(), u64::MAX);
        assert_eq!(TensorShape::new(vec![1 << 40, 1 << 40, 0]).checked_num_elements(), Some(0));

        let desc = TensorDescriptor::new(DType::Float32, huge);
        assert!(matches!(desc.payload_bytes(), Err(TypeError::ShapeOverflow(_))));
        // Fits as elements, not as bytes.
        let desc = TensorDescriptor::new(DType::Float64, vec![1u64 << 62]);
        assert!(matches!(desc.payload_bytes(), Err(TypeError::ShapeOverflow(_))));
    }

    #[test]
    fn descriptor_payload_bytes() {
        let desc = TensorDescriptor::new(DType::Float32, vec![4, 4]);
        assert_eq!(desc.payload_bytes().unwrap(), 64);
        let bad = TensorDescriptor::new(DType::String, vec![4]);
        assert!(bad.payload_bytes().is_err());
    }

    #[test]
    fn from_elements_and_back() {
        let t = Tensor::from_elements(&[1.0f32, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
        assert_eq!(t.dtype(), DType::Float32);
        assert_eq!(t.total_bytes(), 16);
        assert_eq!(t.num_elements(), 4);
        assert_eq!(t.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn shape_must_match_bytes() {
        let err = Tensor::from_bytes(DType::Int32, vec![3], vec![0u8; 8]).unwrap_err();
        assert!(matches!(err, TypeError::SizeMismatch { actual: 8, .. }));
    }

    #[test]
    fn to_vec_checks_dtype() {
        let t = Tensor::vector(&[1i32, 2]);
        assert!(matches!(
            t.to_vec::<f32>(),
            Err(TypeError::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn storage_clones_share_bytes() {
        let storage = TensorStorage::from_vec(vec![0u8; 4]);
        let other = storage.clone();
        other.write(|b| b[0] = 9);
        assert_eq!(storage.to_vec()[0], 9);
        assert!(storage.ptr_eq(&other));
    }

    #[test]
    fn try_zeroed_allocates() {
        let storage = TensorStorage::try_zeroed(32).unwrap();
        assert_eq!(storage.len(), 32);
        assert!(storage.read(|b| b.iter().all(|&x| x == 0)));
    }

    #[test]
    fn placement_retag() {
        let t = Tensor::vector(&[1u8]).with_placement(Placement::Device(0));
        assert_eq!(t.placement(), Placement::Device(0));
    }
}
