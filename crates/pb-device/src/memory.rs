use pb_types::TensorStorage;

use crate::error::{DeviceError, DeviceResult};

/// A contiguous byte region a copy engine can read from or write into.
///
/// Implemented for tensor storage here; store buffers get wrappers in the
/// ops layer.
pub trait MemoryRegion: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stable base address, used as the pinned-memory registration key.
    fn address(&self) -> usize;

    /// Run `f` over `len` bytes starting at `offset`.
    fn read_with(
        &self,
        offset: usize,
        len: usize,
        f: &mut dyn FnMut(&[u8]) -> DeviceResult<()>,
    ) -> DeviceResult<()>;

    fn write_at(&self, offset: usize, src: &[u8]) -> DeviceResult<()>;
}

pub(crate) fn check_range(offset: usize, len: usize, size: usize) -> DeviceResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(DeviceError::OutOfRange { offset, len, size }),
    }
}

/// Copy `len` bytes between two regions.
///
/// Distinct regions are copied directly; a region copied onto itself goes
/// through a bounce buffer so no lock is taken twice.
pub fn copy_region(
    dst: &dyn MemoryRegion,
    dst_offset: usize,
    src: &dyn MemoryRegion,
    src_offset: usize,
    len: usize,
) -> DeviceResult<()> {
    check_range(src_offset, len, src.len())?;
    check_range(dst_offset, len, dst.len())?;
    if len == 0 {
        return Ok(());
    }
    if dst.address() == src.address() {
        let mut bounce = Vec::with_capacity(len);
        src.read_with(src_offset, len, &mut |bytes| {
            bounce.extend_from_slice(bytes);
            Ok(())
        })?;
        return dst.write_at(dst_offset, &bounce);
    }
    src.read_with(src_offset, len, &mut |bytes| dst.write_at(dst_offset, bytes))
}

impl MemoryRegion for TensorStorage {
    fn len(&self) -> usize {
        TensorStorage::len(self)
    }

    fn address(&self) -> usize {
        self.read(|bytes| bytes.as_ptr() as usize)
    }

    fn read_with(
        &self,
        offset: usize,
        len: usize,
        f: &mut dyn FnMut(&[u8]) -> DeviceResult<()>,
    ) -> DeviceResult<()> {
        self.read(|bytes| {
            check_range(offset, len, bytes.len())?;
            f(&bytes[offset..offset + len])
        })
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> DeviceResult<()> {
        self.write(|bytes| {
            check_range(offset, src.len(), bytes.len())?;
            bytes[offset..offset + src.len()].copy_from_slice(src);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_between_storages() {
        let src = TensorStorage::from_vec(vec![1, 2, 3, 4, 5]);
        let dst = TensorStorage::from_vec(vec![0; 6]);
        copy_region(&dst, 2, &src, 1, 3).unwrap();
        assert_eq!(dst.to_vec(), vec![0, 0, 2, 3, 4, 0]);
    }

    #[test]
    fn self_copy_uses_bounce_buffer() {
        let s = TensorStorage::from_vec(vec![1, 2, 3, 4]);
        copy_region(&s, 2, &s, 0, 2).unwrap();
        assert_eq!(s.to_vec(), vec![1, 2, 1, 2]);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let src = TensorStorage::from_vec(vec![0; 4]);
        let dst = TensorStorage::from_vec(vec![0; 2]);
        let err = copy_region(&dst, 0, &src, 0, 4).unwrap_err();
        assert_eq!(
            err,
            DeviceError::OutOfRange {
                offset: 0,
                len: 4,
                size: 2
            }
        );
    }

    #[test]
    fn zero_length_copy_is_a_no_op() {
        let src = TensorStorage::from_vec(vec![]);
        let dst = TensorStorage::from_vec(vec![9]);
        copy_region(&dst, 1, &src, 0, 0).unwrap();
        assert_eq!(dst.to_vec(), vec![9]);
    }
}
