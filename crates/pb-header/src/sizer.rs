use std::io::{self, Write};

use pb_types::{DType, TensorShape};
use tracing::trace;

use crate::error::HeaderResult;
use crate::format::emit;

/// A `Write` sink that discards bytes and only counts them.
#[derive(Debug, Default)]
pub struct CountingSink {
    written: usize,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.written
    }
}

impl Write for CountingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Exact number of bytes the serialized header for `dtype`/`shape` occupies.
///
/// The header is serialized into a [`CountingSink`]; no payload is involved,
/// so this can (and must) be called before the destination buffer is
/// allocated. Fails with a type error for unsupported dtypes.
pub fn compute_header_size(dtype: DType, shape: &TensorShape) -> HeaderResult<usize> {
    let mut sink = CountingSink::new();
    emit(dtype, shape, &mut sink)?;
    let size = sink.bytes_written();
    trace!(%dtype, rank = shape.rank(), size, "computed header size");
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeaderError;

    #[test]
    fn counting_sink_counts() {
        let mut sink = CountingSink::new();
        sink.write_all(b"hello").unwrap();
        sink.write_all(&[0u8; 10]).unwrap();
        assert_eq!(sink.bytes_written(), 15);
    }

    #[test]
    fn vector_header_is_one_alignment_block() {
        let size = compute_header_size(DType::Float32, &TensorShape::vector(16)).unwrap();
        assert_eq!(size, 64);
    }

    #[test]
    fn size_depends_on_rank_not_dims() {
        let small = compute_header_size(DType::Int8, &TensorShape::new(vec![1; 7])).unwrap();
        let large = compute_header_size(DType::Int8, &TensorShape::new(vec![1 << 40; 7])).unwrap();
        assert_eq!(small, large);
        assert_eq!(small, 128);
    }

    #[test]
    fn unsupported_dtype_is_type_error() {
        let err = compute_header_size(DType::String, &TensorShape::vector(1)).unwrap_err();
        assert!(matches!(err, HeaderError::Type(_)));
    }
}
