use std::io::{self, Cursor};

use pb_types::{DType, TensorShape};

use crate::error::{HeaderError, HeaderResult};
use crate::format::{emit, padded_len};

/// Write the header for `dtype`/`shape` at the start of `dest`.
///
/// Returns the offset of the first payload byte. No payload bytes are
/// touched. `dest` must hold at least [`compute_header_size`] bytes;
/// otherwise [`HeaderError::BufferTooSmall`] is returned and the leading
/// bytes of `dest` may have been overwritten.
///
/// [`compute_header_size`]: crate::compute_header_size
pub fn write_header(dtype: DType, shape: &TensorShape, dest: &mut [u8]) -> HeaderResult<usize> {
    let available = dest.len();
    let mut cursor = Cursor::new(dest);
    match emit(dtype, shape, &mut cursor) {
        Ok(()) => Ok(cursor.position() as usize),
        Err(HeaderError::Io(e)) if e.kind() == io::ErrorKind::WriteZero => {
            Err(HeaderError::BufferTooSmall {
                needed: padded_len(shape.rank()),
                available,
            })
        }
        Err(e) => Err(e),
    }
}
