use std::io::Write;

use pb_types::{DType, TensorShape};

use crate::error::{HeaderError, HeaderResult};

pub const HEADER_MAGIC: [u8; 4] = *b"PBTH";
pub const HEADER_VERSION: u16 = 1;

/// Payload offsets are always a multiple of this many bytes.
pub const PAYLOAD_ALIGNMENT: usize = 64;

pub const MAX_RANK: usize = 32;

/// magic + version + tag + reserved + rank.
pub(crate) const FIXED_PREFIX: usize = 12;
pub(crate) const CRC_SIZE: usize = 4;

/// Header bytes before padding for a tensor of the given rank.
pub(crate) fn unpadded_len(rank: usize) -> usize {
    FIXED_PREFIX + 8 * rank + CRC_SIZE
}

pub(crate) fn padded_len(rank: usize) -> usize {
    unpadded_len(rank).div_ceil(PAYLOAD_ALIGNMENT) * PAYLOAD_ALIGNMENT
}

/// Serialize the header for `dtype`/`shape` into `out`.
///
/// This is the single emission routine behind both sizing and writing, so
/// the byte count measured by the sizer is exactly what the writer produces.
pub(crate) fn emit<W: Write>(dtype: DType, shape: &TensorShape, out: &mut W) -> HeaderResult<()> {
    let tag = dtype.tag()?;
    let rank = shape.rank();
    if rank > MAX_RANK {
        return Err(HeaderError::RankTooLarge {
            rank,
            max: MAX_RANK,
        });
    }

    let mut head = Vec::with_capacity(unpadded_len(rank));
    head.extend_from_slice(&HEADER_MAGIC);
    head.extend_from_slice(&HEADER_VERSION.to_le_bytes());
    head.push(tag);
    head.push(0);
    head.extend_from_slice(&(rank as u32).to_le_bytes());
    for dim in shape.dims() {
        head.extend_from_slice(&dim.to_le_bytes());
    }
    let crc = crc32fast::hash(&head);
    head.extend_from_slice(&crc.to_le_bytes());

    out.write_all(&head)?;
    let padding = padded_len(rank) - head.len();
    out.write_all(&[0u8; PAYLOAD_ALIGNMENT][..padding])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_len_rounds_to_alignment() {
        assert_eq!(unpadded_len(0), 16);
        assert_eq!(padded_len(0), 64);
        assert_eq!(padded_len(1), 64);
        assert_eq!(padded_len(6), 64);
        assert_eq!(padded_len(7), 128);
        assert_eq!(padded_len(MAX_RANK), 320);
    }

    #[test]
    fn emit_layout() {
        let mut out = Vec::new();
        emit(DType::Float32, &TensorShape::vector(16), &mut out).unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(&out[0..4], b"PBTH");
        assert_eq!(u16::from_le_bytes([out[4], out[5]]), HEADER_VERSION);
        assert_eq!(out[6], DType::Float32.tag().unwrap());
        assert_eq!(u32::from_le_bytes(out[8..12].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(out[12..20].try_into().unwrap()), 16);
        assert!(out[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn emit_rejects_unsupported_dtype() {
        let mut out = Vec::new();
        let err = emit(DType::Complex64, &TensorShape::vector(1), &mut out).unwrap_err();
        assert!(matches!(err, HeaderError::Type(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn emit_rejects_huge_rank() {
        let shape = TensorShape::new(vec![1; MAX_RANK + 1]);
        let err = emit(DType::Int8, &shape, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, HeaderError::RankTooLarge { .. }));
    }
}
