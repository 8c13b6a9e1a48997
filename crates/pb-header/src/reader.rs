use pb_types::{DType, TensorDescriptor, TensorShape};

use crate::error::{HeaderError, HeaderResult};
use crate::format::{padded_len, unpadded_len, CRC_SIZE, FIXED_PREFIX, HEADER_MAGIC, HEADER_VERSION, MAX_RANK};

/// Returns `true` if `buffer` starts with the header magic.
///
/// Objects written by other producers carry raw payload only; this is how
/// readers tell the two apart.
pub fn has_header(buffer: &[u8]) -> bool {
    buffer.len() >= HEADER_MAGIC.len() && buffer[..HEADER_MAGIC.len()] == HEADER_MAGIC
}

/// Parse and validate the header at the start of `buffer`.
///
/// Returns the tensor descriptor and the offset of the first payload byte.
pub fn read_header(buffer: &[u8]) -> HeaderResult<(TensorDescriptor, usize)> {
    if buffer.len() < FIXED_PREFIX {
        return Err(HeaderError::Truncated {
            needed: FIXED_PREFIX,
            available: buffer.len(),
        });
    }

    let magic: [u8; 4] = [buffer[0], buffer[1], buffer[2], buffer[3]];
    if magic != HEADER_MAGIC {
        return Err(HeaderError::InvalidMagic {
            expected: HEADER_MAGIC,
            actual: magic,
        });
    }

    let version = u16::from_le_bytes([buffer[4], buffer[5]]);
    if version != HEADER_VERSION {
        return Err(HeaderError::UnsupportedVersion(version));
    }

    let tag = buffer[6];
    let rank = u32::from_le_bytes([buffer[8], buffer[9], buffer[10], buffer[11]]) as usize;
    if rank > MAX_RANK {
        return Err(HeaderError::RankTooLarge {
            rank,
            max: MAX_RANK,
        });
    }

    let needed = padded_len(rank);
    if buffer.len() < needed {
        return Err(HeaderError::Truncated {
            needed,
            available: buffer.len(),
        });
    }

    let crc_at = unpadded_len(rank) - CRC_SIZE;
    let expected = u32::from_le_bytes([
        buffer[crc_at],
        buffer[crc_at + 1],
        buffer[crc_at + 2],
        buffer[crc_at + 3],
    ]);
    let computed = crc32fast::hash(&buffer[..crc_at]);
    if expected != computed {
        return Err(HeaderError::CrcMismatch { expected, computed });
    }

    let dtype = DType::from_tag(tag)?;
    let dims = buffer[FIXED_PREFIX..crc_at]
        .chunks_exact(8)
        .map(|c| {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(c);
            u64::from_le_bytes(arr)
        })
        .collect();

    Ok((
        TensorDescriptor {
            dtype,
            shape: TensorShape::new(dims),
        },
        needed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::write_header;

    fn header_for(dtype: DType, dims: Vec<u64>) -> Vec<u8> {
        let mut buf = vec![0u8; 128];
        let offset = write_header(dtype, &TensorShape::new(dims), &mut buf).unwrap();
        buf.truncate(offset);
        buf
    }

    #[test]
    fn reads_descriptor() {
        let buf = header_for(DType::UInt16, vec![3, 5]);
        let (desc, offset) = read_header(&buf).unwrap();
        assert_eq!(desc.dtype, DType::UInt16);
        assert_eq!(desc.shape.dims(), &[3, 5]);
        assert_eq!(offset, 64);
    }

    #[test]
    fn has_header_checks_magic() {
        assert!(has_header(&header_for(DType::Bool, vec![1])));
        assert!(!has_header(&[0u8; 64]));
        assert!(!has_header(b"PB"));
    }

    #[test]
    fn bad_magic() {
        let mut buf = header_for(DType::Float32, vec![4]);
        buf[0] = b'X';
        assert!(matches!(
            read_header(&buf),
            Err(HeaderError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn bad_version() {
        let mut buf = header_for(DType::Float32, vec![4]);
        buf[4..6].copy_from_slice(&9u16.to_le_bytes());
        assert!(matches!(
            read_header(&buf),
            Err(HeaderError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn corrupted_dimension_fails_crc() {
        let mut buf = header_for(DType::Float32, vec![4]);
        buf[12] ^= 0xff;
        assert!(matches!(
            read_header(&buf),
            Err(HeaderError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn truncated_header() {
        let buf = header_for(DType::Float32, vec![4]);
        assert!(matches!(
            read_header(&buf[..40]),
            Err(HeaderError::Truncated { needed: 64, .. })
        ));
        assert!(matches!(
            read_header(&buf[..4]),
            Err(HeaderError::Truncated { .. })
        ));
    }
}
