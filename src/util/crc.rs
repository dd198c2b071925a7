//! CRC32 checksums for log framing and backup files.

use std::io::{self, Read};

use crc32fast::Hasher;

/// CRC32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC32 over the concatenation of `slices`.
pub fn crc32_multi(slices: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for slice in slices {
        hasher.update(slice);
    }
    hasher.finalize()
}

/// Length and CRC32 of everything `reader` yields.
pub fn crc32_stream<R: Read>(mut reader: R) -> io::Result<(u64, u32)> {
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    let mut len = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        len += n as u64;
    }
    Ok((len, hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_crc32_multi_matches_single() {
        assert_eq!(crc32(b"hello world"), crc32_multi(&[b"hello ", b"world"]));
        assert_ne!(crc32(b"hello"), crc32(b"world"));
    }

    #[test]
    fn test_stream_matches_slice() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let (len, crc) = crc32_stream(&data[..]).unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(crc, crc32(&data));
    }
}
