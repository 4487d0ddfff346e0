//! Inflates gzip compressed loaders.
//!
//! Some distributions ship compressed kernels that the firmware cannot load directly. The member header is
//! skipped by hand and the raw deflate stream is handed to [`miniz_oxide`]. Both the CRC32 and the size in the
//! trailer are verified.

use alloc::vec::Vec;

use miniz_oxide::inflate::decompress_to_vec_with_limit;
use thiserror::Error;

use crate::loader::GZIP_MAGIC;

/// The largest image that is inflated.
const MAX_INFLATED_SIZE: usize = 256 * 1024 * 1024;

/// The size of the fixed part of a gzip member header.
const HEADER_LEN: usize = 10;

/// The size of the CRC32 and ISIZE trailer.
const TRAILER_LEN: usize = 8;

/// The deflate compression method.
const METHOD_DEFLATE: u8 = 8;

/// Header flag: a header CRC16 follows.
const FHCRC: u8 = 0x02;

/// Header flag: an extra field follows.
const FEXTRA: u8 = 0x04;

/// Header flag: a NUL terminated file name follows.
const FNAME: u8 = 0x08;

/// Header flag: a NUL terminated comment follows.
const FCOMMENT: u8 = 0x10;

/// The reflected CRC32 polynomial used by gzip.
const CRC32_POLY: u32 = 0xedb8_8320;

/// The CRC32 lookup table.
const CRC32_TABLE: [u32; 256] = crc32_table();

/// Builds [`CRC32_TABLE`].
const fn crc32_table() -> [u32; 256] {
    let mut table = [0; 256];
    let mut i = 0;
    while i < 256 {
        #[allow(clippy::cast_possible_truncation)]
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 0 { crc >> 1 } else { (crc >> 1) ^ CRC32_POLY };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// The gzip CRC32 of `data`.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(!0_u32, |crc, &b| {
        CRC32_TABLE[usize::from(crc.to_le_bytes()[0] ^ b)] ^ (crc >> 8)
    })
}

/// An `Error` that may result from inflating an image.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GzipError {
    /// The data does not start with a gzip member header.
    #[error("Not a gzip stream")]
    BadHeader,

    /// The header runs past the end of the data.
    #[error("Truncated gzip stream")]
    Truncated,

    /// The deflate stream could not be inflated.
    #[error("Failed to inflate gzip stream")]
    Inflate,

    /// The inflated size does not match the size recorded in the trailer.
    #[error("Inflated size does not match the gzip trailer")]
    SizeMismatch,

    /// The CRC32 of the inflated data does not match the trailer.
    #[error("Inflated data does not match the gzip CRC32")]
    CrcMismatch,
}

/// Skips a NUL terminated field, returning the offset after the NUL.
fn skip_cstr(data: &[u8], offset: usize) -> Result<usize, GzipError> {
    let len = data
        .get(offset..)
        .and_then(|x| x.iter().position(|&b| b == 0))
        .ok_or(GzipError::Truncated)?;
    Ok(offset + len + 1)
}

/// Inflates the first member of a gzip stream.
///
/// # Errors
///
/// May return an `Error` if the data is not a valid gzip stream, or it inflates to more than 256 MiB.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, GzipError> {
    if data.len() < HEADER_LEN + TRAILER_LEN || data[..2] != GZIP_MAGIC || data[2] != METHOD_DEFLATE {
        return Err(GzipError::BadHeader);
    }

    let flags = data[3];
    let mut offset = HEADER_LEN;
    if flags & FEXTRA != 0 {
        let len = data.get(offset..offset + 2).ok_or(GzipError::Truncated)?;
        offset += 2 + usize::from(u16::from_le_bytes([len[0], len[1]]));
    }
    if flags & FNAME != 0 {
        offset = skip_cstr(data, offset)?;
    }
    if flags & FCOMMENT != 0 {
        offset = skip_cstr(data, offset)?;
    }
    if flags & FHCRC != 0 {
        offset += 2;
    }

    let end = data.len() - TRAILER_LEN;
    if offset > end {
        return Err(GzipError::Truncated);
    }

    let inflated = decompress_to_vec_with_limit(&data[offset..end], MAX_INFLATED_SIZE)
        .map_err(|_| GzipError::Inflate)?;

    let trailer = &data[end..];
    let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
    // ISIZE is the size modulo 2^32
    #[allow(clippy::cast_possible_truncation)]
    let inflated_size = inflated.len() as u32;
    if size != inflated_size {
        return Err(GzipError::SizeMismatch);
    }
    if crc != crc32(&inflated) {
        return Err(GzipError::CrcMismatch);
    }

    Ok(inflated)
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use miniz_oxide::deflate::compress_to_vec;
    use proptest::prelude::*;

    use super::*;

    fn gzip(payload: &[u8], flags: u8, extra: &[u8]) -> Vec<u8> {
        let mut data = vec![0x1f, 0x8b, METHOD_DEFLATE, flags, 0, 0, 0, 0, 0, 3];
        data.extend_from_slice(extra);
        data.extend_from_slice(&compress_to_vec(payload, 6));
        data.extend_from_slice(&crc32(payload).to_le_bytes());
        data.extend_from_slice(&u32::try_from(payload.len()).unwrap_or_default().to_le_bytes());
        data
    }

    #[test]
    fn test_inflate() {
        let payload = b"MZ this is not really a kernel".repeat(20);
        assert_eq!(inflate(&gzip(&payload, 0, &[])).as_deref(), Ok(payload.as_slice()));

        let named = gzip(&payload, FNAME | FEXTRA, b"\x02\x00abvmlinuz\0");
        assert_eq!(inflate(&named).as_deref(), Ok(payload.as_slice()));
    }

    #[test]
    fn test_bad_streams() {
        assert_eq!(inflate(b"MZ"), Err(GzipError::BadHeader));
        let unterminated = [0x1f, 0x8b, 8, FNAME, 0, 0, 0, 0, 0, 3, b'a', b'b', 1, 2, 3, 4, 5, 6];
        assert_eq!(inflate(&unterminated), Err(GzipError::Truncated));

        let mut wrong_size = gzip(b"payload", 0, &[]);
        let len = wrong_size.len();
        wrong_size[len - 4] = 99;
        assert_eq!(inflate(&wrong_size), Err(GzipError::SizeMismatch));

        let mut wrong_crc = gzip(b"payload", 0, &[]);
        let len = wrong_crc.len();
        wrong_crc[len - 8] ^= 0xff;
        assert_eq!(inflate(&wrong_crc), Err(GzipError::CrcMismatch));
    }

    #[test]
    fn test_crc32() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    proptest! {
        #[test]
        fn doesnt_panic(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let mut data = data;
            if data.len() > 3 {
                data[0] = 0x1f;
                data[1] = 0x8b;
                data[2] = METHOD_DEFLATE;
            }
            let _ = inflate(&data);
        }
    }
}
