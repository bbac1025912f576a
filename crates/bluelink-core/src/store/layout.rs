//! Binary layout of the shared regions
//!
//! Flag region (1 byte):
//!
//! | offset | size | meaning                     |
//! |--------|------|-----------------------------|
//! | 0      | 1    | `0` = idle, `1` = discovering |
//!
//! Device-set region (`capacity` bytes, zero padded):
//!
//! | offset | size    | meaning                                   |
//! |--------|---------|-------------------------------------------|
//! | 0      | 1       | [`SET_MAGIC`]; `0` means torn down        |
//! | 1      | 1       | [`LAYOUT_VERSION`]                        |
//! | 2      | 2       | member count, little endian               |
//! | 4      | 4 × n   | [`DeviceKey`] values, little endian, sorted |

use std::collections::BTreeSet;

use crate::device::DeviceKey;
use crate::error::{Error, Result};

/// First byte of a live device-set region. Any non-zero value works as the
/// liveness sentinel; a distinctive one makes foreign data easy to spot.
pub const SET_MAGIC: u8 = 0xB1;

pub const LAYOUT_VERSION: u8 = 1;

pub const SET_HEADER_LEN: usize = 4;

const KEY_LEN: usize = 4;

/// Number of keys that fit a set region of `capacity` bytes.
pub const fn max_members(capacity: usize) -> usize {
    capacity.saturating_sub(SET_HEADER_LEN) / KEY_LEN
}

pub fn encode_flag(active: bool) -> [u8; 1] {
    [u8::from(active)]
}

pub fn decode_flag(byte: u8) -> bool {
    byte != 0
}

/// Serialize `members` into a zero-padded buffer of exactly `capacity` bytes.
pub fn encode_set(
    region: &str,
    members: &BTreeSet<DeviceKey>,
    capacity: usize,
) -> Result<Vec<u8>> {
    let needed = SET_HEADER_LEN + members.len() * KEY_LEN;
    if needed > capacity || members.len() > usize::from(u16::MAX) {
        return Err(Error::CapacityOverflow {
            region: region.to_string(),
            needed,
            capacity,
        });
    }

    let mut buf = Vec::with_capacity(capacity);
    buf.push(SET_MAGIC);
    buf.push(LAYOUT_VERSION);
    buf.extend_from_slice(&(members.len() as u16).to_le_bytes());
    for key in members {
        buf.extend_from_slice(&key.raw().to_le_bytes());
    }
    buf.resize(capacity, 0);

    Ok(buf)
}

/// Deserialize a set region. A zero first byte reports [`Error::StoreUnavailable`].
pub fn decode_set(region: &str, buf: &[u8]) -> Result<BTreeSet<DeviceKey>> {
    match buf.first() {
        None | Some(0) => return Err(Error::StoreUnavailable),
        Some(&SET_MAGIC) => {}
        Some(other) => {
            return Err(Error::corrupt_region(
                region,
                format!("unexpected marker byte {:#04x}", other),
            ))
        }
    }

    if buf.len() < SET_HEADER_LEN {
        return Err(Error::corrupt_region(region, "truncated header"));
    }
    if buf[1] != LAYOUT_VERSION {
        return Err(Error::corrupt_region(
            region,
            format!("unsupported layout version {}", buf[1]),
        ));
    }

    let count = usize::from(u16::from_le_bytes([buf[2], buf[3]]));
    let end = SET_HEADER_LEN + count * KEY_LEN;
    if end > buf.len() {
        return Err(Error::corrupt_region(
            region,
            format!("{} members do not fit {} bytes", count, buf.len()),
        ));
    }

    Ok(buf[SET_HEADER_LEN..end]
        .chunks_exact(KEY_LEN)
        .map(|chunk| {
            DeviceKey::from_raw(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: &str = "TEST-REGION";

    fn keys(raw: &[u32]) -> BTreeSet<DeviceKey> {
        raw.iter().copied().map(DeviceKey::from_raw).collect()
    }

    #[test]
    fn test_empty_set_layout() {
        let buf = encode_set(REGION, &BTreeSet::new(), 256).unwrap();
        assert_eq!(buf.len(), 256);
        assert_eq!(&buf[..4], &[SET_MAGIC, LAYOUT_VERSION, 0, 0]);
        assert!(buf[4..].iter().all(|b| *b == 0));
        assert!(decode_set(REGION, &buf).unwrap().is_empty());
    }

    #[test]
    fn test_member_offsets() {
        let buf = encode_set(REGION, &keys(&[0x0403_0201]), 16).unwrap();
        assert_eq!(&buf[2..4], &[1, 0]);
        assert_eq!(&buf[4..8], &[1, 2, 3, 4]);
        assert_eq!(decode_set(REGION, &buf).unwrap(), keys(&[0x0403_0201]));
    }

    #[test]
    fn test_capacity_overflow_is_reported() {
        let capacity = 16; // room for 3 keys
        assert_eq!(max_members(capacity), 3);
        assert!(encode_set(REGION, &keys(&[1, 2, 3]), capacity).is_ok());

        let err = encode_set(REGION, &keys(&[1, 2, 3, 4]), capacity).unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityOverflow {
                needed: 20,
                capacity: 16,
                ..
            }
        ));
    }

    #[test]
    fn test_reference_capacity() {
        assert_eq!(max_members(256), 63);
    }

    #[test]
    fn test_zeroed_region_is_unavailable() {
        let buf = vec![0u8; 256];
        assert!(decode_set(REGION, &buf).unwrap_err().is_store_unavailable());
        assert!(decode_set(REGION, &[]).unwrap_err().is_store_unavailable());
    }

    #[test]
    fn test_foreign_marker_is_corrupt() {
        let mut buf = vec![0u8; 16];
        buf[0] = 0x80;
        assert!(matches!(
            decode_set(REGION, &buf),
            Err(Error::CorruptRegion { .. })
        ));
    }

    #[test]
    fn test_count_past_end_is_corrupt() {
        let mut buf = encode_set(REGION, &BTreeSet::new(), 16).unwrap();
        buf[2] = 10;
        assert!(matches!(
            decode_set(REGION, &buf),
            Err(Error::CorruptRegion { .. })
        ));
    }

    #[test]
    fn test_flag_encoding() {
        assert_eq!(encode_flag(true), [1]);
        assert_eq!(encode_flag(false), [0]);
        assert!(decode_flag(1));
        assert!(!decode_flag(0));
    }
}
