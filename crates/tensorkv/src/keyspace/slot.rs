//! Cluster hash slots.

use crate::error::{Error, Result};

/// Number of slots a cluster keyspace is partitioned into.
pub const SLOT_COUNT: u16 = 16384;

/// CRC16-XMODEM, polynomial `0x1021`, initial value `0`.
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Part of the key that is hashed: the text between the first `{` and the
/// next `}` when that text is non-empty, otherwise the whole key.
fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|b| *b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|b| *b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

pub fn hash_slot(key: &str) -> u16 {
    crc16(hash_tag(key.as_bytes())) % SLOT_COUNT
}

/// Checks that every key maps to one slot.
///
/// # Returns
///
/// The shared slot, `None` for an empty key set, or a cross-slot error.
pub fn common_slot<'a, I>(keys: I) -> Result<Option<u16>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut slot = None;
    for key in keys {
        let current = hash_slot(key);
        match slot {
            None => slot = Some(current),
            Some(existing) if existing != current => return Err(Error::CrossSlot),
            Some(_) => {}
        }
    }
    Ok(slot)
}
