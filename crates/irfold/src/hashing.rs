//! Fingerprints used to bucket structurally equal IR fragments.

use serde::Serialize;

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

pub fn fnv1a_init() -> u64 {
    FNV1A_OFFSET
}

pub fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    fnv1a_bytes(fnv1a_init(), bytes)
}

/// Serialized form of a value together with its FNV-1a fingerprint.
///
/// Two keys are equal only when their encoded bytes are equal, so a fingerprint collision
/// never merges distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructuralKey {
    pub fingerprint: u64,
    pub bytes: Vec<u8>,
}

impl StructuralKey {
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, bincode::Error> {
        let bytes = bincode::serialize(value)?;
        Ok(Self {
            fingerprint: fnv1a_hash(&bytes),
            bytes,
        })
    }
}
