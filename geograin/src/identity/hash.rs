//! Process-independent hashing for ring placement.

/// Jenkins one-at-a-time hash.
///
/// Stable across processes and platforms, unlike `std`'s randomized
/// `DefaultHasher`.
pub fn jenkins_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in bytes {
        hash = hash.wrapping_add(u32::from(byte));
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}
