//! Schema version digests for ordinal-indexed enumerations.
//!
//! Persisted records that are laid out by enum ordinal (one slot per
//! category) embed the digest of the enumeration that produced them. A
//! reader whose enumeration differs in member names, order, or count
//! computes a different digest and rejects the record instead of
//! misreading its slots.

use xxhash_rust::xxh64::Xxh64;

/// A closed enumeration whose members index a fixed-size persisted array.
///
/// `ALL` must list every member in ordinal order, so that
/// `ALL[m.ordinal()] == m` for every member `m`.
pub trait SchemaEnum: Copy + Eq + 'static {
    /// Every member, in ordinal order.
    const ALL: &'static [Self];

    /// The stable symbolic name of this member, hashed into the version digest.
    fn name(self) -> &'static str;

    /// The position of this member in [`ALL`](Self::ALL).
    fn ordinal(self) -> usize;

    /// Number of members.
    fn count() -> usize {
        Self::ALL.len()
    }
}

/// Computes the version digest of a [`SchemaEnum`].
pub fn schema_version_digest<E: SchemaEnum>() -> u64 {
    digest_of_names(E::ALL.iter().map(|member| member.name()))
}

/// Computes a version digest from member names given in ordinal order.
///
/// Each member contributes its ordinal as a little-endian `i32` followed by
/// its name as a little-endian `u32` byte length and the UTF-8 bytes.
pub fn digest_of_names<'a>(names: impl IntoIterator<Item = &'a str>) -> u64 {
    let mut hasher = Xxh64::new(0);
    for (ordinal, name) in names.into_iter().enumerate() {
        hasher.update(&(ordinal as i32).to_le_bytes());
        hasher.update(&(name.len() as u32).to_le_bytes());
        hasher.update(name.as_bytes());
    }
    hasher.digest()
}
