//! Configuration digests: fingerprints of every build input other than
//! source content.
//!
//! When any slot differs between the stored and the current container, the
//! whole target must be rebuilt. Slots are indexed by
//! [`ConfigurationCategory`] ordinal; adding a category changes the
//! enumeration's version digest, so records written by older builds are
//! rejected rather than misread.

use std::fmt;

use kiln_common::{schema_version_digest, SchemaEnum};
use xxhash_rust::xxh3::Xxh3;

/// A build input whose change invalidates a whole target.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ConfigurationCategory {
    /// Version of the compiler toolchain.
    ToolVersion,
    /// The compiler option set.
    Compiler,
    /// Ordered list of dependency (classpath) entries.
    DependencyPathList,
    /// Ordered list of dependency content digests.
    DependencyDigestList,
}

impl ConfigurationCategory {
    /// Number of categories, i.e. the length of a [`ConfigurationDigestContainer`].
    pub const COUNT: usize = 4;

    /// Human-readable description used in rebuild reasons.
    pub fn description(self) -> &'static str {
        match self {
            ConfigurationCategory::ToolVersion => "tool version",
            ConfigurationCategory::Compiler => "compiler options",
            ConfigurationCategory::DependencyPathList => "dependency path list",
            ConfigurationCategory::DependencyDigestList => "dependency digest list",
        }
    }
}

impl SchemaEnum for ConfigurationCategory {
    const ALL: &'static [Self] = &[
        ConfigurationCategory::ToolVersion,
        ConfigurationCategory::Compiler,
        ConfigurationCategory::DependencyPathList,
        ConfigurationCategory::DependencyDigestList,
    ];

    fn name(self) -> &'static str {
        match self {
            ConfigurationCategory::ToolVersion => "TOOL_VERSION",
            ConfigurationCategory::Compiler => "COMPILER",
            ConfigurationCategory::DependencyPathList => "DEPENDENCY_PATH_LIST",
            ConfigurationCategory::DependencyDigestList => "DEPENDENCY_DIGEST_LIST",
        }
    }

    fn ordinal(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ConfigurationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One 64-bit digest per [`ConfigurationCategory`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct ConfigurationDigestContainer {
    slots: [u64; ConfigurationCategory::COUNT],
}

impl ConfigurationDigestContainer {
    /// Creates a container with every slot set to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the digest stored for `category`.
    pub fn get(&self, category: ConfigurationCategory) -> u64 {
        self.slots[category.ordinal()]
    }

    /// Sets the digest for `category`.
    pub fn set(&mut self, category: ConfigurationCategory, value: u64) {
        self.slots[category.ordinal()] = value;
    }

    /// Sets the digest for `category` to the digest of an ordered item list,
    /// e.g. dependency paths.
    pub fn set_from_items<I, T>(&mut self, category: ConfigurationCategory, items: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.set(category, digest_items(items));
    }

    /// Every slot in ordinal order.
    pub fn values(&self) -> &[u64; ConfigurationCategory::COUNT] {
        &self.slots
    }

    /// Renders every slot as a base-36 string, in ordinal order.
    pub fn as_strings(&self) -> Vec<String> {
        self.slots.iter().map(|&v| to_base36(v)).collect()
    }

    /// The version digest of [`ConfigurationCategory`].
    pub fn version_digest() -> u64 {
        schema_version_digest::<ConfigurationCategory>()
    }

    /// Flattens the container into a persisted record: one slot per
    /// category followed by the version digest, all reinterpreted as `i64`.
    pub fn to_record(&self) -> Vec<i64> {
        self.slots
            .iter()
            .copied()
            .chain(std::iter::once(Self::version_digest()))
            .map(|v| v as i64)
            .collect()
    }

    /// Compares a persisted record against this container.
    ///
    /// Returns a human-readable reason when the record cannot be trusted or
    /// any category differs, `None` when they match.
    pub fn mismatch_against_record(&self, record: &[i64]) -> Option<String> {
        let expected_len = ConfigurationCategory::COUNT + 1;
        if record.len() != expected_len {
            return Some(format!(
                "configuration digest record has {} slots, expected {expected_len}",
                record.len()
            ));
        }
        let stored_version = record[ConfigurationCategory::COUNT] as u64;
        if stored_version != Self::version_digest() {
            return Some(format!(
                "configuration digest layout changed (stored version {}, current {})",
                to_base36(stored_version),
                to_base36(Self::version_digest())
            ));
        }
        ConfigurationCategory::ALL.iter().find_map(|&category| {
            let stored = record[category.ordinal()] as u64;
            category_mismatch(category, stored, self.get(category))
        })
    }
}

/// Builds the rebuild reason for a single category, or `None` if the values agree.
pub fn category_mismatch(
    category: ConfigurationCategory,
    stored: u64,
    current: u64,
) -> Option<String> {
    (stored != current).then(|| {
        format!(
            "{} changed (stored {}, current {})",
            category.description(),
            to_base36(stored),
            to_base36(current)
        )
    })
}

/// Digests an ordered list of byte strings. Each item is length-prefixed so
/// that item boundaries are significant.
pub fn digest_items<I, T>(items: I) -> u64
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut hasher = Xxh3::new();
    for item in items {
        let bytes = item.as_ref();
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hasher.digest()
}

/// Renders an unsigned value in lowercase base 36.
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(13);
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Parses a base-36 string produced by [`to_base36`].
pub fn parse_base36(s: &str) -> Option<u64> {
    u64::from_str_radix(s, 36).ok()
}
