//! Three-component software versions reported by remote daemons.

use serde_json::Value;

/// `[major, minor, patch]`, compared lexicographically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SoftwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SoftwareVersion {
    /// Assumed for remotes that do not report a readable version
    pub const UNKNOWN: SoftwareVersion = SoftwareVersion::new(0, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Protocol level peers compare against their rewrite thresholds
    pub const PROTOCOL: SoftwareVersion = SoftwareVersion::new(0, 11, 1);

    /// Version reported to other daemons
    pub const fn current() -> Self {
        Self::PROTOCOL
    }

    /// Parse `"1.2.3"`; missing trailing components count as zero
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = [0u32; 3];
        let mut count = 0;
        for (slot, piece) in parts.iter_mut().zip(text.trim().split('.')) {
            // "3-beta" style suffixes on the last component are ignored
            let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
            *slot = digits.parse().ok()?;
            count += 1;
        }
        (count > 0).then(|| Self::new(parts[0], parts[1], parts[2]))
    }

    /// Parse a JSON array `[maj, min, patch]` or a dotted string
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) if !items.is_empty() && items.len() <= 3 => {
                let mut parts = [0u32; 3];
                for (slot, item) in parts.iter_mut().zip(items) {
                    *slot = u32::try_from(item.as_u64()?).ok()?;
                }
                Some(Self::new(parts[0], parts[1], parts[2]))
            }
            Value::String(text) => Self::parse(text),
            _ => None,
        }
    }

    pub fn to_json(self) -> Value {
        serde_json::json!([self.major, self.minor, self.patch])
    }
}

impl std::fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
