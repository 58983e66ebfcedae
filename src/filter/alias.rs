use crate::config::AliasRules;

/// Lower-case, strip `_`, `-` and whitespace, then apply the configured rewrites.
pub fn normalize_key(key: &str, rules: &AliasRules) -> String {
    let mut normalized: String = key.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '_' | '-') && !c.is_whitespace())
        .collect();
    for (from, to) in &rules.rewrites {
        if !from.is_empty() {
            normalized = normalized.replace(from.as_str(), to);
        }
    }
    normalized
}

/// An attribute key prepared for alias comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasKey {
    normalized: String,
    /// The raw key hit the truncation length, so it may be a cut-off prefix.
    truncated: bool,
}

impl AliasKey {
    pub fn new(raw: &str, rules: &AliasRules) -> Self {
        Self {
            normalized: normalize_key(raw, rules),
            truncated: rules.truncated_key_length == Some(raw.chars().count()),
        }
    }

    #[inline]
    pub fn normalized(&self) -> &str { &self.normalized }

    /// Equal normalized forms, or a truncated key that prefixes the other.
    pub fn is_equivalent(&self, other: &AliasKey) -> bool {
        if self.normalized.is_empty() || other.normalized.is_empty() {
            return false;
        }
        self.normalized == other.normalized
            || (self.truncated && other.normalized.starts_with(&self.normalized))
            || (other.truncated && self.normalized.starts_with(&other.normalized))
    }
}

pub fn keys_equivalent(a: &str, b: &str, rules: &AliasRules) -> bool {
    AliasKey::new(a, rules).is_equivalent(&AliasKey::new(b, rules))
}
