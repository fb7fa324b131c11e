//! Store key generation for limited identifiers.

use std::fmt;

/// The namespaced store key of an identifier.
///
/// Rendered as `{prefix}:{id}`. Identifiers are opaque and used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey {
    /// The namespace prefix
    pub prefix: String,
    /// The caller supplied identifier
    pub id: String,
}

impl LimitKey {
    /// Create a new key for `id` under `prefix`.
    pub fn new(prefix: &str, id: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            id: id.to_string(),
        }
    }

    /// The primary key holding the identifier's counters.
    pub fn primary(&self) -> String {
        format!("{}:{}", self.prefix, self.id)
    }

    /// A secondary key that lands in the same Redis Cluster slot as the primary key.
    ///
    /// The whole primary key is used as the hash tag, so as long as the
    /// primary key contains no `{`, both keys hash identically.
    ///
    /// The bundled evaluator keeps all tiers in the primary key and ignores a
    /// second key. This is for custom evaluators that need bookkeeping next to
    /// the counters; executors accept `[primary, co_located]` as the key list.
    pub fn co_located(&self, suffix: &str) -> String {
        format!("{{{}}}:{}", self.primary(), suffix)
    }
}

impl fmt::Display for LimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.id)
    }
}
