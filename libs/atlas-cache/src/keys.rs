//! Unified cache key schema
//!
//! Every call site builds keys through these helpers so invalidation
//! patterns stay aligned with what was written.
//! Key format: `v{VERSION}:{family}:{identifier}[:sub_key]`

/// Cache schema version - increment when changing key formats
pub const CACHE_VERSION: u32 = 1;

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    // ============= Search =============

    /// Search result cache, keyed by query hash
    /// Format: v1:search:{query_hash}
    pub fn search(query_hash: &str) -> String {
        format!("v{}:search:{}", CACHE_VERSION, query_hash)
    }

    pub fn search_pattern() -> String {
        format!("v{}:search:*", CACHE_VERSION)
    }

    // ============= Entities =============

    /// Entity detail cache
    /// Format: v1:entity:{entity_id}
    pub fn entity(entity_id: &str) -> String {
        format!("v{}:entity:{}", CACHE_VERSION, entity_id)
    }

    /// Entity neighborhood cache
    /// Format: v1:entity:{entity_id}:neighbors
    pub fn entity_neighbors(entity_id: &str) -> String {
        format!("v{}:entity:{}:neighbors", CACHE_VERSION, entity_id)
    }

    /// Pattern for one entity and its sub-keys
    pub fn entity_pattern(entity_id: &str) -> String {
        format!("v{}:entity:{}*", CACHE_VERSION, entity_id)
    }

    // ============= Sources =============

    /// Source detail cache
    pub fn source(source_id: &str) -> String {
        format!("v{}:source:{}", CACHE_VERSION, source_id)
    }

    /// Per-owner source listing
    pub fn source_list(owner_id: &str) -> String {
        format!("v{}:source:list:{}", CACHE_VERSION, owner_id)
    }

    /// Pattern for every source key
    pub fn source_pattern() -> String {
        format!("v{}:source:*", CACHE_VERSION)
    }

    // ============= Auth =============

    /// Token verification cache, keyed by token hash (never the raw token)
    pub fn auth_token(token_hash: &str) -> String {
        format!("v{}:auth:{}", CACHE_VERSION, token_hash)
    }

    pub fn auth_pattern() -> String {
        format!("v{}:auth:*", CACHE_VERSION)
    }

    // ============= Tools =============

    /// Tool server capability listing
    pub fn tool_capabilities() -> String {
        format!("v{}:tools:capabilities", CACHE_VERSION)
    }

    // ============= Utility =============

    /// Extract the key family for metric labels
    /// Format: v{N}:{family}:...
    pub fn family(key: &str) -> Option<&str> {
        key.split(':').nth(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_key_includes_version() {
        assert_eq!(CacheKey::search("abc123"), "v1:search:abc123");
    }

    #[test]
    fn entity_keys_share_pattern() {
        let detail = CacheKey::entity("42");
        let neighbors = CacheKey::entity_neighbors("42");
        let pattern = CacheKey::entity_pattern("42");

        assert_eq!(detail, "v1:entity:42");
        assert_eq!(neighbors, "v1:entity:42:neighbors");
        assert!(detail.starts_with(pattern.trim_end_matches('*')));
        assert!(neighbors.starts_with(pattern.trim_end_matches('*')));
    }

    #[test]
    fn family_is_extracted() {
        assert_eq!(CacheKey::family("v1:search:abc"), Some("search"));
        assert_eq!(CacheKey::family("v1:entity:42:neighbors"), Some("entity"));
        assert_eq!(CacheKey::family("junk"), None);
    }
}
