//! Duplicate detection by source id and by normalized title

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::model::RawDocument;
use crate::service::cache::{CacheError, KeyValueStore};

pub const PROCESSED_PREFIX: &str = "processed:";
pub const FINGERPRINT_PREFIX: &str = "fingerprint:";
pub const LEASE_PREFIX: &str = "lease:";

/// Markers live for 30 days
pub const MARKER_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const FINGERPRINT_HEX_CHARS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("marker store error: {0}")]
    Store(#[from] CacheError),
}

/// Lower-case, keep alphanumerics and whitespace, collapse whitespace runs
pub fn normalize_title(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First 16 hex chars of the SHA-256 of the normalized title
pub fn fingerprint(title: &str) -> String {
    let mut hex = hex::encode(Sha256::digest(normalize_title(title).as_bytes()));
    hex.truncate(FINGERPRINT_HEX_CHARS);
    hex
}

pub struct Deduplicator {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            ttl: MARKER_TTL,
        }
    }

    fn identity_key(doc: &RawDocument) -> String {
        format!("{}{}", PROCESSED_PREFIX, doc.id)
    }

    fn content_key(doc: &RawDocument) -> String {
        format!("{}{}", FINGERPRINT_PREFIX, fingerprint(&doc.title))
    }

    fn lease_key(doc: &RawDocument) -> String {
        format!("{}{}", LEASE_PREFIX, doc.id)
    }

    /// True when either the id or the title fingerprint has been seen
    pub async fn is_duplicate(&self, doc: &RawDocument) -> Result<bool, DedupError> {
        if self.store.exists(&Self::identity_key(doc)).await? {
            tracing::debug!(doc_id = %doc.id, "Duplicate by source id");
            return Ok(true);
        }
        if self.store.exists(&Self::content_key(doc)).await? {
            tracing::debug!(doc_id = %doc.id, title = %doc.title, "Duplicate by title fingerprint");
            return Ok(true);
        }
        Ok(false)
    }

    /// Write both markers. Returns true when this call created the identity
    /// marker, false when another worker got there first.
    pub async fn mark_processed(&self, doc: &RawDocument) -> Result<bool, DedupError> {
        let now = chrono::Utc::now().to_rfc3339();
        let created = self
            .store
            .set_nx_ex(&Self::identity_key(doc), &now, self.ttl)
            .await?;
        self.store
            .set_nx_ex(&Self::content_key(doc), &doc.id, self.ttl)
            .await?;
        Ok(created)
    }

    /// Lease the document id to `holder` for `ttl` while it is analyzed.
    ///
    /// Returns false when another holder has a live lease. A holder may take
    /// its own lease again, as happens when a consumer replays its history
    /// after a restart.
    pub async fn acquire_lease(
        &self,
        doc: &RawDocument,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DedupError> {
        let key = Self::lease_key(doc);
        if self.store.set_nx_ex(&key, holder, ttl).await? {
            return Ok(true);
        }
        Ok(self.store.get(&key).await?.as_deref() == Some(holder))
    }

    pub async fn release_lease(&self, doc: &RawDocument) -> Result<(), DedupError> {
        self.store.delete(&Self::lease_key(doc)).await?;
        Ok(())
    }

    /// Drop every marker and lease
    pub async fn reset(&self) -> Result<usize, DedupError> {
        let processed = self.store.delete_prefix(PROCESSED_PREFIX).await?;
        let fingerprints = self.store.delete_prefix(FINGERPRINT_PREFIX).await?;
        let leases = self.store.delete_prefix(LEASE_PREFIX).await?;
        tracing::info!(processed, fingerprints, leases, "Cleared dedup markers");
        Ok(processed + fingerprints + leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::cache::MemoryStore;
    use crate::service::fixtures;

    fn dedup() -> Deduplicator {
        Deduplicator::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("  Universal   Jailbreak:\tGradient-Based\nSuffixes! "),
            "universal jailbreak gradientbased suffixes"
        );
    }

    #[test]
    fn test_fingerprint_is_stable_and_fixed_width() {
        let a = fingerprint("Universal Jailbreak via Gradient-Based Suffix Optimization");
        let b = fingerprint("universal jailbreak via gradientbased suffix optimization");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, fingerprint("Suffix Optimization via Gradient-Based Universal Jailbreak"));
    }

    #[test]
    fn test_fingerprint_is_sha256_prefix_of_normalized_title() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223...
        assert_eq!(fingerprint("  ABC! "), "ba7816bf8f01cfea");
    }

    #[tokio::test]
    async fn test_same_id_is_duplicate_after_marking() {
        let dedup = dedup();
        let doc = fixtures::gcg_jailbreak();
        assert!(!dedup.is_duplicate(&doc).await.unwrap());

        assert!(dedup.mark_processed(&doc).await.unwrap());
        assert!(dedup.is_duplicate(&doc).await.unwrap());
        assert!(!dedup.mark_processed(&doc).await.unwrap());
    }

    #[tokio::test]
    async fn test_title_differing_in_case_and_punctuation_is_duplicate() {
        let dedup = dedup();
        let first = fixtures::jailbreak_paper("2401.00001", "Jailbreaking GPT-4: A Study");
        let revision = fixtures::jailbreak_paper("2401.00001v2", "jailbreaking gpt4 -- a study!");

        dedup.mark_processed(&first).await.unwrap();
        assert!(dedup.is_duplicate(&revision).await.unwrap());

        let other = fixtures::jailbreak_paper("2401.00002", "Jailbreaking GPT-5: A Study");
        assert!(!dedup.is_duplicate(&other).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_excludes_other_holders_until_released_or_expired() {
        let dedup = dedup();
        let doc = fixtures::gcg_jailbreak();
        let ttl = Duration::from_secs(60);

        assert!(dedup.acquire_lease(&doc, "worker_a", ttl).await.unwrap());
        assert!(dedup.acquire_lease(&doc, "worker_a", ttl).await.unwrap());
        assert!(!dedup.acquire_lease(&doc, "worker_b", ttl).await.unwrap());

        dedup.release_lease(&doc).await.unwrap();
        assert!(dedup.acquire_lease(&doc, "worker_b", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(dedup.acquire_lease(&doc, "worker_a", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_clears_markers() {
        let dedup = dedup();
        let doc = fixtures::gcg_jailbreak();
        dedup.mark_processed(&doc).await.unwrap();

        assert_eq!(dedup.reset().await.unwrap(), 2);
        assert!(!dedup.is_duplicate(&doc).await.unwrap());
    }
}
