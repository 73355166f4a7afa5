//! # Scan Attribution
//!
//! The anti-replay decision: is a candidate scan a new exposure or a
//! repeat?
//!
//! A scan is a duplicate when the store holds a fact for the same
//! (ad, location) inside the cool-down window that matches EITHER the
//! session id OR the (address, agent) pair. The two keys cover each
//! other's blind spots: clearing cookies changes the session id but not the
//! client fingerprint, while a mobile browser transition keeps the cookie
//! but may change the address.
//!
//! `now` is always passed in, never read from the clock, so the policy is
//! testable without real time passing. The read check before the append is
//! advisory only; the store's atomic uniqueness constraint settles races.

use chrono::{DateTime, Duration, Utc};

use crate::store::{ScanFact, ScanStore, StoreError};

/// A normal decision, distinct from store failures: `Duplicate` is not an
/// error and must not be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted(ScanFact),
    Duplicate,
}

pub struct ScanAttributor<S> {
    store: S,
    window: Duration,
}

impl<S: ScanStore> ScanAttributor<S> {
    pub fn new(store: S, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decides accept/duplicate for one candidate scan and, on accept,
    /// persists the fact. A store `Conflict` means another request won the
    /// race for the same exposure, so it converges to `Duplicate`.
    #[allow(clippy::too_many_arguments)]
    pub async fn attribute(
        &self,
        ad_id: &str,
        location_id: &str,
        session_id: &str,
        source_address: &str,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome, StoreError> {
        let since = now - self.window;

        let existing = self
            .store
            .find_recent(ad_id, location_id, session_id, source_address, user_agent, since)
            .await?;

        if existing.is_some() {
            return Ok(Outcome::Duplicate);
        }

        let fact = ScanFact {
            ad_id: ad_id.to_string(),
            location_id: location_id.to_string(),
            client_session_id: session_id.to_string(),
            source_address: source_address.to_string(),
            user_agent: user_agent.to_string(),
            observed_at: now,
        };

        match self.store.append(&fact).await {
            Ok(()) => Ok(Outcome::Accepted(fact)),
            Err(StoreError::Conflict) => Ok(Outcome::Duplicate),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{Outcome, ScanAttributor};
    use crate::store::{MemoryScanStore, ScanFact, ScanStore, StoreError};

    const WINDOW_HOURS: i64 = 24;

    fn attributor() -> ScanAttributor<MemoryScanStore> {
        let window = Duration::hours(WINDOW_HOURS);

        ScanAttributor::new(MemoryScanStore::new(window), window)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn attribute(
        attributor: &ScanAttributor<impl ScanStore>,
        session: &str,
        address: &str,
        now: DateTime<Utc>,
    ) -> Outcome {
        attributor
            .attribute("ad1", "loc9", session, address, "agent", now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_scan_is_duplicate() {
        let attributor = attributor();

        let first = attribute(&attributor, "s1", "1.2.3.4", t(1_000)).await;
        let second = attribute(&attributor, "s1", "1.2.3.4", t(1_000)).await;

        assert!(matches!(first, Outcome::Accepted(_)));
        assert_eq!(second, Outcome::Duplicate);
    }

    #[tokio::test]
    async fn test_accepted_fact_carries_now() {
        let attributor = attributor();

        match attribute(&attributor, "s1", "1.2.3.4", t(1_000)).await {
            Outcome::Accepted(fact) => {
                assert_eq!(fact.observed_at, t(1_000));
                assert_eq!(fact.ad_id, "ad1");
                assert_eq!(fact.location_id, "loc9");
                assert_eq!(fact.client_session_id, "s1");
            }
            Outcome::Duplicate => panic!("first scan must be accepted"),
        }
    }

    #[tokio::test]
    async fn test_window_expiry_counts_again() {
        let attributor = attributor();
        let window_secs = Duration::hours(WINDOW_HOURS).num_seconds();

        let first = attribute(&attributor, "s1", "1.2.3.4", t(1_000)).await;
        let after = attribute(&attributor, "s1", "1.2.3.4", t(1_000 + window_secs + 1)).await;

        assert!(matches!(first, Outcome::Accepted(_)));
        assert!(matches!(after, Outcome::Accepted(_)));
    }

    #[tokio::test]
    async fn test_just_inside_window_is_duplicate() {
        let attributor = attributor();
        let window_secs = Duration::hours(WINDOW_HOURS).num_seconds();

        attribute(&attributor, "s1", "1.2.3.4", t(1_000)).await;
        let inside = attribute(&attributor, "s1", "1.2.3.4", t(1_000 + window_secs - 1)).await;

        assert_eq!(inside, Outcome::Duplicate);
    }

    #[tokio::test]
    async fn test_same_address_different_session_is_duplicate() {
        let attributor = attributor();

        attribute(&attributor, "sessionA", "1.2.3.4", t(1_000)).await;
        let second = attribute(&attributor, "sessionB", "1.2.3.4", t(1_001)).await;

        assert_eq!(second, Outcome::Duplicate);
    }

    #[tokio::test]
    async fn test_same_session_different_address_is_duplicate() {
        let attributor = attributor();

        attribute(&attributor, "sessionA", "1.2.3.4", t(1_000)).await;
        let second = attribute(&attributor, "sessionA", "5.6.7.8", t(1_001)).await;

        assert_eq!(second, Outcome::Duplicate);
    }

    #[tokio::test]
    async fn test_unrelated_client_is_accepted() {
        let attributor = attributor();

        attribute(&attributor, "sessionA", "1.2.3.4", t(1_000)).await;
        let other = attribute(&attributor, "sessionB", "5.6.7.8", t(1_001)).await;

        assert!(matches!(other, Outcome::Accepted(_)));
    }

    #[tokio::test]
    async fn test_different_pair_is_independent() {
        let attributor = attributor();

        attribute(&attributor, "s1", "1.2.3.4", t(1_000)).await;

        let other_ad = attributor
            .attribute("ad2", "loc9", "s1", "1.2.3.4", "agent", t(1_001))
            .await
            .unwrap();

        assert!(matches!(other_ad, Outcome::Accepted(_)));
    }

    /// Store whose advisory read never hits, forcing the append to settle
    /// duplicates, as happens when two requests pass the read together.
    struct BlindStore(MemoryScanStore);

    #[async_trait]
    impl ScanStore for BlindStore {
        async fn find_recent(
            &self,
            _ad_id: &str,
            _location_id: &str,
            _session_id: &str,
            _source_address: &str,
            _user_agent: &str,
            _since: DateTime<Utc>,
        ) -> Result<Option<ScanFact>, StoreError> {
            Ok(None)
        }

        async fn append(&self, fact: &ScanFact) -> Result<(), StoreError> {
            self.0.append(fact).await
        }

        async fn list_all(&self) -> Result<Vec<ScanFact>, StoreError> {
            self.0.list_all().await
        }
    }

    #[tokio::test]
    async fn test_append_conflict_converges_to_duplicate() {
        let window = Duration::hours(WINDOW_HOURS);
        let attributor = ScanAttributor::new(BlindStore(MemoryScanStore::new(window)), window);

        let first = attribute(&attributor, "s1", "1.2.3.4", t(1_000)).await;
        let second = attribute(&attributor, "s1", "1.2.3.4", t(1_000)).await;

        assert!(matches!(first, Outcome::Accepted(_)));
        assert_eq!(second, Outcome::Duplicate);
    }

    /// Store that is down: every call fails transiently.
    struct DownStore;

    #[async_trait]
    impl ScanStore for DownStore {
        async fn find_recent(
            &self,
            _ad_id: &str,
            _location_id: &str,
            _session_id: &str,
            _source_address: &str,
            _user_agent: &str,
            _since: DateTime<Utc>,
        ) -> Result<Option<ScanFact>, StoreError> {
            Err(StoreError::Unavailable("connection timed out".to_string()))
        }

        async fn append(&self, _fact: &ScanFact) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection timed out".to_string()))
        }

        async fn list_all(&self) -> Result<Vec<ScanFact>, StoreError> {
            Err(StoreError::Unavailable("connection timed out".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_outage_propagates_not_duplicate() {
        let window = Duration::hours(WINDOW_HOURS);
        let attributor = ScanAttributor::new(DownStore, window);

        let result = attributor
            .attribute("ad1", "loc9", "s1", "1.2.3.4", "agent", t(1_000))
            .await;

        // The decision stays unresolved: a transient failure must surface
        // as such, never be misread as a duplicate.
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_append_outage_propagates() {
        /// Read succeeds, write fails: the outage hits mid-decision.
        struct WriteDownStore;

        #[async_trait]
        impl ScanStore for WriteDownStore {
            async fn find_recent(
                &self,
                _ad_id: &str,
                _location_id: &str,
                _session_id: &str,
                _source_address: &str,
                _user_agent: &str,
                _since: DateTime<Utc>,
            ) -> Result<Option<ScanFact>, StoreError> {
                Ok(None)
            }

            async fn append(&self, _fact: &ScanFact) -> Result<(), StoreError> {
                Err(StoreError::Unavailable("connection reset".to_string()))
            }

            async fn list_all(&self) -> Result<Vec<ScanFact>, StoreError> {
                Ok(Vec::new())
            }
        }

        let window = Duration::hours(WINDOW_HOURS);
        let attributor = ScanAttributor::new(WriteDownStore, window);

        let result = attributor
            .attribute("ad1", "loc9", "s1", "1.2.3.4", "agent", t(1_000))
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_concurrent_race_accepts_exactly_once() {
        let window = Duration::hours(WINDOW_HOURS);
        let attributor = Arc::new(ScanAttributor::new(MemoryScanStore::new(window), window));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let attributor = attributor.clone();
            handles.push(tokio::spawn(async move {
                attributor
                    .attribute("ad1", "loc9", "s1", "1.2.3.4", "agent", t(1_000))
                    .await
                    .unwrap()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Outcome::Accepted(_)) {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 1);
    }
}
