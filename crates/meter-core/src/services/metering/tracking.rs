//! Seen-set tracking
//!
//! Records which clients, client versions, target languages and services each
//! key has used. Analytics only: nothing here feeds a quota decision.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::MeterError;
use super::layout::KeyLayout;
use super::UsageRequest;
use crate::db::KvStore;

/// Dimensions tracked per key
pub const DIMENSIONS: [&str; 4] = ["client", "client_version", "language", "service"];

/// Everything a key has been seen using
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenDimensions {
    pub clients: Vec<String>,
    pub client_versions: Vec<String>,
    pub languages: Vec<String>,
    pub services: Vec<String>,
}

/// Writes and reads per-key seen sets
#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<dyn KvStore>,
    layout: KeyLayout,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn KvStore>, layout: KeyLayout) -> Self {
        Self { store, layout }
    }

    /// Add the request's dimensions to the key's seen sets
    pub async fn record(&self, request: &UsageRequest) -> Result<(), MeterError> {
        let values = [
            request.client.as_deref(),
            request.client_version.as_deref(),
            request.language.as_deref(),
            Some(request.service.as_str()),
        ];

        for (dimension, value) in DIMENSIONS.iter().zip(values) {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            let added = self
                .store
                .add_member(&self.layout.seen(dimension, &request.api_key), value, None)
                .await?;
            if added {
                log::debug!(
                    "[meter:authorize] {} first seen with {} {}",
                    request.api_key,
                    dimension,
                    value
                );
            }
        }
        Ok(())
    }

    /// Seen sets of `api_key`, each sorted
    pub async fn seen(&self, api_key: &str) -> Result<SeenDimensions, MeterError> {
        let mut sets = Vec::with_capacity(DIMENSIONS.len());
        for dimension in DIMENSIONS {
            sets.push(self.store.members(&self.layout.seen(dimension, api_key)).await?);
        }
        let mut sets = sets.into_iter();
        Ok(SeenDimensions {
            clients: sets.next().unwrap_or_default(),
            client_versions: sets.next().unwrap_or_default(),
            languages: sets.next().unwrap_or_default(),
            services: sets.next().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::services::metering::RequestType;

    fn request(service: &str, language: Option<&str>) -> UsageRequest {
        UsageRequest {
            language: language.map(str::to_string),
            client: Some("awesometts".to_string()),
            client_version: Some("1.2.0".to_string()),
            ..UsageRequest::new("k1", service, RequestType::Audio, 10)
        }
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let tracker = UsageTracker::new(Arc::new(MemoryStore::new()), KeyLayout::default());

        tracker.record(&request("Azure", Some("fr"))).await.unwrap();
        tracker.record(&request("Google", Some("fr"))).await.unwrap();
        tracker.record(&request("Azure", None)).await.unwrap();

        let seen = tracker.seen("k1").await.unwrap();
        assert_eq!(seen.services, vec!["Azure", "Google"]);
        assert_eq!(seen.languages, vec!["fr"]);
        assert_eq!(seen.clients, vec!["awesometts"]);
        assert_eq!(seen.client_versions, vec!["1.2.0"]);
    }

    #[tokio::test]
    async fn test_unknown_key_has_empty_sets() {
        let tracker = UsageTracker::new(Arc::new(MemoryStore::new()), KeyLayout::default());
        assert_eq!(tracker.seen("nobody").await.unwrap(), SeenDimensions::default());
    }
}
