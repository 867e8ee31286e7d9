use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::api::ApiClient;
use crate::errors::AppError;
use crate::models::{RestaurantDetail, Tone};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DetailKey {
    pub name: String,
    pub topic: Option<String>,
    pub tone: Tone,
}

impl DetailKey {
    pub fn new(name: impl Into<String>, topic: Option<&str>, tone: Tone) -> Self {
        Self { name: name.into(), topic: topic.map(str::to_string), tone }
    }
}

/// Read-through cache of restaurant details. Entries are never evicted;
/// identical concurrent misses both fetch and the last write wins.
#[derive(Clone, Default)]
pub struct DetailCache {
    entries: Arc<RwLock<HashMap<DetailKey, RestaurantDetail>>>,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &DetailKey) -> Option<RestaurantDetail> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: DetailKey, detail: RestaurantDetail) {
        self.entries.write().await.insert(key, detail);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn get_or_fetch(&self, api: &ApiClient, key: DetailKey) -> Result<RestaurantDetail, AppError> {
        if let Some(hit) = self.get(&key).await {
            debug!("Detail cache hit for {}", key.name);
            return Ok(hit);
        }

        let detail = api
            .fetch_restaurant(&key.name, key.topic.as_deref(), key.tone)
            .await
            .map_err(|e| {
                error!("Failed to load details for {}: {e}", key.name);
                e
            })?;
        self.insert(key, detail.clone()).await;
        Ok(detail)
    }
}
