//! Cache client behavior when the store or the source of record misbehaves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use castellan_cache::{
    AttributeCacheClient, AttributeLoader, CacheError, CacheSettings, InMemoryStore, LoadError,
};
use castellan_types::{AttributeSet, ServiceName, SubjectId};
use chrono::Utc;

#[derive(Default)]
struct FlakySource {
    down: AtomicBool,
    generation: AtomicUsize,
}

#[async_trait]
impl AttributeLoader for FlakySource {
    async fn load(
        &self,
        subject_id: SubjectId,
        service: &ServiceName,
    ) -> Result<AttributeSet, LoadError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(LoadError::SourceUnavailable("connection refused".to_string()));
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(AttributeSet::new(subject_id, service.clone(), Utc::now())
            .with_role(format!("generation_{generation}")))
    }
}

fn client(store: &Arc<InMemoryStore>, source: &Arc<FlakySource>) -> AttributeCacheClient {
    AttributeCacheClient::new(
        store.clone(),
        source.clone(),
        CacheSettings {
            ttl: Duration::from_secs(60),
            ..CacheSettings::default()
        },
    )
}

fn billing() -> ServiceName {
    ServiceName::new("billing_api").unwrap()
}

#[tokio::test]
async fn store_and_source_both_down_resolves_to_not_found() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(FlakySource::default());
    let client = client(&store, &source);

    store.set_available(false);
    source.down.store(true, Ordering::SeqCst);

    let result = client.get(SubjectId::new(42), &billing(), true).await;
    assert!(matches!(result, Ok(None)));
}

#[tokio::test(start_paused = true)]
async fn slow_store_read_times_out() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(FlakySource::default());
    let client = client(&store, &source);

    store.set_latency(Duration::from_secs(5));

    let err = client
        .get(SubjectId::new(42), &billing(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Timeout(d) if d == Duration::from_millis(250)));
}

#[tokio::test(start_paused = true)]
async fn slow_store_with_auto_refresh_still_answers() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(FlakySource::default());
    let client = client(&store, &source);

    store.set_latency(Duration::from_secs(5));

    let attrs = client
        .get(SubjectId::new(42), &billing(), true)
        .await
        .unwrap()
        .unwrap();
    assert!(attrs.has_role("generation_0"));
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_recomputed() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(FlakySource::default());
    let client = client(&store, &source);

    let first = client
        .get(SubjectId::new(42), &billing(), true)
        .await
        .unwrap()
        .unwrap();
    assert!(first.has_role("generation_0"));

    tokio::time::advance(Duration::from_secs(61)).await;

    let second = client
        .get(SubjectId::new(42), &billing(), true)
        .await
        .unwrap()
        .unwrap();
    assert!(second.has_role("generation_1"));
}

#[tokio::test]
async fn refresh_survives_failed_write_through() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(FlakySource::default());
    let client = client(&store, &source);

    store.set_available(false);
    let attrs = client.refresh(SubjectId::new(42), &billing()).await.unwrap();
    assert!(attrs.has_role("generation_0"));

    store.set_available(true);
    assert!(store.is_empty());
}
