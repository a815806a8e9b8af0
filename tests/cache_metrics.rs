use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::DebuggingRecorder;
use serde::{Deserialize, Serialize};
use typecache::cache::{
    CacheConfig, CacheStore, ClassCache, MemoryStore, ReadFailurePolicy, StoreError, Surface,
    TypeRegistry,
};
use typecache::{Model, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Probe {
    id: u64,
}

impl Model for Probe {
    fn surface(surface: &mut Surface<Self>) {
        surface.method("answer", |this: Arc<Self>, _args: Vec<Value>| async move {
            Ok(Value::from(this.id * 2))
        });
    }
}

struct ReadOnlyStore {
    inner: MemoryStore,
}

#[async_trait]
impl CacheStore for ReadOnlyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Err(StoreError::backend("read-only"))
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Err(StoreError::backend("read-only"))
    }
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Hit and miss
    let cache = ClassCache::in_memory(Arc::new(TypeRegistry::new()), CacheConfig::default());
    cache.register::<Probe>(None).expect("probe registers");
    cache
        .enable_cache::<Probe>(".answer", None, None)
        .expect("enables answer");
    let probe = cache.instance(Probe { id: 21 }).expect("registered");
    for _ in 0..2 {
        let value = cache.call(&probe, "answer", vec![]).await.expect("call");
        assert_eq!(value, Value::from(42u64));
    }

    // Unresolvable type tag
    let decoded = cache
        .decode(r#"{"__cachedname":"Retired","id":1}"#)
        .expect("decodes");
    assert!(decoded.is_absent());

    // Store write failure
    let failing = ClassCache::new(
        Arc::new(TypeRegistry::new()),
        Arc::new(ReadOnlyStore {
            inner: MemoryStore::default(),
        }),
        CacheConfig {
            read_failure: ReadFailurePolicy::Fail,
            ..Default::default()
        },
    );
    failing.register::<Probe>(None).expect("probe registers");
    failing
        .enable_cache::<Probe>(".answer", None, None)
        .expect("enables answer");
    let probe = failing.instance(Probe { id: 1 }).expect("registered");
    assert!(failing.call(&probe, "answer", vec![]).await.is_err());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "typecache_hit_total",
        "typecache_miss_total",
        "typecache_store_error_total",
        "typecache_revive_unresolved_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
