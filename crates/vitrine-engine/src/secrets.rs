use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use vitrine_contracts::providers::{
    parse_provider_order, KeySource, ProviderSecrets, RemovalProviderId, ResolvedKey, SecretKey,
    SecretsStatus,
};
use vitrine_contracts::store::DocumentStore;

use crate::config::EnvVars;
use crate::http::truncate_text;

pub const SECRET_CACHE_TTL: Duration = Duration::from_secs(60);
pub const PROVIDER_ORDER_ENV: &str = "BACKGROUND_REMOVAL_PROVIDERS";
pub const PROVIDER_ORDER_FIELD: &str = "background_removal_provider_order";

/// Key-value document holding persisted provider secrets.
pub trait SecretStore: Send + Sync {
    fn read(&self) -> anyhow::Result<Map<String, Value>>;
    fn upsert(&self, changes: Map<String, Value>) -> anyhow::Result<()>;
}

impl SecretStore for DocumentStore {
    fn read(&self) -> anyhow::Result<Map<String, Value>> {
        DocumentStore::read(self)
    }

    fn upsert(&self, changes: Map<String, Value>) -> anyhow::Result<()> {
        DocumentStore::upsert(self, changes)
    }
}

/// Environment-only deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecretStore;

impl SecretStore for NoSecretStore {
    fn read(&self) -> anyhow::Result<Map<String, Value>> {
        Ok(Map::new())
    }

    fn upsert(&self, _changes: Map<String, Value>) -> anyhow::Result<()> {
        anyhow::bail!("no secret store is configured")
    }
}

#[derive(Debug, Default)]
struct CacheSlot {
    /// Bumped by every invalidation.
    generation: u64,
    entry: Option<(Instant, ProviderSecrets)>,
}

#[derive(Debug)]
pub struct SecretCache {
    ttl: Duration,
    slot: Mutex<CacheSlot>,
}

impl SecretCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(CacheSlot::default()),
        }
    }

    pub fn get(&self) -> Option<ProviderSecrets> {
        let guard = self.slot.lock().ok()?;
        guard
            .entry
            .as_ref()
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, secrets)| secrets.clone())
    }

    /// Token to hand back to [`SecretCache::put`] once a load finishes.
    pub fn generation(&self) -> u64 {
        self.slot.lock().map(|guard| guard.generation).unwrap_or(u64::MAX)
    }

    /// Stores `secrets` unless the cache was invalidated after `generation` was taken.
    pub fn put(&self, generation: u64, secrets: ProviderSecrets) -> bool {
        let Ok(mut guard) = self.slot.lock() else {
            return false;
        };
        if guard.generation != generation {
            return false;
        }
        guard.entry = Some((Instant::now(), secrets));
        true
    }

    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.slot.lock() {
            guard.generation = guard.generation.wrapping_add(1);
            guard.entry = None;
        }
    }
}

/// Merges environment and stored credentials: environment wins per key.
pub struct ProviderSecretResolver {
    env: EnvVars,
    store: Arc<dyn SecretStore>,
    cache: SecretCache,
}

impl ProviderSecretResolver {
    pub fn new(env: EnvVars, store: Arc<dyn SecretStore>) -> Self {
        Self::with_ttl(env, store, SECRET_CACHE_TTL)
    }

    pub fn with_ttl(env: EnvVars, store: Arc<dyn SecretStore>, ttl: Duration) -> Self {
        Self {
            env,
            store,
            cache: SecretCache::new(ttl),
        }
    }

    /// Never fails; an unreadable store degrades to environment-only secrets.
    pub fn resolve(&self) -> ProviderSecrets {
        if let Some(cached) = self.cache.get() {
            return cached;
        }
        let generation = self.cache.generation();
        let secrets = self.load();
        self.cache.put(generation, secrets.clone());
        secrets
    }

    pub fn status(&self) -> SecretsStatus {
        self.resolve().status()
    }

    /// Write to the store, then drop the cached view.
    pub fn update(&self, changes: Map<String, Value>) -> anyhow::Result<()> {
        let result = self.store.upsert(changes);
        self.cache.invalidate();
        result
    }

    pub fn set_key(&self, key: SecretKey, value: Option<&str>) -> anyhow::Result<()> {
        let mut changes = Map::new();
        changes.insert(
            key.document_field().to_string(),
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| Value::String(value.to_string()))
                .unwrap_or(Value::Null),
        );
        self.update(changes)
    }

    pub fn set_provider_order(&self, order: &[RemovalProviderId]) -> anyhow::Result<()> {
        let mut changes = Map::new();
        changes.insert(
            PROVIDER_ORDER_FIELD.to_string(),
            Value::Array(
                order
                    .iter()
                    .map(|provider| Value::String(provider.as_str().to_string()))
                    .collect(),
            ),
        );
        self.update(changes)
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    fn load(&self) -> ProviderSecrets {
        let (document, store_error) = match self.store.read() {
            Ok(document) => (document, None),
            Err(err) => (Map::new(), Some(truncate_text(&format!("{err:#}"), 300))),
        };

        let resolve_key = |key: SecretKey| -> ResolvedKey {
            if let Some(value) = self.env.first(key.env_vars()) {
                return ResolvedKey {
                    value: Some(value),
                    source: KeySource::Environment,
                };
            }
            document
                .get(key.document_field())
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| ResolvedKey {
                    value: Some(value.to_string()),
                    source: KeySource::Store,
                })
                .unwrap_or_else(ResolvedKey::absent)
        };

        let stored_order = document.get(PROVIDER_ORDER_FIELD).and_then(|value| match value {
            Value::String(raw) => parse_provider_order(raw),
            Value::Array(rows) => parse_provider_order(
                &rows
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<&str>>()
                    .join(","),
            ),
            _ => None,
        });
        let (provider_order, provider_order_source) = match self
            .env
            .get(PROVIDER_ORDER_ENV)
            .and_then(|raw| parse_provider_order(&raw))
        {
            Some(order) => (order, KeySource::Environment),
            None => match stored_order {
                Some(order) => (order, KeySource::Store),
                None => (RemovalProviderId::DEFAULT_ORDER.to_vec(), KeySource::Absent),
            },
        };

        ProviderSecrets {
            gemini: resolve_key(SecretKey::Gemini),
            removebg: resolve_key(SecretKey::Removebg),
            clipdrop: resolve_key(SecretKey::Clipdrop),
            provider_order,
            provider_order_source,
            store_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use serde_json::{json, Map, Value};
    use vitrine_contracts::providers::{KeySource, RemovalProviderId, SecretKey};
    use vitrine_contracts::store::DocumentStore;

    use super::{NoSecretStore, ProviderSecretResolver, SecretCache, SecretStore};
    use crate::config::EnvVars;

    /// Snapshots the document, then parks the first read until released.
    struct GatedStore {
        document: Mutex<Map<String, Value>>,
        entered: Mutex<Option<Sender<()>>>,
        release: Mutex<Option<Receiver<()>>>,
    }

    impl SecretStore for GatedStore {
        fn read(&self) -> anyhow::Result<Map<String, Value>> {
            let snapshot = self
                .document
                .lock()
                .map(|document| document.clone())
                .unwrap_or_default();
            let entered = self.entered.lock().ok().and_then(|mut slot| slot.take());
            if let Some(entered) = entered {
                entered.send(())?;
                let release = self.release.lock().ok().and_then(|mut slot| slot.take());
                if let Some(release) = release {
                    release.recv()?;
                }
            }
            Ok(snapshot)
        }

        fn upsert(&self, changes: Map<String, Value>) -> anyhow::Result<()> {
            if let Ok(mut document) = self.document.lock() {
                document.extend(changes);
            }
            Ok(())
        }
    }

    struct BrokenStore;

    impl SecretStore for BrokenStore {
        fn read(&self) -> anyhow::Result<Map<String, Value>> {
            anyhow::bail!("secret store unreachable")
        }

        fn upsert(&self, _changes: Map<String, Value>) -> anyhow::Result<()> {
            anyhow::bail!("secret store unreachable")
        }
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn environment_beats_store_per_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = DocumentStore::new(temp.path().join("secrets.json"));
        store.upsert(obj(json!({
            "gemini_api_key": "stored-gemini",
            "removebg_api_key": "stored-removebg",
            "background_removal_provider_order": ["clipdrop", "removebg"],
        })))?;
        let env = EnvVars::from_pairs([("GOOGLE_API_KEY", "env-gemini")]);
        let resolver = ProviderSecretResolver::new(env, Arc::new(store));

        let secrets = resolver.resolve();
        assert_eq!(secrets.api_key(SecretKey::Gemini), Some("env-gemini"));
        assert_eq!(secrets.gemini.source, KeySource::Environment);
        assert_eq!(secrets.api_key(SecretKey::Removebg), Some("stored-removebg"));
        assert_eq!(secrets.removebg.source, KeySource::Store);
        assert_eq!(secrets.clipdrop.source, KeySource::Absent);
        assert_eq!(
            secrets.provider_order,
            vec![RemovalProviderId::Clipdrop, RemovalProviderId::Removebg]
        );
        assert_eq!(secrets.provider_order_source, KeySource::Store);
        Ok(())
    }

    #[test]
    fn cached_view_expires_after_ttl() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("secrets.json");
        let resolver = ProviderSecretResolver::with_ttl(
            EnvVars::default(),
            Arc::new(DocumentStore::new(&path)),
            Duration::from_millis(80),
        );
        assert_eq!(resolver.resolve().api_key(SecretKey::Clipdrop), None);

        DocumentStore::new(&path).upsert(obj(json!({"clipdrop_api_key": "late"})))?;
        assert_eq!(resolver.resolve().api_key(SecretKey::Clipdrop), None);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(resolver.resolve().api_key(SecretKey::Clipdrop), Some("late"));
        Ok(())
    }

    #[test]
    fn writes_invalidate_the_cache() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let resolver = ProviderSecretResolver::new(
            EnvVars::default(),
            Arc::new(DocumentStore::new(temp.path().join("secrets.json"))),
        );
        assert_eq!(resolver.resolve().api_key(SecretKey::Removebg), None);

        resolver.set_key(SecretKey::Removebg, Some(" rb-key "))?;
        assert_eq!(resolver.resolve().api_key(SecretKey::Removebg), Some("rb-key"));

        resolver.set_provider_order(&[RemovalProviderId::Clipdrop])?;
        assert_eq!(
            resolver.resolve().provider_order,
            vec![RemovalProviderId::Clipdrop]
        );

        resolver.set_key(SecretKey::Removebg, None)?;
        assert_eq!(resolver.resolve().api_key(SecretKey::Removebg), None);
        Ok(())
    }

    #[test]
    fn load_started_before_a_write_is_not_cached() -> anyhow::Result<()> {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = GatedStore {
            document: Mutex::new(Map::new()),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        };
        let resolver = Arc::new(ProviderSecretResolver::new(
            EnvVars::default(),
            Arc::new(store),
        ));

        let reader = {
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || resolver.resolve())
        };
        entered_rx.recv_timeout(Duration::from_secs(5))?;
        resolver.set_key(SecretKey::Clipdrop, Some("fresh"))?;
        release_tx.send(())?;
        let in_flight = reader
            .join()
            .map_err(|_| anyhow::anyhow!("resolver thread panicked"))?;

        assert_eq!(in_flight.api_key(SecretKey::Clipdrop), None);
        assert_eq!(resolver.resolve().api_key(SecretKey::Clipdrop), Some("fresh"));
        Ok(())
    }

    #[test]
    fn invalidation_outdates_pending_puts() {
        let cache = SecretCache::new(Duration::from_secs(60));
        let resolver = ProviderSecretResolver::new(EnvVars::default(), Arc::new(NoSecretStore));
        let generation = cache.generation();
        cache.invalidate();
        assert!(!cache.put(generation, resolver.resolve()));
        assert!(cache.get().is_none());
        assert!(cache.put(cache.generation(), resolver.resolve()));
        assert!(cache.get().is_some());
    }

    #[test]
    fn broken_store_degrades_to_environment() {
        let env = EnvVars::from_pairs([
            ("REMOVE_BG_API_KEY", "env-rb"),
            ("BACKGROUND_REMOVAL_PROVIDERS", "clipdrop"),
        ]);
        let resolver = ProviderSecretResolver::new(env, Arc::new(BrokenStore));
        let status = resolver.status();
        assert!(status.store_error.is_some());
        assert!(status.providers[1].configured);
        assert_eq!(status.provider_order, vec![RemovalProviderId::Clipdrop]);
        assert_eq!(status.provider_order_source, KeySource::Environment);
        assert!(resolver.set_key(SecretKey::Gemini, Some("x")).is_err());
    }

    #[test]
    fn default_order_without_any_configuration() {
        let resolver = ProviderSecretResolver::new(EnvVars::default(), Arc::new(NoSecretStore));
        let secrets = resolver.resolve();
        assert_eq!(secrets.provider_order, RemovalProviderId::DEFAULT_ORDER.to_vec());
        assert_eq!(secrets.provider_order_source, KeySource::Absent);
        assert!(secrets.store_error.is_none());
    }
}
