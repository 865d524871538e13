//! Model registry
//!
//! Aggregates provider catalogs, blends in user preferences and custom
//! models, persists them, and publishes immutable snapshots.
//!
//! All read-modify-write sequences run under one registry-wide lock.
//! Network fetches happen before that lock is taken, so preference changes
//! never wait on a slow provider; a separate lock keeps catalog cycles from
//! overlapping each other.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::{ModelsSnapshot, ModelsState};
use crate::ai::provider::Provider;
use crate::ai::types::{AiModel, ModelConfig};
use crate::constants;
use crate::storage::{ConfigStore, RegistryConfig};

struct RegistryInner {
    /// Registration order, unique by id
    providers: Vec<Arc<dyn Provider>>,
    model_configs: BTreeMap<String, ModelConfig>,
    custom_models: Vec<AiModel>,
    /// Last-known provider catalog, in provider order
    provider_models: Vec<AiModel>,
    loaded: bool,
}

impl RegistryInner {
    fn id_taken(&self, id: &str) -> bool {
        self.provider_models
            .iter()
            .chain(self.custom_models.iter())
            .any(|m| m.id == id)
    }

    /// `base` with a random 8-character suffix, unused by any known model
    fn unique_id(&self, base: &str) -> String {
        loop {
            let suffix = Uuid::new_v4().simple().to_string();
            let candidate = format!("{}-{}", base, &suffix[..8]);
            if !self.id_taken(&candidate) {
                return candidate;
            }
        }
    }

    /// Rename custom models whose id a provider now ships
    ///
    /// The renamed model inherits a copy of the shared preferences, so both
    /// stay independently configurable. Returns `(old, new)` pairs.
    fn separate_custom_ids(&mut self) -> Vec<(String, String)> {
        let mut renamed = Vec::new();
        for index in 0..self.custom_models.len() {
            let id = self.custom_models[index].id.clone();
            if !self.provider_models.iter().any(|m| m.id == id) {
                continue;
            }
            let new_id = self.unique_id(&id);
            if let Some(config) = self.model_configs.get(&id).cloned() {
                self.model_configs.insert(
                    new_id.clone(),
                    ModelConfig {
                        model_id: new_id.clone(),
                        ..config
                    },
                );
            }
            self.custom_models[index].id = new_id.clone();
            renamed.push((id, new_id));
        }
        renamed
    }

    fn config_mut(&mut self, model_id: &str) -> &mut ModelConfig {
        self.model_configs
            .entry(model_id.to_string())
            .or_insert_with(|| ModelConfig::new(model_id))
    }

    /// Every model with its stored preferences applied
    fn resolved_models(&self) -> Vec<AiModel> {
        self.provider_models
            .iter()
            .chain(self.custom_models.iter())
            .cloned()
            .map(|mut model| {
                match self.model_configs.get(&model.id) {
                    Some(config) => {
                        model.enabled = config.enabled;
                        model.alias_name = config.alias_name.clone();
                    }
                    None => {
                        model.enabled = true;
                        model.alias_name = None;
                    }
                }
                model
            })
            .collect()
    }

    fn to_config(&self) -> RegistryConfig {
        RegistryConfig {
            model_configs: self.model_configs.values().cloned().collect(),
            custom_models: self.custom_models.clone(),
        }
    }
}

/// Process-wide catalog of models across all providers
///
/// Construct one at startup and share it (`Arc<ModelRegistry>`).
pub struct ModelRegistry {
    inner: Mutex<RegistryInner>,
    cycle: Mutex<()>,
    store: Arc<dyn ConfigStore>,
    models_tx: watch::Sender<Arc<ModelsSnapshot>>,
    state_tx: watch::Sender<ModelsState>,
    fetch_timeout: Duration,
}

impl ModelRegistry {
    /// Create a registry, loading persisted preferences from `store`
    ///
    /// A store that fails to load is logged and treated as empty.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        let config = store.load().unwrap_or_else(|e| {
            warn!("Failed to load registry config, starting empty: {:#}", e);
            RegistryConfig::default()
        });
        info!(
            configs = config.model_configs.len(),
            custom = config.custom_models.len(),
            "Registry config loaded"
        );

        let model_configs = config
            .model_configs
            .into_iter()
            .map(|c| (c.model_id.clone(), c))
            .collect();

        let (models_tx, _) = watch::channel(Arc::new(ModelsSnapshot::default()));
        let (state_tx, _) = watch::channel(ModelsState::Loading);

        Self {
            inner: Mutex::new(RegistryInner {
                providers: Vec::new(),
                model_configs,
                custom_models: config.custom_models,
                provider_models: Vec::new(),
                loaded: false,
            }),
            cycle: Mutex::new(()),
            store,
            models_tx,
            state_tx,
            fetch_timeout: constants::models::FETCH_TIMEOUT,
        }
    }

    /// Override the per-provider catalog fetch timeout
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    // =========================================================================
    // Providers
    // =========================================================================

    /// Add a provider; a later registration with the same id replaces it in place
    pub async fn register_provider(&self, provider: Arc<dyn Provider>) {
        let mut inner = self.inner.lock().await;
        match inner.providers.iter().position(|p| p.id() == provider.id()) {
            Some(index) => {
                debug!(provider = provider.id(), "Replacing registered provider");
                inner.providers[index] = provider;
            }
            None => {
                debug!(provider = provider.id(), "Registering provider");
                inner.providers.push(provider);
            }
        }
    }

    pub async fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.inner.lock().await.providers.clone()
    }

    pub async fn provider(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
        self.inner
            .lock()
            .await
            .providers
            .iter()
            .find(|p| p.id() == provider_id)
            .cloned()
    }

    /// Provider owning `model_id`, with the model as currently published
    pub async fn provider_for_model(&self, model_id: &str) -> Option<(Arc<dyn Provider>, AiModel)> {
        let model = self.get_model(model_id)?;
        let provider = self.provider(&model.provider_id).await?;
        Some((provider, model))
    }

    // =========================================================================
    // Catalog cycles
    // =========================================================================

    /// Load every working provider's catalog and publish the blended result
    pub async fn initialize(&self) -> ModelsState {
        self.run_cycle(false).await
    }

    /// Force every provider to re-fetch, then initialize
    ///
    /// Returns whether the registry ended up `Loaded`.
    pub async fn refresh_models(&self) -> bool {
        self.run_cycle(true).await.is_loaded()
    }

    async fn run_cycle(&self, refresh: bool) -> ModelsState {
        let _cycle = self.cycle.lock().await;

        let providers: Vec<Arc<dyn Provider>> = {
            let inner = self.inner.lock().await;
            let next = if inner.loaded {
                ModelsState::Refreshing
            } else {
                ModelsState::Loading
            };
            self.state_tx.send_replace(next);
            inner
                .providers
                .iter()
                .filter(|p| {
                    let available = p.is_available();
                    if !available {
                        debug!(provider = p.id(), "Skipping unavailable provider");
                    }
                    available
                })
                .cloned()
                .collect()
        };

        let (models, failures) = self.fetch_catalogs(providers, refresh).await;

        let mut inner = self.inner.lock().await;
        inner.provider_models = models;
        inner.loaded = true;
        let renamed = inner.separate_custom_ids();
        if !renamed.is_empty() {
            for (old, new) in &renamed {
                info!("Custom model id '{}' now shipped by a provider, stored as '{}'", old, new);
            }
            if let Err(e) = self.store.save(&inner.to_config()) {
                warn!("Failed to persist registry config: {:#}", e);
            }
        }
        let count = self.publish(&inner);

        let state = if count == 0 && failures > 0 {
            ModelsState::Error(format!("{} provider(s) failed to load models", failures))
        } else {
            ModelsState::Loaded(count)
        };
        info!(models = count, failed_providers = failures, "Model catalog {}", state);
        self.state_tx.send_replace(state.clone());
        state
    }

    /// Fetch all catalogs concurrently, keeping provider order
    ///
    /// Each provider runs on its own task under a timeout, so one panicking
    /// or hanging backend only loses its own models.
    async fn fetch_catalogs(
        &self,
        providers: Vec<Arc<dyn Provider>>,
        refresh: bool,
    ) -> (Vec<AiModel>, usize) {
        let timeout = self.fetch_timeout;
        let handles = providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            tokio::spawn(async move {
                tokio::time::timeout(timeout, async {
                    if refresh && !provider.refresh_models().await {
                        warn!(provider = provider.id(), "Refresh failed, using cached catalog");
                    }
                    provider.get_models().await
                })
                .await
            })
        });
        let results = join_all(handles).await;

        let mut models = Vec::new();
        let mut failures = 0;
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(Ok(fetched)) => {
                    debug!(provider = provider.id(), count = fetched.len(), "Catalog fetched");
                    models.extend(fetched.into_iter().map(|mut m| {
                        m.provider_id = provider.id().to_string();
                        m
                    }));
                }
                Ok(Err(_)) => {
                    failures += 1;
                    warn!(provider = provider.id(), "Catalog fetch timed out after {:?}", timeout);
                }
                Err(e) => {
                    failures += 1;
                    error!(provider = provider.id(), "Catalog fetch task failed: {}", e);
                }
            }
        }
        (models, failures)
    }

    /// Rebuild and publish both views from the last-known catalog
    fn publish(&self, inner: &RegistryInner) -> usize {
        let snapshot = ModelsSnapshot::new(inner.resolved_models());
        let count = snapshot.all.len();
        self.models_tx.send_replace(Arc::new(snapshot));
        count
    }

    /// Persist, republish, and refresh the loaded count after a mutation
    ///
    /// `Loading`, `Refreshing`, and `Error` belong to the running or last
    /// cycle and are left alone.
    fn commit(&self, inner: &RegistryInner) {
        if let Err(e) = self.store.save(&inner.to_config()) {
            warn!("Failed to persist registry config: {:#}", e);
        }
        let count = self.publish(inner);
        self.state_tx.send_if_modified(|state| match state {
            ModelsState::Loaded(current) if *current != count => {
                *current = count;
                true
            }
            _ => false,
        });
    }

    // =========================================================================
    // Preferences
    // =========================================================================

    /// Enable or disable a model
    ///
    /// The preference is stored even for ids not currently in the catalog.
    /// Returns whether the model is currently known.
    pub async fn set_model_enabled(&self, model_id: &str, enabled: bool) -> bool {
        let mut inner = self.inner.lock().await;
        inner.config_mut(model_id).enabled = enabled;
        self.commit(&inner);
        inner.id_taken(model_id)
    }

    /// Set or clear (`None` or blank) a model's alias
    pub async fn set_model_alias(&self, model_id: &str, alias: Option<&str>) -> bool {
        let alias = alias
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        let mut inner = self.inner.lock().await;
        inner.config_mut(model_id).alias_name = alias;
        self.commit(&inner);
        inner.id_taken(model_id)
    }

    /// Add a user-defined model, always enabled
    ///
    /// An id that collides with any known model gets a unique suffix.
    /// Returns the model as stored.
    pub async fn add_custom_model(&self, mut model: AiModel) -> AiModel {
        let mut inner = self.inner.lock().await;

        if inner.id_taken(&model.id) {
            let base = model.id.clone();
            model.id = inner.unique_id(&base);
            info!("Custom model id '{}' taken, stored as '{}'", base, model.id);
        }
        model.enabled = true;

        let alias = model.alias_name.clone();
        let config = inner.config_mut(&model.id);
        config.enabled = true;
        if alias.is_some() {
            config.alias_name = alias;
        }
        inner.custom_models.push(model.clone());

        self.commit(&inner);
        model
    }

    /// Remove a custom model and its preferences
    pub async fn remove_custom_model(&self, model_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.custom_models.len();
        inner.custom_models.retain(|m| m.id != model_id);
        if inner.custom_models.len() == before {
            return false;
        }
        inner.model_configs.remove(model_id);
        self.commit(&inner);
        true
    }

    /// Enable every model, or every model of one provider
    pub async fn enable_all_models(&self, provider_id: Option<&str>) -> usize {
        self.set_all_enabled(provider_id, true).await
    }

    /// Disable every model, or every model of one provider
    pub async fn disable_all_models(&self, provider_id: Option<&str>) -> usize {
        self.set_all_enabled(provider_id, false).await
    }

    async fn set_all_enabled(&self, provider_id: Option<&str>, enabled: bool) -> usize {
        let mut inner = self.inner.lock().await;
        let ids: Vec<String> = inner
            .provider_models
            .iter()
            .chain(inner.custom_models.iter())
            .filter(|m| provider_id.is_none_or(|p| m.provider_id == p))
            .map(|m| m.id.clone())
            .collect();
        for id in &ids {
            inner.config_mut(id).enabled = enabled;
        }
        self.commit(&inner);
        ids.len()
    }

    // =========================================================================
    // Queries (lock-free, served from the published snapshot)
    // =========================================================================

    pub fn snapshot(&self) -> Arc<ModelsSnapshot> {
        self.models_tx.borrow().clone()
    }

    pub fn all_models(&self) -> Vec<AiModel> {
        self.snapshot().all.clone()
    }

    pub fn enabled_models(&self) -> Vec<AiModel> {
        self.snapshot().enabled.clone()
    }

    pub fn get_model(&self, model_id: &str) -> Option<AiModel> {
        self.snapshot().get(model_id).cloned()
    }

    /// First enabled model in catalog order
    pub fn get_default_model(&self) -> Option<AiModel> {
        self.snapshot().enabled.first().cloned()
    }

    pub fn models_by_provider(&self) -> Vec<(String, Vec<AiModel>)> {
        self.snapshot().by_provider()
    }

    /// `(enabled, total)` for one provider
    pub fn provider_counts(&self, provider_id: &str) -> (usize, usize) {
        self.snapshot().provider_counts(provider_id)
    }

    pub fn enabled_count(&self) -> usize {
        self.snapshot().enabled.len()
    }

    pub fn state(&self) -> ModelsState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe_models(&self) -> watch::Receiver<Arc<ModelsSnapshot>> {
        self.models_tx.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ModelsState> {
        self.state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::streaming::{ChatResponse, ChatStream};
    use crate::ai::types::ChatRequest;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StaticProvider {
        id: String,
        models: parking_lot::Mutex<Vec<AiModel>>,
        refreshes: AtomicUsize,
        available: AtomicBool,
    }

    impl StaticProvider {
        fn new(id: &str, model_ids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                models: parking_lot::Mutex::new(
                    model_ids.iter().map(|m| AiModel::new(m, m, id)).collect(),
                ),
                refreshes: AtomicUsize::new(0),
                available: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl Provider for StaticProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            &self.id
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        async fn get_models(&self) -> Vec<AiModel> {
            self.models.lock().clone()
        }

        async fn refresh_models(&self) -> bool {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn chat(&self, _request: ChatRequest) -> ChatStream {
            ChatStream::from_events(vec![ChatResponse::done("stop")])
        }
    }

    struct PanickingProvider;

    #[async_trait]
    impl Provider for PanickingProvider {
        fn id(&self) -> &str {
            "broken"
        }

        fn name(&self) -> &str {
            "Broken"
        }

        async fn get_models(&self) -> Vec<AiModel> {
            panic!("catalog endpoint exploded");
        }

        async fn refresh_models(&self) -> bool {
            false
        }

        fn chat(&self, _request: ChatRequest) -> ChatStream {
            ChatStream::from_events(vec![])
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn id(&self) -> &str {
            "slow"
        }

        fn name(&self) -> &str {
            "Slow"
        }

        async fn get_models(&self) -> Vec<AiModel> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Vec::new()
        }

        async fn refresh_models(&self) -> bool {
            false
        }

        fn chat(&self, _request: ChatRequest) -> ChatStream {
            ChatStream::from_events(vec![])
        }
    }

    /// Serves its catalog immediately until gated, then waits for a release
    struct GatedProvider {
        gated: AtomicBool,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl Provider for GatedProvider {
        fn id(&self) -> &str {
            "gated"
        }

        fn name(&self) -> &str {
            "Gated"
        }

        async fn get_models(&self) -> Vec<AiModel> {
            if self.gated.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            vec![AiModel::new("g1", "G1", "gated")]
        }

        async fn refresh_models(&self) -> bool {
            true
        }

        fn chat(&self, _request: ChatRequest) -> ChatStream {
            ChatStream::from_events(vec![])
        }
    }

    fn ids(models: &[AiModel]) -> Vec<&str> {
        models.iter().map(|m| m.id.as_str()).collect()
    }

    async fn registry_with(providers: Vec<Arc<dyn Provider>>) -> (ModelRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = ModelRegistry::new(store.clone());
        for provider in providers {
            registry.register_provider(provider).await;
        }
        (registry, store)
    }

    #[tokio::test]
    async fn test_initialize_publishes_catalog_in_provider_order() {
        let (registry, _) = registry_with(vec![
            StaticProvider::new("b", &["b1"]),
            StaticProvider::new("a", &["a1", "a2"]),
        ])
        .await;
        assert_eq!(registry.state(), ModelsState::Loading);

        let state = registry.initialize().await;
        assert_eq!(state, ModelsState::Loaded(3));
        assert_eq!(ids(&registry.all_models()), vec!["b1", "a1", "a2"]);
        assert_eq!(registry.get_default_model().unwrap().id, "b1");
        assert_eq!(registry.enabled_count(), 3);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (registry, _) = registry_with(vec![StaticProvider::new("a", &["a1", "a2"])]).await;
        registry.set_model_enabled("a2", false).await;

        registry.initialize().await;
        let first = registry.snapshot();
        registry.initialize().await;
        let second = registry.snapshot();
        assert_eq!(*first, *second);
        assert_eq!(ids(&second.enabled), vec!["a1"]);
    }

    #[tokio::test]
    async fn test_failing_provider_is_isolated() {
        let (registry, _) = registry_with(vec![
            StaticProvider::new("a", &["a1", "a2"]),
            Arc::new(PanickingProvider),
        ])
        .await;

        assert_eq!(registry.initialize().await, ModelsState::Loaded(2));
        assert_eq!(ids(&registry.all_models()), vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_hanging_provider_times_out() {
        let store = Arc::new(MemoryStore::new());
        let registry = ModelRegistry::new(store).with_fetch_timeout(Duration::from_millis(50));
        registry.register_provider(Arc::new(HangingProvider)).await;
        registry
            .register_provider(StaticProvider::new("a", &["a1"]))
            .await;

        assert_eq!(registry.initialize().await, ModelsState::Loaded(1));
    }

    #[tokio::test]
    async fn test_error_only_when_nothing_loaded_and_something_failed() {
        let (registry, _) = registry_with(vec![Arc::new(PanickingProvider)]).await;
        assert!(matches!(registry.initialize().await, ModelsState::Error(_)));

        let (empty, _) = registry_with(vec![StaticProvider::new("a", &[])]).await;
        assert_eq!(empty.initialize().await, ModelsState::Loaded(0));
    }

    #[tokio::test]
    async fn test_unavailable_provider_skipped() {
        let provider = StaticProvider::new("keyed", &["k1"]);
        provider.available.store(false, Ordering::SeqCst);
        let (registry, _) = registry_with(vec![
            provider,
            StaticProvider::new("a", &["a1"]),
        ])
        .await;
        registry.initialize().await;
        assert_eq!(ids(&registry.all_models()), vec!["a1"]);
    }

    #[tokio::test]
    async fn test_register_provider_last_wins() {
        let (registry, _) = registry_with(vec![
            StaticProvider::new("a", &["old"]),
            StaticProvider::new("b", &["b1"]),
            StaticProvider::new("a", &["new"]),
        ])
        .await;
        assert_eq!(registry.providers().await.len(), 2);
        registry.initialize().await;
        assert_eq!(ids(&registry.all_models()), vec!["new", "b1"]);
    }

    #[tokio::test]
    async fn test_disabled_model_survives_refresh() {
        let provider = StaticProvider::new("a", &["a1", "a2"]);
        let (registry, store) = registry_with(vec![provider.clone()]).await;
        registry.initialize().await;

        assert!(registry.set_model_enabled("a1", false).await);
        assert!(registry.refresh_models().await);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);

        let model = registry.get_model("a1").unwrap();
        assert!(!model.enabled);
        assert_eq!(ids(&registry.enabled_models()), vec!["a2"]);
        assert!(store
            .snapshot()
            .model_configs
            .iter()
            .any(|c| c.model_id == "a1" && !c.enabled));
    }

    #[tokio::test]
    async fn test_config_kept_while_model_is_missing() {
        let provider = StaticProvider::new("a", &["a1", "a2"]);
        let (registry, _) = registry_with(vec![provider.clone() as Arc<dyn Provider>]).await;
        registry.initialize().await;
        registry.set_model_alias("a2", Some("second")).await;

        *provider.models.lock() = vec![AiModel::new("a1", "a1", "a")];
        registry.refresh_models().await;
        assert!(registry.get_model("a2").is_none());

        *provider.models.lock() = vec![
            AiModel::new("a1", "a1", "a"),
            AiModel::new("a2", "a2", "a"),
        ];
        registry.refresh_models().await;
        assert_eq!(registry.get_model("a2").unwrap().display_label(), "second");
    }

    #[tokio::test]
    async fn test_alias_set_and_cleared() {
        let (registry, _) = registry_with(vec![StaticProvider::new("a", &["a1"])]).await;
        registry.initialize().await;

        registry.set_model_alias("a1", Some(" quick ")).await;
        assert_eq!(registry.get_model("a1").unwrap().alias_name.as_deref(), Some("quick"));
        registry.set_model_alias("a1", Some("")).await;
        assert!(registry.get_model("a1").unwrap().alias_name.is_none());
    }

    #[tokio::test]
    async fn test_colliding_custom_model_is_renamed() {
        let (registry, store) = registry_with(vec![StaticProvider::new("a", &["shared"])]).await;
        registry.initialize().await;

        let mut custom = AiModel::new("shared", "My Shared", "local");
        custom.enabled = false;
        let stored = registry.add_custom_model(custom).await;

        assert_ne!(stored.id, "shared");
        assert!(stored.id.starts_with("shared-"));
        assert!(stored.enabled);
        assert_eq!(registry.get_model("shared").unwrap().provider_id, "a");
        let fetched = registry.get_model(&stored.id).unwrap();
        assert_eq!(fetched.provider_id, "local");
        assert!(fetched.enabled);
        assert_eq!(registry.state(), ModelsState::Loaded(2));
        assert_eq!(store.snapshot().custom_models.len(), 1);
    }

    #[tokio::test]
    async fn test_custom_model_added_before_first_load_is_separated() {
        let (registry, store) = registry_with(vec![StaticProvider::new("a", &["shared"])]).await;
        let stored = registry
            .add_custom_model(AiModel::new("shared", "My Shared", "local"))
            .await;
        assert_eq!(stored.id, "shared");

        assert_eq!(registry.initialize().await, ModelsState::Loaded(2));
        let all = registry.all_models();
        let custom = all.iter().find(|m| m.provider_id == "local").unwrap();
        assert!(custom.id.starts_with("shared-"));
        assert_eq!(registry.get_model("shared").unwrap().provider_id, "a");
        assert_eq!(registry.get_model(&custom.id).unwrap().provider_id, "local");

        // Preferences are now independent
        registry.set_model_enabled(&custom.id, false).await;
        assert!(registry.get_model("shared").unwrap().enabled);

        let saved = store.snapshot();
        assert_eq!(saved.custom_models[0].id, custom.id);
        assert!(saved.model_configs.iter().any(|c| c.model_id == custom.id));
    }

    #[tokio::test]
    async fn test_custom_model_renamed_when_provider_starts_shipping_its_id() {
        let provider = StaticProvider::new("a", &["a1"]);
        let (registry, _) = registry_with(vec![provider.clone() as Arc<dyn Provider>]).await;
        registry.initialize().await;
        registry
            .add_custom_model(AiModel::new("fresh", "Fresh", "local"))
            .await;
        registry.set_model_alias("fresh", Some("mine")).await;

        provider.models.lock().push(AiModel::new("fresh", "Fresh", "a"));
        assert!(registry.refresh_models().await);

        let all = registry.all_models();
        assert_eq!(all.len(), 3);
        let custom = all.iter().find(|m| m.provider_id == "local").unwrap();
        assert_ne!(custom.id, "fresh");
        assert_eq!(custom.alias_name.as_deref(), Some("mine"));
        assert_eq!(registry.get_model("fresh").unwrap().provider_id, "a");
    }

    #[tokio::test]
    async fn test_mutation_during_refresh_keeps_refreshing_state() {
        let provider = Arc::new(GatedProvider {
            gated: AtomicBool::new(false),
            release: tokio::sync::Notify::new(),
        });
        let (registry, _) = registry_with(vec![provider.clone() as Arc<dyn Provider>]).await;
        let registry = Arc::new(registry);
        assert_eq!(registry.initialize().await, ModelsState::Loaded(1));

        provider.gated.store(true, Ordering::SeqCst);
        let mut state = registry.subscribe_state();
        let refresher = Arc::clone(&registry);
        let refresh = tokio::spawn(async move { refresher.refresh_models().await });
        while *state.borrow_and_update() != ModelsState::Refreshing {
            state.changed().await.unwrap();
        }

        registry.set_model_enabled("g1", false).await;
        assert_eq!(registry.state(), ModelsState::Refreshing);
        assert!(!registry.get_model("g1").unwrap().enabled);

        provider.release.notify_one();
        assert!(refresh.await.unwrap());
        assert_eq!(registry.state(), ModelsState::Loaded(1));
    }

    #[tokio::test]
    async fn test_remove_custom_model_drops_config() {
        let (registry, store) = registry_with(vec![]).await;
        registry.initialize().await;
        let stored = registry
            .add_custom_model(AiModel::new("mine", "Mine", "local"))
            .await;
        registry.set_model_alias(&stored.id, Some("m")).await;

        assert!(registry.remove_custom_model("mine").await);
        assert!(!registry.remove_custom_model("mine").await);
        assert!(registry.get_model("mine").is_none());
        let saved = store.snapshot();
        assert!(saved.custom_models.is_empty());
        assert!(saved.model_configs.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_enable_disable_by_provider() {
        let (registry, _) = registry_with(vec![
            StaticProvider::new("a", &["a1", "a2"]),
            StaticProvider::new("b", &["b1"]),
        ])
        .await;
        registry.initialize().await;

        assert_eq!(registry.disable_all_models(Some("a")).await, 2);
        assert_eq!(registry.provider_counts("a"), (0, 2));
        assert_eq!(registry.provider_counts("b"), (1, 1));

        assert_eq!(registry.disable_all_models(None).await, 3);
        assert!(registry.get_default_model().is_none());

        registry.enable_all_models(Some("b")).await;
        assert_eq!(ids(&registry.enabled_models()), vec!["b1"]);
    }

    #[tokio::test]
    async fn test_persisted_state_is_restored() {
        let store = Arc::new(MemoryStore::new());
        {
            let registry = ModelRegistry::new(store.clone());
            registry
                .register_provider(StaticProvider::new("a", &["a1"]))
                .await;
            registry.initialize().await;
            registry.set_model_enabled("a1", false).await;
            registry
                .add_custom_model(AiModel::new("c1", "Custom", "local"))
                .await;
        }

        let registry = ModelRegistry::new(store);
        registry
            .register_provider(StaticProvider::new("a", &["a1"]))
            .await;
        registry.initialize().await;
        assert_eq!(ids(&registry.all_models()), vec!["a1", "c1"]);
        assert_eq!(ids(&registry.enabled_models()), vec!["c1"]);
    }

    #[tokio::test]
    async fn test_subscribers_see_consistent_snapshots() {
        let (registry, _) = registry_with(vec![StaticProvider::new("a", &["a1", "a2"])]).await;
        let mut models = registry.subscribe_models();
        let state = registry.subscribe_state();

        registry.initialize().await;
        assert!(models.has_changed().unwrap());
        let snapshot = models.borrow_and_update().clone();
        assert_eq!(snapshot.all.len(), 2);
        assert_eq!(*state.borrow(), ModelsState::Loaded(2));

        registry.set_model_enabled("a2", false).await;
        let snapshot = models.borrow_and_update().clone();
        assert_eq!(snapshot.enabled.len(), 1);
        assert!(snapshot.enabled.iter().all(|m| snapshot.all.contains(m)));
    }

    #[tokio::test]
    async fn test_concurrent_mutations_and_refresh() {
        let (registry, _) = registry_with(vec![StaticProvider::new(
            "a",
            &["m0", "m1", "m2", "m3", "m4", "m5", "m6", "m7"],
        )])
        .await;
        let registry = Arc::new(registry);
        registry.initialize().await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.set_model_enabled(&format!("m{}", i), i % 2 == 0).await;
            }));
        }
        let refresher = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            refresher.refresh_models().await;
        }));
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.all.len(), 8);
        assert_eq!(ids(&snapshot.enabled), vec!["m0", "m2", "m4", "m6"]);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_propagated() {
        struct FailingStore;
        impl ConfigStore for FailingStore {
            fn load(&self) -> anyhow::Result<RegistryConfig> {
                anyhow::bail!("disk on fire")
            }
            fn save(&self, _config: &RegistryConfig) -> anyhow::Result<()> {
                anyhow::bail!("disk on fire")
            }
        }

        let registry = ModelRegistry::new(Arc::new(FailingStore));
        registry
            .register_provider(StaticProvider::new("a", &["a1"]))
            .await;
        registry.initialize().await;
        registry.set_model_enabled("a1", false).await;
        assert!(!registry.get_model("a1").unwrap().enabled);
    }
}
