//! Published registry views

use crate::ai::types::AiModel;

/// Aggregate load status of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelsState {
    /// First load in progress
    Loading,
    /// Reload in progress, the previous catalog is still published
    Refreshing,
    /// Catalog published with this many models
    Loaded(usize),
    Error(String),
}

impl ModelsState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelsState::Loaded(_))
    }
}

impl std::fmt::Display for ModelsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelsState::Loading => write!(f, "loading"),
            ModelsState::Refreshing => write!(f, "refreshing"),
            ModelsState::Loaded(count) => write!(f, "loaded ({} models)", count),
            ModelsState::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Immutable catalog snapshot
///
/// `enabled` is always `all` filtered by `enabled`, built together so no
/// reader can see one without the other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelsSnapshot {
    pub all: Vec<AiModel>,
    pub enabled: Vec<AiModel>,
}

impl ModelsSnapshot {
    pub fn new(all: Vec<AiModel>) -> Self {
        let enabled = all.iter().filter(|m| m.enabled).cloned().collect();
        Self { all, enabled }
    }

    pub fn get(&self, id: &str) -> Option<&AiModel> {
        self.all.iter().find(|m| m.id == id)
    }

    /// Models grouped by provider, providers in catalog order
    pub fn by_provider(&self) -> Vec<(String, Vec<AiModel>)> {
        let mut groups: Vec<(String, Vec<AiModel>)> = Vec::new();
        for model in &self.all {
            match groups.iter_mut().find(|(id, _)| *id == model.provider_id) {
                Some((_, models)) => models.push(model.clone()),
                None => groups.push((model.provider_id.clone(), vec![model.clone()])),
            }
        }
        groups
    }

    /// `(enabled, total)` for one provider
    pub fn provider_counts(&self, provider_id: &str) -> (usize, usize) {
        self.all
            .iter()
            .filter(|m| m.provider_id == provider_id)
            .fold((0, 0), |(enabled, total), m| {
                (enabled + usize::from(m.enabled), total + 1)
            })
    }
}
