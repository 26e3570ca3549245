//! Effect candidates and the live session menu.
//!
//! The menu is shared between the scheduler (full `replace` after a fetch)
//! and the push listener (`merge` of partial updates). [`SharedMenu`] keeps
//! the current menu behind an `Arc` and swaps it copy-on-write, so a reader
//! holding a snapshot never sees a half-applied update.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::weights::WeightConfig;

/// Where a candidate comes from. Only provider effects can be applied remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    CrowdControl,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuantityRange {
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
}

impl QuantityRange {
    /// `(min, max)` with a missing minimum read as 1 and a missing maximum as the minimum.
    pub fn bounds(&self) -> (i64, i64) {
        let min = self.min.unwrap_or(1);
        let max = self.max.unwrap_or(min).max(min);
        (min, max)
    }

    pub fn clamp(&self, quantity: i64) -> i64 {
        let (min, max) = self.bounds();
        quantity.clamp(min, max)
    }
}

/// One entry of the session menu, as delivered by the effects backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectCandidate {
    #[serde(rename = "effectID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Backend effect type (e.g. `"game"`), echoed back on requests.
    #[serde(rename = "type", default)]
    pub effect_type: String,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<QuantityRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub inactive: bool,
}

impl EffectCandidate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            effect_type: "game".to_string(),
            provider: Provider::CrowdControl,
            price,
            pool: None,
            quantity: None,
            note: None,
            description: None,
            tags: Vec::new(),
            inactive: false,
        }
    }

    pub fn with_pool(mut self, pool: i64) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_quantity(mut self, min: i64, max: i64) -> Self {
        self.quantity = Some(QuantityRange {
            min: Some(min),
            max: Some(max),
        });
        self
    }

    pub fn is_eligible(&self, cfg: &WeightConfig) -> bool {
        if self.inactive {
            return false;
        }
        match cfg.price_cutoff() {
            Some(max_price) if cfg.cost_weighted() => self.price <= max_price,
            _ => true,
        }
    }

    /// Overwrite only the fields present in `patch`.
    pub fn apply_patch(&mut self, patch: &CandidatePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(t) = &patch.effect_type {
            self.effect_type = t.clone();
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(pool) = patch.pool {
            self.pool = Some(pool);
        }
        if let Some(q) = patch.quantity {
            self.quantity = Some(q);
        }
        if let Some(note) = &patch.note {
            self.note = Some(note.clone());
        }
        if let Some(desc) = &patch.description {
            self.description = Some(desc.clone());
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(inactive) = patch.inactive {
            self.inactive = inactive;
        }
    }
}

/// Partial update for one candidate, keyed by `effectID`. Unknown fields
/// (cooldown timers and the like) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidatePatch {
    #[serde(rename = "effectID")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub effect_type: Option<String>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub pool: Option<i64>,
    #[serde(default)]
    pub quantity: Option<QuantityRange>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub inactive: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateMenu {
    effects: Vec<EffectCandidate>,
    index: HashMap<String, usize>,
    refreshed_at: Option<SystemTime>,
}

impl CandidateMenu {
    /// Build a menu; on duplicate ids the first entry wins.
    pub fn from_effects(effects: Vec<EffectCandidate>) -> Self {
        let mut menu = Self {
            effects: Vec::with_capacity(effects.len()),
            index: HashMap::with_capacity(effects.len()),
            refreshed_at: Some(SystemTime::now()),
        };
        for effect in effects {
            if menu.index.contains_key(&effect.id) {
                continue;
            }
            menu.index.insert(effect.id.clone(), menu.effects.len());
            menu.effects.push(effect);
        }
        menu
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&EffectCandidate> {
        self.index.get(id).map(|&i| &self.effects[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectCandidate> {
        self.effects.iter()
    }

    pub fn refreshed_at(&self) -> Option<SystemTime> {
        self.refreshed_at
    }

    /// Patch known candidates in place. Returns how many updates matched.
    pub fn merge(&mut self, updates: &[CandidatePatch]) -> usize {
        let mut applied = 0;
        for patch in updates {
            if let Some(&i) = self.index.get(&patch.id) {
                self.effects[i].apply_patch(patch);
                applied += 1;
            }
        }
        applied
    }

    /// Candidates a round may be built from, in menu order.
    pub fn eligible(&self, cfg: &WeightConfig) -> Vec<EffectCandidate> {
        self.effects
            .iter()
            .filter(|e| e.is_eligible(cfg))
            .cloned()
            .collect()
    }
}

/// Thread-safe, copy-on-write handle to the current [`CandidateMenu`].
#[derive(Debug, Clone, Default)]
pub struct SharedMenu {
    current: Arc<RwLock<Arc<CandidateMenu>>>,
}

impl SharedMenu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current menu version. Later writes never mutate a returned `Arc`.
    pub fn load(&self) -> Arc<CandidateMenu> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn replace(&self, effects: Vec<EffectCandidate>) {
        let next = Arc::new(CandidateMenu::from_effects(effects));
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = next;
    }

    pub fn merge(&self, updates: &[CandidatePatch]) -> usize {
        if updates.is_empty() {
            return 0;
        }
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // Clones only when a snapshot is still held elsewhere.
        Arc::make_mut(&mut guard).merge(updates)
    }

    pub fn snapshot(&self, cfg: &WeightConfig) -> Vec<EffectCandidate> {
        self.load().eligible(cfg)
    }

    pub fn clear(&self) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(CandidateMenu::default());
    }
}
