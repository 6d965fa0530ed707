//! Layered condition context
//!
//! Every section of an experiment owns one `Condition` layer: its IV values,
//! extra data, its position number, and anything added later with
//! `add_data`. Lookups fall through to ancestor layers, so a value set on a
//! participant is visible from every one of its trials without being copied
//! into them.

use indexmap::IndexMap;
use serde_json::Value;

/// A single condition: IV names and extra-data keys mapped to concrete
/// values.
///
/// Insertion order is preserved, which keeps column order stable when leaf
/// records are exported as rows.
pub type Condition = IndexMap<String, Value>;

/// Read-only view of a section's full context: its own layer plus every
/// ancestor layer, outermost (root) first.
///
/// A `Context` never owns the layers it looks through; it is assembled on
/// demand from borrowed layers and is cheap to extend with one more layer
/// while descending the hierarchy.
#[derive(Debug, Clone, Default)]
pub struct Context<'a> {
    layers: Vec<&'a Condition>,
}

impl<'a> Context<'a> {
    /// Create an empty context (used for the root section).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from pre-collected layers, outermost first.
    #[must_use]
    pub fn from_layers(layers: Vec<&'a Condition>) -> Self {
        Self { layers }
    }

    /// Derive the context one level down: the same ancestor layers plus
    /// `layer` as the new innermost layer.
    #[must_use]
    pub fn child(&self, layer: &'a Condition) -> Self {
        let mut layers = self.layers.clone();
        layers.push(layer);
        Self { layers }
    }

    /// Look up a key, innermost layer first.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.layers.iter().rev().find_map(|layer| layer.get(key))
    }

    /// True if the key is present in any layer.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Merge all layers into one owned condition.
    ///
    /// Keys appear in outermost-first order (ancestor columns before
    /// descendant columns); an inner layer's value wins over an outer one
    /// without disturbing the key's original position.
    #[must_use]
    pub fn flatten(&self) -> Condition {
        let mut merged = Condition::new();
        for layer in &self.layers {
            for (key, value) in layer.iter() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Number of layers in the view.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}
