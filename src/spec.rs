//! Structured specification input
//!
//! Designs and design trees can be described as plain data (typically the
//! result of parsing a configuration file; the file syntax itself is not
//! this crate's concern) and built from there. A design specification
//! recognizes the keys `name`, `ivs`, `design_matrix`, `ordering` (alias
//! `order`) and `number` (alias `n`); every other key becomes extra data. A
//! tree specification is either a bare sequence of level specifications or a
//! mapping holding `main` plus named alternate branch trees.
//!
//! ```
//! use serde_json::json;
//! use trialtree::DesignTree;
//!
//! let tree = DesignTree::from_spec(&json!([
//!     {"name": "block", "ivs": {"kind": ["visual", "audio"]}, "ordering": "Ordering"},
//!     {"name": "trial", "ivs": {"difficulty": [1, 2, 3]}, "n": 2},
//! ]))?;
//! assert_eq!(tree.levels().len(), 2);
//! # Ok::<(), trialtree::Error>(())
//! ```

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::context::Condition;
use crate::design::{Design, DesignBuilder};
use crate::error::{Error, Result};
use crate::ordering::OrderingRegistry;
use crate::tree::{Alternate, DesignTree, Level};

/// IV declarations: either a mapping from IV name to values, or a sequence
/// of (name, values) pairs. `null` values mark a continuous IV.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IvsSpec {
    /// `[["speed", [1, 2]], ["size", null]]`
    Pairs(Vec<(String, Option<Vec<Value>>)>),
    /// `{"speed": [1, 2], "size": null}`
    Map(IndexMap<String, Option<Vec<Value>>>),
}

impl IvsSpec {
    fn to_pairs(&self) -> Vec<(String, Option<Vec<Value>>)> {
        match self {
            Self::Pairs(pairs) => pairs.clone(),
            Self::Map(map) => map
                .iter()
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
        }
    }
}

/// Ordering selection: a kind name, a `[kind, positional...]` sequence, or a
/// mapping with an optional `class` key plus constructor keyword arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OrderingSpec {
    /// `"Shuffle"`
    Name(String),
    /// `["Shuffle", true]`
    Positional(Vec<Value>),
    /// `{"class": "LatinSquare", "balanced": false}`
    Keyword {
        /// Ordering kind; defaults to the design's default ordering when
        /// absent.
        class: Option<String>,
        /// Keyword arguments forwarded to the constructor.
        #[serde(flatten)]
        kwargs: Condition,
    },
}

/// Specification of one [`Design`], as parsed configuration data.
#[derive(Debug, Clone, Deserialize)]
pub struct DesignSpec {
    /// Level name; required wherever this specification stands for a level
    /// of a tree.
    #[serde(default)]
    pub name: Option<String>,
    /// IV declarations.
    #[serde(default)]
    pub ivs: Option<IvsSpec>,
    /// Design matrix, rows of numeric codes.
    #[serde(default)]
    pub design_matrix: Option<Vec<Vec<f64>>>,
    /// Ordering selection (alias `order`).
    #[serde(default, alias = "order")]
    pub ordering: Option<OrderingSpec>,
    /// Repetition count forwarded to the ordering (alias `n`).
    #[serde(default, alias = "n")]
    pub number: Option<u64>,
    /// Every unrecognized key lands here and becomes the design's extra
    /// data.
    #[serde(flatten)]
    pub extra: Condition,
}

impl DesignSpec {
    /// Build the design (and its level name, if any).
    ///
    /// # Errors
    ///
    /// Unknown ordering kinds, malformed ordering arguments, and design
    /// construction errors.
    pub fn build(&self, registry: &OrderingRegistry) -> Result<(Option<String>, Design)> {
        let default_kind = if self.design_matrix.is_some() {
            "Sequential"
        } else {
            "Shuffle"
        };

        let mut kwargs = Condition::new();
        if let Some(number) = self.number.filter(|&n| n > 0) {
            kwargs.insert("number".to_string(), Value::from(number));
        }

        let (kind, args): (String, Vec<Value>) = match &self.ordering {
            None => (default_kind.to_string(), Vec::new()),
            Some(OrderingSpec::Name(name)) => (name.clone(), Vec::new()),
            Some(OrderingSpec::Keyword { class, kwargs: spec_kwargs }) => {
                kwargs.extend(spec_kwargs.clone());
                (
                    class.clone().unwrap_or_else(|| default_kind.to_string()),
                    Vec::new(),
                )
            }
            Some(OrderingSpec::Positional(items)) => {
                let mut items = items.iter();
                let kind = items
                    .next()
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::Spec(
                            "an ordering sequence starts with the kind name".to_string(),
                        )
                    })?;
                (kind.to_string(), items.cloned().collect())
            }
        };

        let ordering = registry.build(&kind, &args, &kwargs)?;

        let mut builder: DesignBuilder = Design::builder()
            .boxed_ordering(ordering)
            .extra_data(self.extra.clone());
        if let Some(ivs) = &self.ivs {
            builder = builder.ivs(ivs.to_pairs());
        }
        if let Some(matrix) = &self.design_matrix {
            builder = builder.design_matrix(matrix.clone());
        }

        Ok((self.name.clone(), builder.build()?))
    }
}

/// One level of a tree specification: a single design spec, or a sequence of
/// design specs run in sequence at that level (all sharing one name).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LevelSpec {
    /// One design at this level.
    Single(DesignSpec),
    /// Several designs in sequence at this level.
    Sequence(Vec<DesignSpec>),
}

impl LevelSpec {
    /// Build the level.
    ///
    /// # Errors
    ///
    /// A missing level name, disagreeing names across a sequence, or design
    /// construction errors.
    pub fn build(&self, registry: &OrderingRegistry) -> Result<Level> {
        match self {
            Self::Single(spec) => {
                let (name, design) = spec.build(registry)?;
                let name = name.ok_or_else(|| {
                    Error::Spec("a level specification needs a name".to_string())
                })?;
                Ok(Level::single(name, design))
            }
            Self::Sequence(specs) => {
                let mut level_name: Option<String> = None;
                let mut designs = Vec::with_capacity(specs.len());
                for spec in specs {
                    let (name, design) = spec.build(registry)?;
                    match (&level_name, name) {
                        (None, Some(name)) => level_name = Some(name),
                        (Some(expected), Some(found)) if *expected != found => {
                            return Err(Error::LevelNameMismatch {
                                expected: expected.clone(),
                                found,
                            });
                        }
                        _ => {}
                    }
                    designs.push(design);
                }
                let name = level_name.ok_or_else(|| {
                    Error::Spec("a level specification needs a name".to_string())
                })?;
                Ok(Level::new(name, designs))
            }
        }
    }
}

/// A whole tree specification: a bare sequence of levels (homogeneous), or a
/// mapping with `main` plus named alternate branch trees.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TreeSpec {
    /// `{"main": [...], "practice": [...], ...}`
    Named(IndexMap<String, Vec<LevelSpec>>),
    /// `[level, level, ...]`
    Flat(Vec<LevelSpec>),
}

impl TreeSpec {
    /// Build the design tree.
    ///
    /// # Errors
    ///
    /// A missing `main` tree, and everything level and tree construction
    /// raise.
    pub fn build(&self, registry: &OrderingRegistry) -> Result<DesignTree> {
        match self {
            Self::Flat(levels) => DesignTree::with_alternates(
                build_levels(levels, registry)?,
                IndexMap::new(),
                registry,
            ),
            Self::Named(trees) => {
                let mut trees = trees.clone();
                let main = trees.shift_remove("main").ok_or_else(|| {
                    Error::Spec("a tree specification needs a `main` tree".to_string())
                })?;
                let alternates = trees
                    .into_iter()
                    .map(|(name, levels)| (name, Alternate::Spec(levels)))
                    .collect();
                DesignTree::with_alternates(build_levels(&main, registry)?, alternates, registry)
            }
        }
    }
}

/// Build every level of a (sub)tree specification.
pub(crate) fn build_levels(
    specs: &[LevelSpec],
    registry: &OrderingRegistry,
) -> Result<Vec<Level>> {
    specs.iter().map(|spec| spec.build(registry)).collect()
}
