//! # Trialtree: Hierarchical Experiment Structure Generation
//!
//! Trialtree generates the full hierarchical structure of a behavioral
//! experiment. Given, at each level of a hierarchy (participant → session →
//! block → trial), the independent variables (IVs) and how their values
//! combine and order, it produces a concrete tree of sections, each carrying
//! a resolved set of condition values inherited from its ancestors.
//!
//! ## Components
//!
//! - [`Design`]: one level's IVs, optional design matrix, extra data, and
//!   ordering policy; produces that level's ordered condition list.
//! - [`DesignTree`](tree::DesignTree): composes per-level designs into a
//!   multi-level hierarchy, resolves branching (heterogeneous) structures,
//!   and propagates synthetic IVs from non-atomic orderings one level up.
//! - [`Experiment`]: eagerly materializes the concrete section tree and
//!   exposes per-leaf data for tabular export.
//!
//! Orderings ([`Shuffle`], [`CompleteCounterbalance`], [`LatinSquare`], ...)
//! are pluggable; see [`ordering`].
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use trialtree::Experiment;
//!
//! let experiment = Experiment::from_spec(&json!([
//!     {"name": "participant", "ivs": {"group": ["control", "treatment"]}},
//!     {"name": "block", "ivs": {"kind": ["visual", "audio"]}, "ordering": "Ordering"},
//!     {"name": "trial", "ivs": {"difficulty": [1, 2, 3]}, "n": 2},
//! ]))?;
//!
//! // 2 participants x 2 blocks x (3 difficulties x 2 repeats)
//! let records: Vec<_> = experiment.generate_data().collect();
//! assert_eq!(records.len(), 24);
//! assert!(records[0].contains_key("group"));
//! assert!(records[0].contains_key("trial"));
//! # Ok::<(), trialtree::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod design;
pub mod error;
pub mod ordering;
pub mod section;
pub mod spec;
pub mod tree;

pub use context::{Condition, Context};
pub use design::{full_cross, Design, DesignBuilder, HETEROGENEOUS_IV};
pub use error::{Error, Result};
pub use ordering::{
    CompleteCounterbalance, LatinSquare, Ordering, OrderingRegistry, Sequential, Shuffle,
    SortDirection, Sorted, SyntheticIv,
};
pub use section::{DataIter, Experiment, ExperimentSection, SectionId};
pub use spec::{DesignSpec, IvsSpec, LevelSpec, OrderingSpec, TreeSpec};
pub use tree::{Alternate, DesignTree, Level, Peeled, TreeCursor, BASE_LEVEL};
