//! Design trees: the multi-level hierarchy of an experiment
//!
//! A [`DesignTree`] is an ordered sequence of named levels (top to bottom),
//! each holding one or more [`Design`]s, plus named alternate subtrees when
//! the structure branches. Building the tree runs the one-time bottom-up
//! initialization pass that pushes synthetic IVs from non-atomic orderings
//! up to their parent level. After that the tree is immutable and is only
//! consumed through [`TreeCursor`]s, forward-only views that peel one level
//! at a time during section materialization.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::design::Design;
use crate::error::{Error, Result};
use crate::ordering::OrderingRegistry;
use crate::spec::{build_levels, LevelSpec, TreeSpec};

/// Name of the synthetic root level prepended by
/// [`DesignTree::add_base_level`].
pub const BASE_LEVEL: &str = "_base";

/// One level of the hierarchy: a name plus the designs run in sequence at
/// that level.
#[derive(Debug)]
pub struct Level {
    /// Level name (`participant`, `block`, `trial`, ...); also the key the
    /// section numbering is written under.
    pub name: String,
    /// Designs expanded in declared order within every parent section.
    pub designs: Vec<Design>,
}

impl Level {
    /// A level holding several designs run in sequence.
    #[must_use]
    pub fn new(name: impl Into<String>, designs: Vec<Design>) -> Self {
        Self {
            name: name.into(),
            designs,
        }
    }

    /// A level holding a single design.
    #[must_use]
    pub fn single(name: impl Into<String>, design: Design) -> Self {
        Self::new(name, vec![design])
    }
}

/// A named alternate subtree for heterogeneous structures: either a tree
/// built ahead of time (reused verbatim) or a raw specification built on
/// demand, with the branch under construction excluded from what it may
/// reference.
#[derive(Debug, Clone)]
pub enum Alternate {
    /// Reuse an existing tree as the branch.
    Tree(Rc<DesignTree>),
    /// Build the branch from level specifications when it is first needed.
    Spec(Vec<LevelSpec>),
}

/// The design of an entire experiment hierarchy.
#[derive(Debug)]
pub struct DesignTree {
    levels: Vec<Level>,
    branches: IndexMap<String, Rc<DesignTree>>,
}

impl DesignTree {
    /// Build a homogeneous tree from its levels, top to bottom.
    ///
    /// Runs the bottom-up initialization pass; see
    /// [`DesignTree::with_alternates`] for trees that branch.
    ///
    /// # Errors
    ///
    /// Configuration errors from designs' `first_pass`, or a non-atomic
    /// ordering at the top level.
    pub fn new(levels: Vec<Level>) -> Result<Self> {
        Self::with_alternates(levels, IndexMap::new(), &OrderingRegistry::with_builtins())
    }

    /// Build a tree with named alternate subtrees for heterogeneous
    /// structures.
    ///
    /// The first design of the bottom level decides: if it declares the
    /// reserved `design` IV, every one of its declared branch names must
    /// resolve through `alternates`: prebuilt trees are reused verbatim,
    /// raw specifications are built recursively with the remaining
    /// alternates (minus the branch being built) passed along. `registry`
    /// resolves ordering names inside raw specifications.
    ///
    /// # Errors
    ///
    /// Everything [`DesignTree::new`] raises, plus unknown branch names and
    /// specification errors from alternate construction.
    pub fn with_alternates(
        mut levels: Vec<Level>,
        alternates: IndexMap<String, Alternate>,
        registry: &OrderingRegistry,
    ) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::Config(
                "a design tree needs at least one level".to_string(),
            ));
        }
        for level in &levels {
            if level.designs.is_empty() {
                return Err(Error::Config(format!(
                    "level `{}` has no designs",
                    level.name
                )));
            }
        }

        let bottom = &levels[levels.len() - 1].designs[0];
        let mut branches = IndexMap::new();
        if bottom.is_heterogeneous() {
            for branch in bottom.branches() {
                match alternates.get(&branch) {
                    Some(Alternate::Tree(tree)) => {
                        branches.insert(branch, Rc::clone(tree));
                    }
                    Some(Alternate::Spec(level_specs)) => {
                        let mut remaining = alternates.clone();
                        remaining.shift_remove(&branch);
                        let branch_levels = build_levels(level_specs, registry)?;
                        let tree = Self::with_alternates(branch_levels, remaining, registry)?;
                        branches.insert(branch, Rc::new(tree));
                    }
                    None => return Err(Error::UnknownBranch(branch)),
                }
            }
        }

        run_first_pass(&mut levels)?;

        Ok(Self { levels, branches })
    }

    /// Build a tree from a structured specification (see [`TreeSpec`]).
    ///
    /// # Errors
    ///
    /// Specification errors, unknown ordering kinds, and everything tree
    /// construction raises.
    pub fn from_spec(spec: &serde_json::Value) -> Result<Self> {
        Self::from_spec_with(spec, &OrderingRegistry::with_builtins())
    }

    /// Like [`DesignTree::from_spec`], resolving ordering names through a
    /// caller-supplied registry.
    ///
    /// # Errors
    ///
    /// See [`DesignTree::from_spec`].
    pub fn from_spec_with(
        spec: &serde_json::Value,
        registry: &OrderingRegistry,
    ) -> Result<Self> {
        let spec: TreeSpec = serde_json::from_value(spec.clone())
            .map_err(|err| Error::Spec(err.to_string()))?;
        spec.build(registry)
    }

    /// The explicit levels of this tree, top to bottom.
    #[must_use]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Branch subtrees of a heterogeneous tree; empty otherwise.
    #[must_use]
    pub fn branches(&self) -> &IndexMap<String, Rc<DesignTree>> {
        &self.branches
    }

    /// Logical length: explicit levels plus the length of one branch
    /// subtree, when branches exist. Branches are assumed, not verified, to
    /// share equal length.
    #[must_use]
    pub fn logical_len(&self) -> usize {
        let branch_len = self
            .branches
            .first()
            .map_or(0, |(_, tree)| tree.logical_len());
        self.levels.len() + branch_len
    }

    /// Prepend a synthetic `_base` level holding an empty design, giving the
    /// tree a uniform single root for section materialization.
    pub fn add_base_level(&mut self) {
        self.levels
            .insert(0, Level::single(BASE_LEVEL, Design::empty()));
    }
}

/// Walk adjacent level pairs bottom to top: run `first_pass` on every lower
/// design, then install every synthetic IV it returned on every design one
/// level up. The top level runs last and must not yield a synthetic IV.
fn run_first_pass(levels: &mut [Level]) -> Result<()> {
    for lower in (1..levels.len()).rev() {
        let mut names = Vec::new();
        let mut values = Vec::new();
        for design in &mut levels[lower].designs {
            if let Some(iv) = design.first_pass()? {
                names.push(iv.name);
                values.push(iv.values);
            }
        }
        for design in &mut levels[lower - 1].designs {
            design.update(names.clone(), values.clone());
        }
    }

    for design in &mut levels[0].designs {
        if let Some(iv) = design.first_pass()? {
            return Err(Error::NonAtomicAtTop { iv: iv.name });
        }
    }
    Ok(())
}

/// Forward-only view into a [`DesignTree`]: the current top level plus
/// everything below it.
///
/// Peeling never mutates the underlying tree; it returns a new, shorter
/// view.
#[derive(Debug, Clone)]
pub struct TreeCursor {
    tree: Rc<DesignTree>,
    depth: usize,
}

/// Result of peeling one level off a cursor.
#[derive(Debug, Clone)]
pub enum Peeled {
    /// The next level down, in the same tree.
    Tree(TreeCursor),
    /// The structure diverges here: one cursor per branch name.
    Branches(IndexMap<String, TreeCursor>),
}

impl TreeCursor {
    /// View a tree from its top level.
    #[must_use]
    pub fn new(tree: Rc<DesignTree>) -> Self {
        Self { tree, depth: 0 }
    }

    /// The cursor's current top level.
    #[must_use]
    pub fn level(&self) -> &Level {
        &self.tree.levels()[self.depth]
    }

    /// Logical length of the remaining view (see
    /// [`DesignTree::logical_len`]).
    #[must_use]
    pub fn logical_len(&self) -> usize {
        let branch_len = self
            .tree
            .branches()
            .first()
            .map_or(0, |(_, tree)| tree.logical_len());
        (self.tree.levels().len() - self.depth) + branch_len
    }

    /// True when this view is a single bottom level: peeling is illegal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.logical_len() == 1
    }

    /// Drop the current top level.
    ///
    /// Returns `None` on a terminal view. When a single explicit level
    /// remains over a branching structure, yields one cursor per branch
    /// instead of a tree view.
    #[must_use]
    pub fn peel(&self) -> Option<Peeled> {
        if self.is_terminal() {
            return None;
        }

        if self.depth + 1 == self.tree.levels().len() {
            let branches = self
                .tree
                .branches()
                .iter()
                .map(|(name, tree)| (name.clone(), Self::new(Rc::clone(tree))))
                .collect();
            return Some(Peeled::Branches(branches));
        }

        Some(Peeled::Tree(Self {
            tree: Rc::clone(&self.tree),
            depth: self.depth + 1,
        }))
    }
}
