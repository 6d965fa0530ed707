//! Concrete experiment sections
//!
//! An [`Experiment`] eagerly materializes a [`DesignTree`] into a tree of
//! [`ExperimentSection`] nodes: participants, sessions, blocks, trials,
//! whatever the tree's levels are named. Constructing any section
//! immediately and recursively constructs its entire subtree; a failure
//! anywhere aborts the whole build.
//!
//! Sections live in an arena owned by the experiment and are addressed by
//! [`SectionId`]; parent/child relationships are indices, not embedded
//! references. Each section owns one context layer; lookups fall through to
//! ancestor layers, so data added to a section is visible from every
//! descendant without copying.

use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::debug;

use crate::context::{Condition, Context};
use crate::design::{branch_key, Design, HETEROGENEOUS_IV};
use crate::error::{Error, Result};
use crate::ordering::OrderingRegistry;
use crate::tree::{DesignTree, Peeled, TreeCursor};

/// Arena index of a section within its [`Experiment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(usize);

impl SectionId {
    /// The raw arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One node of the materialized experiment hierarchy.
#[derive(Debug)]
pub struct ExperimentSection {
    level: String,
    is_bottom: bool,
    data: Condition,
    parent: Option<SectionId>,
    children: VecDeque<SectionId>,
    cursor: TreeCursor,
    has_started: bool,
    has_finished: bool,
}

impl ExperimentSection {
    /// The level this section lives at (`participant`, `trial`, ...).
    #[must_use]
    pub fn level(&self) -> &str {
        &self.level
    }

    /// True for sections at the deepest level of the hierarchy.
    #[must_use]
    pub fn is_bottom_level(&self) -> bool {
        self.is_bottom
    }

    /// This section's own context layer: its condition values, extra data,
    /// position number, and anything added with
    /// [`ExperimentSection::add_data`]. Ancestor values are not included;
    /// see [`Experiment::resolved_data`].
    #[must_use]
    pub fn data(&self) -> &Condition {
        &self.data
    }

    /// The parent section, `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<SectionId> {
        self.parent
    }

    /// Child section ids, in order.
    pub fn children(&self) -> impl ExactSizeIterator<Item = SectionId> + '_ {
        self.children.iter().copied()
    }

    /// Number of immediate children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Merge values into this section's own layer.
    ///
    /// Instantly visible to every descendant through layered lookup; no
    /// descendant layer is rewritten.
    pub fn add_data(&mut self, data: Condition) {
        self.data.extend(data);
    }

    /// Whether this section has started running.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.has_started
    }

    /// Whether this section has finished running.
    #[must_use]
    pub fn has_finished(&self) -> bool {
        self.has_finished
    }

    /// Record that this section has started running.
    pub fn mark_started(&mut self) {
        self.has_started = true;
    }

    /// Record that this section has finished running.
    pub fn mark_finished(&mut self) {
        self.has_finished = true;
    }
}

/// A fully materialized experiment: the section arena plus its design tree.
///
/// ```
/// use serde_json::json;
/// use trialtree::Experiment;
///
/// let experiment = Experiment::from_spec(&json!([
///     {"name": "block", "ivs": {"kind": ["visual", "audio"]}, "ordering": "Ordering"},
///     {"name": "trial", "ivs": {"difficulty": [1, 2, 3]}, "ordering": "Ordering"},
/// ]))?;
///
/// // 2 blocks x 3 trials
/// assert_eq!(experiment.generate_data().count(), 6);
/// # Ok::<(), trialtree::Error>(())
/// ```
#[derive(Debug)]
pub struct Experiment {
    sections: Vec<ExperimentSection>,
}

impl Experiment {
    /// Materialize the full section tree from a design tree.
    ///
    /// A synthetic `_base` root level is prepended, so the experiment always
    /// has a single root above the tree's own top level.
    ///
    /// # Errors
    ///
    /// Ordering and branch-resolution failures abort the whole build;
    /// nothing partial is retained.
    pub fn from_design_tree(mut tree: DesignTree) -> Result<Self> {
        tree.add_base_level();
        let cursor = TreeCursor::new(Rc::new(tree));
        let mut experiment = Self {
            sections: Vec::new(),
        };
        experiment.build_section(None, cursor, Condition::new())?;
        Ok(experiment)
    }

    /// Build the design tree from a structured specification and materialize
    /// it.
    ///
    /// # Errors
    ///
    /// Specification errors plus everything
    /// [`Experiment::from_design_tree`] raises.
    pub fn from_spec(spec: &serde_json::Value) -> Result<Self> {
        Self::from_design_tree(DesignTree::from_spec(spec)?)
    }

    /// Like [`Experiment::from_spec`], resolving ordering names through a
    /// caller-supplied registry.
    ///
    /// # Errors
    ///
    /// See [`Experiment::from_spec`].
    pub fn from_spec_with(
        spec: &serde_json::Value,
        registry: &OrderingRegistry,
    ) -> Result<Self> {
        Self::from_design_tree(DesignTree::from_spec_with(spec, registry)?)
    }

    /// The root section (level `_base`).
    #[must_use]
    pub fn root(&self) -> SectionId {
        SectionId(0)
    }

    /// Total number of sections in the arena.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Borrow a section.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this experiment.
    #[must_use]
    pub fn section(&self, id: SectionId) -> &ExperimentSection {
        &self.sections[id.index()]
    }

    /// Mutably borrow a section (for [`ExperimentSection::add_data`] and the
    /// run-state markers).
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this experiment.
    pub fn section_mut(&mut self, id: SectionId) -> &mut ExperimentSection {
        &mut self.sections[id.index()]
    }

    /// Merge values into a section's own context layer.
    pub fn add_data(&mut self, id: SectionId, data: Condition) {
        self.section_mut(id).add_data(data);
    }

    /// Child ids of a section, in order.
    pub fn children(&self, id: SectionId) -> impl ExactSizeIterator<Item = SectionId> + '_ {
        self.section(id).children()
    }

    /// The `index`-th child of a section (0-based).
    #[must_use]
    pub fn child(&self, id: SectionId, index: usize) -> Option<SectionId> {
        self.section(id).children.get(index).copied()
    }

    /// A section's fully resolved context: every ancestor layer merged with
    /// its own, ancestor keys first, descendant values winning.
    #[must_use]
    pub fn resolved_data(&self, id: SectionId) -> Condition {
        self.context_of(id).flatten()
    }

    /// Append one child section built from explicit condition data.
    ///
    /// The child (and its whole subtree) is constructed from this section's
    /// remaining design tree, then inserted at the back, or at the front
    /// with `to_start`. Children are renumbered afterwards.
    ///
    /// # Errors
    ///
    /// Appending below a bottom-level section is a configuration error;
    /// construction failures propagate.
    pub fn append_child(
        &mut self,
        id: SectionId,
        data: Condition,
        to_start: bool,
    ) -> Result<SectionId> {
        let cursor = self.next_cursor(id)?;
        let child = self.build_section(Some(id), cursor, data)?;
        if to_start {
            self.sections[id.index()].children.push_front(child);
        } else {
            self.sections[id.index()].children.push_back(child);
        }
        self.renumber_children(id);
        Ok(child)
    }

    /// Expand a design into child sections, one per condition.
    ///
    /// `design.get_order` sees this section's accumulated context, so the
    /// ordering may depend on ancestor values. With `to_start` the new batch
    /// is inserted at the front, keeping its relative order. Children are
    /// renumbered afterwards. The design must already have had its
    /// `first_pass` run (designs taken from a built tree have).
    ///
    /// # Errors
    ///
    /// Appending below a bottom-level section is a configuration error;
    /// ordering and construction failures propagate.
    pub fn append_design(
        &mut self,
        id: SectionId,
        design: &Design,
        to_start: bool,
    ) -> Result<Vec<SectionId>> {
        let cursor = self.next_cursor(id)?;
        let order = {
            let context = self.context_of(id);
            design.get_order(&context)?
        };

        let mut new_ids = Vec::with_capacity(order.len());
        if to_start {
            for condition in order.into_iter().rev() {
                let child = self.build_section(Some(id), cursor.clone(), condition)?;
                self.sections[id.index()].children.push_front(child);
                new_ids.push(child);
            }
            new_ids.reverse();
        } else {
            for condition in order {
                let child = self.build_section(Some(id), cursor.clone(), condition)?;
                self.sections[id.index()].children.push_back(child);
                new_ids.push(child);
            }
        }
        self.renumber_children(id);
        Ok(new_ids)
    }

    /// Lazy, depth-first, left-to-right iterator over the resolved context
    /// of every bottom-level section.
    ///
    /// Stateless and restartable: repeated calls on an unmodified experiment
    /// yield identical sequences.
    #[must_use]
    pub fn generate_data(&self) -> DataIter<'_> {
        self.generate_data_from(self.root())
    }

    /// Like [`Experiment::generate_data`], but only for bottom-level
    /// sections descending from `id`.
    #[must_use]
    pub fn generate_data_from(&self, id: SectionId) -> DataIter<'_> {
        let mut stack: Vec<SectionId> = self.section(id).children().collect();
        stack.reverse();
        DataIter {
            experiment: self,
            stack,
        }
    }

    /// The union of keys over all leaf records, in order of first
    /// appearance: the effective column set for tabular export.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        let mut columns: IndexSet<String> = IndexSet::new();
        for record in self.generate_data() {
            for key in record.keys() {
                columns.insert(key.clone());
            }
        }
        columns.into_iter().collect()
    }

    /// Find a descendant section by per-level 1-based position numbers,
    /// e.g. `[("participant", 2), ("block", 3)]`.
    ///
    /// Every level above the target must be given. Returns `None` when no
    /// such section exists.
    #[must_use]
    pub fn subsection(&self, numbers: &[(&str, u64)]) -> Option<SectionId> {
        self.subsection_below(self.root(), numbers)
    }

    fn subsection_below(&self, id: SectionId, numbers: &[(&str, u64)]) -> Option<SectionId> {
        if numbers.is_empty() {
            return Some(id);
        }
        for child in self.section(id).children() {
            let section = self.section(child);
            let matched = numbers.iter().position(|(level, number)| {
                *level == section.level
                    && section.data.get(*level).and_then(Value::as_u64) == Some(*number)
            });
            if let Some(position) = matched {
                let mut remaining = numbers.to_vec();
                remaining.remove(position);
                return self.subsection_below(child, &remaining);
            }
        }
        None
    }

    /// Eagerly build a section and, unless it is bottom-level, its whole
    /// subtree.
    fn build_section(
        &mut self,
        parent: Option<SectionId>,
        cursor: TreeCursor,
        data: Condition,
    ) -> Result<SectionId> {
        let id = SectionId(self.sections.len());
        let level = cursor.level().name.clone();
        let is_bottom = cursor.is_terminal();
        debug!(level = %level, id = id.index(), "creating section");

        self.sections.push(ExperimentSection {
            level,
            is_bottom,
            data,
            parent,
            children: VecDeque::new(),
            cursor,
            has_started: false,
            has_finished: false,
        });

        if !is_bottom {
            let next = self.next_cursor(id)?;
            for design in &next.level().designs {
                let order = {
                    let context = self.context_of(id);
                    design.get_order(&context)?
                };
                for condition in order {
                    let child = self.build_section(Some(id), next.clone(), condition)?;
                    self.sections[id.index()].children.push_back(child);
                }
            }
            self.renumber_children(id);
        }

        Ok(id)
    }

    /// The cursor describing a section's children: the section's own cursor
    /// peeled one level, with branch maps resolved through the section's
    /// `design` context value.
    fn next_cursor(&self, id: SectionId) -> Result<TreeCursor> {
        let section = self.section(id);
        match section.cursor.peel() {
            None => Err(Error::Config(format!(
                "bottom-level section `{}` cannot have children",
                section.level
            ))),
            Some(Peeled::Tree(cursor)) => Ok(cursor),
            Some(Peeled::Branches(branches)) => {
                let value = self
                    .context_of(id)
                    .get(HETEROGENEOUS_IV)
                    .cloned()
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "heterogeneous section `{}` has no `{HETEROGENEOUS_IV}` value",
                            section.level
                        ))
                    })?;
                let key = branch_key(&value);
                branches
                    .get(&key)
                    .cloned()
                    .ok_or(Error::UnknownBranch(key))
            }
        }
    }

    /// Assemble the layered context for a section: ancestor layers outermost
    /// first, the section's own layer innermost.
    fn context_of(&self, id: SectionId) -> Context<'_> {
        let mut layers = Vec::new();
        let mut current = Some(id);
        while let Some(section_id) = current {
            let section = &self.sections[section_id.index()];
            layers.push(&section.data);
            current = section.parent;
        }
        layers.reverse();
        Context::from_layers(layers)
    }

    /// Rewrite every child's 1-based position number, keyed by the child's
    /// level name. Runs after every insertion; cost is proportional to the
    /// current child count.
    fn renumber_children(&mut self, id: SectionId) {
        let children: Vec<SectionId> = self.sections[id.index()].children().collect();
        let mut counters: IndexMap<String, u64> = IndexMap::new();
        for child in children {
            let level = self.sections[child.index()].level.clone();
            let counter = counters.entry(level.clone()).or_insert(0);
            *counter += 1;
            let position = *counter;
            self.sections[child.index()]
                .data
                .insert(level, Value::from(position));
        }
    }
}

/// Iterator returned by [`Experiment::generate_data`].
#[derive(Debug)]
pub struct DataIter<'a> {
    experiment: &'a Experiment,
    stack: Vec<SectionId>,
}

impl Iterator for DataIter<'_> {
    type Item = Condition;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let section = self.experiment.section(id);
            if section.is_bottom {
                return Some(self.experiment.resolved_data(id));
            }
            for child in section.children.iter().rev() {
                self.stack.push(*child);
            }
        }
        None
    }
}
