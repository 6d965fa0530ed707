//! Condition sequencing policies
//!
//! An [`Ordering`] decides how the unique conditions of one
//! [`Design`](crate::design::Design) are duplicated and sequenced. Atomic
//! orderings ([`Sequential`], [`Shuffle`]) decide independently inside every
//! parent section. Non-atomic orderings ([`CompleteCounterbalance`],
//! [`Sorted`], [`LatinSquare`]) cannot: to spread orders evenly across
//! sections, the *parent* level must tell each section which order to use.
//! They do this by returning a [`SyntheticIv`] from
//! [`Ordering::first_pass`], which the design tree installs as an extra IV
//! one level up; at order time they read that IV back out of the ancestor
//! context.
//!
//! Orderings are looked up by name through an [`OrderingRegistry`] when
//! designs are built from structured specifications.

pub mod latin;
mod nonatomic;

pub use nonatomic::{CompleteCounterbalance, LatinSquare, SortDirection, Sorted};

use std::fmt;

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::context::{Condition, Context};
use crate::error::{Error, Result};

/// An independent variable created by a non-atomic ordering, to be installed
/// on every design one level above the ordering's own level.
///
/// Synthetic IV names start with an underscore to stay out of the way of
/// user-declared IVs.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticIv {
    /// IV name, e.g. `_counterbalance_order`
    pub name: String,
    /// Possible values; each selects one stored order
    pub values: Vec<Value>,
}

/// Sequencing policy for the conditions of one design.
pub trait Ordering: fmt::Debug {
    /// One-time initialization with the full condition set.
    ///
    /// Called exactly once per design, bottom-up across the tree, before any
    /// call to [`Ordering::get_order`]. Returns the synthetic IV that the
    /// level above must absorb, or `None` for atomic orderings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the condition set violates the
    /// ordering's preconditions (e.g. [`Sorted`] with more than one IV).
    fn first_pass(&mut self, conditions: Vec<Condition>) -> Result<Option<SyntheticIv>>;

    /// Produce one ordered sequence of conditions.
    ///
    /// `context` is the requesting section's ancestor context; atomic
    /// orderings ignore it, non-atomic orderings read their synthetic IV's
    /// value from it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a non-atomic ordering's synthetic
    /// IV is missing from the context or maps to no stored order.
    fn get_order(&self, context: &Context<'_>) -> Result<Vec<Condition>>;
}

/// Repeat the whole condition list `number` times, keeping it in declared
/// (or design-matrix row) order.
#[derive(Debug)]
pub struct Sequential {
    number: usize,
    conditions: Vec<Condition>,
}

impl Sequential {
    /// Create an order-preserving ordering that repeats the condition list
    /// `number` times.
    #[must_use]
    pub fn new(number: usize) -> Self {
        Self {
            number,
            conditions: Vec::new(),
        }
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Ordering for Sequential {
    fn first_pass(&mut self, conditions: Vec<Condition>) -> Result<Option<SyntheticIv>> {
        self.conditions = repeat_list(conditions, self.number);
        Ok(None)
    }

    fn get_order(&self, _context: &Context<'_>) -> Result<Vec<Condition>> {
        Ok(self.conditions.clone())
    }
}

/// Return the conditions in a fresh random order on every call.
#[derive(Debug)]
pub struct Shuffle {
    number: usize,
    avoid_repeats: bool,
    conditions: Vec<Condition>,
}

impl Shuffle {
    /// Create a shuffling ordering.
    ///
    /// Conditions are duplicated `number` times before shuffling. With
    /// `avoid_repeats`, shuffling repeats until no identical conditions sit
    /// back to back; the caller must ensure such an order exists.
    #[must_use]
    pub fn new(number: usize, avoid_repeats: bool) -> Self {
        Self {
            number,
            avoid_repeats,
            conditions: Vec::new(),
        }
    }
}

impl Default for Shuffle {
    fn default() -> Self {
        Self::new(1, false)
    }
}

impl Ordering for Shuffle {
    fn first_pass(&mut self, conditions: Vec<Condition>) -> Result<Option<SyntheticIv>> {
        self.conditions = repeat_list(conditions, self.number);
        Ok(None)
    }

    fn get_order(&self, _context: &Context<'_>) -> Result<Vec<Condition>> {
        let mut rng = rand::thread_rng();
        let mut order = self.conditions.clone();
        order.shuffle(&mut rng);
        if self.avoid_repeats {
            while has_repeats(&order) {
                order.shuffle(&mut rng);
            }
        }
        Ok(order)
    }
}

/// Duplicate a condition list as a whole, `number` times.
pub(crate) fn repeat_list(conditions: Vec<Condition>, number: usize) -> Vec<Condition> {
    let mut repeated = Vec::with_capacity(conditions.len() * number);
    for _ in 0..number {
        repeated.extend(conditions.iter().cloned());
    }
    repeated
}

fn has_repeats(conditions: &[Condition]) -> bool {
    conditions.windows(2).any(|pair| pair[0] == pair[1])
}

/// Constructor stored in an [`OrderingRegistry`]: positional arguments and
/// keyword arguments from a specification, in; a boxed ordering, out.
pub type OrderingCtor = Box<dyn Fn(&[Value], &Condition) -> Result<Box<dyn Ordering>>>;

/// Explicit name-to-constructor map for ordering specifications.
///
/// Structured specs refer to orderings by name (`"Shuffle"`,
/// `{"class": "LatinSquare", "balanced": false}`, ...). The registry maps
/// each recognized name to a constructor; looking up an unrecognized name is
/// a configuration error. Custom orderings can be added with
/// [`OrderingRegistry::register`].
pub struct OrderingRegistry {
    ctors: IndexMap<String, OrderingCtor>,
}

impl fmt::Debug for OrderingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderingRegistry")
            .field("kinds", &self.ctors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for OrderingRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl OrderingRegistry {
    /// Create an empty registry with no recognized kinds.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ctors: IndexMap::new(),
        }
    }

    /// Create a registry with all built-in orderings registered.
    ///
    /// `Ordering` is accepted as an alias for `Sequential`, matching the
    /// name the order-preserving policy goes by in existing specification
    /// files.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("Sequential", build_sequential);
        registry.register("Ordering", build_sequential);
        registry.register("Shuffle", build_shuffle);
        registry.register("CompleteCounterbalance", build_counterbalance);
        registry.register("Sorted", build_sorted);
        registry.register("LatinSquare", build_latin_square);
        registry
    }

    /// Register a constructor under a kind name, replacing any previous
    /// registration of that name.
    pub fn register<F>(&mut self, kind: impl Into<String>, ctor: F)
    where
        F: Fn(&[Value], &Condition) -> Result<Box<dyn Ordering>> + 'static,
    {
        self.ctors.insert(kind.into(), Box::new(ctor));
    }

    /// Instantiate an ordering by kind name.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownOrdering`] for unrecognized names; constructor errors
    /// for invalid arguments.
    pub fn build(
        &self,
        kind: &str,
        args: &[Value],
        kwargs: &Condition,
    ) -> Result<Box<dyn Ordering>> {
        let ctor = self
            .ctors
            .get(kind)
            .ok_or_else(|| Error::UnknownOrdering(kind.to_string()))?;
        ctor(args, kwargs)
    }

    /// The registered kind names, in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.ctors.keys().map(String::as_str)
    }
}

fn build_sequential(args: &[Value], kwargs: &Condition) -> Result<Box<dyn Ordering>> {
    let number = usize_arg(args.first(), kwargs, "number", 1)?;
    Ok(Box::new(Sequential::new(number)))
}

fn build_shuffle(args: &[Value], kwargs: &Condition) -> Result<Box<dyn Ordering>> {
    let avoid_repeats = bool_arg(args.first(), kwargs, "avoid_repeats", false)?;
    let number = usize_arg(None, kwargs, "number", 1)?;
    Ok(Box::new(Shuffle::new(number, avoid_repeats)))
}

fn build_counterbalance(args: &[Value], kwargs: &Condition) -> Result<Box<dyn Ordering>> {
    let number = usize_arg(args.first(), kwargs, "number", 1)?;
    Ok(Box::new(CompleteCounterbalance::new(number)))
}

fn build_sorted(args: &[Value], kwargs: &Condition) -> Result<Box<dyn Ordering>> {
    let direction = match args.first().or_else(|| kwargs.get("order")) {
        Some(value) => value
            .as_str()
            .and_then(SortDirection::from_name)
            .ok_or_else(|| {
                Error::Spec(format!("invalid sort direction for Sorted ordering: {value}"))
            })?,
        None => SortDirection::Both,
    };
    let number = usize_arg(None, kwargs, "number", 1)?;
    Ok(Box::new(Sorted::new(number, direction)))
}

fn build_latin_square(args: &[Value], kwargs: &Condition) -> Result<Box<dyn Ordering>> {
    let balanced = bool_arg(args.first(), kwargs, "balanced", true)?;
    let uniform = bool_arg(args.get(1), kwargs, "uniform", false)?;
    let number = usize_arg(None, kwargs, "number", 1)?;
    LatinSquare::new(number, balanced, uniform).map(|sq| Box::new(sq) as Box<dyn Ordering>)
}

fn usize_arg(
    positional: Option<&Value>,
    kwargs: &Condition,
    key: &str,
    default: usize,
) -> Result<usize> {
    match positional.or_else(|| kwargs.get(key)) {
        Some(value) => value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| Error::Spec(format!("ordering argument `{key}` must be a non-negative integer, got {value}"))),
        None => Ok(default),
    }
}

fn bool_arg(
    positional: Option<&Value>,
    kwargs: &Condition,
    key: &str,
    default: bool,
) -> Result<bool> {
    match positional.or_else(|| kwargs.get(key)) {
        Some(value) => value
            .as_bool()
            .ok_or_else(|| Error::Spec(format!("ordering argument `{key}` must be a boolean, got {value}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conditions(values: &[i64]) -> Vec<Condition> {
        values
            .iter()
            .map(|v| {
                let mut c = Condition::new();
                c.insert("x".to_string(), json!(v));
                c
            })
            .collect()
    }

    #[test]
    fn test_sequential_preserves_order_and_duplicates() {
        let mut ordering = Sequential::new(2);
        let synthetic = ordering.first_pass(conditions(&[1, 2, 3])).unwrap();
        assert!(synthetic.is_none());

        let order = ordering.get_order(&Context::new()).unwrap();
        let xs: Vec<i64> = order.iter().map(|c| c["x"].as_i64().unwrap()).collect();
        assert_eq!(xs, [1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_shuffle_preserves_multiset() {
        let mut ordering = Shuffle::default();
        ordering.first_pass(conditions(&[1, 2, 3, 4])).unwrap();

        let order = ordering.get_order(&Context::new()).unwrap();
        let mut xs: Vec<i64> = order.iter().map(|c| c["x"].as_i64().unwrap()).collect();
        xs.sort_unstable();
        assert_eq!(xs, [1, 2, 3, 4]);
    }

    #[test]
    fn test_shuffle_avoid_repeats() {
        let mut ordering = Shuffle::new(3, true);
        ordering.first_pass(conditions(&[1, 2])).unwrap();

        for _ in 0..20 {
            let order = ordering.get_order(&Context::new()).unwrap();
            assert!(!has_repeats(&order));
        }
    }

    #[test]
    fn test_registry_knows_builtins() {
        let registry = OrderingRegistry::with_builtins();
        for kind in ["Sequential", "Ordering", "Shuffle", "CompleteCounterbalance", "Sorted", "LatinSquare"] {
            assert!(registry.build(kind, &[], &Condition::new()).is_ok(), "{kind}");
        }
    }

    #[test]
    fn test_registry_rejects_unknown_kind() {
        let registry = OrderingRegistry::with_builtins();
        let err = registry.build("Fibonacci", &[], &Condition::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownOrdering(_)));
    }

    #[test]
    fn test_registry_accepts_custom_kind() {
        let mut registry = OrderingRegistry::with_builtins();
        registry.register("Reverse", |_args, _kwargs| {
            Ok(Box::new(Sequential::new(1)) as Box<dyn Ordering>)
        });
        assert!(registry.build("Reverse", &[], &Condition::new()).is_ok());
    }

    #[test]
    fn test_positional_and_keyword_arguments() {
        let registry = OrderingRegistry::with_builtins();
        // Positional: Shuffle(avoid_repeats)
        registry
            .build("Shuffle", &[json!(true)], &Condition::new())
            .unwrap();
        // Keyword: number
        let mut kwargs = Condition::new();
        kwargs.insert("number".to_string(), json!(3));
        registry.build("Sequential", &[], &kwargs).unwrap();

        let mut bad = Condition::new();
        bad.insert("number".to_string(), json!("three"));
        assert!(registry.build("Sequential", &[], &bad).is_err());
    }
}
