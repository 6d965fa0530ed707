//! Non-atomic orderings
//!
//! These orderings coordinate across sibling sections: the set of possible
//! orders is fixed once, during `first_pass`, and a synthetic IV installed
//! one level up decides which stored order each section receives.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use super::latin::{balanced_latin_square, latin_square};
use super::{repeat_list, Ordering, SyntheticIv};
use crate::context::{Condition, Context};
use crate::error::{Error, Result};

/// Every distinct permutation of the condition list, spread evenly across
/// sections one level up.
///
/// Contributes the IV `_counterbalance_order`, one value per distinct
/// permutation. The permutation count grows factorially with the number of
/// conditions; more than a handful of conditions is impractical.
#[derive(Debug)]
pub struct CompleteCounterbalance {
    number: usize,
    orders: Vec<Vec<Condition>>,
}

impl Default for CompleteCounterbalance {
    fn default() -> Self {
        Self::new(1)
    }
}

impl CompleteCounterbalance {
    /// Name of the synthetic IV installed one level up.
    pub const IV_NAME: &'static str = "_counterbalance_order";

    /// Create a complete counterbalance; conditions are duplicated `number`
    /// times before permutations are enumerated.
    #[must_use]
    pub fn new(number: usize) -> Self {
        Self {
            number,
            orders: Vec::new(),
        }
    }
}

impl Ordering for CompleteCounterbalance {
    fn first_pass(&mut self, conditions: Vec<Condition>) -> Result<Option<SyntheticIv>> {
        let all = repeat_list(conditions, self.number);
        warn!(
            conditions = all.len(),
            "enumerating distinct permutations for `{}`; the count grows factorially",
            Self::IV_NAME
        );
        self.orders = distinct_permutations(&all);

        Ok(Some(SyntheticIv {
            name: Self::IV_NAME.to_string(),
            values: (0..self.orders.len()).map(Value::from).collect(),
        }))
    }

    fn get_order(&self, context: &Context<'_>) -> Result<Vec<Condition>> {
        lookup_order(&self.orders, context, Self::IV_NAME)
    }
}

/// Sort direction for the [`Sorted`] ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Smallest value first, in every section.
    Ascending,
    /// Largest value first, in every section.
    Descending,
    /// Half the sections ascending, half descending, decided one level up.
    #[default]
    Both,
}

impl SortDirection {
    /// Parse a direction from its specification name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ascending" => Some(Self::Ascending),
            "descending" => Some(Self::Descending),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Conditions sorted by the value of the level's single IV.
///
/// With [`SortDirection::Both`] this is non-atomic: the IV `_sorted_order`
/// (values `ascending` and `descending`) is installed one level up and each
/// section sorts accordingly. Fixed directions sort every section the same
/// way and contribute nothing upward.
#[derive(Debug)]
pub struct Sorted {
    number: usize,
    direction: SortDirection,
    ascending: Vec<Condition>,
    descending: Vec<Condition>,
}

impl Default for Sorted {
    fn default() -> Self {
        Self::new(1, SortDirection::Both)
    }
}

impl Sorted {
    /// Name of the synthetic IV installed one level up (direction `Both`).
    pub const IV_NAME: &'static str = "_sorted_order";

    /// Create a sorted ordering; conditions are duplicated `number` times
    /// before sorting.
    #[must_use]
    pub fn new(number: usize, direction: SortDirection) -> Self {
        Self {
            number,
            direction,
            ascending: Vec::new(),
            descending: Vec::new(),
        }
    }
}

impl Ordering for Sorted {
    fn first_pass(&mut self, conditions: Vec<Condition>) -> Result<Option<SyntheticIv>> {
        if conditions.first().is_some_and(|c| c.len() > 1) {
            return Err(Error::Config(
                "the Sorted ordering only works at a level with a single IV".to_string(),
            ));
        }

        let all = repeat_list(conditions, self.number);
        let mut ascending = all.clone();
        ascending.sort_by(|a, b| value_cmp_opt(a.values().next(), b.values().next()));
        let mut descending = all;
        descending.sort_by(|a, b| value_cmp_opt(b.values().next(), a.values().next()));
        self.ascending = ascending;
        self.descending = descending;

        if self.direction == SortDirection::Both {
            warn!(
                "creating IV `{}` with values `ascending` and `descending`",
                Self::IV_NAME
            );
            Ok(Some(SyntheticIv {
                name: Self::IV_NAME.to_string(),
                values: vec![Value::from("ascending"), Value::from("descending")],
            }))
        } else {
            Ok(None)
        }
    }

    fn get_order(&self, context: &Context<'_>) -> Result<Vec<Condition>> {
        let direction = match self.direction {
            SortDirection::Both => {
                let value = context.get(Self::IV_NAME).ok_or_else(|| {
                    Error::Config(format!("no `{}` value in the ancestor context", Self::IV_NAME))
                })?;
                value.as_str().and_then(SortDirection::from_name).ok_or_else(|| {
                    Error::Config(format!("invalid `{}` value: {value}", Self::IV_NAME))
                })?
            }
            fixed => fixed,
        };

        match direction {
            SortDirection::Ascending => Ok(self.ascending.clone()),
            SortDirection::Descending => Ok(self.descending.clone()),
            SortDirection::Both => Err(Error::Config(format!(
                "`{}` must resolve to `ascending` or `descending`",
                Self::IV_NAME
            ))),
        }
    }
}

/// Rows of a latin square as condition orders, spread across sections one
/// level up through the IV `_latin_square_row`.
///
/// `balanced` (the default) also equalizes first-order carry-over effects and
/// requires an even number of conditions; `uniform` samples uniformly from
/// all latin squares instead, which is slow above order 5. The two are
/// mutually exclusive.
#[derive(Debug)]
pub struct LatinSquare {
    number: usize,
    balanced: bool,
    uniform: bool,
    orders: Vec<Vec<Condition>>,
}

impl LatinSquare {
    /// Name of the synthetic IV installed one level up.
    pub const IV_NAME: &'static str = "_latin_square_row";

    /// Create a latin-square ordering; each row's conditions are duplicated
    /// `number` times after the square is built.
    ///
    /// # Errors
    ///
    /// Balanced, uniform latin squares cannot be constructed.
    pub fn new(number: usize, balanced: bool, uniform: bool) -> Result<Self> {
        if balanced && uniform {
            return Err(Error::Config(
                "cannot create a balanced, uniform latin square".to_string(),
            ));
        }
        Ok(Self {
            number,
            balanced,
            uniform,
            orders: Vec::new(),
        })
    }
}

impl Ordering for LatinSquare {
    fn first_pass(&mut self, conditions: Vec<Condition>) -> Result<Option<SyntheticIv>> {
        let order = conditions.len();
        if order == 0 {
            return Err(Error::Config(
                "cannot build a latin square over an empty condition set".to_string(),
            ));
        }

        let mut rng = rand::thread_rng();
        let square = if self.balanced {
            balanced_latin_square(order, &mut rng)?
        } else {
            warn!(order, uniform = self.uniform, "constructing latin square");
            let square = latin_square(order, !self.uniform, self.uniform, !self.uniform, &mut rng);
            warn!("latin square construction complete");
            square
        };

        self.orders = square
            .into_iter()
            .map(|row| {
                let row_conditions: Vec<Condition> =
                    row.into_iter().map(|i| conditions[i].clone()).collect();
                repeat_list(row_conditions, self.number)
            })
            .collect();

        warn!(rows = order, "creating IV `{}`", Self::IV_NAME);
        Ok(Some(SyntheticIv {
            name: Self::IV_NAME.to_string(),
            values: (0..order).map(Value::from).collect(),
        }))
    }

    fn get_order(&self, context: &Context<'_>) -> Result<Vec<Condition>> {
        lookup_order(&self.orders, context, Self::IV_NAME)
    }
}

/// Pick the stored order selected by the synthetic IV's value in `context`.
fn lookup_order(
    orders: &[Vec<Condition>],
    context: &Context<'_>,
    iv_name: &str,
) -> Result<Vec<Condition>> {
    let value = context
        .get(iv_name)
        .ok_or_else(|| Error::Config(format!("no `{iv_name}` value in the ancestor context")))?;
    let index = value
        .as_u64()
        .map(|n| n as usize)
        .filter(|&n| n < orders.len())
        .ok_or_else(|| Error::Config(format!("invalid `{iv_name}` value: {value}")))?;
    Ok(orders[index].clone())
}

/// Every distinct permutation of `conditions`, in enumeration order.
///
/// Uniqueness is decided by condition equality, so duplicated conditions do
/// not inflate the result.
fn distinct_permutations(conditions: &[Condition]) -> Vec<Vec<Condition>> {
    // Identical conditions share a class id; a permutation's identity is its
    // class-id sequence.
    let mut classes: Vec<usize> = Vec::with_capacity(conditions.len());
    let mut representatives: Vec<&Condition> = Vec::new();
    for condition in conditions {
        let class = representatives
            .iter()
            .position(|r| *r == condition)
            .unwrap_or_else(|| {
                representatives.push(condition);
                representatives.len() - 1
            });
        classes.push(class);
    }

    let mut indices: Vec<usize> = (0..conditions.len()).collect();
    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let mut orders = Vec::new();
    let count = indices.len();
    permute(&mut indices, count, &mut |permutation| {
        let fingerprint: Vec<usize> = permutation.iter().map(|&i| classes[i]).collect();
        if seen.insert(fingerprint) {
            orders.push(permutation.iter().map(|&i| conditions[i].clone()).collect());
        }
    });
    orders
}

/// Heap's algorithm over the first `k` items.
fn permute(items: &mut [usize], k: usize, visit: &mut dyn FnMut(&[usize])) {
    if k <= 1 {
        visit(items);
        return;
    }
    for i in 0..k - 1 {
        permute(items, k - 1, visit);
        if k % 2 == 0 {
            items.swap(i, k - 1);
        } else {
            items.swap(0, k - 1);
        }
    }
    permute(items, k - 1, visit);
}

/// Total order over JSON values: by type first (null, bool, number, string,
/// array, object), then within numbers, bools, strings, and arrays by their
/// natural order.
fn value_cmp(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ordering = value_cmp(xi, yi);
                if ordering != CmpOrdering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn value_cmp_opt(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(a), Some(b)) => value_cmp(a, b),
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
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

    fn context_with(key: &str, value: Value) -> Condition {
        let mut layer = Condition::new();
        layer.insert(key.to_string(), value);
        layer
    }

    #[test]
    fn test_counterbalance_enumerates_distinct_orders() {
        let mut ordering = CompleteCounterbalance::new(1);
        let synthetic = ordering
            .first_pass(conditions(&[1, 2, 3]))
            .unwrap()
            .expect("counterbalance is non-atomic");

        assert_eq!(synthetic.name, CompleteCounterbalance::IV_NAME);
        assert_eq!(synthetic.values.len(), 6);

        // Each value selects a distinct permutation.
        let mut seen = HashSet::new();
        for (i, _) in synthetic.values.iter().enumerate() {
            let layer = context_with(CompleteCounterbalance::IV_NAME, json!(i));
            let ctx = Context::from_layers(vec![&layer]);
            let order = ordering.get_order(&ctx).unwrap();
            let xs: Vec<i64> = order.iter().map(|c| c["x"].as_i64().unwrap()).collect();
            assert!(seen.insert(xs));
        }
    }

    #[test]
    fn test_counterbalance_deduplicates_repeated_conditions() {
        // Two conditions duplicated twice: 4! / (2! * 2!) = 6 distinct orders.
        let mut ordering = CompleteCounterbalance::new(2);
        let synthetic = ordering.first_pass(conditions(&[1, 2])).unwrap().unwrap();
        assert_eq!(synthetic.values.len(), 6);
    }

    #[test]
    fn test_counterbalance_missing_context_value() {
        let mut ordering = CompleteCounterbalance::new(1);
        ordering.first_pass(conditions(&[1, 2])).unwrap();
        assert!(ordering.get_order(&Context::new()).is_err());
    }

    #[test]
    fn test_sorted_fixed_directions() {
        let mut ordering = Sorted::new(1, SortDirection::Ascending);
        let synthetic = ordering.first_pass(conditions(&[3, 1, 2])).unwrap();
        assert!(synthetic.is_none(), "fixed directions are atomic");

        let order = ordering.get_order(&Context::new()).unwrap();
        let xs: Vec<i64> = order.iter().map(|c| c["x"].as_i64().unwrap()).collect();
        assert_eq!(xs, [1, 2, 3]);

        let mut ordering = Sorted::new(1, SortDirection::Descending);
        ordering.first_pass(conditions(&[3, 1, 2])).unwrap();
        let order = ordering.get_order(&Context::new()).unwrap();
        let xs: Vec<i64> = order.iter().map(|c| c["x"].as_i64().unwrap()).collect();
        assert_eq!(xs, [3, 2, 1]);
    }

    #[test]
    fn test_sorted_both_reads_direction_from_context() {
        let mut ordering = Sorted::new(1, SortDirection::Both);
        let synthetic = ordering.first_pass(conditions(&[2, 1])).unwrap().unwrap();
        assert_eq!(synthetic.name, Sorted::IV_NAME);

        let layer = context_with(Sorted::IV_NAME, json!("descending"));
        let ctx = Context::from_layers(vec![&layer]);
        let order = ordering.get_order(&ctx).unwrap();
        let xs: Vec<i64> = order.iter().map(|c| c["x"].as_i64().unwrap()).collect();
        assert_eq!(xs, [2, 1]);
    }

    #[test]
    fn test_sorted_rejects_multiple_ivs() {
        let mut condition = Condition::new();
        condition.insert("a".to_string(), json!(1));
        condition.insert("b".to_string(), json!(2));

        let mut ordering = Sorted::new(1, SortDirection::Both);
        assert!(ordering.first_pass(vec![condition]).is_err());
    }

    #[test]
    fn test_latin_square_rows_are_permutations() {
        let mut ordering = LatinSquare::new(1, false, false).unwrap();
        let synthetic = ordering.first_pass(conditions(&[1, 2, 3, 4])).unwrap().unwrap();
        assert_eq!(synthetic.name, LatinSquare::IV_NAME);
        assert_eq!(synthetic.values.len(), 4);

        for i in 0..4 {
            let layer = context_with(LatinSquare::IV_NAME, json!(i));
            let ctx = Context::from_layers(vec![&layer]);
            let order = ordering.get_order(&ctx).unwrap();
            let mut xs: Vec<i64> = order.iter().map(|c| c["x"].as_i64().unwrap()).collect();
            xs.sort_unstable();
            assert_eq!(xs, [1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_latin_square_balanced_excludes_uniform() {
        assert!(LatinSquare::new(1, true, true).is_err());
    }

    #[test]
    fn test_balanced_latin_square_needs_even_conditions() {
        let mut ordering = LatinSquare::new(1, true, false).unwrap();
        assert!(ordering.first_pass(conditions(&[1, 2, 3])).is_err());
    }

    #[test]
    fn test_distinct_permutations_of_empty_list() {
        let orders = distinct_permutations(&[]);
        assert_eq!(orders.len(), 1);
        assert!(orders[0].is_empty());
    }
}
