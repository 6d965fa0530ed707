//! Experimental design at one level of the hierarchy
//!
//! A [`Design`] owns the independent variables of one level and produces that
//! level's ordered condition list, either by fully crossing the IVs or by
//! decoding an externally supplied design matrix. The ordering policy is
//! pluggable; see [`crate::ordering`].

use serde_json::Value;

use crate::context::{Condition, Context};
use crate::error::{Error, Result};
use crate::ordering::{Ordering, Sequential, Shuffle, SyntheticIv};

/// Reserved IV name that makes a design heterogeneous: its declared values
/// name the branch subtrees that govern sections below it.
pub const HETEROGENEOUS_IV: &str = "design";

/// The experimental design of one level: IVs, optional design matrix, extra
/// data, and an ordering policy.
///
/// A design is mutable only until its one-time [`Design::first_pass`] runs;
/// [`DesignTree`](crate::tree::DesignTree) construction drives that pass
/// bottom-up across all levels. Calling `first_pass` twice, or
/// [`Design::update`] afterward, is a precondition violation with undefined
/// results (not checked at runtime).
///
/// ```
/// use trialtree::Design;
///
/// let design = Design::builder()
///     .iv("side", ["left", "right"])
///     .iv("difficulty", ["easy", "hard"])
///     .build()?;
/// assert_eq!(design.iv_names(), ["side", "difficulty"]);
/// # Ok::<(), trialtree::Error>(())
/// ```
#[derive(Debug)]
pub struct Design {
    iv_names: Vec<String>,
    iv_values: Vec<Option<Vec<Value>>>,
    design_matrix: Option<Vec<Vec<f64>>>,
    extra_data: Condition,
    ordering: Box<dyn Ordering>,
}

impl Design {
    /// Start building a design.
    #[must_use]
    pub fn builder() -> DesignBuilder {
        DesignBuilder::new()
    }

    /// A design with no IVs and exactly one (empty) condition.
    ///
    /// This is what `_base` levels hold, and the standard workaround for a
    /// non-atomic ordering at the top of a tree: insert a level with an
    /// empty design above it.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            iv_names: Vec::new(),
            iv_values: Vec::new(),
            design_matrix: None,
            extra_data: Condition::new(),
            ordering: Box::new(Sequential::default()),
        }
    }

    /// Declared IV names, in declaration order.
    #[must_use]
    pub fn iv_names(&self) -> &[String] {
        &self.iv_names
    }

    /// Declared IV value lists; `None` marks a continuous IV whose values
    /// come from the design matrix.
    #[must_use]
    pub fn iv_values(&self) -> &[Option<Vec<Value>>] {
        &self.iv_values
    }

    /// Extra data merged into every condition this design produces.
    #[must_use]
    pub fn extra_data(&self) -> &Condition {
        &self.extra_data
    }

    /// True if this design declares the reserved `design` IV, making the
    /// tree structure diverge below its level.
    #[must_use]
    pub fn is_heterogeneous(&self) -> bool {
        self.iv_names.iter().any(|name| name == HETEROGENEOUS_IV)
    }

    /// Branch names declared by the `design` IV; empty for homogeneous
    /// designs.
    #[must_use]
    pub fn branches(&self) -> Vec<String> {
        self.iv_names
            .iter()
            .position(|name| name == HETEROGENEOUS_IV)
            .and_then(|i| self.iv_values[i].as_ref())
            .map(|values| values.iter().map(branch_key).collect())
            .unwrap_or_default()
    }

    /// Append IV declarations.
    ///
    /// Used by the design tree to install synthetic IVs collected from the
    /// level below. Has no effect on conditions once `first_pass` has run.
    pub fn update(&mut self, names: Vec<String>, values: Vec<Vec<Value>>) {
        self.iv_names.extend(names);
        self.iv_values.extend(values.into_iter().map(Some));
    }

    /// One-time initialization: build the full condition set (factorial
    /// cross or design-matrix decode) and hand it to the ordering.
    ///
    /// Returns the synthetic IV to install one level up when the ordering is
    /// non-atomic.
    ///
    /// # Errors
    ///
    /// Design-matrix shape or code mismatches, and ordering precondition
    /// violations, are configuration errors.
    pub fn first_pass(&mut self) -> Result<Option<SyntheticIv>> {
        let conditions = match &self.design_matrix {
            Some(matrix) => decode_matrix(
                matrix,
                &self.iv_names,
                &self.iv_values,
                &self.extra_data,
            )?,
            None => {
                let values = self.concrete_values()?;
                full_cross(&self.iv_names, &values).collect()
            }
        };
        self.ordering.first_pass(conditions)
    }

    /// Produce this level's ordered condition list for one parent section.
    ///
    /// Delegates to the ordering (which may read ancestor values from
    /// `context`), then merges extra data into every condition, extra data
    /// winning over same-named IVs.
    ///
    /// # Errors
    ///
    /// Propagates ordering errors (e.g. a missing synthetic-IV value in
    /// `context`).
    pub fn get_order(&self, context: &Context<'_>) -> Result<Vec<Condition>> {
        let mut conditions = self.ordering.get_order(context)?;
        for condition in &mut conditions {
            for (key, value) in &self.extra_data {
                condition.insert(key.clone(), value.clone());
            }
        }
        Ok(conditions)
    }

    fn concrete_values(&self) -> Result<Vec<Vec<Value>>> {
        self.iv_names
            .iter()
            .zip(&self.iv_values)
            .map(|(name, values)| {
                values.clone().ok_or_else(|| Error::ContinuousIv { iv: name.clone() })
            })
            .collect()
    }
}

/// Full factorial cross of the given IVs.
///
/// Yields one condition per combination of IV values, in standard product
/// order: earlier-declared IVs vary slower than later ones. With no IVs at
/// all, yields exactly one empty condition.
pub fn full_cross<'a>(
    iv_names: &'a [String],
    iv_values: &'a [Vec<Value>],
) -> impl Iterator<Item = Condition> + 'a {
    let total: usize = iv_values.iter().map(Vec::len).product();
    (0..total).map(move |index| {
        let mut remainder = index;
        let mut digits = vec![0usize; iv_values.len()];
        for position in (0..iv_values.len()).rev() {
            let base = iv_values[position].len();
            digits[position] = remainder % base;
            remainder /= base;
        }
        iv_names
            .iter()
            .zip(iv_values)
            .zip(digits)
            .map(|((name, values), digit)| (name.clone(), values[digit].clone()))
            .collect()
    })
}

/// Decode a design matrix into conditions, one per row, preserving row
/// order.
///
/// Each column's distinct codes are matched against its IV: a declared value
/// list of the same length maps codes to values by ascending code order; an
/// IV without declared values takes the raw cell as its value. Conditions
/// start from a copy of the extra data and are overwritten per column.
fn decode_matrix(
    matrix: &[Vec<f64>],
    iv_names: &[String],
    iv_values: &[Option<Vec<Value>>],
    extra_data: &Condition,
) -> Result<Vec<Condition>> {
    for row in matrix {
        if row.len() != iv_names.len() {
            return Err(Error::MatrixColumns {
                ivs: iv_names.len(),
                columns: row.len(),
            });
        }
    }

    let mut codes_per_column: Vec<Vec<f64>> = Vec::with_capacity(iv_names.len());
    for column in 0..iv_names.len() {
        let mut codes: Vec<f64> = matrix.iter().map(|row| row[column]).collect();
        codes.sort_by(f64::total_cmp);
        codes.dedup_by(|a, b| a.total_cmp(b).is_eq());
        codes_per_column.push(codes);
    }

    for ((name, declared), codes) in iv_names.iter().zip(iv_values).zip(&codes_per_column) {
        if let Some(declared) = declared {
            if !declared.is_empty() && declared.len() != codes.len() {
                return Err(Error::MatrixCodes {
                    iv: name.clone(),
                    declared: declared.len(),
                    distinct: codes.len(),
                });
            }
        }
    }

    let mut conditions = Vec::with_capacity(matrix.len());
    for row in matrix {
        let mut condition = extra_data.clone();
        for (column, (name, declared)) in iv_names.iter().zip(iv_values).enumerate() {
            let cell = row[column];
            let value = match declared {
                Some(values) if !values.is_empty() => {
                    let position = codes_per_column[column]
                        .binary_search_by(|code| code.total_cmp(&cell))
                        .map_err(|_| {
                            Error::Config(format!(
                                "design matrix cell {cell} not among column codes for IV `{name}`"
                            ))
                        })?;
                    values[position].clone()
                }
                _ => Value::from(cell),
            };
            condition.insert(name.clone(), value);
        }
        conditions.push(condition);
    }

    Ok(conditions)
}

pub(crate) fn branch_key(value: &Value) -> String {
    match value {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}

/// Builder for [`Design`].
#[derive(Debug)]
pub struct DesignBuilder {
    ivs: Vec<(String, Option<Vec<Value>>)>,
    design_matrix: Option<Vec<Vec<f64>>>,
    ordering: Option<Box<dyn Ordering>>,
    extra_data: Condition,
}

impl Default for DesignBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ivs: Vec::new(),
            design_matrix: None,
            ordering: None,
            extra_data: Condition::new(),
        }
    }

    /// Declare an IV with its possible values.
    #[must_use]
    pub fn iv<N, I, V>(mut self, name: N, values: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.ivs.push((
            name.into(),
            Some(values.into_iter().map(Into::into).collect()),
        ));
        self
    }

    /// Declare a continuous IV: no value list, concrete values supplied by
    /// the design matrix.
    #[must_use]
    pub fn continuous_iv(mut self, name: impl Into<String>) -> Self {
        self.ivs.push((name.into(), None));
        self
    }

    /// Declare IVs in bulk, as (name, optional values) pairs.
    #[must_use]
    pub fn ivs(mut self, ivs: Vec<(String, Option<Vec<Value>>)>) -> Self {
        self.ivs.extend(ivs);
        self
    }

    /// Supply a design matrix: rows are conditions, columns are IVs in
    /// declaration order.
    #[must_use]
    pub fn design_matrix(mut self, matrix: Vec<Vec<f64>>) -> Self {
        self.design_matrix = Some(matrix);
        self
    }

    /// Choose the ordering policy.
    #[must_use]
    pub fn ordering<O: Ordering + 'static>(mut self, ordering: O) -> Self {
        self.ordering = Some(Box::new(ordering));
        self
    }

    /// Choose an already-boxed ordering policy (e.g. from an
    /// [`OrderingRegistry`](crate::ordering::OrderingRegistry)).
    #[must_use]
    pub fn boxed_ordering(mut self, ordering: Box<dyn Ordering>) -> Self {
        self.ordering = Some(ordering);
        self
    }

    /// Add one extra-data entry, merged into every condition.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_data.insert(key.into(), value.into());
        self
    }

    /// Merge extra-data entries in bulk.
    #[must_use]
    pub fn extra_data(mut self, extra: Condition) -> Self {
        self.extra_data.extend(extra);
        self
    }

    /// Build the design.
    ///
    /// Without an explicit ordering, a design with a matrix keeps the
    /// matrix's row order ([`Sequential`]) and a design without one
    /// randomizes ([`Shuffle`]).
    ///
    /// # Errors
    ///
    /// [`Error::ContinuousIv`] if an IV has no values and no design matrix
    /// was supplied.
    pub fn build(self) -> Result<Design> {
        if self.design_matrix.is_none() {
            if let Some((name, _)) = self.ivs.iter().find(|(_, values)| values.is_none()) {
                return Err(Error::ContinuousIv { iv: name.clone() });
            }
        }

        let ordering = self.ordering.unwrap_or_else(|| {
            if self.design_matrix.is_some() {
                Box::new(Sequential::default())
            } else {
                Box::new(Shuffle::default())
            }
        });

        let (iv_names, iv_values) = self.ivs.into_iter().unzip();
        Ok(Design {
            iv_names,
            iv_values,
            design_matrix: self.design_matrix,
            extra_data: self.extra_data,
            ordering,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_cross_order() {
        let names = vec!["a".to_string(), "b".to_string()];
        let values = vec![vec![json!(1), json!(2)], vec![json!(10), json!(20)]];

        let conditions: Vec<Condition> = full_cross(&names, &values).collect();
        let pairs: Vec<(i64, i64)> = conditions
            .iter()
            .map(|c| (c["a"].as_i64().unwrap(), c["b"].as_i64().unwrap()))
            .collect();
        assert_eq!(pairs, [(1, 10), (1, 20), (2, 10), (2, 20)]);
    }

    #[test]
    fn test_full_cross_with_no_ivs_yields_one_empty_condition() {
        let conditions: Vec<Condition> = full_cross(&[], &[]).collect();
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].is_empty());
    }

    #[test]
    fn test_continuous_iv_requires_matrix() {
        let result = Design::builder()
            .iv("size", [15, 30])
            .continuous_iv("speed")
            .build();
        assert!(matches!(result, Err(Error::ContinuousIv { .. })));
    }

    #[test]
    fn test_matrix_preserves_row_order() {
        let mut design = Design::builder()
            .iv("side", ["left", "right"])
            .iv("difficulty", ["easy", "hard"])
            .design_matrix(vec![
                vec![1.0, 1.0],
                vec![0.0, 1.0],
                vec![1.0, 0.0],
                vec![0.0, 0.0],
            ])
            .build()
            .unwrap();
        design.first_pass().unwrap();

        let order = design.get_order(&Context::new()).unwrap();
        let sides: Vec<&str> = order.iter().map(|c| c["side"].as_str().unwrap()).collect();
        assert_eq!(sides, ["right", "left", "right", "left"]);
        let difficulties: Vec<&str> = order
            .iter()
            .map(|c| c["difficulty"].as_str().unwrap())
            .collect();
        assert_eq!(difficulties, ["hard", "hard", "easy", "easy"]);
    }

    #[test]
    fn test_matrix_code_count_mismatch() {
        let mut design = Design::builder()
            .iv("level", [1, 2])
            .design_matrix(vec![vec![0.0], vec![1.0], vec![2.0]])
            .build()
            .unwrap();
        assert!(matches!(
            design.first_pass(),
            Err(Error::MatrixCodes { .. })
        ));
    }

    #[test]
    fn test_matrix_column_count_mismatch() {
        let mut design = Design::builder()
            .iv("level", [1, 2])
            .design_matrix(vec![vec![0.0, 1.0], vec![1.0, 0.0]])
            .build()
            .unwrap();
        assert!(matches!(
            design.first_pass(),
            Err(Error::MatrixColumns { ivs: 1, columns: 2 })
        ));
    }

    #[test]
    fn test_matrix_raw_values_for_continuous_iv() {
        let mut design = Design::builder()
            .continuous_iv("speed")
            .design_matrix(vec![vec![1.5], vec![0.25]])
            .build()
            .unwrap();
        design.first_pass().unwrap();

        let order = design.get_order(&Context::new()).unwrap();
        let speeds: Vec<f64> = order.iter().map(|c| c["speed"].as_f64().unwrap()).collect();
        assert_eq!(speeds, [1.5, 0.25]);
    }

    #[test]
    fn test_extra_data_wins_in_get_order() {
        let mut design = Design::builder()
            .iv("block", [1, 2])
            .extra("block", "fixed")
            .extra("practice", false)
            .build()
            .unwrap();
        design.first_pass().unwrap();

        let order = design.get_order(&Context::new()).unwrap();
        assert_eq!(order.len(), 2);
        for condition in order {
            assert_eq!(condition["block"], json!("fixed"));
            assert_eq!(condition["practice"], json!(false));
        }
    }

    #[test]
    fn test_update_adds_ivs_to_cross() {
        let mut design = Design::builder()
            .iv("a", [1, 2])
            .ordering(Sequential::default())
            .build()
            .unwrap();
        design.update(
            vec!["b".to_string()],
            vec![vec![json!(10), json!(20), json!(30)]],
        );
        design.first_pass().unwrap();

        let order = design.get_order(&Context::new()).unwrap();
        assert_eq!(order.len(), 6);
        assert!(order.iter().all(|c| c.contains_key("b")));
    }

    #[test]
    fn test_heterogeneous_branches() {
        let design = Design::builder()
            .iv("design", ["practice", "test"])
            .build()
            .unwrap();
        assert!(design.is_heterogeneous());
        assert_eq!(design.branches(), ["practice", "test"]);

        let plain = Design::builder().iv("a", [1]).build().unwrap();
        assert!(!plain.is_heterogeneous());
        assert!(plain.branches().is_empty());
    }
}
