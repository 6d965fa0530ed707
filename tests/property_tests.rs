//! Property-based tests for trialtree
//!
//! Mathematical invariants of the factorial cross, orderings, latin squares,
//! and section numbering, checked over randomized inputs.

use proptest::prelude::*;
use serde_json::{json, Value};
use trialtree::ordering::latin::{balanced_latin_square, latin_square};
use trialtree::{full_cross, Condition, Context, Design, Experiment, Ordering};
use trialtree::{DesignTree, Level, Sequential, Shuffle};

// ============================================================================
// Strategies
// ============================================================================

/// Generate IV declarations: 1-3 IVs with 1-4 values each.
fn arb_ivs() -> impl Strategy<Value = Vec<(String, Vec<Value>)>> {
    proptest::collection::vec(1usize..=4, 1..=3).prop_map(|sizes| {
        sizes
            .into_iter()
            .enumerate()
            .map(|(i, size)| {
                let name = format!("iv{i}");
                let values = (0..size).map(|v| json!(v)).collect();
                (name, values)
            })
            .collect()
    })
}

fn single_iv_conditions(count: usize) -> Vec<Condition> {
    (0..count)
        .map(|v| {
            let mut condition = Condition::new();
            condition.insert("x".to_string(), json!(v));
            condition
        })
        .collect()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The factorial cross yields exactly the product of the value counts,
    /// with no duplicate conditions.
    #[test]
    fn prop_full_cross_cardinality(ivs in arb_ivs()) {
        let names: Vec<String> = ivs.iter().map(|(n, _)| n.clone()).collect();
        let values: Vec<Vec<Value>> = ivs.iter().map(|(_, v)| v.clone()).collect();

        let conditions: Vec<Condition> = full_cross(&names, &values).collect();
        let expected: usize = values.iter().map(Vec::len).product();
        prop_assert_eq!(conditions.len(), expected);

        for (i, a) in conditions.iter().enumerate() {
            for b in conditions.iter().skip(i + 1) {
                prop_assert_ne!(a, b);
            }
        }
    }

    /// Earlier-declared IVs vary slower; the last IV counts up within each
    /// run of constant earlier values.
    #[test]
    fn prop_full_cross_last_iv_varies_fastest(count in 2usize..=5) {
        let names = vec!["a".to_string(), "b".to_string()];
        let values = vec![
            (0..3).map(|v| json!(v)).collect::<Vec<Value>>(),
            (0..count).map(|v| json!(v)).collect::<Vec<Value>>(),
        ];
        let conditions: Vec<Condition> = full_cross(&names, &values).collect();

        for chunk in conditions.chunks(count) {
            let first = &chunk[0]["a"];
            prop_assert!(chunk.iter().all(|c| &c["a"] == first));
            for (i, condition) in chunk.iter().enumerate() {
                prop_assert_eq!(&condition["b"], &json!(i));
            }
        }
    }

    /// Shuffling preserves the condition multiset.
    #[test]
    fn prop_shuffle_preserves_multiset(count in 1usize..=8, number in 1usize..=3) {
        let mut ordering = Shuffle::new(number, false);
        ordering.first_pass(single_iv_conditions(count)).unwrap();

        let order = ordering.get_order(&Context::new()).unwrap();
        prop_assert_eq!(order.len(), count * number);

        let mut seen: Vec<u64> = order
            .iter()
            .map(|c| c["x"].as_u64().expect("small integer"))
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<u64> = (0..count as u64).collect::<Vec<_>>().repeat(number);
        expected.sort_unstable();
        prop_assert_eq!(seen, expected);
    }

    /// Every latin square construction variant yields a valid square.
    #[test]
    fn prop_latin_square_valid(order in 1usize..=5, reduced: bool) {
        let mut rng = rand::thread_rng();
        let square = latin_square(order, reduced, false, !reduced, &mut rng);

        prop_assert_eq!(square.len(), order);
        for row in &square {
            let mut sorted = row.clone();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..order).collect::<Vec<_>>());
        }
        for column in 0..order {
            let mut sorted: Vec<usize> = square.iter().map(|row| row[column]).collect();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..order).collect::<Vec<_>>());
        }
    }

    /// Balanced latin squares exist exactly for even orders.
    #[test]
    fn prop_balanced_latin_square_parity(order in 1usize..=8) {
        let mut rng = rand::thread_rng();
        let result = balanced_latin_square(order, &mut rng);
        prop_assert_eq!(result.is_ok(), order % 2 == 0);
    }

    /// Children are numbered 1..=n in order, and renumbering holds after a
    /// front insertion.
    #[test]
    fn prop_numbering_is_contiguous(count in 1usize..=6) {
        let values: Vec<Value> = (0..count).map(|v| json!(v)).collect();
        let design = Design::builder()
            .iv("kind", values)
            .ordering(Sequential::default())
            .build()
            .unwrap();
        let tree = DesignTree::new(vec![Level::single("block", design)]).unwrap();
        let mut experiment = Experiment::from_design_tree(tree).unwrap();

        let numbers: Vec<u64> = experiment
            .generate_data()
            .map(|r| r["block"].as_u64().expect("numbered"))
            .collect();
        prop_assert_eq!(numbers, (1..=count as u64).collect::<Vec<_>>());

        let mut retry = Condition::new();
        retry.insert("kind".to_string(), json!("retry"));
        experiment.append_child(experiment.root(), retry, true).unwrap();

        let renumbered: Vec<u64> = experiment
            .generate_data()
            .map(|r| r["block"].as_u64().expect("numbered"))
            .collect();
        prop_assert_eq!(renumbered, (1..=count as u64 + 1).collect::<Vec<_>>());
    }
}
