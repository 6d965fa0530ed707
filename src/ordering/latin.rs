//! Latin square construction
//!
//! A latin square of order `n` is an `n` x `n` grid in which every row and
//! every column contains each of the symbols `0..n` exactly once. Rows of a
//! square give partially counterbalanced condition orders; the balanced
//! variant additionally equalizes first-order carry-over effects.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};

/// A square as rows of symbol indices.
pub type Square = Vec<Vec<usize>>;

/// Construct a latin square of the given order by rejection sampling.
///
/// With `uniform` set, construction restarts from scratch whenever a partial
/// square stops being extendable, which samples uniformly from all latin
/// squares of that order but becomes slow above order 5. Without `uniform`,
/// each row is re-drawn until it fits, which is fast up to about order 10 but
/// biased. `reduced` pins the first row (and first column) to `0..order`;
/// `shuffle` permutes rows, columns, and symbols afterwards, which only adds
/// variety in the non-uniform case.
///
/// # Panics
///
/// Panics if `order` is zero.
#[must_use]
pub fn latin_square<R: Rng + ?Sized>(
    order: usize,
    reduced: bool,
    uniform: bool,
    shuffle: bool,
    rng: &mut R,
) -> Square {
    assert!(order > 0, "latin square order must be positive");

    let mut square: Square = Vec::new();
    while !is_latin_rect(&square) {
        square.clear();
        let start = if reduced {
            square.push((0..order).collect());
            1
        } else {
            0
        };
        for row in start..order {
            square.push(new_row(order, reduced.then_some(row), rng));
            if uniform {
                if !is_latin_rect(&square) {
                    break;
                }
            } else {
                let last = square.len() - 1;
                while !is_latin_rect(&square) {
                    square[last] = new_row(order, reduced.then_some(row), rng);
                }
            }
        }
    }

    if shuffle {
        square = shuffle_square(square, true, rng);
    }
    square
}

/// Construct a row-balanced latin square.
///
/// Every back-to-back pair of symbols occurs equally often across rows, on
/// top of the usual latin constraints. Built from the stereotypical
/// column-start sequence `0, 1, n-1, 2, n-2, ...` and then shuffled in rows
/// and symbols (column shuffling would break the balance).
///
/// # Errors
///
/// Returns a configuration error for odd orders; balanced squares only exist
/// for even ones.
pub fn balanced_latin_square<R: Rng + ?Sized>(order: usize, rng: &mut R) -> Result<Square> {
    if order == 0 || order % 2 != 0 {
        return Err(Error::Config(format!(
            "cannot build a balanced latin square of odd order {order}"
        )));
    }

    let mut column_starts = vec![0, 1];
    let ascending = 2..order;
    let descending = (2..order).rev();
    for (first, last) in ascending.zip(descending) {
        column_starts.push(last);
        column_starts.push(first);
        if column_starts.len() == order {
            break;
        }
    }

    let square: Square = (0..order)
        .map(|row| {
            column_starts
                .iter()
                .map(|start| (start + row) % order)
                .collect()
        })
        .collect();

    Ok(shuffle_square(square, false, rng))
}

/// True if every row and every column holds pairwise-distinct symbols.
/// An empty grid does not count.
pub(crate) fn is_latin_rect(square: &[Vec<usize>]) -> bool {
    if square.is_empty() {
        return false;
    }
    let width = square[0].len();
    let rows_ok = square.iter().all(|row| all_distinct(row.iter().copied()));
    let columns_ok = (0..width).all(|column| {
        all_distinct(square.iter().map(|row| row[column]))
    });
    rows_ok && columns_ok
}

fn all_distinct(values: impl Iterator<Item = usize>) -> bool {
    let mut seen: Vec<usize> = values.collect();
    let len = seen.len();
    seen.sort_unstable();
    seen.dedup();
    seen.len() == len
}

/// Draw one random row. With `reduced_row` set, the row's first element is
/// pinned and the remainder shuffled.
fn new_row<R: Rng + ?Sized>(order: usize, reduced_row: Option<usize>, rng: &mut R) -> Vec<usize> {
    match reduced_row {
        Some(first) => {
            let mut rest: Vec<usize> = (0..order).filter(|&n| n != first).collect();
            rest.shuffle(rng);
            let mut row = vec![first];
            row.extend(rest);
            row
        }
        None => {
            let mut row: Vec<usize> = (0..order).collect();
            row.shuffle(rng);
            row
        }
    }
}

/// Shuffle rows, optionally columns, and relabel symbols; latin-ness is
/// invariant under all three.
fn shuffle_square<R: Rng + ?Sized>(
    mut square: Square,
    shuffle_columns: bool,
    rng: &mut R,
) -> Square {
    let order = square.len();

    square.shuffle(rng);

    if shuffle_columns {
        let mut columns: Vec<usize> = (0..order).collect();
        columns.shuffle(rng);
        square = square
            .iter()
            .map(|row| columns.iter().map(|&c| row[c]).collect())
            .collect();
    }

    let mut relabel: Vec<usize> = (0..order).collect();
    relabel.shuffle(rng);
    square = square
        .into_iter()
        .map(|row| row.into_iter().map(|symbol| relabel[symbol]).collect())
        .collect();

    debug_assert!(is_latin_rect(&square));
    square
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_latin_square_is_valid() {
        let mut rng = StdRng::seed_from_u64(7);
        for order in 1..=5 {
            let square = latin_square(order, false, false, true, &mut rng);
            assert_eq!(square.len(), order);
            assert!(is_latin_rect(&square));
        }
    }

    #[test]
    fn test_reduced_square_pins_first_row_and_column() {
        let mut rng = StdRng::seed_from_u64(11);
        let square = latin_square(4, true, false, false, &mut rng);
        assert_eq!(square[0], vec![0, 1, 2, 3]);
        let first_column: Vec<usize> = square.iter().map(|row| row[0]).collect();
        assert_eq!(first_column, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_balanced_square_is_valid_and_balanced() {
        let mut rng = StdRng::seed_from_u64(23);
        let order = 6;
        let square = balanced_latin_square(order, &mut rng).unwrap();
        assert!(is_latin_rect(&square));

        // Every ordered back-to-back pair occurs exactly once across rows.
        let mut pair_counts = vec![vec![0usize; order]; order];
        for row in &square {
            for pair in row.windows(2) {
                pair_counts[pair[0]][pair[1]] += 1;
            }
        }
        for (a, row) in pair_counts.iter().enumerate() {
            for (b, &count) in row.iter().enumerate() {
                if a != b {
                    assert_eq!(count, 1, "pair ({a}, {b}) occurred {count} times");
                }
            }
        }
    }

    #[test]
    fn test_balanced_square_rejects_odd_order() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(balanced_latin_square(5, &mut rng).is_err());
    }
}
