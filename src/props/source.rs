use anyhow::Result;

use super::error::PropError;
use super::leg::Leg;

/// Historical rows for a set of legs, one column per leg, aligned on game.
///
/// Only games where every leg has a value are present, so all columns share
/// one length. The game key used to build the join is not kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointSample {
    columns: Vec<Vec<f64>>,
}

impl JointSample {
    /// Build from equal-length columns. A row with a non-finite value in any
    /// column is treated as a missing game and dropped from every column.
    pub fn new(columns: Vec<Vec<f64>>) -> Result<Self, PropError> {
        let Some(first) = columns.first() else {
            return Ok(JointSample { columns });
        };
        let expected = first.len();
        if let Some(bad) = columns.iter().find(|c| c.len() != expected) {
            return Err(PropError::RaggedSample {
                expected,
                got: bad.len(),
            });
        }

        let keep: Vec<bool> = (0..expected)
            .map(|row| columns.iter().all(|c| c[row].is_finite()))
            .collect();
        if keep.iter().all(|k| *k) {
            return Ok(JointSample { columns });
        }
        let columns = columns
            .into_iter()
            .map(|c| {
                c.into_iter()
                    .zip(&keep)
                    .filter_map(|(v, k)| k.then_some(v))
                    .collect()
            })
            .collect();
        Ok(JointSample { columns })
    }

    /// A table with `width` columns and no rows.
    pub fn empty(width: usize) -> Self {
        JointSample {
            columns: vec![Vec::new(); width],
        }
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }
}

/// Storage collaborator feeding the estimators.
pub trait SampleSource: Send + Sync {
    /// One leg's history, independent of any other leg. May be empty.
    fn marginal_sample(&self, leg: &Leg) -> Result<Vec<f64>>;

    /// Inner join of the legs' histories on game. May have zero rows.
    fn joint_sample(&self, legs: &[Leg]) -> Result<JointSample>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_sample_rejects_ragged_columns() {
        let err = JointSample::new(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(err, PropError::RaggedSample { expected: 2, got: 1 });
    }

    #[test]
    fn rows_with_missing_values_are_dropped_everywhere() {
        let t = JointSample::new(vec![
            vec![1.0, f64::NAN, 3.0, 4.0],
            vec![10.0, 20.0, 30.0, f64::INFINITY],
        ])
        .unwrap();
        assert_eq!(t.rows(), 2);
        assert_eq!(t.columns(), &[vec![1.0, 3.0], vec![10.0, 30.0]]);
    }

    #[test]
    fn empty_table_has_width_but_no_rows() {
        let t = JointSample::empty(3);
        assert_eq!(t.width(), 3);
        assert_eq!(t.rows(), 0);
        assert_eq!(JointSample::default().rows(), 0);
    }
}
