//! Krum: picks the single contributed update whose sum of squared
//! distances to its closest peers is smallest, rather than blending
//! every update together, so a small number of far-off (malicious)
//! updates can't drag the result toward them.

use super::aggregator::{exclude_bypass_weight, Aggregator, AggregationError, WeightedUpdate};
use crate::parameter_store::{squared_euclidean_distance, DenseParameters, ParameterStore};

pub struct Krum {
    /// Assumed upper bound on the number of Byzantine participants.
    /// Each candidate's score sums distances to its `n - f - 2`
    /// closest peers.
    pub assumed_byzantine: usize,
}

impl Krum {
    pub fn new(assumed_byzantine: usize) -> Self {
        Self { assumed_byzantine }
    }
}

impl Default for Krum {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Aggregator for Krum {
    fn name(&self) -> &'static str {
        "Krum"
    }

    fn aggregate(&self, updates: &[WeightedUpdate]) -> Result<DenseParameters, AggregationError> {
        let updates = exclude_bypass_weight(updates);
        let updates = updates.as_slice();
        let n = updates.len();
        if n == 0 {
            return Err(AggregationError::Empty);
        }
        if n == 1 {
            return Ok(updates[0].parameters.clone());
        }

        let neighbors = n.saturating_sub(self.assumed_byzantine + 2).max(1).min(n - 1);

        let mut distances = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = squared_euclidean_distance(&updates[i].parameters, &updates[j].parameters)
                    .ok_or_else(|| {
                        AggregationError::Incompatible(
                            updates[i].parameters.as_slice().len(),
                            updates[j].parameters.as_slice().len(),
                        )
                    })?;
                distances[i][j] = d;
                distances[j][i] = d;
            }
        }

        let mut best_index = 0;
        let mut best_score = f64::INFINITY;
        for i in 0..n {
            let mut row = distances[i].clone();
            row.remove(i);
            row.sort_by(|a, b| a.partial_cmp(b).expect("NaN in distance"));
            let score: f64 = row.iter().take(neighbors).sum();
            if score < best_score {
                best_score = score;
                best_index = i;
            }
        }

        Ok(updates[best_index].parameters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_id::NodeId;

    fn update(addr: &str, values: Vec<f64>) -> WeightedUpdate {
        WeightedUpdate {
            source: addr.parse::<NodeId>().unwrap(),
            parameters: DenseParameters::new(values),
            weight: 1.0,
        }
    }

    #[test]
    fn picks_the_update_closest_to_the_cluster() {
        let updates = vec![
            update("10.0.0.1:5000", vec![0.0]),
            update("10.0.0.2:5000", vec![0.1]),
            update("10.0.0.3:5000", vec![-0.1]),
            update("10.0.0.4:5000", vec![1000.0]),
        ];
        let result = Krum::new(1).aggregate(&updates).unwrap();
        assert!(result.as_slice()[0].abs() < 1.0);
    }

    #[test]
    fn single_update_is_returned_unchanged() {
        let updates = vec![update("10.0.0.1:5000", vec![5.0])];
        let result = Krum::default().aggregate(&updates).unwrap();
        assert_eq!(result.as_slice(), &[5.0]);
    }
}
