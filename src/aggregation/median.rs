//! Coordinate-wise median aggregation, robust to a minority of
//! arbitrarily corrupted updates per coordinate.

use super::aggregator::{exclude_bypass_weight, validate_equal_length, Aggregator, AggregationError, WeightedUpdate};
use crate::parameter_store::{DenseParameters, ParameterStore};

pub struct Median;

impl Aggregator for Median {
    fn name(&self) -> &'static str {
        "Median"
    }

    fn aggregate(&self, updates: &[WeightedUpdate]) -> Result<DenseParameters, AggregationError> {
        let updates = exclude_bypass_weight(updates);
        let updates = updates.as_slice();
        let len = validate_equal_length(updates)?;
        let mut result = Vec::with_capacity(len);

        for coordinate in 0..len {
            let mut values: Vec<f64> = updates
                .iter()
                .map(|u| u.parameters.as_slice()[coordinate])
                .collect();
            values.sort_by(|a, b| a.partial_cmp(b).expect("NaN in parameter vector"));
            result.push(median_of_sorted(&values));
        }

        Ok(DenseParameters::new(result))
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
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
    fn odd_count_picks_middle_value() {
        let updates = vec![
            update("10.0.0.1:5000", vec![1.0]),
            update("10.0.0.2:5000", vec![100.0]),
            update("10.0.0.3:5000", vec![2.0]),
        ];
        let result = Median.aggregate(&updates).unwrap();
        assert_eq!(result.as_slice(), &[2.0]);
    }

    #[test]
    fn even_count_averages_the_two_middle_values() {
        let updates = vec![
            update("10.0.0.1:5000", vec![1.0]),
            update("10.0.0.2:5000", vec![3.0]),
        ];
        let result = Median.aggregate(&updates).unwrap();
        assert_eq!(result.as_slice(), &[2.0]);
    }

    #[test]
    fn an_outlier_does_not_move_the_median() {
        let updates = vec![
            update("10.0.0.1:5000", vec![1.0]),
            update("10.0.0.2:5000", vec![2.0]),
            update("10.0.0.3:5000", vec![3.0]),
            update("10.0.0.4:5000", vec![9999.0]),
            update("10.0.0.5:5000", vec![4.0]),
        ];
        let result = Median.aggregate(&updates).unwrap();
        assert_eq!(result.as_slice(), &[3.0]);
    }
}
