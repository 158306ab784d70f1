//! Coordinate-wise trimmed mean: drop the top and bottom `beta`
//! fraction of values per coordinate, then average what remains.

use serde::Deserialize;

use super::aggregator::{exclude_bypass_weight, validate_equal_length, Aggregator, AggregationError, WeightedUpdate};
use crate::parameter_store::{DenseParameters, ParameterStore};

/// How a fractional trim count is rounded to a whole number of
/// excluded values per side. Defaults to `Floor`: it never trims away
/// every value when `beta` is close to 0.5 on a small federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimRounding {
    Ceil,
    Floor,
}

impl Default for TrimRounding {
    fn default() -> Self {
        TrimRounding::Floor
    }
}

pub struct TrimmedMean {
    pub beta: f64,
    pub rounding: TrimRounding,
}

impl TrimmedMean {
    pub fn new(beta: f64) -> Self {
        Self {
            beta,
            rounding: TrimRounding::default(),
        }
    }

    pub fn with_rounding(beta: f64, rounding: TrimRounding) -> Self {
        Self { beta, rounding }
    }

    fn trim_count(&self, n: usize) -> usize {
        let raw = self.beta * n as f64;
        let trimmed = match self.rounding {
            TrimRounding::Ceil => raw.ceil() as usize,
            TrimRounding::Floor => raw.floor() as usize,
        };
        // Never trim away the whole column.
        trimmed.min((n.saturating_sub(1)) / 2)
    }
}

impl Aggregator for TrimmedMean {
    fn name(&self) -> &'static str {
        "TrimmedMean"
    }

    fn aggregate(&self, updates: &[WeightedUpdate]) -> Result<DenseParameters, AggregationError> {
        let updates = exclude_bypass_weight(updates);
        let updates = updates.as_slice();
        let len = validate_equal_length(updates)?;
        let n = updates.len();
        let trim = self.trim_count(n);
        let mut result = Vec::with_capacity(len);

        for coordinate in 0..len {
            let mut values: Vec<f64> = updates
                .iter()
                .map(|u| u.parameters.as_slice()[coordinate])
                .collect();
            values.sort_by(|a, b| a.partial_cmp(b).expect("NaN in parameter vector"));
            let kept = &values[trim..n - trim];
            let mean = kept.iter().sum::<f64>() / kept.len() as f64;
            result.push(mean);
        }

        Ok(DenseParameters::new(result))
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
    fn trims_the_extreme_values_before_averaging() {
        let updates = vec![
            update("10.0.0.1:5000", vec![1.0]),
            update("10.0.0.2:5000", vec![2.0]),
            update("10.0.0.3:5000", vec![3.0]),
            update("10.0.0.4:5000", vec![4.0]),
            update("10.0.0.5:5000", vec![1000.0]),
        ];
        // beta=0.2 on n=5 trims floor(1) = 1 from each side, leaving [2,3,4].
        let result = TrimmedMean::new(0.2).aggregate(&updates).unwrap();
        assert_eq!(result.as_slice(), &[3.0]);
    }

    #[test]
    fn never_trims_away_every_value() {
        let updates = vec![
            update("10.0.0.1:5000", vec![1.0]),
            update("10.0.0.2:5000", vec![2.0]),
        ];
        let result = TrimmedMean::with_rounding(0.49, TrimRounding::Ceil).aggregate(&updates);
        assert!(result.is_ok());
    }
}
