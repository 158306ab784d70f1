//! Weighted federated averaging: each coordinate is the weight-
//! normalized mean across contributed updates.

use super::aggregator::{exclude_bypass_weight, validate_equal_length, Aggregator, AggregationError, WeightedUpdate};
use crate::parameter_store::{DenseParameters, ParameterStore};

pub struct FedAvg;

impl Aggregator for FedAvg {
    fn name(&self) -> &'static str {
        "FedAvg"
    }

    fn aggregate(&self, updates: &[WeightedUpdate]) -> Result<DenseParameters, AggregationError> {
        let updates = exclude_bypass_weight(updates);
        let updates = updates.as_slice();
        let len = validate_equal_length(updates)?;
        let total_weight: f64 = updates.iter().map(|u| u.weight).sum();
        if total_weight == 0.0 {
            return Err(AggregationError::Empty);
        }

        let mut accum = vec![0.0; len];
        for update in updates {
            let slice = update.parameters.as_slice();
            for (acc, value) in accum.iter_mut().zip(slice) {
                *acc += value * update.weight;
            }
        }
        for value in accum.iter_mut() {
            *value /= total_weight;
        }

        Ok(DenseParameters::new(accum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_id::NodeId;

    fn update(addr: &str, values: Vec<f64>, weight: f64) -> WeightedUpdate {
        WeightedUpdate {
            source: addr.parse::<NodeId>().unwrap(),
            parameters: DenseParameters::new(values),
            weight,
        }
    }

    #[test]
    fn equal_weights_average_coordinatewise() {
        let updates = vec![
            update("10.0.0.1:5000", vec![1.0, 2.0], 1.0),
            update("10.0.0.2:5000", vec![3.0, 4.0], 1.0),
        ];
        let result = FedAvg.aggregate(&updates).unwrap();
        assert_eq!(result.as_slice(), &[2.0, 3.0]);
    }

    #[test]
    fn weight_skews_the_mean() {
        let updates = vec![
            update("10.0.0.1:5000", vec![0.0], 1.0),
            update("10.0.0.2:5000", vec![10.0], 3.0),
        ];
        let result = FedAvg.aggregate(&updates).unwrap();
        assert_eq!(result.as_slice(), &[7.5]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let updates = vec![
            update("10.0.0.1:5000", vec![1.0], 1.0),
            update("10.0.0.2:5000", vec![1.0, 2.0], 1.0),
        ];
        assert!(matches!(
            FedAvg.aggregate(&updates),
            Err(AggregationError::Incompatible(_, _))
        ));
    }

    #[test]
    fn a_bypass_weighted_update_never_enters_the_mean() {
        use crate::training::BYPASS_MODEL_WEIGHT;

        let updates = vec![
            update("10.0.0.1:5000", vec![1.0], 1.0),
            update("10.0.0.2:5000", vec![3.0], 1.0),
            update("10.0.0.3:5000", vec![9999.0], BYPASS_MODEL_WEIGHT),
        ];
        let result = FedAvg.aggregate(&updates).unwrap();
        assert_eq!(result.as_slice(), &[2.0]);
    }
}
