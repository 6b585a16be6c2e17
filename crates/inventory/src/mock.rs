//! Mock external inventory collaborator.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use domain::ProductId;
use rand::Rng;

use crate::InventoryError;
use crate::client::{AvailabilityRequest, AvailabilityResult, InventoryGateway};

/// Default stock assumed for products without an explicit level.
const DEFAULT_STOCK: u32 = 100;

/// Stand-in for the external inventory collaborator.
///
/// Answers from a configurable stock table and injects random failures at
/// `failure_rate_percent` to exercise the circuit breaker in local runs.
pub struct MockInventoryGateway {
    stock: RwLock<HashMap<ProductId, u32>>,
    failure_rate_percent: u8,
}

impl MockInventoryGateway {
    /// Creates a gateway with the given failure rate (0-100).
    pub fn new(failure_rate_percent: u8) -> Self {
        Self {
            stock: RwLock::new(HashMap::new()),
            failure_rate_percent: failure_rate_percent.min(100),
        }
    }

    /// A gateway that never fails and has ample stock.
    pub fn always_available() -> Self {
        Self::new(0)
    }

    /// A gateway whose every call fails.
    pub fn always_failing() -> Self {
        Self::new(100)
    }

    /// Sets the stock level for a product.
    pub fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        self.stock
            .write()
            .unwrap()
            .insert(product_id.into(), quantity);
    }
}

#[async_trait]
impl InventoryGateway for MockInventoryGateway {
    async fn check_batch_availability(
        &self,
        items: &[AvailabilityRequest],
    ) -> Result<Vec<AvailabilityResult>, InventoryError> {
        if self.failure_rate_percent > 0 {
            let roll: u8 = rand::thread_rng().gen_range(0..100);
            if roll < self.failure_rate_percent {
                return Err(InventoryError::Gateway("injected collaborator failure".into()));
            }
        }

        let stock = self.stock.read().unwrap();
        Ok(items
            .iter()
            .map(|item| {
                let available_quantity = stock
                    .get(&item.product_id)
                    .copied()
                    .unwrap_or(DEFAULT_STOCK);
                AvailabilityResult {
                    product_id: item.product_id.clone(),
                    available: available_quantity >= item.quantity,
                    available_quantity,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(product_id: &str, quantity: u32) -> AvailabilityRequest {
        AvailabilityRequest {
            product_id: ProductId::new(product_id),
            quantity,
        }
    }

    #[tokio::test]
    async fn answers_in_input_order() {
        let gateway = MockInventoryGateway::always_available();
        gateway.set_stock("p-2", 0);

        let results = gateway
            .check_batch_availability(&[request("p-1", 1), request("p-2", 1), request("p-3", 1)])
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.product_id.as_str()).collect();
        assert_eq!(ids, vec!["p-1", "p-2", "p-3"]);
        assert!(results[0].available);
        assert!(!results[1].available);
    }

    #[tokio::test]
    async fn partial_stock_is_unavailable_for_larger_requests() {
        let gateway = MockInventoryGateway::always_available();
        gateway.set_stock("p-1", 1);

        let results = gateway
            .check_batch_availability(&[request("p-1", 5)])
            .await
            .unwrap();

        assert!(!results[0].available);
        assert_eq!(results[0].available_quantity, 1);
    }

    #[tokio::test]
    async fn full_failure_rate_always_fails() {
        let gateway = MockInventoryGateway::always_failing();
        let result = gateway.check_batch_availability(&[request("p-1", 1)]).await;
        assert!(matches!(result, Err(InventoryError::Gateway(_))));
    }
}
