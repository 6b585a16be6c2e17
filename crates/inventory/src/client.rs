//! Inventory client trait and realizations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::ProductId;
use serde::{Deserialize, Serialize};

use crate::InventoryError;
use crate::breaker::CircuitBreaker;

/// One line of a batch availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// The collaborator's answer for one requested line, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResult {
    pub product_id: ProductId,
    pub available: bool,
    pub available_quantity: u32,
}

/// RPC shape of the external inventory collaborator.
#[async_trait]
pub trait InventoryGateway: Send + Sync {
    /// Checks availability for a batch of items, preserving input order.
    async fn check_batch_availability(
        &self,
        items: &[AvailabilityRequest],
    ) -> Result<Vec<AvailabilityResult>, InventoryError>;
}

/// Component seam the order service depends on.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Checks availability for a batch of items, preserving input order.
    /// Any collaborator fault (including an open circuit) surfaces as
    /// [`InventoryError::Unavailable`]; no retry happens at this level.
    async fn check_batch_availability(
        &self,
        items: &[AvailabilityRequest],
    ) -> Result<Vec<AvailabilityResult>, InventoryError>;
}

/// Production client: the gateway called through a circuit breaker.
pub struct GuardedInventoryClient<G: InventoryGateway> {
    gateway: Arc<G>,
    breaker: Arc<CircuitBreaker>,
}

impl<G: InventoryGateway> GuardedInventoryClient<G> {
    /// Creates a client guarding `gateway` with `breaker`.
    pub fn new(gateway: Arc<G>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { gateway, breaker }
    }

    /// Returns the breaker guarding this client, for observability.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<G: InventoryGateway> InventoryClient for GuardedInventoryClient<G> {
    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    async fn check_batch_availability(
        &self,
        items: &[AvailabilityRequest],
    ) -> Result<Vec<AvailabilityResult>, InventoryError> {
        self.breaker
            .execute(|| self.gateway.check_batch_availability(items))
            .await
            .map_err(|e| InventoryError::Unavailable(e.to_string()))
    }
}

#[derive(Debug, Default)]
struct InMemoryClientState {
    stock: HashMap<ProductId, u32>,
    fail_on_check: bool,
}

/// In-memory inventory client for testing the order service.
///
/// Unknown products are treated as amply stocked; use `set_stock` to
/// constrain one. `set_fail_on_check` simulates an unreachable collaborator.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryClient {
    state: Arc<RwLock<InMemoryClientState>>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryInventoryClient {
    /// Creates a client where everything is in stock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the available quantity for a product.
    pub fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        self.state
            .write()
            .unwrap()
            .stock
            .insert(product_id.into(), quantity);
    }

    /// Configures the client to fail every check call.
    pub fn set_fail_on_check(&self, fail: bool) {
        self.state.write().unwrap().fail_on_check = fail;
    }

    /// Returns how many check calls have been made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventoryClient for InMemoryInventoryClient {
    async fn check_batch_availability(
        &self,
        items: &[AvailabilityRequest],
    ) -> Result<Vec<AvailabilityResult>, InventoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let state = self.state.read().unwrap();
        if state.fail_on_check {
            return Err(InventoryError::Unavailable("injected failure".into()));
        }

        Ok(items
            .iter()
            .map(|item| {
                let available_quantity = state
                    .stock
                    .get(&item.product_id)
                    .copied()
                    .unwrap_or(u32::MAX);
                AvailabilityResult {
                    product_id: item.product_id.clone(),
                    available: available_quantity >= item.quantity,
                    available_quantity,
                }
            })
            .collect())
    }
}
