//! Inventory availability checks behind a circuit breaker.
//!
//! The order service depends on the [`InventoryClient`] trait; the
//! production realization wraps the external collaborator (an
//! [`InventoryGateway`]) in a [`CircuitBreaker`] so a failing collaborator
//! short-circuits instead of stalling order acceptance.

pub mod breaker;
pub mod client;
pub mod mock;

use thiserror::Error;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use client::{
    AvailabilityRequest, AvailabilityResult, GuardedInventoryClient, InMemoryInventoryClient,
    InventoryClient, InventoryGateway,
};
pub use mock::MockInventoryGateway;

/// Errors surfaced by inventory checks.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The collaborator cannot be reached (including an open circuit);
    /// the caller decides whether to retry.
    #[error("inventory service unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered with an error.
    #[error("inventory collaborator error: {0}")]
    Gateway(String),
}
