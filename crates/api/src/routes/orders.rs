//! Order intake and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId};
use domain::{CustomerId, Money, OrderError, OrderItem, OrderStatus};
use inventory::InventoryClient;
use orders::{CreateOrderRequest, OrderService};
use serde::{Deserialize, Serialize};
use store::{OrderRecord, OrderStore};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore, C: InventoryClient> {
    pub order_service: Arc<OrderService<S, C>>,
}

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    pub customer_id: String,
    pub items: Vec<OrderItemBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemBody {
    pub product_id: String,
    pub quantity: u32,
    pub price: f64,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub customer_id: String,
    pub items: Vec<OrderItemResponse>,
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub price: f64,
}

impl From<OrderRecord> for OrderResponse {
    fn from(order: OrderRecord) -> Self {
        Self {
            order_id: order.id.to_string(),
            status: order.status,
            customer_id: order.customer_id.to_string(),
            items: order
                .items
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    price: item.unit_price.to_f64(),
                })
                .collect(),
            total_amount: order.total_amount.to_f64(),
            created_at: order.created_at,
        }
    }
}

// -- Handlers --

/// POST /orders — accept a new order.
///
/// Optional headers: `Idempotency-Key` for replay-safe acceptance,
/// `X-Correlation-Id` for log correlation.
#[tracing::instrument(skip(state, headers, body))]
pub async fn create<S: OrderStore + 'static, C: InventoryClient + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderBody>,
) -> Result<(axum::http::StatusCode, Json<OrderResponse>), ApiError> {
    let request = validate(body)?;
    let idempotency_key = header_value(&headers, "idempotency-key");
    let correlation_id = header_value(&headers, "x-correlation-id").map(CorrelationId::from);

    let order = state
        .order_service
        .create_order(request, idempotency_key, correlation_id.as_ref())
        .await?;

    Ok((axum::http::StatusCode::CREATED, Json(order.into())))
}

/// GET /orders/{id} — load an order by ID.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + 'static, C: InventoryClient + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .order_service
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError(OrderError::NotFound(order_id)))?;

    Ok(Json(order.into()))
}

fn validate(body: CreateOrderBody) -> Result<CreateOrderRequest, ApiError> {
    if body.customer_id.is_empty() {
        return Err(invalid("customerId must not be empty"));
    }
    if body.items.is_empty() {
        return Err(invalid("items must contain at least one entry"));
    }

    let mut items = Vec::with_capacity(body.items.len());
    for item in &body.items {
        if item.product_id.is_empty() {
            return Err(invalid("productId must not be empty"));
        }
        if item.quantity < 1 {
            return Err(invalid("quantity must be at least 1"));
        }
        let unit_price = Money::from_f64(item.price)
            .filter(|p| !p.is_negative())
            .ok_or_else(|| invalid("price must be a non-negative number"))?;
        items.push(OrderItem::new(
            item.product_id.as_str(),
            item.quantity,
            unit_price,
        ));
    }

    Ok(CreateOrderRequest {
        customer_id: CustomerId::new(body.customer_id),
        items,
    })
}

fn invalid(message: &str) -> ApiError {
    ApiError(OrderError::Validation(message.to_string()))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    uuid::Uuid::parse_str(id)
        .map(OrderId::from_uuid)
        .map_err(|e| ApiError(OrderError::Validation(format!("invalid order ID: {e}"))))
}
