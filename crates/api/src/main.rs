//! Order service entry point.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use api::routes::orders::AppState;
use inventory::{CircuitBreaker, GuardedInventoryClient, MockInventoryGateway};
use orders::{OrderService, StatusConsumer};
use outbox::OutboxPublisher;
use sqlx::postgres::PgPoolOptions;
use store::PostgresOrderStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use bus::{EventBus, InProcessEventBus, topics};

/// Ceiling on draining in-flight requests after a shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Load configuration and connect to the database
    let config = api::Config::from_env();
    let database_url = config
        .database_url
        .clone()
        .expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max)
        .min_connections(config.db_pool_min)
        .idle_timeout(config.db_idle_timeout)
        .acquire_timeout(config.db_connect_timeout)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");

    let store = Arc::new(PostgresOrderStore::new(pool, config.outbox_settings()));
    store.run_migrations().await.expect("migrations failed");

    // 4. Wire the eventing core: bus, guarded inventory client, service,
    //    status consumer, outbox publisher
    let event_bus = Arc::new(InProcessEventBus::new());

    let gateway = Arc::new(MockInventoryGateway::new(
        config.inventory_failure_rate_percent,
    ));
    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
    let inventory_client = Arc::new(GuardedInventoryClient::new(gateway, breaker));

    let order_service = Arc::new(OrderService::new(store.clone(), inventory_client));
    event_bus
        .subscribe(
            topics::DELIVERY_EVENTS,
            Arc::new(StatusConsumer::new(order_service.clone())),
        )
        .await;

    let publisher = OutboxPublisher::new(store, event_bus, config.publisher.clone());
    publisher.start();

    // 5. Build the application
    let state = Arc::new(AppState { order_service });
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting order service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let drain_token = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { drain_token.cancelled().await })
        .into_future();

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        }
        () = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_DRAIN).await;
        } => {
            tracing::warn!(ceiling_secs = SHUTDOWN_DRAIN.as_secs(), "drain ceiling reached");
        }
    }

    // 7. Stop background work at its next safe boundary
    publisher.stop().await;

    tracing::info!("order service shut down gracefully");
}
