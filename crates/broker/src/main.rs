#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::{net::TcpListener, signal};

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::get;

use relay_broker::health::{HealthState, health_handler};
use relay_broker::state::BrokerState;
use relay_broker::store::RegistrationStore;
use relay_broker::ws::{BrokerAppState, ws_handler};
use relay_broker::{config, consts, reclaim};
use relay_protocol::{log, system::trigger::Trigger};

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    log::setup_logging(consts::DEFAULT_LOG_LEVEL, log::LogType::Broker);

    let broker_config = config::get();
    let (listen_addr, database_path, reclaim_days) = {
        let config = broker_config.read().unwrap();
        (config.listen_sockaddr(), config.database_path(), config.reclaim_days())
    };

    if let Some(parent) = database_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let store = Arc::new(
        RegistrationStore::open(&database_path).expect("failed to open registration database"),
    );
    let broker_state = Arc::new(BrokerState::new());
    let stop = Trigger::new();

    {
        let store = store.clone();
        let broker_state = broker_state.clone();
        let stop = stop.clone();
        tokio::spawn(reclaim::run(
            store,
            broker_state,
            reclaim_days,
            Duration::from_secs(consts::RECLAIM_SWEEP_SECS),
            stop,
        ));
    }

    let ws_app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(BrokerAppState {
            state: broker_state.clone(),
            store: store.clone(),
        });

    let health_app = Router::new()
        .route("/healthz", get(health_handler))
        .with_state(HealthState {
            broker_state: broker_state.clone(),
            started_at: Instant::now(),
        });

    let app = ws_app
        .merge(health_app)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = TcpListener::bind(listen_addr).await.unwrap();
    log::info!("Listening on {}", listen_addr);

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            let ctrl_c = signal::ctrl_c();
            #[cfg(unix)]
            let mut terminate =
                unix_signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

            #[cfg(unix)]
            tokio::select! {
                _ = ctrl_c => {
                    log::info!("Received Ctrl-C, shutting down");
                }
                _ = terminate.recv() => {
                    log::info!("Received SIGTERM, shutting down");
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.expect("Failed to listen for Ctrl-C");
                log::info!("Received Ctrl-C, shutting down");
            }
            stop.trigger();
        });
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { stop.wait_async().await })
    .await
    .unwrap();
}
