//! portal-daemon: the enrollment portal backend.
//!
//! Single OS process running a Tokio async runtime. The web front end talks
//! to the daemon via newline-delimited JSON-RPC over a Unix socket.

mod commands;
mod config;
mod rpc;
mod sweeper;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use portal_db::Store;
use portal_enroll::catalog::StoreCatalog;
use portal_enroll::clock::SystemClock;
use portal_enroll::mail::{LogNotifier, Mailer};
use portal_enroll::Portal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::PortalConfig;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Enrollment core.
    pub portal: Portal,
    /// Database handle, for catalog seeding.
    pub store: Store,
    pub config: PortalConfig,
}

/// Install the global subscriber. `RUST_LOG` wins over the config file.
fn init_tracing(config: &PortalConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.advanced.log_level))?;

    if config.advanced.log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.advanced.log_file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config, then logging
    let config = PortalConfig::load()?;
    init_tracing(&config)?;

    info!("Portal daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let store = Store::open(&data_dir.join("portal.db"))?;

    // 3. Wire the core
    let notifier = Arc::new(LogNotifier::new(config.mail.sender.clone()));
    let mailer = Mailer::new(notifier, config.link_builder(), config.mail.organisation.clone());
    let portal = Portal::new(
        store.clone(),
        Arc::new(SystemClock),
        Arc::new(StoreCatalog::new(store.clone())),
        mailer,
        config.policy(),
    );

    // 4. Create shutdown channel
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

    let state = Arc::new(DaemonState {
        portal,
        store,
        config,
    });

    // 5. Start the token sweeper
    let sweep_interval = Duration::from_secs(state.config.tokens.sweep_interval_secs);
    let sweeper = tokio::spawn(sweeper::run(
        state.portal.clone(),
        sweep_interval,
        shutdown_tx.subscribe(),
    ));

    // 6. Start IPC server
    let socket_path = state.config.socket_path();
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());
    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 7. Signals feed the shutdown channel; serve until it fires
    tokio::spawn(forward_signals(shutdown_tx.clone()));
    serve_until_shutdown(rpc_server.run(), shutdown_tx.subscribe()).await;

    // Graceful shutdown
    info!("Daemon shutting down gracefully");
    let _ = shutdown_tx.send(());
    if let Err(e) = sweeper.await {
        error!("Sweeper task failed: {}", e);
    }

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}

/// Send on the shutdown channel on Ctrl-C or SIGTERM.
async fn forward_signals(shutdown_tx: broadcast::Sender<()>) {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
    let _ = shutdown_tx.send(());
}

/// Drive `server` until it exits or a shutdown is broadcast.
async fn serve_until_shutdown<F>(server: F, mut shutdown_rx: broadcast::Receiver<()>)
where
    F: Future<Output = anyhow::Result<()>>,
{
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rpc::{dispatch_request, RpcRequest};
    use portal_db::queries::students;
    use portal_enroll::clock::ManualClock;
    use portal_enroll::mail::Outbox;
    use portal_enroll::Policy;
    use portal_types::student::StudentProfile;
    use portal_types::StudentId;
    use serde_json::{json, Value};

    pub(crate) const T0: u64 = 1_700_000_000;

    /// State over an in-memory store with one unverified student.
    pub(crate) fn test_state() -> (Arc<DaemonState>, Arc<ManualClock>, StudentId) {
        let store = Store::open_memory().expect("open");
        let clock = Arc::new(ManualClock::new(T0));
        let config = PortalConfig::default();
        let mailer = Mailer::new(Arc::new(Outbox::new()), config.link_builder(), "Test Institute");
        let portal = Portal::new(
            store.clone(),
            clock.clone(),
            Arc::new(StoreCatalog::new(store.clone())),
            mailer,
            Policy::default(),
        );
        let profile = StudentProfile {
            full_name: "Ana Costa".into(),
            name_on_id: "ANA COSTA".into(),
            email: "ana@example.org".into(),
            phone: None,
        };
        let student = store
            .with_conn(|conn| students::insert(conn, "12345", &profile, T0))
            .expect("student");
        let state = Arc::new(DaemonState {
            portal,
            store,
            config,
        });
        (state, clock, student)
    }

    async fn call(state: &Arc<DaemonState>, method: &str, params: Value) -> Value {
        let request: RpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        }))
        .expect("request");
        let response = dispatch_request(state.clone(), request).await;
        serde_json::to_value(&response).expect("response")
    }

    async fn create_training(state: &Arc<DaemonState>) -> i64 {
        let resp = call(state, "create_training", json!({"name": "First Aid"})).await;
        resp["result"]["training_id"].as_i64().expect("training id")
    }

    fn enroll_params(training_id: i64) -> Value {
        json!({
            "national_id": "777",
            "profile": {"full_name": "Bruno Dias", "email": "bruno@example.org"},
            "training_id": training_id,
            "client_ip": "192.0.2.10",
        })
    }

    #[tokio::test]
    async fn test_ping() {
        let (state, _, _) = test_state();
        let resp = call(&state, "ping", Value::Null).await;
        assert_eq!(resp["result"]["pong"], true);
    }

    #[tokio::test]
    async fn test_enroll_confirm_status_flow() {
        let (state, _, _) = test_state();
        let training_id = create_training(&state).await;

        let resp = call(&state, "enroll", enroll_params(training_id)).await;
        assert_eq!(resp["result"]["status"], "pending");
        let token = resp["result"]["poll_token"].as_str().expect("token").to_string();
        let poll_url = resp["result"]["poll_url"].as_str().expect("poll url");
        assert!(poll_url.ends_with(&format!("?token={token}")));

        let resp = call(&state, "status", json!({"token": token})).await;
        assert_eq!(resp["result"]["state"], "pending");
        assert_eq!(resp["result"]["poll_interval_secs"], 3);

        let resp = call(&state, "confirm", json!({"token": token})).await;
        assert_eq!(resp["result"]["status"], "verified");
        assert_eq!(resp["result"]["purpose"], "enrollment");

        let resp = call(&state, "status", json!({"token": token})).await;
        assert_eq!(resp["result"]["state"], "verified");

        let resp = call(&state, "confirm", json!({"token": token})).await;
        assert_eq!(resp["error"]["code"], -32121);
        assert_eq!(resp["error"]["message"], "TOKEN_ALREADY_USED");
    }

    #[tokio::test]
    async fn test_resend_rate_limited_then_allowed() {
        let (state, clock, _) = test_state();
        let training_id = create_training(&state).await;
        let resp = call(&state, "enroll", enroll_params(training_id)).await;
        let token = resp["result"]["poll_token"].as_str().expect("token").to_string();

        let resp = call(&state, "resend", json!({"token": token})).await;
        assert_eq!(resp["error"]["message"], "RATE_LIMITED");
        assert_eq!(resp["error"]["data"]["retry_after_secs"], 60);

        clock.advance(61);
        let resp = call(&state, "resend", json!({"token": token})).await;
        assert!(resp["result"]["poll_token"].is_string());
        assert_ne!(resp["result"]["poll_token"], json!(token));
    }

    #[tokio::test]
    async fn test_domain_errors_surface_with_field() {
        let (state, _, _) = test_state();
        let resp = call(&state, "enroll", enroll_params(404)).await;
        assert_eq!(resp["error"]["code"], -32101);
        assert_eq!(resp["error"]["data"]["field"], "training_id");

        let resp = call(&state, "status", json!({"token": "nope"})).await;
        assert_eq!(resp["error"]["message"], "TOKEN_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_invalid_params_and_unknown_method() {
        let (state, _, _) = test_state();
        let resp = call(&state, "enroll", json!({"national_id": 5})).await;
        assert_eq!(resp["error"]["code"], -32602);

        let resp = call(&state, "drop_tables", Value::Null).await;
        assert_eq!(resp["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_recovery_and_email_change() {
        let (state, _, student) = test_state();
        let resp = call(&state, "request_recovery", json!({"national_id": "12345"})).await;
        let token = resp["result"]["poll_token"].as_str().expect("token").to_string();
        let resp = call(&state, "confirm", json!({"token": token})).await;
        assert_eq!(resp["result"]["purpose"], "recovery");
        assert_eq!(resp["result"]["student_id"], student.0);

        let resp = call(
            &state,
            "request_email_change",
            json!({"student_id": student.0, "email": "ana.new@example.org"}),
        )
        .await;
        let token = resp["result"]["poll_token"].as_str().expect("token").to_string();
        let resp = call(&state, "confirm", json!({"token": token})).await;
        assert_eq!(resp["result"]["purpose"], "email_change");
    }

    #[tokio::test]
    async fn test_create_training_rejects_out_of_range_window() {
        let (state, _, _) = test_state();
        let resp = call(
            &state,
            "create_training",
            json!({"name": "Welding", "enrollment_closes_at": u64::MAX}),
        )
        .await;
        assert_eq!(resp["error"]["code"], -32602);

        let resp = call(
            &state,
            "create_training",
            json!({"name": "Welding", "enrollment_closes_at": i64::MAX}),
        )
        .await;
        let training_id = resp["result"]["training_id"].as_i64().expect("training id");
        let resp = call(&state, "enroll", enroll_params(training_id)).await;
        assert_eq!(resp["result"]["status"], "pending");
    }

    #[tokio::test]
    async fn test_shutdown_broadcast_stops_server() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let rx = shutdown_tx.subscribe();
        let serving = tokio::spawn(serve_until_shutdown(
            std::future::pending::<anyhow::Result<()>>(),
            rx,
        ));
        shutdown_tx.send(()).expect("send");
        tokio::time::timeout(Duration::from_secs(1), serving)
            .await
            .expect("server stopped")
            .expect("join");
    }

    #[tokio::test]
    async fn test_closed_training_rejects_enrollment() {
        let (state, _, _) = test_state();
        let training_id = create_training(&state).await;
        let resp = call(
            &state,
            "set_training_active",
            json!({"training_id": training_id, "active": false}),
        )
        .await;
        assert_eq!(resp["result"]["active"], false);

        let resp = call(&state, "enroll", enroll_params(training_id)).await;
        assert_eq!(resp["error"]["message"], "UNAVAILABLE");

        let resp = call(&state, "set_training_active", json!({"training_id": 999, "active": true})).await;
        assert_eq!(resp["error"]["message"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_sweep_tokens_method() {
        let (state, _, _) = test_state();
        let resp = call(&state, "sweep_tokens", Value::Null).await;
        assert_eq!(resp["result"]["deleted"], 0);
    }
}
