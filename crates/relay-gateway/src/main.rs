//! Relay Gateway daemon entry point.
//!
//! Resolves settings, wires every component spec.md §4 names into a
//! shared [`AppState`], registers one message handler per [`ReplyKind`]
//! so inbound world replies reach the waiting HTTP request, binds the
//! axum router, and runs until a shutdown signal arrives.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use relay_config::{RelaySettings, UserStoreKind};
use relay_core::ReplyKind;
use relay_gateway::auth::{AuthService, MemoryUserStore, PostgresUserStore, UserStore};
use relay_gateway::http::state::AppState;
use relay_gateway::http::build_router;
use relay_gateway::pending::PendingRegistry;
use relay_gateway::registry::ClientRegistry;
use relay_gateway::router::RequestRouter;
use relay_gateway::session::browser::WebDriverLauncher;
use relay_gateway::jobs;
use relay_gateway::session::{HandshakeStore, SessionController};
use relay_store::{CoordinationStore, LocalStore, RedisStore};
use relay_telemetry::{LogConfig, LogFormat, setup_logging};
use tracing::{info, warn};

/// Relay Gateway — multi-tenant HTTP-to-world-socket relay.
#[derive(Parser)]
#[command(name = "relay-gateway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to an optional TOML config file overriding the defaults,
    /// itself overridable by environment variables (spec.md §6).
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Every reply kind the Client Registry dispatches to the Pending
/// Registry. Kept as an explicit list rather than an iterator over
/// [`ReplyKind`] since the enum has no such derive (spec.md §3's 27
/// named operation kinds plus the 4 combat kinds REDESIGN FLAGS
/// split out).
const ALL_REPLY_KINDS: &[ReplyKind] = &[
    ReplyKind::Search,
    ReplyKind::Entity,
    ReplyKind::Structure,
    ReplyKind::Contents,
    ReplyKind::Create,
    ReplyKind::Update,
    ReplyKind::Delete,
    ReplyKind::Rolls,
    ReplyKind::Lastroll,
    ReplyKind::Roll,
    ReplyKind::ActorSheet,
    ReplyKind::Macros,
    ReplyKind::MacroExecute,
    ReplyKind::Encounters,
    ReplyKind::StartEncounter,
    ReplyKind::NextTurn,
    ReplyKind::NextRound,
    ReplyKind::LastTurn,
    ReplyKind::LastRound,
    ReplyKind::EndEncounter,
    ReplyKind::AddToEncounter,
    ReplyKind::RemoveFromEncounter,
    ReplyKind::Kill,
    ReplyKind::Increase,
    ReplyKind::Decrease,
    ReplyKind::Give,
    ReplyKind::Select,
    ReplyKind::Selected,
    ReplyKind::FileSystem,
    ReplyKind::UploadFile,
    ReplyKind::DownloadFile,
    ReplyKind::ExecuteJs,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = RelaySettings::resolve(cli.config.as_deref())?;

    let log_format = if settings.environment.eq_ignore_ascii_case("production") { LogFormat::Json } else { LogFormat::Pretty };
    let log_config = LogConfig::new("info").with_format(log_format);
    if let Err(e) = setup_logging(&log_config) {
        eprintln!("failed to initialize logging: {e}");
    }

    info!(port = settings.port, replica_id = %settings.replica_id, "starting relay gateway");

    let store: Arc<dyn CoordinationStore> = match &settings.redis_url {
        Some(url) => match RedisStore::connect(url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                warn!(error = %e, "failed to connect to redis, falling back to single-instance local store");
                Arc::new(LocalStore::new())
            },
        },
        None => Arc::new(LocalStore::new()),
    };

    let user_store: Arc<dyn UserStore> = match (settings.db_type, &settings.database_url) {
        (UserStoreKind::Postgres, Some(url)) => Arc::new(PostgresUserStore::connect(url).await?),
        _ => Arc::new(MemoryUserStore::default()),
    };

    let registry = ClientRegistry::new(store.clone(), settings.replica_id.clone());
    let pending = PendingRegistry::spawn();
    let router = Arc::new(RequestRouter::new(registry.clone(), pending.clone(), store.clone(), settings.replica_id.clone(), settings.port));
    let auth = Arc::new(AuthService::new(user_store.clone(), settings.quotas.clone()));
    let handshakes = Arc::new(HandshakeStore::new(store.clone(), settings.replica_id.clone()));

    let webdriver_url = std::env::var("WEBDRIVER_URL").unwrap_or_else(|_| "http://localhost:9515".to_string());
    let launcher = Arc::new(WebDriverLauncher::new(webdriver_url, settings.browser_executable_path.clone()));
    let sessions = SessionController::new(handshakes.clone(), registry.clone(), store.clone(), launcher, settings.replica_id.clone());

    for kind in ALL_REPLY_KINDS {
        let kind = *kind;
        let pending_for_handler = pending.clone();
        registry.on_message(
            kind.prefix(),
            Arc::new(move |_world_id, _credential, message| {
                pending_for_handler.fulfill(kind, message);
            }),
        );
    }

    jobs::spawn_all(user_store.clone(), store.clone(), sessions.clone());

    let state = Arc::new(AppState {
        registry,
        pending,
        router,
        auth,
        sessions,
        handshakes,
        store,
        deadlines: settings.deadlines.clone(),
        replica_id: settings.replica_id.clone(),
        asset_client: reqwest::Client::new(),
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!(port = settings.port, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return;
        };
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
