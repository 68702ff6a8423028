mod config;
mod prune;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_api::{AppStateInner, Limiters};
use parley_db::Database;
use parley_gateway::EventBus;
use parley_support::llm::{ChatCompletionsClient, DisabledModel, LanguageModel};
use parley_support::notify::{LogNotifier, Notifier, SmtpNotifier};
use parley_support::SupportContext;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,parley_api=debug,parley_support=debug,parley_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
        None => {
            warn!("PARLEY_SMTP_HOST not set, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };
    let model: Arc<dyn LanguageModel> = match &config.llm {
        Some(llm) => Arc::new(ChatCompletionsClient::new(llm)?),
        None => {
            warn!("PARLEY_LLM_API_KEY not set, assistant replies and summaries are disabled");
            Arc::new(DisabledModel)
        }
    };

    let bus = EventBus::new();
    let ctx = SupportContext {
        db,
        bus: bus.clone(),
        notifier,
        model,
        admin_emails: config.admin_emails.clone().into(),
        public_url: config.public_url.clone(),
    };
    let limiters = Limiters::new(
        config.conversation_limit,
        config.lead_limit,
        config.enrichment_limit,
    );
    let state = Arc::new(AppStateInner::new(
        ctx,
        limiters,
        config.jwt_secret.clone(),
        config.bootstrap_admin.clone(),
    ));

    // Background pruning of idle rate-limit buckets
    let shutdown = CancellationToken::new();
    let pruner = tokio::spawn(prune::run_prune_loop(
        state.clone(),
        config.prune_interval,
        shutdown.clone(),
    ));

    let app = parley_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley server listening on {}", addr);
    info!(admins = config.admin_emails.len(), "Admin notification list loaded");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(bus, shutdown.clone()))
    .await?;

    shutdown.cancel();
    pruner.await.ok();
    info!("Parley server stopped");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. Closing the bus ends every open event
/// stream so in-flight SSE responses do not hold the shutdown open.
async fn shutdown_signal(bus: EventBus, shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }

    shutdown.cancel();
    bus.shutdown();
}
