mod api;
mod auth;
mod challenge;
mod config;
mod error;
mod metrics;
mod middleware;
mod notify;
mod sandbox;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::{
    api::AppState,
    auth::JwtVerifier,
    challenge::{
        correlator::Correlator,
        dispatch::Dispatcher,
        intake::SubmissionIntake,
        store::{ChallengeStore, InMemoryChallengeStore},
        watchdog::{Watchdog, spawn_watchdog},
    },
    config::{AppConfig, LogFormat, NotifyBackendConfig},
    metrics::MetricsRegistry,
    notify::{ConnectionRegistry, Notifier, RedisNotifier},
    sandbox::HttpSandboxClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&cfg.log_level, cfg.log_format);

    let metrics = Arc::new(MetricsRegistry::new());
    let store: Arc<dyn ChallengeStore> = Arc::new(InMemoryChallengeStore::new());
    let registry = Arc::new(ConnectionRegistry::new());

    let notifier: Arc<dyn Notifier> = match &cfg.notify {
        NotifyBackendConfig::InMemory => registry.clone(),
        NotifyBackendConfig::Redis {
            url,
            channel_prefix,
        } => Arc::new(
            RedisNotifier::connect(url, channel_prefix, registry.clone())
                .await
                .context("failed to start redis notification fabric")?,
        ),
    };

    let sandbox = Arc::new(
        HttpSandboxClient::new(&cfg.sandbox, cfg.limits.clone())
            .context("failed to build sandbox client")?,
    );
    let correlator = Arc::new(Correlator::new(
        store.clone(),
        notifier.clone(),
        metrics.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        sandbox,
        notifier.clone(),
        correlator.clone(),
        metrics.clone(),
    ));
    let intake = Arc::new(SubmissionIntake::new(
        store.clone(),
        dispatcher,
        metrics.clone(),
        cfg.max_code_bytes,
    ));
    let watchdog = Arc::new(Watchdog::new(
        store.clone(),
        notifier,
        metrics.clone(),
        cfg.watchdog.timeout,
    ));
    spawn_watchdog(watchdog, cfg.watchdog.interval);

    let app = api::routes(AppState {
        intake,
        correlator,
        store,
        registry,
        verifier: Arc::new(JwtVerifier::new(&cfg.secret_key)),
        metrics,
    });

    let listener = TcpListener::bind(cfg.bind_addr)
        .await
        .context("failed to bind listener")?;

    tracing::info!(
        addr = %cfg.bind_addr,
        callback_url = %cfg.sandbox.callback_url,
        "challenge runner listening"
    );

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}

fn init_tracing(default_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{default_level},hyper=warn,reqwest=warn,redis=warn"))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}
