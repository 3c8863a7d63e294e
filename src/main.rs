use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use toybox::api::{HttpApi, SubscriptionApi};
use toybox::auth::AuthManager;
use toybox::config::AppConfig;
use toybox::device::DeviceRegistry;
use toybox::onboarding::OnboardingManager;
use toybox::server::build_router;
use toybox::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().inspect_err(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export TOYBOX_API_URL=https://api.example.com");
    })?;

    // Held until exit so buffered file logs are flushed.
    let _log_guard = init_tracing(&config);

    eprintln!("🧸 Toybox v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Upstream: {}", config.api_url);
    eprintln!("   API: http://0.0.0.0:{}/api/onboarding/state", config.port);
    if config.otp.dev_autofill {
        eprintln!("   Dev OTP autofill: enabled");
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .inspect_err(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                )
            })?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Upstream API ─────────────────────────────────────────────────────
    let api: Arc<dyn SubscriptionApi> =
        Arc::new(HttpApi::new(config.api_url.clone(), config.api_key.clone())?);

    let devices = DeviceRegistry::new(Arc::clone(&db));
    let onboarding = Arc::new(OnboardingManager::new(Arc::clone(&api), Arc::clone(&devices)));
    let auth = Arc::new(AuthManager::new(api, devices, config.otp.clone()));
    let app = build_router(onboarding, auth);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Onboarding server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

/// Stderr logging, plus a daily rolling file when `TOYBOX_LOG_DIR` is set.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "toybox.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    guard
}
