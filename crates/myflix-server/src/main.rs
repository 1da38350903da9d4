use anyhow::Context;
use dotenvy::dotenv;
use myflix_core::config::{Settings, TEMP_SWEEP_INTERVAL};
use myflix_core::temp::{ensure_dirs, purge_temp_files};
use myflix_server::app::{build_state, run_janitor, shutdown_signal, warm_up};
use myflix_server::logging::{init_logging, RedactionPatterns};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Before logging, so no line escapes unredacted
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("🎬 Starting MyFlix...");

    let settings = init_settings();
    for issue in settings.validate() {
        warn!("⚠️ Configuration issue: {issue}");
    }

    ensure_dirs(&settings)
        .await
        .context("Failed to create cache or temp directories")?;

    let client = myflix_transport_telegram::connect(&settings).await;
    let state = build_state(&settings, Arc::clone(&client));
    warm_up(&state).await;

    let cancel = CancellationToken::new();
    let janitor = tokio::spawn(run_janitor(
        settings.temp_download_dir.clone(),
        settings.temp_file_max_age(),
        TEMP_SWEEP_INTERVAL,
        cancel.clone(),
    ));

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🚀 MyFlix listening on http://{addr}");

    let served = axum::serve(
        listener,
        myflix_web::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    cancel.cancel();
    if let Err(e) = janitor.await {
        error!("Temp janitor ended abnormally: {e}");
    }
    client.close().await;
    let removed = purge_temp_files(&settings.temp_download_dir).await;
    info!("👋 MyFlix stopped ({removed} temp files removed)");

    served.context("HTTP server failed")
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(settings) => {
            info!("Configuration loaded successfully.");
            settings
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}
