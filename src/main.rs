use std::sync::Arc;

use anyhow::Context;
use doc_analysis::analysis::{AnalyzerRegistry, HttpAnalyzer};
use doc_analysis::api::task_routes;
use doc_analysis::config::{ProcessorConfig, ServerConfig};
use doc_analysis::store::FileStatusStore;
use doc_analysis::worker::{Processor, TaskKind, spawn_cleanup_task};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ProcessorConfig::from_env()?;
    let server = ServerConfig::from_env()?;

    eprintln!("Doc Analysis v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/background", server.port);
    eprintln!("   Results: {}", config.results_dir.display());
    eprintln!("   Workers: {}", config.max_workers);

    // ── Analyzers ────────────────────────────────────────────────────────
    let mut analyzers = AnalyzerRegistry::new();
    let endpoints = [
        (TaskKind::ImageAnalysis, server.image_endpoint.as_deref()),
        (TaskKind::TableExtraction, server.table_endpoint.as_deref()),
    ];
    for (kind, endpoint) in endpoints {
        let Some(endpoint) = endpoint else {
            eprintln!("   {kind}: disabled (no endpoint configured)");
            continue;
        };
        let mut analyzer = HttpAnalyzer::new(kind.as_str(), endpoint)?;
        if let Some(ref token) = server.analyzer_token {
            analyzer = analyzer.with_token(token.clone());
        }
        eprintln!("   {kind}: {endpoint}");
        analyzers.register(kind, Arc::new(analyzer));
    }
    if analyzers.kinds().is_empty() {
        tracing::warn!("No analyzer endpoints configured; every submission will be rejected");
    }

    // ── Processor ────────────────────────────────────────────────────────
    let store = FileStatusStore::new(&config.results_dir)
        .await
        .with_context(|| format!("opening results dir {}", config.results_dir.display()))?;

    let cleanup_interval = config.cleanup_interval;
    let retention = config.retention;
    let processor = Arc::new(Processor::new(config, Arc::new(store), analyzers));

    let recovered = processor.recover().await?;
    if recovered > 0 {
        eprintln!("   Recovered {} tasks from previous run", recovered);
    }

    processor.start().await;
    let cleanup_handle = spawn_cleanup_task(Arc::clone(&processor), cleanup_interval, retention);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = task_routes(Arc::clone(&processor));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port))
        .await
        .with_context(|| format!("binding port {}", server.port))?;
    tracing::info!(port = server.port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    cleanup_handle.abort();
    processor.stop().await;

    Ok(())
}
