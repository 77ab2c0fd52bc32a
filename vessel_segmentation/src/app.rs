use crate::{
    config::{Config, FallbackMode},
    model_service::ModelService,
    ort_service::OrtModelService,
    proxy_service::ProxyModelService,
    segmentation::SegmentationService,
    server::HttpServer,
    telemetry::Metrics,
};
use std::{sync::Arc, time::Duration};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    if config.model.model_file_exists() {
        let model_service = match OrtModelService::new(&config.model) {
            Ok(service) => service,
            Err(e) => {
                tracing::error!("Failed to initialize model service: {}", e);
                return Err(e.into());
            }
        };
        return serve(model_service, config).await;
    }

    match config.model.fallback {
        FallbackMode::Proxy => {
            tracing::warn!(
                "Model file {:?} not found, serving the contrast proxy model",
                config.model.get_path()
            );
            let model_service = ProxyModelService::new(&config.model);
            serve(model_service, config).await
        }
        FallbackMode::None => {
            anyhow::bail!("Model file not found: {:?}", config.model.get_path())
        }
    }
}

async fn serve<M: ModelService>(model_service: M, config: Config) -> anyhow::Result<()> {
    let segmentation = SegmentationService::new(
        model_service,
        config.model.threshold,
        config.server.max_concurrent_predictions,
        Duration::from_millis(config.server.queue_timeout_ms),
    );

    let health = segmentation.health_check().await;
    match &health.test_error {
        None => tracing::info!(
            "Startup probe passed in {:.3}s",
            health.test_time.unwrap_or_default()
        ),
        Some(e) => tracing::warn!("Startup probe failed: {}", e),
    }

    let metrics = Arc::new(Metrics::new()?);
    let server = HttpServer::new(segmentation, metrics, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
