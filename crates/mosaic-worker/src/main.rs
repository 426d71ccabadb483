use anyhow::Context;
use mosaic_analysis::{ModerationTaxonomy, RekognitionAnalyzer};
use mosaic_core::MosaicConfig;
use mosaic_db::{setup_database, PgAssetRepository};
use mosaic_ledger::create_ledger;
use mosaic_orchestrator::{create_profile_notifier, Orchestrator, OrchestratorDeps};
use mosaic_processing::{FfmpegTranscoder, FfprobeProber};
use mosaic_storage::create_storage;
use mosaic_worker::telemetry::init_tracing;
use mosaic_worker::{
    spawn_transcode_sweep, DispatcherSettings, JobResultHandler, MessageQueue, QueueDispatcher,
    SqsQueue, UploadReadyHandler,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// Use mimalloc as the global allocator for lower fragmentation under
// sustained image decoding.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_tracing();
    let config = MosaicConfig::from_env()
        .inspect_err(|e| tracing::error!(error = %e, "Failed to load configuration"))?;

    tracing::info!(environment = %config.environment, "Starting Mosaic worker");

    let pool = setup_database(&config.database).await?;
    let storage = create_storage(&config.storage)
        .await
        .context("Failed to initialize storage")?;
    let ledger = create_ledger(&config.ledger)
        .await
        .context("Failed to initialize job ledger")?;
    let analyzer = Arc::new(RekognitionAnalyzer::new(config.analysis.clone()).await);
    let transcoder = Arc::new(
        FfmpegTranscoder::new(storage.clone(), config.transcode.clone())
            .context("Failed to initialize transcoder")?,
    );
    let prober = Arc::new(
        FfprobeProber::new(config.transcode.ffprobe_path.clone())
            .context("Failed to initialize ffprobe")?,
    );
    let notifier = create_profile_notifier(&config.profile_notifier)?;
    let taxonomy = ModerationTaxonomy::new(config.analysis.moderation_taxonomy.iter());

    let deps = OrchestratorDeps {
        assets: Arc::new(PgAssetRepository::new(pool)),
        ledger,
        storage,
        detector: analyzer.clone(),
        image_moderator: analyzer.clone(),
        video_moderator: analyzer.clone(),
        transcoder,
        prober,
        notifier,
    };
    let orchestrator = Orchestrator::new(
        deps,
        config.orchestrator.clone(),
        &config.media,
        taxonomy,
    );

    let dispatcher_config = &config.dispatcher;
    let region = dispatcher_config.aws_region.as_str();
    let upload_ready: Arc<dyn MessageQueue> =
        Arc::new(SqsQueue::new(region, dispatcher_config.upload_ready_queue_url.clone()).await?);
    let job_results: Arc<dyn MessageQueue> =
        Arc::new(SqsQueue::new(region, dispatcher_config.job_result_queue_url.clone()).await?);
    let dead_letter: Option<Arc<dyn MessageQueue>> = match &dispatcher_config.dead_letter_queue_url {
        Some(url) => {
            let queue: Arc<dyn MessageQueue> = Arc::new(SqsQueue::new(region, url.clone()).await?);
            Some(queue)
        }
        None => {
            tracing::warn!("No dead-letter queue configured; poison messages rely on queue redrive");
            None
        }
    };
    let settings = DispatcherSettings::from(dispatcher_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let upload_dispatcher = Arc::new(QueueDispatcher::new(
        upload_ready,
        dead_letter.clone(),
        Arc::new(UploadReadyHandler::new(orchestrator.clone())),
        settings.clone(),
    ));
    let result_dispatcher = Arc::new(QueueDispatcher::new(
        job_results,
        dead_letter,
        Arc::new(JobResultHandler::new(orchestrator.clone(), analyzer)),
        settings,
    ));

    let mut handles = vec![
        tokio::spawn(upload_dispatcher.run(shutdown_rx.clone())),
        tokio::spawn(result_dispatcher.run(shutdown_rx.clone())),
    ];
    if let Some(sweep) = spawn_transcode_sweep(
        orchestrator,
        Duration::from_secs(config.orchestrator.transcode_sweep_interval_secs),
        shutdown_rx,
    ) {
        handles.push(sweep);
    }

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }

    tracing::info!("Mosaic worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
}
