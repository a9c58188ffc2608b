use sqs_lease_worker::{
    config::WorkerConfig,
    consumer_fn,
    impls::sqs::SqsMessageSource,
    lease::{redis::RedisLeaseStore, LeaseGuard},
    Message, MessageConsumptionOutcome, Poller, Runner, RunnerError,
};
use std::{process::ExitCode, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!(
        "config ok: region={} endpoint={} queue={} concurrency={} max_in_flight={}",
        config.aws_region,
        config.sqs_endpoint.as_deref().unwrap_or("default"),
        config.queue_url,
        config.concurrency,
        config.max_in_flight
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = RedisLeaseStore::connect(&config.redis_addr).await?;
    let lease = LeaseGuard::new(Arc::new(store), config.lease_ttl)?;

    let source = SqsMessageSource::init(&config).await;
    let poller = Poller::new(Arc::new(source)).with_wait_time(config.wait_time);

    let consumer = consumer_fn(|msg: Message, _cancel| async move {
        log::info!("processing: id={} body={}", msg.id(), msg.body());
        Ok(MessageConsumptionOutcome::Succeeded)
    });

    let runner = Runner::new(Arc::new(poller), Arc::new(consumer), config.runner_config())?
        .with_lease(lease);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Could not listen for Ctrl-C: {e}");
                return;
            }
            log::info!("Received Ctrl-C, shutting down");
            cancel.cancel();
        }
    });

    match runner.run(cancel).await {
        Ok(()) | Err(RunnerError::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
