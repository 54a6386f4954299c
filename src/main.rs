mod attribute;
mod config;
mod consumer;
mod dispatcher;
mod event;
mod record;
mod repository;
mod sink;

use redis::Client;

use crate::config::Settings;
use crate::consumer::ChangeConsumer;
use crate::repository::Repository;

#[tokio::main]
#[tracing::instrument]
async fn main() {
    dotenv::dotenv().ok();
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::ENTER)
            .finish(),
    )
    .unwrap();

    // Everything the service needs is resolved here, once, before any change is read
    let settings = Settings::from_env().expect("Invalid configuration");
    let redis_client = Client::open(settings.redis_url.as_str()).expect("Could not connect to redis");

    // The repo encapsulates all interactions with Redis, both the change stream and the audit store
    let repo = Repository::new(redis_client, &settings)
        .await
        .expect("Could not start repository");

    tracing::info!(
        source_stream = %settings.source_stream,
        target_table = %settings.target_table,
        "Auditing configuration changes"
    );

    let consumer_handle = tokio::task::spawn(ChangeConsumer::new(repo, &settings).start());

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");

    // Every audit write is a single independent SET, so stopping mid-batch leaves the store valid
    tracing::info!("Shutting down");
    consumer_handle.abort();
    consumer_handle.await.ok();
}
