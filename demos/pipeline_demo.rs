//! Pipeline Demo
//!
//! Pushes a burst of e-mail messages through an accumulator and a
//! concurrency-limited dispatcher backed by an in-memory transport.
//!
//! Features showcased:
//! 1. Adaptive batching - heavier messages produce smaller batches
//! 2. Backpressure - the accumulator pauses while the dispatcher is saturated
//! 3. Reconciliation - rejected messages surface with their status reason
//!
//! Run with `RUST_LOG=bulk_dispatch=debug cargo run --example pipeline_demo`.
//! `BULK_DISPATCH_*` environment variables override the defaults.

use anyhow::Context;
use bulk_dispatch::config::PipelineConfig;
use bulk_dispatch::message::EmailMessage;
use bulk_dispatch::pipeline::{Pipeline, PipelineEvent};
use bulk_dispatch::response::{AggregateResponse, ItemResult};
use bulk_dispatch::transport::InMemoryTransport;
use bulk_dispatch::Completion;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bulk_dispatch=info")),
        )
        .init();

    let mut config = PipelineConfig::default();
    config.dispatcher.concurrency_limit = 2;
    config
        .apply_env()
        .context("invalid BULK_DISPATCH_* override")?;

    // addresses without '@' are rejected with 1002
    let transport = Arc::new(
        InMemoryTransport::with_responder(|items: &[EmailMessage]| {
            let results = items
                .iter()
                .enumerate()
                .map(|(i, m)| {
                    if m.to_email.contains('@') {
                        ItemResult::ok()
                            .with_to_email(m.to_email.clone())
                            .with_message_id(format!("msg-{i}"))
                    } else {
                        ItemResult::failed(1002).with_to_email(m.to_email.clone())
                    }
                })
                .collect();
            Ok(AggregateResponse::from_results(results))
        })
        .with_latency(Duration::from_millis(120)),
    );

    let (pipeline, mut events) = Pipeline::from_config(Arc::clone(&transport), &config)?;

    let delivered = Arc::new(AtomicUsize::new(0));
    for i in 0..240 {
        let to = if i % 25 == 7 {
            format!("user{i}.example.com")
        } else {
            format!("user{i}@example.com")
        };
        // the second half carries 20 KiB bodies, which the weight tiers batch by 25
        let body = if i < 120 { "hi".repeat(64) } else { "x".repeat(20 * 1024) };
        let msg = EmailMessage::new(to, "news@example.com", format!("Issue #{i}"))
            .with_html_body(body);

        let delivered = Arc::clone(&delivered);
        pipeline.write_with(
            msg,
            Completion::callback(move |outcome| match outcome {
                Ok(_) => {
                    delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => tracing::warn!(item = i, error = %e, "message not delivered"),
            }),
        );
    }
    pipeline.end();

    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Accumulator(notice) => tracing::info!(?notice, "accumulator"),
            PipelineEvent::Dispatcher(event) => tracing::info!(?event, "dispatcher"),
        }
    }
    pipeline.closed().await;

    let stats = pipeline.stats();
    println!("calls:     {}", stats.call_count);
    println!("batches:   {:?}", transport.batch_sizes());
    println!("delivered: {}", delivered.load(Ordering::Relaxed));
    println!("failed:    {}", stats.failure_count);
    for (code, count) in stats.failure_stats.iter() {
        println!(
            "  {} x{} ({})",
            code,
            count,
            bulk_dispatch::status::describe_message_status(code)
        );
    }
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
