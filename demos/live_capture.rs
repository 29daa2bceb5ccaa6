//! Live capture from the local Bluetooth controller
//!
//! Run with: cargo run --example live_capture
//!
//! Needs BlueZ's hcitool and hcidump. Reads CAPSYNC_* settings from the
//! environment or .env, captures until the packet budget is exhausted or
//! Ctrl+C, then appends the results to the export file.

use std::sync::Arc;

use capsync_ble::{
    CsvExporter, ImmediateTrigger, Pipeline, PipelineConfig, ProcessCapture, Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .init();

    let config = PipelineConfig::from_env()?;
    let export_path = config.export_path.clone();
    let mut capture = ProcessCapture::from_config(&config);
    let pipeline = Arc::new(Pipeline::with_in_memory_store(config));

    println!("Live Capture");
    println!("==================\n");
    println!("Target: {}", pipeline.target_identity());
    println!("Press Ctrl+C to stop.\n");

    let mut notifications = pipeline.subscribe_notifications();
    let mut signatures = pipeline.subscribe_signatures();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                Ok(note) = notifications.recv() => println!("{}", note),
                Ok(record) = signatures.recv() => println!("{}", record),
                else => break,
            }
        }
    });

    let stopper = tokio::spawn({
        let pipeline = pipeline.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nStopping...");
                pipeline.stop();
            }
        }
    });

    let summary = pipeline.run(&mut ImmediateTrigger, &mut capture).await?;
    stopper.abort();
    printer.abort();

    println!(
        "\nStopped ({}): {} packets, {} verified",
        summary.reason, summary.packet_count, summary.verified_count
    );

    let exporter = CsvExporter::new(export_path, pipeline.store());
    exporter.append(&pipeline.target_identity())?;
    println!("Saved to {}", exporter.path().display());

    Ok(())
}
