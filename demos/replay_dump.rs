//! Replay a recorded hcidump capture through the pipeline
//!
//! Run with: cargo run --example replay_dump -- capture.txt
//!
//! CAPSYNC_DEVICE_ID and CAPSYNC_SECRET_KEY must be set (or present in .env).

use capsync_ble::{
    Error, ImmediateTrigger, Pipeline, PipelineConfig, ReplayCapture, Result, SessionAttributes,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("capsync_ble=info"))
        .init();

    let path = std::env::args().nth(1).ok_or_else(|| Error::InvalidParameter {
        name: "path".to_string(),
        value: "<missing>".to_string(),
    })?;

    let config = PipelineConfig::from_env()?;
    println!("Replaying {} for device {}", path, config.target_identity);
    println!("==================\n");

    let mut capture = ReplayCapture::from_file(&path).await?;
    let pipeline = Pipeline::with_in_memory_store(config);

    let mut signatures = pipeline.subscribe_signatures();
    let printer = tokio::spawn(async move {
        while let Ok(record) = signatures.recv().await {
            println!("{}", record);
            println!("Matched: {}\n", record.matched);
        }
    });

    let summary = pipeline.run(&mut ImmediateTrigger, &mut capture).await?;
    printer.abort();

    println!("Session {}: {}", summary.session_id, summary.reason);
    println!(
        "{} packets, {} verified\n",
        summary.packet_count, summary.verified_count
    );

    if let Some(attributes) = pipeline.attributes() {
        for (label, value) in SessionAttributes::LABELS
            .iter()
            .zip(attributes.display_values().iter())
        {
            println!("{:<36} {}", label, value);
        }
    }

    Ok(())
}
