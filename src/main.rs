use anyhow::Result;
use signal_bridge::{BridgeConfig, DeviceLink, ResultBuffer, SessionManager};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = BridgeConfig::from_env();
    log::info!(
        "Starting signal bridge on {} at {} baud",
        config.serial_port,
        config.baud_rate
    );

    let buffer = Arc::new(ResultBuffer::new(config.buffer_capacity));
    let link = Arc::new(DeviceLink::open(
        &config.serial_port,
        config.baud_rate,
        Arc::clone(&buffer),
    ));
    if !link.is_connected() {
        log::warn!("Device unreachable; commands will be dropped and no results will arrive");
    }

    // brief red flash confirms the device is listening
    link.rgb(255, 0, 0).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    link.rgb(0, 0, 0).await;

    let session = SessionManager::new(Arc::clone(&link), Arc::clone(&buffer), config.replay_path.clone());
    let rate = session.start(config.rate_limit).await?;
    log::info!(
        "Replaying {} at {} records/sec; press ctrl-c to stop",
        config.replay_path.display(),
        rate
    );

    tokio::signal::ctrl_c().await?;

    match session.stop().await {
        Ok(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
        // replay already ran to completion
        Err(e) => log::info!("No session to stop: {}", e),
    }
    if let Some(stats) = session.stats() {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    link.close().await;
    Ok(())
}
