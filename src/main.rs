mod audio;
mod codec;
mod config;
mod error;
mod guard;
mod protocol;
mod session;
mod state;
#[cfg(test)]
mod test_support;
mod transport;

use std::sync::Arc;

use tokio::signal;

use config::Config;
use session::{AlsaWsBackend, SessionController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "lingualink.toml".to_string());
    let config = Config::load(&config_path)?;
    log::info!(
        "LinguaLink starting: {} -> {}, endpoint {}",
        config.source_lang,
        config.target_lang,
        config.ws_url
    );

    let controller = Arc::new(SessionController::new(config, Arc::new(AlsaWsBackend)));

    // Presentation layer: log every state change
    let mut status = controller.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            match &snapshot.last_error {
                Some(reason) => log::info!("Session state: {:?} ({})", snapshot.state, reason),
                None => log::info!("Session state: {:?}", snapshot.state),
            }
        }
    });

    if let Err(e) = controller.start().await {
        anyhow::bail!("Failed to start session: {}", e);
    }

    signal::ctrl_c().await?;
    log::info!("Received Ctrl+C, shutting down...");
    controller.stop().await;

    Ok(())
}
