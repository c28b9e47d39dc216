use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::{
    config::Config,
    controller::TrackingController,
    geolocation::{FixedLocation, GeolocationSource},
    memory::MemoryBackend,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Track the built-in demo fleet instead of a configured one
    #[arg(long)]
    pub demo: bool,
    /// Stop tracking after this many seconds
    #[arg(long)]
    pub seconds: Option<u64>,
    /// Entity the camera follows
    #[arg(long)]
    pub follow: Option<String>,
}

impl Args {
    /// Runs one tracking session against the in-process map backend until
    /// Ctrl+C or the optional deadline.
    pub async fn run(&self, mut config: Config) -> miette::Result<()> {
        if let Some(follow) = &self.follow {
            config.map.follow = Some(follow.as_str().into());
        }
        let mut controller = TrackingController::new(MemoryBackend::default(), config.settings());
        for spec in config.entities {
            controller.track(spec)?;
        }

        let shutdown = controller.shutdown_token();
        let ctrl_c = shutdown.clone();
        tokio::spawn(async move {
            let _drop = ctrl_c.drop_guard();
            tokio::signal::ctrl_c().await
        });
        if let Some(seconds) = self.seconds {
            let deadline = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                deadline.cancel();
            });
        }

        let handle = controller.mount(&config.map.container).await?;
        info!(container = %config.map.container, map = ?handle.map(), "map mounted");
        let source = match config.device {
            Some(pos) => GeolocationSource::new(FixedLocation(pos)),
            None => GeolocationSource::unavailable(),
        };
        controller.locate(&source).await;
        controller.run().await;

        for entity in controller.entities() {
            info!(
                entity = %entity.id,
                name = %entity.name,
                current = ?entity.current.map(|p| p.to_string()),
                points = entity.path.len(),
                "path summary"
            );
        }
        controller.unmount();
        let stats = controller.adapter().backend().stats();
        info!(?stats, "map backend released");
        Ok(())
    }
}
