//! `estate-watch`: keep one agency collection live and log every change.

use estate_core::{CollectionRecord, Contract, EntityKind, Owner, Property};
use estate_sync::telemetry::{self, TelemetryError};
use estate_sync::transport::{ClientError, RestClient, RestFetcher, WsPushChannel};
use estate_sync::{ConfigError, LiveCollection, WatchConfig};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), WatchError> {
    let config = WatchConfig::load()?;
    telemetry::init(config.log_format)?;

    match config.entity_kind()? {
        EntityKind::Property => watch::<Property>(&config).await,
        EntityKind::Owner => watch::<Owner>(&config).await,
        EntityKind::Contract => watch::<Contract>(&config).await,
    }
}

async fn watch<R>(config: &WatchConfig) -> Result<(), WatchError>
where
    R: CollectionRecord + DeserializeOwned + Debug,
{
    let client = RestClient::from_config(config)?;
    let fetcher = Arc::new(RestFetcher::<R>::new(client));
    let channel = Arc::new(WsPushChannel::from_config(config)?);
    let live: LiveCollection<_, R> = LiveCollection::new(fetcher, channel, config.sync.clone());

    let binding = live.bind(Some(config.agency_id));
    let mut updates = binding.watch();
    info!(
        agency_id = %config.agency_id,
        collection = %R::entity_kind(),
        "Watching collection"
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutting down");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Binding stopped");
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                match &snapshot.error {
                    Some(err) => error!(
                        kind = ?err.kind,
                        message = %err.message,
                        detail = ?err.detail,
                        "Collection unavailable"
                    ),
                    None => info!(
                        status = ?snapshot.status,
                        revision = snapshot.revision,
                        count = snapshot.len(),
                        last_fetched_at = ?snapshot.last_fetched_at,
                        "Collection updated"
                    ),
                }
            }
        }
    }

    binding.close().await;
    Ok(())
}
