//! drift-daemon: the drift mesh node.
//!
//! Single OS process on a Tokio runtime: loads the settings file (every
//! runtime key required), opens the store, bootstraps the DH identity,
//! serves inbound LAN exchanges, and runs the exchange scheduler.

mod config;
mod listener;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info};

use drift_db::{FriendStore, MessageStore};
use drift_exchange::SessionContext;
use drift_peers::PeerRegistry;
use drift_scheduler::{InboundTracker, PeerConnector, Scheduler};
use drift_transport::adapter::TransportAdapter;
use drift_transport::lan::{LanListener, LanTransport};
use drift_transport::wifi::WifiDirectTransport;
use drift_transport::{ExchangeStream, TransportError};
use drift_types::friend::encode_public_id;
use drift_types::{Clock, SystemClock, TransportKind};

use crate::config::Settings;

/// Dials through the transports this build carries. BLE and Wi-Fi Aware
/// need platform radio stacks and are not available in the standalone
/// daemon; Wi-Fi Direct works once the platform has formed a group.
struct DaemonConnector {
    lan: LanTransport,
    wifi_direct: WifiDirectTransport,
}

impl PeerConnector for DaemonConnector {
    async fn connect(
        &self,
        kind: TransportKind,
        address: &str,
    ) -> drift_transport::Result<Box<dyn ExchangeStream>> {
        match kind {
            TransportKind::Lan => self.lan.open(address).await,
            TransportKind::WifiDirect => self.wifi_direct.open(address).await,
            other => Err(TransportError::Connect(format!(
                "transport {other} not available"
            ))),
        }
    }
}

fn parse_args() -> (PathBuf, bool) {
    let mut config_path = PathBuf::from("drift.toml");
    let mut write_default = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                }
            }
            "--write-default-config" => write_default = true,
            other => {
                eprintln!("unknown argument: {other}");
                eprintln!("usage: drift-daemon [--config <path>] [--write-default-config]");
                std::process::exit(2);
            }
        }
    }
    (config_path, write_default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("drift=info".parse()?),
        )
        .init();

    let (config_path, write_default) = parse_args();
    if write_default {
        Settings::write_default(&config_path)?;
        info!("default settings written to {}", config_path.display());
        return Ok(());
    }

    // Missing file or missing required key: hard abort.
    let settings = match Settings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            error!("cannot start: {e}");
            std::process::exit(1);
        }
    };

    let data_dir = settings.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("drift.db");

    let messages = Arc::new(MessageStore::open(&db_path)?);
    let friends = Arc::new(FriendStore::open(&db_path)?);

    // Identity bootstrap: generate the DH keypair on first run.
    let (public_id, _private) = match friends.identity()? {
        Some(pair) => pair,
        None => {
            let pair = drift_crypto::identity::generate_keypair(&mut rand::rngs::OsRng);
            friends.store_identity(&pair.public, &pair.private)?;
            info!("generated new identity {}", encode_public_id(&pair.public));
            (pair.public.clone(), pair.private.clone())
        }
    };
    info!(
        public_id = %encode_public_id(&public_id),
        friends = friends.friend_count()?,
        messages = messages.count()?,
        "store opened"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(PeerRegistry::new());
    let inbound = Arc::new(InboundTracker::new());
    let ctx = Arc::new(SessionContext {
        policy: settings.exchange_policy(),
        messages: Arc::clone(&messages),
        friends: Arc::clone(&friends),
        my_public_id: public_id.clone(),
        clock: Arc::clone(&clock),
    });

    let (shutdown_tx, _) = broadcast::channel(1);

    // Inbound LAN exchanges.
    let lan_listener = LanListener::bind(&settings.listen_addr).await?;
    info!("listening on {}", lan_listener.local_addr());
    tokio::spawn(listener::serve(
        lan_listener,
        Arc::clone(&ctx),
        Arc::clone(&registry),
        Arc::clone(&inbound),
        shutdown_tx.subscribe(),
    ));

    // Retention sweep.
    let retention = settings.retention_policy();
    if retention.autodelete_enabled {
        let messages = Arc::clone(&messages);
        let clock = Arc::clone(&clock);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = messages.auto_delete(&retention, clock.now_ms()) {
                            tracing::warn!("auto-delete sweep failed: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Statically configured peers stand in for radio discovery: re-report
    // them each interval so they never go stale.
    if !settings.static_peers.is_empty() {
        let registry = Arc::clone(&registry);
        let clock = Arc::clone(&clock);
        let peers = settings.static_peers.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now_ms = clock.now_ms();
                        for address in &peers {
                            let report = registry.report(
                                TransportKind::Lan,
                                address,
                                drift_types::TransportInfo {
                                    address: address.clone(),
                                    last_seen_ms: now_ms,
                                    rssi: None,
                                },
                                None,
                            );
                            if let Err(e) = report {
                                tracing::warn!("static peer report failed: {e}");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Outbound scheduling.
    let local_identity = if settings.device_identity.is_empty() {
        encode_public_id(&public_id)
    } else {
        settings.device_identity.clone()
    };
    let (scheduler, handle) = Scheduler::new(
        settings.scheduler_policy(),
        Arc::clone(&ctx),
        Arc::clone(&registry),
        Arc::new(DaemonConnector {
            lan: LanTransport,
            wifi_direct: WifiDirectTransport,
        }),
        Arc::clone(&clock),
        Arc::clone(&inbound),
        local_identity,
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    // SIGUSR1 = force-exchange (hard), SIGUSR2 = soft-force-exchange.
    #[cfg(unix)]
    {
        let handle = handle.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut hard) = signal(SignalKind::user_defined1()) else {
                return;
            };
            let Ok(mut soft) = signal(SignalKind::user_defined2()) else {
                return;
            };
            loop {
                tokio::select! {
                    Some(_) = hard.recv() => {
                        info!("force-exchange requested");
                        handle.force_exchange().await;
                    }
                    Some(_) = soft.recv() => {
                        info!("soft-force-exchange requested");
                        handle.soft_force_exchange().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }
    #[cfg(not(unix))]
    let _ = handle;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(());
    let _ = scheduler_task.await;
    info!("stopped");
    Ok(())
}
