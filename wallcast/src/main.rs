use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wcconfig::get_config;
use wccontrol::blackout::BlackoutCoordinator;
use wccontrol::controller::CastController;
use wccontrol::discovery::{DiscoveryEngine, DiscoverySettings};
use wccontrol::events::EventBus;
use wccontrol::model::{ContentSpec, DeviceId, ProtocolKind};
use wccontrol::registry::{ClientSettings, DeviceRegistry, StaticDeviceSpec};
use wccontrol::supervisor::{PlaybackSupervisor, SupervisorSettings};
use wcstream::sessions::SessionRegistry;
use wcstream::server::StreamServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = get_config();
    let base_url = config.get_base_url();
    info!("Wallcast starting, streaming at {}", base_url);

    // ---- Shared state ----------------------------------------------------
    let client_settings = ClientSettings {
        timeout: Duration::from_secs(config.get_control_timeout_secs()),
        retries: config.get_control_retries(),
    };
    let registry = Arc::new(DeviceRegistry::new(client_settings));
    let sessions = Arc::new(SessionRegistry::new());
    let events = Arc::new(EventBus::new());

    // ---- Control plane ---------------------------------------------------
    let supervisor = PlaybackSupervisor::new(
        registry.clone(),
        sessions.clone(),
        events.clone(),
        base_url.clone(),
        SupervisorSettings {
            interval: Duration::from_secs(config.get_reconcile_secs()),
            override_window: Duration::from_secs(config.get_override_secs()),
            poll_failure_threshold: config.get_poll_failure_threshold(),
            ..SupervisorSettings::default()
        },
    );

    let discovery_interval = Duration::from_secs(config.get_discovery_interval_secs());
    let discovery = DiscoveryEngine::new(
        registry.clone(),
        events.clone(),
        DiscoverySettings {
            interval: discovery_interval,
            window: Duration::from_secs(config.get_discovery_window_secs()),
            // A device may miss two cycles before dropping off.
            stale_after: discovery_interval * 3,
            ..DiscoverySettings::default()
        },
    );

    let blackout = Arc::new(BlackoutCoordinator::new(
        registry.clone(),
        sessions.clone(),
        supervisor.clone(),
        events.clone(),
        base_url.clone(),
        config.get_blackout_clip()?,
    ));

    let _controller = Arc::new(CastController::new(
        registry.clone(),
        sessions.clone(),
        supervisor.clone(),
        discovery.clone(),
        blackout,
        events.clone(),
    ));

    // ---- Configured devices ----------------------------------------------
    let media_root = config.get_media_root();
    for seeded in config.seeded_devices() {
        let Some(protocol) = ProtocolKind::from_config(&seeded.protocol) else {
            warn!("Skipping device '{}': unknown protocol '{}'", seeded.name, seeded.protocol);
            continue;
        };
        let id = DeviceId(seeded.id.clone().unwrap_or_else(|| seeded.host.clone()));
        let content = seeded.content.as_ref().map(|c| {
            let path = std::path::Path::new(c);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                media_root.join(path)
            };
            ContentSpec::new(c, path, true)
        });
        registry.insert_static(StaticDeviceSpec {
            id,
            name: seeded.name.clone(),
            protocol,
            endpoint: format!("http://{}", seeded.host),
            group: seeded.group.clone(),
            content,
        });
    }
    info!("{} device(s) seeded from configuration", registry.all().len());

    // ---- Background loops ------------------------------------------------
    let discovery_handle = discovery.start();
    let supervisor_handle = supervisor.start();

    // Periodic purge of ended sessions.
    let retention = Duration::from_secs(config.get_session_retention_secs().max(60));
    let gc_sessions = sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(retention / 2);
        loop {
            ticker.tick().await;
            gc_sessions.collect_ended(retention);
        }
    });

    // ---- Streaming server ------------------------------------------------
    let server = StreamServer::new(sessions.clone(), config.get_http_port());
    let server_task = tokio::spawn(server.run());

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => warn!("Streaming server exited"),
                Ok(Err(e)) => warn!("Streaming server failed: {}", e),
                Err(e) => warn!("Streaming server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    // Let in-flight per-device work complete rather than killing it.
    discovery.shutdown();
    supervisor.shutdown();
    let _ = tokio::task::spawn_blocking(move || {
        let _ = discovery_handle.join();
        let _ = supervisor_handle.join();
    })
    .await;

    info!("Wallcast stopped");
    Ok(())
}
