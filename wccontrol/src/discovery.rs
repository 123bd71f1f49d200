//! Periodic SSDP discovery of renderers.

use crate::description;
use crate::events::{CastEvent, EventBus};
use crate::registry::DeviceRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wcupnp::ssdp::{SsdpClient, SsdpResponse, ST_ALL, ST_AVTRANSPORT};

#[derive(Clone, Copy, Debug)]
pub struct DiscoverySettings {
    /// Time between probe cycles.
    pub interval: Duration,
    /// How long each cycle listens for replies.
    pub window: Duration,
    /// Devices unseen for this long are marked disconnected.
    pub stale_after: Duration,
    /// Devices in Error fall back to Disconnected after this.
    pub error_backoff: Duration,
    pub description_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            window: Duration::from_secs(5),
            stale_after: Duration::from_secs(90),
            error_backoff: Duration::from_secs(60),
            description_timeout: Duration::from_secs(3),
        }
    }
}

/// Repeating background probe that feeds the device registry.
pub struct DiscoveryEngine {
    registry: Arc<DeviceRegistry>,
    events: Arc<EventBus>,
    settings: DiscoverySettings,
    paused: AtomicBool,
    stop: AtomicBool,
}

impl DiscoveryEngine {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        events: Arc<EventBus>,
        settings: DiscoverySettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            events,
            settings,
            paused: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        })
    }

    /// While paused no probes are sent; reconciliation and streaming are
    /// untouched.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Discovery paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Discovery resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Stops the loop after the current cycle; in-flight work completes.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Spawns the discovery loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        std::thread::Builder::new()
            .name("wc-discovery".to_string())
            .spawn(move || engine.run())
            .expect("failed to spawn discovery thread")
    }

    fn run(&self) {
        info!(
            "Discovery loop started (interval {:?}, window {:?})",
            self.settings.interval, self.settings.window
        );
        while !self.stop.load(Ordering::SeqCst) {
            if !self.is_paused() {
                self.run_cycle();
            }
            // Sleep in short slices so shutdown stays responsive.
            let deadline = Instant::now() + self.settings.interval;
            while Instant::now() < deadline && !self.stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
        info!("Discovery loop stopped");
    }

    /// One probe cycle. Finding nothing is normal; a socket failure is
    /// logged and retried on the next cycle.
    fn run_cycle(&self) {
        let client = match SsdpClient::new() {
            Ok(c) => c,
            Err(e) => {
                warn!("SSDP socket setup failed, retrying next cycle: {}", e);
                return;
            }
        };

        let mx = self.settings.window.as_secs().max(1) as u32;
        for st in [ST_AVTRANSPORT, ST_ALL] {
            if let Err(e) = client.send_msearch(st, mx) {
                warn!("M-SEARCH send failed for {}: {}", st, e);
            }
        }

        let replies = client.collect_responses(self.settings.window);
        let renderers = select_renderer_replies(replies);
        debug!("Discovery cycle: {} renderer repl(ies)", renderers.len());

        for (udn, reply) in renderers {
            if self.registry.touch(&udn.as_str().into()).is_some() {
                continue;
            }

            let desc =
                match description::fetch_description(&reply.location, self.settings.description_timeout)
                {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Could not read description at {}: {}", reply.location, e);
                        continue;
                    }
                };

            match self.registry.upsert_discovered(&desc) {
                Ok((device, true)) => self.events.publish(CastEvent::DeviceDiscovered {
                    device: device.id.clone(),
                    name: device.name.clone(),
                }),
                Ok((_, false)) => {}
                Err(e) => debug!("Skipping {}: {}", reply.location, e),
            }
        }

        for lost in self.registry.expire_stale(self.settings.stale_after) {
            self.events.publish(CastEvent::DeviceLost { device: lost });
        }
        self.registry.recover_errored(self.settings.error_backoff);
    }
}

/// Keeps replies advertising the AVTransport service, deduplicated by UDN.
fn select_renderer_replies(replies: Vec<SsdpResponse>) -> HashMap<String, SsdpResponse> {
    let mut by_udn = HashMap::new();
    for reply in replies {
        if !reply.st.contains("AVTransport") {
            continue;
        }
        let Some(udn) = reply.udn() else {
            continue;
        };
        by_udn.entry(udn).or_insert(reply);
    }
    by_udn
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn reply(st: &str, usn: &str) -> SsdpResponse {
        SsdpResponse {
            usn: usn.to_string(),
            st: st.to_string(),
            location: "http://192.168.1.20:49152/description.xml".to_string(),
            server: "test".to_string(),
            max_age: 1800,
            from: "192.168.1.20:1900".parse::<SocketAddr>().unwrap(),
        }
    }

    #[test]
    fn non_renderer_services_are_filtered_out() {
        let selected = select_renderer_replies(vec![
            reply(
                "urn:schemas-upnp-org:service:AVTransport:1",
                "uuid:tv-1::urn:schemas-upnp-org:service:AVTransport:1",
            ),
            reply(
                "urn:schemas-upnp-org:service:ContentDirectory:1",
                "uuid:nas-1::urn:schemas-upnp-org:service:ContentDirectory:1",
            ),
            reply("upnp:rootdevice", "uuid:router-1::upnp:rootdevice"),
        ]);
        assert_eq!(selected.len(), 1);
        assert!(selected.contains_key("uuid:tv-1"));
    }

    #[test]
    fn duplicate_replies_collapse_by_udn() {
        let selected = select_renderer_replies(vec![
            reply(
                "urn:schemas-upnp-org:service:AVTransport:1",
                "uuid:tv-1::urn:schemas-upnp-org:service:AVTransport:1",
            ),
            reply(
                "urn:schemas-upnp-org:service:AVTransport:2",
                "uuid:TV-1::urn:schemas-upnp-org:service:AVTransport:2",
            ),
        ]);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn replies_without_uuid_are_dropped() {
        let selected = select_renderer_replies(vec![reply(
            "urn:schemas-upnp-org:service:AVTransport:1",
            "not-a-uuid",
        )]);
        assert!(selected.is_empty());
    }

    #[test]
    fn pause_resume_toggle() {
        let registry = Arc::new(DeviceRegistry::new(Default::default()));
        let engine = DiscoveryEngine::new(
            registry,
            Arc::new(EventBus::new()),
            DiscoverySettings::default(),
        );
        assert!(!engine.is_paused());
        engine.pause();
        assert!(engine.is_paused());
        engine.resume();
        assert!(!engine.is_paused());
    }
}
