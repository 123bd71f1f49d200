//! Device registry: the single source of truth for known renderers.
//!
//! The map itself is behind an `RwLock`, but every mutable field of a
//! device lives in that device's own `Mutex`, so operations on different
//! devices never contend and operations on one device are serialized.

use crate::clients::{AvTransportClient, ControlBackend, TranscreenClient};
use crate::description::DeviceDescription;
use crate::errors::ControlError;
use crate::model::{
    ConnectionStatus, ContentSpec, DeviceId, PlaybackState, ProtocolKind, SupervisorState,
    UserControl,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Client construction parameters shared by every backend.
#[derive(Clone, Copy, Debug)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            retries: 2,
        }
    }
}

/// Mutable state of a device, serialized through the device's mutex.
#[derive(Debug)]
pub struct DeviceState {
    pub connection: ConnectionStatus,
    pub playback: PlaybackState,
    pub supervisor: SupervisorState,
    pub user_control: UserControl,
    /// Content the supervisor should keep on this device.
    pub desired: Option<ContentSpec>,
    /// Token of the device's current streaming session.
    pub current_session: Option<String>,
    pub last_discovered_at: Option<Instant>,
    pub group: Option<String>,
    /// Consecutive transport-poll failures.
    pub poll_failures: u32,
    /// Consecutive play-command failures, drives the backoff.
    pub play_failures: u32,
    /// Reconciliation is skipped for this device until this instant.
    pub next_attempt_at: Option<Instant>,
    /// When the device entered `ConnectionStatus::Error`.
    pub error_since: Option<Instant>,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            connection: ConnectionStatus::Disconnected,
            playback: PlaybackState::Idle,
            supervisor: SupervisorState::Idle,
            user_control: UserControl::auto(),
            desired: None,
            current_session: None,
            last_discovered_at: None,
            group: None,
            poll_failures: 0,
            play_failures: 0,
            next_attempt_at: None,
            error_since: None,
        }
    }

    /// Applies a connection transition if it is legal, returning whether it
    /// was applied. Illegal jumps are logged and ignored.
    pub fn transition_connection(&mut self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        let legal = matches!(
            (self.connection, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Error)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Error, Disconnected)
        ) || self.connection == next;

        if !legal {
            warn!(
                "Ignoring illegal connection transition {:?} -> {:?}",
                self.connection, next
            );
            return false;
        }

        self.error_since = match next {
            ConnectionStatus::Error => Some(Instant::now()),
            _ => None,
        };
        self.connection = next;
        true
    }
}

/// One known renderer.
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub protocol: ProtocolKind,
    /// Provenance tag only ("ssdp", "config", ...). It may legitimately
    /// disagree with `protocol`; never dispatch on it.
    pub discovery_method: String,
    pub backend: ControlBackend,
    state: Mutex<DeviceState>,
}

impl Device {
    pub fn new(
        id: DeviceId,
        name: String,
        protocol: ProtocolKind,
        discovery_method: &str,
        backend: ControlBackend,
    ) -> Self {
        Self {
            id,
            name,
            protocol,
            discovery_method: discovery_method.to_string(),
            backend,
            state: Mutex::new(DeviceState::new()),
        }
    }

    /// Locks the device state. Callers hold this across a whole
    /// read-decide-write step; never across a network call.
    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }
}

/// A statically configured device, registered without discovery.
#[derive(Clone, Debug)]
pub struct StaticDeviceSpec {
    pub id: DeviceId,
    pub name: String,
    pub protocol: ProtocolKind,
    /// Transcreen: base URL. DLNA: AVTransport control URL.
    pub endpoint: String,
    pub group: Option<String>,
    pub content: Option<ContentSpec>,
}

/// Registry of all devices.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, Arc<Device>>>,
    settings: ClientSettings,
}

impl DeviceRegistry {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.read().unwrap().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Device>> {
        self.devices.read().unwrap().values().cloned().collect()
    }

    pub fn connected(&self) -> Vec<Arc<Device>> {
        self.all()
            .into_iter()
            .filter(|d| d.state().connection == ConnectionStatus::Connected)
            .collect()
    }

    /// Explicit operator removal; the only way a device leaves the registry.
    pub fn remove(&self, id: &DeviceId) -> Option<Arc<Device>> {
        let removed = self.devices.write().unwrap().remove(id);
        if removed.is_some() {
            info!("Device {} removed by operator", id);
        }
        removed
    }

    /// Marks a known device as freshly discovered, reconnecting it if it
    /// had dropped off. Returns `None` for unknown devices.
    pub fn touch(&self, id: &DeviceId) -> Option<Arc<Device>> {
        let device = self.get(id)?;
        let mut state = device.state();
        state.last_discovered_at = Some(Instant::now());
        match state.connection {
            ConnectionStatus::Disconnected => {
                state.transition_connection(ConnectionStatus::Connecting);
                state.transition_connection(ConnectionStatus::Connected);
                info!("Device {} rediscovered", device.name);
            }
            ConnectionStatus::Error => {
                state.transition_connection(ConnectionStatus::Disconnected);
                state.transition_connection(ConnectionStatus::Connecting);
                state.transition_connection(ConnectionStatus::Connected);
                info!("Device {} recovered via discovery", device.name);
            }
            _ => {}
        }
        drop(state);
        Some(device)
    }

    /// Upserts a device found by SSDP discovery.
    ///
    /// Known devices get their `last_discovered_at` bumped and are brought
    /// back to Connected if they had dropped off. New devices need an
    /// AVTransport endpoint; anything else on the LAN is ignored.
    pub fn upsert_discovered(
        &self,
        description: &DeviceDescription,
    ) -> Result<(Arc<Device>, bool), ControlError> {
        let id = DeviceId(description.udn.clone());

        if let Some(device) = self.touch(&id) {
            return Ok((device, false));
        }

        let endpoint = description.av_transport.as_ref().ok_or_else(|| {
            ControlError::Description(format!("{} has no AVTransport service", description.udn))
        })?;

        let backend = ControlBackend::Dlna(AvTransportClient::new(
            endpoint.control_url.clone(),
            endpoint.service_type.clone(),
            self.settings.timeout,
            self.settings.retries,
        ));

        let device = Arc::new(Device::new(
            id.clone(),
            description.friendly_name.clone(),
            ProtocolKind::Dlna,
            "ssdp",
            backend,
        ));
        {
            let mut state = device.state();
            state.last_discovered_at = Some(Instant::now());
            state.transition_connection(ConnectionStatus::Connecting);
            state.transition_connection(ConnectionStatus::Connected);
        }

        info!("Discovered new renderer '{}' ({})", device.name, id);
        self.devices.write().unwrap().insert(id, device.clone());
        Ok((device, true))
    }

    /// Registers a statically configured device.
    ///
    /// Registration counts as its discovery: the device goes straight to
    /// Connected and the first failing control call will degrade it.
    pub fn insert_static(&self, spec: StaticDeviceSpec) -> Arc<Device> {
        let backend = match spec.protocol {
            ProtocolKind::Transcreen => ControlBackend::Transcreen(TranscreenClient::new(
                spec.endpoint.clone(),
                self.settings.timeout,
                self.settings.retries,
            )),
            ProtocolKind::Dlna => ControlBackend::Dlna(AvTransportClient::new(
                spec.endpoint.clone(),
                "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
                self.settings.timeout,
                self.settings.retries,
            )),
        };

        let device = Arc::new(Device::new(
            spec.id.clone(),
            spec.name,
            spec.protocol,
            "config",
            backend,
        ));
        {
            let mut state = device.state();
            state.group = spec.group;
            state.desired = spec.content;
            state.last_discovered_at = Some(Instant::now());
            state.transition_connection(ConnectionStatus::Connecting);
            state.transition_connection(ConnectionStatus::Connected);
        }

        info!("Registered configured device '{}' ({})", device.name, spec.id);
        self.devices
            .write()
            .unwrap()
            .insert(spec.id, device.clone());
        device
    }

    /// Degrades SSDP devices not seen within `max_age` toward Disconnected
    /// and returns the devices that just dropped off. Never deletes.
    pub fn expire_stale(&self, max_age: Duration) -> Vec<DeviceId> {
        let cutoff = Instant::now() - max_age;
        let mut lost = Vec::new();
        for device in self.all() {
            if device.discovery_method != "ssdp" {
                continue;
            }
            let mut state = device.state();
            let stale = state.last_discovered_at.is_none_or(|t| t < cutoff);
            if stale && state.connection == ConnectionStatus::Connected {
                state.transition_connection(ConnectionStatus::Disconnected);
                debug!("Device {} missed discovery, now disconnected", device.name);
                lost.push(device.id.clone());
            }
        }
        lost
    }

    /// Moves devices out of Error back to Disconnected once `backoff` has
    /// elapsed, making them eligible for rediscovery.
    pub fn recover_errored(&self, backoff: Duration) {
        let now = Instant::now();
        for device in self.all() {
            let mut state = device.state();
            if state.connection == ConnectionStatus::Error
                && state.error_since.is_some_and(|t| now >= t + backoff)
            {
                state.transition_connection(ConnectionStatus::Disconnected);
                debug!("Device {} error backoff elapsed", device.name);
            }
        }
    }

    #[cfg(test)]
    pub fn insert_fake(
        &self,
        id: &str,
        fake: crate::clients::fake::FakeTransport,
    ) -> Arc<Device> {
        let device = Arc::new(Device::new(
            DeviceId::from(id),
            id.to_string(),
            ProtocolKind::Dlna,
            "test",
            ControlBackend::Fake(fake),
        ));
        {
            let mut state = device.state();
            state.transition_connection(ConnectionStatus::Connecting);
            state.transition_connection(ConnectionStatus::Connected);
        }
        self.devices
            .write()
            .unwrap()
            .insert(device.id.clone(), device.clone());
        device
    }
}
