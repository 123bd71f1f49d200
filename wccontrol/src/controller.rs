//! Facade the API layer drives.
//!
//! Bundles the registry, discovery, supervisor and blackout coordinator
//! behind the handful of operations an operator actually performs, and
//! flattens device state into serializable views.

use crate::blackout::{BlackoutCoordinator, BlackoutReport, BlackoutStatus};
use crate::discovery::DiscoveryEngine;
use crate::errors::ControlError;
use crate::events::{CastEvent, EventBus};
use crate::model::{ContentSpec, ControlMode, DeviceId};
use crate::registry::DeviceRegistry;
use crate::supervisor::PlaybackSupervisor;
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};
use wcstream::sessions::{SessionRegistry, SessionStatus};

/// Flattened device state for the API layer.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceView {
    pub id: String,
    pub name: String,
    pub protocol: String,
    pub discovery_method: String,
    pub connection: String,
    pub playback: String,
    pub supervisor: String,
    pub control_mode: String,
    /// Seconds until a user hold expires, if bounded.
    pub override_remaining_secs: Option<u64>,
    pub current_session: Option<String>,
    pub group: Option<String>,
}

/// Progress of a device's current session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionProgress {
    pub content_ref: String,
    pub position_secs: Option<u64>,
    pub duration_secs: Option<u64>,
    pub bytes_requested: u64,
    pub paused: bool,
    pub active: bool,
}

pub struct CastController {
    registry: Arc<DeviceRegistry>,
    sessions: Arc<SessionRegistry>,
    supervisor: Arc<PlaybackSupervisor>,
    discovery: Arc<DiscoveryEngine>,
    blackout: Arc<BlackoutCoordinator>,
    events: Arc<EventBus>,
    /// Last brightness the operator set; only the 0 boundary acts.
    brightness: Mutex<u8>,
}

impl CastController {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        sessions: Arc<SessionRegistry>,
        supervisor: Arc<PlaybackSupervisor>,
        discovery: Arc<DiscoveryEngine>,
        blackout: Arc<BlackoutCoordinator>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            sessions,
            supervisor,
            discovery,
            blackout,
            events,
            brightness: Mutex::new(100),
        }
    }

    pub fn subscribe(&self) -> Receiver<CastEvent> {
        self.events.subscribe()
    }

    /// Plays `content` on a device, overriding any hold.
    pub fn play_content(&self, id: &DeviceId, content: ContentSpec) -> Result<(), ControlError> {
        info!("Operator play: {} on {}", content.content_ref, id);
        self.supervisor.request_play(id, content)
    }

    /// Stops a device; the override window keeps it stopped.
    pub fn stop_device(&self, id: &DeviceId) -> Result<(), ControlError> {
        info!("Operator stop: {}", id);
        self.supervisor.manual_stop(id)
    }

    /// Operator removal, the only hard deletion of a device.
    pub fn remove_device(&self, id: &DeviceId) -> Result<(), ControlError> {
        self.registry
            .remove(id)
            .map(|_| self.sessions.end_for_device(id.as_str()))
            .ok_or_else(|| ControlError::UnknownDevice(id.to_string()))
    }

    pub fn pause_discovery(&self) {
        self.discovery.pause();
    }

    pub fn resume_discovery(&self) {
        self.discovery.resume();
    }

    /// Sets the global brightness (0-100).
    ///
    /// Only the zero boundary drives displays: dropping to 0 activates the
    /// blackout, leaving 0 restores. Intermediate values are recorded for
    /// the dashboard but change nothing on the devices.
    pub fn set_brightness(&self, level: u8) -> Option<BlackoutReport> {
        let level = level.min(100);
        let previous = {
            let mut brightness = self.brightness.lock().unwrap();
            let previous = *brightness;
            *brightness = level;
            previous
        };

        if level == 0 && previous > 0 {
            Some(self.blackout.activate())
        } else if level > 0 && previous == 0 {
            Some(self.blackout.restore())
        } else {
            debug!("Brightness {} -> {}: no display action", previous, level);
            None
        }
    }

    pub fn brightness(&self) -> u8 {
        *self.brightness.lock().unwrap()
    }

    pub fn blackout_status(&self) -> BlackoutStatus {
        self.blackout.status()
    }

    /// Current state of every known device.
    pub fn device_states(&self) -> Vec<DeviceView> {
        let now = Instant::now();
        let mut views: Vec<DeviceView> = self
            .registry
            .all()
            .into_iter()
            .map(|device| {
                let state = device.state();
                DeviceView {
                    id: device.id.to_string(),
                    name: device.name.clone(),
                    protocol: device.protocol.to_string(),
                    discovery_method: device.discovery_method.clone(),
                    connection: format!("{:?}", state.connection).to_lowercase(),
                    playback: format!("{:?}", state.playback).to_lowercase(),
                    supervisor: format!("{:?}", state.supervisor).to_lowercase(),
                    control_mode: match state.user_control.mode {
                        ControlMode::Auto => "auto",
                        ControlMode::User => "user",
                        ControlMode::System => "system",
                    }
                    .to_string(),
                    override_remaining_secs: state
                        .user_control
                        .expires_at
                        .map(|e| e.saturating_duration_since(now).as_secs()),
                    current_session: state.current_session.clone(),
                    group: state.group.clone(),
                }
            })
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Progress of a device's current (or most recent) session.
    pub fn session_progress(&self, id: &DeviceId) -> Option<SessionProgress> {
        let device = self.registry.get(id)?;
        let token = device.state().current_session.clone()?;
        let session = self.sessions.lookup(&token)?;
        Some(SessionProgress {
            content_ref: session.content_ref,
            position_secs: session.position.map(|d| d.as_secs()),
            duration_secs: session.duration.map(|d| d.as_secs()),
            bytes_requested: session.bytes_requested,
            paused: session.paused,
            active: session.status == SessionStatus::Active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fake::FakeTransport;
    use crate::discovery::DiscoverySettings;
    use crate::model::PlaybackState;
    use crate::registry::ClientSettings;
    use crate::supervisor::SupervisorSettings;
    use std::io::Write;

    struct Fixture {
        controller: CastController,
        registry: Arc<DeviceRegistry>,
        _black: tempfile::NamedTempFile,
        _clip: tempfile::NamedTempFile,
        content: ContentSpec,
    }

    fn fixture() -> Fixture {
        let mut black = tempfile::NamedTempFile::with_suffix(".mp4").unwrap();
        black.write_all(b"black").unwrap();
        let mut clip = tempfile::NamedTempFile::with_suffix(".mp4").unwrap();
        clip.write_all(b"clip").unwrap();
        let content = ContentSpec::new("intro.mp4", clip.path(), true);

        let registry = Arc::new(DeviceRegistry::new(ClientSettings::default()));
        let sessions = Arc::new(SessionRegistry::new());
        let events = Arc::new(EventBus::new());
        let base = "http://192.168.1.10:8090".to_string();
        let supervisor = PlaybackSupervisor::new(
            registry.clone(),
            sessions.clone(),
            events.clone(),
            base.clone(),
            SupervisorSettings::default(),
        );
        let discovery =
            DiscoveryEngine::new(registry.clone(), events.clone(), DiscoverySettings::default());
        let blackout = Arc::new(BlackoutCoordinator::new(
            registry.clone(),
            sessions.clone(),
            supervisor.clone(),
            events.clone(),
            base,
            black.path().to_path_buf(),
        ));
        let controller = CastController::new(
            registry.clone(),
            sessions,
            supervisor,
            discovery,
            blackout,
            events,
        );
        Fixture {
            controller,
            registry,
            _black: black,
            _clip: clip,
            content,
        }
    }

    #[test]
    fn brightness_round_trip_drives_blackout() {
        let f = fixture();
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        f.controller
            .play_content(&device.id, f.content.clone())
            .unwrap();

        let report = f.controller.set_brightness(0).unwrap();
        assert_eq!(report.affected.len(), 1);
        assert!(f.controller.blackout_status().active);

        let report = f.controller.set_brightness(100).unwrap();
        assert_eq!(report.affected.len(), 1);
        assert!(!f.controller.blackout_status().active);
        assert_eq!(device.state().playback, PlaybackState::Playing);
    }

    #[test]
    fn intermediate_brightness_changes_are_inert() {
        let f = fixture();
        let fake = FakeTransport::new();
        f.registry.insert_fake("uuid:tv-1", fake.clone());

        assert!(f.controller.set_brightness(50).is_none());
        assert!(f.controller.set_brightness(80).is_none());
        assert_eq!(f.controller.brightness(), 80);
        assert_eq!(fake.command_count(), 0);
        assert!(!f.controller.blackout_status().active);
    }

    #[test]
    fn device_states_reflect_playback() {
        let f = fixture();
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake);
        f.controller
            .play_content(&device.id, f.content.clone())
            .unwrap();

        let views = f.controller.device_states();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].connection, "connected");
        assert_eq!(views[0].playback, "playing");
        assert_eq!(views[0].control_mode, "auto");
        assert!(views[0].current_session.is_some());
    }

    #[test]
    fn session_progress_reports_current_content() {
        let f = fixture();
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake);
        f.controller
            .play_content(&device.id, f.content.clone())
            .unwrap();

        let progress = f.controller.session_progress(&device.id).unwrap();
        assert_eq!(progress.content_ref, "intro.mp4");
        assert!(progress.active);
    }

    #[test]
    fn removing_an_unknown_device_errors() {
        let f = fixture();
        assert!(matches!(
            f.controller.remove_device(&DeviceId::from("uuid:none")),
            Err(ControlError::UnknownDevice(_))
        ));
    }
}
