//! Playback supervisor: per-device reconciliation.
//!
//! Every device gets a worker thread running a reconcile pass on a fixed
//! interval. A pass compares what the device should be playing with what it
//! reports and issues the necessary commands. Operator commands install a
//! time-boxed hold evaluated by timestamp comparison at each pass; while a
//! hold is active the pass does nothing, which is what prevents a manual
//! stop from being immediately undone by the next pass.

use crate::capabilities::{TransportControl, TransportStatus};
use crate::errors::ControlError;
use crate::events::{CastEvent, EventBus};
use crate::model::{
    ConnectionStatus, ContentSpec, ControlMode, DeviceId, PlaybackState, SupervisorState,
    UserControl,
};
use crate::registry::{Device, DeviceRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wcstream::sessions::SessionRegistry;

#[derive(Clone, Copy, Debug)]
pub struct SupervisorSettings {
    /// Spacing between reconcile passes of one device.
    pub interval: Duration,
    /// Hold installed by a manual stop.
    pub override_window: Duration,
    /// Consecutive transport-poll failures tolerated before the pass
    /// treats the device as not playing.
    pub poll_failure_threshold: u32,
    /// Consecutive play failures before the device enters Error.
    pub max_play_failures: u32,
    /// Base of the exponential retry backoff.
    pub backoff_base: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            override_window: Duration::from_secs(300),
            poll_failure_threshold: 3,
            max_play_failures: 3,
            backoff_base: Duration::from_secs(5),
        }
    }
}

pub struct PlaybackSupervisor {
    registry: Arc<DeviceRegistry>,
    sessions: Arc<SessionRegistry>,
    events: Arc<EventBus>,
    /// Base URL devices use to reach the streaming server.
    base_url: String,
    settings: SupervisorSettings,
    stop: AtomicBool,
    workers: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
}

impl PlaybackSupervisor {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        sessions: Arc<SessionRegistry>,
        events: Arc<EventBus>,
        base_url: String,
        settings: SupervisorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            sessions,
            events,
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
            stop: AtomicBool::new(false),
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns the manager thread that keeps one worker alive per device.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = self.clone();
        std::thread::Builder::new()
            .name("wc-supervisor".to_string())
            .spawn(move || supervisor.manage_workers())
            .expect("failed to spawn supervisor thread")
    }

    /// Stops the manager and lets workers finish their current pass.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn manage_workers(self: Arc<Self>) {
        info!("Supervisor started (interval {:?})", self.settings.interval);
        while !self.stop.load(Ordering::SeqCst) {
            for device in self.registry.all() {
                let mut workers = self.workers.lock().unwrap();
                let stale = workers
                    .get(&device.id)
                    .map(|h| h.is_finished())
                    .unwrap_or(true);
                if stale {
                    let supervisor = self.clone();
                    let id = device.id.clone();
                    let handle = std::thread::Builder::new()
                        .name(format!("wc-device-{}", id))
                        .spawn(move || supervisor.worker_loop(id))
                        .expect("failed to spawn device worker");
                    workers.insert(device.id.clone(), handle);
                }
            }
            std::thread::sleep(Duration::from_millis(500));
        }
        info!("Supervisor stopped");
    }

    /// Per-device loop; exits when the device is removed or on shutdown.
    fn worker_loop(self: Arc<Self>, id: DeviceId) {
        debug!("Worker started for {}", id);
        while !self.stop.load(Ordering::SeqCst) {
            let Some(device) = self.registry.get(&id) else {
                break;
            };
            self.reconcile(&device);

            let deadline = Instant::now() + self.settings.interval;
            while Instant::now() < deadline && !self.stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
        debug!("Worker stopped for {}", id);
    }

    /// One reconcile pass for one device.
    ///
    /// The device mutex is held for reads and state writes only, never
    /// across a network call.
    pub fn reconcile(&self, device: &Arc<Device>) {
        let now = Instant::now();

        let desired = {
            let mut state = device.state();

            if state.connection != ConnectionStatus::Connected {
                return;
            }

            if state.user_control.holds_at(now) {
                debug!("{} held ({:?}), skipping pass", device.id, state.user_control.reason);
                return;
            }

            // Hold expired: revert to autonomous control.
            if state.user_control.mode != ControlMode::Auto {
                info!("Override expired for {}, back to auto", device.id);
                state.user_control = UserControl::auto();
                if state.supervisor == SupervisorState::UserPaused {
                    state.supervisor = SupervisorState::Idle;
                }
            }

            if state.next_attempt_at.is_some_and(|t| now < t) {
                return;
            }

            match &state.desired {
                Some(content) => content.clone(),
                None => return,
            }
        };

        // Transport poll, outside the lock.
        let actual = match device.backend.transport_state() {
            Ok(actual) => {
                device.state().poll_failures = 0;
                Some(actual)
            }
            Err(e) => {
                let failures = {
                    let mut state = device.state();
                    state.poll_failures += 1;
                    state.poll_failures
                };
                if failures < self.settings.poll_failure_threshold {
                    debug!(
                        "Poll failure {}/{} for {}: {}",
                        failures, self.settings.poll_failure_threshold, device.id, e
                    );
                    return;
                }
                // Threshold crossed: treat the device as not playing.
                warn!("{} unresponsive to {} consecutive polls", device.id, failures);
                None
            }
        };

        if let Some(actual) = actual {
            device.state().playback = actual;

            if actual == PlaybackState::Playing && self.session_matches(device, &desired) {
                device.state().supervisor = SupervisorState::Playing;
                self.refresh_progress(device);
                return;
            }

            // A buffering device was just told to play; give it time.
            if actual == PlaybackState::Buffering && self.session_matches(device, &desired) {
                return;
            }
        }

        self.attempt_play(device, &desired);
    }

    /// True if the device's current session is active and carries the
    /// desired content.
    fn session_matches(&self, device: &Device, desired: &ContentSpec) -> bool {
        let token = match &device.state().current_session {
            Some(token) => token.clone(),
            None => return false,
        };
        self.sessions
            .active_for(device.id.as_str())
            .is_some_and(|s| s.token == token && s.content_ref == desired.content_ref)
    }

    fn refresh_progress(&self, device: &Device) {
        let Some(token) = device.state().current_session.clone() else {
            return;
        };
        match device.backend.transport_position() {
            Ok(p) => self.sessions.update_position(&token, p.position, p.duration),
            Err(e) => debug!("Position poll failed for {}: {}", device.id, e),
        }
    }

    /// Allocates a session and commands playback.
    fn attempt_play(&self, device: &Arc<Device>, desired: &ContentSpec) {
        {
            let mut state = device.state();
            // The transport poll ran outside the lock; a hold may have
            // landed since the pass started. Held devices get no commands.
            if state.user_control.holds_at(Instant::now()) {
                debug!("{} held mid-pass, dropping play command", device.id);
                return;
            }
            state.supervisor = SupervisorState::Requesting;
        }

        let session = match self
            .sessions
            .allocate(device.id.as_str(), &desired.content_ref, &desired.path)
        {
            Ok(s) => s,
            Err(e) => {
                warn!("Session allocation failed for {}: {}", device.id, e);
                self.register_play_failure(device, &e.into());
                return;
            }
        };

        let url = format!("{}/stream/{}", self.base_url, session.token);
        match device.backend.play_url(&url, desired.looped) {
            Ok(()) => {
                let mut state = device.state();
                state.current_session = Some(session.token);
                state.supervisor = SupervisorState::Playing;
                state.playback = PlaybackState::Playing;
                state.play_failures = 0;
                state.next_attempt_at = None;
                drop(state);
                info!("{} now playing {}", device.id, desired.content_ref);
                self.events.publish(CastEvent::PlaybackStarted {
                    device: device.id.clone(),
                    content_ref: desired.content_ref.clone(),
                });
            }
            Err(e) => {
                // The session never started; do not leave it servable.
                self.sessions.end_for_device(device.id.as_str());
                self.register_play_failure(device, &e);
            }
        }
    }

    /// Bounded retry with exponential backoff; past the threshold the
    /// device is in Error but later passes still retry it.
    fn register_play_failure(&self, device: &Arc<Device>, error: &ControlError) {
        let mut state = device.state();
        state.play_failures += 1;
        let exponent = state.play_failures.min(6);
        let backoff = self.settings.backoff_base * 2u32.pow(exponent - 1);
        state.next_attempt_at = Some(Instant::now() + backoff);

        if state.play_failures >= self.settings.max_play_failures {
            if state.supervisor != SupervisorState::Error {
                warn!("{} marked Error after {} failures: {}", device.id, state.play_failures, error);
            }
            state.supervisor = SupervisorState::Error;
            drop(state);
            self.events.publish(CastEvent::DeviceErrored {
                device: device.id.clone(),
                reason: error.to_string(),
            });
        } else {
            debug!(
                "Play failed for {} ({}), retry in {:?}",
                device.id, error, backoff
            );
        }
    }

    /// Operator command: play `content` on a device now.
    ///
    /// Clears any hold and triggers an immediate pass.
    pub fn request_play(&self, id: &DeviceId, content: ContentSpec) -> Result<(), ControlError> {
        let device = self
            .registry
            .get(id)
            .ok_or_else(|| ControlError::UnknownDevice(id.to_string()))?;
        {
            let mut state = device.state();
            state.desired = Some(content);
            state.user_control = UserControl::auto();
            state.play_failures = 0;
            state.next_attempt_at = None;
        }
        self.reconcile(&device);
        Ok(())
    }

    /// Operator command: stop a device and hold it for the override window.
    ///
    /// Exactly one stop call is issued; reconciliation then skips the
    /// device until the window elapses, so the stop is not undone.
    pub fn manual_stop(&self, id: &DeviceId) -> Result<(), ControlError> {
        let device = self
            .registry
            .get(id)
            .ok_or_else(|| ControlError::UnknownDevice(id.to_string()))?;

        {
            let mut state = device.state();
            state.user_control = UserControl::user("manual_stop", self.settings.override_window);
            state.supervisor = SupervisorState::UserPaused;
        }

        let result = device.backend.stop();
        {
            let mut state = device.state();
            state.playback = PlaybackState::Idle;
            state.current_session = None;
        }
        self.sessions.end_for_device(id.as_str());
        self.events
            .publish(CastEvent::PlaybackStopped { device: id.clone() });

        // The hold stays even if the stop call failed: the operator asked
        // for silence, not for a retry loop.
        if let Err(e) = &result {
            warn!("Stop failed for {}: {}", id, e);
        }
        result
    }

    /// Installs a system hold (blackout); released explicitly.
    pub fn hold(&self, id: &DeviceId, reason: &str) -> Result<(), ControlError> {
        let device = self
            .registry
            .get(id)
            .ok_or_else(|| ControlError::UnknownDevice(id.to_string()))?;
        device.state().user_control = UserControl::system(reason);
        Ok(())
    }

    /// Lifts a hold and lets autonomous reconciliation resume.
    pub fn release(&self, id: &DeviceId) -> Result<(), ControlError> {
        let device = self
            .registry
            .get(id)
            .ok_or_else(|| ControlError::UnknownDevice(id.to_string()))?;
        let mut state = device.state();
        state.user_control = UserControl::auto();
        if state.supervisor == SupervisorState::UserPaused {
            state.supervisor = SupervisorState::Idle;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fake::{FakeCall, FakeTransport};
    use crate::registry::ClientSettings;
    use std::io::Write;

    struct Fixture {
        supervisor: Arc<PlaybackSupervisor>,
        registry: Arc<DeviceRegistry>,
        sessions: Arc<SessionRegistry>,
        _clip: tempfile::NamedTempFile,
        content: ContentSpec,
    }

    fn fixture(settings: SupervisorSettings) -> Fixture {
        let mut clip = tempfile::NamedTempFile::with_suffix(".mp4").unwrap();
        clip.write_all(b"clip").unwrap();
        let content = ContentSpec::new("intro.mp4", clip.path(), true);

        let registry = Arc::new(DeviceRegistry::new(ClientSettings::default()));
        let sessions = Arc::new(SessionRegistry::new());
        let supervisor = PlaybackSupervisor::new(
            registry.clone(),
            sessions.clone(),
            Arc::new(EventBus::new()),
            "http://192.168.1.10:8090".to_string(),
            settings,
        );
        Fixture {
            supervisor,
            registry,
            sessions,
            _clip: clip,
            content,
        }
    }

    fn quick_settings() -> SupervisorSettings {
        SupervisorSettings {
            interval: Duration::from_millis(10),
            override_window: Duration::from_millis(50),
            poll_failure_threshold: 3,
            max_play_failures: 2,
            backoff_base: Duration::from_secs(60),
        }
    }

    #[test]
    fn reconcile_starts_desired_content() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        device.state().desired = Some(f.content.clone());

        f.supervisor.reconcile(&device);

        let url = fake.last_play_url().unwrap();
        assert!(url.starts_with("http://192.168.1.10:8090/stream/"));
        assert_eq!(device.state().supervisor, SupervisorState::Playing);

        let session = f.sessions.active_for("uuid:tv-1").unwrap();
        assert_eq!(session.content_ref, "intro.mp4");
        assert!(url.ends_with(&session.token));
    }

    #[test]
    fn reconcile_is_quiet_when_device_already_plays_desired_content() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        device.state().desired = Some(f.content.clone());

        f.supervisor.reconcile(&device);
        let commands_after_start = fake.command_count();

        f.supervisor.reconcile(&device);
        f.supervisor.reconcile(&device);
        assert_eq!(fake.command_count(), commands_after_start);
    }

    #[test]
    fn manual_stop_issues_one_stop_and_holds_the_device() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        device.state().desired = Some(f.content.clone());
        f.supervisor.reconcile(&device);

        f.supervisor.manual_stop(&device.id).unwrap();

        let stops = fake
            .calls()
            .iter()
            .filter(|c| **c == FakeCall::Stop)
            .count();
        assert_eq!(stops, 1);
        assert_eq!(device.state().supervisor, SupervisorState::UserPaused);
        assert!(f.sessions.active_for("uuid:tv-1").is_none());

        // Passes inside the override window are no-ops: no restart loop.
        let commands = fake.command_count();
        f.supervisor.reconcile(&device);
        f.supervisor.reconcile(&device);
        assert_eq!(fake.command_count(), commands);

        // Once the window elapses the device resumes autonomously.
        std::thread::sleep(Duration::from_millis(60));
        f.supervisor.reconcile(&device);
        assert!(fake.command_count() > commands);
        assert_eq!(device.state().supervisor, SupervisorState::Playing);
    }

    #[test]
    fn isolated_poll_failures_are_tolerated() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        device.state().desired = Some(f.content.clone());
        f.supervisor.reconcile(&device);
        let commands = fake.command_count();

        fake.fail_status(true);
        f.supervisor.reconcile(&device);
        f.supervisor.reconcile(&device);
        // Below the threshold: no new commands issued.
        assert_eq!(fake.command_count(), commands);
        assert_eq!(device.state().poll_failures, 2);

        // Crossing the threshold treats the device as not playing.
        f.supervisor.reconcile(&device);
        assert!(fake.command_count() > commands);
    }

    #[test]
    fn repeated_play_failures_back_off_into_error() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        device.state().desired = Some(f.content.clone());
        fake.fail_commands(true);

        f.supervisor.reconcile(&device);
        assert_eq!(device.state().play_failures, 1);
        assert_ne!(device.state().supervisor, SupervisorState::Error);

        // Backoff gates the second attempt; clear it to simulate elapse.
        device.state().next_attempt_at = None;
        f.supervisor.reconcile(&device);
        assert_eq!(device.state().supervisor, SupervisorState::Error);

        // Still gated, not hot-looped.
        let polls = fake.poll_count();
        f.supervisor.reconcile(&device);
        assert_eq!(fake.poll_count(), polls);

        // And still retried once the backoff elapses.
        device.state().next_attempt_at = None;
        fake.fail_commands(false);
        f.supervisor.reconcile(&device);
        assert_eq!(device.state().supervisor, SupervisorState::Playing);
    }

    #[test]
    fn request_play_overrides_an_active_hold() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        device.state().desired = Some(f.content.clone());
        f.supervisor.reconcile(&device);
        f.supervisor.manual_stop(&device.id).unwrap();

        f.supervisor
            .request_play(&device.id, f.content.clone())
            .unwrap();
        assert_eq!(device.state().supervisor, SupervisorState::Playing);
        assert_eq!(device.state().user_control.mode, ControlMode::Auto);
    }

    #[test]
    fn system_hold_blocks_until_released() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        device.state().desired = Some(f.content.clone());

        f.supervisor.hold(&device.id, "blackout").unwrap();
        std::thread::sleep(Duration::from_millis(60));
        f.supervisor.reconcile(&device);
        // No expiry on a system hold.
        assert_eq!(fake.command_count(), 0);

        f.supervisor.release(&device.id).unwrap();
        f.supervisor.reconcile(&device);
        assert!(fake.command_count() > 0);
    }

    #[test]
    fn hold_installed_mid_pass_blocks_command_issuance() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        device.state().desired = Some(f.content.clone());

        // A blackout hold can land between a pass's initial hold check and
        // its command phase (the transport poll runs unlocked in between).
        // The command phase must then drop the command on the floor.
        f.supervisor.hold(&device.id, "blackout").unwrap();
        f.supervisor.attempt_play(&device, &f.content);

        assert_eq!(fake.command_count(), 0);
        assert!(f.sessions.active_for("uuid:tv-1").is_none());
        assert_ne!(device.state().supervisor, SupervisorState::Requesting);
    }

    #[test]
    fn disconnected_devices_are_left_alone() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());
        device.state().desired = Some(f.content.clone());
        device
            .state()
            .transition_connection(ConnectionStatus::Disconnected);

        f.supervisor.reconcile(&device);
        assert_eq!(fake.command_count(), 0);
        assert_eq!(fake.poll_count(), 0);
    }

    #[test]
    fn at_most_one_active_session_per_device() {
        let f = fixture(quick_settings());
        let fake = FakeTransport::new();
        let device = f.registry.insert_fake("uuid:tv-1", fake.clone());

        device.state().desired = Some(f.content.clone());
        f.supervisor.reconcile(&device);
        let first = f.sessions.active_for("uuid:tv-1").unwrap();

        let other = ContentSpec::new("other.mp4", f.content.path.clone(), false);
        f.supervisor.request_play(&device.id, other).unwrap();
        let second = f.sessions.active_for("uuid:tv-1").unwrap();

        assert_ne!(first.token, second.token);
        assert_eq!(
            f.sessions.lookup(&first.token).unwrap().status,
            wcstream::sessions::SessionStatus::Ended
        );
    }
}
