//! Cross-device blackout: force every connected display to a black clip,
//! then restore what each one was doing.
//!
//! Activation snapshots per-device state and installs a system hold so the
//! supervisor leaves the device alone. Devices proceed independently; a
//! device that fails to transition is reported and excluded, never blocks
//! the rest.

use crate::capabilities::TransportControl;
use crate::events::{CastEvent, EventBus};
use crate::model::{ContentSpec, DeviceId, PlaybackState};
use crate::registry::{Device, DeviceRegistry};
use crate::supervisor::PlaybackSupervisor;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use wcstream::sessions::SessionRegistry;

/// What a device was doing before the blackout.
///
/// Its existence is the authoritative "this device is blacked out" signal.
#[derive(Clone, Debug)]
pub struct BlackoutSnapshot {
    pub device_id: DeviceId,
    pub was_playing: bool,
    pub prior_content: Option<ContentSpec>,
    /// Best effort only; position-exact resume is not guaranteed.
    pub prior_position: Option<Duration>,
}

/// Outcome of an activate or restore pass.
#[derive(Clone, Debug, Default)]
pub struct BlackoutReport {
    /// Devices successfully transitioned by this pass.
    pub affected: Vec<DeviceId>,
    /// Per-device failures; the pass itself still completed.
    pub errors: Vec<(DeviceId, String)>,
}

#[derive(Clone, Debug)]
pub struct BlackoutStatus {
    pub active: bool,
    pub held_devices: Vec<DeviceId>,
}

pub struct BlackoutCoordinator {
    registry: Arc<DeviceRegistry>,
    sessions: Arc<SessionRegistry>,
    supervisor: Arc<PlaybackSupervisor>,
    events: Arc<EventBus>,
    /// Pre-provisioned clip shown during a blackout.
    black_clip: PathBuf,
    snapshots: Mutex<HashMap<DeviceId, BlackoutSnapshot>>,
    active: AtomicBool,
    /// Streaming base URL, same one the supervisor hands to devices.
    base_url: String,
}

impl BlackoutCoordinator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        sessions: Arc<SessionRegistry>,
        supervisor: Arc<PlaybackSupervisor>,
        events: Arc<EventBus>,
        base_url: String,
        black_clip: PathBuf,
    ) -> Self {
        Self {
            registry,
            sessions,
            supervisor,
            events,
            black_clip,
            snapshots: Mutex::new(HashMap::new()),
            active: AtomicBool::new(false),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> BlackoutStatus {
        BlackoutStatus {
            active: self.is_active(),
            held_devices: self.snapshots.lock().unwrap().keys().cloned().collect(),
        }
    }

    /// Blacks out every connected device that is not already held.
    ///
    /// Idempotent: devices with an existing snapshot are skipped, so a
    /// second call reports an empty affected list and retakes nothing.
    pub fn activate(&self) -> BlackoutReport {
        let targets: Vec<Arc<Device>> = {
            let snapshots = self.snapshots.lock().unwrap();
            self.registry
                .connected()
                .into_iter()
                .filter(|d| !snapshots.contains_key(&d.id))
                .collect()
        };

        let report = Mutex::new(BlackoutReport::default());
        std::thread::scope(|scope| {
            let report = &report;
            for device in &targets {
                scope.spawn(move || match self.black_out_device(device) {
                    Ok(snapshot) => {
                        self.snapshots
                            .lock()
                            .unwrap()
                            .insert(device.id.clone(), snapshot);
                        report.lock().unwrap().affected.push(device.id.clone());
                    }
                    Err(reason) => {
                        warn!("Blackout failed for {}: {}", device.id, reason);
                        // Leave the device to normal reconciliation.
                        let _ = self.supervisor.release(&device.id);
                        report
                            .lock()
                            .unwrap()
                            .errors
                            .push((device.id.clone(), reason));
                    }
                });
            }
        });

        self.active.store(true, Ordering::SeqCst);
        let report = report.into_inner().unwrap();
        info!(
            "Blackout activated: {} affected, {} error(s)",
            report.affected.len(),
            report.errors.len()
        );
        self.events.publish(CastEvent::BlackoutActivated {
            affected: report.affected.clone(),
        });
        report
    }

    fn black_out_device(&self, device: &Arc<Device>) -> Result<BlackoutSnapshot, String> {
        let snapshot = {
            let state = device.state();
            BlackoutSnapshot {
                device_id: device.id.clone(),
                was_playing: state.playback == PlaybackState::Playing,
                prior_content: state.desired.clone(),
                prior_position: self
                    .sessions
                    .active_for(device.id.as_str())
                    .and_then(|s| s.position),
            }
        };

        // Hold first so a reconcile pass cannot interleave with the clip.
        self.supervisor
            .hold(&device.id, "blackout")
            .map_err(|e| e.to_string())?;

        let session = self
            .sessions
            .allocate(device.id.as_str(), "blackout", &self.black_clip)
            .map_err(|e| e.to_string())?;

        let url = format!("{}/stream/{}", self.base_url, session.token);
        match device.backend.play_url(&url, true) {
            Ok(()) => {
                device.state().current_session = Some(session.token);
                Ok(snapshot)
            }
            Err(e) => {
                self.sessions.end_for_device(device.id.as_str());
                Err(e.to_string())
            }
        }
    }

    /// Restores every device with a snapshot.
    ///
    /// Snapshots are consumed up front: whatever happens during the
    /// attempt, a failed restore can never be replayed. The active flag
    /// clears once the pass completes, errors included.
    pub fn restore(&self) -> BlackoutReport {
        let snapshots: Vec<BlackoutSnapshot> = {
            let mut held = self.snapshots.lock().unwrap();
            std::mem::take(&mut *held).into_values().collect()
        };

        let report = Mutex::new(BlackoutReport::default());
        std::thread::scope(|scope| {
            let report = &report;
            for snapshot in &snapshots {
                scope.spawn(move || {
                    let outcome = self.restore_device(snapshot);
                    let mut report = report.lock().unwrap();
                    match outcome {
                        Ok(()) => report.affected.push(snapshot.device_id.clone()),
                        Err(reason) => {
                            warn!("Restore failed for {}: {}", snapshot.device_id, reason);
                            report.errors.push((snapshot.device_id.clone(), reason));
                        }
                    }
                });
            }
        });

        self.active.store(false, Ordering::SeqCst);
        let report = report.into_inner().unwrap();
        info!(
            "Blackout restored: {} device(s), {} error(s)",
            report.affected.len(),
            report.errors.len()
        );
        self.events.publish(CastEvent::BlackoutRestored {
            restored: report.affected.clone(),
        });
        report
    }

    fn restore_device(&self, snapshot: &BlackoutSnapshot) -> Result<(), String> {
        let device = self
            .registry
            .get(&snapshot.device_id)
            .ok_or_else(|| "device no longer registered".to_string())?;

        let result = if snapshot.was_playing {
            match &snapshot.prior_content {
                Some(content) => {
                    let session = self
                        .sessions
                        .allocate(device.id.as_str(), &content.content_ref, &content.path)
                        .map_err(|e| e.to_string())?;
                    let url = format!("{}/stream/{}", self.base_url, session.token);
                    device
                        .backend
                        .play_url(&url, content.looped)
                        .map(|()| {
                            device.state().current_session = Some(session.token);
                        })
                        .map_err(|e| e.to_string())
                }
                None => Err("snapshot lost its content reference".to_string()),
            }
        } else {
            // Previously idle: stop the black clip and leave it idle.
            self.sessions.end_for_device(device.id.as_str());
            device.state().current_session = None;
            device.backend.stop().map_err(|e| e.to_string())
        };

        // The hold is lifted whatever happened; reconciliation will pick
        // up the pieces for a device that failed to restore.
        let _ = self.supervisor.release(&device.id);
        result
    }
}
