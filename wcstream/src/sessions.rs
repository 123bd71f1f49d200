//! Streaming session registry.
//!
//! A session ties an opaque token to a local source file and the device it
//! was allocated for. Tokens are random UUIDs, so a URL leaks nothing about
//! the filesystem layout of the host.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Serving or waiting to serve requests.
    Active,
    /// Superseded by a newer session or explicitly released.
    Ended,
}

/// A single streaming session.
#[derive(Debug, Clone)]
pub struct StreamSession {
    /// Opaque token used in the streaming URL.
    pub token: String,
    /// Device this session was allocated for.
    pub device_id: String,
    /// Logical content reference the session was created from.
    pub content_ref: String,
    /// Local file served by this session.
    pub path: PathBuf,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    /// Last time a device fetched bytes through this session.
    pub last_access: Option<DateTime<Utc>>,
    /// Total bytes requested across all HTTP range/full requests. An
    /// aborted transfer may deliver fewer bytes than were requested.
    pub bytes_requested: u64,
    /// Playback position as last reported by the device.
    pub position: Option<std::time::Duration>,
    /// Media duration as last reported by the device.
    pub duration: Option<std::time::Duration>,
    pub paused: bool,
    /// When the session was ended, for retention-based cleanup.
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("source file not found: {0}")]
    SourceMissing(PathBuf),
}

#[derive(Default)]
struct Inner {
    by_token: HashMap<String, StreamSession>,
    /// Token of the currently active session per device.
    active_by_device: HashMap<String, String>,
}

/// Registry of all streaming sessions, shared between the HTTP server and
/// the control plane.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh session for `device_id`.
    ///
    /// Any session the device already has is ended first, inside the same
    /// lock, so there is never a moment with two active sessions for one
    /// device.
    pub fn allocate(
        &self,
        device_id: &str,
        content_ref: &str,
        path: &Path,
    ) -> Result<StreamSession, SessionError> {
        if !path.is_file() {
            return Err(SessionError::SourceMissing(path.to_path_buf()));
        }

        let session = StreamSession {
            token: Uuid::new_v4().simple().to_string(),
            device_id: device_id.to_string(),
            content_ref: content_ref.to_string(),
            path: path.to_path_buf(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
            last_access: None,
            bytes_requested: 0,
            position: None,
            duration: None,
            paused: false,
            ended_at: None,
        };

        let mut inner = self.inner.lock().unwrap();
        if let Some(old_token) = inner.active_by_device.remove(device_id) {
            if let Some(old) = inner.by_token.get_mut(&old_token) {
                debug!("Ending superseded session {} for {}", old_token, device_id);
                old.status = SessionStatus::Ended;
                old.ended_at = Some(Utc::now());
            }
        }
        inner
            .active_by_device
            .insert(device_id.to_string(), session.token.clone());
        inner.by_token.insert(session.token.clone(), session.clone());

        info!(
            "Allocated session {} for device {} ({})",
            session.token, device_id, content_ref
        );
        Ok(session)
    }

    /// Looks up a session by token, active or ended.
    pub fn lookup(&self, token: &str) -> Option<StreamSession> {
        self.inner.lock().unwrap().by_token.get(token).cloned()
    }

    /// Returns the active session of a device, if any.
    pub fn active_for(&self, device_id: &str) -> Option<StreamSession> {
        let inner = self.inner.lock().unwrap();
        let token = inner.active_by_device.get(device_id)?;
        inner.by_token.get(token).cloned()
    }

    /// Ends the active session of a device. No-op if there is none.
    pub fn end_for_device(&self, device_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(token) = inner.active_by_device.remove(device_id) {
            if let Some(session) = inner.by_token.get_mut(&token) {
                session.status = SessionStatus::Ended;
                session.ended_at = Some(Utc::now());
                info!("Ended session {} for device {}", token, device_id);
            }
        }
    }

    /// Books the byte count of an incoming request against a session and
    /// refreshes its access time. Counted at request time, before any byte
    /// goes out on the wire.
    pub fn record_progress(&self, token: &str, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session) = inner.by_token.get_mut(token) {
            session.bytes_requested += bytes;
            session.last_access = Some(Utc::now());
        }
    }

    /// Stores the position/duration a device reported for its session.
    pub fn update_position(
        &self,
        token: &str,
        position: Option<Duration>,
        duration: Option<Duration>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session) = inner.by_token.get_mut(token) {
            session.position = position;
            if duration.is_some() {
                session.duration = duration;
            }
        }
    }

    /// Flags a session as paused or resumed.
    pub fn set_paused(&self, token: &str, paused: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session) = inner.by_token.get_mut(token) {
            session.paused = paused;
        }
    }

    /// Drops ended sessions older than `retention`.
    ///
    /// Active sessions are never collected, whatever their age: a display
    /// looping a clip may legitimately hold a session for days.
    pub fn collect_ended(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let mut inner = self.inner.lock().unwrap();
        let before = inner.by_token.len();
        inner.by_token.retain(|_, s| {
            s.status == SessionStatus::Active || s.ended_at.is_none_or(|t| t > cutoff)
        });
        let removed = before - inner.by_token.len();
        if removed > 0 {
            debug!("Collected {} expired session(s)", removed);
        }
        removed
    }

    /// Number of sessions currently held, active and ended.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn clip() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"not really mp4").unwrap();
        f
    }

    #[test]
    fn allocate_returns_active_session() {
        let file = clip();
        let registry = SessionRegistry::new();
        let session = registry.allocate("screen-1", "intro.mp4", file.path()).unwrap();

        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.device_id, "screen-1");
        assert_eq!(registry.active_for("screen-1").unwrap().token, session.token);
        assert_eq!(registry.lookup(&session.token).unwrap().content_ref, "intro.mp4");
    }

    #[test]
    fn allocate_rejects_missing_source() {
        let registry = SessionRegistry::new();
        let err = registry
            .allocate("screen-1", "ghost.mp4", Path::new("/no/such/file.mp4"))
            .unwrap_err();
        assert!(matches!(err, SessionError::SourceMissing(_)));
        assert!(registry.active_for("screen-1").is_none());
    }

    #[test]
    fn new_allocation_ends_previous_session() {
        let file = clip();
        let registry = SessionRegistry::new();
        let first = registry.allocate("screen-1", "a.mp4", file.path()).unwrap();
        let second = registry.allocate("screen-1", "b.mp4", file.path()).unwrap();

        assert_ne!(first.token, second.token);
        assert_eq!(
            registry.lookup(&first.token).unwrap().status,
            SessionStatus::Ended
        );
        assert_eq!(registry.active_for("screen-1").unwrap().token, second.token);
    }

    #[test]
    fn sessions_are_independent_across_devices() {
        let file = clip();
        let registry = SessionRegistry::new();
        let one = registry.allocate("screen-1", "a.mp4", file.path()).unwrap();
        let two = registry.allocate("screen-2", "b.mp4", file.path()).unwrap();

        assert_eq!(registry.lookup(&one.token).unwrap().status, SessionStatus::Active);
        assert_eq!(registry.lookup(&two.token).unwrap().status, SessionStatus::Active);
    }

    #[test]
    fn progress_accumulates() {
        let file = clip();
        let registry = SessionRegistry::new();
        let session = registry.allocate("screen-1", "a.mp4", file.path()).unwrap();

        registry.record_progress(&session.token, 100);
        registry.record_progress(&session.token, 50);

        let current = registry.lookup(&session.token).unwrap();
        assert_eq!(current.bytes_requested, 150);
        assert!(current.last_access.is_some());
    }

    #[test]
    fn position_updates_are_visible() {
        let file = clip();
        let registry = SessionRegistry::new();
        let session = registry.allocate("screen-1", "a.mp4", file.path()).unwrap();

        registry.update_position(
            &session.token,
            Some(Duration::from_secs(42)),
            Some(Duration::from_secs(120)),
        );
        registry.set_paused(&session.token, true);

        let current = registry.lookup(&session.token).unwrap();
        assert_eq!(current.position, Some(Duration::from_secs(42)));
        assert_eq!(current.duration, Some(Duration::from_secs(120)));
        assert!(current.paused);

        // A missing duration does not erase a previously known one.
        registry.update_position(&session.token, Some(Duration::from_secs(43)), None);
        let current = registry.lookup(&session.token).unwrap();
        assert_eq!(current.duration, Some(Duration::from_secs(120)));
    }

    #[test]
    fn collect_keeps_active_and_recent_sessions() {
        let file = clip();
        let registry = SessionRegistry::new();
        let active = registry.allocate("screen-1", "a.mp4", file.path()).unwrap();
        registry.allocate("screen-2", "b.mp4", file.path()).unwrap();
        registry.end_for_device("screen-2");

        // Retention window still covers the session ended just now.
        assert_eq!(registry.collect_ended(Duration::from_secs(300)), 0);
        assert_eq!(registry.len(), 2);

        // Zero retention collects it immediately.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.collect_ended(Duration::from_secs(0)), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&active.token).is_some());
    }
}
