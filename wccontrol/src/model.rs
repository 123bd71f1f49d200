//! Core data model of the control plane.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Stable identifier of a device.
///
/// Derived from the SSDP UDN for discovered devices, or from the configured
/// hostname for statically declared ones.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId(s.to_string())
    }
}

/// Control protocol spoken by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolKind {
    /// UPnP AVTransport over SOAP.
    Dlna,
    /// Vendor HTTP protocol: POST /play and /stop with JSON bodies.
    Transcreen,
}

impl ProtocolKind {
    /// Parses the value used in configuration files.
    pub fn from_config(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dlna" | "upnp" => Some(ProtocolKind::Dlna),
            "transcreen" => Some(ProtocolKind::Transcreen),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Dlna => write!(f, "dlna"),
            ProtocolKind::Transcreen => write!(f, "transcreen"),
        }
    }
}

/// Network-level status of a device.
///
/// Legal transitions: Disconnected -> Connecting -> Connected ->
/// {Disconnected, Error}; Error falls back to Disconnected after a backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Transport state as reported by (or inferred for) a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Buffering,
}

impl PlaybackState {
    /// Maps an AVTransport `CurrentTransportState` string.
    ///
    /// Unknown states map to Idle; renderers invent values and the
    /// supervisor only ever asks "is the right content playing".
    pub fn from_transport(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAYING" => PlaybackState::Playing,
            "PAUSED_PLAYBACK" | "PAUSED_RECORDING" => PlaybackState::Paused,
            "TRANSITIONING" => PlaybackState::Buffering,
            _ => PlaybackState::Idle,
        }
    }
}

/// Reconciliation state of a device, owned by the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Requesting,
    Playing,
    UserPaused,
    Error,
}

/// Who currently drives a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMode {
    /// The supervisor reconciles freely.
    Auto,
    /// An operator command holds the device until `expires_at`.
    User,
    /// A system operation (blackout) holds the device until released.
    System,
}

/// Time-boxed override suppressing autonomous reconciliation.
#[derive(Clone, Debug)]
pub struct UserControl {
    pub mode: ControlMode,
    /// `None` with a non-Auto mode means "held until explicitly released".
    pub expires_at: Option<Instant>,
    pub reason: Option<String>,
}

impl UserControl {
    pub fn auto() -> Self {
        Self {
            mode: ControlMode::Auto,
            expires_at: None,
            reason: None,
        }
    }

    /// Operator hold expiring after `window`.
    pub fn user(reason: &str, window: Duration) -> Self {
        Self {
            mode: ControlMode::User,
            expires_at: Some(Instant::now() + window),
            reason: Some(reason.to_string()),
        }
    }

    /// System hold with no expiry; lifted only by an explicit release.
    pub fn system(reason: &str) -> Self {
        Self {
            mode: ControlMode::System,
            expires_at: None,
            reason: Some(reason.to_string()),
        }
    }

    /// True while the hold suppresses reconciliation at `now`.
    ///
    /// Evaluated by timestamp comparison on every pass rather than by a
    /// timer, so it can be exercised with arbitrary instants in tests.
    pub fn holds_at(&self, now: Instant) -> bool {
        match self.mode {
            ControlMode::Auto => false,
            ControlMode::User | ControlMode::System => {
                self.expires_at.is_none_or(|expiry| now < expiry)
            }
        }
    }
}

/// What a device is supposed to be playing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentSpec {
    /// Logical identifier of the content (catalog id or file name).
    pub content_ref: String,
    /// Local file backing the content.
    pub path: PathBuf,
    pub looped: bool,
}

impl ContentSpec {
    pub fn new(content_ref: &str, path: impl Into<PathBuf>, looped: bool) -> Self {
        Self {
            content_ref: content_ref.to_string(),
            path: path.into(),
            looped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_state_mapping() {
        assert_eq!(PlaybackState::from_transport("PLAYING"), PlaybackState::Playing);
        assert_eq!(
            PlaybackState::from_transport("PAUSED_PLAYBACK"),
            PlaybackState::Paused
        );
        assert_eq!(
            PlaybackState::from_transport("TRANSITIONING"),
            PlaybackState::Buffering
        );
        assert_eq!(PlaybackState::from_transport("STOPPED"), PlaybackState::Idle);
        assert_eq!(
            PlaybackState::from_transport("NO_MEDIA_PRESENT"),
            PlaybackState::Idle
        );
        assert_eq!(PlaybackState::from_transport("CUSTOM_VENDOR"), PlaybackState::Idle);
    }

    #[test]
    fn user_hold_expires() {
        let now = Instant::now();
        let hold = UserControl::user("manual_stop", Duration::from_secs(60));
        assert!(hold.holds_at(now));
        assert!(!hold.holds_at(now + Duration::from_secs(61)));
    }

    #[test]
    fn system_hold_never_expires() {
        let hold = UserControl::system("blackout");
        assert!(hold.holds_at(Instant::now() + Duration::from_secs(86_400)));
    }

    #[test]
    fn auto_never_holds() {
        assert!(!UserControl::auto().holds_at(Instant::now()));
    }

    #[test]
    fn protocol_from_config() {
        assert_eq!(ProtocolKind::from_config("DLNA"), Some(ProtocolKind::Dlna));
        assert_eq!(ProtocolKind::from_config("upnp"), Some(ProtocolKind::Dlna));
        assert_eq!(
            ProtocolKind::from_config("transcreen"),
            Some(ProtocolKind::Transcreen)
        );
        assert_eq!(ProtocolKind::from_config("chromecast"), None);
    }
}
