//! Capability traits over the two control protocols.
//!
//! The supervisor and the blackout coordinator only ever talk to devices
//! through these traits; the protocol variants live in [`crate::clients`].

use crate::errors::ControlError;
use crate::model::PlaybackState;
use std::time::Duration;

/// Playback position across backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportPosition {
    pub position: Option<Duration>,
    pub duration: Option<Duration>,
}

/// Transport commands: the fixed capability set every backend implements.
pub trait TransportControl {
    /// Instructs the device to fetch and play `url`, looping if asked.
    fn play_url(&self, url: &str, looped: bool) -> Result<(), ControlError>;

    fn stop(&self) -> Result<(), ControlError>;

    fn pause(&self) -> Result<(), ControlError>;
}

/// Transport observation, polled by the supervisor.
pub trait TransportStatus {
    fn transport_state(&self) -> Result<PlaybackState, ControlError>;

    /// Current position/duration. Backends without position reporting
    /// return an empty [`TransportPosition`].
    fn transport_position(&self) -> Result<TransportPosition, ControlError>;
}
