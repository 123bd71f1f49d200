//! Protocol clients, one per [`ProtocolKind`](crate::model::ProtocolKind).

pub mod dlna;
pub mod soap;
pub mod transcreen;

#[cfg(test)]
pub mod fake;

use crate::capabilities::{TransportControl, TransportPosition, TransportStatus};
use crate::errors::ControlError;
use crate::model::PlaybackState;
use tracing::debug;

pub use dlna::AvTransportClient;
pub use transcreen::TranscreenClient;

/// Dispatch over the concrete protocol client of a device.
pub enum ControlBackend {
    Dlna(AvTransportClient),
    Transcreen(TranscreenClient),
    #[cfg(test)]
    Fake(fake::FakeTransport),
}

impl ControlBackend {
    pub fn name(&self) -> &'static str {
        match self {
            ControlBackend::Dlna(_) => "dlna",
            ControlBackend::Transcreen(_) => "transcreen",
            #[cfg(test)]
            ControlBackend::Fake(_) => "fake",
        }
    }
}

impl TransportControl for ControlBackend {
    fn play_url(&self, url: &str, looped: bool) -> Result<(), ControlError> {
        match self {
            ControlBackend::Dlna(c) => c.play_url(url, looped),
            ControlBackend::Transcreen(c) => c.play_url(url, looped),
            #[cfg(test)]
            ControlBackend::Fake(c) => c.play_url(url, looped),
        }
    }

    fn stop(&self) -> Result<(), ControlError> {
        match self {
            ControlBackend::Dlna(c) => c.stop(),
            ControlBackend::Transcreen(c) => c.stop(),
            #[cfg(test)]
            ControlBackend::Fake(c) => c.stop(),
        }
    }

    fn pause(&self) -> Result<(), ControlError> {
        match self {
            ControlBackend::Dlna(c) => c.pause(),
            ControlBackend::Transcreen(c) => c.pause(),
            #[cfg(test)]
            ControlBackend::Fake(c) => c.pause(),
        }
    }
}

impl TransportStatus for ControlBackend {
    fn transport_state(&self) -> Result<PlaybackState, ControlError> {
        match self {
            ControlBackend::Dlna(c) => c.transport_state(),
            ControlBackend::Transcreen(c) => c.transport_state(),
            #[cfg(test)]
            ControlBackend::Fake(c) => c.transport_state(),
        }
    }

    fn transport_position(&self) -> Result<TransportPosition, ControlError> {
        match self {
            ControlBackend::Dlna(c) => c.transport_position(),
            ControlBackend::Transcreen(c) => c.transport_position(),
            #[cfg(test)]
            ControlBackend::Fake(c) => c.transport_position(),
        }
    }
}

/// Runs `op`, retrying up to `retries` extra times.
///
/// Only [`ControlError::DeviceUnreachable`] is retried: a protocol-level
/// rejection will not get better by asking again.
pub(crate) fn with_retries<T>(
    retries: u32,
    what: &str,
    mut op: impl FnMut() -> Result<T, ControlError>,
) -> Result<T, ControlError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(ControlError::DeviceUnreachable(reason)) if attempt < retries => {
                attempt += 1;
                debug!(
                    "{} unreachable ({}), retry {}/{}",
                    what, reason, attempt, retries
                );
            }
            other => return other,
        }
    }
}
