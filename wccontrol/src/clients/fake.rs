//! Recording transport used by supervisor and blackout tests.

use crate::capabilities::{TransportControl, TransportPosition, TransportStatus};
use crate::errors::ControlError;
use crate::model::PlaybackState;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A transport command observed by the fake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FakeCall {
    Play { url: String, looped: bool },
    Stop,
    Pause,
}

#[derive(Default)]
pub struct FakeInner {
    pub calls: Mutex<Vec<FakeCall>>,
    pub state: Mutex<Option<PlaybackState>>,
    pub polls: AtomicUsize,
    pub fail_commands: AtomicBool,
    pub fail_status: AtomicBool,
}

/// Scriptable transport: commands update a simulated state and are recorded
/// for later assertions; failures are toggled per direction.
#[derive(Clone, Default)]
pub struct FakeTransport {
    pub inner: Arc<FakeInner>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn command_count(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    pub fn poll_count(&self) -> usize {
        self.inner.polls.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: PlaybackState) {
        *self.inner.state.lock().unwrap() = Some(state);
    }

    pub fn fail_commands(&self, fail: bool) {
        self.inner.fail_commands.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status(&self, fail: bool) {
        self.inner.fail_status.store(fail, Ordering::SeqCst);
    }

    /// URL of the last play command, if any.
    pub fn last_play_url(&self) -> Option<String> {
        self.calls().iter().rev().find_map(|c| match c {
            FakeCall::Play { url, .. } => Some(url.clone()),
            _ => None,
        })
    }
}

impl TransportControl for FakeTransport {
    fn play_url(&self, url: &str, looped: bool) -> Result<(), ControlError> {
        if self.inner.fail_commands.load(Ordering::SeqCst) {
            return Err(ControlError::DeviceUnreachable("fake: down".into()));
        }
        self.inner.calls.lock().unwrap().push(FakeCall::Play {
            url: url.to_string(),
            looped,
        });
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn stop(&self) -> Result<(), ControlError> {
        if self.inner.fail_commands.load(Ordering::SeqCst) {
            return Err(ControlError::DeviceUnreachable("fake: down".into()));
        }
        self.inner.calls.lock().unwrap().push(FakeCall::Stop);
        self.set_state(PlaybackState::Idle);
        Ok(())
    }

    fn pause(&self) -> Result<(), ControlError> {
        if self.inner.fail_commands.load(Ordering::SeqCst) {
            return Err(ControlError::DeviceUnreachable("fake: down".into()));
        }
        self.inner.calls.lock().unwrap().push(FakeCall::Pause);
        self.set_state(PlaybackState::Paused);
        Ok(())
    }
}

impl TransportStatus for FakeTransport {
    fn transport_state(&self) -> Result<PlaybackState, ControlError> {
        self.inner.polls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_status.load(Ordering::SeqCst) {
            return Err(ControlError::DeviceUnreachable("fake: status down".into()));
        }
        Ok(self.inner.state.lock().unwrap().unwrap_or(PlaybackState::Idle))
    }

    fn transport_position(&self) -> Result<TransportPosition, ControlError> {
        Ok(TransportPosition::default())
    }
}
