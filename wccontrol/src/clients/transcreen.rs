//! Client for the Transcreen vendor protocol.
//!
//! Transcreen boxes expose a minimal HTTP surface: `POST /play` with a JSON
//! body (`url`, `loop`), `POST /stop`, and on recent firmware `GET /status`
//! returning `{"state": "..."}`. Older firmware answers 404 on `/status`;
//! for those the client reports the last state it commanded.

use crate::capabilities::{TransportControl, TransportPosition, TransportStatus};
use crate::clients::soap::control_agent;
use crate::clients::with_retries;
use crate::errors::ControlError;
use crate::model::PlaybackState;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use ureq::Agent;

pub struct TranscreenClient {
    agent: Agent,
    /// Device base URL, e.g. "http://192.168.1.30:8060".
    base_url: String,
    retries: u32,
    /// Fallback for firmware without a /status endpoint.
    last_commanded: Mutex<PlaybackState>,
}

impl TranscreenClient {
    pub fn new(base_url: String, timeout: Duration, retries: u32) -> Self {
        Self {
            agent: control_agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            retries,
            last_commanded: Mutex::new(PlaybackState::Idle),
        }
    }

    fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<(), ControlError> {
        let url = format!("{}{}", self.base_url, endpoint);
        with_retries(self.retries, endpoint, || {
            let response = self
                .agent
                .post(&url)
                .send_json(&body)
                .map_err(|e| ControlError::DeviceUnreachable(e.to_string()))?;

            let status = response.status().as_u16();
            if (200..300).contains(&status) {
                Ok(())
            } else {
                Err(ControlError::ActionRejected(endpoint.to_string(), status))
            }
        })
    }

    fn set_last_commanded(&self, state: PlaybackState) {
        *self.last_commanded.lock().unwrap() = state;
    }
}

impl TransportControl for TranscreenClient {
    fn play_url(&self, url: &str, looped: bool) -> Result<(), ControlError> {
        self.post("/play", serde_json::json!({ "url": url, "loop": looped }))?;
        self.set_last_commanded(PlaybackState::Playing);
        Ok(())
    }

    fn stop(&self) -> Result<(), ControlError> {
        self.post("/stop", serde_json::json!({}))?;
        self.set_last_commanded(PlaybackState::Idle);
        Ok(())
    }

    fn pause(&self) -> Result<(), ControlError> {
        Err(ControlError::unsupported("pause", "transcreen"))
    }
}

impl TransportStatus for TranscreenClient {
    fn transport_state(&self) -> Result<PlaybackState, ControlError> {
        let url = format!("{}/status", self.base_url);
        let result = with_retries(self.retries, "/status", || {
            self.agent
                .get(&url)
                .call()
                .map_err(|e| ControlError::DeviceUnreachable(e.to_string()))
        });

        let mut response = result?;
        let status = response.status().as_u16();

        if status == 404 {
            // Firmware without /status: trust the last command we sent.
            let last = *self.last_commanded.lock().unwrap();
            debug!("{} has no /status endpoint, assuming {:?}", self.base_url, last);
            return Ok(last);
        }

        if !(200..300).contains(&status) {
            return Err(ControlError::ActionRejected("/status".to_string(), status));
        }

        let body: serde_json::Value = response
            .body_mut()
            .read_json()
            .map_err(|e| ControlError::Transcreen(format!("bad /status body: {}", e)))?;

        let state = body
            .get("state")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ControlError::Transcreen("missing 'state' in /status".to_string()))?;

        Ok(parse_state(state))
    }

    fn transport_position(&self) -> Result<TransportPosition, ControlError> {
        // Transcreen reports no position.
        Ok(TransportPosition::default())
    }
}

fn parse_state(s: &str) -> PlaybackState {
    match s.to_ascii_lowercase().as_str() {
        "playing" => PlaybackState::Playing,
        "paused" => PlaybackState::Paused,
        "buffering" | "loading" => PlaybackState::Buffering,
        _ => PlaybackState::Idle,
    }
}
