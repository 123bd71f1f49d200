//! Local file streaming for Wallcast displays.
//!
//! Devices never receive a file path: every playback request gets a
//! session with an opaque token, and the HTTP server only serves files
//! through `/stream/{token}`. Allocating a session for a device ends any
//! session the device already had, so at most one is active per device.

pub mod range;
pub mod server;
pub mod sessions;

pub use server::{stream_router, StreamServer};
pub use sessions::{SessionRegistry, SessionStatus, StreamSession};
