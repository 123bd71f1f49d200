//! Control plane of Wallcast: device registry, SSDP discovery, protocol
//! clients, the playback supervisor and the blackout coordinator.
//!
//! The control plane is fully synchronous. Each device gets its own worker
//! thread and every network call is a blocking HTTP request with a short
//! timeout, so one unreachable display never stalls the others.

pub mod blackout;
pub mod capabilities;
pub mod clients;
pub mod controller;
pub mod description;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod model;
pub mod registry;
pub mod supervisor;

pub use blackout::{BlackoutCoordinator, BlackoutReport};
pub use controller::CastController;
pub use discovery::DiscoveryEngine;
pub use errors::ControlError;
pub use model::{
    ConnectionStatus, ContentSpec, ControlMode, DeviceId, PlaybackState, ProtocolKind,
    SupervisorState,
};
pub use registry::{Device, DeviceRegistry};
pub use supervisor::PlaybackSupervisor;
