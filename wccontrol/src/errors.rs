use thiserror::Error;

/// Errors of the device control plane.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Network-level failure talking to a device: timeout, refused
    /// connection, unreachable host. Retried with backoff by the
    /// supervisor, never propagated into discovery or streaming.
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("operation '{0}' is not supported by backend '{1}'")]
    OperationNotSupported(String, String),

    #[error("{0} failed with HTTP status {1}")]
    ActionRejected(String, u16),

    #[error("{0} returned UPnP error {1}: {2}")]
    UpnpFault(String, u32, String),

    #[error("no SOAP envelope in {0} response")]
    MissingEnvelope(String),

    #[error("missing {0} element in SOAP body")]
    MissingReturnValue(String),

    #[error("invalid {0} value: {1}")]
    BadReturnValue(String, String),

    #[error("failed to build SOAP request: {0}")]
    RequestBuild(String),

    #[error("device description error: {0}")]
    Description(String),

    #[error("transcreen error: {0}")]
    Transcreen(String),

    #[error("session error: {0}")]
    Session(#[from] wcstream::sessions::SessionError),

    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

impl ControlError {
    pub fn unsupported(operation: &str, backend: &str) -> Self {
        ControlError::OperationNotSupported(operation.to_string(), backend.to_string())
    }

    pub fn missing_return_value(name: &str) -> Self {
        ControlError::MissingReturnValue(name.to_string())
    }

    pub fn bad_return_value(name: &str, value: &str) -> Self {
        ControlError::BadReturnValue(name.to_string(), value.to_string())
    }
}
