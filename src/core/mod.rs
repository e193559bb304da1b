pub mod relay;

// Re-export commonly used types for convenience
pub use relay::{
    AudioFormat, BackendCommand, BackendConfig, BackendConnection, BackendConnector, BackendEvent,
    BackendSessionConfig, RealtimeBackendConnector, RelayError, RelayResult, RelaySession,
    SessionOptions, StreamRestartPolicy, TelephonyEvent, TelephonyFrame,
};
