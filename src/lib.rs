//! VR runtime tracking core
//!
//! - `filters` / `math`: Kalman pose filtering with an exponential-map orientation
//! - `beacons`: blink-code identification of tracked LEDs
//! - `ipc`: shared memory ring buffer and frame descriptors
//! - `tracking`, `device_token`, `registry`: the server-side plumbing around them

pub mod beacons;
pub mod config;
pub mod device_token;
pub mod error;
pub mod filters;
pub mod ipc;
pub mod math;
pub mod registry;
pub mod simulation;
pub mod tracking;
pub mod types;

pub use config::ServerConfig;
pub use error::{ConfigError, DeviceTokenError, RegistryError, RingBufferError};
pub use ipc::IpcRingBuffer;
pub use types::PoseSnapshot;
