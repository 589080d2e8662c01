pub mod bus;
pub mod command;
pub mod env_config;
pub mod frame;
pub mod status;

pub use command::{ControlCommand, ControlMessage};
pub use env_config::{ConfigError, EnvConfig};
pub use frame::{normalize_frame, FrameDeduper};
pub use status::{StatusClass, StatusSnapshot, DETAILS_ABSENT};
