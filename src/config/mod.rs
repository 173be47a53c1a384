pub mod profiles;

pub use profiles::{AuthMethod, ConfigError, ConfigSource, PathMapping, ServerProfile, Settings};
