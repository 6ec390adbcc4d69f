// src/config/mod.rs

//! TOML configuration: model, loading and validation.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_effective, load_from_path};
pub use model::{
    BinarySection, ClientSection, ConfigFile, RawConfigFile, SupervisorSection,
    DEFAULT_LOG_CAPACITY,
};
