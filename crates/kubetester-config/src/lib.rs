//! Environment configuration for kubetester.
//!
//! This crate defines the schema layer: the TOML `EnvironmentConfig` describing
//! which prerequisites, node groups, and add-ons an environment wants, the
//! shared kind enums (`ResourceKind`, `NodeGroupKind`, `AddOnKind`) used by every
//! other crate, and the settle `Timings` the sagas observe.

pub mod config;
pub mod kinds;

pub use config::{
    load_config_file, parse_config_str, AddOnConfig, ComponentCommands, ConfigError,
    EnvironmentConfig, HooksSection, ImageFamily, NodeGroupSection, NodeGroupSpec,
    OnFailureSection, PrerequisitesSection, ProviderSection, StepCommands, Timings,
    CONFIG_VERSION,
};
pub use kinds::{AddOnKind, NodeGroupKind, ResourceKind};
