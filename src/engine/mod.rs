pub mod activity;
pub mod plugin;
pub mod registry;

pub use activity::ActivityEngine;
pub use plugin::{EngineHandle, EngineInit, EngineState, PluggableEngine};
pub use registry::{EngineSet, PluginRegistry};
