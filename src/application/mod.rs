mod application_impl;
pub mod data;
mod runtime_config;

pub use application_impl::{Application, ApplicationError};
pub(crate) use application_impl::{ConfigSnafu, LogFileSnafu};
pub use runtime_config::{RuntimeConfig, RuntimeConfigError};
