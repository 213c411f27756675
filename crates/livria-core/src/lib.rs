//! LIVRIA Core Library
//!
//! This crate provides the worker configuration, the web app manifest model,
//! and the errors shared by both.

pub mod config;
pub mod error;
pub mod manifest;

pub use config::{NotificationConfig, RouteConfig, WorkerConfig};
pub use error::{CoreError, CoreResult};
pub use manifest::{ManifestIcon, WebAppManifest, REQUIRED_ICON_SIZES};
