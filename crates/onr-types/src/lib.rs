//! # ONR Types
//!
//! Core types, config models, and error definitions for Open-Next-Router.
//!
//! This crate provides the foundational type system for the gateway:
//!
//! - **`error`** - Typed error hierarchy for config, providers, and proxying
//! - **`config`** - Gateway configuration model loaded from YAML + env
//!
//! `onr-types` sits at the bottom of the dependency graph: `onr-core` and
//! `onr-server` both depend on it, it depends on nothing but serde.
//!
//! All types are designed to be:
//! - **Serializable** via serde for API responses and admin tooling
//! - **Clone** for cheap sharing across async boundaries
//! - **PartialEq** for testing and comparison

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{ConfigError, ProviderError, ProxyError, Result, TypedError};
