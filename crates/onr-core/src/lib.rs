//! # ONR Core
//!
//! Engine crate for Open-Next-Router: the provider DSL
//! (compiler/registry/executor), the proxy pipeline (upstream client, stream
//! engine, codecs), and the runtime services every request leans on
//! (keystore, token-keys, OAuth, pricing, access log, traffic dump).
//!
//! `onr-core` does not know about HTTP routing; `onr-server` wires these
//! pieces behind axum handlers.

pub mod appname;
pub mod balancequery;
pub mod config;
pub mod dsl;
pub mod expr;
pub mod jsonutil;
pub mod keystore;
pub mod logx;
pub mod meta;
pub mod models;
pub mod modelsquery;
pub mod oauth;
pub mod pricing;
pub mod proxy;
pub mod requestid;
pub mod tokenkey;
pub mod trafficdump;
pub mod usage;

pub use meta::Meta;
