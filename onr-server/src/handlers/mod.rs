//! HTTP handlers: the proxied API surface plus model listing and admin.

pub mod models;
pub mod proxy;
