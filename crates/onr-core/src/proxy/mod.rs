//! The proxy pipeline: request/response executor, upstream client, stream
//! engine, schema codecs, and error normalization.

pub mod client;
pub mod codecs;
pub mod error_map;
pub mod executor;
pub mod stream;
