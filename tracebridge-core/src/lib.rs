//! # Tracebridge Core
//!
//! `tracebridge-core` lets a service call, and be called by, a gRPC peer written in another
//! language without compile-time generated message types. The Protobuf schema is loaded
//! from a `FileDescriptorSet` at runtime and every message is built and read by reflection.
//!
//! ## Key Components
//!
//! * **[`schema::SchemaLoader`]:** Loads the descriptor set exactly once and hands out the
//!   immutable [`schema::DescriptorBundle`] (or the same terminal error) to every caller.
//! * **[`message`]:** Builds `ActionRequest`/`ActionReply` messages and reads/writes their
//!   fields by name.
//! * **[`client::BridgeClient`]:** Invokes bridge methods by their full path string.
//! * **[`server::BridgeServer`]:** A hand-built method table served without generated stubs.
//! * **[`trace`]:** Derives or generates the 32-hex-character trace id of a call.
//! * **[`interceptor`], [`recover`] & [`http`]:** The logging and panic-recovery contract
//!   shared by the RPC server, RPC client and HTTP boundaries.
//!
//! ## DynamicCodec
//!
//! An implementation of `tonic::codec::Codec` that encodes and decodes
//! `prost_reflect::DynamicMessage` values against the descriptors of the bundle.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod client;
pub mod codec;
pub mod context;
pub mod http;
pub mod interceptor;
pub mod message;
pub mod recover;
pub mod schema;
pub mod server;
pub mod trace;

pub use context::CallContext;
pub use schema::{DescriptorBundle, SchemaError, SchemaLoader};

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
