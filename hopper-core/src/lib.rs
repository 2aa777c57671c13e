//! # Hopper Core
//!
//! `hopper-core` is the request-execution core behind the Hopper CLI. It performs dynamic
//! gRPC calls (no generated stubs) and wraps every outbound call with codec selection and
//! a two-level retry policy.
//!
//! ## Key Components
//!
//! * **[`HopperClient`](client::HopperClient):** The main entry point. It resolves methods in a
//!   `DescriptorPool`, prepares a [`RequestContext`](client::RequestContext) and runs it through
//!   the executor.
//! * **[`ClientExecutor`](client::executor::ClientExecutor):** Resolves the codec of a request and
//!   drives the "next service instance" and "retry same instance" loops, aggregating failures.
//! * **[`ThunkCache`](grpc::thunk::ThunkCache):** Resolves a method descriptor and a call kind into a
//!   memoized invocation routine bound to a [`CallInvoker`](grpc::invoker::CallInvoker).
//!
//! ## Serializers
//!
//! Payloads are `serde_json::Value`s. A [`Serializer`](serializer::Serializer) decides how they
//! travel on the wire; the registry always carries a `"json"` entry which transcodes JSON into
//! Protobuf binary using the method's message descriptors.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost-reflect` and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod client;
pub mod grpc;
pub mod serializer;

// Re-exports
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
