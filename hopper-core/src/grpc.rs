//! # Generic gRPC Transport
//!
//! This module contains the low-level building blocks for performing gRPC calls using
//! dynamic message types.
//!
//! * [`invoker`]: the call-invoking interface, one operation per call kind.
//! * [`client`]: the `tonic` implementation of that interface.
//! * [`codec`]: the `tonic` codec that delegates to a [`crate::serializer::Serializer`].
//! * [`thunk`]: resolution and memoization of per-method invocation routines.
pub mod client;
pub mod codec;
pub mod invoker;
pub mod thunk;

use crate::grpc::codec::SerializerCodec;
use prost_reflect::MethodDescriptor;
use std::fmt;

/// The shape of an RPC method, derived from its streaming flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    DuplexStreaming,
}

impl MethodType {
    pub fn of(descriptor: &MethodDescriptor) -> Self {
        match (
            descriptor.is_client_streaming(),
            descriptor.is_server_streaming(),
        ) {
            (false, false) => MethodType::Unary,
            (true, false) => MethodType::ClientStreaming,
            (false, true) => MethodType::ServerStreaming,
            (true, true) => MethodType::DuplexStreaming,
        }
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodType::Unary => "unary",
            MethodType::ClientStreaming => "client-streaming",
            MethodType::ServerStreaming => "server-streaming",
            MethodType::DuplexStreaming => "duplex-streaming",
        };
        f.write_str(name)
    }
}

/// A method ready to be invoked: its schema plus the codec used to marshal its messages.
#[derive(Clone)]
pub struct RpcMethod {
    descriptor: MethodDescriptor,
    codec: SerializerCodec,
}

impl RpcMethod {
    pub fn new(descriptor: MethodDescriptor, codec: SerializerCodec) -> Self {
        Self { descriptor, codec }
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn codec(&self) -> &SerializerCodec {
        &self.codec
    }

    /// Fully qualified method name (e.g. `echo.EchoService.UnaryEcho`).
    pub fn full_name(&self) -> &str {
        self.descriptor.full_name()
    }

    pub fn method_type(&self) -> MethodType {
        MethodType::of(&self.descriptor)
    }

    /// Fully qualified name of the request message type.
    pub fn request_type(&self) -> String {
        self.descriptor.input().full_name().to_string()
    }

    /// Fully qualified name of the response message type.
    pub fn response_type(&self) -> String {
        self.descriptor.output().full_name().to_string()
    }

    /// The HTTP/2 path of the method (e.g. `/echo.EchoService/UnaryEcho`).
    pub fn path(&self) -> String {
        format!(
            "/{}/{}",
            self.descriptor.parent_service().full_name(),
            self.descriptor.name()
        )
    }
}

impl fmt::Debug for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcMethod")
            .field("full_name", &self.full_name())
            .field("method_type", &self.method_type())
            .field("serializer", &self.codec.serializer_name())
            .finish()
    }
}
