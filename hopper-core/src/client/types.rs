use super::{context::RequestOptions, route::HttpMetadata};
use std::time::Duration;

/// A request object encapsulating all necessary information to perform a dynamic gRPC call.
#[derive(Debug, Clone, Default)]
pub struct DynamicRequest {
    /// The JSON body of the request.
    /// - For Unary/ServerStreaming: An Object `{}`.
    /// - For ClientStreaming/Bidirectional: An Array of Objects `[{}]`.
    pub body: serde_json::Value,
    /// Custom gRPC metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
    /// The fully qualified name of the service (e.g., `my.package.Service`).
    pub service: String,
    /// The name of the method to call (e.g., `SayHello`).
    pub method: String,
    /// Retry and serializer settings. The client defaults apply when absent.
    pub options: Option<RequestOptions>,
    /// Forces a call kind (e.g. `blocking_unary`) instead of the method's default one.
    pub call_kind: Option<String>,
    /// Deadline of each attempt.
    pub timeout: Option<Duration>,
    /// HTTP route the call is exposed under, if any.
    pub route: Option<HttpMetadata>,
}

/// The result of a dynamic gRPC call.
#[derive(Debug, Clone)]
pub enum DynamicResponse {
    /// A single response message (for Unary and Client Streaming calls).
    Unary(serde_json::Value),
    /// Every message of a response stream (for Server Streaming and Bidirectional calls).
    ///
    /// A failure in the middle of the stream ends it; the items received before are kept.
    Streaming(Vec<Result<serde_json::Value, tonic::Status>>),
}
