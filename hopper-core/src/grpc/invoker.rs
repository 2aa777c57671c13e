//! # Call-Invoking Interface
//!
//! [`CallInvoker`] is the seam between the request-execution core and a concrete transport.
//! It exposes one operation per call kind, each with its own fixed parameter and return shape:
//!
//! | Operation                      | Request payload       | Returns                        |
//! |--------------------------------|-----------------------|--------------------------------|
//! | `blocking_unary_call`          | one value             | the response itself            |
//! | `async_unary_call`             | one value             | [`AsyncUnaryCall`]             |
//! | `async_client_streaming_call`  | streamed separately   | [`AsyncClientStreamingCall`]   |
//! | `async_server_streaming_call`  | one value             | [`AsyncServerStreamingCall`]   |
//! | `async_duplex_streaming_call`  | streamed separately   | [`AsyncDuplexStreamingCall`]   |
//!
//! Streamed requests are pushed through a [`RequestStream`]; the call handles own everything
//! they need (`'static`) so they can outlive the invoker borrow.
use super::RpcMethod;
use futures_util::{future::BoxFuture, stream::BoxStream};
use http::Uri;
use std::{str::FromStr, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::{
    Status,
    metadata::{MetadataKey, MetadataValue},
};

/// A stream of response messages as produced by the transport.
pub type ResponseStream = BoxStream<'static, Result<serde_json::Value, Status>>;

/// Per-call transport options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Custom gRPC metadata (headers) to attach to the call.
    pub headers: Vec<(String, String)>,
    /// Deadline of the call, sent as `grpc-timeout`.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Wraps `payload` in a `tonic::Request` carrying these options.
    pub(crate) fn into_request<T>(self, payload: T) -> Result<tonic::Request<T>, Status> {
        let mut request = tonic::Request::new(payload);
        for (k, v) in self.headers {
            let key = MetadataKey::from_str(&k).map_err(|e| {
                Status::invalid_argument(format!("Invalid metadata (header) key '{k}': '{e}'"))
            })?;
            let val = MetadataValue::from_str(&v).map_err(|e| {
                Status::invalid_argument(format!(
                    "Invalid metadata (header) value for key '{k}': '{e}'"
                ))
            })?;
            request.metadata_mut().insert(key, val);
        }
        if let Some(timeout) = self.timeout {
            request.set_timeout(timeout);
        }
        Ok(request)
    }
}

/// The sending half of a streamed request.
///
/// Dropping it (or calling [`RequestStream::complete`]) ends the request stream.
#[derive(Debug)]
pub struct RequestStream {
    tx: mpsc::UnboundedSender<serde_json::Value>,
}

impl RequestStream {
    /// Creates a request stream and the receiving side to hand to the transport.
    pub fn channel() -> (Self, UnboundedReceiverStream<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }

    /// Queues one request message.
    pub fn send(&self, item: serde_json::Value) -> Result<(), Status> {
        self.tx
            .send(item)
            .map_err(|_| Status::cancelled("the call is no longer accepting requests"))
    }

    /// Signals that no more request messages will be sent.
    pub fn complete(self) {}
}

/// Handle to an in-flight unary call.
pub struct AsyncUnaryCall {
    response: BoxFuture<'static, Result<serde_json::Value, Status>>,
}

impl AsyncUnaryCall {
    pub fn new(response: BoxFuture<'static, Result<serde_json::Value, Status>>) -> Self {
        Self { response }
    }

    pub async fn response(self) -> Result<serde_json::Value, Status> {
        self.response.await
    }
}

/// Handle to an in-flight server-streaming call.
pub struct AsyncServerStreamingCall {
    responses: BoxFuture<'static, Result<ResponseStream, Status>>,
}

impl AsyncServerStreamingCall {
    pub fn new(responses: BoxFuture<'static, Result<ResponseStream, Status>>) -> Self {
        Self { responses }
    }

    /// Resolves once the server has accepted the call.
    pub async fn responses(self) -> Result<ResponseStream, Status> {
        self.responses.await
    }
}

/// Handle to an in-flight client-streaming call.
pub struct AsyncClientStreamingCall {
    requests: RequestStream,
    response: BoxFuture<'static, Result<serde_json::Value, Status>>,
}

impl AsyncClientStreamingCall {
    pub fn new(
        requests: RequestStream,
        response: BoxFuture<'static, Result<serde_json::Value, Status>>,
    ) -> Self {
        Self { requests, response }
    }

    pub fn requests(&self) -> &RequestStream {
        &self.requests
    }

    /// Completes the request stream and waits for the single response.
    pub async fn response(self) -> Result<serde_json::Value, Status> {
        let Self { requests, response } = self;
        requests.complete();
        response.await
    }
}

/// Handle to an in-flight bidirectional-streaming call.
pub struct AsyncDuplexStreamingCall {
    requests: RequestStream,
    responses: BoxFuture<'static, Result<ResponseStream, Status>>,
}

impl AsyncDuplexStreamingCall {
    pub fn new(
        requests: RequestStream,
        responses: BoxFuture<'static, Result<ResponseStream, Status>>,
    ) -> Self {
        Self {
            requests,
            responses,
        }
    }

    pub fn requests(&self) -> &RequestStream {
        &self.requests
    }

    /// Splits the handle so requests can keep flowing while responses are read.
    pub fn split(
        self,
    ) -> (
        RequestStream,
        BoxFuture<'static, Result<ResponseStream, Status>>,
    ) {
        (self.requests, self.responses)
    }
}

/// A transport able to perform the five kinds of gRPC calls.
///
/// `endpoint` is the target service instance of the call.
pub trait CallInvoker: Send + Sync {
    fn blocking_unary_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, Status>;

    fn async_unary_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
        request: serde_json::Value,
    ) -> AsyncUnaryCall;

    fn async_client_streaming_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
    ) -> AsyncClientStreamingCall;

    fn async_server_streaming_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
        request: serde_json::Value,
    ) -> AsyncServerStreamingCall;

    fn async_duplex_streaming_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
    ) -> AsyncDuplexStreamingCall;
}
