//! # Generic gRPC Invoker
//!
//! This module wraps standard `tonic` clients to implement [`CallInvoker`]. It is agnostic to
//! the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! The [`GrpcInvoker`] relies on the [`SerializerCodec`](super::codec::SerializerCodec) carried by
//! each [`RpcMethod`] to handle serialization. It does not need to know the structure of the data
//! it is sending; it builds a `tonic` client for the target endpoint, waits for it to be ready and
//! passes the `serde_json::Value`s to the codec.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Per-call Endpoint**: The target service instance is applied as the request origin, so one
//!   invoker can serve every instance returned by the load balancer.
//! * **Metadata Handling**: [`CallOptions`] headers become Tonic's `MetadataMap`.
use super::{
    RpcMethod,
    invoker::{
        AsyncClientStreamingCall, AsyncDuplexStreamingCall, AsyncServerStreamingCall,
        AsyncUnaryCall, CallInvoker, CallOptions, RequestStream,
    },
};
use crate::BoxError;
use futures_util::{FutureExt, StreamExt};
use http::{Uri, uri::PathAndQuery};
use http_body::Body as HttpBody;
use std::{str::FromStr, sync::Arc};
use tokio::runtime::{Handle, RuntimeFlavor};
use tonic::{
    Status,
    client::{Grpc, GrpcService},
    transport::{Channel, Endpoint},
};

type Connect<S> = Arc<dyn Fn(&Uri) -> S + Send + Sync>;

/// A [`CallInvoker`] over any `tonic` service.
///
/// The service for a call is obtained from the `connect` function given the target endpoint.
pub struct GrpcInvoker<S = Channel> {
    connect: Connect<S>,
}

impl<S> Clone for GrpcInvoker<S> {
    fn clone(&self) -> Self {
        Self {
            connect: self.connect.clone(),
        }
    }
}

impl<S> std::fmt::Debug for GrpcInvoker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcInvoker").finish_non_exhaustive()
    }
}

impl GrpcInvoker<Channel> {
    /// Connects a lazy `Channel` to each endpoint on first use of a call.
    ///
    /// Connection failures surface as `Unavailable` statuses of the call itself.
    pub fn lazy() -> Self {
        Self::new(|uri| Endpoint::from(uri.clone()).connect_lazy())
    }
}

impl<S> GrpcInvoker<S> {
    pub fn new(connect: impl Fn(&Uri) -> S + Send + Sync + 'static) -> Self {
        Self {
            connect: Arc::new(connect),
        }
    }

    /// Uses the same service for every endpoint (e.g. an in-process server).
    pub fn from_service(service: S) -> Self
    where
        S: Clone + Send + Sync + 'static,
    {
        Self::new(move |_| service.clone())
    }
}

impl<S> GrpcInvoker<S>
where
    S: GrpcService<tonic::body::Body> + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Builds a ready `tonic` client targeting `endpoint`.
    async fn ready_client(connect: Connect<S>, endpoint: Uri) -> Result<Grpc<S>, Status> {
        let mut client = Grpc::with_origin(connect(&endpoint), endpoint);
        client.ready().await.map_err(|e| {
            let e: BoxError = e.into();
            Status::unavailable(format!("Internal error, the client was not ready: '{e}'"))
        })?;
        Ok(client)
    }

    fn prepare(&self, method: &RpcMethod, endpoint: &Uri) -> Prepared<S> {
        Prepared {
            connect: self.connect.clone(),
            endpoint: endpoint.clone(),
            codec: method.codec().clone(),
            path: http_path(method),
        }
    }
}

struct Prepared<S> {
    connect: Connect<S>,
    endpoint: Uri,
    codec: super::codec::SerializerCodec,
    path: Result<PathAndQuery, Status>,
}

impl<S> CallInvoker for GrpcInvoker<S>
where
    S: GrpcService<tonic::body::Body> + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    fn blocking_unary_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, Status> {
        let call = self.async_unary_call(method, endpoint, options, request);

        match Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::CurrentThread => Err(Status::failed_precondition(
                    "blocking unary calls cannot run on a current-thread runtime",
                )),
                _ => tokio::task::block_in_place(|| handle.block_on(call.response())),
            },
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| Status::internal(format!("Failed to start a runtime: '{e}'")))?
                .block_on(call.response()),
        }
    }

    fn async_unary_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
        request: serde_json::Value,
    ) -> AsyncUnaryCall {
        let Prepared {
            connect,
            endpoint,
            codec,
            path,
        } = self.prepare(method, endpoint);

        AsyncUnaryCall::new(
            async move {
                let path = path?;
                let request = options.into_request(request)?;
                let mut client = Self::ready_client(connect, endpoint).await?;
                let response = client.unary(request, path, codec).await?;
                Ok(response.into_inner())
            }
            .boxed(),
        )
    }

    fn async_client_streaming_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
    ) -> AsyncClientStreamingCall {
        let Prepared {
            connect,
            endpoint,
            codec,
            path,
        } = self.prepare(method, endpoint);
        let (requests, payload_stream) = RequestStream::channel();

        AsyncClientStreamingCall::new(
            requests,
            async move {
                let path = path?;
                let request = options.into_request(payload_stream)?;
                let mut client = Self::ready_client(connect, endpoint).await?;
                let response = client.client_streaming(request, path, codec).await?;
                Ok(response.into_inner())
            }
            .boxed(),
        )
    }

    fn async_server_streaming_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
        request: serde_json::Value,
    ) -> AsyncServerStreamingCall {
        let Prepared {
            connect,
            endpoint,
            codec,
            path,
        } = self.prepare(method, endpoint);

        AsyncServerStreamingCall::new(
            async move {
                let path = path?;
                let request = options.into_request(request)?;
                let mut client = Self::ready_client(connect, endpoint).await?;
                let response = client.server_streaming(request, path, codec).await?;
                Ok(response.into_inner().boxed())
            }
            .boxed(),
        )
    }

    fn async_duplex_streaming_call(
        &self,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
    ) -> AsyncDuplexStreamingCall {
        let Prepared {
            connect,
            endpoint,
            codec,
            path,
        } = self.prepare(method, endpoint);
        let (requests, payload_stream) = RequestStream::channel();

        AsyncDuplexStreamingCall::new(
            requests,
            async move {
                let path = path?;
                let request = options.into_request(payload_stream)?;
                let mut client = Self::ready_client(connect, endpoint).await?;
                let response = client.streaming(request, path, codec).await?;
                Ok(response.into_inner().boxed())
            }
            .boxed(),
        )
    }
}

fn http_path(method: &RpcMethod) -> Result<PathAndQuery, Status> {
    let path = method.path();
    PathAndQuery::from_str(&path)
        .map_err(|e| Status::internal(format!("Invalid gRPC path '{path}': '{e}'")))
}
