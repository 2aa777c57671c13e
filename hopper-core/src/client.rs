//! # Hopper Client
//!
//! This module implements the high-level logic for executing dynamic gRPC requests.
//!
//! A call goes through three layers:
//!
//! 1. **[`HopperClient`]** resolves the `service/method` names in its `DescriptorPool` and builds a
//!    [`RequestContext`].
//! 2. **[`ClientExecutor`]** resolves the codec of the request and runs the retry loops, pinning a
//!    [`ServiceInstance`] for each round of attempts.
//! 3. **[`GrpcStage`]** performs one attempt: it resolves an invocation thunk for the method and
//!    calls the transport through it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hopper_core::client::{ClientOptions, DynamicRequest, HopperClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = std::fs::read("descriptor.bin")?;
//! let client = HopperClient::connect(
//!     vec!["http://localhost:50051".parse()?, "http://localhost:50052".parse()?],
//!     &descriptor,
//!     ClientOptions::default(),
//! )?;
//!
//! let _response = client
//!     .call(DynamicRequest {
//!         service: "echo.EchoService".to_string(),
//!         method: "UnaryEcho".to_string(),
//!         body: serde_json::json!({ "message": "hi" }),
//!         ..Default::default()
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
pub mod context;
pub mod error;
pub mod executor;
pub mod instance;
pub mod route;
pub mod stage;
mod types;

pub use context::{RequestContext, RequestOptions, ResponseState};
pub use error::{AggregateError, CallError, ClientError, CodecError, Failure};
pub use executor::{ClientExecutor, ClientOptions, Downstream};
pub use instance::{RoundRobin, ServiceInstance, ServiceInstanceProvider};
pub use route::HttpMetadata;
pub use stage::GrpcStage;
pub use types::*;

use crate::grpc::{
    client::GrpcInvoker,
    invoker::{CallInvoker, CallOptions},
    thunk::ThunkCache,
};
use prost_reflect::{DescriptorError, DescriptorPool};
use std::{fmt, sync::Arc};
use tonic::transport::Channel;

/// Errors that can occur during a dynamic call.
#[derive(Debug, thiserror::Error)]
pub enum DynamicCallError {
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
    #[error("Method '{0}' not found")]
    MethodNotFound(String),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("The call completed without a response")]
    EmptyResponse,
}

/// The main client for performing dynamic gRPC calls against a set of service instances.
pub struct HopperClient<I = GrpcInvoker<Channel>> {
    pool: DescriptorPool,
    instances: Arc<dyn ServiceInstanceProvider>,
    executor: ClientExecutor,
    stage: GrpcStage<I>,
}

impl HopperClient {
    /// Creates a client balancing over `instances` in round robin, with the schema read from an
    /// encoded `FileDescriptorSet`.
    ///
    /// Channels are connected lazily, on the first call to each instance.
    pub fn connect(
        instances: Vec<ServiceInstance>,
        file_descriptor: &[u8],
        options: ClientOptions,
    ) -> Result<Self, DescriptorError> {
        let pool = DescriptorPool::decode(file_descriptor)?;
        Ok(Self::new(
            GrpcInvoker::lazy(),
            RoundRobin::new(instances),
            pool,
            options,
        ))
    }
}

impl<I: CallInvoker> HopperClient<I> {
    pub fn new(
        invoker: I,
        instances: impl ServiceInstanceProvider + 'static,
        pool: DescriptorPool,
        options: ClientOptions,
    ) -> Self {
        Self {
            pool,
            instances: Arc::new(instances),
            executor: ClientExecutor::new(options),
            stage: GrpcStage::new(invoker),
        }
    }

    /// Resolves invocation thunks through `thunks` instead of the process-wide cache.
    pub fn with_thunk_cache(self, thunks: &'static ThunkCache) -> Self {
        Self {
            stage: GrpcStage::with_thunks(self.stage.into_invoker(), thunks),
            ..self
        }
    }

    pub fn executor(&self) -> &ClientExecutor {
        &self.executor
    }

    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Lists the fully qualified names of all services in the schema (e.g. `echo.EchoService`).
    pub fn list_services(&self) -> Vec<String> {
        self.pool
            .services()
            .map(|s| s.full_name().to_string())
            .collect()
    }

    /// Lists the methods of `service`, or `None` if the schema does not define it.
    pub fn list_methods(&self, service: &str) -> Option<Vec<String>> {
        let service = self.pool.get_service_by_name(service)?;
        Some(service.methods().map(|m| m.name().to_string()).collect())
    }

    /// Executes a dynamic gRPC request under the retry policy of the client.
    pub async fn call(&self, request: DynamicRequest) -> Result<DynamicResponse, DynamicCallError> {
        let method = self
            .pool
            .get_service_by_name(&request.service)
            .ok_or_else(|| DynamicCallError::ServiceNotFound(request.service.clone()))?
            .methods()
            .find(|m| m.name() == request.method)
            .ok_or_else(|| DynamicCallError::MethodNotFound(request.method.clone()))?;

        let call_options = CallOptions {
            headers: request.headers,
            timeout: request.timeout,
        };
        let mut ctx = RequestContext::new(method, request.body, self.instances.clone())
            .with_call_options(call_options);
        if let Some(options) = request.options {
            ctx = ctx.with_options(options);
        }
        if let Some(call_kind) = request.call_kind {
            ctx = ctx.with_call_kind(call_kind);
        }
        if let Some(route) = request.route {
            ctx = ctx.with_route(route);
        }

        self.executor.execute(&mut ctx, &self.stage).await?;

        ctx.response_mut()
            .body
            .take()
            .ok_or(DynamicCallError::EmptyResponse)
    }
}

impl<I> fmt::Debug for HopperClient<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopperClient")
            .field("services", &self.pool.services().count())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}
