//! # gRPC Stage
//!
//! The [`Downstream`] stage performing one attempt of a dynamic gRPC call against the instance
//! pinned on the [`RequestContext`].
use super::{
    context::{RequestContext, ResponseState},
    error::CallError,
    executor::Downstream,
    types::DynamicResponse,
};
use crate::grpc::{
    RpcMethod,
    invoker::{CallInvoker, RequestStream, ResponseStream},
    thunk::{CallKind, CallOutcome, ParameterShape, ThunkCache},
};
use futures_util::StreamExt;
use std::future::Future;
use tonic::Status;

/// Status code reported when no service instance can be selected.
const NO_INSTANCE_STATUS: u16 = 503;

pub struct GrpcStage<I> {
    invoker: I,
    thunks: &'static ThunkCache,
}

impl<I: CallInvoker> GrpcStage<I> {
    /// Creates a stage resolving its thunks through [`ThunkCache::global`].
    pub fn new(invoker: I) -> Self {
        Self::with_thunks(invoker, ThunkCache::global())
    }

    pub fn with_thunks(invoker: I, thunks: &'static ThunkCache) -> Self {
        Self { invoker, thunks }
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    pub fn into_invoker(self) -> I {
        self.invoker
    }
}

impl<I: CallInvoker> Downstream for GrpcStage<I> {
    fn call(
        &self,
        ctx: &mut RequestContext,
    ) -> impl Future<Output = Result<(), CallError>> + Send {
        async move {
            let service_name = ctx.service_name().to_string();

            let instance = ctx.service_instance().ok_or_else(|| {
                CallError::service(
                    &service_name,
                    NO_INSTANCE_STATUS,
                    "No service instance available",
                )
            })?;
            let codec = ctx
                .codec()
                .cloned()
                .ok_or_else(|| CallError::Other("the request codec was not resolved".into()))?;

            let method = RpcMethod::new(ctx.method().clone(), codec.as_ref().clone());
            let thunk = match ctx.call_kind() {
                Some(call_kind) => self.thunks.get(&method, call_kind)?,
                None => self
                    .thunks
                    .get_for(&method, CallKind::for_method(method.method_type()))?,
            };

            let (payload, requests) = match thunk.shape() {
                ParameterShape::WithPayload => (Some(ctx.body().clone()), Vec::new()),
                ParameterShape::StreamedPayload => (None, json_array(ctx.body())?),
            };

            tracing::debug!(
                method = method.full_name(),
                call_kind = %thunk.call_kind(),
                instance = %instance,
                "invoking"
            );

            let outcome = thunk.invoke(
                &self.invoker,
                &method,
                instance.uri(),
                ctx.call_options().clone(),
                payload,
            )?;
            let body = drive(outcome, requests)
                .await
                .map_err(|status| CallError::from_status(&service_name, &status))?;

            *ctx.response_mut() = ResponseState {
                status_code: Some(200),
                body: Some(body),
            };

            Ok(())
        }
    }
}

/// Feeds the requests to the call and waits for its response(s).
async fn drive(
    outcome: CallOutcome,
    requests: Vec<serde_json::Value>,
) -> Result<DynamicResponse, Status> {
    match outcome {
        CallOutcome::Response(result) => result.map(DynamicResponse::Unary),
        CallOutcome::Unary(call) => call.response().await.map(DynamicResponse::Unary),
        CallOutcome::ServerStreaming(call) => Ok(collect(call.responses().await?).await),
        CallOutcome::ClientStreaming(call) => {
            send_all(call.requests(), requests);
            call.response().await.map(DynamicResponse::Unary)
        }
        CallOutcome::DuplexStreaming(call) => {
            let (stream, responses) = call.split();
            send_all(&stream, requests);
            stream.complete();
            Ok(collect(responses.await?).await)
        }
    }
}

/// Stops at the first rejected item: the call has ended and its response carries the reason.
fn send_all(stream: &RequestStream, requests: Vec<serde_json::Value>) {
    for item in requests {
        if stream.send(item).is_err() {
            break;
        }
    }
}

async fn collect(responses: ResponseStream) -> DynamicResponse {
    DynamicResponse::Streaming(responses.collect().await)
}

fn json_array(body: &serde_json::Value) -> Result<Vec<serde_json::Value>, CallError> {
    match body {
        serde_json::Value::Array(items) => Ok(items.clone()),
        _ => Err(CallError::InvalidInput(
            "Client streaming requires a JSON Array body".to_string(),
        )),
    }
}
