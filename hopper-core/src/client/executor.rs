//! # Client Executor
//!
//! The [`ClientExecutor`] wraps one downstream call with codec selection and retries.
//!
//! ## Retry policy
//!
//! Two nested loops:
//!
//! 1. **Next server**: `max_auto_retries_next_server + 1` iterations. Each one asks the
//!    [`ServiceInstanceProvider`](super::instance::ServiceInstanceProvider) for an instance and
//!    pins it on the context.
//! 2. **Same server**: `max_auto_retries + 1` attempts against the pinned instance.
//!
//! A failure that is not retryable ends the request immediately. Once both loops are exhausted
//! every recorded failure is returned as one [`AggregateError`].
use super::{
    context::{RequestContext, RequestOptions},
    error::{AggregateError, CallError, ClientError, CodecError, Failure},
};
use crate::{
    grpc::codec::SerializerCodec,
    serializer::{DEFAULT_SERIALIZER, SerializerRegistry, SerializerTable},
};
use serde::Deserialize;
use std::{fmt, future::Future, sync::Arc};

/// Process-wide settings of the executor.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Applied to requests that carry no options of their own.
    pub default_request_options: RequestOptions,
    #[serde(skip)]
    pub serializer_table: Arc<dyn SerializerTable>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_request_options: RequestOptions::default(),
            serializer_table: Arc::new(SerializerRegistry::default()),
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("default_request_options", &self.default_request_options)
            .finish_non_exhaustive()
    }
}

/// The next stage of the request pipeline. It performs one attempt.
pub trait Downstream: Send + Sync {
    fn call(&self, ctx: &mut RequestContext)
    -> impl Future<Output = Result<(), CallError>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct ClientExecutor {
    options: ClientOptions,
}

impl ClientExecutor {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns the codec of the request, resolving and caching it on the context first if needed.
    ///
    /// The serializer named in the request options is used when registered, the
    /// [`DEFAULT_SERIALIZER`] otherwise.
    pub fn resolve_codec(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Arc<SerializerCodec>, CodecError> {
        if let Some(codec) = ctx.codec() {
            return Ok(codec.clone());
        }

        let table = &self.options.serializer_table;
        let requested = ctx
            .options()
            .unwrap_or(&self.options.default_request_options)
            .serializer_name
            .as_deref()
            .filter(|name| !name.is_empty());

        let serializer = match requested.and_then(|name| table.get(name)) {
            Some(serializer) => serializer,
            None => {
                if let Some(name) = requested {
                    tracing::debug!(serializer = name, "serializer not registered, using default");
                }
                table
                    .get(DEFAULT_SERIALIZER)
                    .ok_or(CodecError::MissingDefaultSerializer(DEFAULT_SERIALIZER))?
            }
        };

        let codec = Arc::new(SerializerCodec::new(
            serializer,
            ctx.method().input(),
            ctx.method().output(),
        ));
        ctx.set_codec(codec.clone());

        Ok(codec)
    }

    /// Runs `next` under the retry policy of the request.
    ///
    /// Any failure is normalized into a [`ClientError`] whose status code is also written to
    /// the response state of `ctx`.
    pub async fn execute<D: Downstream>(
        &self,
        ctx: &mut RequestContext,
        next: &D,
    ) -> Result<(), ClientError> {
        match self.request(ctx, next).await {
            Ok(()) => Ok(()),
            Err(failure) => {
                let err = ClientError::normalize(ctx.service_name(), failure);
                ctx.response_mut().status_code = Some(err.status_code);
                Err(err)
            }
        }
    }

    async fn request<D: Downstream>(
        &self,
        ctx: &mut RequestContext,
        next: &D,
    ) -> Result<(), Failure> {
        self.resolve_codec(ctx)?;

        let options = ctx
            .options()
            .unwrap_or(&self.options.default_request_options);
        let retries = options.retries();
        let retries_next_server = options.retries_next_server();

        let mut failures = Vec::new();

        for server in 0..retries_next_server {
            let instance = ctx.instances().next_instance();
            tracing::debug!(
                service = ctx.service_name(),
                instance = ?instance.as_ref().map(ToString::to_string),
                server,
                "pinning service instance"
            );
            ctx.pin_instance(instance);

            for attempt in 0..retries {
                match next.call(ctx).await {
                    Ok(()) => return Ok(()),
                    Err(err) if !err.is_retryable() => return Err(err.into()),
                    Err(err) => {
                        tracing::warn!(
                            service = ctx.service_name(),
                            server,
                            attempt,
                            error = %err,
                            "attempt failed"
                        );
                        failures.push(err);
                    }
                }
            }
        }

        tracing::error!(
            service = ctx.service_name(),
            attempts = failures.len(),
            "retries exhausted"
        );

        Err(AggregateError::new(failures).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::instance::{RoundRobin, ServiceInstance},
        serializer::{JSON_WIRE_SERIALIZER, Serializer},
    };
    use prost_reflect::DescriptorPool;
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    fn context(options: RequestOptions) -> RequestContext {
        let pool = DescriptorPool::decode(echo_service::FILE_DESCRIPTOR_SET).unwrap();
        let method = pool
            .get_service_by_name("echo.EchoService")
            .unwrap()
            .methods()
            .find(|m| m.name() == "UnaryEcho")
            .unwrap();
        let instances = RoundRobin::new(vec![
            "http://node1:1".parse().unwrap(),
            "http://node2:1".parse().unwrap(),
            "http://node3:1".parse().unwrap(),
        ]);
        RequestContext::new(method, serde_json::json!({}), Arc::new(instances))
            .with_options(options)
    }

    fn options(max_auto_retries: i32, max_auto_retries_next_server: i32) -> RequestOptions {
        RequestOptions {
            max_auto_retries,
            max_auto_retries_next_server,
            serializer_name: None,
        }
    }

    /// Replays a script of outcomes and records the instance each attempt targeted.
    /// Once the script is over every attempt fails with a 500.
    struct Scripted {
        script: Mutex<VecDeque<Result<(), CallError>>>,
        targets: Mutex<Vec<Option<ServiceInstance>>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<(), CallError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                targets: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.targets.lock().unwrap().len()
        }

        fn distinct_targets(&self) -> usize {
            let mut targets = self.targets.lock().unwrap().clone();
            targets.dedup();
            targets.len()
        }
    }

    impl Downstream for Scripted {
        fn call(
            &self,
            ctx: &mut RequestContext,
        ) -> impl Future<Output = Result<(), CallError>> + Send {
            self.targets.lock().unwrap().push(ctx.service_instance());
            let result = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CallError::service("svc", 500, "scripted")));
            std::future::ready(result)
        }
    }

    fn failure(status_code: u16) -> Result<(), CallError> {
        Err(CallError::service("svc", status_code, "scripted"))
    }

    #[tokio::test]
    async fn first_success_stops_retrying() {
        let executor = ClientExecutor::default();
        let mut ctx = context(options(2, 1));
        let next = Scripted::new(vec![failure(503), failure(503), Ok(())]);

        executor.execute(&mut ctx, &next).await.unwrap();

        assert_eq!(next.calls(), 3);
        assert_eq!(next.distinct_targets(), 1);
    }

    #[tokio::test]
    async fn non_retryable_failure_escapes_immediately() {
        let executor = ClientExecutor::default();
        let mut ctx = context(options(2, 1));
        let next = Scripted::new(vec![failure(400)]);

        let err = executor.execute(&mut ctx, &next).await.unwrap_err();

        assert_eq!(next.calls(), 1);
        assert_eq!(err.status_code, 400);
        assert!(matches!(err.cause, Failure::Call(CallError::Service { .. })));
        assert_eq!(ctx.response().status_code, Some(400));
    }

    #[tokio::test]
    async fn exhausted_budget_aggregates_every_failure() {
        let executor = ClientExecutor::default();
        let mut ctx = context(options(1, 2));
        let next = Scripted::new(vec![]);

        let err = executor.execute(&mut ctx, &next).await.unwrap_err();

        assert_eq!(next.calls(), 6);
        assert_eq!(next.distinct_targets(), 3);
        assert!(matches!(err.cause, Failure::Aggregate(_)));
        assert_eq!(err.failures().len(), 6);
        assert_eq!(err.status_code, 400);
        assert_eq!(ctx.response().status_code, Some(400));
    }

    #[tokio::test]
    async fn attempts_never_exceed_the_budget() {
        for (retries, next_servers) in [(0, 0), (2, 0), (0, 2), (3, 1)] {
            let executor = ClientExecutor::default();
            let mut ctx = context(options(retries, next_servers));
            let next = Scripted::new(vec![]);

            let err = executor.execute(&mut ctx, &next).await.unwrap_err();

            let budget = (retries as usize + 1) * (next_servers as usize + 1);
            assert_eq!(next.calls(), budget);
            assert_eq!(err.failures().len(), budget);
        }
    }

    #[tokio::test]
    async fn non_positive_retries_mean_one_attempt_per_instance() {
        let executor = ClientExecutor::default();
        let mut ctx = context(options(-5, 2));
        let next = Scripted::new(vec![]);

        executor.execute(&mut ctx, &next).await.unwrap_err();

        assert_eq!(next.calls(), 3);
        assert_eq!(next.distinct_targets(), 3);
    }

    #[tokio::test]
    async fn client_defaults_apply_without_request_options() {
        let executor = ClientExecutor::new(ClientOptions {
            default_request_options: options(1, 0),
            ..Default::default()
        });
        let pool = DescriptorPool::decode(echo_service::FILE_DESCRIPTOR_SET).unwrap();
        let method = pool
            .get_service_by_name("echo.EchoService")
            .unwrap()
            .methods()
            .next()
            .unwrap();
        let provider = || -> Option<ServiceInstance> { "http://only:1".parse().ok() };
        let mut ctx = RequestContext::new(method, serde_json::json!({}), Arc::new(provider));
        let next = Scripted::new(vec![]);

        executor.execute(&mut ctx, &next).await.unwrap_err();

        assert_eq!(next.calls(), 2);
    }

    #[tokio::test]
    async fn cancellation_is_not_retried() {
        let executor = ClientExecutor::default();
        let mut ctx = context(options(3, 3));
        let next = Scripted::new(vec![Err(CallError::Cancelled("client went away".into()))]);

        let err = executor.execute(&mut ctx, &next).await.unwrap_err();

        assert_eq!(next.calls(), 1);
        assert_eq!(err.status_code, 400);
    }

    #[tokio::test]
    async fn dropping_the_request_stops_all_attempts() {
        struct Hanging(AtomicUsize);

        impl Downstream for Hanging {
            fn call(
                &self,
                _ctx: &mut RequestContext,
            ) -> impl Future<Output = Result<(), CallError>> + Send {
                self.0.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<Result<(), CallError>>()
            }
        }

        let executor = ClientExecutor::default();
        let mut ctx = context(options(3, 3));
        let next = Hanging(AtomicUsize::new(0));

        let result =
            tokio::time::timeout(Duration::from_millis(50), executor.execute(&mut ctx, &next))
                .await;

        assert!(result.is_err());
        assert_eq!(next.0.load(Ordering::SeqCst), 1);
    }

    /// Counts lookups on top of a registry.
    struct CountingTable {
        registry: SerializerRegistry,
        lookups: AtomicUsize,
    }

    impl CountingTable {
        fn new(registry: SerializerRegistry) -> Arc<Self> {
            Arc::new(Self {
                registry,
                lookups: AtomicUsize::new(0),
            })
        }
    }

    impl SerializerTable for CountingTable {
        fn get(&self, name: &str) -> Option<Arc<dyn Serializer>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.registry.get(name)
        }
    }

    fn executor_with(table: Arc<CountingTable>) -> ClientExecutor {
        ClientExecutor::new(ClientOptions {
            serializer_table: table,
            ..Default::default()
        })
    }

    #[test]
    fn codec_resolution_is_idempotent() {
        let table = CountingTable::new(SerializerRegistry::default());
        let executor = executor_with(table.clone());
        let mut ctx = context(RequestOptions::default());

        let first = executor.resolve_codec(&mut ctx).unwrap();
        let lookups = table.lookups.load(Ordering::SeqCst);
        let second = executor.resolve_codec(&mut ctx).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.lookups.load(Ordering::SeqCst), lookups);
        assert_eq!(first.serializer_name(), DEFAULT_SERIALIZER);
        assert_eq!(first.request_type().full_name(), "echo.EchoRequest");
        assert_eq!(first.response_type().full_name(), "echo.EchoResponse");
    }

    #[test]
    fn requested_serializer_is_used_when_registered() {
        let executor = ClientExecutor::default();
        let mut ctx = context(RequestOptions {
            serializer_name: Some(JSON_WIRE_SERIALIZER.to_string()),
            ..Default::default()
        });

        let codec = executor.resolve_codec(&mut ctx).unwrap();

        assert_eq!(codec.serializer_name(), JSON_WIRE_SERIALIZER);
    }

    #[test]
    fn unknown_or_empty_serializer_falls_back_to_json() {
        for name in ["msgpack", ""] {
            let executor = ClientExecutor::default();
            let mut ctx = context(RequestOptions {
                serializer_name: Some(name.to_string()),
                ..Default::default()
            });

            let codec = executor.resolve_codec(&mut ctx).unwrap();

            assert_eq!(codec.serializer_name(), DEFAULT_SERIALIZER);
        }
    }

    #[tokio::test]
    async fn missing_default_serializer_fails_before_any_attempt() {
        let executor = executor_with(CountingTable::new(SerializerRegistry::empty()));
        let mut ctx = context(options(2, 2));
        let next = Scripted::new(vec![Ok(())]);

        let err = executor.execute(&mut ctx, &next).await.unwrap_err();

        assert_eq!(next.calls(), 0);
        assert!(matches!(
            err.cause,
            Failure::Codec(CodecError::MissingDefaultSerializer(_))
        ));
        assert_eq!(err.status_code, 400);
        assert_eq!(ctx.response().status_code, Some(400));
    }

    #[tokio::test]
    async fn service_status_is_written_back() {
        let executor = ClientExecutor::default();
        let mut ctx = context(options(0, 0));
        let next = Scripted::new(vec![failure(404)]);

        let err = executor.execute(&mut ctx, &next).await.unwrap_err();

        assert_eq!(err.status_code, 404);
        assert_eq!(err.service_name, "echo.EchoService");
        assert_eq!(ctx.response().status_code, Some(404));
    }
}
