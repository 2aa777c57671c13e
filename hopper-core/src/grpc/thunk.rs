//! # Invocation Thunks
//!
//! A method descriptor only tells us the *shape* of a call at runtime. Turning it into an actual
//! transport call means picking one of the five [`CallInvoker`] operations and the argument list
//! that operation expects. An [`InvocationThunk`] is that decision, made once and kept:
//!
//! * the requested [`CallKind`] selects the operation through a fixed table;
//! * the operation fixes the [`ParameterShape`]: client and duplex streaming take
//!   `(method, endpoint, options)`, unary and server streaming also take the request payload;
//! * the thunk stays bound to the method and payload types it was built for.
//!
//! [`ThunkCache`] memoizes thunks per `(call kind, method, request type, response type)`. A key is
//! built at most once, even when many callers ask for it concurrently, while different keys are
//! built independently of each other.
use super::{
    MethodType, RpcMethod,
    invoker::{
        AsyncClientStreamingCall, AsyncDuplexStreamingCall, AsyncServerStreamingCall,
        AsyncUnaryCall, CallInvoker, CallOptions,
    },
};
use http::Uri;
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{
        Arc, LazyLock, OnceLock, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};
use tonic::Status;

/// The transport operation a thunk performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    BlockingUnary,
    AsyncUnary,
    AsyncClientStreaming,
    AsyncServerStreaming,
    AsyncDuplexStreaming,
}

impl CallKind {
    pub const ALL: [CallKind; 5] = [
        CallKind::BlockingUnary,
        CallKind::AsyncUnary,
        CallKind::AsyncClientStreaming,
        CallKind::AsyncServerStreaming,
        CallKind::AsyncDuplexStreaming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::BlockingUnary => "blocking_unary",
            CallKind::AsyncUnary => "async_unary",
            CallKind::AsyncClientStreaming => "async_client_streaming",
            CallKind::AsyncServerStreaming => "async_server_streaming",
            CallKind::AsyncDuplexStreaming => "async_duplex_streaming",
        }
    }

    /// The call kind used for a method when the caller does not ask for a specific one.
    pub fn for_method(method_type: MethodType) -> Self {
        match method_type {
            MethodType::Unary => CallKind::AsyncUnary,
            MethodType::ClientStreaming => CallKind::AsyncClientStreaming,
            MethodType::ServerStreaming => CallKind::AsyncServerStreaming,
            MethodType::DuplexStreaming => CallKind::AsyncDuplexStreaming,
        }
    }

    pub fn shape(&self) -> ParameterShape {
        match self {
            CallKind::AsyncClientStreaming | CallKind::AsyncDuplexStreaming => {
                ParameterShape::StreamedPayload
            }
            CallKind::BlockingUnary | CallKind::AsyncUnary | CallKind::AsyncServerStreaming => {
                ParameterShape::WithPayload
            }
        }
    }

    fn accepts(&self, method_type: MethodType) -> bool {
        match self {
            CallKind::BlockingUnary | CallKind::AsyncUnary => method_type == MethodType::Unary,
            kind => *kind == CallKind::for_method(method_type),
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallKind {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CallKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ResolveError::UnknownCallKind(s.to_string()))
    }
}

/// The argument list a thunk expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterShape {
    /// `(method, endpoint, options, payload)`
    WithPayload,
    /// `(method, endpoint, options)`; requests are pushed through the returned call handle.
    StreamedPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Unknown call kind '{0}'")]
    UnknownCallKind(String),
    #[error("Call kind '{call_kind}' cannot invoke the {method_type} method '{method}'")]
    IncompatibleCallKind {
        call_kind: CallKind,
        method_type: MethodType,
        method: String,
    },
    #[error("Call kind '{0}' requires a request payload")]
    PayloadRequired(CallKind),
    #[error("Call kind '{0}' streams its requests and takes no payload")]
    UnexpectedPayload(CallKind),
    #[error("Thunk bound to '{expected}' cannot invoke '{actual}'")]
    MethodMismatch { expected: String, actual: String },
}

/// Whatever the transport operation returned. The thunk does not interpret it.
pub enum CallOutcome {
    Response(Result<serde_json::Value, Status>),
    Unary(AsyncUnaryCall),
    ClientStreaming(AsyncClientStreamingCall),
    ServerStreaming(AsyncServerStreamingCall),
    DuplexStreaming(AsyncDuplexStreamingCall),
}

impl fmt::Debug for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            CallOutcome::Response(_) => "Response",
            CallOutcome::Unary(_) => "Unary",
            CallOutcome::ClientStreaming(_) => "ClientStreaming",
            CallOutcome::ServerStreaming(_) => "ServerStreaming",
            CallOutcome::DuplexStreaming(_) => "DuplexStreaming",
        };
        f.debug_tuple("CallOutcome").field(&variant).finish()
    }
}

type WithPayloadFn =
    fn(&dyn CallInvoker, &RpcMethod, &Uri, CallOptions, serde_json::Value) -> CallOutcome;
type StreamedFn = fn(&dyn CallInvoker, &RpcMethod, &Uri, CallOptions) -> CallOutcome;

#[derive(Clone, Copy)]
enum Routine {
    WithPayload(WithPayloadFn),
    Streamed(StreamedFn),
}

fn blocking_unary(
    invoker: &dyn CallInvoker,
    method: &RpcMethod,
    endpoint: &Uri,
    options: CallOptions,
    request: serde_json::Value,
) -> CallOutcome {
    CallOutcome::Response(invoker.blocking_unary_call(method, endpoint, options, request))
}

fn async_unary(
    invoker: &dyn CallInvoker,
    method: &RpcMethod,
    endpoint: &Uri,
    options: CallOptions,
    request: serde_json::Value,
) -> CallOutcome {
    CallOutcome::Unary(invoker.async_unary_call(method, endpoint, options, request))
}

fn async_server_streaming(
    invoker: &dyn CallInvoker,
    method: &RpcMethod,
    endpoint: &Uri,
    options: CallOptions,
    request: serde_json::Value,
) -> CallOutcome {
    CallOutcome::ServerStreaming(
        invoker.async_server_streaming_call(method, endpoint, options, request),
    )
}

fn async_client_streaming(
    invoker: &dyn CallInvoker,
    method: &RpcMethod,
    endpoint: &Uri,
    options: CallOptions,
) -> CallOutcome {
    CallOutcome::ClientStreaming(invoker.async_client_streaming_call(method, endpoint, options))
}

fn async_duplex_streaming(
    invoker: &dyn CallInvoker,
    method: &RpcMethod,
    endpoint: &Uri,
    options: CallOptions,
) -> CallOutcome {
    CallOutcome::DuplexStreaming(invoker.async_duplex_streaming_call(method, endpoint, options))
}

fn routine_for(kind: CallKind) -> Routine {
    match kind {
        CallKind::BlockingUnary => Routine::WithPayload(blocking_unary),
        CallKind::AsyncUnary => Routine::WithPayload(async_unary),
        CallKind::AsyncServerStreaming => Routine::WithPayload(async_server_streaming),
        CallKind::AsyncClientStreaming => Routine::Streamed(async_client_streaming),
        CallKind::AsyncDuplexStreaming => Routine::Streamed(async_duplex_streaming),
    }
}

/// Identity of a thunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThunkKey {
    pub call_kind: CallKind,
    pub method: String,
    pub request_type: String,
    pub response_type: String,
}

impl ThunkKey {
    pub fn new(call_kind: CallKind, method: &RpcMethod) -> Self {
        Self {
            call_kind,
            method: method.full_name().to_string(),
            request_type: method.request_type(),
            response_type: method.response_type(),
        }
    }

    fn same_signature(&self, other: &ThunkKey) -> bool {
        self.method == other.method
            && self.request_type == other.request_type
            && self.response_type == other.response_type
    }
}

impl fmt::Display for ThunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) -> {}",
            self.method, self.request_type, self.response_type
        )
    }
}

/// A routine bound to one method and one call kind, reusable by any number of callers.
pub struct InvocationThunk {
    key: ThunkKey,
    routine: Routine,
}

impl InvocationThunk {
    fn build(key: ThunkKey) -> Self {
        let routine = routine_for(key.call_kind);
        Self { key, routine }
    }

    pub fn key(&self) -> &ThunkKey {
        &self.key
    }

    pub fn call_kind(&self) -> CallKind {
        self.key.call_kind
    }

    pub fn shape(&self) -> ParameterShape {
        match self.routine {
            Routine::WithPayload(_) => ParameterShape::WithPayload,
            Routine::Streamed(_) => ParameterShape::StreamedPayload,
        }
    }

    /// Performs the bound transport operation.
    ///
    /// `payload` must be `Some` exactly when [`shape`](Self::shape) is
    /// [`ParameterShape::WithPayload`].
    pub fn invoke(
        &self,
        invoker: &dyn CallInvoker,
        method: &RpcMethod,
        endpoint: &Uri,
        options: CallOptions,
        payload: Option<serde_json::Value>,
    ) -> Result<CallOutcome, ResolveError> {
        let actual = ThunkKey::new(self.key.call_kind, method);
        if !self.key.same_signature(&actual) {
            return Err(ResolveError::MethodMismatch {
                expected: self.key.to_string(),
                actual: actual.to_string(),
            });
        }

        match (self.routine, payload) {
            (Routine::WithPayload(call), Some(payload)) => {
                Ok(call(invoker, method, endpoint, options, payload))
            }
            (Routine::Streamed(call), None) => Ok(call(invoker, method, endpoint, options)),
            (Routine::WithPayload(_), None) => Err(ResolveError::PayloadRequired(self.call_kind())),
            (Routine::Streamed(_), Some(_)) => {
                Err(ResolveError::UnexpectedPayload(self.call_kind()))
            }
        }
    }
}

impl fmt::Debug for InvocationThunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationThunk")
            .field("key", &self.key)
            .field("shape", &self.shape())
            .finish()
    }
}

type Slot = Arc<OnceLock<Arc<InvocationThunk>>>;

/// Memoizing resolver of [`InvocationThunk`]s.
#[derive(Default)]
pub struct ThunkCache {
    slots: RwLock<HashMap<ThunkKey, Slot>>,
    builds: AtomicUsize,
}

static GLOBAL_THUNKS: LazyLock<ThunkCache> = LazyLock::new(ThunkCache::new);

impl ThunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> &'static ThunkCache {
        &GLOBAL_THUNKS
    }

    /// Resolves the thunk performing `call_kind` (e.g. `"async_server_streaming"`) for `method`.
    pub fn get(
        &self,
        method: &RpcMethod,
        call_kind: &str,
    ) -> Result<Arc<InvocationThunk>, ResolveError> {
        self.get_for(method, call_kind.parse()?)
    }

    pub fn get_for(
        &self,
        method: &RpcMethod,
        call_kind: CallKind,
    ) -> Result<Arc<InvocationThunk>, ResolveError> {
        let method_type = method.method_type();
        if !call_kind.accepts(method_type) {
            return Err(ResolveError::IncompatibleCallKind {
                call_kind,
                method_type,
                method: method.full_name().to_string(),
            });
        }

        let key = ThunkKey::new(call_kind, method);
        let slot = self.slot(&key);
        let thunk = slot.get_or_init(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(method = %key.method, call_kind = %key.call_kind, "building invocation thunk");
            Arc::new(InvocationThunk::build(key))
        });

        Ok(thunk.clone())
    }

    /// Number of thunks built so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Number of distinct keys seen so far.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &ThunkKey) -> Slot {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return slot.clone();
        }

        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }
}
