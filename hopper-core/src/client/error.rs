//! # Failures
//!
//! * [`CallError`]: the failure of one downstream attempt. Only a [`CallError::Service`] with a
//!   status code of 500 or more is worth retrying.
//! * [`AggregateError`]: every failure of a request that exhausted its retry budget, in the
//!   order they happened.
//! * [`ClientError`]: the single shape every failure takes once it leaves the executor.
use crate::{BoxError, grpc::thunk::ResolveError};
use tonic::{Code, Status};

/// Status code assigned to failures that do not carry one.
pub const DEFAULT_STATUS_CODE: u16 = 400;

/// Failure of a single downstream attempt.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Service '{service_name}' failed with status {status_code}: '{message}'")]
    Service {
        service_name: String,
        status_code: u16,
        message: String,
    },
    #[error("The call was cancelled: '{0}'")]
    Cancelled(String),
    #[error("Invalid input: '{0}'")]
    InvalidInput(String),
    #[error("Failed to resolve the invocation: '{0}'")]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Other(BoxError),
}

impl CallError {
    pub fn service(
        service_name: impl Into<String>,
        status_code: u16,
        message: impl Into<String>,
    ) -> Self {
        CallError::Service {
            service_name: service_name.into(),
            status_code,
            message: message.into(),
        }
    }

    /// Classifies a gRPC status returned by `service_name`.
    pub fn from_status(service_name: &str, status: &Status) -> Self {
        match status.code() {
            Code::Cancelled => CallError::Cancelled(status.message().to_string()),
            code => CallError::service(service_name, http_status(code), status.message()),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            CallError::Service { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Only server-side failures are retried.
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_some_and(|code| code >= 500)
    }
}

/// Maps a gRPC status code onto its HTTP counterpart.
pub fn http_status(code: Code) -> u16 {
    match code {
        Code::Ok => 200,
        Code::Cancelled => 499,
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => 400,
        Code::Unauthenticated => 401,
        Code::PermissionDenied => 403,
        Code::NotFound => 404,
        Code::AlreadyExists | Code::Aborted => 409,
        Code::ResourceExhausted => 429,
        Code::Unknown | Code::Internal | Code::DataLoss => 500,
        Code::Unimplemented => 501,
        Code::Unavailable => 503,
        Code::DeadlineExceeded => 504,
    }
}

/// All failures of a request that ran out of attempts.
#[derive(Debug, thiserror::Error)]
#[error("All {} attempts failed, last failure: '{}'", .0.len(), last_failure(.0))]
pub struct AggregateError(Vec<CallError>);

fn last_failure(failures: &[CallError]) -> String {
    failures
        .last()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl AggregateError {
    pub fn new(failures: Vec<CallError>) -> Self {
        Self(failures)
    }

    /// The recorded failures, oldest first.
    pub fn failures(&self) -> &[CallError] {
        &self.0
    }

    pub fn into_failures(self) -> Vec<CallError> {
        self.0
    }
}

/// Errors that prevent a request from being prepared.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("No serializer is registered under the default name '{0}'")]
    MissingDefaultSerializer(&'static str),
}

/// Anything that can escape the retry loops.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The normalized failure of a request, whatever happened inside the executor.
#[derive(Debug, thiserror::Error)]
#[error("Request to '{service_name}' failed with status {status_code}: {cause}")]
pub struct ClientError {
    pub status_code: u16,
    pub service_name: String,
    #[source]
    pub cause: Failure,
}

impl ClientError {
    /// Keeps the status code of service failures, assigns [`DEFAULT_STATUS_CODE`] otherwise.
    pub fn normalize(service_name: impl Into<String>, cause: Failure) -> Self {
        let status_code = match &cause {
            Failure::Call(CallError::Service { status_code, .. }) => *status_code,
            _ => DEFAULT_STATUS_CODE,
        };

        Self {
            status_code,
            service_name: service_name.into(),
            cause,
        }
    }

    /// The attempt failures behind this error: one, all of the aggregated ones, or none if the
    /// request was never attempted.
    pub fn failures(&self) -> &[CallError] {
        match &self.cause {
            Failure::Call(err) => std::slice::from_ref(err),
            Failure::Aggregate(aggregate) => aggregate.failures(),
            Failure::Codec(_) => &[],
        }
    }
}
