//! # Request Context
//!
//! The mutable, request-scoped state shared by the executor and the downstream stage of one
//! logical call. A context is created per call and owned by it; it is never shared between
//! concurrent calls.
use super::{
    instance::{ServiceInstance, ServiceInstanceProvider},
    route::HttpMetadata,
    types::DynamicResponse,
};
use crate::grpc::{codec::SerializerCodec, invoker::CallOptions};
use prost_reflect::MethodDescriptor;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};

/// Retry and serialization settings of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Extra attempts against the same service instance.
    pub max_auto_retries: i32,
    /// Extra service instances to try once attempts on one instance are exhausted.
    pub max_auto_retries_next_server: i32,
    /// Serializer to use instead of the default `"json"` one.
    pub serializer_name: Option<String>,
}

impl RequestOptions {
    /// Attempts per service instance. Never less than one.
    pub fn retries(&self) -> usize {
        self.max_auto_retries.max(0) as usize + 1
    }

    /// Service instances to try. Never less than one.
    pub fn retries_next_server(&self) -> usize {
        self.max_auto_retries_next_server.max(0) as usize + 1
    }
}

/// What the downstream stage reported back.
#[derive(Debug, Default)]
pub struct ResponseState {
    /// HTTP-style status code of the call.
    pub status_code: Option<u16>,
    pub body: Option<DynamicResponse>,
}

enum InstanceSelection {
    Unpinned,
    Pinned(Option<ServiceInstance>),
}

pub struct RequestContext {
    service_name: String,
    method: MethodDescriptor,
    body: serde_json::Value,
    call_options: CallOptions,
    options: Option<RequestOptions>,
    call_kind: Option<String>,
    codec: Option<Arc<SerializerCodec>>,
    instances: Arc<dyn ServiceInstanceProvider>,
    selection: InstanceSelection,
    response: ResponseState,
    items: HashMap<String, String>,
}

impl RequestContext {
    /// Creates the context of a call to `method` with the given JSON `body`.
    ///
    /// The body is an Object for unary and server-streaming methods and an Array of Objects
    /// for client-streaming and bidirectional methods.
    pub fn new(
        method: MethodDescriptor,
        body: serde_json::Value,
        instances: Arc<dyn ServiceInstanceProvider>,
    ) -> Self {
        Self {
            service_name: method.parent_service().full_name().to_string(),
            method,
            body,
            call_options: CallOptions::default(),
            options: None,
            call_kind: None,
            codec: None,
            instances,
            selection: InstanceSelection::Unpinned,
            response: ResponseState::default(),
            items: HashMap::new(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_call_options(mut self, call_options: CallOptions) -> Self {
        self.call_options = call_options;
        self
    }

    /// Forces a call kind (e.g. `"blocking_unary"`) instead of the method's default one.
    pub fn with_call_kind(mut self, call_kind: impl Into<String>) -> Self {
        self.call_kind = Some(call_kind.into());
        self
    }

    /// Contributes the route's HTTP method and path to the items of this context.
    pub fn with_route(mut self, route: HttpMetadata) -> Self {
        route.collect(&mut self.items);
        self
    }

    /// The fully qualified name of the target service (e.g. `echo.EchoService`).
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    pub fn call_options(&self) -> &CallOptions {
        &self.call_options
    }

    pub fn options(&self) -> Option<&RequestOptions> {
        self.options.as_ref()
    }

    pub fn call_kind(&self) -> Option<&str> {
        self.call_kind.as_deref()
    }

    pub fn codec(&self) -> Option<&Arc<SerializerCodec>> {
        self.codec.as_ref()
    }

    pub(crate) fn set_codec(&mut self, codec: Arc<SerializerCodec>) {
        self.codec = Some(codec);
    }

    pub fn instances(&self) -> &Arc<dyn ServiceInstanceProvider> {
        &self.instances
    }

    /// The instance the current attempt must target.
    ///
    /// Once an instance is pinned every call returns it; before that each call asks the
    /// provider again.
    pub fn service_instance(&self) -> Option<ServiceInstance> {
        match &self.selection {
            InstanceSelection::Pinned(instance) => instance.clone(),
            InstanceSelection::Unpinned => self.instances.next_instance(),
        }
    }

    /// Pins `instance` for every following attempt, until the next pin.
    pub(crate) fn pin_instance(&mut self, instance: Option<ServiceInstance>) {
        self.selection = InstanceSelection::Pinned(instance);
    }

    pub fn response(&self) -> &ResponseState {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseState {
        &mut self.response
    }

    pub fn items(&self) -> &HashMap<String, String> {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.items
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pinned = match &self.selection {
            InstanceSelection::Pinned(instance) => Some(instance),
            InstanceSelection::Unpinned => None,
        };
        f.debug_struct("RequestContext")
            .field("method", &self.method.full_name())
            .field("options", &self.options)
            .field("call_kind", &self.call_kind)
            .field("codec", &self.codec)
            .field("pinned_instance", &pinned)
            .field("response", &self.response)
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}
