//! # Route Metadata
//!
//! Routes declare their HTTP method and path with an explicit [`HttpMetadata`] value at
//! registration time; it is then collected into the items of the request context.
use http::Method;
use std::collections::HashMap;

/// Item key holding the HTTP method of the route.
pub const HTTP_METHOD_ITEM: &str = "HttpMethod";
/// Item key holding the path of the route.
pub const PATH_ITEM: &str = "Path";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMetadata {
    method: Method,
    path: Option<String>,
}

impl HttpMetadata {
    pub fn new(method: Method) -> Self {
        Self { method, path: None }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET).with_path(path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST).with_path(path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT).with_path(path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE).with_path(path)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Writes the method (and the path, when set) into `items`.
    pub fn collect(&self, items: &mut HashMap<String, String>) {
        items.insert(HTTP_METHOD_ITEM.to_string(), self.method.to_string());
        if let Some(path) = &self.path {
            items.insert(PATH_ITEM.to_string(), path.clone());
        }
    }
}
