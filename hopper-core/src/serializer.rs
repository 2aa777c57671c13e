//! # Serializers
//!
//! A [`Serializer`] turns a `serde_json::Value` into the bytes of one gRPC message (and back),
//! validating it against the Protobuf `MessageDescriptor` of that message.
//!
//! Two serializers ship with the crate:
//!
//! * **`json`** ([`ProtobufJsonSerializer`]): the caller works with JSON, the wire carries
//!   Protobuf binary. This is what regular gRPC servers expect and it is the mandatory
//!   fallback entry of every registry.
//! * **`grpc-json`** ([`JsonWireSerializer`]): each message is JSON text inside a regular gRPC
//!   frame. The request content type stays `application/grpc`, so the server must accept JSON
//!   bodies there regardless of the content-type subtype.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use std::{collections::HashMap, fmt, sync::Arc};
use tonic::Status;

/// Name of the serializer used when none (or an unknown one) is requested.
pub const DEFAULT_SERIALIZER: &str = "json";

/// Name of the serializer that keeps JSON text on the wire.
pub const JSON_WIRE_SERIALIZER: &str = "grpc-json";

/// Encodes and decodes single gRPC messages.
pub trait Serializer: Send + Sync + 'static {
    /// The name this serializer is registered under.
    fn name(&self) -> &str;

    /// Encodes `item`, which must match the `desc` schema.
    fn serialize(&self, desc: &MessageDescriptor, item: serde_json::Value)
    -> Result<Vec<u8>, Status>;

    /// Decodes one message of type `desc` from `bytes`.
    fn deserialize(&self, desc: &MessageDescriptor, bytes: &[u8])
    -> Result<serde_json::Value, Status>;
}

/// Lookup of serializers by name.
///
/// Implementations must expose an entry under [`DEFAULT_SERIALIZER`].
pub trait SerializerTable: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Serializer>>;
}

/// JSON on the caller side, Protobuf binary on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufJsonSerializer;

impl Serializer for ProtobufJsonSerializer {
    fn name(&self) -> &str {
        DEFAULT_SERIALIZER
    }

    fn serialize(
        &self,
        desc: &MessageDescriptor,
        item: serde_json::Value,
    ) -> Result<Vec<u8>, Status> {
        // serde_json::Value implements IntoDeserializer, so we can pass it directly.
        let msg = DynamicMessage::deserialize(desc.clone(), item).map_err(schema_mismatch)?;
        Ok(msg.encode_to_vec())
    }

    fn deserialize(
        &self,
        desc: &MessageDescriptor,
        bytes: &[u8],
    ) -> Result<serde_json::Value, Status> {
        let msg = DynamicMessage::decode(desc.clone(), bytes)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {}", e)))?;

        to_json(&msg)
    }
}

/// JSON text in a plain `application/grpc` frame, validated against the schema in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWireSerializer;

impl Serializer for JsonWireSerializer {
    fn name(&self) -> &str {
        JSON_WIRE_SERIALIZER
    }

    fn serialize(
        &self,
        desc: &MessageDescriptor,
        item: serde_json::Value,
    ) -> Result<Vec<u8>, Status> {
        let msg = DynamicMessage::deserialize(desc.clone(), item).map_err(schema_mismatch)?;

        serde_json::to_vec(&msg)
            .map_err(|e| Status::internal(format!("Failed to write JSON message: {}", e)))
    }

    fn deserialize(
        &self,
        desc: &MessageDescriptor,
        bytes: &[u8],
    ) -> Result<serde_json::Value, Status> {
        let mut deserializer = serde_json::Deserializer::from_slice(bytes);
        let msg = DynamicMessage::deserialize(desc.clone(), &mut deserializer)
            .and_then(|msg| deserializer.end().map(|_| msg))
            .map_err(|e| Status::internal(format!("Failed to decode JSON message: {}", e)))?;

        to_json(&msg)
    }
}

fn schema_mismatch(err: serde_json::Error) -> Status {
    Status::invalid_argument(format!(
        "JSON structure does not match Protobuf schema: {}",
        err
    ))
}

fn to_json(msg: &DynamicMessage) -> Result<serde_json::Value, Status> {
    serde_json::to_value(msg)
        .map_err(|e| Status::internal(format!("Failed to map response to JSON: {}", e)))
}

/// The process-wide table of serializers, keyed by name.
#[derive(Clone)]
pub struct SerializerRegistry {
    entries: HashMap<String, Arc<dyn Serializer>>,
}

impl SerializerRegistry {
    /// A registry without any entry. Add at least a `"json"` one before using it.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registers `serializer` under its own name, replacing any previous entry.
    pub fn register(&mut self, serializer: impl Serializer) -> &mut Self {
        self.entries
            .insert(serializer.name().to_string(), Arc::new(serializer));
        self
    }

    /// Names of all registered serializers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(ProtobufJsonSerializer)
            .register(JsonWireSerializer);
        registry
    }
}

impl SerializerTable for SerializerRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Serializer>> {
        self.entries.get(name).cloned()
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("entries", &self.names())
            .finish()
    }
}
