//! # Serializer Codec
//!
//! This module implements `tonic::codec::Codec` so that `tonic` can transport `serde_json::Value`
//! directly, delegating the actual wire format to a [`Serializer`].
//!
//! ## How it works
//!
//! 1. **Encoder**: hands the `serde_json::Value` and the input `MessageDescriptor` to the
//!    serializer and copies the produced bytes into the gRPC frame.
//! 2. **Decoder**: drains the gRPC frame and asks the serializer to turn it back into a
//!    `serde_json::Value` using the output `MessageDescriptor`.
use crate::serializer::Serializer;
use prost::bytes::{Buf, BufMut};
use prost_reflect::MessageDescriptor;
use std::{fmt, sync::Arc};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A codec binding one serializer to the request and response types of a method.
///
/// Cloning is cheap: the serializer is shared and descriptors are reference counted.
#[derive(Clone)]
pub struct SerializerCodec {
    serializer: Arc<dyn Serializer>,
    /// Schema for the input message.
    req_desc: MessageDescriptor,
    /// Schema for the output message.
    res_desc: MessageDescriptor,
}

impl SerializerCodec {
    /// Creates a new `SerializerCodec`.
    ///
    /// # Arguments
    /// * `serializer` - The wire format.
    /// * `req_desc` - Descriptor for the request message type.
    /// * `res_desc` - Descriptor for the response message type.
    pub fn new(
        serializer: Arc<dyn Serializer>,
        req_desc: MessageDescriptor,
        res_desc: MessageDescriptor,
    ) -> Self {
        Self {
            serializer,
            req_desc,
            res_desc,
        }
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub fn serializer_name(&self) -> &str {
        self.serializer.name()
    }

    pub fn request_type(&self) -> &MessageDescriptor {
        &self.req_desc
    }

    pub fn response_type(&self) -> &MessageDescriptor {
        &self.res_desc
    }
}

impl fmt::Debug for SerializerCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerCodec")
            .field("serializer", &self.serializer.name())
            .field("request", &self.req_desc.full_name())
            .field("response", &self.res_desc.full_name())
            .finish()
    }
}

impl Codec for SerializerCodec {
    type Encode = serde_json::Value;
    type Decode = serde_json::Value;

    type Encoder = SerializerEncoder;
    type Decoder = SerializerDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        SerializerEncoder {
            serializer: self.serializer.clone(),
            desc: self.req_desc.clone(),
        }
    }

    fn decoder(&mut self) -> Self::Decoder {
        SerializerDecoder {
            serializer: self.serializer.clone(),
            desc: self.res_desc.clone(),
        }
    }
}

/// Responsible for encoding a JSON value into one request message.
pub struct SerializerEncoder {
    serializer: Arc<dyn Serializer>,
    desc: MessageDescriptor,
}

impl Encoder for SerializerEncoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let bytes = self.serializer.serialize(&self.desc, item)?;
        dst.put_slice(&bytes);
        Ok(())
    }
}

/// Responsible for decoding one response message into a JSON value.
pub struct SerializerDecoder {
    serializer: Arc<dyn Serializer>,
    desc: MessageDescriptor,
}

impl Decoder for SerializerDecoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let bytes = src.copy_to_bytes(src.remaining());
        let value = self.serializer.deserialize(&self.desc, &bytes)?;
        Ok(Some(value))
    }
}
