//! # DynamicMessage <-> Protobuf Codec
//!
//! This module implements `tonic::codec::Codec` so `tonic` can transport
//! `prost_reflect::DynamicMessage` values directly, bypassing generated Rust structs.
//!
//! ## How it works
//!
//! 1. **Encoder**: checks that the outgoing message has the expected descriptor and writes
//!    its Protobuf encoding into the gRPC buffer.
//! 2. **Decoder**: merges the wire bytes into an empty `DynamicMessage` of the expected
//!    descriptor.
//!
//! The same codec serves both sides of the bridge: a client encodes requests and decodes
//! replies, a server decodes requests and encodes replies.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A Codec that moves `DynamicMessage` values over gRPC without generated Rust structs.
///
/// It holds one descriptor per direction, so a single type serves both the calling and
/// the serving side of a bridge method.
pub struct DynamicCodec {
    /// Schema of the messages this side writes.
    encode_desc: MessageDescriptor,
    /// Schema of the messages this side reads.
    decode_desc: MessageDescriptor,
}

impl DynamicCodec {
    /// Codec for the calling side: writes `request`, reads `reply`.
    pub fn client(request: MessageDescriptor, reply: MessageDescriptor) -> Self {
        Self {
            encode_desc: request,
            decode_desc: reply,
        }
    }

    /// Codec for the serving side: reads `request`, writes `reply`.
    pub fn server(request: MessageDescriptor, reply: MessageDescriptor) -> Self {
        Self {
            encode_desc: reply,
            decode_desc: request,
        }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder(self.encode_desc.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.decode_desc.clone())
    }
}

/// Writes messages of the wrapped descriptor; any other message type is an internal error.
pub struct DynamicEncoder(MessageDescriptor);

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        if item.descriptor() != self.0 {
            return Err(Status::internal(format!(
                "Expected message '{}', got '{}'",
                self.0.full_name(),
                item.descriptor().full_name()
            )));
        }

        item.encode_raw(dst);
        Ok(())
    }
}

/// Reads wire bytes into a fresh `DynamicMessage` of the wrapped descriptor.
pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.0.clone());
        msg.merge(src)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {}", e)))?;

        Ok(Some(msg))
    }
}
