//! # Dynamic Message Factory
//!
//! Builds and reads bridge messages by field name against the [`DescriptorBundle`].
//! There is no compile-time contract with the schema beyond the field names below.
//!
//! Reads are lenient: [`get_field`] returns an empty string for a field the descriptor
//! does not define. Writes are strict: [`set_field`] rejects unknown or non-string fields
//! so a schema mismatch surfaces at the call site instead of sending a half-filled message.
use crate::schema::DescriptorBundle;
use prost_reflect::{DynamicMessage, Kind, ReflectMessage, Value};

pub const TRACE_ID_FIELD: &str = "trace_id";
pub const ACTION_FIELD: &str = "action";
pub const PAYLOAD_FIELD: &str = "payload";
pub const CODE_FIELD: &str = "code";
pub const RESULT_FIELD: &str = "result";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldAccessError {
    #[error("Field '{field}' is not defined on message '{message}'")]
    UnknownField { message: String, field: String },
    #[error("Field '{field}' of message '{message}' is not a string field")]
    NotAString { message: String, field: String },
}

impl DescriptorBundle {
    /// A Request-shaped message with its three string fields set.
    pub fn new_request(
        &self,
        trace_id: &str,
        action: &str,
        payload: &str,
    ) -> Result<DynamicMessage, FieldAccessError> {
        let mut msg = DynamicMessage::new(self.request_descriptor().clone());
        set_field(&mut msg, TRACE_ID_FIELD, trace_id)?;
        set_field(&mut msg, ACTION_FIELD, action)?;
        set_field(&mut msg, PAYLOAD_FIELD, payload)?;
        Ok(msg)
    }

    /// An empty Request-shaped message, the decode target of inbound requests.
    pub fn new_empty_request(&self) -> DynamicMessage {
        DynamicMessage::new(self.request_descriptor().clone())
    }

    /// An empty Reply-shaped message, the decode target of inbound replies.
    pub fn new_empty_reply(&self) -> DynamicMessage {
        DynamicMessage::new(self.reply_descriptor().clone())
    }

    /// A Reply-shaped message carrying the trace id and result, with the default code `0`.
    pub fn new_reply(
        &self,
        trace_id: &str,
        result: &str,
    ) -> Result<DynamicMessage, FieldAccessError> {
        let mut msg = self.new_empty_reply();
        set_field(&mut msg, TRACE_ID_FIELD, trace_id)?;
        set_field(&mut msg, RESULT_FIELD, result)?;
        Ok(msg)
    }
}

/// Reads a field as text.
///
/// Returns an empty string when the field is not part of the message descriptor.
/// Scalar fields that are not strings, such as the reply `code`, are rendered as text.
pub fn get_field(msg: &DynamicMessage, name: &str) -> String {
    let Some(field) = msg.descriptor().get_field_by_name(name) else {
        return String::new();
    };

    match msg.get_field(&field).as_ref() {
        Value::String(s) => s.clone(),
        Value::Bool(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::U32(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F32(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::EnumNumber(v) => v.to_string(),
        _ => String::new(),
    }
}

/// Writes a string field.
pub fn set_field(
    msg: &mut DynamicMessage,
    name: &str,
    value: &str,
) -> Result<(), FieldAccessError> {
    let descriptor = msg.descriptor();
    let field = descriptor
        .get_field_by_name(name)
        .ok_or_else(|| FieldAccessError::UnknownField {
            message: descriptor.full_name().to_string(),
            field: name.to_string(),
        })?;

    if field.kind() != Kind::String || field.is_list() {
        return Err(FieldAccessError::NotAString {
            message: descriptor.full_name().to_string(),
            field: name.to_string(),
        });
    }

    msg.set_field(&field, Value::String(value.to_string()));
    Ok(())
}
