//! Gmail API response normalization
//!
//! Converts `format=raw` messages into [`MessageTransferUnit`]s.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use chrono::{TimeZone, Utc};

use super::api::RawMessage;
use crate::error::ProviderError;
use crate::models::{MessageId, MessageTransferUnit};

/// base64url that accepts payloads with or without padding
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a Gmail `raw` payload into RFC 822 bytes
pub fn decode_raw(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    URL_SAFE_LENIENT.decode(trimmed)
}

/// Build a transfer unit from a raw Gmail message
pub fn to_transfer_unit(message: RawMessage) -> Result<MessageTransferUnit, ProviderError> {
    let raw = decode_raw(&message.raw).map_err(|e| {
        ProviderError::InvalidArgument(format!("message {} has an invalid raw payload: {}", message.id, e))
    })?;
    if raw.is_empty() {
        return Err(ProviderError::InvalidArgument(format!(
            "message {} has an empty raw payload",
            message.id
        )));
    }

    let mut unit = MessageTransferUnit::new(MessageId::new(message.id), raw)
        .with_labels(message.label_ids.unwrap_or_default());
    if let Some(thread_id) = message.thread_id {
        unit = unit.with_thread_id(thread_id);
    }

    // Milliseconds since epoch
    if let Some(received) = message
        .internal_date
        .as_deref()
        .and_then(|d| d.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    {
        unit = unit.with_internal_date(received);
    }

    Ok(unit)
}
