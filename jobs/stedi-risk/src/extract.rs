//! Recovery of the customer profile nested inside a profile-change event.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::decoder::{RecordDecoder, RecordSchema};
use crate::error::{DecodeError, ExtractionError, SerializationError};
use crate::model::{CustomerProfile, ProfileChangeEnvelope};

/// Standard alphabet; padding optional on decode, always written on encode.
const ELEMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes `orderedSetEntries[0].element` (base64 of the customer JSON)
/// into a [`CustomerProfile`].
#[derive(Debug, Clone)]
pub struct NestedPayloadExtractor {
    decoder: RecordDecoder,
}

impl Default for NestedPayloadExtractor {
    fn default() -> Self {
        Self::new(RecordSchema::customer_profile())
    }
}

impl NestedPayloadExtractor {
    pub fn new(schema: RecordSchema) -> Self {
        Self {
            decoder: RecordDecoder::new(schema),
        }
    }

    pub fn extract(&self, envelope: &ProfileChangeEnvelope) -> Result<CustomerProfile, ExtractionError> {
        let entry = envelope
            .ordered_set_entries
            .first()
            .ok_or(ExtractionError::EmptyOrderedSet)?;
        let element = entry
            .element
            .as_deref()
            .ok_or(ExtractionError::MissingElement)?;

        let json = String::from_utf8(ELEMENT_ENGINE.decode(element)?)?;
        let decoded = self.decoder.decode_customer_profile(json.as_bytes());
        if let Some(e) = decoded
            .errors
            .iter()
            .find(|e| matches!(e, DecodeError::Malformed(_) | DecodeError::NotAnObject))
        {
            return Err(ExtractionError::InvalidProfileJson(e.clone()));
        }
        Ok(decoded.record)
    }
}

/// Encode a profile the way the change feed carries it: base64 of its JSON.
pub fn encode_profile(profile: &CustomerProfile) -> Result<String, SerializationError> {
    let json = serde_json::to_vec(profile)?;
    Ok(ELEMENT_ENGINE.encode(json))
}
