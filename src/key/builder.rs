//! Derivation of correlation keys from message content.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use super::MtiMapping;
use crate::{
    message::{Message, TERMINAL_FIELD, TRACE_FIELD},
    MuxError,
};

/// The fields used for keys when nothing else is configured.
pub const DEFAULT_KEY_FIELDS: [&str; 2] = [TERMINAL_FIELD, TRACE_FIELD];

/// Width of the trace number in the 2003 message version (leading digit `2`).
const TRACE_WIDTH_EXTENDED: usize = 12;

/// Width of the trace number in every other message version.
const TRACE_WIDTH: usize = 6;

/// Width of the terminal identifier.
const TERMINAL_WIDTH: usize = 16;

/// Key fields to use instead of the defaults for type codes starting with `prefix`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOverride {
    /// The first two digits of the type codes this applies to, e.g. `"08"`.
    pub prefix: String,
    pub fields: Vec<String>,
}

/// Builds correlation keys for a single outbound name.
#[derive(Clone, Debug)]
pub struct KeyBuilder {
    out: String,
    fields: Vec<String>,
    overrides: Vec<KeyOverride>,
    header_is_key: bool,
    mapping: MtiMapping,
}

impl KeyBuilder {
    /// Create a new key builder for the given outbound name, using the default
    /// fields and mapping.
    pub fn new(out: impl Into<String>) -> Self {
        Self {
            out: out.into(),
            fields: DEFAULT_KEY_FIELDS.iter().map(|f| f.to_string()).collect(),
            overrides: Vec::new(),
            header_is_key: false,
            mapping: MtiMapping::default(),
        }
    }

    /// Chain method to replace the default key fields.
    pub fn with_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Chain method to add a per-type override. Overrides are checked in the order
    /// they were added.
    pub fn with_override(mut self, key_override: KeyOverride) -> Self {
        self.overrides.push(key_override);
        self
    }

    /// Chain method to include the message header in the key.
    pub fn with_header_is_key(mut self, header_is_key: bool) -> Self {
        self.header_is_key = header_is_key;
        self
    }

    /// Chain method to replace the MTI mapping.
    pub fn with_mapping(mut self, mapping: MtiMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Get the outbound name.
    pub fn out(&self) -> &str {
        &self.out
    }

    /// Get the MTI mapping.
    pub fn mapping(&self) -> &MtiMapping {
        &self.mapping
    }

    /// Get the key fields that apply to the given type code.
    pub fn fields_for(&self, type_code: &str) -> &[String] {
        type_code
            .get(..2)
            .and_then(|prefix| {
                self.overrides
                    .iter()
                    .find(|key_override| key_override.prefix == prefix)
            })
            .map(|key_override| key_override.fields.as_slice())
            .unwrap_or(&self.fields)
    }

    /// Build the correlation key for a message.
    ///
    /// The key is the outbound name, a dot, the mapped type code, then optionally a
    /// dot and the hex-encoded header, followed by the values of every configured
    /// key field present in the message.
    pub fn build<M: Message>(&self, message: &M) -> Result<String, MuxError> {
        let type_code = message.type_code()?;

        let mut key = format!("{}.{}", self.out, self.mapping.map(type_code));

        if self.header_is_key {
            if let Some(header) = message.header() {
                key.push('.');
                key.push_str(&hex::encode_upper(header));
            }
        }

        let mut has_fields = false;
        for field in self.fields_for(type_code) {
            if let Some(value) = message.field(field) {
                key.push_str(&pad_field(field, value, type_code));
                has_fields = true;
            }
        }

        if !has_fields {
            return Err(MuxError::KeyDerivation(key));
        }

        Ok(key)
    }
}

/// Zero-pad the fields whose width varies between acquirers.
fn pad_field<'v>(field: &str, value: &'v str, type_code: &str) -> Cow<'v, str> {
    let width = match field {
        TRACE_FIELD if type_code.starts_with('2') => TRACE_WIDTH_EXTENDED,
        TRACE_FIELD => TRACE_WIDTH,
        TERMINAL_FIELD => TERMINAL_WIDTH,
        _ => return Cow::Borrowed(value),
    };

    let trimmed = value.trim();
    if trimmed.len() < width {
        Cow::Owned(format!("{trimmed:0>width$}"))
    } else {
        Cow::Borrowed(trimmed)
    }
}
