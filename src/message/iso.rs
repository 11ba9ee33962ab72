//! A plain ISO-8583 style message: a type code, string fields keyed by number and
//! an optional header.

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{Direction, Message};
use crate::MuxError;

/// Field carrying the response code.
pub const RESPONSE_CODE_FIELD: &str = "39";

/// Field carrying the system trace audit number.
pub const TRACE_FIELD: &str = "11";

/// Field carrying the terminal identifier.
pub const TERMINAL_FIELD: &str = "41";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoMessage {
    #[serde(default)]
    mti: Option<String>,
    #[serde(default)]
    fields: FxHashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    header: Option<Vec<u8>>,
    #[serde(default)]
    direction: Direction,
}

impl IsoMessage {
    /// Create a new message of the given type.
    pub fn new(mti: impl Into<String>) -> Self {
        Self {
            mti: Some(mti.into()),
            ..Default::default()
        }
    }

    /// Chain method to set a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Chain method to set the header.
    pub fn with_header(mut self, header: impl Into<Vec<u8>>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Set a field, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field, returning its value.
    pub fn unset(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    /// Replace the message type code.
    pub fn set_mti(&mut self, mti: impl Into<String>) {
        self.mti = Some(mti.into());
    }

    /// Set the direction flag.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Get the message type code, if set.
    pub fn mti(&self) -> Option<&str> {
        self.mti.as_deref()
    }

    /// Iterate over the names of all fields present.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Build the response to this message: every field is copied and the function
    /// digit of the type code is bumped, e.g. `0200` becomes `0210`.
    pub fn to_response(&self) -> Result<Self, MuxError> {
        let mti = self.type_code()?;
        let mut digits: Vec<char> = mti.chars().collect();

        match digits[2].to_digit(10) {
            Some(function) if function % 2 == 0 => {
                digits[2] = char::from_digit(function + 1, 10).unwrap_or(digits[2]);
            }
            _ => {
                return Err(MuxError::InvalidMessageType(format!(
                    "{mti} is already a response."
                )))
            }
        }

        Ok(Self {
            mti: Some(digits.into_iter().collect()),
            fields: self.fields.clone(),
            header: self.header.clone(),
            direction: Direction::Incoming,
        })
    }
}

impl Message for IsoMessage {
    fn type_code(&self) -> Result<&str, MuxError> {
        match self.mti.as_deref() {
            Some(mti) if mti.len() == 4 && mti.bytes().all(|b| b.is_ascii_digit()) => Ok(mti),
            Some(mti) => Err(MuxError::InvalidMessageType(format!(
                "'{mti}' is not a 4-digit type code."
            ))),
            None => Err(MuxError::InvalidMessageType(
                "message has no type code.".to_owned(),
            )),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn is_response(&self) -> Result<bool, MuxError> {
        let mti = self.type_code()?;

        // The third digit is the message function; odd functions are responses.
        Ok(mti.as_bytes()[2].wrapping_sub(b'0') % 2 == 1)
    }

    fn header(&self) -> Option<&[u8]> {
        self.header.as_deref()
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn response_predicate() {
        for (mti, expected) in [
            ("0200", false),
            ("0210", true),
            ("0220", false),
            ("0230", true),
            ("0800", false),
            ("0810", true),
            ("2100", false),
            ("2110", true),
        ] {
            assert_eq!(IsoMessage::new(mti).is_response().unwrap(), expected, "{mti}");
        }
    }

    #[test]
    fn malformed_type_code() {
        assert!(matches!(
            IsoMessage::default().is_response(),
            Err(MuxError::InvalidMessageType(_))
        ));
        assert!(matches!(
            IsoMessage::new("02x0").is_response(),
            Err(MuxError::InvalidMessageType(_))
        ));
        assert!(IsoMessage::new("200").type_code().is_err());
    }

    #[test]
    fn response_for_request() {
        let request = IsoMessage::new("0200")
            .with_field(TRACE_FIELD, "1")
            .with_field(TERMINAL_FIELD, "T1")
            .with_header(vec![0x60, 0x01]);

        let response = request.to_response().unwrap();

        assert_eq!(response.mti(), Some("0210"));
        assert_eq!(response.field(TRACE_FIELD), Some("1"));
        assert_eq!(response.header(), Some(&[0x60, 0x01][..]));
        assert!(response.to_response().is_err());
    }

    #[test]
    fn deserialize_from_json() {
        let message: IsoMessage = serde_json::from_str(
            r#"{"mti": "0800", "fields": {"11": "000001", "70": "301"}}"#,
        )
        .unwrap();

        assert_eq!(message.type_code().unwrap(), "0800");
        assert_eq!(message.field("70"), Some("301"));
        assert_eq!(message.direction(), Direction::Incoming);
        assert!(message.header().is_none());
    }
}
