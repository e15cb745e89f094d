//! The closed vocabulary of messages exchanged between the two parties.
//!
//! On the wire every message is a `(header, payload)` pair; the header is one
//! of the fixed strings below and anything else is rejected while decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{QkdError, Result};

pub const CASCADE_PARITIES: &str = "CASCADE_PARITIES";
pub const CASCADE_SEARCH: &str = "CASCADE_SEARCH";
pub const CASCADE_RESP: &str = "CASCADE_RESP";
pub const CASCADE_DONE: &str = "CASCADE_DONE";
pub const CASCADE_SYNC: &str = "CASCADE_SYNC";
pub const VERIFY_HASH: &str = "VERIFY_HASH";
pub const VERIFY_RESULT: &str = "VERIFY_RESULT";
pub const PA_SEED: &str = "PA_SEED";

pub const HEADERS: [&str; 8] = [
    CASCADE_PARITIES,
    CASCADE_SEARCH,
    CASCADE_RESP,
    CASCADE_DONE,
    CASCADE_SYNC,
    VERIFY_HASH,
    VERIFY_RESULT,
    PA_SEED,
];

/// Parity of the first half of the range currently being bisected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchProbe {
    pub indices: Vec<usize>,
    pub parity: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "header", content = "payload")]
pub enum Message {
    /// All block parities of one pass.
    #[serde(rename = "CASCADE_PARITIES")]
    CascadeParities {
        pass: usize,
        #[serde(with = "crate::bits::packed")]
        parities: Vec<bool>,
    },
    #[serde(rename = "CASCADE_SEARCH")]
    CascadeSearch(SearchProbe),
    #[serde(rename = "CASCADE_RESP")]
    CascadeResponse(SearchProbe),
    /// Closes one binary search; carries the located key index.
    #[serde(rename = "CASCADE_DONE")]
    CascadeDone { index: usize },
    #[serde(rename = "CASCADE_SYNC")]
    CascadeSync { pass: usize },
    #[serde(rename = "VERIFY_HASH")]
    VerifyHash {
        #[serde(with = "field_hex")]
        salt: u128,
        #[serde(with = "field_hex")]
        tag: u128,
    },
    #[serde(rename = "VERIFY_RESULT")]
    VerifyResult { matched: bool },
    #[serde(rename = "PA_SEED")]
    PaSeed {
        #[serde(with = "crate::bits::packed")]
        seed: Vec<bool>,
    },
}

impl Message {
    pub fn header(&self) -> &'static str {
        match self {
            Message::CascadeParities { .. } => CASCADE_PARITIES,
            Message::CascadeSearch(_) => CASCADE_SEARCH,
            Message::CascadeResponse(_) => CASCADE_RESP,
            Message::CascadeDone { .. } => CASCADE_DONE,
            Message::CascadeSync { .. } => CASCADE_SYNC,
            Message::VerifyHash { .. } => VERIFY_HASH,
            Message::VerifyResult { .. } => VERIFY_RESULT,
            Message::PaSeed { .. } => PA_SEED,
        }
    }

    /// Splits into the wire header and a canonical JSON payload.
    pub fn encode(&self) -> Result<(String, String)> {
        let mut value = serde_json::to_value(self)?;
        let payload = value
            .get_mut("payload")
            .map(Value::take)
            .ok_or_else(|| QkdError::protocol(format!("message {} has no payload", self.header())))?;
        Ok((self.header().to_string(), serde_json::to_string(&payload)?))
    }

    /// Rebuilds a message from its wire parts. Unknown headers and payloads
    /// that do not fit the header are protocol errors.
    pub fn decode(header: &str, payload: &str) -> Result<Message> {
        if !HEADERS.contains(&header) {
            return Err(QkdError::protocol(format!("unknown message header '{header}'")));
        }
        let payload: Value = serde_json::from_str(payload)
            .map_err(|e| QkdError::protocol(format!("unparseable payload for {header}: {e}")))?;
        let mut envelope = serde_json::Map::new();
        envelope.insert("header".into(), Value::String(header.to_string()));
        envelope.insert("payload".into(), payload);
        serde_json::from_value(Value::Object(envelope))
            .map_err(|e| QkdError::protocol(format!("malformed {header} payload: {e}")))
    }
}

/// Field elements travel as fixed-width lowercase hex strings.
mod field_hex {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value.to_be_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        let raw: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::custom(format!("field element must be 16 bytes, got {}", bytes.len())))?;
        Ok(u128::from_be_bytes(raw))
    }
}
