//! Request and response envelopes
//!
//! Business payloads travel as opaque bytes in `data` (base64 in JSON).

use im_core::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use super::PushKind;

/// Client request envelope
///
/// Missing fields decode to their empty value and are then rejected by
/// validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Req {
    #[validate(range(min = 1))]
    pub req_identifier: i32,
    pub token: String,
    #[serde(rename = "sendID")]
    #[validate(length(min = 1))]
    pub send_id: String,
    #[serde(rename = "operationID")]
    #[validate(length(min = 1))]
    pub operation_id: String,
    #[validate(length(min = 1))]
    pub msg_incr: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl fmt::Display for Req {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "req(id={}, send_id={}, operation_id={}, msg_incr={}, data={}B)",
            self.req_identifier,
            self.send_id,
            self.operation_id,
            self.msg_incr,
            self.data.len()
        )
    }
}

/// Server response and push envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resp {
    pub req_identifier: i32,
    pub msg_incr: String,
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub err_code: i32,
    pub err_msg: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Resp {
    /// Build the reply to `req`; a business error is carried in `errCode`/`errMsg`
    #[must_use]
    pub fn reply_to(req: &Req, result: Result<Vec<u8>, DomainError>) -> Self {
        let (data, err_code, err_msg) = match result {
            Ok(data) => (data, 0, String::new()),
            Err(e) => (Vec::new(), e.code(), e.to_string()),
        };

        Self {
            req_identifier: req.req_identifier,
            msg_incr: req.msg_incr.clone(),
            operation_id: req.operation_id.clone(),
            err_code,
            err_msg,
            data,
        }
    }

    /// Build a server-initiated push
    #[must_use]
    pub fn push(kind: PushKind, operation_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            req_identifier: kind.as_i32(),
            operation_id: operation_id.into(),
            data,
            ..Self::default()
        }
    }
}

/// Serde adapter for `Vec<u8>` as a base64 string; `null` or absent is empty
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
