//! Wire messages exchanged between the client library and the protocol core.
//!
//! The same types serve as the domain model: they are immutable once decoded and
//! travel through fan-out and aggregation unchanged.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::constants;

/// One request or response header. Duplicate names are allowed and order is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Query parameters grouped by name.
///
/// Names keep the order in which they were first seen; values keep arrival order.
/// On the wire this is a flat list of `{name, value}` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, Vec<String>)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, grouping it under an existing name if present
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// All values recorded for `name`
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// First value recorded for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(n, values)| (n.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut params = QueryParams::new();
        for (name, value) in iter {
            params.append(name, value);
        }
        params
    }
}

#[derive(Serialize, Deserialize)]
struct QueryPair {
    name: String,
    value: String,
}

impl Serialize for QueryParams {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let count = self.entries.iter().map(|(_, v)| v.len()).sum();
        let mut seq = serializer.serialize_seq(Some(count))?;
        for (name, values) in &self.entries {
            for value in values {
                seq.serialize_element(&QueryPair {
                    name: name.clone(),
                    value: value.clone(),
                })?;
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for QueryParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Option::<Vec<QueryPair>>::deserialize(deserializer)?.unwrap_or_default();
        Ok(pairs.into_iter().map(|p| (p.name, p.value)).collect())
    }
}

/// Client-supplied negotiation payload. Only its presence matters to the protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub headers: Vec<Header>,
    #[serde(
        default,
        rename = "queryString",
        skip_serializing_if = "QueryParams::is_empty"
    )]
    pub query: QueryParams,
}

impl Handshake {
    /// The logical request a delegated handshake is dispatched as
    pub fn to_request(&self) -> Request {
        Request {
            uuid: self.uuid.clone().unwrap_or_else(|| "0".to_string()),
            method: default_method(),
            path: self.path.clone().unwrap_or_else(|| "/".to_string()),
            data_format: self.data_format.clone(),
            headers: self.headers.clone(),
            query: self.query.clone(),
            body: None,
        }
    }
}

/// Envelope of the first message a client sends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub handshake: Handshake,
}

/// One logical request inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub uuid: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub headers: Vec<Header>,
    #[serde(
        default,
        rename = "queryString",
        skip_serializing_if = "QueryParams::is_empty"
    )]
    pub query: QueryParams,
    #[serde(
        default,
        rename = "messageBody",
        with = "body_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(
        uuid: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            method: method.into(),
            path: path.into(),
            data_format: None,
            headers: Vec::new(),
            query: QueryParams::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First `Content-Type` header, compared case-insensitively
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-type"))
            .map(|h| h.value.as_str())
    }
}

/// Inbound batch: requests sharing one session identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub identity: String,
    pub requests: Vec<Request>,
}

/// Anything a client may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Handshake(HandshakeMessage),
    Batch(Batch),
}

/// One logical response, correlated to its request by `uuid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    pub status: u16,
    #[serde(default)]
    pub reason_phrase: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub headers: Vec<Header>,
    #[serde(
        default,
        rename = "messageBody",
        with = "body_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Bytes>,
}

impl Response {
    pub fn new(status: u16, reason_phrase: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            method: String::new(),
            path: String::new(),
            status,
            reason_phrase: reason_phrase.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, constants::STATUS_OK)
    }

    pub fn not_found() -> Self {
        Self::new(404, constants::STATUS_NOT_FOUND)
    }

    pub fn internal_error() -> Self {
        Self::new(500, constants::STATUS_INTERNAL_ERROR)
    }

    pub fn gateway_timeout() -> Self {
        Self::new(504, constants::STATUS_GATEWAY_TIMEOUT)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, when present and valid UTF-8
    pub fn body_str(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(rename = "statusCode")]
    pub code: u16,
    #[serde(rename = "reasonPhrase")]
    pub reason: String,
}

/// Protocol control message, not tied to any request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: Status,
    pub identity: String,
}

impl StatusMessage {
    pub fn new(code: u16, reason: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            status: Status {
                code,
                reason: reason.into(),
            },
            identity: identity.into(),
        }
    }

    pub fn ok(identity: impl Into<String>) -> Self {
        Self::new(200, constants::STATUS_OK, identity)
    }

    pub fn not_allowed(identity: impl Into<String>) -> Self {
        Self::new(503, constants::STATUS_NOT_ALLOWED, identity)
    }

    pub fn handshake_missing() -> Self {
        Self::new(
            501,
            constants::STATUS_HANDSHAKE_MISSING,
            constants::UNNEGOTIATED_IDENTITY,
        )
    }

    pub fn internal_error(identity: impl Into<String>) -> Self {
        Self::new(500, constants::STATUS_INTERNAL_ERROR, identity)
    }

    pub fn code(&self) -> u16 {
        self.status.code
    }
}

/// All responses of one batch, in request order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub identity: String,
    pub responses: Vec<Response>,
}

/// Anything the server may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Status(StatusMessage),
    Responses(ResponseMessage),
}

fn default_method() -> String {
    "GET".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `messageBody` accepts any JSON value: strings become their UTF-8 bytes, other
/// values their compact JSON text. Bodies are written back as strings.
mod body_serde {
    use super::constants;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S>(body: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match body {
            Some(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| serde::ser::Error::custom(constants::ERR_NON_UTF8_BODY))?;
                serializer.serialize_str(text)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Null => None,
            Value::String(text) => Some(Bytes::from(text)),
            other => Some(Bytes::from(other.to_string())),
        })
    }
}
