//! Message container used by the handler adapter and reply pipeline.
//!
//! An [`Envelope`] bundles an opaque payload together with its [`Headers`].
//! Every envelope is assigned a globally unique [`EnvelopeId`] at creation;
//! the id is never mutated afterwards.
//!
//! ## Design
//!
//! - [`Payload`] is deliberately shapeless: a cheaply clonable, dynamically
//!   typed value that method targets downcast to concrete types
//! - [`Headers`] carry the correlation id, a creation timestamp, and
//!   arbitrary user properties
//! - A reply produced by the adapter links back to its originator through the
//!   correlation id: the originator's own correlation id when present,
//!   otherwise the originator's envelope id

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use uuid::Uuid;

/// Globally unique envelope identifier.
///
/// Assigned once at envelope creation and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvelopeId(Uuid);

impl EnvelopeId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// View the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Dynamically typed message payload.
///
/// `Payload` erases the concrete type of a value while keeping it cheap to
/// clone (the value is shared behind an `Arc`). The concrete type name is
/// captured at construction for diagnostics.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    /// Wrap a value into an opaque payload.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Borrow the payload as a concrete type, if it has that type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Whether the payload holds a value of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Name of the concrete type wrapped at construction.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", self.type_name)
    }
}

/// A single header value.
///
/// Header values are shapeless in the originating model; the enum covers the
/// shapes the adapter itself needs (notably: a correlation id may be either a
/// user-provided scalar or another envelope's id).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeaderValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Id(EnvelopeId),
}

impl HeaderValue {
    /// Borrow the value as a string slice when it is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_owned())
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Integer(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Boolean(value)
    }
}

impl From<EnvelopeId> for HeaderValue {
    fn from(value: EnvelopeId) -> Self {
        HeaderValue::Id(value)
    }
}

/// Envelope metadata.
///
/// The correlation id and timestamp are kept as dedicated fields; everything
/// else lives in the properties map.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Headers {
    correlation_id: Option<HeaderValue>,
    timestamp: Option<SystemTime>,
    properties: HashMap<String, HeaderValue>,
}

impl Headers {
    /// Empty headers with the timestamp set to the current instant.
    pub fn now() -> Self {
        Self {
            correlation_id: None,
            timestamp: Some(SystemTime::now()),
            properties: HashMap::new(),
        }
    }

    /// The correlation id linking a reply to its originator, if set.
    pub fn correlation_id(&self) -> Option<&HeaderValue> {
        self.correlation_id.as_ref()
    }

    /// Set the correlation id.
    pub fn set_correlation_id(&mut self, value: impl Into<HeaderValue>) {
        self.correlation_id = Some(value.into());
    }

    /// The creation timestamp, if set.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Look up a user property.
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.properties.get(key)
    }

    /// Insert a user property, replacing any existing value under the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Merge another header into this one.
    ///
    /// When `overwrite` is false, keys and fields already present here are
    /// preserved; the other header only fills gaps.
    pub fn copy_from(&mut self, other: &Headers, overwrite: bool) {
        for (key, value) in &other.properties {
            if overwrite || !self.properties.contains_key(key) {
                self.properties.insert(key.clone(), value.clone());
            }
        }
        if other.correlation_id.is_some() && (overwrite || self.correlation_id.is_none()) {
            self.correlation_id = other.correlation_id.clone();
        }
        if other.timestamp.is_some() && (overwrite || self.timestamp.is_none()) {
            self.timestamp = other.timestamp;
        }
    }
}

/// A message: unique id, headers, opaque payload.
///
/// The id is read-only; headers are mutable so that freshly built replies can
/// be completed, but the adapter never mutates an envelope it received as
/// input, not even on failure paths.
#[derive(Debug, Clone)]
pub struct Envelope {
    id: EnvelopeId,
    headers: Headers,
    payload: Payload,
}

impl Envelope {
    /// Create an envelope around an already-wrapped payload.
    ///
    /// Assigns a fresh id and a creation timestamp.
    pub fn new(payload: Payload) -> Self {
        Self {
            id: EnvelopeId::random(),
            headers: Headers::now(),
            payload,
        }
    }

    /// Create an envelope around a plain value.
    pub fn with_payload<T: Any + Send + Sync>(value: T) -> Self {
        Self::new(Payload::new(value))
    }

    /// Create an envelope with pre-populated headers.
    ///
    /// The id is still freshly assigned.
    pub fn with_headers(headers: Headers, payload: Payload) -> Self {
        Self {
            id: EnvelopeId::random(),
            headers,
            payload,
        }
    }

    /// The unique id assigned at creation.
    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    /// Message metadata.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the metadata.
    ///
    /// Intended for completing freshly built replies; callers handing an
    /// envelope to an adapter should treat it as immutable from then on.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Message payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_envelopes_get_distinct_ids() {
        let a = Envelope::with_payload(1u8);
        let b = Envelope::with_payload(1u8);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn creation_sets_a_timestamp() {
        let envelope = Envelope::with_payload("x");
        assert!(envelope.headers().timestamp().is_some());
    }

    #[test]
    fn payload_downcasts_to_its_concrete_type() {
        let payload = Payload::new("hello".to_string());
        assert!(payload.is::<String>());
        assert_eq!(payload.downcast_ref::<String>().unwrap(), "hello");
        assert!(payload.downcast_ref::<i64>().is_none());
    }

    #[test]
    fn copy_from_preserves_existing_keys_without_overwrite() {
        let mut reply = Headers::now();
        reply.insert("kept", "reply");
        reply.set_correlation_id(7i64);

        let mut original = Headers::now();
        original.insert("kept", "original");
        original.insert("added", "original");
        original.set_correlation_id(99i64);

        reply.copy_from(&original, false);

        assert_eq!(reply.get("kept"), Some(&HeaderValue::from("reply")));
        assert_eq!(reply.get("added"), Some(&HeaderValue::from("original")));
        assert_eq!(reply.correlation_id(), Some(&HeaderValue::Integer(7)));
    }

    #[test]
    fn copy_from_overwrites_when_asked() {
        let mut reply = Headers::now();
        reply.insert("kept", "reply");

        let mut original = Headers::now();
        original.insert("kept", "original");

        reply.copy_from(&original, true);

        assert_eq!(reply.get("kept"), Some(&HeaderValue::from("original")));
    }

    #[test]
    fn copy_from_fills_missing_correlation_id() {
        let mut reply = Headers::now();
        let mut original = Headers::now();
        original.set_correlation_id(42i64);

        reply.copy_from(&original, false);

        assert_eq!(reply.correlation_id(), Some(&HeaderValue::Integer(42)));
    }
}
