use std::{
    fmt::Display,
    sync::LazyLock,
};

use anyhow::Error;
use regex::Regex;
use serde::{
    de::{
        Unexpected,
        Visitor,
    },
    Deserialize,
    Serialize,
};
use thiserror::Error;

use crate::core::error::{
    CanceledError,
    HandshakeError,
    ProtocolError,
    TransportError,
    WampError,
};

/// Error for an invalid URI.
#[derive(Debug, Error)]
#[error("invalid URI")]
pub struct InvalidUri;

/// Validates a loose URI: dot-separated, non-empty components free of whitespace and hashes.
///
/// Realms and deployment-defined error reasons routinely use mixed case, so the stricter
/// lowercase-only profile is not enforced.
pub fn validate_uri<S>(uri: S) -> Result<(), InvalidUri>
where
    S: AsRef<str>,
{
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([^\s.#]+\.)*([^\s.#]+)$").unwrap());
    if !RE.is_match(uri.as_ref()) {
        return Err(InvalidUri);
    }
    Ok(())
}

/// A uniform resource identifier, used across WAMP messaging for identifying resources, such as
/// realms, topics, procedures, and error reasons.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Constructs a URI directly from a value known to be valid, skipping validation.
    pub(crate) fn from_known<S>(value: S) -> Self
    where
        S: Into<String>,
    {
        Self(value.into())
    }

    /// Splits the URI into its components.
    pub fn split(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// The reason URI used when reporting `error` to the remote peer.
    ///
    /// Errors raised as [`WampError`] carry their own reason; the rest of the taxonomy maps to a
    /// fixed reason per kind, with `wamp.error` as the fallback for arbitrary handler errors.
    pub fn for_error(error: &Error) -> Uri {
        if let Some(err) = error.downcast_ref::<WampError>() {
            return err.reason().clone();
        }
        if let Some(err) = error.downcast_ref::<TransportError>() {
            return match err {
                TransportError::Closed => Self::from_known("wamp.error.transport_closed"),
                TransportError::Failed(_) => Self::from_known("wamp.error.transport_failure"),
            };
        }
        if error.downcast_ref::<ProtocolError>().is_some() {
            return Self::from_known("wamp.error.protocol_violation");
        }
        if error.downcast_ref::<CanceledError>().is_some() {
            return Self::from_known("wamp.error.cancelled");
        }
        if let Some(err) = error.downcast_ref::<HandshakeError>() {
            return match err {
                HandshakeError::UnexpectedChallenge => {
                    Self::from_known("wamp.error.unexpected_challenge")
                }
                HandshakeError::Aborted { reason, .. } => reason.clone(),
            };
        }
        Self::from_known("wamp.error")
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Uri {
    type Error = InvalidUri;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_uri(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for Uri {
    type Error = InvalidUri;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        validate_uri(value)?;
        Ok(Self(value.to_owned()))
    }
}

impl From<Uri> for String {
    fn from(value: Uri) -> Self {
        value.0
    }
}

struct UriVisitor;

impl<'de> Visitor<'de> for UriVisitor {
    type Value = Uri;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a URI")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Uri::try_from(v.to_owned()).map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(UriVisitor)
    }
}

#[cfg(test)]
mod uri_test {
    use crate::core::uri::{
        validate_uri,
        Uri,
    };

    #[test]
    fn validates_uris() {
        assert_matches::assert_matches!(validate_uri("com"), Ok(()));
        assert_matches::assert_matches!(validate_uri("com123"), Ok(()));
        assert_matches::assert_matches!(validate_uri("com.myapp.topic"), Ok(()));
        assert_matches::assert_matches!(validate_uri("com.myapp.topic1"), Ok(()));
        assert_matches::assert_matches!(validate_uri("fakeRealm"), Ok(()));
        assert_matches::assert_matches!(validate_uri("wamp.2.json"), Ok(()));
        assert_matches::assert_matches!(validate_uri(""), Err(_));
        assert_matches::assert_matches!(validate_uri("."), Err(_));
        assert_matches::assert_matches!(validate_uri(".."), Err(_));
        assert_matches::assert_matches!(validate_uri(".com.myapp.topic1"), Err(_));
        assert_matches::assert_matches!(validate_uri("com.myapp."), Err(_));
        assert_matches::assert_matches!(validate_uri("com.my app"), Err(_));
        assert_matches::assert_matches!(validate_uri("com.myapp#"), Err(_));
    }

    #[test]
    fn fails_deserialization_invalid_uri() {
        assert_matches::assert_matches!(serde_json::from_str::<Uri>(r#""com..myapp""#), Err(err) => {
            assert!(err.to_string().contains("expected a URI"));
        });
    }
}
