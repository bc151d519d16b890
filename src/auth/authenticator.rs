use std::{
    fmt::Debug,
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    core::types::{
        Dictionary,
        List,
        Value,
    },
    message::message::HelloMessage,
};

/// A response to an authentication challenge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    /// The signature proving the client's identity, transmitted in AUTHENTICATE.
    pub signature: String,
    /// Extra data for the router.
    pub extra: Dictionary,
}

impl ChallengeResponse {
    /// Creates a response carrying only a signature.
    pub fn new<S>(signature: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            signature: signature.into(),
            extra: Dictionary::default(),
        }
    }
}

/// Module for answering the router's authentication challenges during session establishment.
///
/// The router may challenge multiple times; the responder is invoked once per CHALLENGE with the
/// announced method and the challenge's extra data.
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    async fn respond(&self, method: &str, extra: &Dictionary) -> Result<ChallengeResponse>;
}

#[async_trait]
impl<F> ChallengeResponder for F
where
    F: Fn(&str, &Dictionary) -> Result<ChallengeResponse> + Send + Sync,
{
    async fn respond(&self, method: &str, extra: &Dictionary) -> Result<ChallengeResponse> {
        self(method, extra)
    }
}

/// Client authentication configuration for a session.
#[derive(Clone)]
pub struct Authentication {
    /// The identity the client authenticates as (`authid`).
    pub id: String,
    /// The authentication methods the client supports, in preference order (`authmethods`).
    pub methods: Vec<String>,
    /// The responder invoked for each CHALLENGE.
    pub responder: Arc<dyn ChallengeResponder>,
}

impl Authentication {
    /// Embeds the authentication information into a HELLO message.
    pub fn embed_into_hello_message(&self, message: &mut HelloMessage) {
        message
            .details
            .insert("authid".to_owned(), Value::String(self.id.clone()));
        message.details.insert(
            "authmethods".to_owned(),
            Value::List(List::from_iter(
                self.methods.iter().cloned().map(Value::String),
            )),
        );
    }
}

impl Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authentication")
            .field("id", &self.id)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}
