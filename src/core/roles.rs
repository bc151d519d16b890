use crate::core::{
    features::Features,
    types::{
        Dictionary,
        Value,
    },
};

/// A role implemented by a peer, advertised to the router during session establishment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    // Calls RPC endpoints.
    Caller,
    // Registers RPC endpoints.
    Callee,
    // Publishes events to topics.
    Publisher,
    // Subscribes to events for topics.
    Subscriber,
}

impl PeerRole {
    pub fn key_for_details(&self) -> &str {
        match self {
            Self::Caller => "caller",
            Self::Callee => "callee",
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }

    /// The role entry for the HELLO details dictionary.
    ///
    /// Caller and callee advertise their feature set; publisher and subscriber have none.
    pub fn details_entry(&self) -> Dictionary {
        match self {
            Self::Caller | Self::Callee => Dictionary::from_iter([(
                "features".to_owned(),
                Value::Dictionary(Features::default().to_dictionary()),
            )]),
            Self::Publisher | Self::Subscriber => Dictionary::default(),
        }
    }
}
