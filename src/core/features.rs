use crate::core::types::{
    Dictionary,
    Value,
};

/// Advanced WAMP features implemented by this peer.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    /// A caller may actively cancel a procedure call.
    pub call_canceling: bool,
    /// Procedures may produce progressive results.
    pub progressive_call_results: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            call_canceling: true,
            progressive_call_results: true,
        }
    }
}

impl Features {
    /// The feature dictionary advertised in HELLO, containing only the enabled flags.
    pub fn to_dictionary(&self) -> Dictionary {
        let mut features = Dictionary::default();
        if self.progressive_call_results {
            features.insert("progressive_call_results".to_owned(), Value::Bool(true));
        }
        if self.call_canceling {
            features.insert("call_canceling".to_owned(), Value::Bool(true));
        }
        features
    }
}
