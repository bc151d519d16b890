mod authenticator;

pub use authenticator::{
    Authentication,
    ChallengeResponder,
    ChallengeResponse,
};
