/// How an active procedure call should be canceled.
///
/// The mode travels outbound only: it is written into the CANCEL message's `mode` option. A peer
/// never parses one back, since CANCEL is a caller-to-router message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CallCancelMode {
    /// An ERROR is sent immediately back to the caller. The callee receives no INTERRUPT.
    Skip,
    /// INTERRUPT is sent to the callee, and the caller waits for acknowledgement in the form of an
    /// ERROR or RESULT.
    #[default]
    Kill,
    /// INTERRUPT is sent to the callee, and an ERROR is sent immediately back to the caller.
    KillNoWait,
}

impl From<CallCancelMode> for &'static str {
    fn from(value: CallCancelMode) -> Self {
        match value {
            CallCancelMode::Skip => "skip",
            CallCancelMode::Kill => "kill",
            CallCancelMode::KillNoWait => "killnowait",
        }
    }
}

impl From<CallCancelMode> for String {
    fn from(value: CallCancelMode) -> Self {
        Into::<&'static str>::into(value).to_owned()
    }
}
