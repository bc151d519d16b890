use std::sync::Mutex;

use log::warn;
use tokio::sync::mpsc::{
    unbounded_channel,
    UnboundedReceiver,
    UnboundedSender,
};

use crate::{
    core::{
        error::{
            ChannelTransmittableError,
            ChannelTransmittableResult,
        },
        id::Id,
        types::{
            HashMap,
            Integer,
        },
    },
    message::message::Message,
};

/// A key identifying the consumer of an inbound message.
///
/// Inbound frames are split first by message kind, then by correlation id, so every pending
/// operation awaits exactly the frames addressed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum DispatchKey {
    /// WELCOME, CHALLENGE, and ABORT during session establishment.
    Establishing,
    /// The single terminal response to an outbound request (or its matching ERROR).
    Response { request_type: Integer, request: Id },
    /// RESULT frames (progressive and terminal) and the matching ERROR for an outbound CALL.
    CallResult { request: Id },
    /// EVENT frames for an active subscription.
    Event { subscription: Id },
    /// INVOCATION frames for an active registration.
    Invocation { registration: Id },
    /// The INTERRUPT frame for a pending invocation on this callee.
    Interrupt { invocation: Id },
}

/// The inbound demultiplexer.
///
/// A table mapping each [`DispatchKey`] to the consumer currently interested in it, guarded by a
/// plain mutex: entries are only touched for the duration of a map operation, and release guards
/// must be able to unsubscribe outside of async context.
///
/// At most one consumer exists per key. Re-registering a key replaces the previous consumer,
/// which stops receiving further items; callers ensure uniqueness by using fresh correlation ids.
/// Items delivered to a key with no registered consumer are dropped. Nothing is buffered for
/// future subscribers.
#[derive(Default)]
pub(crate) struct MessageDispatcher {
    consumers: Mutex<HashMap<DispatchKey, UnboundedSender<ChannelTransmittableResult<Message>>>>,
}

impl MessageDispatcher {
    /// Registers the consumer for a key, returning the stream of matching messages.
    pub fn subscribe(
        &self,
        key: DispatchKey,
    ) -> UnboundedReceiver<ChannelTransmittableResult<Message>> {
        let (tx, rx) = unbounded_channel();
        if self.consumers.lock().unwrap().insert(key, tx).is_some() {
            warn!("Replaced existing consumer for {key:?}");
        }
        rx
    }

    /// Releases the consumer for a key.
    ///
    /// Dropping the sender completes the consumer's stream.
    pub fn unsubscribe(&self, key: DispatchKey) {
        self.consumers.lock().unwrap().remove(&key);
    }

    /// Delivers a message to the consumer registered for the key.
    ///
    /// Messages for keys with no consumer (or whose consumer has gone away) are dropped with a
    /// diagnostic.
    pub fn deliver(&self, key: DispatchKey, message: Message) {
        let consumer = self.consumers.lock().unwrap().get(&key).cloned();
        match consumer {
            Some(consumer) => {
                if consumer.send(Ok(message)).is_err() {
                    warn!("Dropped message for {key:?}: consumer is gone");
                }
            }
            None => {
                warn!("Dropped {} with no consumer for {key:?}", message.message_name());
            }
        }
    }

    /// Fails every active consumer with the given error.
    ///
    /// The registry is cleared before propagation, so consumer teardown re-entering the
    /// dispatcher is a no-op.
    pub fn fail_all(&self, error: &ChannelTransmittableError) {
        let consumers = std::mem::take(&mut *self.consumers.lock().unwrap());
        for (_, consumer) in consumers {
            consumer.send(Err(error.clone())).ok();
        }
    }

    /// Completes every active consumer.
    pub fn close_all(&self) {
        self.consumers.lock().unwrap().clear();
    }
}
