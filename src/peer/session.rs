use std::sync::Arc;

use anyhow::{
    Error,
    Result,
};
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::sync::{
    mpsc::UnboundedSender,
    RwLock,
};

use crate::{
    core::{
        error::{
            ChannelTransmittableError,
            ProtocolError,
            TransportError,
        },
        id::{
            Id,
            IdAllocator,
        },
        uri::Uri,
    },
    message::message::Message,
    peer::dispatch::{
        DispatchKey,
        MessageDispatcher,
    },
};

#[derive(Debug)]
struct EstablishingSessionState {
    realm: Uri,
}

#[derive(Debug)]
struct EstablishedSessionState {
    session_id: Id,
    realm: Uri,
}

#[derive(Debug, Default)]
enum SessionState {
    #[default]
    Closed,
    Establishing(EstablishingSessionState),
    Established(EstablishedSessionState),
}

impl SessionState {
    fn is_same_state(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Closed, Self::Closed)
                | (Self::Establishing(_), Self::Establishing(_))
                | (Self::Established(_), Self::Established(_))
        )
    }

    fn allowed_state_transition(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Closed, Self::Establishing(_))
                | (Self::Establishing(_), Self::Closed)
                | (Self::Establishing(_), Self::Established(_))
                | (Self::Established(_), Self::Closed)
        )
    }
}

/// A handle to a session, shared with operation code running outside the driver task.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    state: Arc<RwLock<SessionState>>,
    id_allocator: Arc<Box<dyn IdAllocator>>,
    dispatcher: Arc<MessageDispatcher>,
    service_message_tx: UnboundedSender<Message>,
}

impl SessionHandle {
    /// The current session ID, as given by the router.
    pub async fn current_session_id(&self) -> Option<Id> {
        match &*self.state.read().await {
            SessionState::Established(state) => Some(state.session_id),
            _ => None,
        }
    }

    /// Fails if the session is not established.
    pub async fn ensure_established(&self) -> Result<()> {
        match &*self.state.read().await {
            SessionState::Established(_) => Ok(()),
            _ => Err(Error::msg("session is not established")),
        }
    }

    /// A reference to the session's ID generator.
    pub fn id_allocator(&self) -> Arc<Box<dyn IdAllocator>> {
        self.id_allocator.clone()
    }

    /// A reference to the session's inbound demultiplexer.
    pub fn dispatcher(&self) -> Arc<MessageDispatcher> {
        self.dispatcher.clone()
    }

    /// The raw outbound message channel, for release guards that send outside of async context.
    pub fn message_tx(&self) -> UnboundedSender<Message> {
        self.service_message_tx.clone()
    }

    /// Sends a message over the session.
    ///
    /// Messages should not be sent directly over the underlying service. By sending messages
    /// through the session, the session state can be updated accordingly.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        match &message {
            Message::Hello(hello) => {
                self.transition_state(SessionState::Establishing(EstablishingSessionState {
                    realm: hello.realm.clone(),
                }))
                .await?;
            }
            Message::Abort(_) => {
                self.transition_state(SessionState::Closed).await?;
            }
            _ => (),
        }
        self.service_message_tx.send(message).map_err(Error::new)
    }

    async fn transition_state(&self, state: SessionState) -> Result<()> {
        let mut current_state = self.state.write().await;
        if current_state.is_same_state(&state) {
            return Ok(());
        }
        if !current_state.allowed_state_transition(&state) {
            return Err(Error::msg(format!(
                "invalid state transition from {current_state:?} to {state:?}"
            )));
        }
        debug!("Session transitioned from {current_state:?} to {state:?}");
        *current_state = state;
        Ok(())
    }
}

/// The peer end of a WAMP session.
///
/// Handles WAMP messages in a state machine and routes inbound frames to the pending operation
/// awaiting them.
pub(crate) struct Session {
    name: String,
    handle: SessionHandle,
}

impl Session {
    /// Creates a new session sending messages over a service.
    pub fn new(
        name: String,
        service_message_tx: UnboundedSender<Message>,
        id_allocator: Box<dyn IdAllocator>,
    ) -> Self {
        Self {
            name,
            handle: SessionHandle {
                state: Arc::new(RwLock::new(SessionState::default())),
                id_allocator: Arc::new(id_allocator),
                dispatcher: Arc::new(MessageDispatcher::default()),
                service_message_tx,
            },
        }
    }

    /// The name of the session.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generates a handle to the session, which can be saved separately from the session's
    /// lifecycle.
    pub fn session_handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Handles a message over the session state machine.
    ///
    /// A returned error is terminal for the session.
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        debug!("Peer {} received message: {message:?}", self.name);
        let establishing = matches!(
            &*self.handle.state.read().await,
            SessionState::Establishing(_)
        );
        if establishing {
            self.handle_establishing(message).await
        } else {
            self.handle_established(message).await
        }
    }

    async fn handle_establishing(&self, message: Message) -> Result<()> {
        match message {
            Message::Welcome(ref welcome) => {
                let realm = match &*self.handle.state.read().await {
                    SessionState::Establishing(state) => state.realm.clone(),
                    _ => return Err(Error::msg("session is not in the establishing state")),
                };
                info!(
                    "Peer {} established session {} on realm {realm}",
                    self.name, welcome.session
                );
                self.handle
                    .transition_state(SessionState::Established(EstablishedSessionState {
                        session_id: welcome.session,
                        realm,
                    }))
                    .await?;
                self.handle.id_allocator.reset();
                self.handle
                    .dispatcher
                    .deliver(DispatchKey::Establishing, message);
                Ok(())
            }
            Message::Challenge(_) => {
                self.handle
                    .dispatcher
                    .deliver(DispatchKey::Establishing, message);
                Ok(())
            }
            Message::Abort(_) => {
                self.handle.transition_state(SessionState::Closed).await?;
                self.handle
                    .dispatcher
                    .deliver(DispatchKey::Establishing, message);
                Ok(())
            }
            _ => Err(ProtocolError::new(format!(
                "received {} message on an establishing session",
                message.message_name()
            ))
            .into()),
        }
    }

    async fn handle_established(&self, message: Message) -> Result<()> {
        self.handle.ensure_established().await.map_err(|_| {
            ProtocolError::new(format!(
                "received {} message outside of an established session",
                message.message_name()
            ))
        })?;
        match message {
            Message::Abort(ref abort) => {
                warn!(
                    "Peer session for {} aborted by the router: {abort:?}",
                    self.name
                );
                self.handle.transition_state(SessionState::Closed).await?;
                self.handle
                    .dispatcher
                    .fail_all(&ChannelTransmittableError::try_from(&message)?);
                Ok(())
            }
            ref message @ Message::Error(ref error) => {
                let key = match error.request_type {
                    Message::CALL_TAG => DispatchKey::CallResult {
                        request: error.request,
                    },
                    Message::SUBSCRIBE_TAG
                    | Message::UNSUBSCRIBE_TAG
                    | Message::PUBLISH_TAG
                    | Message::REGISTER_TAG
                    | Message::UNREGISTER_TAG => DispatchKey::Response {
                        request_type: error.request_type,
                        request: error.request,
                    },
                    _ => {
                        error!(
                            "Dropped ERROR message with unrecognized request type {} from the router: {error:?}",
                            error.request_type
                        );
                        return Ok(());
                    }
                };
                self.handle.dispatcher.deliver(key, message.clone());
                Ok(())
            }
            ref message @ Message::Subscribed(ref subscribed) => {
                self.deliver_response(Message::SUBSCRIBE_TAG, subscribed.subscribe_request, message);
                Ok(())
            }
            ref message @ Message::Unsubscribed(ref unsubscribed) => {
                self.deliver_response(
                    Message::UNSUBSCRIBE_TAG,
                    unsubscribed.unsubscribe_request,
                    message,
                );
                Ok(())
            }
            ref message @ Message::Published(ref published) => {
                self.deliver_response(Message::PUBLISH_TAG, published.publish_request, message);
                Ok(())
            }
            ref message @ Message::Registered(ref registered) => {
                self.deliver_response(Message::REGISTER_TAG, registered.register_request, message);
                Ok(())
            }
            ref message @ Message::Unregistered(ref unregistered) => {
                self.deliver_response(
                    Message::UNREGISTER_TAG,
                    unregistered.unregister_request,
                    message,
                );
                Ok(())
            }
            ref message @ Message::Result(ref result) => {
                self.handle.dispatcher.deliver(
                    DispatchKey::CallResult {
                        request: result.call_request,
                    },
                    message.clone(),
                );
                Ok(())
            }
            ref message @ Message::Event(ref event) => {
                self.handle.dispatcher.deliver(
                    DispatchKey::Event {
                        subscription: event.subscribed_subscription,
                    },
                    message.clone(),
                );
                Ok(())
            }
            ref message @ Message::Invocation(ref invocation) => {
                self.handle.dispatcher.deliver(
                    DispatchKey::Invocation {
                        registration: invocation.registered_registration,
                    },
                    message.clone(),
                );
                Ok(())
            }
            ref message @ Message::Interrupt(ref interrupt) => {
                self.handle.dispatcher.deliver(
                    DispatchKey::Interrupt {
                        invocation: interrupt.invocation_request,
                    },
                    message.clone(),
                );
                Ok(())
            }
            _ => Err(ProtocolError::new(format!(
                "received {} message on an established session",
                message.message_name()
            ))
            .into()),
        }
    }

    fn deliver_response(&self, request_type: u64, request: Id, message: &Message) {
        self.handle.dispatcher.deliver(
            DispatchKey::Response {
                request_type,
                request,
            },
            message.clone(),
        );
    }

    /// Fails the session, fanning the error out to every pending operation.
    pub async fn fail(&self, error: &Error) {
        debug!("Peer session for {} failed: {error:#}", self.name);
        *self.handle.state.write().await = SessionState::Closed;
        self.handle
            .dispatcher
            .fail_all(&ChannelTransmittableError::from(error));
    }

    /// Closes the session cleanly, completing every pending operation.
    pub async fn close(&self) {
        *self.handle.state.write().await = SessionState::Closed;
        self.handle.dispatcher.close_all();
    }

    /// Fails the session due to the transport closing.
    pub async fn close_with_transport_error(&self) {
        self.fail(&TransportError::Closed.into()).await;
    }
}
