use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::lock::Mutex;
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::{
    net::TcpStream,
    sync::{
        broadcast::{
            self,
            error::RecvError,
        },
        mpsc::{
            unbounded_channel,
            UnboundedReceiver,
            UnboundedSender,
        },
    },
};
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
};

use crate::{
    auth::Authentication,
    core::{
        cancel::CallCancelMode,
        error::{
            ChannelTransmittableError,
            ChannelTransmittableResult,
            HandshakeError,
            TransportError,
            WampError,
        },
        id::{
            Id,
            IdAllocator,
            SequentialIdAllocator,
        },
        roles::PeerRole,
        service::{
            Service,
            ServiceEnd,
            ServiceHandle,
        },
        stream::MessageStream,
        types::{
            Dictionary,
            HashMap,
            HashSet,
            List,
            Value,
        },
        uri::Uri,
    },
    message::{
        common::{
            abort_message_for_error,
            cancel_call_with_mode,
        },
        message::{
            AuthenticateMessage,
            CallMessage,
            HelloMessage,
            Message,
            PublishMessage,
            RegisterMessage,
            SubscribeMessage,
            UnregisterMessage,
            UnsubscribeMessage,
        },
    },
    peer::{
        connector::{
            connector::ConnectorFactory,
            WebSocketConnectorFactory,
        },
        dispatch::{
            DispatchKey,
            MessageDispatcher,
        },
        invocation::{
            run_invocation,
            ProcedureHandler,
        },
        session::{
            Session,
            SessionHandle,
        },
    },
    serializer::serializer::{
        new_serializer,
        SerializerType,
    },
    transport::{
        transport::{
            Transport,
            TransportFactory,
        },
        web_socket_transport::WebSocketTransportFactory,
    },
};

const DEFAULT_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Configuration for WebSocket-specific WAMP connections.
#[derive(Debug, Default)]
pub struct WebSocketConfig {
    /// Additional headers to include in the WebSocket handshake request.
    pub headers: HashMap<String, String>,
}

/// Configuration for a [`Peer`].
#[derive(Debug)]
pub struct PeerConfig {
    /// Name of the peer, mostly for logging.
    pub name: String,
    /// Roles implemented by the peer, advertised during session establishment.
    pub roles: HashSet<PeerRole>,
    /// Authentication configuration, used when the router challenges the peer.
    pub authentication: Option<Authentication>,
    /// Seed for the first request id of each session.
    ///
    /// When unset, every session starts from a random seed. A fixed seed gives deterministic
    /// request ids.
    pub request_id_seed: Option<u64>,
    /// Additional configuration for WebSocket-specific connections.
    pub web_socket: Option<WebSocketConfig>,
}

impl PeerConfig {
    fn validate(&self) -> Result<()> {
        if self.roles.is_empty() {
            return Err(Error::msg("at least one role is required"));
        }
        Ok(())
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            roles: HashSet::from_iter([
                PeerRole::Callee,
                PeerRole::Caller,
                PeerRole::Publisher,
                PeerRole::Subscriber,
            ]),
            authentication: None,
            request_id_seed: None,
            web_socket: None,
        }
    }
}

/// Input to a procedure call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpcCall {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// A single result payload of a procedure call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpcResult {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// An event published to a topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// An event received over a subscription.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

/// An active procedure call.
///
/// Every call is issued with progressive results enabled, so the result stream yields zero or
/// more progressive payloads followed by at most one final payload. A terminal RESULT with no
/// positional arguments is treated purely as completion and yields nothing.
///
/// Dropping the call before it terminates cancels it with the `kill` mode. If a terminal frame
/// already arrived, no CANCEL is sent.
pub struct Rpc {
    request_id: Id,
    result_rx: UnboundedReceiver<ChannelTransmittableResult<RpcResult>>,
    terminated: Arc<AtomicBool>,
    canceled: bool,
    message_tx: UnboundedSender<Message>,
}

impl Rpc {
    /// The request ID of the call.
    pub fn request_id(&self) -> Id {
        self.request_id
    }

    /// The next result payload, or `None` once the call has completed.
    pub async fn next_result(&mut self) -> Option<Result<RpcResult>> {
        self.result_rx
            .recv()
            .await
            .map(|result| result.map_err(|err| err.into_error()))
    }

    /// Drains the call to its final payload.
    ///
    /// Progressive payloads are discarded. Completion without a final payload produces an empty
    /// result.
    pub async fn result(mut self) -> Result<RpcResult> {
        let mut last = RpcResult::default();
        while let Some(result) = self.next_result().await {
            last = result?;
        }
        Ok(last)
    }

    /// Cancels the call, if it has not already terminated.
    pub fn cancel(&mut self, mode: CallCancelMode) {
        if self.canceled || self.terminated.load(Ordering::Acquire) {
            return;
        }
        self.canceled = true;
        self.message_tx
            .send(cancel_call_with_mode(self.request_id, mode))
            .ok();
    }
}

impl Drop for Rpc {
    fn drop(&mut self) {
        self.cancel(CallCancelMode::Kill);
    }
}

struct SubscriptionGuard {
    subscription: Id,
    active: bool,
    message_tx: UnboundedSender<Message>,
    id_allocator: Arc<Box<dyn IdAllocator>>,
    dispatcher: Arc<MessageDispatcher>,
}

impl SubscriptionGuard {
    /// Stops event delivery without sending UNSUBSCRIBE.
    fn defuse(&mut self) {
        self.active = false;
        self.dispatcher.unsubscribe(DispatchKey::Event {
            subscription: self.subscription,
        });
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.defuse();
        // Fire-and-forget: the UNSUBSCRIBED acknowledgment is not awaited.
        self.message_tx
            .send(Message::Unsubscribe(UnsubscribeMessage {
                request: self.id_allocator.generate_id(),
                subscribed_subscription: self.subscription,
            }))
            .ok();
    }
}

/// An active subscription to a topic.
///
/// Events arrive on [`Subscription::event_rx`] in transport arrival order, for as long as the
/// subscription is held. Dropping the subscription sends UNSUBSCRIBE without awaiting the
/// acknowledgment; use [`Peer::unsubscribe`] to await it.
pub struct Subscription {
    /// The subscription ID.
    pub id: Id,
    /// The event receiver channel.
    pub event_rx: UnboundedReceiver<ChannelTransmittableResult<ReceivedEvent>>,
    guard: SubscriptionGuard,
}

impl Subscription {
    /// The next event, or `None` once the subscription has ended.
    pub async fn next_event(&mut self) -> Option<Result<ReceivedEvent>> {
        self.event_rx
            .recv()
            .await
            .map(|event| event.map_err(|err| err.into_error()))
    }
}

struct RegistrationGuard {
    registration: Id,
    active: bool,
    message_tx: UnboundedSender<Message>,
    id_allocator: Arc<Box<dyn IdAllocator>>,
    dispatcher: Arc<MessageDispatcher>,
}

impl RegistrationGuard {
    /// Stops invocation delivery without sending UNREGISTER.
    ///
    /// In-flight invocation tasks run to completion either way; they are tied to their own
    /// lifetimes.
    fn defuse(&mut self) {
        self.active = false;
        self.dispatcher.unsubscribe(DispatchKey::Invocation {
            registration: self.registration,
        });
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.defuse();
        self.message_tx
            .send(Message::Unregister(UnregisterMessage {
                request: self.id_allocator.generate_id(),
                registered_registration: self.registration,
            }))
            .ok();
    }
}

/// An active registration of a procedure.
///
/// Dropping the registration sends UNREGISTER without awaiting the acknowledgment; use
/// [`Peer::unregister`] to await it. Invocations already in flight continue to completion.
pub struct Registration {
    /// The registration ID.
    pub id: Id,
    guard: RegistrationGuard,
}

struct PeerState {
    service: ServiceHandle,
    session: SessionHandle,
}

/// A WAMP peer (a.k.a., client) that connects to a WAMP router, establishes a session in a realm,
/// and interacts with resources in the realm as caller, callee, publisher, and subscriber.
pub struct Peer<S> {
    config: PeerConfig,
    connector_factory: Box<dyn ConnectorFactory<S>>,
    transport_factory: Box<dyn TransportFactory<S>>,

    drop_tx: broadcast::Sender<()>,

    peer_state: Arc<Mutex<Option<PeerState>>>,
}

impl<S> Peer<S>
where
    S: Send + 'static,
{
    /// Creates a new peer.
    pub fn new(
        config: PeerConfig,
        connector_factory: Box<dyn ConnectorFactory<S>>,
        transport_factory: Box<dyn TransportFactory<S>>,
    ) -> Result<Self> {
        config.validate()?;
        let (drop_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            connector_factory,
            transport_factory,
            drop_tx,
            peer_state: Arc::new(Mutex::new(None)),
        })
    }

    /// Connects to a router.
    ///
    /// This method merely establishes a network connection with the router. It does not establish
    /// any WAMP session; see [`Self::join_realm`].
    ///
    /// The connection is maintained asynchronously. If the peer loses the connection, methods
    /// depending on it fail, and the peer can reconnect by calling this method again.
    pub async fn connect(&mut self, uri: &str) -> Result<()> {
        let connector = self.connector_factory.new_connector();
        let stream = connector.connect(&self.config, uri).await?;
        info!(
            "WAMP connection established with {uri} for peer {}",
            self.config.name
        );

        let transport = self.transport_factory.new_transport(stream);
        self.direct_connect(transport).await
    }

    /// Directly connects to a router over the given transport.
    pub async fn direct_connect(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        let serializer = new_serializer(SerializerType::Json);
        let stream = MessageStream::new(transport, serializer);

        let service = Service::new(self.config.name.clone(), stream);
        let service_message_rx = service.message_rx();
        let end_rx = service.end_rx();
        let drop_rx = self.drop_tx.subscribe();

        let service_handle = service.start();

        let id_allocator: Box<dyn IdAllocator> = match self.config.request_id_seed {
            Some(seed) => Box::new(SequentialIdAllocator::starting_at(seed)),
            None => Box::new(SequentialIdAllocator::default()),
        };
        let session = Session::new(
            self.config.name.clone(),
            service_handle.message_tx(),
            id_allocator,
        );
        let session_handle = session.session_handle();
        tokio::spawn(Self::message_handler(
            session,
            self.peer_state.clone(),
            service_message_rx,
            end_rx,
            drop_rx,
        ));

        let mut peer_state = self.peer_state.lock().await;
        *peer_state = Some(PeerState {
            service: service_handle,
            session: session_handle,
        });

        Ok(())
    }

    async fn message_handler(
        session: Session,
        peer_state: Arc<Mutex<Option<PeerState>>>,
        mut service_message_rx: broadcast::Receiver<Message>,
        mut end_rx: broadcast::Receiver<ServiceEnd>,
        mut drop_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                // Biased, so queued inbound frames drain before the end-of-service signal is
                // observed.
                biased;
                message = service_message_rx.recv() => {
                    let message = match message {
                        Ok(message) => message,
                        Err(RecvError::Closed) => {
                            // The service is gone; the end channel holds the reason.
                            match end_rx.try_recv() {
                                Ok(ServiceEnd::Failed(cause)) => {
                                    session.fail(&TransportError::Failed(cause).into()).await;
                                }
                                _ => session.close_with_transport_error().await,
                            }
                            break;
                        }
                        Err(RecvError::Lagged(count)) => {
                            warn!("Peer session {} missed {count} messages", session.name());
                            continue;
                        }
                    };
                    let message_name = message.message_name();
                    if let Err(err) = session.handle_message(message).await {
                        error!(
                            "Peer session {} failed to handle {message_name} message: {err:#}",
                            session.name()
                        );
                        session.session_handle().message_tx().send(abort_message_for_error(&err)).ok();
                        session.fail(&err).await;
                        break;
                    }
                }
                // Service ended: the transport closed or failed.
                end = end_rx.recv() => {
                    match end {
                        Ok(ServiceEnd::Failed(cause)) => {
                            session.fail(&TransportError::Failed(cause).into()).await;
                        }
                        _ => session.close_with_transport_error().await,
                    }
                    break;
                }
                // Peer was dropped.
                _ = drop_rx.recv() => {
                    session.close_with_transport_error().await;
                    break;
                }
            }
        }

        info!(
            "Peer session {} is disconnecting from the router",
            session.name()
        );
        peer_state.lock().await.take();
    }

    async fn session(&self) -> Result<SessionHandle> {
        match &*self.peer_state.lock().await {
            Some(peer_state) => Ok(peer_state.session.clone()),
            None => Err(Error::msg("peer is not connected")),
        }
    }

    /// The current session ID, as given by the router.
    pub async fn current_session_id(&self) -> Option<Id> {
        match self.session().await {
            Ok(session) => session.current_session_id().await,
            Err(_) => None,
        }
    }

    /// Joins the realm, establishing a WAMP session.
    ///
    /// The session exists for as long as the router allows it to. The session will be lost if the
    /// router aborts it or the underlying connection is lost.
    pub async fn join_realm(&self, realm: &str) -> Result<()> {
        let session = self.session().await?;
        let dispatcher = session.dispatcher();

        let mut hello = HelloMessage {
            realm: Uri::try_from(realm).map_err(Error::new)?,
            details: Dictionary::from_iter([(
                "roles".to_owned(),
                Value::Dictionary(
                    self.config
                        .roles
                        .iter()
                        .map(|role| {
                            (
                                role.key_for_details().to_owned(),
                                Value::Dictionary(role.details_entry()),
                            )
                        })
                        .collect(),
                ),
            )]),
        };
        if let Some(authentication) = &self.config.authentication {
            authentication.embed_into_hello_message(&mut hello);
        }

        let mut establishing_rx = dispatcher.subscribe(DispatchKey::Establishing);
        let result = async {
            session.send_message(Message::Hello(hello)).await?;
            loop {
                match establishing_rx.recv().await {
                    Some(Ok(Message::Welcome(_))) => return Ok(()),
                    Some(Ok(Message::Challenge(challenge))) => {
                        let authentication = match &self.config.authentication {
                            Some(authentication) => authentication,
                            None => {
                                let err: Error = HandshakeError::UnexpectedChallenge.into();
                                session.send_message(abort_message_for_error(&err)).await.ok();
                                return Err(err);
                            }
                        };
                        let response = match authentication
                            .responder
                            .respond(&challenge.auth_method, &challenge.extra)
                            .await
                        {
                            Ok(response) => response,
                            Err(err) => {
                                session.send_message(abort_message_for_error(&err)).await.ok();
                                return Err(err);
                            }
                        };
                        session
                            .send_message(Message::Authenticate(AuthenticateMessage {
                                signature: response.signature,
                                extra: response.extra,
                            }))
                            .await?;
                    }
                    Some(Ok(Message::Abort(abort))) => {
                        return Err(HandshakeError::Aborted {
                            reason: abort.reason,
                            details: abort.details,
                        }
                        .into())
                    }
                    Some(Ok(message)) => {
                        warn!(
                            "Dropped unexpected {} message during session establishment",
                            message.message_name()
                        );
                    }
                    Some(Err(err)) => return Err(err.into_error()),
                    None => return Err(TransportError::Closed.into()),
                }
            }
        }
        .await;

        dispatcher.unsubscribe(DispatchKey::Establishing);
        result
    }

    /// Disconnects from the router.
    pub async fn disconnect(&mut self) -> Result<()> {
        let mut peer_state = self.peer_state.lock().await;
        if let Some(peer_state) = peer_state.take() {
            peer_state.service.cancel()?;
            peer_state.service.join().await?;
        }
        Ok(())
    }

    /// Calls a procedure in the realm.
    ///
    /// Each call to this method issues an independent CALL with a fresh request id. The call is
    /// made with progressive results enabled; consume payloads through the returned [`Rpc`].
    pub async fn call(&self, procedure: Uri, rpc_call: RpcCall) -> Result<Rpc> {
        let session = self.session().await?;
        session.ensure_established().await?;
        let dispatcher = session.dispatcher();
        let request_id = session.id_allocator().generate_id();

        let message_rx = dispatcher.subscribe(DispatchKey::CallResult {
            request: request_id,
        });
        let (result_tx, result_rx) = unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));
        tokio::spawn(Self::call_driver(
            request_id,
            message_rx,
            result_tx,
            terminated.clone(),
            dispatcher.clone(),
        ));

        session
            .send_message(Message::Call(CallMessage {
                request: request_id,
                options: Dictionary::from_iter([(
                    "receive_progress".to_owned(),
                    Value::Bool(true),
                )]),
                procedure,
                arguments: rpc_call.arguments,
                arguments_keyword: rpc_call.arguments_keyword,
            }))
            .await?;

        Ok(Rpc {
            request_id,
            result_rx,
            terminated,
            canceled: false,
            message_tx: session.message_tx(),
        })
    }

    /// Calls a procedure and waits for its final result.
    pub async fn call_and_wait(&self, procedure: Uri, rpc_call: RpcCall) -> Result<RpcResult> {
        self.call(procedure, rpc_call).await?.result().await
    }

    async fn call_driver(
        request_id: Id,
        mut message_rx: UnboundedReceiver<ChannelTransmittableResult<Message>>,
        result_tx: UnboundedSender<ChannelTransmittableResult<RpcResult>>,
        terminated: Arc<AtomicBool>,
        dispatcher: Arc<MessageDispatcher>,
    ) {
        while let Some(item) = message_rx.recv().await {
            match item {
                Ok(Message::Result(result)) => {
                    let progress = result
                        .details
                        .get("progress")
                        .and_then(|value| value.bool())
                        .unwrap_or(false);
                    if progress {
                        result_tx
                            .send(Ok(RpcResult {
                                arguments: result.yield_arguments,
                                arguments_keyword: result.yield_arguments_keyword,
                            }))
                            .ok();
                        continue;
                    }
                    // The terminal frame. An empty positional payload means completion only.
                    terminated.store(true, Ordering::Release);
                    if !result.yield_arguments.is_empty() {
                        result_tx
                            .send(Ok(RpcResult {
                                arguments: result.yield_arguments,
                                arguments_keyword: result.yield_arguments_keyword,
                            }))
                            .ok();
                    }
                    break;
                }
                Ok(ref message @ Message::Error(_)) => {
                    terminated.store(true, Ordering::Release);
                    match ChannelTransmittableError::try_from(message) {
                        Ok(err) => {
                            result_tx.send(Err(err)).ok();
                        }
                        Err(err) => {
                            error!("Failed to extract error for call {request_id}: {err:#}")
                        }
                    }
                    break;
                }
                Ok(message) => {
                    warn!(
                        "Dropped unexpected {} for call {request_id}",
                        message.message_name()
                    );
                }
                Err(err) => {
                    // The session failed; there is no transport left to cancel into.
                    terminated.store(true, Ordering::Release);
                    result_tx.send(Err(err)).ok();
                    break;
                }
            }
        }
        dispatcher.unsubscribe(DispatchKey::CallResult {
            request: request_id,
        });
    }

    /// Publishes an event to a topic, waiting for acknowledgment.
    ///
    /// Returns the publication ID assigned by the router.
    pub async fn publish(&self, topic: Uri, event: PublishedEvent) -> Result<Id> {
        let session = self.session().await?;
        session.ensure_established().await?;
        let dispatcher = session.dispatcher();
        let request_id = session.id_allocator().generate_id();

        let key = DispatchKey::Response {
            request_type: Message::PUBLISH_TAG,
            request: request_id,
        };
        let mut response_rx = dispatcher.subscribe(key);

        session
            .send_message(Message::Publish(PublishMessage {
                request: request_id,
                options: Dictionary::from_iter([("acknowledge".to_owned(), Value::Bool(true))]),
                topic,
                arguments: event.arguments,
                arguments_keyword: event.arguments_keyword,
            }))
            .await?;

        let result = Self::await_response(&mut response_rx).await;
        dispatcher.unsubscribe(key);
        match result? {
            Message::Published(published) => Ok(published.publication),
            message => Err(Error::msg(format!(
                "unexpected {} response to PUBLISH",
                message.message_name()
            ))),
        }
    }

    /// Subscribes to a topic in the realm.
    ///
    /// The resulting subscription contains a receiver channel for published events. The stream
    /// ends when the subscription is released or the session ends.
    pub async fn subscribe(&self, topic: Uri) -> Result<Subscription> {
        let session = self.session().await?;
        session.ensure_established().await?;
        let dispatcher = session.dispatcher();
        let request_id = session.id_allocator().generate_id();

        let key = DispatchKey::Response {
            request_type: Message::SUBSCRIBE_TAG,
            request: request_id,
        };
        let mut response_rx = dispatcher.subscribe(key);

        session
            .send_message(Message::Subscribe(SubscribeMessage {
                request: request_id,
                options: Dictionary::default(),
                topic,
            }))
            .await?;

        let result = Self::await_response(&mut response_rx).await;
        dispatcher.unsubscribe(key);
        let subscription_id = match result? {
            Message::Subscribed(subscribed) => subscribed.subscription,
            message => {
                return Err(Error::msg(format!(
                    "unexpected {} response to SUBSCRIBE",
                    message.message_name()
                )))
            }
        };

        let message_rx = dispatcher.subscribe(DispatchKey::Event {
            subscription: subscription_id,
        });
        let (event_tx, event_rx) = unbounded_channel();
        tokio::spawn(Self::event_driver(subscription_id, message_rx, event_tx));

        Ok(Subscription {
            id: subscription_id,
            event_rx,
            guard: SubscriptionGuard {
                subscription: subscription_id,
                active: true,
                message_tx: session.message_tx(),
                id_allocator: session.id_allocator(),
                dispatcher,
            },
        })
    }

    async fn event_driver(
        subscription_id: Id,
        mut message_rx: UnboundedReceiver<ChannelTransmittableResult<Message>>,
        event_tx: UnboundedSender<ChannelTransmittableResult<ReceivedEvent>>,
    ) {
        while let Some(item) = message_rx.recv().await {
            match item {
                Ok(Message::Event(event)) => {
                    if event_tx
                        .send(Ok(ReceivedEvent {
                            arguments: event.publish_arguments,
                            arguments_keyword: event.publish_arguments_keyword,
                        }))
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(message) => {
                    warn!(
                        "Dropped unexpected {} for subscription {subscription_id}",
                        message.message_name()
                    );
                }
                Err(err) => {
                    event_tx.send(Err(err)).ok();
                    break;
                }
            }
        }
    }

    /// Removes a subscription, awaiting the router's acknowledgment.
    pub async fn unsubscribe(&self, mut subscription: Subscription) -> Result<()> {
        let session = self.session().await?;
        session.ensure_established().await?;
        let dispatcher = session.dispatcher();
        let request_id = session.id_allocator().generate_id();

        let key = DispatchKey::Response {
            request_type: Message::UNSUBSCRIBE_TAG,
            request: request_id,
        };
        let mut response_rx = dispatcher.subscribe(key);

        subscription.guard.defuse();
        session
            .send_message(Message::Unsubscribe(UnsubscribeMessage {
                request: request_id,
                subscribed_subscription: subscription.id,
            }))
            .await?;

        let result = Self::await_response(&mut response_rx).await;
        dispatcher.unsubscribe(key);
        match result? {
            Message::Unsubscribed(_) => Ok(()),
            message => Err(Error::msg(format!(
                "unexpected {} response to UNSUBSCRIBE",
                message.message_name()
            ))),
        }
    }

    /// Registers a procedure in the realm.
    ///
    /// Every incoming invocation of the procedure runs the handler in its own task; see
    /// [`ProcedureHandler`].
    pub async fn register<H>(&self, procedure: Uri, handler: H) -> Result<Registration>
    where
        H: ProcedureHandler,
    {
        let session = self.session().await?;
        session.ensure_established().await?;
        let dispatcher = session.dispatcher();
        let request_id = session.id_allocator().generate_id();

        let key = DispatchKey::Response {
            request_type: Message::REGISTER_TAG,
            request: request_id,
        };
        let mut response_rx = dispatcher.subscribe(key);

        session
            .send_message(Message::Register(RegisterMessage {
                request: request_id,
                options: Dictionary::from_iter([(
                    "receive_progress".to_owned(),
                    Value::Bool(true),
                )]),
                procedure,
            }))
            .await?;

        let result = Self::await_response(&mut response_rx).await;
        dispatcher.unsubscribe(key);
        let registration_id = match result? {
            Message::Registered(registered) => registered.registration,
            message => {
                return Err(Error::msg(format!(
                    "unexpected {} response to REGISTER",
                    message.message_name()
                )))
            }
        };

        let message_rx = dispatcher.subscribe(DispatchKey::Invocation {
            registration: registration_id,
        });
        tokio::spawn(Self::registration_listener(
            self.config.name.clone(),
            registration_id,
            message_rx,
            session.message_tx(),
            dispatcher.clone(),
            Arc::new(handler),
        ));

        Ok(Registration {
            id: registration_id,
            guard: RegistrationGuard {
                registration: registration_id,
                active: true,
                message_tx: session.message_tx(),
                id_allocator: session.id_allocator(),
                dispatcher,
            },
        })
    }

    async fn registration_listener(
        name: String,
        registration_id: Id,
        mut message_rx: UnboundedReceiver<ChannelTransmittableResult<Message>>,
        message_tx: UnboundedSender<Message>,
        dispatcher: Arc<MessageDispatcher>,
        handler: Arc<dyn ProcedureHandler>,
    ) {
        while let Some(item) = message_rx.recv().await {
            match item {
                Ok(Message::Invocation(invocation)) => {
                    debug!(
                        "Invoking procedure registration {registration_id} for request {}",
                        invocation.request
                    );
                    tokio::spawn(run_invocation(
                        name.clone(),
                        message_tx.clone(),
                        dispatcher.clone(),
                        invocation,
                        handler.clone(),
                    ));
                }
                Ok(message) => {
                    warn!(
                        "Dropped unexpected {} for registration {registration_id}",
                        message.message_name()
                    );
                }
                Err(_) => break,
            }
        }
    }

    /// Removes a registration, awaiting the router's acknowledgment.
    ///
    /// Errors reported by the router are swallowed; invocations already in flight continue to
    /// completion.
    pub async fn unregister(&self, mut registration: Registration) -> Result<()> {
        let session = self.session().await?;
        session.ensure_established().await?;
        let dispatcher = session.dispatcher();
        let request_id = session.id_allocator().generate_id();

        let key = DispatchKey::Response {
            request_type: Message::UNREGISTER_TAG,
            request: request_id,
        };
        let mut response_rx = dispatcher.subscribe(key);

        registration.guard.defuse();
        session
            .send_message(Message::Unregister(UnregisterMessage {
                request: request_id,
                registered_registration: registration.id,
            }))
            .await?;

        let result = Self::await_response(&mut response_rx).await;
        dispatcher.unsubscribe(key);
        match result {
            Ok(Message::Unregistered(_)) => Ok(()),
            Ok(message) => Err(Error::msg(format!(
                "unexpected {} response to UNREGISTER",
                message.message_name()
            ))),
            Err(err) if err.downcast_ref::<WampError>().is_some() => {
                debug!(
                    "Swallowed error unregistering {}: {err:#}",
                    registration.id
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn await_response(
        response_rx: &mut UnboundedReceiver<ChannelTransmittableResult<Message>>,
    ) -> Result<Message> {
        match response_rx.recv().await {
            Some(Ok(Message::Error(ref error))) => Err(WampError::from(error).into()),
            Some(Ok(message)) => Ok(message),
            Some(Err(err)) => Err(err.into_error()),
            None => Err(TransportError::Closed.into()),
        }
    }
}

impl<S> Drop for Peer<S> {
    fn drop(&mut self) {
        self.drop_tx.send(()).ok();
    }
}

/// A WAMP peer over a WebSocket stream.
pub type WebSocketPeer = Peer<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Creates a new [`WebSocketPeer`].
pub fn new_web_socket_peer(config: PeerConfig) -> Result<WebSocketPeer> {
    Peer::new(
        config,
        Box::new(WebSocketConnectorFactory::default()),
        Box::new(WebSocketTransportFactory::default()),
    )
}
