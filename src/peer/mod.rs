mod connector;
mod dispatch;
mod invocation;
mod peer;
mod session;

pub use invocation::{
    Invocation,
    PayloadStream,
    ProcedureHandler,
    RpcYield,
};
pub use peer::{
    new_web_socket_peer,
    Peer,
    PeerConfig,
    PublishedEvent,
    ReceivedEvent,
    Registration,
    Rpc,
    RpcCall,
    RpcResult,
    Subscription,
    WebSocketConfig,
    WebSocketPeer,
};
