//! Event surface: WebSocket subscriptions fanned out from node topic streams,
//! plus node calls answered over the same connection.

pub mod handler;
pub mod messages;
pub mod subscriptions;
mod upstream;

pub use handler::WebSocketHandler;
pub use messages::{
    parse_control, ClientMessage, ControlError, NodeCall, NodeRequest, Outbound, ServerMessage,
};
pub use subscriptions::{
    ConnectionHandle, ConnectionState, Delivery, SubscribeError, SubscriptionManager,
};
