// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for Prometheus metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const ROOM_JOINED: &str = "room.joined";
pub const MESSAGE_SENT: &str = "message.sent";
pub const MESSAGE_BROADCAST: &str = "message.broadcast";
pub const TYPING_RELAYED: &str = "typing.relayed";
