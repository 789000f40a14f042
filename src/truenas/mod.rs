pub mod client;
pub mod connection;
pub mod discovery;
pub mod types;

pub use client::{ClientMode, TrueNasClient};
pub use connection::{connect_ws, ConnectOptions, ConnectionState, WsConnection};
pub use discovery::discover_endpoints;
