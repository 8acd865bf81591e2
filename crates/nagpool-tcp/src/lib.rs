//! TCP frontend for nagpool
//!
//! One persistent connection per worker, newline-terminated lines in both
//! directions. The coordinator side accepts on a tokio runtime ([`server`]);
//! worker processes dial in with a blocking connection ([`peer`]).

pub mod config;
pub mod peer;
pub mod server;
pub mod transport;

pub use config::{ConfigError, NagpoolConfig};
pub use peer::{PeerConnection, connect_peer};
pub use server::{Server, serve, serve_connection};
pub use transport::TcpTransport;
