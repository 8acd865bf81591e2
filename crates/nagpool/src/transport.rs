//! Boundary to the line transport
//!
//! The transport owns connect/reconnect and liveness; the core only needs to
//! push complete lines out and to be told about complete lines coming in.

use std::io;

/// Outbound half of one connection
pub trait LineTransport: Send + Sync {
    /// Queue one line (without terminator). Must not block on the network.
    fn send_line(&self, line: &str) -> io::Result<()>;

    /// Release the connection once already queued lines are flushed.
    /// Must not call back into the [`LineHandler`] synchronously.
    fn close(&self);

    /// Human-readable peer label for logs
    fn peer(&self) -> &str;
}

/// Inbound callbacks, invoked by the transport's reader in delivery order
pub trait LineHandler: Send + Sync {
    fn on_line(&self, line: &str);

    /// End of stream or read failure
    fn on_closed(&self);
}
