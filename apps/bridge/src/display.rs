//! Operator-facing console output
//!
//! Logs go to stderr through `tracing`; what the operator needs to hand to
//! the remote client is printed here on stdout.

use ollama_bridge_common::Session;
use std::fmt::Display;

use crate::lifecycle::ShutdownReason;

/// Render the connection block shown once the bridge is serving
pub fn render_connection_details(session: &Session, show_payload: bool) -> String {
    let mut out = String::new();
    out.push_str("\nBridge details:\n");
    out.push_str(&format!("  Local:  {}\n", session.local_url()));
    out.push_str(&format!("  Public: {}\n", session.public_url));
    out.push_str("\nOllama bridge is running\n");
    out.push_str(&format!("  URL:   {}\n", session.public_url));
    out.push_str(&format!("  Token: {}\n", session.secret_token()));

    if show_payload {
        if let Ok(payload) = serde_json::to_string(&session.connection_details()) {
            out.push_str("\nConnection payload (paste into the client):\n");
            out.push_str(&format!("  {}\n", payload));
        }
    }

    out.push_str("\nPress Ctrl+C to stop the server\n");
    out
}

pub fn print_connection_details(session: &Session, show_payload: bool) {
    print!("{}", render_connection_details(session, show_payload));
}

pub fn print_shutdown(reason: &ShutdownReason) {
    match reason {
        ShutdownReason::Signal => println!("\nShutting down..."),
        ShutdownReason::TunnelClosed => println!("\nTunnel closed"),
        ShutdownReason::TunnelError(message) => println!("\nTunnel error: {}", message),
        ShutdownReason::ListenerFailed(message) => println!("\nServer error: {}", message),
    }
}

pub fn print_fatal(err: &dyn Display) {
    eprintln!("Fatal Error: {}", err);
}
