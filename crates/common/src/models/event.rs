/// Asynchronous lifecycle events emitted by an open tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    /// The tunnel failed; the bridge must tear down and exit non-zero
    Error(String),

    /// The provider tore the tunnel down; the bridge shuts down cleanly
    Closed,
}
