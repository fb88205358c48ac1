use ollama_bridge_common::{TunnelEvent, constants::TUNNEL_CLOSE_TIMEOUT_SECS};
use std::{future::Future, time::Duration};
use tokio::{
    sync::{broadcast, watch},
    task::JoinSet,
};
use tracing::{debug, warn};

/// An open tunnel
///
/// Dropping the handle aborts every task of the tunnel; `close()` first asks
/// them to stop and gives them a short grace period.
#[derive(Debug)]
pub struct TunnelHandle {
    public_url: String,
    events: broadcast::Sender<TunnelEvent>,
    primary: Option<broadcast::Receiver<TunnelEvent>>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

/// What tunnel tasks use to report events and observe shutdown
#[derive(Debug, Clone)]
pub struct TunnelContext {
    events: broadcast::Sender<TunnelEvent>,
    shutdown: watch::Receiver<bool>,
}

impl TunnelHandle {
    /// New handle for `public_url`, plus the context its tasks run with
    pub fn new(public_url: String, event_capacity: usize) -> (Self, TunnelContext) {
        // Created with the channel so events raised before anyone subscribes are kept
        let (events, primary) = broadcast::channel(event_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let context = TunnelContext {
            events: events.clone(),
            shutdown: shutdown_rx,
        };
        let handle = Self {
            public_url,
            events,
            primary: Some(primary),
            shutdown,
            tasks: JoinSet::new(),
        };
        (handle, context)
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Run a task for the lifetime of the tunnel
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Event stream holding every event since the tunnel opened
    ///
    /// The first call returns the stream created with the tunnel; later calls
    /// only see events raised after subscribing.
    pub fn take_events(&mut self) -> broadcast::Receiver<TunnelEvent> {
        self.primary
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    /// Release the tunnel
    pub async fn close(mut self) {
        debug!("Closing tunnel {}", self.public_url);
        let _ = self.shutdown.send(true);

        let grace = Duration::from_secs(TUNNEL_CLOSE_TIMEOUT_SECS);
        let drain = async { while self.tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Tunnel tasks did not stop within {:?}, aborting", grace);
            self.tasks.abort_all();
        }
    }
}

impl TunnelContext {
    /// Report an event to every subscriber
    pub fn emit(&self, event: TunnelEvent) {
        debug!("Tunnel event: {:?}", event);
        // No receiver left means nobody waits for the tunnel anymore
        let _ = self.events.send(event);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once the tunnel is being closed
    pub async fn cancelled(&mut self) {
        let _ = self.shutdown.wait_for(|closing| *closing).await;
    }
}
