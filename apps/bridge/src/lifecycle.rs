//! Startup, serving and teardown of one bridge run
//!
//! `Init -> Probed -> Ported -> Tunneled -> Serving -> Closing -> Terminated`.
//! A failure before `Serving` goes straight to `Terminated` after releasing
//! whatever was acquired; once serving, the first of a termination signal,
//! a tunnel event or a listener failure triggers `Closing`.

use ollama_bridge_common::{Session, TunnelEvent, issue_secret_token};
use std::{future::Future, sync::Arc};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    display,
    error::BridgeError,
    port,
    probe::UpstreamProbe,
    proxy::ProxyForwarder,
    server::{self, AppState},
    tunnel::TunnelHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Probed,
    Ported,
    Tunneled,
    Serving,
    Closing,
    Terminated,
}

/// Why a serving bridge stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    TunnelClosed,
    TunnelError(String),
    ListenerFailed(String),
}

impl ShutdownReason {
    /// Process exit status for this reason
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownReason::Signal | ShutdownReason::TunnelClosed => 0,
            ShutdownReason::TunnelError(_) | ShutdownReason::ListenerFailed(_) => 1,
        }
    }
}

impl From<TunnelEvent> for ShutdownReason {
    fn from(event: TunnelEvent) -> Self {
        match event {
            TunnelEvent::Error(message) => ShutdownReason::TunnelError(message),
            TunnelEvent::Closed => ShutdownReason::TunnelClosed,
        }
    }
}

/// Resources held while serving
struct RunningBridge {
    session: Arc<Session>,
    tunnel: TunnelHandle,
    events: broadcast::Receiver<TunnelEvent>,
    server: JoinHandle<std::io::Result<()>>,
}

/// Drives one bridge run from probe to exit status
#[derive(Debug)]
pub struct LifecycleController {
    config: Config,
    state: LifecycleState,
}

impl LifecycleController {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: LifecycleState::Init,
        }
    }

    /// Run until SIGINT/SIGTERM or a fatal event; returns the exit status
    pub async fn run(self) -> u8 {
        let shutdown = shutdown_signal();
        self.run_until(shutdown).await
    }

    /// Run until `shutdown` resolves or a fatal event; returns the exit status
    ///
    /// `shutdown` is watched from the start, so resolving it during startup
    /// abandons the remaining steps.
    pub async fn run_until<F>(mut self, shutdown: F) -> u8
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let started = tokio::select! {
            result = self.start() => Some(result),
            _ = &mut shutdown => None,
        };

        match started {
            Some(Ok(bridge)) => {
                let reason = self.serve(bridge, shutdown).await;
                display::print_shutdown(&reason);
                reason.exit_code()
            }
            Some(Err(e)) => {
                error!("{}", e);
                display::print_fatal(&e);
                self.transition(LifecycleState::Terminated);
                1
            }
            None => {
                info!("Startup interrupted in state {:?}", self.state);
                let reason = ShutdownReason::Signal;
                display::print_shutdown(&reason);
                self.transition(LifecycleState::Terminated);
                reason.exit_code()
            }
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("Lifecycle {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn start(&mut self) -> Result<RunningBridge, BridgeError> {
        let upstream = self.config.upstream.clone();

        let probe = UpstreamProbe::new(self.config.probe_timeout);
        if !probe.check(upstream.base_url().as_str()).await {
            return Err(BridgeError::UpstreamUnreachable(
                upstream.base_url().to_string(),
            ));
        }
        info!("Ollama reachable at {}", upstream.base_url());
        self.transition(LifecycleState::Probed);

        let forwarder = ProxyForwarder::new(upstream)?;

        let (port, secret) = tokio::join!(port::allocate(self.config.preferred_port), async {
            issue_secret_token()
        });
        let port = port?;
        self.transition(LifecycleState::Ported);

        let mut tunnel = self.config.tunnel.open(port).await?;
        let events = tunnel.take_events();
        self.transition(LifecycleState::Tunneled);

        let listener = match server::bind(port).await {
            Ok(listener) => listener,
            Err(e) => {
                tunnel.close().await;
                return Err(e);
            }
        };

        let session = Arc::new(Session::new(secret, port, tunnel.public_url().to_string()));
        let app = server::router(AppState {
            session: session.clone(),
            forwarder,
        });
        let server = tokio::spawn(async move { axum::serve(listener, app).await });
        self.transition(LifecycleState::Serving);

        display::print_connection_details(&session, self.config.display_payload);

        Ok(RunningBridge {
            session,
            tunnel,
            events,
            server,
        })
    }

    async fn serve<F>(&mut self, mut bridge: RunningBridge, shutdown: F) -> ShutdownReason
    where
        F: Future<Output = ()>,
    {
        let reason = tokio::select! {
            _ = shutdown => ShutdownReason::Signal,
            event = next_event(&mut bridge.events) => ShutdownReason::from(event),
            result = &mut bridge.server => ShutdownReason::ListenerFailed(match result {
                Ok(Ok(())) => "listener stopped".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            }),
        };
        info!("Shutting down bridge {}: {:?}", bridge.session.public_url, reason);

        self.transition(LifecycleState::Closing);
        bridge.server.abort();
        bridge.tunnel.close().await;
        self.transition(LifecycleState::Terminated);

        reason
    }
}

async fn next_event(events: &mut broadcast::Receiver<TunnelEvent>) -> TunnelEvent {
    loop {
        match events.recv().await {
            Ok(event) => return event,
            Err(RecvError::Lagged(skipped)) => warn!("Missed {} tunnel events", skipped),
            // The handle owns a sender, so this only happens once it is gone
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Listen for Ctrl-C, and SIGTERM on unix
///
/// The listeners are installed when this is called; the returned future
/// resolves on the first signal.
#[cfg(unix)]
pub fn shutdown_signal() -> impl Future<Output = ()> {
    use tokio::signal::unix::{SignalKind, signal};

    let interrupt = signal(SignalKind::interrupt());
    let terminate = signal(SignalKind::terminate());

    async move {
        tokio::select! {
            _ = wait_for(interrupt, "Ctrl-C") => info!("Received Ctrl-C"),
            _ = wait_for(terminate, "SIGTERM") => info!("Received SIGTERM"),
        }
    }
}

#[cfg(unix)]
async fn wait_for(listener: std::io::Result<tokio::signal::unix::Signal>, name: &str) {
    match listener {
        Ok(mut signal) => {
            signal.recv().await;
        }
        Err(e) => {
            error!("Failed to listen for {}: {}", name, e);
            std::future::pending::<()>().await;
        }
    }
}

/// Listen for Ctrl-C
#[cfg(not(unix))]
pub fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}
