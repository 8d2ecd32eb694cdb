//! Daemon server - IPC listener and main event loop

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::BufReader;
use tokio::sync::broadcast;

use crate::common::{config::Config, paths, Result};
use crate::ipc::{
    protocol::{Command, Push, Request, Response},
    transport,
};

use super::{handler, TestHost};

/// Main daemon server
pub struct Daemon {
    config: Config,
    host: Arc<TestHost>,
    /// Last activity timestamp for idle timeout, shared with client tasks
    last_activity: Arc<Mutex<Instant>>,
    /// Open notification subscriptions; these hold off the idle timeout
    subscribers: Arc<AtomicUsize>,
    /// Client tasks signal shutdown through this channel
    shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
    /// Create a new daemon instance
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        let host = Arc::new(TestHost::from_config(&config)?);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            host,
            last_activity: Arc::new(Mutex::new(Instant::now())),
            subscribers: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        })
    }

    /// Run the daemon main loop
    pub async fn run(&mut self) -> Result<()> {
        let listener = transport::create_listener().await?;
        tracing::info!("Daemon listening on {}", paths::socket_name());

        let idle_timeout = Duration::from_secs(self.config.daemon.idle_timeout_minutes * 60);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let idle = self
                .last_activity
                .lock()
                .map(|t| t.elapsed())
                .unwrap_or_default();
            if idle_expired(idle, idle_timeout, self.subscribers.load(Ordering::SeqCst)) {
                tracing::info!("Idle timeout reached, shutting down daemon");
                break;
            }

            if self.run_select_loop(&listener, &mut shutdown_rx).await? {
                break;
            }
        }

        tracing::info!("Cleaning up daemon resources");
        self.host.orchestrator.engine().graph().remove_hooks();

        paths::remove_socket()?;
        tracing::info!("Daemon shutdown complete");

        Ok(())
    }

    /// Run one iteration of the select loop, returns true if should break
    #[cfg(unix)]
    async fn run_select_loop(
        &mut self,
        listener: &transport::platform::Listener,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<bool> {
        use tokio::signal::unix::{signal, SignalKind};

        // Signal handlers are recreated each iteration to avoid lifetime issues
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(crate::common::Error::Io)?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(crate::common::Error::Io)?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                Ok(true)
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully");
                Ok(true)
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Shutdown requested, exiting");
                Ok(true)
            }
            accept_result = listener.accept() => {
                self.accept(accept_result);
                Ok(false)
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                // Periodic wakeup to check idle timeout
                Ok(false)
            }
        }
    }

    /// Run one iteration of the select loop (Windows version)
    #[cfg(not(unix))]
    async fn run_select_loop(
        &mut self,
        listener: &transport::platform::Listener,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<bool> {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Shutdown requested, exiting");
                Ok(true)
            }
            accept_result = listener.accept() => {
                self.accept(accept_result);
                Ok(false)
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                // Periodic wakeup to check idle timeout
                Ok(false)
            }
        }
    }

    /// Spawn a task for an accepted connection
    ///
    /// Connections run concurrently so a subscribed watcher keeps
    /// streaming while another connection drives a test run.
    fn accept(&self, accept_result: std::io::Result<transport::platform::Stream>) {
        match accept_result {
            Ok(stream) => {
                if let Ok(mut t) = self.last_activity.lock() {
                    *t = Instant::now();
                }
                let host = self.host.clone();
                let activity = self.last_activity.clone();
                let subscribers = self.subscribers.clone();
                let shutdown_tx = self.shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        handle_client(host, activity, subscribers, shutdown_tx, stream).await
                    {
                        tracing::error!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::error!("Accept error: {}", e);
            }
        }
    }
}

/// Handle a single client connection
async fn handle_client(
    host: Arc<TestHost>,
    activity: Arc<Mutex<Instant>>,
    subscribers: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
    stream: transport::platform::Stream,
) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    // Read and process commands until client disconnects
    loop {
        let request_data = tokio::select! {
            result = transport::recv_frame(&mut reader) => {
                match result {
                    Ok(data) => data,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        tracing::debug!("Client disconnected");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Error reading request: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(300)) => {
                tracing::debug!("Client timeout");
                break;
            }
        };

        let request: Request = match serde_json::from_slice(&request_data) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Invalid request: {}", e);
                let response = Response::error(
                    0,
                    crate::common::error::IpcError {
                        code: "INVALID_REQUEST".to_string(),
                        message: e.to_string(),
                    },
                );
                transport::send_json(&mut writer, &response).await?;
                continue;
            }
        };

        tracing::debug!("Received command: {:?}", request.command);

        match request.command {
            Command::Shutdown => {
                let response = Response::ok(request.id);
                transport::send_json(&mut writer, &response).await?;
                let _ = shutdown_tx.send(());
                break;
            }
            Command::Subscribe => {
                let response = Response::ok(request.id);
                transport::send_json(&mut writer, &response).await?;
                // An open subscription holds off the idle timeout
                subscribers.fetch_add(1, Ordering::SeqCst);
                stream_notifications(&host, &mut reader, &mut writer).await;
                subscribers.fetch_sub(1, Ordering::SeqCst);
                if let Ok(mut t) = activity.lock() {
                    *t = Instant::now();
                }
                break;
            }
            command => {
                let response = handler::handle_command(&host, request.id, command).await;
                transport::send_json(&mut writer, &response).await?;
            }
        }

        if let Ok(mut t) = activity.lock() {
            *t = Instant::now();
        }
    }

    Ok(())
}

/// Whether the daemon should shut down for inactivity
///
/// A connection holding an open subscription counts as activity even when
/// no commands arrive.
fn idle_expired(idle: Duration, timeout: Duration, subscribers: usize) -> bool {
    subscribers == 0 && idle > timeout
}

/// Forward engine notifications to a subscribed connection until it closes
async fn stream_notifications<R, W>(host: &TestHost, reader: &mut R, writer: &mut W)
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut rx = host.orchestrator.engine().notifier().subscribe();
    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Ok(notification) => {
                        let push = Push { notification };
                        if transport::send_json(writer, &push).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subscriber fell behind, dropping notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            // A read on a subscribed connection only ever yields EOF
            result = transport::recv_frame(reader) => {
                if result.is_err() {
                    tracing::debug!("Subscriber disconnected");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_waits_for_open_subscriptions() {
        let timeout = Duration::from_secs(60);
        let long_idle = Duration::from_secs(120);

        assert!(idle_expired(long_idle, timeout, 0));
        assert!(!idle_expired(Duration::from_secs(1), timeout, 0));
        // A watcher with no command traffic keeps the daemon alive
        assert!(!idle_expired(long_idle, timeout, 1));
    }
}
