//! SSH tunnel with local port forwarding
//!
//! Opens an authenticated SSH session, binds an OS-assigned port on the
//! loopback interface, and forwards every accepted TCP connection through a
//! `direct-tcpip` channel to the remote host and port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::config::TunnelEndpoint;
use super::handler::TunnelHandler;
use crate::config::CONNECTION_TIMEOUT_SECS;
use crate::error::{MysqlTunnelError, Result};
use crate::transport::{Tunnel, Tunneler};

/// Loopback address the forward binds to
const LOCAL_BIND_HOST: &str = "127.0.0.1";

/// Interval between SSH keepalive probes
const KEEPALIVE_INTERVAL_SECS: u64 = 15;

/// Keepalives that may go unanswered before the session is dropped
const KEEPALIVE_MAX: usize = 3;

/// How long `stop()` waits for the accept loop to exit
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens [`SshTunnel`]s using russh
#[derive(Debug, Clone)]
pub struct SshTunneler {
    connect_timeout: Duration,
}

impl SshTunneler {
    /// Create a tunneler with the default 30 second connection timeout
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }

    /// Override the SSH connection timeout
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Connect and authenticate an SSH session
    async fn establish_session(&self, endpoint: &TunnelEndpoint) -> Result<Handle<TunnelHandler>> {
        info!(
            "Connecting to SSH server {}:{}...",
            endpoint.host, endpoint.port
        );

        let ssh_config = Arc::new(client::Config {
            keepalive_interval: Some(Duration::from_secs(KEEPALIVE_INTERVAL_SECS)),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        });

        let addr = (endpoint.host.as_str(), endpoint.port);
        let connect_result = timeout(
            self.connect_timeout,
            client::connect(ssh_config, addr, TunnelHandler::new(&endpoint.host)),
        )
        .await;

        let mut session = match connect_result {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!("SSH connection failed: {}", e);
                return Err(MysqlTunnelError::connection(e.to_string()));
            }
            Err(_) => {
                error!(
                    "SSH connection timeout after {}s",
                    self.connect_timeout.as_secs()
                );
                return Err(MysqlTunnelError::connection(format!(
                    "Connection timeout after {}s",
                    self.connect_timeout.as_secs()
                )));
            }
        };

        if let Err(e) = authenticate(&mut session, endpoint).await {
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
            return Err(e);
        }

        info!(
            "Successfully connected to {}@{}:{}",
            endpoint.username, endpoint.host, endpoint.port
        );
        Ok(session)
    }
}

impl Default for SshTunneler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tunneler for SshTunneler {
    type Tunnel = SshTunnel;

    async fn open(
        &self,
        endpoint: &TunnelEndpoint,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<SshTunnel> {
        let session = Arc::new(self.establish_session(endpoint).await?);

        match SshTunnel::start(session.clone(), remote_host, remote_port).await {
            Ok(tunnel) => Ok(tunnel),
            Err(e) => {
                let _ = session
                    .disconnect(russh::Disconnect::ByApplication, "", "")
                    .await;
                Err(e)
            }
        }
    }
}

/// Authenticate with the SSH server.
///
/// Password authentication is tried first when a password is configured;
/// the private key is used when there is no password or the server rejects it.
async fn authenticate(session: &mut Handle<TunnelHandler>, endpoint: &TunnelEndpoint) -> Result<()> {
    let password = endpoint.password.as_deref().filter(|p| !p.is_empty());

    if let Some(password) = password {
        debug!(
            "Attempting password authentication for user '{}'",
            endpoint.username
        );
        let auth_result = session
            .authenticate_password(&endpoint.username, password)
            .await
            .map_err(|e| MysqlTunnelError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Password authentication successful");
            return Ok(());
        }
        if endpoint.private_key_path.is_none() {
            return Err(MysqlTunnelError::auth("Password authentication rejected"));
        }
        warn!("Password authentication rejected, falling back to private key");
    }

    if let Some(ref key_path) = endpoint.private_key_path {
        debug!(
            "Attempting key authentication for user '{}' with {}",
            endpoint.username,
            key_path.display()
        );

        let key = russh::keys::load_secret_key(key_path, endpoint.private_key_passphrase.as_deref())
            .map_err(|e| {
                MysqlTunnelError::SshKey(format!(
                    "Failed to load private key {}: {}",
                    key_path.display(),
                    e
                ))
            })?;

        // RSA keys need the strongest hash the server advertises
        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .map_err(|e| MysqlTunnelError::auth(e.to_string()))?
            .flatten();
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

        let auth_result = session
            .authenticate_publickey(&endpoint.username, key_with_alg)
            .await
            .map_err(|e| MysqlTunnelError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Key authentication successful");
            return Ok(());
        }
        return Err(MysqlTunnelError::auth("Key authentication rejected"));
    }

    Err(MysqlTunnelError::auth(
        "No authentication method available (require password or private_key_path)",
    ))
}

/// A running local port forward over an SSH session
pub struct SshTunnel {
    /// Bound loopback address (port assigned by the OS)
    local_addr: SocketAddr,

    /// Destination as seen from the SSH server
    remote: String,

    /// SSH session carrying the forwarded channels
    session: Arc<Handle<TunnelHandler>>,

    /// Cleared when the accept loop exits
    running: Arc<AtomicBool>,

    /// Signals the accept loop to stop
    stop_tx: mpsc::Sender<()>,

    /// Accept loop task, taken on stop
    accept_task: Option<JoinHandle<()>>,
}

impl SshTunnel {
    /// Bind an ephemeral loopback port and start forwarding to `remote_host:remote_port`
    async fn start(
        session: Arc<Handle<TunnelHandler>>,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Self> {
        let listener = TcpListener::bind((LOCAL_BIND_HOST, 0)).await.map_err(|e| {
            MysqlTunnelError::connection(format!(
                "Failed to bind local forward on {}: {}",
                LOCAL_BIND_HOST, e
            ))
        })?;

        let local_addr = listener.local_addr().map_err(|e| {
            MysqlTunnelError::connection(format!("Failed to get bound address: {}", e))
        })?;

        info!(
            "Started local port forward: {} -> {}:{}",
            local_addr, remote_host, remote_port
        );

        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            session.clone(),
            remote_host.to_string(),
            remote_port,
            running.clone(),
            stop_rx,
        ));

        Ok(Self {
            local_addr,
            remote: format!("{}:{}", remote_host, remote_port),
            session,
            running,
            stop_tx,
            accept_task: Some(accept_task),
        })
    }
}

#[async_trait]
impl Tunnel for SshTunnel {
    fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.session.is_closed()
    }

    async fn stop(&mut self) {
        let Some(accept_task) = self.accept_task.take() else {
            return;
        };

        info!("Stopping local port forward on {}", self.local_addr);
        let _ = self.stop_tx.send(()).await;

        let mut accept_task = accept_task;
        if timeout(STOP_TIMEOUT, &mut accept_task).await.is_err() {
            warn!(
                "Forward on {} did not stop within {}s, aborting",
                self.local_addr,
                STOP_TIMEOUT.as_secs()
            );
            accept_task.abort();
        }
        self.running.store(false, Ordering::SeqCst);

        if let Err(e) = self
            .session
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            debug!("SSH disconnect reported: {}", e);
        }

        info!("SSH tunnel to {} closed", self.remote);
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SshTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTunnel")
            .field("local_addr", &self.local_addr)
            .field("remote", &self.remote)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

/// Accept local connections until stopped or the SSH session closes
async fn accept_loop(
    listener: TcpListener,
    session: Arc<Handle<TunnelHandler>>,
    remote_host: String,
    remote_port: u16,
    running: Arc<AtomicBool>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                debug!("Local port forward stopped by request");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        if session.is_closed() {
                            warn!("SSH session closed, refusing forwarded connection from {}", peer_addr);
                            break;
                        }

                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY: {}", e);
                        }

                        debug!("Accepted connection from {} for forward", peer_addr);

                        let session = session.clone();
                        let remote_host = remote_host.clone();
                        tokio::spawn(async move {
                            if let Err(e) = forward_connection(
                                &session,
                                stream,
                                peer_addr,
                                &remote_host,
                                remote_port,
                            )
                            .await
                            {
                                warn!("Forward connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    debug!("Local port forward task exited");
}

/// Bridge one local connection to a `direct-tcpip` channel
async fn forward_connection(
    session: &Handle<TunnelHandler>,
    mut local_stream: TcpStream,
    peer_addr: SocketAddr,
    remote_host: &str,
    remote_port: u16,
) -> Result<()> {
    let channel = session
        .channel_open_direct_tcpip(
            remote_host,
            remote_port as u32,
            peer_addr.ip().to_string(),
            peer_addr.port() as u32,
        )
        .await
        .map_err(|e| {
            MysqlTunnelError::connection(format!(
                "Failed to open channel to {}:{}: {}",
                remote_host, remote_port, e
            ))
        })?;

    let mut channel_stream = channel.into_stream();
    let (sent, received) = tokio::io::copy_bidirectional(&mut local_stream, &mut channel_stream)
        .await
        .map_err(|e| MysqlTunnelError::connection(format!("Tunnel forwarding error: {}", e)))?;

    debug!(
        "Forwarded connection from {} closed: {} bytes sent, {} bytes received",
        peer_addr, sent, received
    );
    Ok(())
}
