//! SSH server implementation using russh.
//!
//! Handles:
//! - Optional shared-secret password authentication (open access when unset)
//! - Session channels: pty, window-change, shell (launches the contact form)
//! - Refusal of exec requests (this is a contact tool, not a shell)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::keys::PublicKey;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodKind, MethodSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ContactConfig;
use crate::contact::ContactClient;
use crate::form::{Action, FormEngine, TermSize};

/// Give the client a moment to finish pty/shell negotiation before the
/// first screenful, matching how the original service settled the stream.
const UI_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// How long a setup diagnostic stays on screen before the channel closes.
const SETUP_ERROR_LINGER: Duration = Duration::from_secs(5);

/// Shared state for the SSH server.
pub struct ServerState {
    pub config: Arc<ContactConfig>,
    pub contact: Arc<ContactClient>,
}

/// Per-connection handler state.
pub struct ConnectionHandler {
    /// Shared server state.
    server: Arc<ServerState>,

    /// Client's socket address.
    peer_addr: SocketAddr,

    /// PTY info per SSH channel (set by pty_request).
    ptys: HashMap<ChannelId, PtyInfo>,

    /// Input feed of the running form session per channel.
    sessions: HashMap<ChannelId, mpsc::Sender<SessionInput>>,
}

#[derive(Debug, Clone)]
struct PtyInfo {
    term: String,
    cols: u32,
    rows: u32,
}

/// Events fed from the connection handler into a form session task.
enum SessionInput {
    /// Raw bytes from the client, in arrival order.
    Data(Vec<u8>),
    /// The client's terminal was resized.
    Resize(TermSize),
}

impl ConnectionHandler {
    fn new(server: Arc<ServerState>, peer_addr: SocketAddr) -> Self {
        Self {
            server,
            peer_addr,
            ptys: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    fn open_access(&self) -> bool {
        self.server.config.password.is_none()
    }

    /// Reject with a hint that password is the only acceptable method.
    fn reject_with_password_hint() -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::from(&[MethodKind::Password][..])),
            partial_success: false,
        }
    }
}

impl Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!("Session channel opened: {:?}", channel.id());
        Ok(true)
    }

    /// With no password configured the gateway is open access.
    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        if self.open_access() {
            info!("Open-access login for '{}' from {}", user, self.peer_addr);
            return Ok(Auth::Accept);
        }
        debug!("auth none from {} (password required)", self.peer_addr);
        Ok(Self::reject_with_password_hint())
    }

    /// Compare against the configured shared secret.
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        match self.server.config.password.as_deref() {
            None => {
                info!("Open-access login for '{}' from {}", user, self.peer_addr);
                Ok(Auth::Accept)
            }
            Some(secret) if password == secret => {
                info!("Password auth success for '{}' from {}", user, self.peer_addr);
                Ok(Auth::Accept)
            }
            Some(_) => {
                warn!("Password auth failure for '{}' from {}", user, self.peer_addr);
                // Let the client retry, per its own retry policy.
                Ok(Self::reject_with_password_hint())
            }
        }
    }

    /// Public keys mean nothing here; the hint steers clients to password.
    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.open_access() {
            return Ok(Auth::Accept);
        }
        debug!("Public key offered by '{}' from {}, rejecting", user, self.peer_addr);
        Ok(Self::reject_with_password_hint())
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.open_access() {
            info!("Open-access login for '{}' from {}", user, self.peer_addr);
            return Ok(Auth::Accept);
        }
        Ok(Self::reject_with_password_hint())
    }

    /// Record terminal dimensions before any UI runs.
    async fn pty_request(
        &mut self,
        channel_id: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(
            "PTY request: channel={:?}, term={}, cols={}, rows={}",
            channel_id, term, col_width, row_height
        );
        let term = if term.is_empty() { "xterm-256color" } else { term };
        self.ptys.insert(
            channel_id,
            PtyInfo {
                term: term.to_string(),
                cols: col_width,
                rows: row_height,
            },
        );
        session.channel_success(channel_id)?;
        Ok(())
    }

    /// Handle shell request: launch the contact form for this channel.
    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        info!("Shell request on channel {:?} from {}", channel_id, self.peer_addr);

        // One form session per channel. A second shell request would leave
        // two tasks racing over the same input feed, so refuse it.
        if self.sessions.contains_key(&channel_id) {
            warn!(
                "Refusing duplicate shell request on channel {:?} from {}",
                channel_id, self.peer_addr
            );
            session.channel_failure(channel_id)?;
            return Ok(());
        }

        // Dimensions must be in place before the engine draws anything.
        let size = match self.ptys.get(&channel_id) {
            Some(pty) => {
                debug!(
                    "Using negotiated pty: term={}, {}x{}",
                    pty.term, pty.cols, pty.rows
                );
                TermSize {
                    cols: pty.cols,
                    rows: pty.rows,
                }
            }
            None => {
                debug!("No pty requested, assuming default terminal size");
                TermSize::default()
            }
        };

        let (input_tx, input_rx) = mpsc::channel::<SessionInput>(32);
        self.sessions.insert(channel_id, input_tx);

        let handle = session.handle();
        let contact = self.server.contact.clone();
        tokio::spawn(run_form_session(handle, channel_id, input_rx, contact, size));

        session.channel_success(channel_id)?;
        Ok(())
    }

    /// Exec is always refused: the gateway exposes the guided form only.
    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data);
        info!(
            "Refusing exec request on channel {:?} from {}: {}",
            channel_id, self.peer_addr, command
        );
        session.channel_failure(channel_id)?;
        Ok(())
    }

    /// Handle window change request.
    async fn window_change_request(
        &mut self,
        channel_id: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(
            "Window change: channel={:?}, cols={}, rows={}",
            channel_id, col_width, row_height
        );

        if let Some(pty) = self.ptys.get_mut(&channel_id) {
            pty.cols = col_width;
            pty.rows = row_height;
        }

        if let Some(tx) = self.sessions.get(&channel_id) {
            let _ = tx
                .send(SessionInput::Resize(TermSize {
                    cols: col_width,
                    rows: row_height,
                }))
                .await;
        }

        Ok(())
    }

    /// Forward raw bytes from the client into the channel's form session.
    async fn data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(tx) = self.sessions.get(&channel_id) {
            let _ = tx.send(SessionInput::Data(data.to_vec())).await;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("Channel closed: {:?}", channel_id);
        // Dropping the sender ends the form session's input loop.
        self.sessions.remove(&channel_id);
        self.ptys.remove(&channel_id);
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("Channel EOF: {:?}", channel_id);
        self.sessions.remove(&channel_id);
        Ok(())
    }
}

/// Drive one form session over one channel: pump input events into the
/// engine and execute the actions it emits. Runs until the form finishes
/// or the input feed closes.
async fn run_form_session(
    handle: russh::server::Handle,
    channel_id: ChannelId,
    mut input: mpsc::Receiver<SessionInput>,
    contact: Arc<ContactClient>,
    size: TermSize,
) {
    tokio::time::sleep(UI_SETTLE_DELAY).await;
    debug!(
        "Form session starting on channel {:?} at {}x{}",
        channel_id, size.cols, size.rows
    );

    let mut engine = FormEngine::new(size);
    let header = engine.start();

    match run_actions(&handle, channel_id, &contact, &mut engine, header).await {
        Ok(true) => return,
        Ok(false) => {}
        Err(()) => {
            // The header never made it out. Try to leave a diagnostic on
            // screen before giving up on the channel.
            warn!("Failed to initialize form on channel {:?}", channel_id);
            let notice = b"\r\nError initializing form. Please try again.\r\n";
            if handle
                .data(channel_id, CryptoVec::from_slice(notice))
                .await
                .is_ok()
            {
                tokio::time::sleep(SETUP_ERROR_LINGER).await;
            }
            close_channel(&handle, channel_id).await;
            return;
        }
    }

    while let Some(event) = input.recv().await {
        match event {
            SessionInput::Data(bytes) => {
                for byte in bytes {
                    let actions = engine.handle_byte(byte);
                    match run_actions(&handle, channel_id, &contact, &mut engine, actions).await {
                        Ok(false) => {}
                        Ok(true) => return,
                        Err(()) => {
                            debug!("Write failed on channel {:?}, dropping session", channel_id);
                            return;
                        }
                    }
                }
            }
            SessionInput::Resize(size) => engine.resize(size),
        }
    }
}

/// Execute a batch of engine actions. Returns `Ok(true)` once the channel
/// has been closed, `Err(())` on a write failure.
async fn run_actions(
    handle: &russh::server::Handle,
    channel_id: ChannelId,
    contact: &ContactClient,
    engine: &mut FormEngine,
    actions: Vec<Action>,
) -> Result<bool, ()> {
    // Submit is always the last action in a batch, so its follow-up
    // actions can simply be appended.
    let mut queue = actions;
    let mut i = 0;
    while i < queue.len() {
        match queue[i].clone() {
            Action::Write(bytes) => {
                if handle
                    .data(channel_id, CryptoVec::from_slice(&bytes))
                    .await
                    .is_err()
                {
                    return Err(());
                }
            }
            Action::Submit(form) => {
                // Single-outstanding by construction: no further input is
                // pumped while this await is in flight.
                let success = contact.submit(&form).await;
                queue.extend(engine.submission_result(success));
            }
            Action::CloseAfter(delay) => {
                tokio::time::sleep(delay).await;
                close_channel(handle, channel_id).await;
                return Ok(true);
            }
            Action::Close => {
                close_channel(handle, channel_id).await;
                return Ok(true);
            }
        }
        i += 1;
    }
    Ok(false)
}

async fn close_channel(handle: &russh::server::Handle, channel_id: ChannelId) {
    let _ = handle.eof(channel_id).await;
    let _ = handle.close(channel_id).await;
}

/// Run the SSH server.
pub async fn run_server(config: Arc<ContactConfig>, contact: Arc<ContactClient>) -> Result<()> {
    // Load or generate host key
    let key = load_or_generate_host_key(&config.host_key_path).await?;

    let russh_config = Arc::new(russh::server::Config {
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        keys: vec![key],
        ..Default::default()
    });

    let server_state = Arc::new(ServerState {
        config: config.clone(),
        contact,
    });

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.listen_addr))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("SSH server listening on {}", listener.local_addr()?);

    serve(listener, russh_config, server_state).await
}

/// Accept loop. A failed accept or a misbehaving client must never take
/// the listener down with it.
async fn serve(
    listener: tokio::net::TcpListener,
    russh_config: Arc<russh::server::Config>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Accept error: {}", e);
                continue;
            }
        };
        debug!("Connection from {}", peer_addr);
        let server_state_clone = server_state.clone();
        let russh_config_clone = russh_config.clone();

        tokio::spawn(async move {
            let handler = ConnectionHandler::new(server_state_clone, peer_addr);
            match russh::server::run_stream(russh_config_clone, stream, handler).await {
                Ok(session) => {
                    if let Err(e) = session.await {
                        warn!("SSH session error from {}: {}", peer_addr, e);
                    }
                }
                Err(e) => {
                    warn!("SSH connection error from {}: {}", peer_addr, e);
                }
            }
        });
    }
}

/// Load host key from file or generate a new one.
async fn load_or_generate_host_key(path: &std::path::Path) -> Result<russh::keys::PrivateKey> {
    use russh::keys::ssh_key::rand_core::OsRng;
    use russh::keys::ssh_key::{Algorithm, LineEnding};

    if path.exists() {
        info!("Loading host key from {}", path.display());
        let key = russh::keys::load_secret_key(path, None)
            .with_context(|| format!("Failed to load host key from {}", path.display()))?;
        Ok(key)
    } else {
        warn!("No host key found at {}, generating one", path.display());
        warn!("Generated host keys are for development only; clients lose trust continuity on every restart");
        warn!(
            "For production, provision a stable key: ssh-keygen -t ed25519 -f {} -N \"\"",
            path.display()
        );

        let key = russh::keys::PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .context("Failed to generate host key")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write key to file using OpenSSH format
        let key_bytes = key
            .to_openssh(LineEnding::LF)
            .context("Failed to encode host key")?;
        tokio::fs::write(path, key_bytes.as_bytes()).await?;

        // Set restrictive permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        info!("Saved host key to {}", path.display());
        Ok(key)
    }
}
