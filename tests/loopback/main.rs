//! End-to-end tests: a client and a server from this crate talk to each other over an in-memory
//! duplex pipe.
use anyhow::{Result, Context as _, ensure};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

mod auth_test;
mod kex_test;
mod session_test;
mod tunnel_test;

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "alicealice";

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn ed25519_privkey(seed: u8) -> kusari::Privkey {
    kusari::Privkey::Ed25519(kusari::ed25519_dalek::SigningKey::from_bytes(&[seed; 32]).into())
}

pub fn host_privkey() -> kusari::Privkey {
    ed25519_privkey(0x42)
}

pub fn alice_privkey() -> kusari::Privkey {
    ed25519_privkey(0x17)
}

pub fn server_config() -> kusari::ServerConfig {
    kusari::ServerConfig::default().with(|c| {
        c.host_keys = vec![host_privkey()];
        c.auth_failure_delay = Duration::ZERO;
    })
}

/// Both ends of a connection, with the I/O futures running in their own tasks.
pub struct Pair {
    pub client: kusari::Client,
    pub client_events: mpsc::UnboundedReceiver<kusari::ClientEvent>,
    pub client_task: JoinHandle<kusari::Result<()>>,
    pub server: kusari::Server,
    pub server_events: mpsc::UnboundedReceiver<kusari::ServerEvent>,
    pub server_task: JoinHandle<kusari::Result<()>>,
}

impl Drop for Pair {
    fn drop(&mut self) {
        self.client_task.abort();
        self.server_task.abort();
    }
}

/// Connects a client to a server. The client accepts only [`host_privkey()`] and the server lets
/// alice in with [`PASSWORD`] or [`alice_privkey()`]. Other events are forwarded to `Pair`.
pub fn connect(client_config: kusari::ClientConfig, server_config: kusari::ServerConfig) -> Result<Pair> {
    init_log();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let (client, client_rx, client_fut) = kusari::Client::open(client_io, client_config)?;
    let (server, server_rx, server_fut) = kusari::Server::accept(server_io, server_config)?;

    let client_task = tokio::spawn(client_fut);
    let server_task = tokio::spawn(server_fut);
    let client_events = verify_host_key(client_rx);
    let server_events = decide_auth(server_rx);
    Ok(Pair { client, client_events, client_task, server, server_events, server_task })
}

fn verify_host_key(mut client_rx: kusari::ClientReceiver) -> mpsc::UnboundedReceiver<kusari::ClientEvent> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = client_rx.recv().await {
            match event {
                kusari::ClientEvent::ServerPubkey(pubkey, accept_tx) => {
                    log::debug!("server pubkey {}", pubkey.fingerprint());
                    if pubkey == host_privkey().pubkey() {
                        accept_tx.accept();
                    } else {
                        accept_tx.reject(std::io::Error::new(std::io::ErrorKind::Other, "unknown host key"));
                    }
                },
                event => { let _ = event_tx.send(event); },
            }
        }
    });
    event_rx
}

fn decide_auth(mut server_rx: kusari::ServerReceiver) -> mpsc::UnboundedReceiver<kusari::ServerEvent> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = server_rx.recv().await {
            match event {
                kusari::ServerEvent::AuthRequest(request) => {
                    let valid = request.username == USERNAME && match &request.method {
                        kusari::AuthMethodRequest::Password(password) => password == PASSWORD,
                        kusari::AuthMethodRequest::PubkeyProbe { pubkey, .. } |
                        kusari::AuthMethodRequest::Pubkey { pubkey, .. } =>
                            *pubkey == alice_privkey().pubkey(),
                        _ => false,
                    };
                    if valid { request.accept() } else { request.reject() }
                },
                event => { let _ = event_tx.send(event); },
            }
        }
    });
    event_rx
}

pub async fn authenticate_alice(client: &kusari::Client) -> Result<()> {
    let result = client.auth_password(USERNAME.into(), PASSWORD.into()).await?;
    ensure!(matches!(result, kusari::AuthPasswordResult::Success), "password was rejected: {:?}", result);
    Ok(())
}

/// Connects and authenticates with the default configuration.
pub async fn connect_alice() -> Result<Pair> {
    let pair = connect(kusari::ClientConfig::default(), server_config())?;
    authenticate_alice(&pair.client).await?;
    Ok(pair)
}

pub async fn next_server_event(pair: &mut Pair) -> Result<kusari::ServerEvent> {
    tokio::time::timeout(Duration::from_secs(10), pair.server_events.recv()).await
        .context("timed out waiting for a server event")?
        .context("server closed the event stream")
}

pub async fn next_client_event(pair: &mut Pair) -> Result<kusari::ClientEvent> {
    tokio::time::timeout(Duration::from_secs(10), pair.client_events.recv()).await
        .context("timed out waiting for a client event")?
        .context("client closed the event stream")
}

pub async fn next_server_channel(pair: &mut Pair) -> Result<kusari::AcceptChannel> {
    match next_server_event(pair).await? {
        kusari::ServerEvent::Channel(accept) => Ok(accept),
        event => anyhow::bail!("expected a channel, got {:?}", event),
    }
}
