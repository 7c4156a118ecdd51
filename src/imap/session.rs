use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_imap::imap_proto::types::{Address as ProtoAddress, Envelope as ProtoEnvelope};
use async_imap::types::Fetch;
use async_imap::{Client as AsyncImapClient, Session as AsyncImapSession};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::TryStreamExt;
use log::{debug, info, warn};
use rustls_pki_types::ServerName as PkiServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream as TokioTcpStream;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream as TokioTlsStreamClient, TlsConnector};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::imap::criteria::SearchCriteria;
use crate::imap::error::ImapError;
use crate::imap::types::{
    add_flags_query, fetch_query, sequence_set, Address, Envelope, FetchItem, RawMessage,
};

// --- Type Aliases ---

type BaseTlsStream = TokioTlsStreamClient<TokioTcpStream>;

// Compatibility wrapper for async_imap
type CompatStream = Compat<BaseTlsStream>;

pub type TlsImapSession = AsyncImapSession<CompatStream>;

/// Creates a connected, logged-in transport.
pub type ImapSessionFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Box<dyn ImapTransport>, ImapError>> + Send + Sync>;

/// Operations the mail client needs from a live IMAP connection.
///
/// Every call is one blocking round trip; implementations are not expected to
/// handle concurrent use.
#[async_trait]
pub trait ImapTransport: Send + Debug {
    /// SELECT (read-write) or EXAMINE (read-only) a mailbox.
    async fn select_mailbox(&mut self, name: &str, read_only: bool) -> Result<(), ImapError>;

    /// Sequence numbers matching the criteria, ascending.
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>, ImapError>;

    /// Fetches the given items for each id. The response is fully drained.
    async fn fetch(&mut self, ids: &[u32], items: &[FetchItem]) -> Result<Vec<RawMessage>, ImapError>;

    /// Adds `flags` to every id without asking for the updated flags back.
    async fn store(&mut self, ids: &[u32], flags: &[String]) -> Result<(), ImapError>;

    /// Permanently removes messages flagged `\Deleted`.
    async fn expunge(&mut self) -> Result<(), ImapError>;

    async fn logout(&mut self) -> Result<(), ImapError>;
}

/// [`ImapTransport`] over an `async_imap` session.
#[derive(Debug)]
pub struct AsyncImapSessionWrapper {
    session: TlsImapSession,
}

impl AsyncImapSessionWrapper {
    pub fn new(session: TlsImapSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ImapTransport for AsyncImapSessionWrapper {
    async fn select_mailbox(&mut self, name: &str, read_only: bool) -> Result<(), ImapError> {
        let result = if read_only {
            self.session.examine(name).await
        } else {
            self.session.select(name).await
        };
        let mailbox = result.map_err(|e| ImapError::Mailbox(format!("{}: {}", name, e)))?;
        debug!("Selected '{}' (read_only={}), {} messages", name, read_only, mailbox.exists);
        Ok(())
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>, ImapError> {
        let query = criteria.to_imap_query()?;
        debug!("SEARCH {}", query);
        let found = self
            .session
            .search(&query)
            .await
            .map_err(|e| ImapError::Search(e.to_string()))?;
        let mut ids: Vec<u32> = found.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn fetch(&mut self, ids: &[u32], items: &[FetchItem]) -> Result<Vec<RawMessage>, ImapError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sequence = sequence_set(ids);
        let query = fetch_query(items);
        let fetch_stream = self
            .session
            .fetch(&sequence, &query)
            .await
            .map_err(|e| ImapError::Fetch(e.to_string()))?;
        let fetches: Vec<Fetch> = fetch_stream
            .try_collect()
            .await
            .map_err(|e| ImapError::Fetch(e.to_string()))?;
        Ok(fetches.iter().map(raw_message_from_fetch).collect())
    }

    async fn store(&mut self, ids: &[u32], flags: &[String]) -> Result<(), ImapError> {
        if ids.is_empty() {
            return Ok(());
        }
        let query = add_flags_query(flags);
        let updates: Vec<Fetch> = self
            .session
            .store(sequence_set(ids), &query)
            .await
            .map_err(|e| ImapError::Store(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| ImapError::Store(e.to_string()))?;
        debug!("STORE {} on {} ids, {} updates", query, ids.len(), updates.len());
        Ok(())
    }

    async fn expunge(&mut self) -> Result<(), ImapError> {
        let removed: Vec<u32> = self
            .session
            .expunge()
            .await
            .map_err(|e| ImapError::Expunge(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| ImapError::Expunge(e.to_string()))?;
        debug!("EXPUNGE removed {} messages", removed.len());
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), ImapError> {
        self.session.logout().await.map_err(ImapError::from)
    }
}

fn lossy(bytes: &Option<Cow<'_, [u8]>>) -> Option<String> {
    bytes
        .as_ref()
        .map(|b| String::from_utf8_lossy(b).into_owned())
}

fn convert_addresses(addrs: &Option<Vec<ProtoAddress<'_>>>) -> Vec<Address> {
    addrs
        .as_ref()
        .map(|list| {
            list.iter()
                .map(|addr| Address {
                    name: lossy(&addr.name),
                    mailbox: lossy(&addr.mailbox),
                    host: lossy(&addr.host),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn convert_envelope(env: &ProtoEnvelope<'_>) -> Envelope {
    Envelope {
        date: lossy(&env.date),
        subject: lossy(&env.subject),
        from: convert_addresses(&env.from),
        to: convert_addresses(&env.to),
        cc: convert_addresses(&env.cc),
        bcc: convert_addresses(&env.bcc),
    }
}

fn raw_message_from_fetch(fetch: &Fetch) -> RawMessage {
    RawMessage {
        seq: fetch.message,
        envelope: fetch.envelope().map(convert_envelope),
        internal_date: fetch.internal_date(),
        header: fetch.header().map(<[u8]>::to_vec),
        text: fetch.text().map(<[u8]>::to_vec),
    }
}

// --- Connection setup ---

/// Establishes TCP connection and performs the TLS handshake.
async fn setup_tls_stream(
    host: &str,
    port: u16,
    tls_connector: TlsConnector,
    server_name_for_tls: PkiServerName<'static>,
) -> Result<BaseTlsStream, ImapError> {
    debug!("Attempting TCP connection to {}:{}...", host, port);
    let tcp_stream = TokioTcpStream::connect((host, port)).await?;
    debug!("TCP connected. Performing TLS handshake...");

    let tls_stream = tls_connector
        .connect(server_name_for_tls, tcp_stream)
        .await
        .map_err(|e| ImapError::Tls(e.to_string()))?;
    debug!("TLS handshake successful.");
    Ok(tls_stream)
}

fn tls_connector() -> Result<TlsConnector, ImapError> {
    let mut root_cert_store = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()
        .map_err(|e| ImapError::Tls(format!("failed to load native certs: {}", e)))?;
    let (added, ignored) = root_cert_store.add_parsable_certificates(certs);
    debug!("Loaded {} native certs, ignored {}.", added, ignored);
    if root_cert_store.is_empty() {
        warn!("Root certificate store is empty after loading native certs.");
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Connects over TLS and logs in, returning a ready transport.
pub async fn connect_and_login(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    login_timeout: Duration,
) -> Result<AsyncImapSessionWrapper, ImapError> {
    info!("Connecting to {}:{}", host, port);

    let server_name = PkiServerName::try_from(host.to_string())
        .map_err(|_| ImapError::Connection(format!("Invalid server name format: {}", host)))?;
    let tls_stream = setup_tls_stream(host, port, tls_connector()?, server_name).await?;

    let client = AsyncImapClient::new(tls_stream.compat());
    debug!("IMAP client created. Attempting login for user '{}'...", username);
    match timeout(login_timeout, client.login(username, password)).await {
        Ok(Ok(session)) => {
            info!("IMAP login successful for user: {}", username);
            Ok(AsyncImapSessionWrapper::new(session))
        }
        Ok(Err((e, _client))) => {
            warn!("IMAP login failed for user {}: {}", username, e);
            Err(ImapError::Auth(e.to_string()))
        }
        Err(_) => Err(ImapError::Connection(format!(
            "Login timed out after {:?}",
            login_timeout
        ))),
    }
}

/// Factory producing TLS sessions for the given account.
pub fn create_imap_factory(
    host: String,
    port: u16,
    username: String,
    password: String,
    login_timeout: Duration,
) -> ImapSessionFactory {
    let host = Arc::new(host);
    let username = Arc::new(username);
    let password = Arc::new(password);

    Arc::new(
        move || -> BoxFuture<'static, Result<Box<dyn ImapTransport>, ImapError>> {
            let host = Arc::clone(&host);
            let username = Arc::clone(&username);
            let password = Arc::clone(&password);
            Box::pin(async move {
                let session =
                    connect_and_login(&host, port, &username, &password, login_timeout).await?;
                Ok(Box::new(session) as Box<dyn ImapTransport>)
            })
        },
    )
}
