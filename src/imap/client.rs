use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::imap::criteria::{HeaderFilter, SearchCriteria};
use crate::imap::decoder::decode_message;
use crate::imap::error::ImapError;
use crate::imap::purge::{self, PurgeError, PurgePhase};
use crate::imap::session::{create_imap_factory, ImapSessionFactory, ImapTransport};
use crate::imap::types::MESSAGE_FETCH_ITEMS;
use crate::imap::watcher::{self, take_single, WatchHandle};
use crate::models::email::EmailRecord;

/// The single connection shared by every operation of one client.
pub type SharedTransport = Arc<Mutex<Option<Box<dyn ImapTransport>>>>;

/// Stateful IMAP client bound to one account and one mailbox.
///
/// All operations go through one connection guarded by an async mutex, so a
/// watch in progress and a purge serialize on the transport rather than
/// interleaving commands.
pub struct ImapClient {
    settings: Settings,
    factory: ImapSessionFactory,
    transport: SharedTransport,
}

impl fmt::Debug for ImapClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapClient")
            .field("host", &self.settings.imap_host)
            .field("port", &self.settings.imap_port)
            .field("user", &self.settings.imap_user)
            .field("mailbox", &self.settings.mailbox)
            .finish_non_exhaustive()
    }
}

impl ImapClient {
    /// Client that connects over TLS using the account in `settings`.
    pub fn new(settings: Settings) -> Self {
        let factory = create_imap_factory(
            settings.imap_host.clone(),
            settings.imap_port,
            settings.imap_user.clone(),
            settings.imap_pass.clone(),
            settings.login_timeout(),
        );
        Self::with_factory(settings, factory)
    }

    /// Client whose `login` obtains its transport from `factory`.
    pub fn with_factory(settings: Settings, factory: ImapSessionFactory) -> Self {
        Self {
            settings,
            factory,
            transport: Arc::new(Mutex::new(None)),
        }
    }

    /// Client that is already logged in on `session`. Useful for testing or when
    /// the connection is managed externally.
    pub fn new_with_session(settings: Settings, session: Box<dyn ImapTransport>) -> Self {
        let factory: ImapSessionFactory =
            Arc::new(|| -> BoxFuture<'static, Result<Box<dyn ImapTransport>, ImapError>> {
                Box::pin(async {
                    Err(ImapError::Connection(
                        "no session factory configured".to_string(),
                    ))
                })
            });
        Self {
            settings,
            factory,
            transport: Arc::new(Mutex::new(Some(session))),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Connects and authenticates. A no-op when already logged in.
    pub async fn login(&self) -> Result<(), ImapError> {
        let mut guard = self.transport.lock().await;
        if guard.is_some() {
            debug!("login() called on a connected client, keeping existing session");
            return Ok(());
        }
        let session = (self.factory)().await?;
        *guard = Some(session);
        info!(
            "Logged in as {} on {}:{}",
            self.settings.imap_user, self.settings.imap_host, self.settings.imap_port
        );
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// Most recent message in the mailbox matching `headers`, if any.
    ///
    /// Unlike the watcher this does not care when the message arrived.
    pub async fn read(&self, headers: &Value) -> Result<Option<EmailRecord>, ImapError> {
        let criteria = SearchCriteria::with_header(HeaderFilter::from_json(headers));
        let query = criteria.to_imap_query()?;

        let mut guard = self.transport.lock().await;
        let conn = guard.as_mut().ok_or(ImapError::NotConnected)?;

        conn.select_mailbox(&self.settings.mailbox, true).await?;
        let ids = conn.search(&criteria).await?;
        let Some(latest) = ids.iter().copied().max() else {
            debug!("No messages match {}", query);
            return Ok(None);
        };

        let messages = conn.fetch(&[latest], MESSAGE_FETCH_ITEMS).await?;
        Ok(take_single(messages, latest).map(|msg| decode_message(&msg)))
    }

    /// Logs in, reads the most recent match and logs out again.
    ///
    /// The session is closed whatever the read returns. A read error wins over
    /// a logout error.
    pub async fn read_and_logout(self, headers: &Value) -> Result<Option<EmailRecord>, ImapError> {
        self.login().await?;
        let read = self.read(headers).await;
        let logout = self.logout().await;
        match (read, logout) {
            (Err(e), Err(logout_err)) => {
                warn!("Logout after failed read also failed: {}", logout_err);
                Err(e)
            }
            (read, logout) => {
                let record = read?;
                logout?;
                Ok(record)
            }
        }
    }

    /// Starts watching for a matching message that arrives after this call.
    ///
    /// Returns immediately; the handle resolves with the message, the first
    /// fatal error, or [`ImapError::Timeout`] once `timeout_ms` has elapsed.
    /// Must be called from within a tokio runtime.
    pub fn watch_for_new_message(&self, headers: &Value, timeout_ms: u64) -> WatchHandle {
        if let Ok(guard) = self.transport.try_lock() {
            if guard.is_none() {
                return WatchHandle::ready(Err(ImapError::NotConnected));
            }
        }

        let filter = HeaderFilter::from_json(headers);
        let transport = Arc::clone(&self.transport);
        let options = self.settings.watch_options();
        WatchHandle::spawn(watcher::watch_for_new_message(
            transport, filter, timeout_ms, options,
        ))
    }

    /// Deletes every message that arrived before `cutoff_epoch_secs`.
    pub async fn purge_older_than(&self, cutoff_epoch_secs: i64) -> Result<usize, PurgeError> {
        let mut guard = self.transport.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| PurgeError::new(PurgePhase::Connect, ImapError::NotConnected))?;
        purge::purge_older_than(&mut **conn, &self.settings.mailbox, cutoff_epoch_secs).await
    }

    /// Logs out and drops the connection. Logging out twice is harmless.
    pub async fn logout(&self) -> Result<(), ImapError> {
        let session = self.transport.lock().await.take();
        match session {
            Some(mut session) => {
                session.logout().await?;
                info!("Logged out from {}", self.settings.imap_host);
                Ok(())
            }
            None => {
                debug!("logout() called on a disconnected client");
                Ok(())
            }
        }
    }
}

/// Connects with `settings`, returns the most recent message matching
/// `headers` and disconnects.
pub async fn read_once(settings: Settings, headers: &Value) -> Result<Option<EmailRecord>, ImapError> {
    ImapClient::new(settings).read_and_logout(headers).await
}
