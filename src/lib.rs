//! Watch an IMAP mailbox for newly arrived messages matching a header filter,
//! read the latest match, and purge messages older than a cutoff.

pub mod config;
pub mod imap;
pub mod logging;
pub mod models;
pub mod utils;

pub mod prelude {
    // Config
    pub use crate::config::{Settings, SettingsError};

    // IMAP
    pub use crate::imap::client::{read_once, ImapClient};
    pub use crate::imap::criteria::{HeaderFilter, SearchCriteria};
    pub use crate::imap::error::ImapError;
    pub use crate::imap::purge::{PurgeError, PurgePhase};
    pub use crate::imap::session::{ImapSessionFactory, ImapTransport};
    pub use crate::imap::types::{Address, Envelope, FetchItem, RawMessage, DELETED_FLAG};
    pub use crate::imap::watcher::{WatchHandle, WatchOptions};

    // Models
    pub use crate::models::email::{EmailRecord, OneOrMany};

    // Common Libs
    pub use log::{debug, error, info, trace, warn};
    pub use std::sync::Arc;
    pub use tokio::sync::Mutex as TokioMutex;
}
