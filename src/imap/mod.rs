pub mod client;
pub mod criteria;
pub mod decoder;
pub mod error;
pub mod purge;
pub mod session;
pub mod types;
pub mod watcher;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{read_once, ImapClient, SharedTransport};
pub use criteria::{HeaderFilter, SearchCriteria};
pub use error::ImapError;
pub use purge::{PurgeError, PurgePhase};
pub use session::{ImapSessionFactory, ImapTransport};
pub use watcher::{WatchHandle, WatchOptions};
