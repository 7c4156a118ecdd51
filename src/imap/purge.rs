// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Deletion of messages older than a cutoff.

use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;

use crate::imap::criteria::SearchCriteria;
use crate::imap::error::ImapError;
use crate::imap::session::ImapTransport;
use crate::imap::types::DELETED_FLAG;

/// Step of a purge that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgePhase {
    Connect,
    Select,
    Search,
    Mark,
    Expunge,
}

impl fmt::Display for PurgePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PurgePhase::Connect => "connect",
            PurgePhase::Select => "select",
            PurgePhase::Search => "search",
            PurgePhase::Mark => "mark",
            PurgePhase::Expunge => "expunge",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Purge failed during {phase}: {source}")]
pub struct PurgeError {
    pub phase: PurgePhase,
    #[source]
    pub source: ImapError,
}

impl PurgeError {
    pub fn new(phase: PurgePhase, source: ImapError) -> Self {
        Self { phase, source }
    }

    /// Messages were flagged `\Deleted` but not removed.
    pub fn messages_left_flagged(&self) -> bool {
        self.phase == PurgePhase::Expunge
    }

    /// Nothing in the mailbox was changed, so the purge can simply be run again.
    pub fn is_retry_safe(&self) -> bool {
        !self.messages_left_flagged()
    }
}

/// Flags and expunges every message in `mailbox` with an internal date before
/// `cutoff_secs`. Returns how many messages were marked.
pub async fn purge_older_than(
    conn: &mut dyn ImapTransport,
    mailbox: &str,
    cutoff_secs: i64,
) -> Result<usize, PurgeError> {
    conn.select_mailbox(mailbox, false)
        .await
        .map_err(|e| PurgeError::new(PurgePhase::Select, e))?;

    let cutoff = DateTime::<Utc>::from_timestamp(cutoff_secs, 0).ok_or_else(|| {
        PurgeError::new(
            PurgePhase::Search,
            ImapError::InvalidCriteria(format!("cutoff {} is out of range", cutoff_secs)),
        )
    })?;
    let criteria = SearchCriteria::default().before(cutoff);
    let ids = conn
        .search(&criteria)
        .await
        .map_err(|e| PurgeError::new(PurgePhase::Search, e))?;

    if ids.is_empty() {
        debug!("No messages in '{}' before {}", mailbox, cutoff);
        return Ok(0);
    }
    info!(
        "Purging {} messages from '{}' older than {}",
        ids.len(),
        mailbox,
        cutoff
    );

    conn.store(&ids, &[DELETED_FLAG.to_string()])
        .await
        .map_err(|e| PurgeError::new(PurgePhase::Mark, e))?;

    if let Err(e) = conn.expunge().await {
        warn!(
            "{} messages in '{}' are flagged deleted but were not expunged: {}",
            ids.len(),
            mailbox,
            e
        );
        return Err(PurgeError::new(PurgePhase::Expunge, e));
    }

    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::mock::{Call, MockTransport};

    #[tokio::test]
    async fn marks_and_expunges_old_messages() {
        let mut mock = MockTransport::new().with_search_result(Ok(vec![5, 7]));
        let tracker = mock.tracker();

        let purged = purge_older_than(&mut mock, "INBOX", 1_704_067_200)
            .await
            .expect("purge succeeds");

        assert_eq!(purged, 2);
        assert_eq!(
            tracker.calls(),
            vec![
                Call::Select {
                    mailbox: "INBOX".into(),
                    read_only: false
                },
                Call::Search {
                    query: "BEFORE 1-Jan-2024".into()
                },
                Call::Store {
                    ids: vec![5, 7],
                    flags: vec!["\\Deleted".into()]
                },
                Call::Expunge,
            ]
        );
    }

    #[tokio::test]
    async fn nothing_to_purge_makes_no_changes() {
        let mut mock = MockTransport::new().with_search_result(Ok(vec![]));
        let tracker = mock.tracker();

        let purged = purge_older_than(&mut mock, "INBOX", 1_704_067_200)
            .await
            .expect("purge succeeds");

        assert_eq!(purged, 0);
        assert_eq!(tracker.count(|c| matches!(c, Call::Store { .. })), 0);
        assert_eq!(tracker.count(|c| matches!(c, Call::Expunge)), 0);
    }

    #[tokio::test]
    async fn mark_failure_skips_expunge() {
        let mut mock = MockTransport::new()
            .with_search_result(Ok(vec![1]))
            .with_store_result(Err(ImapError::Store("read-only mailbox".into())));
        let tracker = mock.tracker();

        let err = purge_older_than(&mut mock, "INBOX", 1_704_067_200)
            .await
            .unwrap_err();

        assert_eq!(err.phase, PurgePhase::Mark);
        assert!(err.is_retry_safe());
        assert!(!err.messages_left_flagged());
        assert_eq!(tracker.count(|c| matches!(c, Call::Expunge)), 0);
    }

    #[tokio::test]
    async fn expunge_failure_leaves_messages_flagged() {
        let mut mock = MockTransport::new()
            .with_search_result(Ok(vec![3]))
            .with_expunge_result(Err(ImapError::Expunge("server busy".into())));

        let err = purge_older_than(&mut mock, "INBOX", 1_704_067_200)
            .await
            .unwrap_err();

        assert_eq!(err.phase, PurgePhase::Expunge);
        assert!(err.messages_left_flagged());
        assert!(!err.is_retry_safe());
        assert_eq!(err.source, ImapError::Expunge("server busy".into()));
    }

    #[tokio::test]
    async fn select_and_search_failures_report_their_phase() {
        let mut mock =
            MockTransport::new().with_select_result(Err(ImapError::Mailbox("missing".into())));
        let err = purge_older_than(&mut mock, "Nope", 0).await.unwrap_err();
        assert_eq!(err.phase, PurgePhase::Select);

        let mut mock = MockTransport::new().with_search_result(Err(ImapError::Search("BAD".into())));
        let err = purge_older_than(&mut mock, "INBOX", 0).await.unwrap_err();
        assert_eq!(err.phase, PurgePhase::Search);
    }

    #[tokio::test]
    async fn out_of_range_cutoff_is_rejected() {
        let mut mock = MockTransport::new();
        let tracker = mock.tracker();

        let err = purge_older_than(&mut mock, "INBOX", i64::MAX).await.unwrap_err();

        assert_eq!(err.phase, PurgePhase::Search);
        assert!(matches!(err.source, ImapError::InvalidCriteria(_)));
        assert_eq!(tracker.searches(), 0);
    }

    #[test]
    fn error_message_names_phase() {
        let err = PurgeError::new(PurgePhase::Connect, ImapError::NotConnected);
        assert_eq!(
            err.to_string(),
            "Purge failed during connect: Client not connected. Call login() first."
        );
    }
}
