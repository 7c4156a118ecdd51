// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Polling watcher for newly arrived messages.
//!
//! Each iteration runs `timeout check -> EXAMINE -> SEARCH -> FETCH -> evaluate`
//! and then either resolves, fails, or sleeps for the poll interval. Only the
//! highest matching sequence number is examined per iteration, so when several
//! matching messages arrive between two polls only the most recent one can win.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};

use crate::imap::client::SharedTransport;
use crate::imap::criteria::{HeaderFilter, SearchCriteria};
use crate::imap::decoder::decode_message;
use crate::imap::error::ImapError;
use crate::imap::types::{RawMessage, MESSAGE_FETCH_ITEMS};
use crate::models::email::EmailRecord;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_SINCE_SKEW: Duration = Duration::from_secs(1);

/// SINCE matches on the calendar day in the server's zone, which can trail
/// the UTC day by up to a day. Arrival is checked exactly in `is_new`.
const SERVER_ZONE_MARGIN_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    pub mailbox: String,
    /// Fixed sleep between iterations.
    pub poll_interval: Duration,
    /// Subtracted from the start time for the SEARCH lower bound, to absorb
    /// clock and precision differences with the server.
    pub since_skew: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            mailbox: "INBOX".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            since_skew: DEFAULT_SINCE_SKEW,
        }
    }
}

/// State of one watch call. Dropped when the watch ends.
#[derive(Debug)]
struct PollingSession {
    started: Instant,
    started_at: DateTime<Utc>,
    search_since: DateTime<Utc>,
    timeout_ms: u64,
    poll_interval: Duration,
    /// Ids already evaluated and rejected. Only ever grows.
    skipped: HashSet<u32>,
    iteration: u64,
}

impl PollingSession {
    fn start(timeout_ms: u64, options: &WatchOptions) -> Self {
        Self::starting_at(Utc::now(), timeout_ms, options)
    }

    fn starting_at(started_at: DateTime<Utc>, timeout_ms: u64, options: &WatchOptions) -> Self {
        Self {
            started: Instant::now(),
            started_at,
            search_since: search_lower_bound(started_at, options.since_skew),
            timeout_ms,
            poll_interval: options.poll_interval,
            skipped: HashSet::new(),
            iteration: 0,
        }
    }

    fn timed_out(&self) -> bool {
        self.started.elapsed() >= Duration::from_millis(self.timeout_ms)
    }

    fn is_new(&self, msg: &RawMessage) -> bool {
        match msg.internal_date {
            Some(date) if date.timestamp() != 0 => date.with_timezone(&Utc) > self.started_at,
            _ => false,
        }
    }

    fn skip(&mut self, id: u32) {
        self.skipped.insert(id);
    }
}

/// Lower bound handed to SEARCH SINCE for a watch started at `started_at`.
fn search_lower_bound(started_at: DateTime<Utc>, since_skew: Duration) -> DateTime<Utc> {
    let skew = chrono::Duration::from_std(since_skew)
        .unwrap_or_else(|_| chrono::Duration::seconds(1));
    started_at - skew - chrono::Duration::hours(SERVER_ZONE_MARGIN_HOURS)
}

/// Polls until a new matching message arrives, a fatal error occurs, or the timeout elapses.
pub async fn watch_for_new_message(
    transport: SharedTransport,
    filter: HeaderFilter,
    timeout_ms: u64,
    options: WatchOptions,
) -> Result<EmailRecord, ImapError> {
    // Reject unusable filters before touching the mailbox
    SearchCriteria::with_header(filter.clone()).to_imap_query()?;

    let mut session = PollingSession::start(timeout_ms, &options);
    info!(
        "Watching '{}' for new messages, timeout {} ms, poll interval {:?}",
        options.mailbox, timeout_ms, options.poll_interval
    );

    loop {
        session.iteration += 1;
        if session.timed_out() {
            info!(
                "Watch timed out after {} iterations, elapsed {:?}",
                session.iteration,
                session.started.elapsed()
            );
            return Err(ImapError::Timeout { timeout_ms });
        }
        debug!(
            "Watch iteration {}, elapsed {:?}",
            session.iteration,
            session.started.elapsed()
        );

        if let Some(record) = poll_once(&transport, &filter, &options, &mut session).await? {
            info!(
                "Found new message {} after {} iterations",
                record.seq, session.iteration
            );
            return Ok(record);
        }

        sleep(session.poll_interval).await;
    }
}

/// One search/fetch/evaluate pass. `Ok(None)` means sleep and retry.
async fn poll_once(
    transport: &SharedTransport,
    filter: &HeaderFilter,
    options: &WatchOptions,
    session: &mut PollingSession,
) -> Result<Option<EmailRecord>, ImapError> {
    let mut guard = transport.lock().await;
    let conn = guard.as_mut().ok_or(ImapError::NotConnected)?;

    conn.select_mailbox(&options.mailbox, true).await?;

    let criteria = SearchCriteria::with_header(filter.clone()).since(session.search_since);
    let ids = conn.search(&criteria).await?;
    debug!("Found {} messages matching criteria", ids.len());

    let Some(latest) = ids.iter().copied().max() else {
        return Ok(None);
    };
    if session.skipped.contains(&latest) {
        debug!("Skipping message {} (already checked and not new)", latest);
        return Ok(None);
    }

    let messages = match conn.fetch(&[latest], MESSAGE_FETCH_ITEMS).await {
        Ok(messages) => messages,
        Err(e) if e.is_soft() => {
            warn!("Error fetching message {}: {}, will retry", latest, e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    drop(guard);

    let Some(msg) = take_single(messages, latest) else {
        debug!("Message {} was not returned by the server", latest);
        session.skip(latest);
        return Ok(None);
    };

    if !session.is_new(&msg) {
        debug!(
            "Message {} is not new (internal date {:?}, start {}), adding to skipped",
            latest, msg.internal_date, session.started_at
        );
        session.skip(latest);
        return Ok(None);
    }

    Ok(Some(decode_message(&msg)))
}

/// Picks the message for `id` out of a fetch response that should hold exactly one.
pub(crate) fn take_single(messages: Vec<RawMessage>, id: u32) -> Option<RawMessage> {
    if messages.len() > 1 {
        warn!(
            "Expected one message for id {}, server returned {}",
            id,
            messages.len()
        );
    }
    let mut messages = messages;
    match messages.iter().position(|m| m.seq == id) {
        Some(idx) => Some(messages.swap_remove(idx)),
        None => messages.into_iter().next(),
    }
}

/// Single-resolution handle to a watch running in the background.
#[derive(Debug)]
pub struct WatchHandle {
    rx: oneshot::Receiver<Result<EmailRecord, ImapError>>,
}

impl WatchHandle {
    /// Runs `watch` on the tokio runtime and reports its outcome once.
    pub(crate) fn spawn<F>(watch: F) -> Self
    where
        F: Future<Output = Result<EmailRecord, ImapError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = watch.await;
            if tx.send(result).is_err() {
                debug!("Watch result dropped, handle no longer held");
            }
        });
        Self { rx }
    }

    /// A handle that is already resolved.
    pub(crate) fn ready(result: Result<EmailRecord, ImapError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for WatchHandle {
    type Output = Result<EmailRecord, ImapError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(ImapError::Internal(
                    "watch task ended without a result".to_string(),
                ))
            })
        })
    }
}
