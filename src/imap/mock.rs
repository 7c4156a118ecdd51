// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::imap::criteria::SearchCriteria;
use crate::imap::error::ImapError;
use crate::imap::session::ImapTransport;
use crate::imap::types::{FetchItem, RawMessage};

/// Every call the transport received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Select { mailbox: String, read_only: bool },
    Search { query: String },
    Fetch { ids: Vec<u32> },
    Store { ids: Vec<u32>, flags: Vec<String> },
    Expunge,
    Logout,
}

#[derive(Debug, Default)]
pub struct CallTracker {
    calls: Mutex<Vec<Call>>,
}

impl CallTracker {
    fn record(&self, call: Call) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn fetches(&self) -> usize {
        self.count(|c| matches!(c, Call::Fetch { .. }))
    }

    pub fn searches(&self) -> usize {
        self.count(|c| matches!(c, Call::Search { .. }))
    }
}

/// Results are consumed front to back; the last scripted result repeats forever.
#[derive(Debug)]
pub struct MockTransport {
    tracker: Arc<CallTracker>,
    select_results: VecDeque<Result<(), ImapError>>,
    search_results: VecDeque<Result<Vec<u32>, ImapError>>,
    fetch_results: VecDeque<Result<Vec<RawMessage>, ImapError>>,
    store_result: Result<(), ImapError>,
    expunge_result: Result<(), ImapError>,
    logout_result: Result<(), ImapError>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            tracker: Arc::new(CallTracker::default()),
            select_results: VecDeque::new(),
            search_results: VecDeque::new(),
            fetch_results: VecDeque::new(),
            store_result: Ok(()),
            expunge_result: Ok(()),
            logout_result: Ok(()),
        }
    }

    pub fn with_select_result(mut self, result: Result<(), ImapError>) -> Self {
        self.select_results.push_back(result);
        self
    }

    pub fn with_search_result(mut self, result: Result<Vec<u32>, ImapError>) -> Self {
        self.search_results.push_back(result);
        self
    }

    pub fn with_fetch_result(mut self, result: Result<Vec<RawMessage>, ImapError>) -> Self {
        self.fetch_results.push_back(result);
        self
    }

    pub fn with_store_result(mut self, result: Result<(), ImapError>) -> Self {
        self.store_result = result;
        self
    }

    pub fn with_expunge_result(mut self, result: Result<(), ImapError>) -> Self {
        self.expunge_result = result;
        self
    }

    pub fn with_logout_result(mut self, result: Result<(), ImapError>) -> Self {
        self.logout_result = result;
        self
    }

    pub fn tracker(&self) -> Arc<CallTracker> {
        Arc::clone(&self.tracker)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn next_or_last<T: Clone>(queue: &mut VecDeque<T>, default: T) -> T {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or(default)
    } else {
        queue.front().cloned().unwrap_or(default)
    }
}

#[async_trait]
impl ImapTransport for MockTransport {
    async fn select_mailbox(&mut self, name: &str, read_only: bool) -> Result<(), ImapError> {
        self.tracker.record(Call::Select {
            mailbox: name.to_string(),
            read_only,
        });
        next_or_last(&mut self.select_results, Ok(()))
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>, ImapError> {
        let query = criteria.to_imap_query()?;
        self.tracker.record(Call::Search { query });
        next_or_last(&mut self.search_results, Ok(Vec::new()))
    }

    async fn fetch(&mut self, ids: &[u32], _items: &[FetchItem]) -> Result<Vec<RawMessage>, ImapError> {
        self.tracker.record(Call::Fetch { ids: ids.to_vec() });
        next_or_last(&mut self.fetch_results, Ok(Vec::new()))
    }

    async fn store(&mut self, ids: &[u32], flags: &[String]) -> Result<(), ImapError> {
        self.tracker.record(Call::Store {
            ids: ids.to_vec(),
            flags: flags.to_vec(),
        });
        self.store_result.clone()
    }

    async fn expunge(&mut self) -> Result<(), ImapError> {
        self.tracker.record(Call::Expunge);
        self.expunge_result.clone()
    }

    async fn logout(&mut self) -> Result<(), ImapError> {
        self.tracker.record(Call::Logout);
        self.logout_result.clone()
    }
}
