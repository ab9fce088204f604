//! Bounded, insertion-ordered record of recent client requests.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use svc_control_core::ClientRequest;

use crate::registry::ClientSession;

/// One dispatched request with a snapshot of its sender.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request: ClientRequest,
    pub sender: ClientSession,
    pub received_at: DateTime<Utc>,
}

impl RequestRecord {
    #[must_use]
    pub fn new(request: ClientRequest, sender: ClientSession) -> Self {
        Self {
            request,
            sender,
            received_at: Utc::now(),
        }
    }
}

/// FIFO audit ledger bounded by a configured limit; when the limit is
/// exceeded the oldest records are evicted first.
pub struct RequestHistory {
    limit: usize,
    records: Mutex<VecDeque<RequestRecord>>,
}

impl RequestHistory {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            records: Mutex::new(VecDeque::with_capacity(limit.min(64))),
        }
    }

    /// Append a record, evicting oldest entries past the limit.
    pub fn push(&self, record: RequestRecord) {
        let mut records = self.records.lock().unwrap();
        records.push_back(record);
        while records.len() > self.limit {
            records.pop_front();
        }
    }

    /// Oldest-first snapshot of the ledger.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        self.records.lock().unwrap().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svc_control_core::traits::Principal;
    use uuid::Uuid;

    fn record(line: &str) -> RequestRecord {
        let sender = ClientSession {
            id: Uuid::new_v4(),
            principal: Principal::anonymous(),
            client_name: "console".to_string(),
            machine_name: "ops-1".to_string(),
            connected_at: Utc::now(),
            credentials: None,
        };
        RequestRecord::new(ClientRequest::parse(line).unwrap(), sender)
    }

    #[test]
    fn length_never_exceeds_limit() {
        let history = RequestHistory::new(3);
        for i in 0..10 {
            history.push(record(&format!("Command{i}")));
            assert!(history.len() <= 3);
        }
    }

    #[test]
    fn oldest_records_evicted_first() {
        let history = RequestHistory::new(3);
        for i in 0..4 {
            history.push(record(&format!("Command{i}")));
        }
        let snapshot = history.snapshot();
        let commands: Vec<&str> = snapshot.iter().map(|r| r.request.command()).collect();
        assert_eq!(commands, vec!["Command1", "Command2", "Command3"]);
    }
}
