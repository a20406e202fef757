//! Tracks in-flight and retained requests by number.
//!
//! Numbers are assigned monotonically in `1..=i32::MAX`, wrapping and
//! skipping any number still tracked. A record is created when a request is
//! accepted, completed when the service returns, and freed either at once or
//! when a caller retrieves a retained result.

use std::collections::BTreeMap;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;

use staf_proto::ReturnCode;

use crate::services::{ServiceRequest, ServiceResult};

const MAX_REQUEST_NUMBER: u32 = i32::MAX.unsigned_abs();

/// Lifecycle state of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) enum RequestState {
    Pending,
    Complete,
}

/// Listing entry for a tracked request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestSummary {
    pub(crate) request_number: u32,
    pub(crate) state: RequestState,
    pub(crate) handle: u32,
    pub(crate) handle_name: String,
    pub(crate) machine: String,
    pub(crate) service: String,
    pub(crate) request: String,
}

#[derive(Debug)]
struct RequestRecord {
    summary: RequestSummary,
    started: SystemTime,
    result: Option<ServiceResult>,
}

#[derive(Debug)]
struct Requests {
    records: BTreeMap<u32, RequestRecord>,
    next: u32,
    total: u64,
}

#[derive(Debug)]
pub(crate) struct RequestManager {
    inner: Mutex<Requests>,
}

impl RequestManager {
    pub(crate) fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(next: u32) -> Self {
        Self {
            inner: Mutex::new(Requests {
                records: BTreeMap::new(),
                next,
                total: 0,
            }),
        }
    }

    /// Tracks a new request and returns its number.
    pub(crate) fn add(&self, request: &ServiceRequest) -> u32 {
        let mut inner = self.inner.lock();
        let mut number = inner.next;
        while inner.records.contains_key(&number) {
            number = advance(number);
        }
        inner.next = advance(number);
        inner.total += 1;
        inner.records.insert(
            number,
            RequestRecord {
                summary: RequestSummary {
                    request_number: number,
                    state: RequestState::Pending,
                    handle: request.handle,
                    handle_name: request.handle_name.clone(),
                    machine: request.machine.clone(),
                    service: request.service.clone(),
                    request: request.request.clone(),
                },
                started: SystemTime::now(),
                result: None,
            },
        );
        number
    }

    /// Stores the outcome of a request.
    pub(crate) fn complete(&self, number: u32, result: &ServiceResult) -> ReturnCode {
        let mut inner = self.inner.lock();
        match inner.records.get_mut(&number) {
            Some(record) => {
                record.summary.state = RequestState::Complete;
                record.result = Some(result.clone());
                ReturnCode::Ok
            }
            None => ReturnCode::RequestNumberNotFound,
        }
    }

    /// Reads a completed result without releasing it.
    pub(crate) fn result(&self, number: u32) -> Result<ServiceResult, ReturnCode> {
        let inner = self.inner.lock();
        let record = inner
            .records
            .get(&number)
            .ok_or(ReturnCode::RequestNumberNotFound)?;
        record.result.clone().ok_or(ReturnCode::RequestNotComplete)
    }

    /// Releases a completed request and hands back its result.
    pub(crate) fn free(&self, number: u32) -> Result<ServiceResult, ReturnCode> {
        let mut inner = self.inner.lock();
        let complete = inner
            .records
            .get(&number)
            .ok_or(ReturnCode::RequestNumberNotFound)?
            .result
            .is_some();
        if !complete {
            return Err(ReturnCode::RequestNotComplete);
        }
        inner
            .records
            .remove(&number)
            .and_then(|record| record.result)
            .ok_or(ReturnCode::RequestNumberNotFound)
    }

    /// Drops a record regardless of its state.
    pub(crate) fn delete(&self, number: u32) -> bool {
        self.inner.lock().records.remove(&number).is_some()
    }

    pub(crate) fn status(&self, number: u32) -> Option<RequestState> {
        self.inner
            .lock()
            .records
            .get(&number)
            .map(|record| record.summary.state)
    }

    /// Copies the table out, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<RequestSummary> {
        let inner = self.inner.lock();
        let mut records: Vec<_> = inner.records.values().collect();
        records.sort_by_key(|record| record.started);
        records.into_iter().map(|record| record.summary.clone()).collect()
    }

    /// Requests accepted since startup.
    pub(crate) fn total(&self) -> u64 {
        self.inner.lock().total
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}

const fn advance(number: u32) -> u32 {
    if number >= MAX_REQUEST_NUMBER {
        1
    } else {
        number + 1
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn request() -> ServiceRequest {
        ServiceRequest {
            service: "PING".to_owned(),
            request: "PING".to_owned(),
            ..ServiceRequest::default()
        }
    }

    #[rstest]
    fn numbers_wrap_and_skip_live_entries(request: ServiceRequest) {
        let manager = RequestManager::starting_at(MAX_REQUEST_NUMBER);
        let last = manager.add(&request);
        assert_eq!(last, MAX_REQUEST_NUMBER);
        let first = manager.add(&request);
        assert_eq!(first, 1);

        let wrapped = RequestManager::starting_at(MAX_REQUEST_NUMBER);
        wrapped.add(&request);
        wrapped.add(&request);
        wrapped.inner.lock().next = MAX_REQUEST_NUMBER;
        assert_eq!(wrapped.add(&request), 2);
    }

    #[rstest]
    fn free_requires_completion(request: ServiceRequest) {
        let manager = RequestManager::new();
        let number = manager.add(&request);
        assert_eq!(manager.free(number), Err(ReturnCode::RequestNotComplete));
        assert_eq!(manager.status(number), Some(RequestState::Pending));

        let outcome = ServiceResult::ok("PONG");
        assert_eq!(manager.complete(number, &outcome), ReturnCode::Ok);
        assert_eq!(manager.result(number), Ok(outcome.clone()));
        assert_eq!(manager.free(number), Ok(outcome));
        assert_eq!(manager.free(number), Err(ReturnCode::RequestNumberNotFound));
        assert_eq!(manager.total(), 1);
    }

    #[rstest]
    fn delete_is_idempotent(request: ServiceRequest) {
        let manager = RequestManager::new();
        let number = manager.add(&request);
        assert!(manager.delete(number));
        assert!(!manager.delete(number));
        assert!(manager.snapshot().is_empty());
    }
}
