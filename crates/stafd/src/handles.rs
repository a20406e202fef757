//! Registered client processes and their per-handle state.
//!
//! A handle is the identity a local process uses for every request. Each
//! handle owns a variable pool, a message queue and the authentication
//! identity it presents. The manager also keeps the list of remote parties
//! that asked to be told when a handle terminates.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;

use staf_proto::ReturnCode;

use crate::variables::VariablePool;

/// Handle number owned by the daemon itself.
pub(crate) const DAEMON_HANDLE: u32 = 1;

/// Authenticator used when a caller presents no credentials.
pub(crate) const NO_AUTHENTICATOR: &str = "none";

/// User identifier paired with [`NO_AUTHENTICATOR`].
pub(crate) const ANONYMOUS_USER: &str = "anonymous";

/// Credentials a handle presents with its requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Authentication {
    pub(crate) authenticator: String,
    pub(crate) user: String,
    pub(crate) data: String,
}

impl Authentication {
    pub(crate) fn anonymous() -> Self {
        Self {
            authenticator: NO_AUTHENTICATOR.to_owned(),
            user: ANONYMOUS_USER.to_owned(),
            data: String::new(),
        }
    }
}

/// Message waiting in a handle's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueuedMessage {
    pub(crate) machine: String,
    pub(crate) handle_name: String,
    pub(crate) handle: u32,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) message: String,
}

/// Remote party to notify when a handle terminates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NotificationEntry {
    pub(crate) handle: u32,
    pub(crate) endpoint: String,
    pub(crate) machine: String,
    pub(crate) uuid: String,
    pub(crate) service: String,
    pub(crate) key: String,
}

#[derive(Debug)]
struct HandleEntry {
    pid: u32,
    name: String,
    last_used: SystemTime,
    variables: Arc<VariablePool>,
    authentication: Authentication,
    queue: VecDeque<QueuedMessage>,
}

impl HandleEntry {
    fn new(pid: u32, name: String) -> Self {
        Self {
            pid,
            name,
            last_used: SystemTime::now(),
            variables: Arc::new(VariablePool::new()),
            authentication: Authentication::anonymous(),
            queue: VecDeque::new(),
        }
    }
}

#[derive(Debug)]
struct Handles {
    entries: BTreeMap<u32, HandleEntry>,
    next: u32,
}

#[derive(Debug)]
pub(crate) struct HandleManager {
    handles: Mutex<Handles>,
    notifications: Mutex<Vec<NotificationEntry>>,
}

impl HandleManager {
    pub(crate) fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            DAEMON_HANDLE,
            HandleEntry::new(std::process::id(), "STAF_Process".to_owned()),
        );
        Self {
            handles: Mutex::new(Handles {
                entries,
                next: DAEMON_HANDLE + 1,
            }),
            notifications: Mutex::new(Vec::new()),
        }
    }

    /// Registers a process and returns its new handle.
    pub(crate) fn register(&self, pid: u32, name: &str) -> Result<u32, ReturnCode> {
        let mut handles = self.handles.lock();
        let start = handles.next;
        let mut candidate = start;
        while handles.entries.contains_key(&candidate) {
            candidate = next_handle(candidate);
            if candidate == start {
                return Err(ReturnCode::MaximumSizeExceeded);
            }
        }
        handles
            .entries
            .insert(candidate, HandleEntry::new(pid, name.to_owned()));
        handles.next = next_handle(candidate);
        Ok(candidate)
    }

    /// Releases a handle owned by `pid`.
    pub(crate) fn unregister(&self, handle: u32, pid: u32) -> ReturnCode {
        if handle == DAEMON_HANDLE {
            return ReturnCode::InvalidHandle;
        }
        let mut handles = self.handles.lock();
        match handles.entries.get(&handle) {
            Some(entry) if entry.pid == pid => {
                handles.entries.remove(&handle);
                ReturnCode::Ok
            }
            Some(_) => ReturnCode::InvalidHandle,
            None => ReturnCode::HandleDoesNotExist,
        }
    }

    /// Marks a handle as used by `pid` just now.
    pub(crate) fn update_timestamp(&self, handle: u32, pid: u32) -> Result<(), ReturnCode> {
        let mut handles = self.handles.lock();
        match handles.entries.get_mut(&handle) {
            Some(entry) if entry.pid == pid || handle == DAEMON_HANDLE => {
                entry.last_used = SystemTime::now();
                Ok(())
            }
            _ => Err(ReturnCode::InvalidHandle),
        }
    }

    pub(crate) fn name(&self, handle: u32) -> Option<String> {
        self.handles
            .lock()
            .entries
            .get(&handle)
            .map(|entry| entry.name.clone())
    }

    pub(crate) fn variables(&self, handle: u32) -> Option<Arc<VariablePool>> {
        self.handles
            .lock()
            .entries
            .get(&handle)
            .map(|entry| Arc::clone(&entry.variables))
    }

    pub(crate) fn authentication(&self, handle: u32) -> Authentication {
        self.handles
            .lock()
            .entries
            .get(&handle)
            .map_or_else(Authentication::anonymous, |entry| {
                entry.authentication.clone()
            })
    }

    pub(crate) fn set_authentication(
        &self,
        handle: u32,
        authentication: Authentication,
    ) -> ReturnCode {
        match self.handles.lock().entries.get_mut(&handle) {
            Some(entry) => {
                entry.authentication = authentication;
                ReturnCode::Ok
            }
            None => ReturnCode::HandleDoesNotExist,
        }
    }

    pub(crate) fn exists(&self, handle: u32) -> bool {
        self.handles.lock().entries.contains_key(&handle)
    }

    /// Appends a message to a handle's queue.
    pub(crate) fn queue(&self, handle: u32, message: QueuedMessage) -> ReturnCode {
        match self.handles.lock().entries.get_mut(&handle) {
            Some(entry) => {
                entry.queue.push_back(message);
                ReturnCode::Ok
            }
            None => ReturnCode::HandleDoesNotExist,
        }
    }

    /// Removes the oldest message matching `kind`, or any message when `None`.
    pub(crate) fn dequeue(
        &self,
        handle: u32,
        kind: Option<&str>,
    ) -> Result<Option<QueuedMessage>, ReturnCode> {
        let mut handles = self.handles.lock();
        let entry = handles
            .entries
            .get_mut(&handle)
            .ok_or(ReturnCode::HandleDoesNotExist)?;
        let position = entry.queue.iter().position(|message| {
            kind.is_none_or(|kind| message.kind.eq_ignore_ascii_case(kind))
        });
        Ok(position.and_then(|index| entry.queue.remove(index)))
    }

    /// Number of registered handles, including the daemon's own.
    pub(crate) fn count(&self) -> usize {
        self.handles.lock().entries.len()
    }

    pub(crate) fn add_notification(&self, entry: NotificationEntry) {
        let mut notifications = self.notifications.lock();
        if !notifications.contains(&entry) {
            notifications.push(entry);
        }
    }

    /// Removes matching entries; the endpoint is not compared.
    pub(crate) fn delete_notification(&self, entry: &NotificationEntry) -> bool {
        let mut notifications = self.notifications.lock();
        let before = notifications.len();
        notifications.retain(|existing| {
            !(existing.handle == entry.handle
                && existing.machine == entry.machine
                && existing.uuid == entry.uuid
                && existing.service == entry.service
                && existing.key == entry.key)
        });
        notifications.len() != before
    }

    pub(crate) fn notifications(&self) -> Vec<NotificationEntry> {
        self.notifications.lock().clone()
    }
}

impl Default for HandleManager {
    fn default() -> Self {
        Self::new()
    }
}

fn next_handle(current: u32) -> u32 {
    if current >= u32::MAX - 1 {
        DAEMON_HANDLE + 1
    } else {
        current + 1
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn manager() -> HandleManager {
        HandleManager::new()
    }

    fn message(kind: &str, text: &str) -> QueuedMessage {
        QueuedMessage {
            machine: "local".to_owned(),
            handle_name: "test".to_owned(),
            handle: DAEMON_HANDLE,
            kind: kind.to_owned(),
            message: text.to_owned(),
        }
    }

    #[rstest]
    fn registration_assigns_fresh_handles(manager: HandleManager) {
        let first = manager.register(100, "first").expect("register");
        let second = manager.register(101, "second").expect("register");
        assert_ne!(first, second);
        assert_ne!(first, DAEMON_HANDLE);
        assert_eq!(manager.name(second).as_deref(), Some("second"));
    }

    #[rstest]
    fn unregistration_checks_the_owner(manager: HandleManager) {
        let handle = manager.register(100, "owner").expect("register");
        assert_eq!(manager.unregister(handle, 999), ReturnCode::InvalidHandle);
        assert_eq!(manager.unregister(handle, 100), ReturnCode::Ok);
        assert_eq!(manager.unregister(handle, 100), ReturnCode::HandleDoesNotExist);
    }

    #[rstest]
    fn unknown_handles_cannot_submit(manager: HandleManager) {
        assert_eq!(
            manager.update_timestamp(4242, 1),
            Err(ReturnCode::InvalidHandle)
        );
    }

    #[rstest]
    fn queues_are_filtered_by_type(manager: HandleManager) {
        let handle = manager.register(7, "queue").expect("register");
        manager.queue(handle, message("A", "first"));
        manager.queue(handle, message("B", "second"));
        let taken = manager.dequeue(handle, Some("b")).expect("handle exists");
        assert_eq!(taken.map(|m| m.message).as_deref(), Some("second"));
        let rest = manager.dequeue(handle, None).expect("handle exists");
        assert_eq!(rest.map(|m| m.message).as_deref(), Some("first"));
    }

    #[rstest]
    fn notifications_ignore_the_endpoint_on_delete(manager: HandleManager) {
        let entry = NotificationEntry {
            handle: 5,
            endpoint: "tcp://peer:6500".to_owned(),
            machine: "peer".to_owned(),
            uuid: "uuid".to_owned(),
            service: "SEM".to_owned(),
            key: "k".to_owned(),
        };
        manager.add_notification(entry.clone());
        manager.add_notification(entry.clone());
        assert_eq!(manager.notifications().len(), 1);
        let lookup = NotificationEntry {
            endpoint: "peer".to_owned(),
            ..entry
        };
        assert!(manager.delete_notification(&lookup));
        assert!(manager.notifications().is_empty());
    }
}
