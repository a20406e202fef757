//! In-flight copy table.
//!
//! Registering a transfer is the mutual-exclusion check: a path may have any
//! number of concurrent readers, but a writer excludes every other transfer
//! on the same normalised path. A successful registration returns a
//! [`CopyLease`] that removes the entry when dropped, on every exit path.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use staf_proto::copy::{EntryKind, TransferMode};

use crate::clock;

/// Which side of the transfer this daemon is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) enum Direction {
    /// Reading local data and sending it to a peer.
    #[serde(rename = "Outbound")]
    From,
    /// Receiving data from a peer and writing it locally.
    #[serde(rename = "Inbound")]
    To,
}

/// What a caller wants to register.
#[derive(Debug, Clone)]
pub(crate) struct CopyTicket {
    pub(crate) name: PathBuf,
    pub(crate) machine: String,
    pub(crate) direction: Direction,
    pub(crate) kind: EntryKind,
    pub(crate) mode: TransferMode,
    pub(crate) size: u64,
}

#[derive(Debug)]
struct CopyRecord {
    id: u64,
    started_at: String,
    name: PathBuf,
    machine: String,
    direction: Direction,
    kind: EntryKind,
    progress: CopyProgress,
}

/// Mutable progress shared between a lease and registry listings.
#[derive(Debug)]
struct CopyProgress {
    mode: Mutex<TransferMode>,
    size: AtomicU64,
    copied: AtomicU64,
    entry: Mutex<Option<String>>,
}

/// Listing row for one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CopySummary {
    pub(crate) id: u64,
    pub(crate) started_at: String,
    pub(crate) name: String,
    pub(crate) machine: String,
    pub(crate) direction: Direction,
    #[serde(serialize_with = "serialize_kind")]
    pub(crate) kind: EntryKind,
    pub(crate) mode: String,
    pub(crate) size: u64,
    pub(crate) copied: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) entry: Option<String>,
}

fn serialize_kind<S: serde::Serializer>(kind: &EntryKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(match kind {
        EntryKind::File => "File",
        EntryKind::Directory => "Directory",
    })
}

#[derive(Debug, Default)]
struct Entries {
    records: BTreeMap<u64, Arc<CopyRecord>>,
    next_id: u64,
}

/// Every transfer currently running on this daemon.
#[derive(Debug, Default)]
pub(crate) struct CopyRegistry {
    entries: Mutex<Entries>,
}

impl CopyRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a transfer, failing if it conflicts with a running one.
    ///
    /// Two transfers conflict when they name the same normalised path and at
    /// least one of them writes to it.
    pub(crate) fn register(&self, ticket: CopyTicket) -> Option<CopyLease<'_>> {
        let name = normalize(&ticket.name);
        let mut entries = self.entries.lock();
        let conflict = entries.records.values().any(|record| {
            record.name == name
                && (record.direction == Direction::To || ticket.direction == Direction::To)
        });
        if conflict {
            return None;
        }
        entries.next_id += 1;
        let record = Arc::new(CopyRecord {
            id: entries.next_id,
            started_at: clock::now(),
            name,
            machine: ticket.machine,
            direction: ticket.direction,
            kind: ticket.kind,
            progress: CopyProgress {
                mode: Mutex::new(ticket.mode),
                size: AtomicU64::new(ticket.size),
                copied: AtomicU64::new(0),
                entry: Mutex::new(None),
            },
        });
        entries.records.insert(record.id, Arc::clone(&record));
        Some(CopyLease {
            registry: self,
            record,
        })
    }

    /// Removes an entry; unknown ids are ignored.
    pub(crate) fn remove(&self, id: u64) -> bool {
        self.entries.lock().records.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().records.len()
    }

    /// Copies the table out so callers can format it without the lock.
    pub(crate) fn snapshot(&self) -> Vec<CopySummary> {
        let records: Vec<Arc<CopyRecord>> = self.entries.lock().records.values().cloned().collect();
        records.iter().map(|record| summarize(record)).collect()
    }
}

fn summarize(record: &CopyRecord) -> CopySummary {
    CopySummary {
        id: record.id,
        started_at: record.started_at.clone(),
        name: record.name.display().to_string(),
        machine: record.machine.clone(),
        direction: record.direction,
        kind: record.kind,
        mode: record.progress.mode.lock().as_str().to_owned(),
        size: record.progress.size.load(Ordering::Relaxed),
        copied: record.progress.copied.load(Ordering::Relaxed),
        entry: record.progress.entry.lock().clone(),
    }
}

/// Registration held for the duration of one transfer.
#[derive(Debug)]
pub(crate) struct CopyLease<'a> {
    registry: &'a CopyRegistry,
    record: Arc<CopyRecord>,
}

impl CopyLease<'_> {
    pub(crate) fn id(&self) -> u64 {
        self.record.id
    }

    pub(crate) fn set_mode(&self, mode: TransferMode) {
        *self.record.progress.mode.lock() = mode;
    }

    /// Starts a new directory entry, resetting the byte counters.
    pub(crate) fn start_entry(&self, name: &str, mode: TransferMode, size: u64) {
        *self.record.progress.entry.lock() = Some(name.to_owned());
        self.set_mode(mode);
        self.record.progress.size.store(size, Ordering::Relaxed);
        self.record.progress.copied.store(0, Ordering::Relaxed);
    }

    pub(crate) fn set_size(&self, size: u64) {
        self.record.progress.size.store(size, Ordering::Relaxed);
    }

    pub(crate) fn advance(&self, bytes: u64) {
        self.record.progress.copied.fetch_add(bytes, Ordering::Relaxed);
    }
}

impl Drop for CopyLease<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.record.id);
    }
}

/// Lexically normalises a path: drops `.`, folds `..` and trailing
/// separators. Symbolic links are not resolved.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}
