//! In-process record of requests the store may not reflect yet.
//!
//! The orchestrator writes here as stages start and finish; the tracker reads
//! it to report a source as `Embedding` before `Source.embedded` flips, and to
//! list transformations still in flight. The ledger also enforces at most one
//! ingestion or retry per source id at a time.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Local knowledge about the last embed request for a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum EmbedRecord {
    #[default]
    None,
    /// Request issued, no answer yet.
    InFlight,
    /// Service accepted the request; indexing runs in the background.
    Accepted,
    Failed,
}

#[derive(Debug, Default, Clone)]
struct SourceRecord {
    embed: EmbedRecord,
    transforms_in_flight: BTreeSet<String>,
    busy: bool,
}

impl SourceRecord {
    fn is_idle(&self) -> bool {
        !self.busy && self.embed == EmbedRecord::None && self.transforms_in_flight.is_empty()
    }
}

/// Read-only copy of a source's record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RecordSnapshot {
    pub embed: EmbedRecord,
    pub transforms_in_flight: BTreeSet<String>,
}

/// Shared, cheaply cloneable ledger handle.
#[derive(Debug, Clone, Default)]
pub(crate) struct Ledger {
    inner: Arc<Mutex<HashMap<String, SourceRecord>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SourceRecord>> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim exclusive pipeline access to `source_id`. `None` if already claimed.
    pub fn claim(&self, source_id: &str) -> Option<SourceClaim> {
        let mut records = self.lock();
        let record = records.entry(source_id.to_string()).or_default();
        if record.busy {
            return None;
        }
        record.busy = true;
        Some(SourceClaim {
            ledger: self.clone(),
            source_id: source_id.to_string(),
        })
    }

    fn release(&self, source_id: &str) {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(source_id) {
            record.busy = false;
        }
        prune(&mut records, source_id);
    }

    pub fn embed_started(&self, source_id: &str) {
        self.lock().entry(source_id.to_string()).or_default().embed = EmbedRecord::InFlight;
    }

    pub fn embed_finished(&self, source_id: &str, accepted: bool) {
        self.lock().entry(source_id.to_string()).or_default().embed = if accepted {
            EmbedRecord::Accepted
        } else {
            EmbedRecord::Failed
        };
    }

    /// The store reports the source as embedded; local tracking is no longer needed.
    pub fn embed_observed(&self, source_id: &str) {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(source_id) {
            record.embed = EmbedRecord::None;
        }
        prune(&mut records, source_id);
    }

    pub fn transform_started(&self, source_id: &str, transformation_id: &str) {
        self.lock()
            .entry(source_id.to_string())
            .or_default()
            .transforms_in_flight
            .insert(transformation_id.to_string());
    }

    pub fn transform_finished(&self, source_id: &str, transformation_id: &str) {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(source_id) {
            record.transforms_in_flight.remove(transformation_id);
        }
        prune(&mut records, source_id);
    }

    pub fn snapshot(&self, source_id: &str) -> RecordSnapshot {
        self.lock()
            .get(source_id)
            .map(|r| RecordSnapshot {
                embed: r.embed,
                transforms_in_flight: r.transforms_in_flight.clone(),
            })
            .unwrap_or_default()
    }

    /// Drop everything known about a deleted source, except an active claim.
    pub fn forget(&self, source_id: &str) {
        let mut records = self.lock();
        match records.get_mut(source_id) {
            Some(record) if record.busy => {
                record.embed = EmbedRecord::None;
                record.transforms_in_flight.clear();
            }
            Some(_) => {
                records.remove(source_id);
            }
            None => {}
        }
    }

    /// Number of sources with a record.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }
}

fn prune(records: &mut HashMap<String, SourceRecord>, source_id: &str) {
    if records.get(source_id).is_some_and(SourceRecord::is_idle) {
        records.remove(source_id);
    }
}

/// Exclusive access to one source's pipeline stages; released on drop.
#[derive(Debug)]
pub(crate) struct SourceClaim {
    ledger: Ledger,
    source_id: String,
}

impl Drop for SourceClaim {
    fn drop(&mut self) {
        self.ledger.release(&self.source_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let ledger = Ledger::new();
        let claim = ledger.claim("source:1").expect("first claim");
        assert!(ledger.claim("source:1").is_none());
        assert!(ledger.claim("source:2").is_some());
        drop(claim);
        assert!(ledger.claim("source:1").is_some());
    }

    #[test]
    fn embed_lifecycle() {
        let ledger = Ledger::new();
        ledger.embed_started("s");
        assert_eq!(ledger.snapshot("s").embed, EmbedRecord::InFlight);
        ledger.embed_finished("s", true);
        assert_eq!(ledger.snapshot("s").embed, EmbedRecord::Accepted);
        ledger.embed_observed("s");
        assert_eq!(ledger.snapshot("s").embed, EmbedRecord::None);

        ledger.embed_started("s");
        ledger.embed_finished("s", false);
        assert_eq!(ledger.snapshot("s").embed, EmbedRecord::Failed);
    }

    #[test]
    fn transforms_in_flight_are_tracked() {
        let ledger = Ledger::new();
        ledger.transform_started("s", "t1");
        ledger.transform_started("s", "t2");
        ledger.transform_finished("s", "t1");
        let snap = ledger.snapshot("s");
        assert_eq!(snap.transforms_in_flight.len(), 1);
        assert!(snap.transforms_in_flight.contains("t2"));
    }

    #[test]
    fn idle_records_are_dropped_on_release() {
        let ledger = Ledger::new();
        drop(ledger.claim("s"));
        assert!(ledger.lock().is_empty());

        let claim = ledger.claim("s");
        ledger.embed_started("s");
        drop(claim);
        assert_eq!(ledger.snapshot("s").embed, EmbedRecord::InFlight);
    }

    #[test]
    fn observed_embed_drops_idle_record() {
        let ledger = Ledger::new();
        ledger.embed_started("s");
        ledger.embed_finished("s", true);
        ledger.embed_observed("s");
        assert_eq!(ledger.tracked(), 0);

        let claim = ledger.claim("s");
        ledger.embed_started("s");
        ledger.embed_observed("s");
        assert_eq!(ledger.tracked(), 1);
        drop(claim);
        assert_eq!(ledger.tracked(), 0);
    }

    #[test]
    fn finished_transform_drops_idle_record() {
        let ledger = Ledger::new();
        ledger.transform_started("s", "t1");
        ledger.transform_finished("s", "t1");
        assert_eq!(ledger.tracked(), 0);
    }

    #[test]
    fn forget_keeps_active_claim() {
        let ledger = Ledger::new();
        let _claim = ledger.claim("s");
        ledger.embed_finished("s", false);
        ledger.forget("s");
        assert_eq!(ledger.snapshot("s"), RecordSnapshot::default());
        assert!(ledger.claim("s").is_none());
    }
}
