//! rendered documents per revision
//!
//! One lock guards the revision -> slot map and is only held to look up or remove a slot. Every slot has its own
//! lock which is held for the duration of a render, so concurrent callers asking for the same revision wait for the
//! first one and share its result. Failed renders leave nothing behind.
use crate::document::Document;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type RevisionId = u64;

pub type Rendered = Arc<Vec<Document>>;

#[derive(Debug)]
struct Entry {
    documents: Rendered,
    inserted: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    entry: Mutex<Option<Entry>>,
}

#[derive(Debug)]
pub struct RenderCache {
    enabled: bool,
    ttl: Option<Duration>,
    slots: Mutex<HashMap<RevisionId, Arc<Slot>>>,
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(true, None)
    }
}

impl RenderCache {
    /// `ttl` of `None` keeps entries until they are invalidated
    pub fn new(enabled: bool, ttl: Option<Duration>) -> Self {
        Self {
            enabled,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_fresh(&self, entry: &Entry) -> bool {
        self.ttl.map_or(true, |ttl| entry.inserted.elapsed() < ttl)
    }

    fn slot(&self, revision_id: RevisionId) -> Arc<Slot> {
        self.slots.lock().entry(revision_id).or_default().clone()
    }

    /// Cached documents of `revision_id` or the result of `render`, which is cached on success
    ///
    /// At most one `render` per revision runs at a time.
    pub fn get_or_try_insert_with<E>(
        &self,
        revision_id: RevisionId,
        render: impl FnOnce() -> Result<Rendered, E>,
    ) -> Result<Rendered, E> {
        if !self.enabled {
            return render();
        }

        loop {
            let slot = self.slot(revision_id);
            let mut entry = slot.entry.lock();

            // invalidated while waiting for the lock
            if !self.is_current(revision_id, &slot) {
                continue;
            }

            if let Some(cached) = entry.as_ref().filter(|cached| self.is_fresh(cached)) {
                tracing::info!(revision_id, "render cache hit");
                return Ok(cached.documents.clone());
            }

            tracing::debug!(revision_id, "render cache miss");
            return match render() {
                Ok(documents) => {
                    *entry = Some(Entry {
                        documents: documents.clone(),
                        inserted: Instant::now(),
                    });
                    Ok(documents)
                }
                Err(err) => {
                    *entry = None;
                    drop(entry);
                    self.remove_slot(revision_id, &slot);
                    Err(err)
                }
            };
        }
    }

    fn is_current(&self, revision_id: RevisionId, slot: &Arc<Slot>) -> bool {
        self.slots
            .lock()
            .get(&revision_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn remove_slot(&self, revision_id: RevisionId, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock();
        if slots
            .get(&revision_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(&revision_id);
        }
    }

    /// Cached documents without rendering, waits for a render of the same revision in flight
    pub fn get(&self, revision_id: RevisionId) -> Option<Rendered> {
        if !self.enabled {
            return None;
        }

        let slot = self.slots.lock().get(&revision_id).cloned()?;
        let entry = slot.entry.lock();
        entry
            .as_ref()
            .filter(|cached| self.is_fresh(cached))
            .map(|cached| cached.documents.clone())
    }

    pub fn invalidate_one(&self, revision_id: RevisionId) {
        if self.slots.lock().remove(&revision_id).is_some() {
            tracing::info!(revision_id, "render cache entry invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        let mut slots = self.slots.lock();
        let count = slots.len();
        slots.clear();
        tracing::info!(count, "render cache cleared");
    }

    /// Revisions that are cached or being rendered
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
