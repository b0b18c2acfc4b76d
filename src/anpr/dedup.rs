use std::collections::HashMap;

/// Per-camera duplicate suppression over a sliding time window.
///
/// Keys are `plate || floor(now / 5s)`, so a vehicle sitting in front of
/// the camera yields one event per 5-second bucket at most, while a
/// re-entry minutes later reads again. Entries older than `MAX_AGE_MS`
/// are pruned once per `PRUNE_EVERY_MS`.
pub struct DedupFilter {
    seen: HashMap<String, u64>,
    last_prune_ms: u64,
}

const BUCKET_MS: u64 = 5_000;
const MAX_AGE_MS: u64 = 30_000;
const PRUNE_EVERY_MS: u64 = 60_000;

impl DedupFilter {
    pub fn new() -> Self {
        Self {
            seen: HashMap::new(),
            last_prune_ms: 0,
        }
    }

    /// Returns true when the plate is fresh for the current bucket and
    /// records it; false when it is a duplicate to suppress.
    pub fn admit(&mut self, plate: &str, now_ms: u64) -> bool {
        self.maybe_prune(now_ms);
        let key = format!("{}|{}", plate, now_ms / BUCKET_MS);
        match self.seen.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(now_ms);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn maybe_prune(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_prune_ms) < PRUNE_EVERY_MS {
            return;
        }
        self.last_prune_ms = now_ms;
        self.seen
            .retain(|_, inserted| now_ms.saturating_sub(*inserted) <= MAX_AGE_MS);
    }
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new()
    }
}
