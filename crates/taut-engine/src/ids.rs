use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::warn;

use taut_core::{InfoHash, RpcId};

/// Bidirectional `InfoHash ↔ RpcId` map plus the id allocator.
///
/// Both directions are updated together, so the map is a bijection at every
/// observable moment. `next_id` stays strictly greater than every id ever
/// handed out, including ids recovered from persistence.
#[derive(Debug, Default)]
pub struct IdMap {
    by_hash: HashMap<InfoHash, RpcId>,
    by_id: HashMap<RpcId, InfoHash>,
    next_id: RpcId,
    dirty: bool,
}

impl IdMap {
    /// An empty map whose allocator starts at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
            by_id: HashMap::new(),
            next_id: 1,
            dirty: false,
        }
    }

    /// Idempotent id assignment. The zero hash gets the sentinel id 0;
    /// a known hash gets its existing id; anything else allocates.
    pub fn assign(&mut self, hash: InfoHash) -> RpcId {
        if hash.is_zero() {
            return 0;
        }
        if let Some(id) = self.by_hash.get(&hash) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.bind(hash, id);
        self.dirty = true;
        id
    }

    /// Replay `(hex, id)` pairs recovered from persistence. Recovered
    /// bindings are honored verbatim; malformed or conflicting entries are
    /// skipped with a warning. Call once, before any assignment.
    pub fn recover(&mut self, pairs: &[(String, RpcId)]) {
        for (hex, id) in pairs {
            let Ok(hash) = InfoHash::from_hex(hex) else {
                warn!(hex, "skipping unparseable info-hash in recovered id map");
                continue;
            };
            if *id == 0 || hash.is_zero() {
                warn!(hex, id, "skipping degenerate recovered id binding");
                continue;
            }
            if let Some(existing) = self.by_id.get(id) {
                if *existing != hash {
                    warn!(
                        hex,
                        id,
                        bound_to = %existing,
                        "skipping recovered binding whose id is already taken"
                    );
                }
                continue;
            }
            self.bind(hash, *id);
            if *id >= self.next_id {
                self.next_id = *id + 1;
            }
        }
    }

    /// Remove every binding whose id is absent from `seen`; returns the
    /// removed pairs so the caller can reap dependent state.
    pub fn purge_missing(&mut self, seen: &HashSet<RpcId>) -> Vec<(RpcId, InfoHash)> {
        let stale: Vec<RpcId> = self
            .by_id
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(hash) = self.by_id.remove(&id) {
                self.by_hash.remove(&hash);
                removed.push((id, hash));
            }
        }
        if !removed.is_empty() {
            self.dirty = true;
        }
        removed.sort_by_key(|(id, _)| *id);
        removed
    }

    /// Current id of `hash`, if bound.
    #[must_use]
    pub fn id_of(&self, hash: &InfoHash) -> Option<RpcId> {
        self.by_hash.get(hash).copied()
    }

    /// Current hash behind `id`, if bound.
    #[must_use]
    pub fn hash_of(&self, id: RpcId) -> Option<InfoHash> {
        self.by_id.get(&id).copied()
    }

    /// Export as the persisted `hex → id` map.
    #[must_use]
    pub fn export(&self) -> BTreeMap<String, RpcId> {
        self.by_hash
            .iter()
            .map(|(hash, id)| (hash.to_hex(), *id))
            .collect()
    }

    /// Number of live bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Whether no bindings exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// The next id the allocator would hand out.
    #[must_use]
    pub fn next_id(&self) -> RpcId {
        self.next_id
    }

    /// Whether bindings changed since the last call; clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    // Re-binding a hash removes the prior id from the inverse map before
    // the new binding lands, keeping the bijection intact.
    fn bind(&mut self, hash: InfoHash, id: RpcId) {
        if let Some(old_id) = self.by_hash.insert(hash, id) {
            self.by_id.remove(&old_id);
        }
        self.by_id.insert(id, hash);
    }
}
