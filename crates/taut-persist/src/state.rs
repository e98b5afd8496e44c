use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use taut_core::{RpcId, SessionSettings};

/// The single durable state document, `state.json`.
///
/// Settings keys sit at the top level; the engine-owned maps ride along
/// under their own keys so one flush captures everything: settings, rpc-id
/// bindings, labels, and bandwidth priorities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// Durable session settings, flattened to the document's top level.
    #[serde(flatten)]
    pub settings: SessionSettings,
    /// `hex(info-hash) → rpc id` bindings.
    pub rpc_ids: BTreeMap<String, RpcId>,
    /// Per-torrent user labels, keyed by rpc id.
    pub labels: BTreeMap<RpcId, Vec<String>>,
    /// Per-torrent bandwidth priorities, keyed by rpc id.
    pub priorities: BTreeMap<RpcId, i32>,
}

impl PersistedState {
    /// The recovered `(hex, id)` pairs in deterministic order, for
    /// replaying into the id allocator at startup.
    #[must_use]
    pub fn rpc_id_pairs(&self) -> Vec<(String, RpcId)> {
        self.rpc_ids
            .iter()
            .map(|(hex, id)| (hex.clone(), *id))
            .collect()
    }
}

/// Outcome of loading `state.json` at startup.
#[derive(Debug, Clone)]
pub struct LoadedState {
    /// The decoded document, or defaults when the file was absent.
    pub state: PersistedState,
    /// Whether a state file existed on disk.
    pub existed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_keys_flatten_to_top_level() {
        let mut state = PersistedState::default();
        state.settings.peer_limit = 99;
        state.rpc_ids.insert("aa".repeat(20), 1);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["peer_limit"], 99);
        assert_eq!(json["rpc_ids"][&"aa".repeat(20)], 1);
        assert!(json.get("settings").is_none());
    }

    #[test]
    fn empty_document_yields_defaults() {
        let state: PersistedState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.settings, SessionSettings::default());
        assert!(state.rpc_ids.is_empty());
        assert!(state.labels.is_empty());
    }

    #[test]
    fn maps_round_trip_with_integer_keys() {
        let mut state = PersistedState::default();
        state.labels.insert(3, vec!["tv".into(), "archive".into()]);
        state.priorities.insert(3, -1);
        let json = serde_json::to_string(&state).unwrap();
        let back: PersistedState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
