// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use crate::storage::txn::set_txn_auto_gc;

/// Store-level configuration of the finalization path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Delete a finalized transaction record right away when no intents
    /// remain for asynchronous resolution.
    pub txn_auto_gc: bool,
    /// Whether every peer writes the split right-hand side's consensus
    /// hard state downstream of consensus. Until all peers do, the split
    /// trigger synthesizes one upstream so old peers replaying the split
    /// do not crash.
    pub split_hard_state_below_raft: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            txn_auto_gc: true,
            split_hard_state_below_raft: true,
        }
    }
}

impl Config {
    /// Sanity-checks the configuration. Call before [`Config::apply`].
    ///
    /// Peer binary versions cannot be inspected from here, so running
    /// with the hard-state gate off is flagged rather than rejected:
    /// it is only correct while peers lacking the downstream-of-consensus
    /// writer remain in the cluster.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.split_hard_state_below_raft {
            warn!(
                "split hard state will be synthesized upstream of consensus; \
                 turn split-hard-state-below-raft back on once all peers are upgraded"
            );
        }
        Ok(())
    }

    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings {
            split_hard_state_below_raft: self.split_hard_state_below_raft,
        }
    }

    /// Applies the process-wide knobs.
    pub fn apply(&self) {
        set_txn_auto_gc(self.txn_auto_gc);
    }
}

/// The cluster feature gates an evaluation observes. Read-only during
/// evaluation.
#[derive(Clone, Copy, Debug)]
pub struct ClusterSettings {
    pub split_hard_state_below_raft: bool,
}

impl Default for ClusterSettings {
    fn default() -> ClusterSettings {
        Config::default().cluster_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert!(cfg.txn_auto_gc);
        assert!(cfg.cluster_settings().split_hard_state_below_raft);
    }

    #[test]
    fn test_validate() {
        let mut cfg = Config::default();
        cfg.validate().unwrap();
        // Compatibility mode is legal, just noisy.
        cfg.split_hard_state_below_raft = false;
        cfg.validate().unwrap();
        assert!(!cfg.cluster_settings().split_hard_state_below_raft);
    }
}
