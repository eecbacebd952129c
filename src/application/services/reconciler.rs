//! Turns two configuration snapshots into lifecycle operations

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::infrastructure::config::Snapshot;

/// One step that brings the running plugin set closer to a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum LifecycleOp {
    Load { name: String, config: Value },
    Reload { name: String, config: Value },
    Unload { name: String },
}

impl LifecycleOp {
    pub fn name(&self) -> &str {
        match self {
            LifecycleOp::Load { name, .. } | LifecycleOp::Reload { name, .. } | LifecycleOp::Unload { name } => name,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            LifecycleOp::Unload { .. } => 0,
            LifecycleOp::Reload { .. } => 1,
            LifecycleOp::Load { .. } => 2,
        }
    }
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleOp::Load { name, config } => write!(f, "load {} {}", name, config),
            LifecycleOp::Reload { name, config } => write!(f, "reload {} {}", name, config),
            LifecycleOp::Unload { name } => write!(f, "unload {}", name),
        }
    }
}

/// Operations plus whether the change also needs a process restart
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcilePlan {
    pub ops: Vec<LifecycleOp>,
    pub restart_required: bool,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Diff the plugin sections of two snapshots.
///
/// Unloads come first so a name freed by one plugin can be claimed by a
/// plugin loaded in the same pass; within each group names are sorted.
pub fn reconcile(old: &Snapshot, new: &Snapshot) -> Vec<LifecycleOp> {
    let names: BTreeSet<&String> = old.plugins.keys().chain(new.plugins.keys()).collect();
    let mut ops = Vec::new();

    for name in names {
        let before = old.plugins.get(name).filter(|e| e.enabled);
        let after = new.plugins.get(name).filter(|e| e.enabled);

        match (before, after) {
            (None, Some(entry)) => ops.push(LifecycleOp::Load {
                name: name.clone(),
                config: entry.config.clone(),
            }),
            (Some(prev), Some(next)) if prev.config != next.config => ops.push(LifecycleOp::Reload {
                name: name.clone(),
                config: next.config.clone(),
            }),
            (Some(_), None) => ops.push(LifecycleOp::Unload { name: name.clone() }),
            _ => {}
        }
    }

    ops.sort_by_key(LifecycleOp::rank);
    ops
}

pub fn plan(old: &Snapshot, new: &Snapshot) -> ReconcilePlan {
    ReconcilePlan {
        ops: reconcile(old, new),
        restart_required: old.bot != new.bot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::PluginEntry;
    use serde_json::json;

    fn snapshot(entries: &[(&str, PluginEntry)]) -> Snapshot {
        entries
            .iter()
            .fold(Snapshot::default(), |s, (name, entry)| s.with_plugin(*name, entry.clone()))
    }

    #[test]
    fn test_equal_snapshots_yield_nothing() {
        let s = snapshot(&[("p1", PluginEntry::enabled(json!({"x": 1})))]);
        assert!(reconcile(&s, &s.clone()).is_empty());
    }

    #[test]
    fn test_new_plugin_loads_once() {
        let old = Snapshot::default();
        let new = snapshot(&[("p1", PluginEntry::enabled(json!({"x": 1})))]);
        assert_eq!(
            reconcile(&old, &new),
            vec![LifecycleOp::Load {
                name: "p1".to_string(),
                config: json!({"x": 1})
            }]
        );
    }

    #[test]
    fn test_changed_config_reloads() {
        let old = snapshot(&[("p1", PluginEntry::enabled(json!({"x": 1})))]);
        let new = snapshot(&[("p1", PluginEntry::enabled(json!({"x": 2})))]);
        assert_eq!(
            reconcile(&old, &new),
            vec![LifecycleOp::Reload {
                name: "p1".to_string(),
                config: json!({"x": 2})
            }]
        );
    }

    #[test]
    fn test_removed_plugin_unloads() {
        let old = snapshot(&[("p1", PluginEntry::enabled(json!({"x": 1})))]);
        assert_eq!(
            reconcile(&old, &Snapshot::default()),
            vec![LifecycleOp::Unload { name: "p1".to_string() }]
        );
    }

    #[test]
    fn test_disabled_counts_as_absent() {
        let off = snapshot(&[("p1", PluginEntry::disabled(json!({"x": 1})))]);
        let on = snapshot(&[("p1", PluginEntry::enabled(json!({"x": 1})))]);

        assert!(reconcile(&Snapshot::default(), &off).is_empty());
        assert!(reconcile(&off, &snapshot(&[("p1", PluginEntry::disabled(json!({"x": 9})))])).is_empty());
        assert_eq!(reconcile(&off, &on).len(), 1);
        assert!(matches!(reconcile(&on, &off)[0], LifecycleOp::Unload { .. }));
    }

    #[test]
    fn test_unloads_ordered_before_loads() {
        let old = snapshot(&[
            ("b", PluginEntry::enabled(json!(1))),
            ("c", PluginEntry::enabled(json!(1))),
        ]);
        let new = snapshot(&[
            ("a", PluginEntry::enabled(json!(1))),
            ("c", PluginEntry::enabled(json!(2))),
        ]);
        let ops: Vec<String> = reconcile(&old, &new).iter().map(|op| op.to_string()).collect();
        assert_eq!(ops, vec!["unload b", "reload c 2", "load a 1"]);
    }

    #[test]
    fn test_bot_change_requires_restart() {
        let old = Snapshot::default();
        let mut new = Snapshot::default();
        new.bot.prefix = "!".to_string();
        let plan = plan(&old, &new);
        assert!(plan.is_empty());
        assert!(plan.restart_required);
    }
}
