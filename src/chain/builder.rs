use indexmap::IndexMap;
use tracing::info;

use crate::chain::registry::StageRegistry;
use crate::chain::{Chain, ExecutionNode};
use crate::config::StageConfig;
use crate::context::TaskCategory;
use crate::error::BuildError;

/// Turns an unordered list of stage configs into a validated linear
/// chain. Adjacency is declared locally per config: the entry stage names
/// itself as predecessor, the terminal names itself as successor, and
/// every other link must resolve to an existing config. Any violation is
/// fatal before the first frame runs.
pub struct ChainBuilder {
    registry: StageRegistry,
}

impl ChainBuilder {
    pub fn new(registry: StageRegistry) -> Self {
        Self { registry }
    }

    /// Build a chain, tearing down `previous` first (stages release in
    /// chain order) when rebuilding mid-run.
    pub fn rebuild(
        &self,
        previous: Option<Chain>,
        configs: &[StageConfig],
    ) -> Result<Chain, BuildError> {
        if let Some(chain) = previous {
            info!(stages = chain.len(), "tearing down previous chain");
            drop(chain);
        }
        self.build(configs)
    }

    pub fn build(&self, configs: &[StageConfig]) -> Result<Chain, BuildError> {
        let ordered = resolve_order(configs)?;

        let mut nodes = Vec::with_capacity(ordered.len());
        let mut task = TaskCategory::None;
        for cfg in ordered {
            let spec = self
                .registry
                .spec(&cfg.kind)
                .ok_or_else(|| BuildError::UnknownKind(cfg.kind.clone()))?;
            let stage = (spec.build)(cfg)?;
            task = spec.category;
            info!(stage = %cfg.name, kind = %cfg.kind, "stage built");
            nodes.push(ExecutionNode {
                name: cfg.name.clone(),
                category: spec.category,
                uses_world: spec.uses_world,
                stage,
            });
        }
        info!(stages = nodes.len(), "all stages built");
        Ok(Chain::new(nodes, task))
    }
}

/// Resolve config adjacency into execution order. Fails on: empty list,
/// duplicate names, zero or multiple entries, dangling successor, a walk
/// that exceeds the config count without reaching a terminal (cycle), or
/// configs left unconsumed by the walk.
fn resolve_order(configs: &[StageConfig]) -> Result<Vec<&StageConfig>, BuildError> {
    if configs.is_empty() {
        return Err(BuildError::Empty);
    }

    let mut by_name: IndexMap<&str, &StageConfig> = IndexMap::with_capacity(configs.len());
    for cfg in configs {
        if by_name.insert(cfg.name.as_str(), cfg).is_some() {
            return Err(BuildError::DuplicateName(cfg.name.clone()));
        }
    }

    let entries: Vec<&StageConfig> = configs.iter().filter(|c| c.prev == c.name).collect();
    let entry = match entries.as_slice() {
        [] => return Err(BuildError::NoEntry),
        [single] => *single,
        multiple => {
            return Err(BuildError::MultipleEntries(
                multiple.iter().map(|c| c.name.clone()).collect(),
            ))
        }
    };

    let mut order = vec![entry];
    let mut current = entry;
    while current.next != current.name {
        if order.len() >= configs.len() {
            return Err(BuildError::NoTerminal(configs.len()));
        }
        let next = by_name
            .get(current.next.as_str())
            .copied()
            .ok_or_else(|| BuildError::DanglingSuccessor {
                from: current.name.clone(),
                to: current.next.clone(),
            })?;
        order.push(next);
        current = next;
    }

    if order.len() != configs.len() {
        return Err(BuildError::Stranded(configs.len() - order.len()));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str, prev: &str, next: &str) -> StageConfig {
        serde_json::from_value(serde_json::json!({
            "name": name, "prev": prev, "next": next, "kind": "capture"
        }))
        .unwrap()
    }

    fn builder() -> ChainBuilder {
        ChainBuilder::new(StageRegistry::with_builtin())
    }

    #[test]
    fn test_two_stage_chain_orders_entry_first() {
        // Config order is deliberately reversed; adjacency decides.
        let configs = vec![cfg("b", "b", "b"), cfg("a", "a", "b")];
        let chain = builder().build(&configs).unwrap();
        assert_eq!(chain.len(), 2);
        let names: Vec<_> = chain.names().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_single_self_referencing_stage() {
        let configs = vec![cfg("a", "a", "a")];
        let chain = builder().build(&configs).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.names().next(), Some("a"));
    }

    #[test]
    fn test_dangling_successor_is_fatal() {
        let configs = vec![cfg("a", "a", "c")];
        assert!(matches!(
            builder().build(&configs),
            Err(BuildError::DanglingSuccessor { .. })
        ));
    }

    #[test]
    fn test_no_entry_is_fatal() {
        let configs = vec![cfg("a", "x", "b"), cfg("b", "a", "b")];
        assert!(matches!(builder().build(&configs), Err(BuildError::NoEntry)));
    }

    #[test]
    fn test_multiple_entries_is_fatal() {
        let configs = vec![cfg("a", "a", "b"), cfg("b", "b", "b")];
        assert!(matches!(
            builder().build(&configs),
            Err(BuildError::MultipleEntries(_))
        ));
    }

    #[test]
    fn test_successor_cycle_is_fatal() {
        let configs = vec![cfg("a", "a", "b"), cfg("b", "a", "c"), cfg("c", "b", "b")];
        assert!(matches!(
            builder().build(&configs),
            Err(BuildError::NoTerminal(3))
        ));
    }

    #[test]
    fn test_stranded_config_is_fatal() {
        let configs = vec![cfg("a", "a", "a"), cfg("b", "a", "b")];
        assert!(matches!(
            builder().build(&configs),
            Err(BuildError::Stranded(1))
        ));
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let configs = vec![cfg("a", "a", "a"), cfg("a", "a", "a")];
        assert!(matches!(
            builder().build(&configs),
            Err(BuildError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let mut bad = cfg("a", "a", "a");
        bad.kind = "kinect".to_string();
        assert!(matches!(
            builder().build(&[bad]),
            Err(BuildError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_empty_config_list_is_fatal() {
        assert!(matches!(builder().build(&[]), Err(BuildError::Empty)));
    }

    #[test]
    fn test_n_node_chain_for_valid_config_sets() {
        for n in 1..6 {
            let mut configs = Vec::new();
            for i in 0..n {
                let name = format!("s{i}");
                let prev = if i == 0 {
                    name.clone()
                } else {
                    format!("s{}", i - 1)
                };
                let next = if i == n - 1 {
                    name.clone()
                } else {
                    format!("s{}", i + 1)
                };
                configs.push(
                    serde_json::from_value(serde_json::json!({
                        "name": name, "prev": prev, "next": next, "kind": "capture"
                    }))
                    .unwrap(),
                );
            }
            let chain = builder().build(&configs).unwrap();
            assert_eq!(chain.len(), n);
        }
    }

    #[test]
    fn test_chain_task_is_last_node_category() {
        let mut configs = vec![cfg("a", "a", "b"), cfg("b", "a", "b")];
        configs[1].kind = "track".to_string();
        configs[1].params = serde_json::json!({ "scale": 0.5 });
        let chain = builder().build(&configs).unwrap();
        assert_eq!(chain.task(), TaskCategory::Detect);
    }

    #[test]
    fn test_rebuild_replaces_previous_chain() {
        let b = builder();
        let first = b.build(&[cfg("a", "a", "a")]).unwrap();
        let second = b
            .rebuild(Some(first), &[cfg("x", "x", "y"), cfg("y", "x", "y")])
            .unwrap();
        assert_eq!(second.len(), 2);
    }
}
