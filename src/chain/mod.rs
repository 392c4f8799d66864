pub mod builder;
pub mod registry;
pub mod stage;

pub use builder::ChainBuilder;
pub use registry::{StageRegistry, StageSpec};
pub use stage::{FrameContext, Stage};

use tracing::debug;

use crate::context::TaskCategory;

/// One resolved node of the execution chain.
pub struct ExecutionNode {
    pub name: String,
    pub category: TaskCategory,
    pub uses_world: bool,
    pub stage: Box<dyn Stage>,
}

/// The validated, ordered sequence of stage instances built once per run.
/// Owning the nodes in a Vec keeps the no-cycles invariant structural;
/// name resolution only ever happens at build time.
pub struct Chain {
    nodes: Vec<ExecutionNode>,
    task: TaskCategory,
}

impl Chain {
    pub(crate) fn new(nodes: Vec<ExecutionNode>, task: TaskCategory) -> Self {
        Self { nodes, task }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The chain-level classification used for the publish policy.
    pub fn task(&self) -> TaskCategory {
        self.task
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    pub fn nodes_mut(&mut self) -> &mut [ExecutionNode] {
        &mut self.nodes
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        // Stages release in chain order, entry first.
        for node in self.nodes.drain(..) {
            debug!(stage = %node.name, "destroying stage");
        }
    }
}
