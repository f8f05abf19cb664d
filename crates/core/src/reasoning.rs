use std::collections::{BTreeSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::graph::{ContextEdge, ContextNode, DecisionTrace, EntityRef, NodeId};

/// Read side of the context graph storage.
#[async_trait]
pub trait GraphReader: Send + Sync {
    type Error: Send;

    async fn node_by_id(&self, id: &NodeId) -> Result<Option<ContextNode>, Self::Error>;

    async fn node_by_entity(&self, entity: &EntityRef)
        -> Result<Option<ContextNode>, Self::Error>;

    async fn edges_from(&self, id: &NodeId) -> Result<Vec<ContextEdge>, Self::Error>;

    async fn edges_to(&self, id: &NodeId) -> Result<Vec<ContextEdge>, Self::Error>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectedNode {
    pub node: ContextNode,
    /// Hop count from the root node.
    pub depth: usize,
    /// Every edge touching this node, outgoing first.
    pub edges: Vec<ContextEdge>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningChain {
    pub root: Option<ContextNode>,
    pub traces: Vec<DecisionTrace>,
    pub connected_nodes: Vec<ConnectedNode>,
}

impl ReasoningChain {
    pub fn is_empty(&self) -> bool {
        self.root.is_none() && self.traces.is_empty()
    }
}

/// Breadth-first walk over incoming and outgoing edges from `start`, up to
/// `max_depth` hops. Each node is emitted once, in visit order.
///
/// Nodes are marked visited when enqueued, so cycles and diamonds never
/// enqueue the same node twice. Edges pointing at missing nodes are kept on
/// the surviving endpoint but the missing node itself is skipped.
pub async fn connected_nodes<R>(
    reader: &R,
    start: &NodeId,
    max_depth: usize,
) -> Result<Vec<ConnectedNode>, R::Error>
where
    R: GraphReader + ?Sized,
{
    let mut visited = BTreeSet::from([start.clone()]);
    let mut queue = VecDeque::from([(start.clone(), 0usize)]);
    let mut ordered = Vec::new();

    while let Some((current, depth)) = queue.pop_front() {
        let Some(node) = reader.node_by_id(&current).await? else {
            continue;
        };

        let mut edges = reader.edges_from(&current).await?;
        let mut seen_edges = edges.iter().map(|edge| edge.id.clone()).collect::<BTreeSet<_>>();
        for edge in reader.edges_to(&current).await? {
            if seen_edges.insert(edge.id.clone()) {
                edges.push(edge);
            }
        }

        if depth < max_depth {
            for edge in &edges {
                if let Some(neighbor) = edge.other_end(&current) {
                    if visited.insert(neighbor.clone()) {
                        queue.push_back((neighbor.clone(), depth + 1));
                    }
                }
            }
        }

        ordered.push(ConnectedNode { node, depth, edges });
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::convert::Infallible;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::{connected_nodes, GraphReader};
    use crate::domain::graph::{ContextEdge, ContextNode, EdgeId, EntityRef, NodeId};

    #[derive(Default)]
    struct FixtureGraph {
        nodes: HashMap<NodeId, ContextNode>,
        edges: Vec<ContextEdge>,
    }

    impl FixtureGraph {
        fn node(mut self, id: &str) -> Self {
            let node = ContextNode {
                id: NodeId(id.to_string()),
                node_type: "person".to_string(),
                entity_id: id.to_string(),
                label: id.to_uppercase(),
                summary: None,
                created_at: Utc::now(),
            };
            self.nodes.insert(node.id.clone(), node);
            self
        }

        fn edge(mut self, from: &str, to: &str) -> Self {
            self.edges.push(ContextEdge {
                id: EdgeId(format!("{from}->{to}-{}", self.edges.len())),
                from_node_id: NodeId(from.to_string()),
                to_node_id: NodeId(to.to_string()),
                edge_type: "references".to_string(),
                reasoning: None,
                weight: 1.0,
                created_at: Utc::now(),
            });
            self
        }
    }

    #[async_trait]
    impl GraphReader for FixtureGraph {
        type Error = Infallible;

        async fn node_by_id(&self, id: &NodeId) -> Result<Option<ContextNode>, Infallible> {
            Ok(self.nodes.get(id).cloned())
        }

        async fn node_by_entity(
            &self,
            entity: &EntityRef,
        ) -> Result<Option<ContextNode>, Infallible> {
            Ok(self
                .nodes
                .values()
                .find(|node| {
                    node.node_type == entity.entity_type && node.entity_id == entity.entity_id
                })
                .cloned())
        }

        async fn edges_from(&self, id: &NodeId) -> Result<Vec<ContextEdge>, Infallible> {
            Ok(self.edges.iter().filter(|edge| &edge.from_node_id == id).cloned().collect())
        }

        async fn edges_to(&self, id: &NodeId) -> Result<Vec<ContextEdge>, Infallible> {
            Ok(self.edges.iter().filter(|edge| &edge.to_node_id == id).cloned().collect())
        }
    }

    fn ids(nodes: &[super::ConnectedNode]) -> Vec<&str> {
        nodes.iter().map(|connected| connected.node.id.0.as_str()).collect()
    }

    #[tokio::test]
    async fn traversal_terminates_on_cycle_and_visits_each_node_once() {
        let graph = FixtureGraph::default().node("a").node("b").edge("a", "b").edge("b", "a");

        let nodes = connected_nodes(&graph, &NodeId("a".to_string()), 2).await.unwrap();

        assert_eq!(ids(&nodes), vec!["a", "b"]);
        assert_eq!(nodes[0].edges.len(), 2);
        assert_eq!(nodes[1].depth, 1);
    }

    #[tokio::test]
    async fn traversal_follows_incoming_edges_and_respects_depth() {
        let graph = FixtureGraph::default()
            .node("a")
            .node("b")
            .node("c")
            .node("d")
            .edge("b", "a")
            .edge("c", "b")
            .edge("d", "c");

        let nodes = connected_nodes(&graph, &NodeId("a".to_string()), 2).await.unwrap();

        assert_eq!(ids(&nodes), vec!["a", "b", "c"]);
        assert_eq!(nodes.iter().map(|node| node.depth).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn depth_zero_returns_only_root_with_its_edges() {
        let graph = FixtureGraph::default().node("a").node("b").edge("a", "b");

        let nodes = connected_nodes(&graph, &NodeId("a".to_string()), 0).await.unwrap();

        assert_eq!(ids(&nodes), vec!["a"]);
        assert_eq!(nodes[0].edges.len(), 1);
    }

    #[tokio::test]
    async fn diamond_and_self_loop_do_not_duplicate() {
        let graph = FixtureGraph::default()
            .node("a")
            .node("b")
            .node("c")
            .node("d")
            .edge("a", "b")
            .edge("a", "c")
            .edge("b", "d")
            .edge("c", "d")
            .edge("d", "d");

        let nodes = connected_nodes(&graph, &NodeId("a".to_string()), 5).await.unwrap();

        assert_eq!(ids(&nodes), vec!["a", "b", "c", "d"]);
        let d = nodes.iter().find(|node| node.node.id.0 == "d").unwrap();
        assert_eq!(d.edges.len(), 3);
    }

    #[tokio::test]
    async fn dangling_edge_endpoint_is_skipped() {
        let graph = FixtureGraph::default().node("a").edge("a", "ghost");

        let nodes = connected_nodes(&graph, &NodeId("a".to_string()), 3).await.unwrap();

        assert_eq!(ids(&nodes), vec!["a"]);
    }
}
