//! Rooted version graphs.
//!
//! A graph holds values in insertion order with parent/child links. Version
//! history on a single path is a chain; branching is expressed with
//! [`Graph::add_child`] on an earlier node.

use serde::{Deserialize, Serialize};

/// One node of a [`Graph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode<T> {
    pub value: T,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Rooted graph of values addressed by insertion index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph<T> {
    nodes: Vec<GraphNode<T>>,
}

impl<T> Default for Graph<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T> Graph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain where each value is the child of the previous one.
    pub fn chain(values: impl IntoIterator<Item = T>) -> Self {
        let mut graph = Self::new();
        for value in values {
            match graph.last_added() {
                Some(last) => {
                    graph.add_child(last, value);
                }
                None => {
                    graph.create_root(value);
                }
            }
        }
        graph
    }

    /// Reset the graph to a single root node.
    pub fn create_root(&mut self, value: T) -> usize {
        self.nodes.clear();
        self.nodes.push(GraphNode {
            value,
            parent: None,
            children: Vec::new(),
        });
        0
    }

    /// Append `value` under `parent`, returning the new node index.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not a node of this graph.
    pub fn add_child(&mut self, parent: usize, value: T) -> usize {
        let index = self.nodes.len();
        self.nodes[parent].children.push(index);
        self.nodes.push(GraphNode {
            value,
            parent: Some(parent),
            children: Vec::new(),
        });
        index
    }

    pub fn root(&self) -> Option<&GraphNode<T>> {
        self.nodes.first()
    }

    pub fn last_added(&self) -> Option<usize> {
        self.nodes.len().checked_sub(1)
    }

    pub fn node(&self, index: usize) -> Option<&GraphNode<T>> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.nodes.iter().map(|node| &node.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_links_each_value_to_previous() {
        let graph = Graph::chain([10, 20, 30]);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.root().map(|n| n.value), Some(10));
        assert_eq!(graph.node(1).and_then(|n| n.parent), Some(0));
        assert_eq!(graph.node(1).map(|n| n.children.clone()), Some(vec![2]));
        assert_eq!(graph.values().copied().collect::<Vec<_>>(), vec![10, 20, 30]);
    }

    #[test]
    fn empty_chain_has_no_root() {
        let graph: Graph<u8> = Graph::chain([]);
        assert!(graph.is_empty());
        assert!(graph.root().is_none());
        assert_eq!(graph.last_added(), None);
    }
}
