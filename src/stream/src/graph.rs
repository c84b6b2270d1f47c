// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The module graphs. Operators live in an arena owned by the graph;
//! edges go parent→child only and are checked for cycles at build time.
//! Traversal is depth-first in declared sibling order and single-threaded
//! per input element.

use matchflow_common::error::ConfigError;
use smallvec::SmallVec;

use crate::element::StreamElement;

pub type NodeId = usize;

type Children = SmallVec<[NodeId; 2]>;

/// A per-element operator. Implementations own their state-store handles
/// and must not touch shared state outside of them. Errors are handled at
/// the operator boundary (log, drop the element, keep state), which is why
/// this returns plain output lists.
pub trait Module: Send {
    fn name(&self) -> &str;

    fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement>;
}

/// A window-graph start operator: takes no input and produces seed
/// elements on each tick.
pub trait WindowModule: Send {
    fn name(&self) -> &str;

    fn on_tick(&mut self, now_millis: i64) -> Vec<StreamElement>;
}

struct GraphNode {
    module: Box<dyn Module>,
    children: Children,
}

/// DAG of per-element operators with one or more start nodes.
pub struct ModuleGraph {
    nodes: Vec<GraphNode>,
    starts: Vec<NodeId>,
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("starts", &self.starts)
            .finish_non_exhaustive()
    }
}

impl ModuleGraph {
    pub fn builder() -> ModuleGraphBuilder {
        ModuleGraphBuilder::default()
    }

    /// Run one element through the graph. Returns every produced
    /// `Output`-category element in traversal order; `Internal` elements
    /// are forwarded to children but never collected.
    pub fn process(&mut self, element: &StreamElement) -> Vec<StreamElement> {
        let mut emitted = Vec::new();
        let starts = self.starts.clone();
        for start in starts {
            self.process_node(start, element, &mut emitted);
        }
        emitted
    }

    fn process_node(&mut self, id: NodeId, element: &StreamElement, emitted: &mut Vec<StreamElement>) {
        let outputs = self.nodes[id].module.process_element(element);
        let children = self.nodes[id].children.clone();
        for output in outputs {
            if !collect_output(&output, self.nodes[id].module.name(), emitted) {
                continue;
            }
            for &child in &children {
                self.process_node(child, &output, emitted);
            }
        }
    }
}

/// Appends publishable outputs to the egress batch. Raw-input emission is
/// a programming error: logged, and the element neither collected nor
/// forwarded.
fn collect_output(output: &StreamElement, module: &str, emitted: &mut Vec<StreamElement>) -> bool {
    match output.category {
        crate::element::Category::RawInput => {
            tracing::error!(
                module,
                stream = %output.stream_name,
                "operator emitted a RAW_INPUT element, dropping"
            );
            false
        }
        crate::element::Category::Internal => true,
        crate::element::Category::Output => {
            emitted.push(output.clone());
            true
        }
    }
}

#[derive(Default)]
pub struct ModuleGraphBuilder {
    nodes: Vec<GraphNode>,
    starts: Vec<NodeId>,
}

impl ModuleGraphBuilder {
    pub fn add_module(&mut self, module: Box<dyn Module>) -> NodeId {
        self.nodes.push(GraphNode {
            module,
            children: Children::new(),
        });
        self.nodes.len() - 1
    }

    /// Convenience: add a module and register it as a graph start.
    pub fn add_start(&mut self, module: Box<dyn Module>) -> NodeId {
        let id = self.add_module(module);
        self.starts.push(id);
        id
    }

    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> Result<(), ConfigError> {
        if parent >= self.nodes.len() || child >= self.nodes.len() {
            return Err(ConfigError::InvalidModule(format!(
                "edge {}→{} references unknown node",
                parent, child
            )));
        }
        self.nodes[parent].children.push(child);
        Ok(())
    }

    pub fn build(self) -> Result<ModuleGraph, ConfigError> {
        if self.starts.is_empty() {
            return Err(ConfigError::InvalidModule(
                "module graph needs at least one start".into(),
            ));
        }
        check_acyclic(self.nodes.iter().map(|n| n.children.as_slice()))?;
        Ok(ModuleGraph {
            nodes: self.nodes,
            starts: self.starts,
        })
    }
}

struct WindowStart {
    module: Box<dyn WindowModule>,
    children: Children,
}

/// DAG invoked on the periodic timer. Start operators produce seed
/// elements; their descendants are ordinary [`Module`]s.
pub struct WindowGraph {
    starts: Vec<WindowStart>,
    nodes: Vec<GraphNode>,
}

impl WindowGraph {
    pub fn builder() -> WindowGraphBuilder {
        WindowGraphBuilder::default()
    }

    pub fn on_tick(&mut self, now_millis: i64) -> Vec<StreamElement> {
        let mut emitted = Vec::new();
        for start_idx in 0..self.starts.len() {
            let seeds = self.starts[start_idx].module.on_tick(now_millis);
            let children = self.starts[start_idx].children.clone();
            for seed in seeds {
                if !collect_output(&seed, self.starts[start_idx].module.name(), &mut emitted) {
                    continue;
                }
                for &child in &children {
                    self.process_node(child, &seed, &mut emitted);
                }
            }
        }
        emitted
    }

    fn process_node(&mut self, id: NodeId, element: &StreamElement, emitted: &mut Vec<StreamElement>) {
        let outputs = self.nodes[id].module.process_element(element);
        let children = self.nodes[id].children.clone();
        for output in outputs {
            if !collect_output(&output, self.nodes[id].module.name(), emitted) {
                continue;
            }
            for &child in &children {
                self.process_node(child, &output, emitted);
            }
        }
    }
}

#[derive(Default)]
pub struct WindowGraphBuilder {
    starts: Vec<WindowStart>,
    nodes: Vec<GraphNode>,
}

impl WindowGraphBuilder {
    pub fn add_start(&mut self, module: Box<dyn WindowModule>) -> usize {
        self.starts.push(WindowStart {
            module,
            children: Children::new(),
        });
        self.starts.len() - 1
    }

    pub fn add_module(&mut self, module: Box<dyn Module>) -> NodeId {
        self.nodes.push(GraphNode {
            module,
            children: Children::new(),
        });
        self.nodes.len() - 1
    }

    pub fn add_start_edge(&mut self, start: usize, child: NodeId) -> Result<(), ConfigError> {
        if start >= self.starts.len() || child >= self.nodes.len() {
            return Err(ConfigError::InvalidModule(format!(
                "start edge {}→{} references unknown node",
                start, child
            )));
        }
        self.starts[start].children.push(child);
        Ok(())
    }

    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> Result<(), ConfigError> {
        if parent >= self.nodes.len() || child >= self.nodes.len() {
            return Err(ConfigError::InvalidModule(format!(
                "edge {}→{} references unknown node",
                parent, child
            )));
        }
        self.nodes[parent].children.push(child);
        Ok(())
    }

    pub fn build(self) -> Result<WindowGraph, ConfigError> {
        check_acyclic(self.nodes.iter().map(|n| n.children.as_slice()))?;
        Ok(WindowGraph {
            starts: self.starts,
            nodes: self.nodes,
        })
    }
}

/// Three-colour DFS over the child lists.
fn check_acyclic<'a>(children: impl Iterator<Item = &'a [NodeId]>) -> Result<(), ConfigError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    let adjacency: Vec<Vec<NodeId>> = children.map(<[NodeId]>::to_vec).collect();
    let mut marks = vec![Mark::White; adjacency.len()];

    fn visit(
        node: NodeId,
        adjacency: &[Vec<NodeId>],
        marks: &mut [Mark],
    ) -> Result<(), ConfigError> {
        match marks[node] {
            Mark::Black => return Ok(()),
            Mark::Grey => {
                return Err(ConfigError::InvalidModule(format!(
                    "module graph contains a cycle through node {}",
                    node
                )))
            }
            Mark::White => {}
        }
        marks[node] = Mark::Grey;
        for &child in &adjacency[node] {
            visit(child, adjacency, marks)?;
        }
        marks[node] = Mark::Black;
        Ok(())
    }

    for node in 0..adjacency.len() {
        visit(node, &adjacency, &mut marks)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::element::Category;

    /// Re-emits its input on a renamed stream, optionally switching the
    /// category.
    struct Relabel {
        name: String,
        category: Category,
    }

    impl Relabel {
        fn boxed(name: &str, category: Category) -> Box<dyn Module> {
            Box::new(Self {
                name: name.to_string(),
                category,
            })
        }
    }

    impl Module for Relabel {
        fn name(&self) -> &str {
            &self.name
        }

        fn process_element(&mut self, element: &StreamElement) -> Vec<StreamElement> {
            let mut out = element.clone();
            out.stream_name = format!("{}/{}", element.stream_name, self.name);
            out.category = self.category;
            vec![out]
        }
    }

    fn input() -> StreamElement {
        StreamElement::new("in", "k", 0, Category::RawInput)
    }

    #[test]
    fn test_traversal_order_and_child_sees_parent_output() {
        let mut builder = ModuleGraph::builder();
        let root = builder.add_start(Relabel::boxed("root", Category::Output));
        let left = builder.add_module(Relabel::boxed("left", Category::Output));
        let right = builder.add_module(Relabel::boxed("right", Category::Output));
        builder.add_edge(root, left).unwrap();
        builder.add_edge(root, right).unwrap();
        let mut graph = builder.build().unwrap();

        let streams: Vec<String> = graph
            .process(&input())
            .into_iter()
            .map(|e| e.stream_name)
            .collect();
        // Depth-first, siblings in declared order, children fed the
        // parent's output.
        assert_eq!(streams, vec!["in/root", "in/root/left", "in/root/right"]);
    }

    #[test]
    fn test_internal_elements_are_forwarded_but_not_collected() {
        let mut builder = ModuleGraph::builder();
        let root = builder.add_start(Relabel::boxed("internal", Category::Internal));
        let child = builder.add_module(Relabel::boxed("out", Category::Output));
        builder.add_edge(root, child).unwrap();
        let mut graph = builder.build().unwrap();

        let streams: Vec<String> = graph
            .process(&input())
            .into_iter()
            .map(|e| e.stream_name)
            .collect();
        assert_eq!(streams, vec!["in/internal/out"]);
    }

    #[test]
    fn test_raw_input_emission_is_dropped() {
        let mut builder = ModuleGraph::builder();
        let root = builder.add_start(Relabel::boxed("bad", Category::RawInput));
        let child = builder.add_module(Relabel::boxed("out", Category::Output));
        builder.add_edge(root, child).unwrap();
        let mut graph = builder.build().unwrap();

        assert!(graph.process(&input()).is_empty());
    }

    #[test]
    fn test_cycles_rejected() {
        let mut builder = ModuleGraph::builder();
        let a = builder.add_start(Relabel::boxed("a", Category::Output));
        let b = builder.add_module(Relabel::boxed("b", Category::Output));
        builder.add_edge(a, b).unwrap();
        builder.add_edge(b, a).unwrap();
        assert_matches!(builder.build(), Err(ConfigError::InvalidModule(_)));
    }

    #[test]
    fn test_unknown_edge_rejected() {
        let mut builder = ModuleGraph::builder();
        let a = builder.add_start(Relabel::boxed("a", Category::Output));
        assert_matches!(
            builder.add_edge(a, 99),
            Err(ConfigError::InvalidModule(_))
        );
    }

    #[test]
    fn test_empty_graph_rejected() {
        assert_matches!(
            ModuleGraph::builder().build(),
            Err(ConfigError::InvalidModule(_))
        );
    }
}
