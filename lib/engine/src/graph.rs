//! The variable-sharing graph of a basic graph pattern.
//!
//! One node per triple, an undirected edge wherever two triples share a
//! variable. Triples whose subject is a context variable (text operations)
//! form cliques that are collapsed into synthesized text nodes before
//! planning.

use std::collections::{BTreeMap, BTreeSet};
use triplan_common::{BitSet64, PlanResult, PlanningError};
use triplan_model::vocab::ql;
use triplan_model::{Literal, SparqlTriple, TermPattern, Variable};

/// A node of the [TripleGraph]: a source triple or a collapsed text clique.
#[derive(Debug, Clone)]
pub struct TripleGraphNode {
    pub id: usize,
    pub triple: SparqlTriple,
    pub variables: BTreeSet<Variable>,
    /// The context variable of a collapsed text clique.
    pub context_variable: Option<Variable>,
    /// The concatenated word parts of the clique's `ql:contains-word`
    /// triples.
    pub word_part: Option<String>,
}

impl TripleGraphNode {
    fn from_triple(id: usize, triple: SparqlTriple) -> Self {
        let variables = triple.variables().into_iter().collect();
        Self {
            id,
            triple,
            variables,
            context_variable: None,
            word_part: None,
        }
    }

    pub fn is_text_node(&self) -> bool {
        self.context_variable.is_some()
    }

    /// Equality apart from the node id.
    pub fn is_similar(&self, other: &Self) -> bool {
        self.triple == other.triple
            && self.context_variable == other.context_variable
            && self.word_part == other.word_part
            && self.variables == other.variables
    }
}

/// The variable-sharing graph over the triples of one basic graph pattern.
#[derive(Debug, Clone)]
pub struct TripleGraph {
    nodes: Vec<TripleGraphNode>,
    adjacency: Vec<Vec<usize>>,
    context_variables: BTreeSet<Variable>,
}

impl TripleGraph {
    /// Builds the graph for `triples`. `context_variables` are the subjects
    /// of text operations as marked by the parsed query; they drive the
    /// text-clique collapse.
    pub fn build(
        triples: &[SparqlTriple],
        context_variables: &BTreeSet<Variable>,
    ) -> PlanResult<Self> {
        if triples.len() > BitSet64::CAPACITY {
            return Err(PlanningError::structural(format!(
                "basic graph pattern has {} triples, the planner supports at most {}",
                triples.len(),
                BitSet64::CAPACITY
            )));
        }
        let nodes: Vec<TripleGraphNode> = triples
            .iter()
            .enumerate()
            .map(|(id, triple)| TripleGraphNode::from_triple(id, triple.clone()))
            .collect();
        let adjacency = adjacency_from_variables(&nodes);
        Ok(Self {
            nodes,
            adjacency,
            context_variables: context_variables.clone(),
        })
    }

    pub fn nodes(&self) -> &[TripleGraphNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn adjacent(&self, node: usize) -> &[usize] {
        &self.adjacency[node]
    }

    /// True iff some node of `a` has an edge to some node of `b`.
    pub fn are_connected_sets(&self, a: BitSet64, b: BitSet64) -> bool {
        a.iter()
            .any(|u| self.adjacency[u].iter().any(|v| b.contains(*v)))
    }

    /// True iff every node is a collapsed text clique.
    pub fn is_pure_text_query(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(TripleGraphNode::is_text_node)
    }

    /// The nodes reachable from `start` when the `excluded` nodes are removed
    /// from the graph. Contains `start` unless it is excluded.
    pub fn bfs_leave_out(&self, start: usize, excluded: BitSet64) -> BitSet64 {
        let mut reached = BitSet64::EMPTY;
        if start >= self.nodes.len() || excluded.contains(start) {
            return reached;
        }
        let mut queue = vec![start];
        reached.insert(start);
        while let Some(node) = queue.pop() {
            for &next in &self.adjacency[node] {
                if !excluded.contains(next) && !reached.contains(next) {
                    reached.insert(next);
                    queue.push(next);
                }
            }
        }
        reached
    }

    /// The connected components of the graph, each as a node set.
    pub fn connected_components(&self) -> Vec<BitSet64> {
        let mut components = Vec::new();
        let mut visited = BitSet64::EMPTY;
        for start in 0..self.nodes.len() {
            if visited.contains(start) {
                continue;
            }
            let component = self.bfs_leave_out(start, visited);
            visited = visited | component;
            components.push(component);
        }
        components
    }

    /// Merges each text clique into one synthesized node and rebuilds the
    /// adjacency. Returns the mapping from old node ids to new ones (`None`
    /// for nodes absorbed into a text node). Idempotent.
    pub fn collapse_text_cliques(&mut self) -> PlanResult<Vec<Option<usize>>> {
        let identity: Vec<Option<usize>> = (0..self.nodes.len()).map(Some).collect();
        if self.context_variables.is_empty() {
            return Ok(identity);
        }

        // Group the clique members per context variable; reject context
        // variables leaking outside their clique, which would break the
        // collapse invariant.
        let mut cliques: BTreeMap<Variable, Vec<usize>> = BTreeMap::new();
        for node in &self.nodes {
            if node.is_text_node() {
                continue;
            }
            let subject_context = match &node.triple.subject {
                TermPattern::Variable(v) if self.context_variables.contains(v) => Some(v),
                _ => None,
            };
            match subject_context {
                Some(context) => {
                    cliques.entry(context.clone()).or_default().push(node.id);
                }
                None => {
                    for variable in &node.variables {
                        if self.context_variables.contains(variable) {
                            return Err(PlanningError::structural(format!(
                                "context variable {variable} is used outside its text clique"
                            )));
                        }
                    }
                }
            }
        }
        if cliques.is_empty() {
            return Ok(identity);
        }

        let mut mapping: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut new_nodes: Vec<TripleGraphNode> = Vec::new();
        let absorbed: BitSet64 = cliques.values().flatten().copied().collect();
        for node in &self.nodes {
            if !absorbed.contains(node.id) {
                let new_id = new_nodes.len();
                mapping[node.id] = Some(new_id);
                let mut kept = node.clone();
                kept.id = new_id;
                new_nodes.push(kept);
            }
        }

        for (context, members) in &cliques {
            let mut word_parts: Vec<&str> = Vec::new();
            let mut variables = BTreeSet::new();
            for &member in members {
                let node = &self.nodes[member];
                if let Some(word) = node.triple.word_part() {
                    word_parts.push(word);
                }
                variables.extend(node.variables.iter().cloned());
            }
            if word_parts.is_empty() {
                return Err(PlanningError::structural(format!(
                    "text clique of {context} has no ql:contains-word triple"
                )));
            }
            let word_part = word_parts.join(" ");

            let id = new_nodes.len();
            let triple = SparqlTriple::new(
                context.clone(),
                ql::TEXT_MATCH.into_owned(),
                TermPattern::Literal(Literal::new_simple_literal(word_part.clone())),
            );
            new_nodes.push(TripleGraphNode {
                id,
                triple,
                variables,
                context_variable: Some(context.clone()),
                word_part: Some(word_part),
            });
        }

        self.nodes = new_nodes;
        self.adjacency = adjacency_from_variables(&self.nodes);
        Ok(mapping)
    }

    /// Graph isomorphism ignoring node ids. Only used by tests.
    pub fn is_similar(&self, other: &TripleGraph) -> bool {
        if self.nodes.len() != other.nodes.len() {
            return false;
        }
        let mut assignment = vec![usize::MAX; self.nodes.len()];
        let mut used = vec![false; self.nodes.len()];
        self.match_nodes(other, 0, &mut assignment, &mut used)
    }

    fn match_nodes(
        &self,
        other: &TripleGraph,
        position: usize,
        assignment: &mut Vec<usize>,
        used: &mut Vec<bool>,
    ) -> bool {
        if position == self.nodes.len() {
            return true;
        }
        for candidate in 0..other.nodes.len() {
            if used[candidate] || !self.nodes[position].is_similar(&other.nodes[candidate]) {
                continue;
            }
            // Edges towards already-assigned nodes must agree.
            let edges_match = (0..position).all(|earlier| {
                let self_edge = self.adjacency[position].contains(&earlier);
                let other_edge = other.adjacency[candidate].contains(&assignment[earlier]);
                self_edge == other_edge
            });
            if !edges_match {
                continue;
            }
            assignment[position] = candidate;
            used[candidate] = true;
            if self.match_nodes(other, position + 1, assignment, used) {
                return true;
            }
            used[candidate] = false;
            assignment[position] = usize::MAX;
        }
        false
    }
}

fn adjacency_from_variables(nodes: &[TripleGraphNode]) -> Vec<Vec<usize>> {
    let mut adjacency = vec![Vec::new(); nodes.len()];
    for u in 0..nodes.len() {
        for v in u + 1..nodes.len() {
            if !nodes[u].variables.is_disjoint(&nodes[v].variables) {
                adjacency[u].push(v);
                adjacency[v].push(u);
            }
        }
    }
    adjacency
}
