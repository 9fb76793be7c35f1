use extract::normalizer::fold;
use extract::{EntityNormalizer, NormalizedEntity, Triple, normalize_relation};
use ingest::keywords::is_cjk;
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::debug;

/// Shortest mention that may match an entity by substring
const MIN_FUZZY_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    /// Canonical key (folded, alias-resolved)
    pub name: String,
    /// Surface form of the first mention
    pub label: String,
    pub mention_count: usize,
    pub source_chunk_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub relation: String,
    /// Number of times this exact (head, relation, tail) was observed
    pub weight: usize,
    pub source_chunk_ids: BTreeSet<String>,
}

/// An entity reached from a start entity, with the shortest path to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub name: String,
    pub label: String,
    pub hop_distance: usize,
    /// Entity names from the start entity to this one, inclusive
    pub path: Vec<String>,
    /// Relation labels along `path`
    pub relations: Vec<String>,
    pub mention_count: usize,
    pub source_chunk_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
}

/// Directed multigraph of entities and relations built from triples.
///
/// Parallel edges between the same pair are allowed when their relations
/// differ; re-observing an identical triple bumps the edge weight instead.
pub struct KnowledgeGraph {
    graph: DiGraph<EntityNode, RelationEdge>,
    node_index: HashMap<String, NodeIndex>,
    normalizer: EntityNormalizer,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::with_normalizer(EntityNormalizer::new())
    }

    pub fn with_normalizer(normalizer: EntityNormalizer) -> Self {
        Self {
            graph: DiGraph::new(),
            node_index: HashMap::new(),
            normalizer,
        }
    }

    pub fn from_triples<'a, I>(triples: I, normalizer: EntityNormalizer) -> Self
    where
        I: IntoIterator<Item = &'a Triple>,
    {
        let mut graph = Self::with_normalizer(normalizer);
        graph.add_triples(triples);
        graph
    }

    /// Upsert nodes and edges for a batch of triples; returns how many were accepted.
    ///
    /// Aliases declared anywhere in the batch are learned before any node is
    /// created, so `CNN` and `Convolutional Neural Network (CNN)` land on the
    /// same node regardless of order.
    pub fn add_triples<'a, I>(&mut self, triples: I) -> usize
    where
        I: IntoIterator<Item = &'a Triple>,
    {
        let batch: Vec<&Triple> = triples.into_iter().collect();
        for triple in &batch {
            self.normalizer.normalize(&triple.head);
            self.normalizer.normalize(&triple.tail);
        }

        let accepted = batch.iter().filter(|t| self.add_triple(t)).count();
        debug!(
            triples = batch.len(),
            accepted,
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "Added triples to knowledge graph"
        );
        accepted
    }

    fn add_triple(&mut self, triple: &Triple) -> bool {
        let relation = normalize_relation(&triple.relation);
        let (Some(head), Some(tail)) = (
            self.normalizer.normalize(&triple.head),
            self.normalizer.normalize(&triple.tail),
        ) else {
            return false;
        };
        if relation.is_empty() || head.key == tail.key {
            return false;
        }

        let chunk_id = &triple.source_chunk_id;
        let h = self.upsert_node(head, chunk_id);
        let t = self.upsert_node(tail, chunk_id);

        let existing: Option<EdgeIndex> = self
            .graph
            .edges_connecting(h, t)
            .find(|e| e.weight().relation == relation)
            .map(|e| e.id());

        match existing {
            Some(edge) => {
                let edge = &mut self.graph[edge];
                edge.weight += 1;
                edge.source_chunk_ids.insert(chunk_id.clone());
            }
            None => {
                self.graph.add_edge(
                    h,
                    t,
                    RelationEdge {
                        relation,
                        weight: 1,
                        source_chunk_ids: BTreeSet::from([chunk_id.clone()]),
                    },
                );
            }
        }
        true
    }

    fn upsert_node(&mut self, entity: NormalizedEntity, chunk_id: &str) -> NodeIndex {
        let idx = match self.node_index.get(&entity.key) {
            Some(&idx) => idx,
            None => {
                let idx = self.graph.add_node(EntityNode {
                    name: entity.key.clone(),
                    label: entity.display,
                    mention_count: 0,
                    source_chunk_ids: BTreeSet::new(),
                });
                self.node_index.insert(entity.key, idx);
                idx
            }
        };

        let node = &mut self.graph[idx];
        node.mention_count += 1;
        node.source_chunk_ids.insert(chunk_id.to_string());
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Node by canonical key
    pub fn entity(&self, name: &str) -> Option<&EntityNode> {
        self.node_index.get(name).map(|&idx| &self.graph[idx])
    }

    /// All edges as (head, relation, tail)
    pub fn edges(&self) -> impl Iterator<Item = (&EntityNode, &RelationEdge, &EntityNode)> {
        self.graph
            .edge_references()
            .map(|e| (&self.graph[e.source()], e.weight(), &self.graph[e.target()]))
    }

    /// Map a raw mention to a node: exact normalized match, then alias, then
    /// word-bounded substring match. `None` is an ordinary outcome.
    pub fn find_entity(&self, raw_mention: &str) -> Option<&EntityNode> {
        let key = fold(raw_mention);
        if key.is_empty() {
            return None;
        }
        if let Some(idx) = self.locate(&key) {
            return Some(&self.graph[idx]);
        }
        if key.chars().count() < MIN_FUZZY_CHARS {
            return None;
        }

        let key_len = key.chars().count();
        self.node_index
            .iter()
            .filter(|(name, _)| {
                name.chars().count() >= MIN_FUZZY_CHARS
                    && (contains_term(name, &key) || contains_term(&key, name))
            })
            .map(|(_, &idx)| &self.graph[idx])
            .min_by(|a, b| {
                let diff_a = a.name.chars().count().abs_diff(key_len);
                let diff_b = b.name.chars().count().abs_diff(key_len);
                diff_a
                    .cmp(&diff_b)
                    .then(b.mention_count.cmp(&a.mention_count))
                    .then(a.name.cmp(&b.name))
            })
    }

    /// Entities whose name appears verbatim (word-bounded) in `text`, longest first
    pub fn entities_mentioned_in(&self, text: &str) -> Vec<&EntityNode> {
        let folded = fold(text);
        let mut found: Vec<&EntityNode> = self
            .graph
            .node_weights()
            .filter(|node| node.name.chars().count() >= 2 && contains_term(&folded, &node.name))
            .collect();
        found.sort_by(|a, b| {
            b.name
                .chars()
                .count()
                .cmp(&a.name.chars().count())
                .then(a.name.cmp(&b.name))
        });
        found
    }

    /// Every entity within `max_hops` of `entity`, following edges in both
    /// directions, excluding `entity` itself.
    pub fn neighbors(&self, entity: &str, max_hops: usize) -> BTreeSet<String> {
        self.neighborhood(entity, max_hops)
            .into_iter()
            .map(|related| related.name)
            .collect()
    }

    /// Breadth-first expansion from `entity` up to `max_hops`, annotated with
    /// hop distance and path. Sorted by hop distance, then mention count, then name.
    pub fn neighborhood(&self, entity: &str, max_hops: usize) -> Vec<RelatedEntity> {
        let Some(start) = self.locate(entity) else {
            return Vec::new();
        };

        // node -> (hops, parent, edge used to reach it)
        let mut visited: HashMap<NodeIndex, (usize, Option<(NodeIndex, EdgeIndex)>)> = HashMap::new();
        visited.insert(start, (0, None));
        let mut queue = VecDeque::from([(start, 0usize)]);

        while let Some((node, hops)) = queue.pop_front() {
            if hops >= max_hops {
                continue;
            }
            let outgoing = self.graph.edges_directed(node, Direction::Outgoing);
            let incoming = self.graph.edges_directed(node, Direction::Incoming);
            for edge in outgoing.chain(incoming) {
                let next = if edge.source() == node {
                    edge.target()
                } else {
                    edge.source()
                };
                if visited.contains_key(&next) {
                    continue;
                }
                visited.insert(next, (hops + 1, Some((node, edge.id()))));
                queue.push_back((next, hops + 1));
            }
        }

        let mut related: Vec<RelatedEntity> = visited
            .iter()
            .filter(|(idx, _)| **idx != start)
            .map(|(&idx, &(hops, _))| {
                let (path, relations) = self.trace_path(&visited, idx);
                let node = &self.graph[idx];
                RelatedEntity {
                    name: node.name.clone(),
                    label: node.label.clone(),
                    hop_distance: hops,
                    path,
                    relations,
                    mention_count: node.mention_count,
                    source_chunk_ids: node.source_chunk_ids.clone(),
                }
            })
            .collect();

        related.sort_by(|a, b| {
            a.hop_distance
                .cmp(&b.hop_distance)
                .then(b.mention_count.cmp(&a.mention_count))
                .then(a.name.cmp(&b.name))
        });
        related
    }

    /// Node for an entity given as canonical key, raw mention or alias
    fn locate(&self, entity: &str) -> Option<NodeIndex> {
        if let Some(&idx) = self.node_index.get(entity) {
            return Some(idx);
        }
        let folded = fold(entity);
        self.node_index
            .get(&folded)
            .or_else(|| self.node_index.get(&self.normalizer.resolve(&folded)))
            .copied()
    }

    fn trace_path(
        &self,
        visited: &HashMap<NodeIndex, (usize, Option<(NodeIndex, EdgeIndex)>)>,
        target: NodeIndex,
    ) -> (Vec<String>, Vec<String>) {
        let mut path = vec![self.graph[target].name.clone()];
        let mut relations = Vec::new();
        let mut current = target;

        while let Some(&(_, Some((parent, edge)))) = visited.get(&current) {
            relations.push(self.graph[edge].relation.clone());
            path.push(self.graph[parent].name.clone());
            current = parent;
        }

        path.reverse();
        relations.reverse();
        (path, relations)
    }
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Substring match that must not cut through a word. CJK text has no
/// word separators, so any position next to an ideograph counts as a boundary.
fn contains_term(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    let first = needle.chars().next();
    let last = needle.chars().next_back();

    haystack.match_indices(needle).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + needle.len()..].chars().next();
        is_boundary(before, first) && is_boundary(after, last)
    })
}

fn is_boundary(neighbor: Option<char>, edge: Option<char>) -> bool {
    match (neighbor, edge) {
        (None, _) | (_, None) => true,
        (Some(n), Some(e)) => !n.is_alphanumeric() || is_cjk(n) || is_cjk(e),
    }
}
