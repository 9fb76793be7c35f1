use graph::KnowledgeGraph;
use index::DocumentIndex;

/// The queryable state: chunk/vector index plus concept graph.
///
/// Built whole by ingestion and then only read. Swapping in a new value is
/// how updates become visible, so a reader never sees a half-built one.
#[derive(Default)]
pub struct KnowledgeBase {
    index: DocumentIndex,
    graph: KnowledgeGraph,
}

impl KnowledgeBase {
    pub fn new(index: DocumentIndex, graph: KnowledgeGraph) -> Self {
        Self { index, graph }
    }

    pub fn index(&self) -> &DocumentIndex {
        &self.index
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty() && self.graph.is_empty()
    }
}
