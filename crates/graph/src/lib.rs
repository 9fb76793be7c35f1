pub mod knowledge_graph;

pub use knowledge_graph::{EntityNode, GraphStats, KnowledgeGraph, RelatedEntity, RelationEdge};
