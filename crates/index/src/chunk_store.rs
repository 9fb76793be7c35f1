use ingest::Chunk;
use std::collections::HashMap;

/// Chunks in insertion (document) order, addressable by id
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk: Chunk) {
        match self.positions.get(&chunk.chunk_id) {
            Some(&pos) => self.chunks[pos] = chunk,
            None => {
                self.positions.insert(chunk.chunk_id.clone(), self.chunks.len());
                self.chunks.push(chunk);
            }
        }
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.positions.get(chunk_id).map(|&pos| &self.chunks[pos])
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.positions.contains_key(chunk_id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }
}
