use ingest::Chunk;
use serde::{Deserialize, Serialize};

/// How chunks are chosen for LLM extraction.
///
/// Extraction costs one model call per chunk, so only a fraction of a
/// document is sent. The policy decides which fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// Evenly spaced chunks across the document
    EveryNth,
    /// Chunks with the most distinct keywords per token
    KeywordDensity,
    /// Every chunk, ignoring the fraction
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Share of chunks to extract from, in `[0, 1]`
    pub fraction: f64,
    pub policy: SamplingPolicy,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            fraction: 0.3,
            policy: SamplingPolicy::EveryNth,
        }
    }
}

impl SamplingConfig {
    /// Number of chunks to pick out of `total`. Rounds up so any non-zero
    /// fraction extracts at least one chunk.
    pub fn sample_size(&self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        if self.policy == SamplingPolicy::All || self.fraction >= 1.0 {
            return total;
        }
        if self.fraction <= 0.0 {
            return 0;
        }
        // Epsilon keeps exact products such as 10 * 0.3 from rounding up
        ((total as f64 * self.fraction - 1e-9).ceil() as usize).clamp(1, total)
    }

    /// Pick chunks for extraction, returned in document order
    pub fn select<'a>(&self, chunks: &'a [Chunk]) -> Vec<&'a Chunk> {
        let total = chunks.len();
        let count = self.sample_size(total);
        if count == total {
            return chunks.iter().collect();
        }

        let mut picked: Vec<usize> = match self.policy {
            SamplingPolicy::EveryNth | SamplingPolicy::All => {
                (0..count).map(|i| i * total / count).collect()
            }
            SamplingPolicy::KeywordDensity => {
                let mut ranked: Vec<usize> = (0..total).collect();
                ranked.sort_by(|&a, &b| {
                    chunks[b]
                        .keyword_density()
                        .total_cmp(&chunks[a].keyword_density())
                        .then(a.cmp(&b))
                });
                ranked.truncate(count);
                ranked
            }
        };

        picked.sort_unstable();
        picked.into_iter().map(|i| &chunks[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::Position;

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new("doc", i, t.to_string(), Position { page: 1, start: 0, end: t.len() }))
            .collect()
    }

    #[test]
    fn test_sample_size_rounds_up() {
        let config = SamplingConfig::default();
        assert_eq!(config.sample_size(0), 0);
        assert_eq!(config.sample_size(1), 1);
        assert_eq!(config.sample_size(10), 3);
        assert_eq!(config.sample_size(11), 4);
    }

    #[test]
    fn test_zero_fraction_selects_nothing() {
        let config = SamplingConfig { fraction: 0.0, policy: SamplingPolicy::EveryNth };
        assert!(config.select(&chunks(&["a b", "c d"])).is_empty());
    }

    #[test]
    fn test_every_nth_spreads_across_document() {
        let texts: Vec<String> = (0..10).map(|i| format!("chunk number{}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let all = chunks(&refs);

        let config = SamplingConfig { fraction: 0.3, policy: SamplingPolicy::EveryNth };
        let ordinals: Vec<usize> = config.select(&all).iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 3, 6]);
    }

    #[test]
    fn test_keyword_density_prefers_dense_chunks() {
        let all = chunks(&[
            "the the the the the the the the the the overfitting",
            "dropout regularization overfitting gradient",
            "of and the to a in is",
        ]);
        let config = SamplingConfig { fraction: 0.3, policy: SamplingPolicy::KeywordDensity };
        let picked = config.select(&all);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].ordinal, 1);
    }

    #[test]
    fn test_all_policy_ignores_fraction() {
        let all = chunks(&["a b", "c d", "e f"]);
        let config = SamplingConfig { fraction: 0.1, policy: SamplingPolicy::All };
        assert_eq!(config.select(&all).len(), 3);

        let config = SamplingConfig { fraction: 0.0, policy: SamplingPolicy::All };
        assert_eq!(config.select(&all).len(), 3);
    }
}
