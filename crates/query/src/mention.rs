use ingest::term_runs;
use std::collections::HashSet;

/// Candidate entity mentions in a query: every n-gram of up to `max_ngram`
/// content words, never spanning a stopword or punctuation. Longer
/// mentions come first so "gradient descent" is tried before "gradient".
pub fn extract_mentions(query: &str, max_ngram: usize) -> Vec<String> {
    let max_ngram = max_ngram.max(1);
    let runs = term_runs(query);
    let mut seen = HashSet::new();
    let mut mentions = Vec::new();

    for n in (1..=max_ngram).rev() {
        for run in &runs {
            if run.len() < n {
                continue;
            }
            for window in run.windows(n) {
                let mention = window.join(" ");
                if seen.insert(mention.clone()) {
                    mentions.push(mention);
                }
            }
        }
    }

    mentions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_mentions_first() {
        let mentions = extract_mentions("How does gradient descent work?", 3);
        assert_eq!(mentions[0], "gradient descent work");
        assert!(mentions.iter().position(|m| m == "gradient descent") < mentions.iter().position(|m| m == "gradient"));
    }

    #[test]
    fn test_stopwords_break_mentions() {
        let mentions = extract_mentions("What is dropout?", 3);
        assert_eq!(mentions, vec!["dropout"]);
    }

    #[test]
    fn test_no_duplicates() {
        let mentions = extract_mentions("dropout, dropout", 2);
        assert_eq!(mentions, vec!["dropout"]);
    }

    #[test]
    fn test_blank_query() {
        assert!(extract_mentions("  ?  ", 3).is_empty());
    }
}
