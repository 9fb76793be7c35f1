use std::collections::{BTreeSet, HashMap};
use unicode_segmentation::UnicodeSegmentation;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as",
    "at", "be", "because", "been", "before", "being", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "doing", "down", "during", "each", "explain", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me", "more", "most",
    "my", "no", "nor", "not", "of", "off", "on", "once", "only", "or", "other", "our", "out",
    "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "used", "uses", "using", "very", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// CJK ideographs carry no whitespace between words, so they are handled as
/// their own unit class by both the chunker and the keyword tokenizer.
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{30FF}')
}

fn is_meaningful(word: &str) -> bool {
    if !word.chars().any(char::is_alphabetic) {
        return false;
    }
    word.chars().count() >= 2
}

/// Split text into runs of consecutive content terms.
///
/// A run is broken by punctuation, stopwords and bare numbers, so each run
/// approximates a noun phrase. Terms are lowercased; adjacent CJK
/// ideographs are merged into a single term.
pub fn term_runs(text: &str) -> Vec<Vec<String>> {
    let mut runs = Vec::new();
    let mut run: Vec<String> = Vec::new();
    let mut cjk = String::new();

    for segment in text.split_word_bounds() {
        if segment.chars().all(is_cjk) {
            cjk.push_str(segment);
            continue;
        }
        if !cjk.is_empty() {
            run.push(std::mem::take(&mut cjk));
        }
        if segment.chars().all(char::is_whitespace) {
            continue;
        }

        let word = segment.to_lowercase();
        if !is_stopword(&word) && is_meaningful(&word) {
            run.push(word);
        } else if !run.is_empty() {
            runs.push(std::mem::take(&mut run));
        }
    }

    if !cjk.is_empty() {
        run.push(cjk);
    }
    if !run.is_empty() {
        runs.push(run);
    }

    runs
}

/// Lowercased content terms in reading order
pub fn content_terms(text: &str) -> Vec<String> {
    term_runs(text).into_iter().flatten().collect()
}

/// Top `limit` content terms by frequency; ties resolve alphabetically.
pub fn extract_keywords(text: &str, limit: usize) -> BTreeSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for term in content_terms(text) {
        *counts.entry(term).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    ranked.into_iter().take(limit).map(|(term, _)| term).collect()
}
