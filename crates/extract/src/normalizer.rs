use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// `Name (X)` with ASCII or full-width parentheses
static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*[(（]([^()（）]+)[)）]\s*$").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const DETERMINERS: [&str; 3] = ["the", "an", "a"];

/// A canonicalised entity mention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEntity {
    /// Graph key: folded and alias-resolved
    pub key: String,
    /// Surface form as first written, whitespace collapsed
    pub display: String,
}

/// Maps raw entity mentions onto canonical graph keys.
///
/// Folding lowercases, turns punctuation into spaces (keeping `+`, `#`, `-`
/// so `C++` and `t-SNE` survive), collapses whitespace and strips a leading
/// English determiner. On top of that an alias table maps alternative names
/// to a canonical key. Aliases come from configuration and from
/// parenthetical abbreviations such as `Convolutional Neural Network (CNN)`.
/// Any other parenthetical, as in `Adam (optimizer)`, is a descriptor and is
/// dropped.
pub struct EntityNormalizer {
    /// Maps folded alias -> canonical key
    aliases: HashMap<String, String>,
}

impl EntityNormalizer {
    pub fn new() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    /// Seed the alias table from `(alias, canonical)` pairs
    pub fn with_aliases<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut normalizer = Self::new();
        for (alias, canonical) in aliases {
            let canonical = fold(canonical.as_ref());
            normalizer.register_alias(alias.as_ref(), &canonical);
        }
        normalizer
    }

    /// Normalize a mention seen during ingestion, learning a parenthetical
    /// abbreviation as an alias.
    /// Returns `None` when nothing is left after folding.
    pub fn normalize(&mut self, name: &str) -> Option<NormalizedEntity> {
        let name = name.trim();
        let (main, alias) = match PARENTHETICAL.captures(name) {
            Some(caps) => {
                let main = caps.get(1).map_or("", |m| m.as_str());
                let alias = caps.get(2).map_or("", |m| m.as_str());
                if fold(main).is_empty() {
                    (alias, None)
                } else {
                    (main, Some(alias))
                }
            }
            None => (name, None),
        };

        let folded = fold(main);
        if folded.is_empty() {
            return None;
        }
        let key = self.resolve(&folded);

        if let Some(alias) = alias.filter(|alias| is_abbreviation(alias, main)) {
            self.register_alias(alias, &key);
        }

        Some(NormalizedEntity {
            key,
            display: WHITESPACE.replace_all(main.trim(), " ").to_string(),
        })
    }

    /// Key for a lookup-time mention; never learns aliases
    pub fn lookup_key(&self, mention: &str) -> String {
        self.resolve(&fold(mention))
    }

    pub fn resolve(&self, folded: &str) -> String {
        self.aliases
            .get(folded)
            .cloned()
            .unwrap_or_else(|| folded.to_string())
    }

    fn register_alias(&mut self, alias: &str, canonical_key: &str) {
        let alias = fold(alias);
        if alias.is_empty() || alias == canonical_key {
            return;
        }
        // First mapping wins so keys stay stable across a rebuild
        self.aliases
            .entry(alias)
            .or_insert_with(|| canonical_key.to_string());
    }

    /// Get the mapping of all aliases
    pub fn aliases(&self) -> &HashMap<String, String> {
        &self.aliases
    }
}

impl Default for EntityNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `short` reads as an abbreviation of `full`: a single token that
/// either takes its letters in order from `full` starting at its first
/// letter (`CNN`, `ReLU`), or is an all-caps acronym for a name written in
/// another script.
fn is_abbreviation(short: &str, full: &str) -> bool {
    let short = short.trim();
    if short.is_empty() || short.chars().any(char::is_whitespace) {
        return false;
    }

    let letters: Vec<char> = short
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    let full_letters: Vec<char> = full
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    if letters.is_empty() || letters.len() >= full_letters.len() {
        return false;
    }

    if !full.chars().any(|c| c.is_ascii_alphabetic()) {
        return short
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(|c| c.is_ascii_uppercase());
    }

    if full_letters.first() != letters.first() {
        return false;
    }
    let mut remaining = full_letters.iter();
    letters.iter().all(|c| remaining.any(|f| f == c))
}

/// Case, punctuation and whitespace folding shared by entities and lookups
pub fn fold(name: &str) -> String {
    let lowered: String = strip_determiner(name.trim())
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '+' | '#' | '-') {
                c
            } else {
                ' '
            }
        })
        .collect();
    WHITESPACE.replace_all(lowered.trim(), " ").to_string()
}

/// Drops a leading `the`, `a` or `an` only when it stands as a whole word,
/// so `A* Search` and `A/B Testing` keep their first letter.
fn strip_determiner(name: &str) -> &str {
    for determiner in DETERMINERS {
        let Some(head) = name.get(..determiner.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(determiner) {
            continue;
        }
        let rest = &name[determiner.len()..];
        if rest.starts_with(char::is_whitespace) && !rest.trim().is_empty() {
            return rest.trim_start();
        }
    }
    name
}

/// Relations compare by folded form joined with underscores, so
/// `Related to` and `related_to` are the same edge label.
pub fn normalize_relation(relation: &str) -> String {
    fold_relation(relation).join("_")
}

fn fold_relation(relation: &str) -> Vec<String> {
    relation
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
