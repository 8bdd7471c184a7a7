// 🔤 Name Normalizer - strip legal-form suffixes for approximate joins
//
// "Tulip Mortgage Funding 2019-1 B.V." → "tulip mortgage funding 2019-1"
//
// Best-effort key only. Two different entities can normalize to the same key,
// which is why name matches are labelled approximate and ambiguity is surfaced.

/// Legal-form suffixes, in the order they are tried
pub const DEFAULT_SUFFIXES: [&str; 16] = [
    "dac",
    "d.a.c.",
    "designated activity company",
    "plc",
    "p.l.c.",
    "public limited company",
    "limited",
    "ltd",
    "ltd.",
    "bv",
    "b.v.",
    "sa",
    "s.a.",
    "srl",
    "s.r.l.",
    "compartment",
];

// ============================================================================
// NORMALIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct NameNormalizer {
    /// Each suffix pre-split into lower-case tokens
    suffixes: Vec<Vec<String>>,
}

impl NameNormalizer {
    pub fn new() -> Self {
        Self::with_suffixes(DEFAULT_SUFFIXES)
    }

    pub fn with_suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let suffixes = suffixes
            .into_iter()
            .map(|s| {
                s.as_ref()
                    .to_lowercase()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|tokens| !tokens.is_empty())
            .collect();
        NameNormalizer { suffixes }
    }

    /// Lower-case, tokenize on whitespace, cut at the first suffix found.
    /// Empty input comes back unchanged.
    pub fn normalize(&self, name: &str) -> String {
        if name.trim().is_empty() {
            return name.to_string();
        }

        let lower = name.to_lowercase();
        let tokens: Vec<&str> = lower.split_whitespace().collect();

        for suffix in &self.suffixes {
            if let Some(i) = find_suffix(&tokens, suffix) {
                return tokens[..i].join(" ");
            }
        }

        lower
    }

    /// Null-preserving variant for optional columns
    pub fn normalize_opt(&self, name: Option<&str>) -> Option<String> {
        name.map(|n| self.normalize(n))
    }
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand using the default suffix list
pub fn normalize_name(name: &str) -> String {
    NameNormalizer::new().normalize(name)
}

/// Position of `suffix` as a contiguous token run inside `name`.
///
/// Single-token suffixes match anywhere. Multi-token suffixes are only looked
/// for after the first token, so a name is never reduced to nothing by them.
fn find_suffix(name: &[&str], suffix: &[String]) -> Option<usize> {
    match suffix.len() {
        0 => None,
        1 => name.iter().position(|t| *t == suffix[0]),
        n => {
            if name.len() < n + 1 {
                return None;
            }
            (1..=name.len() - n).find(|&i| {
                name[i..i + n]
                    .iter()
                    .zip(suffix.iter())
                    .all(|(a, b)| *a == b.as_str())
            })
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
