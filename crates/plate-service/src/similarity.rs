//! Normalised edit-distance similarity between plate texts.

/// Similarity in `[0, 1]`: `1 - levenshtein / max_len` after removing
/// whitespace and uppercasing. Identical inputs short-circuit to `1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let a = normalize(a);
    let b = normalize(b);

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Character-level edit distance with unit insert, delete and substitute costs.
pub fn levenshtein(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}
