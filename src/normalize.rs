//! Case- and diacritic-folding for search twins.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold `s` for approximate matching: decompose, drop combining marks,
/// lowercase.
pub fn fold(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// [`fold`] lifted over optional text.
pub fn fold_opt(s: Option<&str>) -> Option<String> {
    s.map(fold)
}
