//! Comparison keys for human-entered text.
//!
//! [`fold`] produces the key two strings are compared by: surrounding
//! whitespace trimmed, inner runs collapsed to one ASCII space, diacritics
//! removed (NFD, then combining marks dropped) and lowercased. The result is
//! only ever used for comparison; canonical spellings are kept elsewhere.
//!
//! ```rust
//! use catalog::fold;
//!
//! assert_eq!(fold("  Renda   Variável "), "renda variavel");
//! assert_eq!(fold("ÁGUA"), fold("agua"));
//! ```

use unicode_categories::UnicodeCategories;
use unicode_normalization::UnicodeNormalization;

/// Fold `text` into its comparison key.
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.nfd() {
        if ch.is_mark() {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.extend(ch.to_lowercase());
    }

    out
}

/// Whether two strings are equal under [`fold`].
pub fn folded_eq(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}
