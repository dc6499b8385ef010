//! Option catalogs
//!
//! Remote forms declare fixed option lists for select and checklist fields,
//! and they expect the exact canonical spelling back. Browsers, on the other
//! hand, send whatever the user or an older form version produced. This
//! crate bridges the two.
//!
//! - [`fold`] builds the comparison key (trim, collapse whitespace, strip
//!   diacritics, lowercase).
//! - [`normalize`] maps submitted values onto canonical spellings and reports
//!   the leftovers so the caller can surface them.
//!
//! ```rust
//! use catalog::{normalize, Cardinality};
//!
//! let allowed = vec!["Renda variável".to_string(), "Renda fixa".to_string()];
//! let out = normalize(&["RENDA VARIAVEL", "cripto"], &allowed, Cardinality::Multiple);
//! assert_eq!(out.matched, vec!["Renda variável"]);
//! assert_eq!(out.rejected, vec!["cripto"]);
//! ```

mod fold;
mod normalize;

pub use crate::fold::{fold, folded_eq};
pub use crate::normalize::{normalize, Cardinality, Normalized};
