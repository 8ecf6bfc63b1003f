//! The provider DSL: a small nginx-like language describing upstream
//! routing, request/response transformation, error mapping and usage
//! extraction for one provider.
//!
//! A file is compiled once into a [`ProviderFile`] and published to the
//! process-wide [`Registry`]; requests evaluate the compiled program against
//! a per-request [`crate::Meta`].
//!
//! File organization mirrors package responsibilities:
//! - `scanner`: tokenizer and `include` preprocessing.
//! - `parse`: block parsers producing the typed program.
//! - `validate`: semantic validation (strict at boot, skip-and-report at
//!   reload).
//! - `select`: first-match-wins selection with defaults merging.
//! - `registry`: snapshot registry swapped atomically on reload.
//! - `metadata`: static directive metadata for admin tooling.

mod metadata;
mod parse;
mod registry;
mod scanner;
mod select;
mod types;
mod validate;

pub use metadata::{directives_by_block, hover_for_directive, modes_by_directive, DirectiveMetadata};
pub use registry::{diff_changed_providers, LoadResult, Registry, Snapshot};
pub use scanner::preprocess_includes;
pub use select::Overlay;
pub use types::*;
pub use validate::{
    collect_deprecated_directive_warnings, validate_provider_file, validate_providers_dir,
    ValidationWarning,
};
