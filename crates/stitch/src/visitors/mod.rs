//! AST visitors used by the bundler
//!
//! Import discovery turns a script into the [`ModuleRecord`] the graph
//! builder and the emitter work from. Binding references resolve every use
//! of an imported name against the scopes around it.

mod binding_references;
mod import_discovery;

pub use binding_references::{BindingReference, ReferenceContext};
pub use import_discovery::{
    DEFAULT_EXPORT_BINDING, ImportAction, ImportBinding, ImportKind, ImportRecord, LocalEdit,
    LocalExport, ModuleRecord, is_identifier_name, scan_module,
};
