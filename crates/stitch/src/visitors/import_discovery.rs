//! Import discovery over the oxc AST
//!
//! Finds every module reference in a script: import and re-export
//! declarations at the top level, `require("...")` calls and `import("...")`
//! expressions anywhere in the tree. Alongside the references it records the
//! export bindings and the purely local edits the emitter has to apply to
//! turn the module into a wrapped unit. Scanning is a pure function of the
//! source text.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::{
    Visit,
    ast::{
        Argument, BindingPattern, BindingPatternKind, CallExpression, Class, Declaration,
        ExportAllDeclaration, ExportDefaultDeclaration, ExportDefaultDeclarationKind,
        ExportNamedDeclaration, Expression, ImportDeclaration, ImportDeclarationSpecifier,
        ImportExpression, Program, Statement,
    },
    visit::walk,
};
use oxc_parser::{ParseOptions, Parser};
use oxc_span::{GetSpan, SourceType, Span};
use rustc_hash::FxHashSet;

use super::binding_references::{BindingReference, find_binding_references};

use crate::{
    error::{BundleError, Result, SourcePosition},
    types::ModuleSpecifier,
    util::LineIndex,
};

/// Local name the default export expression is bound to
pub const DEFAULT_EXPORT_BINDING: &str = "__stitch_default_export";

/// How a module reference appears in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    /// `import ... from "x"` or `import "x"`
    Static,
    /// `export ... from "x"`
    ReExport,
    /// `require("x")`
    Require,
    /// `import("x")`
    Dynamic,
}

impl ImportKind {
    /// Whether the target must be initialized before the importer runs
    pub fn is_static(&self) -> bool {
        !matches!(self, Self::Dynamic)
    }
}

/// A binding introduced by an import declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportBinding {
    Default { local: String },
    Namespace { local: String },
    Named { imported: String, local: String },
}

impl ImportBinding {
    pub fn local(&self) -> &str {
        match self {
            Self::Default { local } | Self::Namespace { local } | Self::Named { local, .. } => local,
        }
    }
}

/// What the emitter replaces the reference with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportAction {
    /// Import declaration; no bindings means a side-effect import
    Bind(Vec<ImportBinding>),
    /// `export { imported as exported } from`, as `(exported, imported)` pairs
    ReExport(Vec<(String, String)>),
    /// `export * from`
    ExportStar,
    /// `export * as name from`
    ExportNamespace(String),
    /// `require()` or `import()`; the whole call is replaced
    Call,
}

/// One module reference found in a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub specifier: ModuleSpecifier,
    pub kind: ImportKind,
    /// Byte range the emitter replaces
    pub span: Span,
    /// Position of the specifier literal
    pub position: SourcePosition,
    pub action: ImportAction,
}

/// An export the unit prologue exposes through a live getter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalExport {
    pub exported: String,
    pub local: String,
}

/// Replacement of a byte range that does not depend on resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEdit {
    pub span: Span,
    pub replacement: String,
}

/// Everything the bundler needs to know about a scanned script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Module references in source order
    pub imports: Vec<ImportRecord>,
    pub exports: Vec<LocalExport>,
    pub local_edits: Vec<LocalEdit>,
    /// References to import bindings, rewritten into reads of the imported module
    pub references: Vec<BindingReference>,
    /// Whether the module uses import/export syntax
    pub has_module_syntax: bool,
    /// `import(expr)` / `require(expr)` calls whose argument is not a static string
    pub unresolvable: Vec<SourcePosition>,
    /// Target of a trailing `sourceMappingURL` comment
    pub source_map_url: Option<String>,
}

impl ModuleRecord {
    /// Local names bound by import declarations
    pub fn imported_names(&self) -> FxHashSet<String> {
        self.imports
            .iter()
            .filter_map(|import| match &import.action {
                ImportAction::Bind(bindings) => Some(bindings),
                _ => None,
            })
            .flatten()
            .map(|binding| binding.local().to_owned())
            .collect()
    }

    /// Specifiers and their locations, in source order
    pub fn specifiers(&self) -> impl Iterator<Item = (&ModuleSpecifier, SourcePosition)> {
        self.imports
            .iter()
            .map(|import| (&import.specifier, import.position))
    }
}

/// Parse `source` and collect its module references
pub fn scan_module(path: &Path, source: &str) -> Result<ModuleRecord> {
    let allocator = Allocator::default();
    let source_type = SourceType::from_path(path).unwrap_or_else(|_| SourceType::mjs());
    let options = ParseOptions {
        allow_return_outside_function: true,
        ..ParseOptions::default()
    };
    let parsed = Parser::new(&allocator, source, source_type)
        .with_options(options)
        .parse();

    let lines = LineIndex::new(source);
    if let Some(error) = parsed.errors.first() {
        let offset = error
            .labels
            .as_ref()
            .and_then(|labels| labels.first())
            .map_or(0, |label| label.offset());
        return Err(BundleError::Parse {
            file: path.to_path_buf(),
            position: lines.position(offset),
            message: error.to_string(),
        });
    }

    let mut discovery = ImportDiscoveryVisitor::new(source, &lines);
    discovery.collect_declarations(&parsed.program);
    discovery.visit_program(&parsed.program);
    let mut record = discovery.finish();
    record.references = find_binding_references(&parsed.program, &record.imported_names());

    if let Some((url, span)) = trailing_source_map_url(source) {
        record.source_map_url = Some(url);
        record.local_edits.push(LocalEdit {
            span,
            replacement: String::new(),
        });
    }
    record.local_edits.sort_by_key(|edit| edit.span.start);
    Ok(record)
}

/// Visitor collecting references from one program
struct ImportDiscoveryVisitor<'s> {
    source: &'s str,
    lines: &'s LineIndex<'s>,
    record: ModuleRecord,
    /// Calls found by the tree walk, merged with declarations in `finish`
    calls: Vec<ImportRecord>,
}

impl<'s> ImportDiscoveryVisitor<'s> {
    fn new(source: &'s str, lines: &'s LineIndex<'s>) -> Self {
        Self {
            source,
            lines,
            record: ModuleRecord::default(),
            calls: Vec::new(),
        }
    }

    fn finish(mut self) -> ModuleRecord {
        // Calls inside statements that were removed wholesale disappear with them
        let removed: Vec<Span> = self
            .record
            .local_edits
            .iter()
            .map(|edit| edit.span)
            .collect();
        self.calls.retain(|call| {
            !removed
                .iter()
                .any(|span| span.start <= call.span.start && call.span.end <= span.end)
        });
        self.record.imports.append(&mut self.calls);
        self.record.imports.sort_by_key(|import| import.span.start);
        self.record
    }

    fn collect_declarations(&mut self, program: &Program<'_>) {
        for stmt in &program.body {
            match stmt {
                Statement::ImportDeclaration(decl) => self.import_declaration(decl),
                Statement::ExportNamedDeclaration(decl) => self.export_named(decl),
                Statement::ExportDefaultDeclaration(decl) => self.export_default(decl),
                Statement::ExportAllDeclaration(decl) => self.export_all(decl),
                _ => {}
            }
        }
    }

    fn remove(&mut self, span: Span) {
        self.edit(span, String::new());
    }

    fn edit(&mut self, span: Span, replacement: String) {
        self.record.local_edits.push(LocalEdit { span, replacement });
    }

    fn push_import(&mut self, specifier: &str, literal: Span, kind: ImportKind, span: Span, action: ImportAction) {
        self.record.imports.push(ImportRecord {
            specifier: ModuleSpecifier::new(specifier),
            kind,
            span,
            position: self.lines.position(literal.start as usize),
            action,
        });
    }

    fn import_declaration(&mut self, decl: &ImportDeclaration<'_>) {
        self.record.has_module_syntax = true;
        if decl.import_kind.is_type() {
            self.remove(decl.span);
            return;
        }

        let mut bindings = Vec::new();
        let mut type_only = false;
        for specifier in decl.specifiers.iter().flatten() {
            match specifier {
                ImportDeclarationSpecifier::ImportSpecifier(named) => {
                    if named.import_kind.is_type() {
                        type_only = true;
                        continue;
                    }
                    bindings.push(ImportBinding::Named {
                        imported: named.imported.name().to_string(),
                        local: named.local.name.to_string(),
                    });
                }
                ImportDeclarationSpecifier::ImportDefaultSpecifier(default) => {
                    bindings.push(ImportBinding::Default {
                        local: default.local.name.to_string(),
                    });
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(namespace) => {
                    bindings.push(ImportBinding::Namespace {
                        local: namespace.local.name.to_string(),
                    });
                }
            }
        }

        // `import { type A } from "x"` is elided like a type-only import
        if type_only && bindings.is_empty() {
            self.remove(decl.span);
            return;
        }
        self.push_import(
            &decl.source.value,
            decl.source.span,
            ImportKind::Static,
            decl.span,
            ImportAction::Bind(bindings),
        );
    }

    fn export_named(&mut self, decl: &ExportNamedDeclaration<'_>) {
        self.record.has_module_syntax = true;
        if decl.export_kind.is_type() {
            self.remove(decl.span);
            return;
        }

        if let Some(source) = &decl.source {
            let pairs = decl
                .specifiers
                .iter()
                .filter(|spec| !spec.export_kind.is_type())
                .map(|spec| (spec.exported.name().to_string(), spec.local.name().to_string()))
                .collect();
            self.push_import(
                &source.value,
                source.span,
                ImportKind::ReExport,
                decl.span,
                ImportAction::ReExport(pairs),
            );
            return;
        }

        if let Some(declaration) = &decl.declaration {
            let keyword = Span::new(decl.span.start, declaration.span().start);
            self.remove(keyword);
            for name in declared_names(declaration) {
                self.record.exports.push(LocalExport {
                    exported: name.clone(),
                    local: name,
                });
            }
            return;
        }

        self.remove(decl.span);
        for spec in decl.specifiers.iter().filter(|spec| !spec.export_kind.is_type()) {
            self.record.exports.push(LocalExport {
                exported: spec.exported.name().to_string(),
                local: spec.local.name().to_string(),
            });
        }
    }

    fn export_default(&mut self, decl: &ExportDefaultDeclaration<'_>) {
        self.record.has_module_syntax = true;
        let keyword = Span::new(decl.span.start, decl.declaration.span().start);
        let declared = match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(func) => Some((
                func.id.as_ref(),
                func.type_parameters
                    .as_ref()
                    .map_or(func.params.span.start, |params| params.span.start),
            )),
            ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                Some((class.id.as_ref(), self.after_class_keyword(class)))
            }
            ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {
                self.remove(keyword);
                return;
            }
            _ => None,
        };

        let local = match declared {
            Some((Some(id), _)) => {
                self.remove(keyword);
                id.name.to_string()
            }
            // Anonymous declarations are named so they stay hoisted declarations
            Some((None, name_at)) => {
                self.remove(keyword);
                self.edit(Span::new(name_at, name_at), format!(" {DEFAULT_EXPORT_BINDING}"));
                DEFAULT_EXPORT_BINDING.to_owned()
            }
            None => {
                self.edit(keyword, format!("var {DEFAULT_EXPORT_BINDING} = "));
                DEFAULT_EXPORT_BINDING.to_owned()
            }
        };
        self.record.exports.push(LocalExport {
            exported: "default".to_owned(),
            local,
        });
    }

    /// Offset right after the `class` keyword, where a class name goes
    fn after_class_keyword(&self, class: &Class<'_>) -> u32 {
        let from = class
            .decorators
            .last()
            .map_or(class.span.start, |decorator| decorator.span.end);
        self.source
            .get(from as usize..)
            .and_then(|rest| rest.find("class"))
            .map_or(class.body.span.start, |idx| from + (idx + "class".len()) as u32)
    }

    fn export_all(&mut self, decl: &ExportAllDeclaration<'_>) {
        self.record.has_module_syntax = true;
        if decl.export_kind.is_type() {
            self.remove(decl.span);
            return;
        }
        let action = match &decl.exported {
            Some(name) => ImportAction::ExportNamespace(name.name().to_string()),
            None => ImportAction::ExportStar,
        };
        self.push_import(
            &decl.source.value,
            decl.source.span,
            ImportKind::ReExport,
            decl.span,
            action,
        );
    }

    fn call_reference(&mut self, argument: Option<&Expression<'_>>, span: Span, kind: ImportKind) {
        match argument.and_then(|arg| static_string(arg).map(|value| (value, arg.span()))) {
            Some((specifier, literal)) => {
                self.calls.push(ImportRecord {
                    specifier: ModuleSpecifier::new(specifier),
                    kind,
                    span,
                    position: self.lines.position(literal.start as usize),
                    action: ImportAction::Call,
                });
            }
            None => {
                let position = self.lines.position(span.start as usize);
                self.record.unresolvable.push(position);
            }
        }
    }
}

impl<'a> Visit<'a> for ImportDiscoveryVisitor<'_> {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        let is_require = matches!(
            &call.callee,
            Expression::Identifier(ident) if ident.name.as_str() == "require"
        );
        if is_require && call.arguments.len() == 1 {
            let argument = call.arguments.first().and_then(Argument::as_expression);
            self.call_reference(argument, call.span, ImportKind::Require);
        }
        walk::walk_call_expression(self, call);
    }

    fn visit_import_expression(&mut self, expr: &ImportExpression<'a>) {
        self.call_reference(Some(&expr.source), expr.span, ImportKind::Dynamic);
        walk::walk_import_expression(self, expr);
    }
}

/// The value of a string literal or a template literal without substitutions
fn static_string(expr: &Expression<'_>) -> Option<String> {
    match expr {
        Expression::StringLiteral(lit) => Some(lit.value.to_string()),
        Expression::TemplateLiteral(tpl) if tpl.expressions.is_empty() => tpl
            .quasis
            .first()
            .and_then(|quasi| quasi.value.cooked.as_ref())
            .map(ToString::to_string),
        _ => None,
    }
}

/// Runtime bindings declared by an exported declaration
fn declared_names(declaration: &Declaration<'_>) -> Vec<String> {
    let mut names = Vec::new();
    match declaration {
        Declaration::VariableDeclaration(var) => {
            for declarator in &var.declarations {
                collect_pattern_names(&declarator.id, &mut names);
            }
        }
        Declaration::FunctionDeclaration(func) => {
            names.extend(func.id.as_ref().map(|id| id.name.to_string()));
        }
        Declaration::ClassDeclaration(class) => {
            names.extend(class.id.as_ref().map(|id| id.name.to_string()));
        }
        // Type-level declarations have no runtime binding
        _ => {}
    }
    names
}

pub(super) fn collect_pattern_names(pattern: &BindingPattern<'_>, names: &mut Vec<String>) {
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(ident) => names.push(ident.name.to_string()),
        BindingPatternKind::ObjectPattern(object) => {
            for property in &object.properties {
                collect_pattern_names(&property.value, names);
            }
            if let Some(rest) = &object.rest {
                collect_pattern_names(&rest.argument, names);
            }
        }
        BindingPatternKind::ArrayPattern(array) => {
            for element in array.elements.iter().flatten() {
                collect_pattern_names(element, names);
            }
            if let Some(rest) = &array.rest {
                collect_pattern_names(&rest.argument, names);
            }
        }
        BindingPatternKind::AssignmentPattern(assign) => {
            collect_pattern_names(&assign.left, names);
        }
    }
}

/// Whether a name can be used with dot access in emitted code
pub fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '$' || first == '_' || first.is_alphabetic())
        && chars.all(|c| c == '$' || c == '_' || c.is_alphanumeric())
}

/// Find a trailing `//# sourceMappingURL=` comment and the span of its line
fn trailing_source_map_url(source: &str) -> Option<(String, Span)> {
    let trimmed_end = source.trim_end().len();
    let line_start = source[..trimmed_end].rfind('\n').map_or(0, |idx| idx + 1);
    let line = &source[line_start..trimmed_end];
    let url = line
        .trim_start()
        .strip_prefix("//# sourceMappingURL=")
        .or_else(|| line.trim_start().strip_prefix("//@ sourceMappingURL="))?
        .trim();
    if url.is_empty() {
        return None;
    }
    Some((
        url.to_owned(),
        Span::new(line_start as u32, trimmed_end as u32),
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn scan(source: &str) -> ModuleRecord {
        scan_module(Path::new("module.js"), source).expect("Failed to scan test module")
    }

    fn specifiers(record: &ModuleRecord) -> Vec<(&str, ImportKind)> {
        record
            .imports
            .iter()
            .map(|import| (import.specifier.as_str(), import.kind))
            .collect()
    }

    #[test]
    fn test_references_in_source_order() {
        let record = scan(
            r#"import a from "./a";
const b = require("./b");
export { c } from "./c";
async function later() {
    return import("./d");
}
export * from "./e";
"#,
        );
        assert_eq!(
            specifiers(&record),
            vec![
                ("./a", ImportKind::Static),
                ("./b", ImportKind::Require),
                ("./c", ImportKind::ReExport),
                ("./d", ImportKind::Dynamic),
                ("./e", ImportKind::ReExport),
            ]
        );
        assert!(record.has_module_syntax);
        assert_eq!(
            record.imports[1].position,
            SourcePosition { line: 2, column: 18 }
        );
    }

    #[test]
    fn test_import_bindings() {
        let record = scan(r#"import def, { x, y as z, "str" as s } from "./m"; import * as ns from "./n"; import "./side";"#);
        assert_eq!(
            record.imports[0].action,
            ImportAction::Bind(vec![
                ImportBinding::Default { local: "def".into() },
                ImportBinding::Named { imported: "x".into(), local: "x".into() },
                ImportBinding::Named { imported: "y".into(), local: "z".into() },
                ImportBinding::Named { imported: "str".into(), local: "s".into() },
            ])
        );
        assert_eq!(
            record.imports[1].action,
            ImportAction::Bind(vec![ImportBinding::Namespace { local: "ns".into() }])
        );
        assert_eq!(record.imports[2].action, ImportAction::Bind(vec![]));
    }

    #[test]
    fn test_exports_and_edits() {
        let source = "export const a = 1, { b } = obj;\nexport function f() {}\nconst g = 2;\nexport { g as h };\nexport default 42;\n";
        let record = scan(source);
        let exported: Vec<_> = record
            .exports
            .iter()
            .map(|export| (export.exported.as_str(), export.local.as_str()))
            .collect();
        assert_eq!(
            exported,
            vec![
                ("a", "a"),
                ("b", "b"),
                ("f", "f"),
                ("h", "g"),
                ("default", DEFAULT_EXPORT_BINDING),
            ]
        );

        let edits: Vec<_> = record
            .local_edits
            .iter()
            .map(|edit| {
                (
                    &source[edit.span.start as usize..edit.span.end as usize],
                    edit.replacement.as_str(),
                )
            })
            .collect();
        assert_eq!(
            edits,
            vec![
                ("export ", ""),
                ("export ", ""),
                ("export { g as h };", ""),
                ("export default ", "var __stitch_default_export = "),
            ]
        );
    }

    #[test]
    fn test_named_default_function_keeps_its_name() {
        let record = scan("export default function main() {}\n");
        assert_eq!(
            record.exports,
            vec![LocalExport {
                exported: "default".into(),
                local: "main".into()
            }]
        );
    }

    #[test]
    fn test_anonymous_default_declarations_are_named() {
        for (source, expected) in [
            (
                "export default function () {}\n",
                "function  __stitch_default_export() {}\n",
            ),
            (
                "export default async function* () {}\n",
                "async function*  __stitch_default_export() {}\n",
            ),
            (
                "export default class extends Base {}\n",
                "class __stitch_default_export extends Base {}\n",
            ),
        ] {
            let record = scan(source);
            assert_eq!(
                record.exports,
                vec![LocalExport {
                    exported: "default".into(),
                    local: DEFAULT_EXPORT_BINDING.into()
                }]
            );
            let mut output = source.to_owned();
            for edit in record.local_edits.iter().rev() {
                output.replace_range(
                    edit.span.start as usize..edit.span.end as usize,
                    &edit.replacement,
                );
            }
            assert_eq!(output, expected);
        }
    }

    #[test]
    fn test_non_literal_calls_are_reported() {
        let record = scan("const name = 'x';\nimport(name);\nrequire(`./${name}`);\nrequire(`./plain`);\n");
        assert_eq!(specifiers(&record), vec![("./plain", ImportKind::Require)]);
        assert_eq!(
            record.unresolvable,
            vec![
                SourcePosition { line: 2, column: 0 },
                SourcePosition { line: 3, column: 0 },
            ]
        );
        assert!(!record.has_module_syntax);
    }

    #[test]
    fn test_type_only_imports_are_dropped() {
        let record = scan_module(
            Path::new("module.ts"),
            "import type { T } from \"./types\";\nimport { type U } from \"./u\";\nexport type { T };\nimport { v } from \"./v\";\n",
        )
        .expect("Failed to scan test module");
        assert_eq!(specifiers(&record), vec![("./v", ImportKind::Static)]);
        assert_eq!(record.local_edits.len(), 3);
    }

    #[test]
    fn test_parse_error_position() {
        let err = scan_module(Path::new("broken.js"), "const a = 1;\nconst = ;\n")
            .expect_err("should not parse");
        match err {
            BundleError::Parse { file, position, .. } => {
                assert_eq!(file, Path::new("broken.js"));
                assert_eq!(position.line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_trailing_source_map_comment() {
        let record = scan("export const a = 1;\n//# sourceMappingURL=a.js.map\n");
        assert_eq!(record.source_map_url.as_deref(), Some("a.js.map"));
        assert!(
            record
                .local_edits
                .iter()
                .any(|edit| edit.replacement.is_empty() && edit.span.start == 20)
        );
    }

    #[test]
    fn test_identifier_names() {
        assert!(is_identifier_name("value"));
        assert!(is_identifier_name("$_x1"));
        assert!(!is_identifier_name("1x"));
        assert!(!is_identifier_name("with-dash"));
        assert!(!is_identifier_name(""));
    }
}
