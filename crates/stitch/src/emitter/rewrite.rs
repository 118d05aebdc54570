//! Rewriting of module bodies into registry units
//!
//! Every rewrite keeps the module's line count: a replaced span is followed
//! by as many newlines as it removed, so line `n` of the body is always line
//! `n` of the original. Import declarations and export bookkeeping move to
//! the unit prologue on the header line, which keeps dependencies running
//! before the body as module semantics require.
//!
//! Imported names are not copied into locals. Each reference reads through
//! the imported module's exports object when it runs, which keeps bindings
//! live and lets modules in a cycle see each other half-initialized.

use log::trace;
use oxc_span::Span;
use rustc_hash::FxHashMap;

use super::{chunks::ChunkPlan, runtime};
use crate::{
    module_graph::ModuleNode,
    types::{ModuleKind, ResolvedPath},
    util::{LineIndex, utf16_len},
    visitors::{
        ImportAction, ImportBinding, ImportKind, ModuleRecord, ReferenceContext,
        is_identifier_name,
    },
};

/// One mapping from a unit-relative generated position to the module source
///
/// Lines are 0-based; columns are UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub dst_line: u32,
    pub dst_col: u32,
    pub src_line: u32,
    pub src_col: u32,
}

/// What the rewriter needs to know about the rest of the bundle
#[derive(Debug)]
pub(crate) struct LinkContext<'a, 'g> {
    pub(crate) ids: &'a FxHashMap<&'g ResolvedPath, usize>,
    pub(crate) plan: &'a ChunkPlan<'g>,
    /// Output file name of every asset module
    pub(crate) asset_names: &'a FxHashMap<&'g ResolvedPath, String>,
    /// Path from the entry artifact's directory back to the output root
    pub(crate) output_root: &'a str,
}

impl LinkContext<'_, '_> {
    fn id_of(&self, path: &ResolvedPath) -> usize {
        self.ids.get(path).copied().unwrap_or_default()
    }
}

/// A module wrapped into a registry unit
#[derive(Debug, Clone)]
pub(crate) struct RenderedUnit {
    /// Header line, body and footer line, newline terminated
    pub(crate) text: String,
    pub(crate) segments: Vec<Segment>,
    pub(crate) line_count: u32,
}

/// Wrap `node` into a unit registered under `id`
pub(crate) fn render_unit(node: &ModuleNode, id: usize, link: &LinkContext<'_, '_>) -> RenderedUnit {
    let (prologue, body) = match (node.path.kind(), &node.record) {
        (ModuleKind::Script, Some(record)) => script_body(node, record, link),
        (ModuleKind::Asset, _) => (String::new(), asset_body(node, link)),
        _ => (String::new(), json_body(&node.content)),
    };

    let esm = node.record.as_ref().is_some_and(|record| record.has_module_syntax);
    let mut header = runtime::unit_header(id, esm);
    if !prologue.is_empty() {
        header.push(' ');
        header.push_str(&prologue);
    }

    let mut text = String::with_capacity(header.len() + body.text.len() + 8);
    text.push_str(&header);
    text.push('\n');
    text.push_str(&body.text);
    text.push_str(runtime::UNIT_FOOTER);
    text.push('\n');

    let mut segments = Vec::with_capacity(body.segments.len() + 2);
    segments.push(Segment {
        dst_line: 0,
        dst_col: 0,
        src_line: 0,
        src_col: 0,
    });
    segments.extend(body.segments.into_iter().map(|segment| Segment {
        dst_line: segment.dst_line + 1,
        ..segment
    }));
    segments.push(Segment {
        dst_line: body.line_count + 1,
        dst_col: 0,
        src_line: body.line_count.saturating_sub(1),
        src_col: 0,
    });

    RenderedUnit {
        text,
        segments,
        line_count: body.line_count + 2,
    }
}

/// A rewritten body together with its mappings
#[derive(Debug)]
struct Body {
    text: String,
    segments: Vec<Segment>,
    line_count: u32,
}

/// Output buffer that records where copied and replaced text came from
struct BodyWriter<'s> {
    source: &'s str,
    lines: LineIndex<'s>,
    out: String,
    line: u32,
    col: u32,
    segments: Vec<Segment>,
}

impl<'s> BodyWriter<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            lines: LineIndex::new(source),
            out: String::with_capacity(source.len()),
            line: 0,
            col: 0,
            segments: Vec::new(),
        }
    }

    /// Map the current output position to `offset` in the source
    fn mark(&mut self, offset: usize) {
        let (src_line, src_col) = self.lines.line_col(offset);
        let segment = Segment {
            dst_line: self.line,
            dst_col: self.col,
            src_line,
            src_col,
        };
        match self.segments.last_mut() {
            Some(last) if last.dst_line == segment.dst_line && last.dst_col == segment.dst_col => {
                *last = segment;
            }
            _ => self.segments.push(segment),
        }
    }

    /// Copy `source[start..end]` verbatim
    fn copy(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        self.mark(start);
        for (idx, ch) in self.source[start..end].char_indices() {
            self.out.push(ch);
            if ch == '\n' {
                self.line += 1;
                self.col = 0;
                if start + idx + 1 < end {
                    self.mark(start + idx + 1);
                }
            } else {
                self.col += ch.len_utf16() as u32;
            }
        }
    }

    /// Write generated text without a mapping of its own
    fn insert(&mut self, text: &str) {
        debug_assert!(!text.contains('\n'), "generated code must stay on one line");
        self.out.push_str(text);
        self.col += utf16_len(text);
    }

    /// Replace `source[start..end]`, padding with the newlines it removed
    fn replace(&mut self, start: usize, end: usize, replacement: &str) {
        self.mark(start);
        self.insert(replacement);
        let removed = &self.source[start..end];
        let breaks: Vec<usize> = removed.match_indices('\n').map(|(idx, _)| idx).collect();
        for idx in breaks {
            self.out.push('\n');
            self.line += 1;
            self.col = 0;
            self.mark(start + idx + 1);
        }
    }

    fn finish(mut self) -> Body {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
            self.line += 1;
        }
        let line_count = self.line;
        self.segments.retain(|segment| segment.dst_line < line_count);
        Body {
            text: self.out,
            segments: self.segments,
            line_count,
        }
    }
}

/// JSON string literal, which is also a valid JavaScript string literal
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_owned()).to_string()
}

/// Property access for `name` on `object`
fn member(object: &str, name: &str) -> String {
    if is_identifier_name(name) {
        format!("{object}.{name}")
    } else {
        format!("{object}[{}]", js_string(name))
    }
}

fn script_body(node: &ModuleNode, record: &ModuleRecord, link: &LinkContext<'_, '_>) -> (String, Body) {
    let exports = runtime::exports_param(record.has_module_syntax);
    let mut edits: Vec<(Span, String)> = record
        .local_edits
        .iter()
        .map(|edit| (edit.span, edit.replacement.clone()))
        .collect();

    let mut imports = Vec::new();
    let mut accessors: FxHashMap<&str, Accessor> = FxHashMap::default();
    for (idx, import) in record.imports.iter().enumerate() {
        let target = node.target_of(&import.specifier);
        let source = match target {
            Some(target) => format!("__stitch_require({})", link.id_of(target)),
            None => format!("require({})", js_string(import.specifier.as_str())),
        };

        if import.action == ImportAction::Call {
            // References to externals stay runtime calls
            let Some(target) = target else {
                continue;
            };
            let replacement = if import.kind == ImportKind::Dynamic {
                dynamic_import(link, target, &source)
            } else {
                source
            };
            edits.push((import.span, replacement));
            continue;
        }

        edits.push((import.span, String::new()));
        let temp = format!("__stitch_m{idx}");
        if let ImportAction::Bind(bindings) = &import.action {
            for binding in bindings {
                accessors.insert(binding.local(), Accessor::new(binding, &temp));
            }
        }
        imports.push(declaration_prologue(&import.action, &source, &temp, exports));
    }

    let mut prologue = Vec::new();
    if record.has_module_syntax {
        prologue.push(format!("__stitch_esm({exports});"));
    }
    if !record.exports.is_empty() {
        let getters: Vec<String> = record
            .exports
            .iter()
            .map(|export| {
                let value = accessors
                    .get(export.local.as_str())
                    .map_or_else(|| export.local.clone(), |accessor| accessor.read.clone());
                format!(
                    "{}: function () {{ return {value}; }}",
                    js_string(&export.exported)
                )
            })
            .collect();
        prologue.push(format!("__stitch_export({exports}, {{{}}});", getters.join(", ")));
    }
    prologue.append(&mut imports);

    for reference in &record.references {
        if let Some(accessor) = accessors.get(reference.local.as_str()) {
            let replacement = match reference.context {
                ReferenceContext::Plain => accessor.read.clone(),
                ReferenceContext::Callee => accessor.call.clone(),
                ReferenceContext::Shorthand => format!("{}: {}", reference.local, accessor.read),
            };
            edits.push((reference.span, replacement));
        }
    }

    edits.sort_by_key(|(span, _)| span.start);
    let mut writer = BodyWriter::new(&node.content);
    let mut cursor = 0;
    for (span, replacement) in &edits {
        let (start, end) = (span.start as usize, span.end as usize);
        if start < cursor || end > node.content.len() {
            trace!("{}: skipping overlapping edit at {start}..{end}", node.path);
            continue;
        }
        writer.copy(cursor, start);
        writer.replace(start, end, replacement);
        cursor = end;
    }
    writer.copy(cursor, node.content.len());

    (prologue.join(" "), writer.finish())
}

/// How a reference to one import binding is emitted
#[derive(Debug)]
struct Accessor {
    read: String,
    /// Callee form, which calls named imports without a receiver
    call: String,
}

impl Accessor {
    fn new(binding: &ImportBinding, temp: &str) -> Self {
        match binding {
            ImportBinding::Default { .. } => Self::plain(format!("__stitch_default({temp})")),
            ImportBinding::Named { imported, .. } if imported == "default" => {
                Self::plain(format!("__stitch_default({temp})"))
            }
            ImportBinding::Named { imported, .. } => {
                let read = member(temp, imported);
                Self {
                    call: format!("(0, {read})"),
                    read,
                }
            }
            ImportBinding::Namespace { .. } => Self::plain(temp.to_owned()),
        }
    }

    fn plain(read: String) -> Self {
        Self {
            call: read.clone(),
            read,
        }
    }
}

fn dynamic_import(link: &LinkContext<'_, '_>, target: &ResolvedPath, source: &str) -> String {
    match link.plan.chunk_file_of(target) {
        Some(file) => format!(
            "__stitch_load({}).then(function () {{ return {source}; }})",
            js_string(&format!("{}{file}", link.output_root))
        ),
        None => format!("Promise.resolve().then(function () {{ return {source}; }})"),
    }
}

fn declaration_prologue(action: &ImportAction, source: &str, temp: &str, exports: &str) -> String {
    match action {
        ImportAction::Bind(bindings) if bindings.is_empty() => format!("{source};"),
        ImportAction::Bind(_) => format!("var {temp} = {source};"),
        ImportAction::ReExport(pairs) => {
            let names: Vec<String> = pairs
                .iter()
                .map(|(exported, imported)| format!("{}: {}", js_string(exported), js_string(imported)))
                .collect();
            format!("__stitch_reexport({exports}, {source}, {{{}}});", names.join(", "))
        }
        ImportAction::ExportStar => format!("__stitch_export_star({exports}, {source});"),
        ImportAction::ExportNamespace(name) => format!(
            "var {temp} = {source}; __stitch_export({exports}, {{{}: function () {{ return {temp}; }}}});",
            js_string(name)
        ),
        ImportAction::Call => source.to_owned(),
    }
}

fn json_body(content: &str) -> Body {
    let trimmed = content.trim_end();
    let mut writer = BodyWriter::new(content);
    writer.mark(0);
    writer.insert("module.exports = ");
    writer.copy(0, trimmed.len());
    writer.insert(";");
    writer.finish()
}

fn asset_body(node: &ModuleNode, link: &LinkContext<'_, '_>) -> Body {
    let name = link
        .asset_names
        .get(&node.path)
        .map_or_else(String::new, Clone::clone);
    let text = format!("module.exports = {};\n", js_string(&name));
    Body {
        text,
        segments: vec![Segment {
            dst_line: 0,
            dst_col: 0,
            src_line: 0,
            src_col: 0,
        }],
        line_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::SplitPolicy,
        emitter::order::emission_order,
        module_graph::{DependencyGraph, ModuleEdge},
        types::ModuleSpecifier,
        visitors::scan_module,
    };

    fn script(name: &str, source: &str, edges: &[(&str, &str, ImportKind)]) -> ModuleNode {
        let path = ResolvedPath::new(Path::new("/project").join(name));
        let record = scan_module(path.path(), source).expect("Failed to scan test module");
        let mut node = ModuleNode::new(path, source.to_owned(), Some(record));
        node.edges = edges
            .iter()
            .map(|(specifier, target, kind)| ModuleEdge {
                specifier: ModuleSpecifier::from(*specifier),
                target: ResolvedPath::new(Path::new("/project").join(target)),
                kind: *kind,
            })
            .collect();
        node
    }

    fn render(nodes: Vec<ModuleNode>, policy: SplitPolicy) -> Vec<RenderedUnit> {
        let entry = nodes[0].path.clone();
        let nodes: IndexMap<_, _> = nodes
            .into_iter()
            .map(|node| (node.path.clone(), node))
            .collect();
        let graph = DependencyGraph::new(entry, nodes, Vec::new());
        let order = emission_order(&graph);
        let ids = order.iter().enumerate().map(|(idx, path)| (*path, idx)).collect();
        let plan = ChunkPlan::new(&graph, &order, policy);
        let asset_names = FxHashMap::default();
        let link = LinkContext {
            ids: &ids,
            plan: &plan,
            asset_names: &asset_names,
            output_root: "",
        };
        graph
            .nodes()
            .map(|node| render_unit(node, link.id_of(&node.path), &link))
            .collect()
    }

    #[test]
    fn test_imports_move_to_prologue_and_keep_lines() {
        let units = render(
            vec![
                script(
                    "a.js",
                    "import b, { c as d } from \"./b.js\";\nconsole.log(b, d);\n",
                    &[("./b.js", "b.js", ImportKind::Static)],
                ),
                script("b.js", "export default 1;\nexport const c = 2;\n", &[]),
            ],
            SplitPolicy::Single,
        );

        assert_eq!(
            units[0].text,
            "__stitch_define(1, function (__stitch_module, __stitch_exports, __stitch_require) { \
             __stitch_esm(__stitch_exports); var __stitch_m0 = __stitch_require(0);\n\
             \n\
             console.log(__stitch_default(__stitch_m0), __stitch_m0.c);\n\
             });\n"
        );
        assert_eq!(units[0].line_count, 4);

        assert_eq!(
            units[1].text,
            "__stitch_define(0, function (__stitch_module, __stitch_exports, __stitch_require) { \
             __stitch_esm(__stitch_exports); __stitch_export(__stitch_exports, \
             {\"default\": function () { return __stitch_default_export; }, \
             \"c\": function () { return c; }});\n\
             var __stitch_default_export = 1;\n\
             const c = 2;\n\
             });\n"
        );
    }

    #[test]
    fn test_calls_are_replaced_in_place() {
        let units = render(
            vec![
                script(
                    "main.js",
                    "const x = require('./x.js'), fs = require('fs');\nimport('./lazy.js').then(run);\n",
                    &[
                        ("./x.js", "x.js", ImportKind::Require),
                        ("./lazy.js", "lazy.js", ImportKind::Dynamic),
                    ],
                ),
                script("x.js", "module.exports = 1;\n", &[]),
                script("lazy.js", "exports.run = true;\n", &[]),
            ],
            SplitPolicy::Dynamic,
        );
        let body: Vec<&str> = units[0].text.lines().collect();
        assert_eq!(
            body[1],
            "const x = __stitch_require(0), fs = require('fs');"
        );
        assert_eq!(
            body[2],
            "__stitch_load(\"chunks/0.js\").then(function () { return __stitch_require(2); }).then(run);"
        );
    }

    #[test]
    fn test_multiline_import_is_padded() {
        let source = "import {\n  a,\n  b\n} from './m.js'; a(b);\n";
        let units = render(
            vec![
                script("main.js", source, &[("./m.js", "m.js", ImportKind::Static)]),
                script("m.js", "export const a = 1, b = 2;\n", &[]),
            ],
            SplitPolicy::Single,
        );
        let unit = &units[0];
        let lines: Vec<&str> = unit.text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "");
        assert_eq!(lines[4], " (0, __stitch_m0.a)(__stitch_m0.b);");

        // The code after the removed import maps back to its original column
        let after = unit
            .segments
            .iter()
            .find(|segment| segment.dst_line == 4)
            .copied();
        assert_eq!(
            after,
            Some(Segment {
                dst_line: 4,
                dst_col: 0,
                src_line: 3,
                src_col: 16,
            })
        );
        // Footer maps to the last line of the module
        assert_eq!(
            unit.segments.last().copied(),
            Some(Segment {
                dst_line: 5,
                dst_col: 0,
                src_line: 3,
                src_col: 0,
            })
        );
    }

    #[test]
    fn test_every_unit_line_has_a_column_zero_segment() {
        let source = "import './side.js';\nexport function f() {\n  return require('./side.js');\n}\n";
        let units = render(
            vec![
                script(
                    "main.js",
                    source,
                    &[
                        ("./side.js", "side.js", ImportKind::Static),
                        ("./side.js", "side.js", ImportKind::Require),
                    ],
                ),
                script("side.js", "", &[]),
            ],
            SplitPolicy::Single,
        );
        let unit = &units[0];
        for line in 0..unit.line_count {
            assert!(
                unit.segments
                    .iter()
                    .any(|segment| segment.dst_line == line && segment.dst_col == 0),
                "line {line} has no segment"
            );
        }
        assert!(unit.text.contains("return __stitch_require(0);"));
        // The empty module is just a header and a footer
        assert_eq!(units[1].line_count, 2);
    }

    #[test]
    fn test_imported_names_are_read_through_the_module() {
        let source = "import { a } from './m.js';\n\
                      function f(a) { return a; }\n\
                      const o = { a };\n\
                      export { a as b };\n";
        let units = render(
            vec![
                script("main.js", source, &[("./m.js", "m.js", ImportKind::Static)]),
                script("m.js", "export let a = 0;\n", &[]),
            ],
            SplitPolicy::Single,
        );
        let lines: Vec<&str> = units[0].text.lines().collect();
        assert!(lines[0].ends_with(
            "__stitch_export(__stitch_exports, {\"b\": function () { return __stitch_m0.a; }}); \
             var __stitch_m0 = __stitch_require(0);"
        ));
        assert_eq!(lines[2], "function f(a) { return a; }");
        assert_eq!(lines[3], "const o = { a: __stitch_m0.a };");
        assert_eq!(lines[4], "");
    }

    #[test]
    fn test_module_bindings_named_module_and_exports() {
        let units = render(
            vec![script(
                "main.js",
                "const module = 'm', exports = {};\nexport { module };\n",
                &[],
            )],
            SplitPolicy::Single,
        );
        assert_eq!(
            units[0].text,
            "__stitch_define(0, function (__stitch_module, __stitch_exports, __stitch_require) { \
             __stitch_esm(__stitch_exports); \
             __stitch_export(__stitch_exports, {\"module\": function () { return module; }});\n\
             const module = 'm', exports = {};\n\
             \n\
             });\n"
        );
    }

    #[test]
    fn test_anonymous_default_function_stays_a_declaration() {
        let units = render(
            vec![script("main.js", "export default function () { return 1; }\n", &[])],
            SplitPolicy::Single,
        );
        let lines: Vec<&str> = units[0].text.lines().collect();
        assert_eq!(lines[1], "function  __stitch_default_export() { return 1; }");
    }

    #[test]
    fn test_json_body() {
        let body = json_body("{\n  \"a\": 1\n}\n");
        assert_eq!(body.text, "module.exports = {\n  \"a\": 1\n};\n");
        assert_eq!(body.line_count, 3);
    }

    #[test]
    fn test_member_access() {
        assert_eq!(member("m", "value"), "m.value");
        assert_eq!(member("m", "kebab-case"), "m[\"kebab-case\"]");
    }
}
