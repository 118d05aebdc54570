//! Scope-aware lookup of references to imported bindings
//!
//! Imported names are emitted as reads through the imported module's
//! exports object, so every reference that resolves to an import binding
//! has to be found, and every reference to a shadowing declaration left
//! alone. The walk runs twice over the same tree: the first run records the
//! names each scope declares, the second resolves identifier references
//! against the chain of enclosing scopes. Scopes are numbered in the order
//! the visitor enters them, which is identical in both runs.

use std::cell::Cell;

use oxc_allocator::Vec as ArenaVec;
use oxc_ast::{
    Visit,
    ast::{
        ArrowFunctionExpression, AssignmentTargetPropertyIdentifier, CallExpression, CatchClause,
        Class, ExportNamedDeclaration, Expression, FormalParameters, Function, IdentifierReference,
        ImportDeclaration, ObjectProperty, Program, TSClassImplements, TSInterfaceDeclaration, TSType,
        TSTypeAliasDeclaration, TaggedTemplateExpression, VariableDeclaration,
    },
    visit::walk,
};
use oxc_span::Span;
use oxc_syntax::scope::{ScopeFlags, ScopeId};
use rustc_hash::FxHashSet;

use super::import_discovery::collect_pattern_names;

/// Syntactic position of a reference, which decides its replacement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferenceContext {
    #[default]
    Plain,
    /// `{ name }` in an object literal or an assignment pattern
    Shorthand,
    /// Callee of a call or tag of a tagged template
    Callee,
}

/// A reference to an import binding of the module's top level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingReference {
    pub span: Span,
    pub local: String,
    pub context: ReferenceContext,
}

/// Find every reference in `program` that resolves to one of `imported`
pub(super) fn find_binding_references(
    program: &Program<'_>,
    imported: &FxHashSet<String>,
) -> Vec<BindingReference> {
    if imported.is_empty() {
        return Vec::new();
    }
    let mut finder = ReferenceFinder::new(imported);
    finder.visit_program(program);
    finder.start_resolving();
    finder.visit_program(program);
    finder.references
}

#[derive(Debug)]
struct Scope {
    flags: ScopeFlags,
    names: FxHashSet<String>,
}

struct ReferenceFinder<'n> {
    imported: &'n FxHashSet<String>,
    /// `false` while declarations are collected, `true` while references resolve
    resolving: bool,
    scopes: Vec<Scope>,
    next_scope: usize,
    stack: Vec<usize>,
    /// Names the next scope entered declares (parameters, expression names)
    pending: Vec<String>,
    /// Span of the identifier that is the callee of the enclosing call
    callee: Option<Span>,
    references: Vec<BindingReference>,
}

impl<'n> ReferenceFinder<'n> {
    fn new(imported: &'n FxHashSet<String>) -> Self {
        Self {
            imported,
            resolving: false,
            scopes: Vec::new(),
            next_scope: 0,
            stack: Vec::new(),
            pending: Vec::new(),
            callee: None,
            references: Vec::new(),
        }
    }

    fn start_resolving(&mut self) {
        self.resolving = true;
        self.next_scope = 0;
        self.stack.clear();
        self.pending.clear();
    }

    fn declare_lexical(&mut self, names: Vec<String>) {
        if self.resolving {
            return;
        }
        if let Some(scope) = self.stack.last().and_then(|idx| self.scopes.get_mut(*idx)) {
            scope.names.extend(names);
        }
    }

    /// `var` declarations belong to the closest function or top-level scope
    fn declare_var(&mut self, names: Vec<String>) {
        if self.resolving {
            return;
        }
        let target = self
            .stack
            .iter()
            .rev()
            .copied()
            .find(|idx| self.scopes[*idx].flags.is_var());
        if let Some(idx) = target {
            self.scopes[idx].names.extend(names);
        }
    }

    fn declare_in_next_scope(&mut self, names: impl IntoIterator<Item = String>) {
        if !self.resolving {
            self.pending.extend(names);
        }
    }

    /// Whether a scope below the top level declares `name`
    fn is_shadowed(&self, name: &str) -> bool {
        self.stack
            .iter()
            .filter_map(|idx| self.scopes.get(*idx))
            .any(|scope| !scope.flags.is_top() && scope.names.contains(name))
    }

    fn reference(&mut self, ident: &IdentifierReference<'_>, context: ReferenceContext) {
        if !self.resolving || !self.imported.contains(ident.name.as_str()) {
            return;
        }
        if self.is_shadowed(&ident.name) {
            return;
        }
        self.references.push(BindingReference {
            span: ident.span,
            local: ident.name.to_string(),
            context,
        });
    }
}

fn parameter_names(params: &FormalParameters<'_>) -> Vec<String> {
    let mut names = Vec::new();
    for param in &params.items {
        collect_pattern_names(&param.pattern, &mut names);
    }
    if let Some(rest) = &params.rest {
        collect_pattern_names(&rest.argument, &mut names);
    }
    names
}

impl<'a> Visit<'a> for ReferenceFinder<'_> {
    fn enter_scope(&mut self, flags: ScopeFlags, _scope_id: &Cell<Option<ScopeId>>) {
        let idx = if self.resolving {
            self.next_scope += 1;
            self.next_scope - 1
        } else {
            self.scopes.push(Scope {
                flags,
                names: self.pending.drain(..).collect(),
            });
            self.scopes.len() - 1
        };
        self.stack.push(idx);
    }

    fn leave_scope(&mut self) {
        self.stack.pop();
    }

    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        let context = if self.callee == Some(ident.span) {
            ReferenceContext::Callee
        } else {
            ReferenceContext::Plain
        };
        self.reference(ident, context);
    }

    fn visit_variable_declaration(&mut self, decl: &VariableDeclaration<'a>) {
        let mut names = Vec::new();
        for declarator in &decl.declarations {
            collect_pattern_names(&declarator.id, &mut names);
        }
        if decl.kind.is_var() {
            self.declare_var(names);
        } else {
            self.declare_lexical(names);
        }
        walk::walk_variable_declaration(self, decl);
    }

    fn visit_function(&mut self, func: &Function<'a>, flags: ScopeFlags) {
        let name = func.id.as_ref().map(|id| id.name.to_string());
        if func.is_declaration() {
            self.declare_lexical(name.into_iter().collect());
        } else {
            self.declare_in_next_scope(name);
        }
        self.declare_in_next_scope(parameter_names(&func.params));
        walk::walk_function(self, func, flags);
    }

    fn visit_arrow_function_expression(&mut self, arrow: &ArrowFunctionExpression<'a>) {
        self.declare_in_next_scope(parameter_names(&arrow.params));
        walk::walk_arrow_function_expression(self, arrow);
    }

    fn visit_class(&mut self, class: &Class<'a>) {
        let name = class.id.as_ref().map(|id| id.name.to_string());
        if class.is_declaration() {
            self.declare_lexical(name.into_iter().collect());
        } else if class.decorators.is_empty() {
            self.declare_in_next_scope(name);
        }
        walk::walk_class(self, class);
    }

    fn visit_catch_clause(&mut self, clause: &CatchClause<'a>) {
        if let Some(param) = &clause.param {
            let mut names = Vec::new();
            collect_pattern_names(&param.pattern, &mut names);
            self.declare_in_next_scope(names);
        }
        walk::walk_catch_clause(self, clause);
    }

    fn visit_object_property(&mut self, prop: &ObjectProperty<'a>) {
        if prop.shorthand {
            if let Expression::Identifier(ident) = &prop.value {
                self.reference(ident, ReferenceContext::Shorthand);
                return;
            }
        }
        walk::walk_object_property(self, prop);
    }

    fn visit_assignment_target_property_identifier(
        &mut self,
        prop: &AssignmentTargetPropertyIdentifier<'a>,
    ) {
        self.reference(&prop.binding, ReferenceContext::Shorthand);
        if let Some(init) = &prop.init {
            self.visit_expression(init);
        }
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(ident) = &call.callee {
            self.callee = Some(ident.span);
        }
        walk::walk_call_expression(self, call);
    }

    fn visit_tagged_template_expression(&mut self, tagged: &TaggedTemplateExpression<'a>) {
        if let Expression::Identifier(ident) = &tagged.tag {
            self.callee = Some(ident.span);
        }
        walk::walk_tagged_template_expression(self, tagged);
    }

    // Import declarations only introduce the bindings being looked up
    fn visit_import_declaration(&mut self, _decl: &ImportDeclaration<'a>) {}

    // `export { name }` lists are removed; their getters are rewritten instead
    fn visit_export_named_declaration(&mut self, decl: &ExportNamedDeclaration<'a>) {
        if decl.source.is_none() {
            if let Some(declaration) = &decl.declaration {
                self.visit_declaration(declaration);
            }
        }
    }

    fn visit_ts_type(&mut self, _ty: &TSType<'a>) {}

    fn visit_ts_type_alias_declaration(&mut self, _decl: &TSTypeAliasDeclaration<'a>) {}

    fn visit_ts_interface_declaration(&mut self, _decl: &TSInterfaceDeclaration<'a>) {}

    fn visit_ts_class_implementses(&mut self, _it: &ArenaVec<'a, TSClassImplements<'a>>) {}
}
