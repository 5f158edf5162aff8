//! Python extractor using tree-sitter-python.
//!
//! Recognizes Odoo model classes (`_name` / `_inherit`), their fields and
//! methods, and HTTP controllers with their routes.

use crate::candidate::Candidate;
use crate::extractor::{Extraction, FileContext, SourceExtractor};
use crate::languages::qualify;
use crate::scanner::MANIFEST_FILES;
use odix_core::{AttrValue, Entity, EntityKey, EntityKind, OdixError, RelationshipKind, TargetRef};
use std::path::Path;
use tree_sitter::{Node, Parser, Tree};

const RELATIONAL_FIELDS: &[&str] = &["Many2one", "One2many", "Many2many"];

/// Field keyword arguments copied into attributes when literal.
const FIELD_KWARGS: &[&str] = &[
    "string",
    "required",
    "readonly",
    "store",
    "index",
    "compute",
    "related",
    "comodel_name",
    "inverse_name",
    "help",
    "default",
];

/// Python extractor for Odoo model and controller sources.
pub struct PythonExtractor;

impl PythonExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceExtractor for PythonExtractor {
    fn name(&self) -> &str {
        "python"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("py")
    }

    fn extract(&self, ctx: &FileContext<'_>, source: &[u8]) -> Result<Extraction, OdixError> {
        let tree = parse_python(ctx.file_path, source)?;
        let mut out = Extraction::default();
        visit(tree.root_node(), source, ctx, &mut out);
        Ok(out)
    }
}

/// Parse Python source, rejecting trees with syntax errors.
pub(crate) fn parse_python(file_path: &str, source: &[u8]) -> Result<Tree, OdixError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| OdixError::parse(file_path, e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| OdixError::parse(file_path, "parser returned no tree"))?;
    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_line(root).unwrap_or(0);
        return Err(OdixError::parse(
            file_path,
            format!("syntax error near line {line}"),
        ));
    }
    Ok(tree)
}

fn first_error_line(node: Node) -> Option<u32> {
    if node.is_error() || node.is_missing() {
        return Some(line_of(node));
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error_line)
}

fn visit(node: Node, source: &[u8], ctx: &FileContext<'_>, out: &mut Extraction) {
    match node.kind() {
        "class_definition" => {
            extract_class(node, source, ctx, out);
            return;
        }
        // Top-level functions carry no Odoo semantics.
        "function_definition" => return,
        _ => {}
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, source, ctx, out);
    }
}

// ── Class Classification ──────────────────────────────────────────────────

/// Class-level declarations gathered in one pass over the body.
#[derive(Default)]
struct ClassBody<'t> {
    name: Option<String>,
    inherit: Vec<String>,
    inherits: Vec<(String, String)>,
    description: Option<String>,
    table: Option<String>,
    order: Option<String>,
    rec_name: Option<String>,
    fields: Vec<(String, Node<'t>)>,
    methods: Vec<Method<'t>>,
}

struct Method<'t> {
    node: Node<'t>,
    decorators: Vec<Node<'t>>,
}

fn extract_class(node: Node, source: &[u8], ctx: &FileContext<'_>, out: &mut Extraction) {
    let Some(class_name) = node
        .child_by_field_name("name")
        .map(|n| node_text(n, source))
    else {
        return;
    };
    let bases: Vec<String> = node
        .child_by_field_name("superclasses")
        .map(|args| {
            let mut cursor = args.walk();
            args.named_children(&mut cursor)
                .filter(|c| c.kind() != "keyword_argument")
                .map(|c| node_text(c, source))
                .collect()
        })
        .unwrap_or_default();
    let Some(body_node) = node.child_by_field_name("body") else {
        return;
    };
    let body = read_class_body(body_node, source);

    let is_controller = bases.iter().any(|b| b.ends_with("Controller"))
        || body.methods.iter().any(|m| route_decorator(m, source).is_some());

    let line = line_of(node);
    if body.name.is_some() || !body.inherit.is_empty() {
        extract_model(&class_name, line, &bases, &body, source, ctx, out);
    } else if is_controller {
        extract_controller(&class_name, &bases, &body, source, ctx, out);
    }
}

fn read_class_body<'t>(body: Node<'t>, source: &[u8]) -> ClassBody<'t> {
    let mut class = ClassBody::default();
    let mut cursor = body.walk();
    for stmt in body.named_children(&mut cursor) {
        match stmt.kind() {
            "expression_statement" => {
                let Some(assign) = stmt.named_child(0).filter(|n| n.kind() == "assignment") else {
                    continue;
                };
                let (Some(left), Some(right)) = (
                    assign.child_by_field_name("left"),
                    assign.child_by_field_name("right"),
                ) else {
                    continue;
                };
                if left.kind() != "identifier" {
                    continue;
                }
                let target = node_text(left, source);
                match target.as_str() {
                    "_name" => class.name = string_literal(right, source),
                    "_inherit" => class.inherit = string_list(right, source),
                    "_inherits" => class.inherits = string_pairs(right, source),
                    "_description" => class.description = string_literal(right, source),
                    "_table" => class.table = string_literal(right, source),
                    "_order" => class.order = string_literal(right, source),
                    "_rec_name" => class.rec_name = string_literal(right, source),
                    _ if is_field_call(right, source) => class.fields.push((target, right)),
                    _ => {}
                }
            }
            "function_definition" => class.methods.push(Method {
                node: stmt,
                decorators: Vec::new(),
            }),
            "decorated_definition" => {
                let Some(def) = stmt
                    .child_by_field_name("definition")
                    .filter(|d| d.kind() == "function_definition")
                else {
                    continue;
                };
                let mut dc = stmt.walk();
                let decorators = stmt
                    .named_children(&mut dc)
                    .filter(|c| c.kind() == "decorator")
                    .collect();
                class.methods.push(Method {
                    node: def,
                    decorators,
                });
            }
            _ => {}
        }
    }
    class
}

/// `fields.Char(...)` and friends.
fn is_field_call(node: Node, source: &[u8]) -> bool {
    node.kind() == "call"
        && node
            .child_by_field_name("function")
            .filter(|f| f.kind() == "attribute")
            .and_then(|f| f.child_by_field_name("object"))
            .is_some_and(|obj| node_text(obj, source) == "fields")
}

// ── Models ────────────────────────────────────────────────────────────────

fn extract_model(
    class_name: &str,
    line: u32,
    bases: &[String],
    body: &ClassBody<'_>,
    source: &[u8],
    ctx: &FileContext<'_>,
    out: &mut Extraction,
) {
    let (model_name, is_extension) = match &body.name {
        Some(name) => (name.clone(), body.inherit.iter().any(|i| i == name)),
        None => (body.inherit[0].clone(), true),
    };
    let parents: Vec<&String> = body.inherit.iter().filter(|i| **i != model_name).collect();
    if is_extension {
        out.push_candidate(Candidate::new(
            RelationshipKind::Modification,
            EntityKey::module_key(ctx.module),
            TargetRef::unresolved(EntityKind::Model, &model_name, None),
            ctx.file_path,
            line,
        ));
        // Mixins added by this module to the extended model.
        let extended = EntityKey::new(EntityKind::Model, model_name.clone(), None, ctx.module);
        for parent in &parents {
            out.push_candidate(Candidate::new(
                RelationshipKind::Inheritance,
                extended.clone(),
                TargetRef::unresolved(EntityKind::Model, parent.as_str(), None),
                ctx.file_path,
                line,
            ));
        }
    } else {
        let mut model = Entity::new(EntityKind::Model, &model_name, ctx.module, ctx.file_path, line)
            .with_attr("model_type", model_type(bases))
            .with_attr("class_name", class_name);
        if let Some(d) = &body.description {
            model.set_attr("description", d.as_str());
        }
        if let Some(t) = &body.table {
            model.set_attr("table", t.as_str());
        }
        if let Some(o) = &body.order {
            model.set_attr("order", o.as_str());
        }
        if let Some(r) = &body.rec_name {
            model.set_attr("rec_name", r.as_str());
        }
        if !body.inherit.is_empty() {
            model.set_attr("inherit", body.inherit.join(","));
        }
        let key = model.key();
        for parent in &parents {
            out.push_candidate(Candidate::new(
                RelationshipKind::Inheritance,
                key.clone(),
                TargetRef::unresolved(EntityKind::Model, parent.as_str(), None),
                ctx.file_path,
                line,
            ));
        }
        for (parent, _field) in &body.inherits {
            out.push_candidate(Candidate::new(
                RelationshipKind::Inheritance,
                key.clone(),
                TargetRef::unresolved(EntityKind::Model, parent, None),
                ctx.file_path,
                line,
            ));
        }
        out.push_entity(model);
    }

    for (field_name, call) in &body.fields {
        extract_field(field_name, *call, &model_name, is_extension, source, ctx, out);
    }

    // Super calls go to the extended model first, then to each inherited
    // model in declaration order.
    let super_parents: Vec<String> = if is_extension {
        std::iter::once(&model_name).chain(parents).cloned().collect()
    } else if parents.is_empty() {
        vec![model_name.clone()]
    } else {
        parents.into_iter().cloned().collect()
    };
    for method in &body.methods {
        extract_method(method, &model_name, &super_parents, is_extension, source, ctx, out);
    }
}

fn model_type(bases: &[String]) -> &'static str {
    if bases.iter().any(|b| b.ends_with("TransientModel")) {
        "transient"
    } else if bases.iter().any(|b| b.ends_with("AbstractModel")) {
        "abstract"
    } else {
        "regular"
    }
}

fn extract_field(
    field_name: &str,
    call: Node,
    model_name: &str,
    in_extension: bool,
    source: &[u8],
    ctx: &FileContext<'_>,
    out: &mut Extraction,
) {
    let field_type = call
        .child_by_field_name("function")
        .and_then(|f| f.child_by_field_name("attribute"))
        .map(|a| node_text(a, source))
        .unwrap_or_default();
    let line = line_of(call);
    let mut field = Entity::new(EntityKind::Field, field_name, ctx.module, ctx.file_path, line)
        .with_parent(model_name)
        .with_attr("field_type", field_type.as_str());

    let (positional, keywords) = call_arguments(call, source);
    let relational = RELATIONAL_FIELDS.contains(&field_type.as_str());
    if relational {
        if let Some(comodel) = positional.first().and_then(|n| string_literal(*n, source)) {
            field.set_attr("comodel_name", comodel);
        }
        if field_type == "One2many" {
            if let Some(inverse) = positional.get(1).and_then(|n| string_literal(*n, source)) {
                field.set_attr("inverse_name", inverse);
            }
        }
    } else if field_type != "Selection" {
        if let Some(label) = positional.first().and_then(|n| string_literal(*n, source)) {
            field.set_attr("string", label);
        }
    }
    for (name, value) in &keywords {
        if FIELD_KWARGS.contains(&name.as_str()) {
            if let Some(literal) = literal_value(*value, source) {
                field.set_attr(name, literal);
            } else if name == "compute" && value.kind() == "identifier" {
                field.set_attr(name, node_text(*value, source));
            }
        } else if name == "selection_add" {
            field.set_attr("selection_add", true);
        }
    }

    let key = field.key();
    if relational {
        if let Some(AttrValue::Text(comodel)) = field.attr("comodel_name") {
            out.push_candidate(Candidate::new(
                RelationshipKind::Reference,
                key.clone(),
                TargetRef::unresolved(EntityKind::Model, comodel.as_str(), None),
                ctx.file_path,
                line,
            ));
        }
    }
    if let Some(AttrValue::Text(compute)) = field.attr("compute") {
        out.push_candidate(Candidate::new(
            RelationshipKind::Reference,
            key.clone(),
            TargetRef::unresolved(
                EntityKind::Function,
                compute.as_str(),
                Some(model_name.to_string()),
            ),
            ctx.file_path,
            line,
        ));
    }
    if in_extension {
        out.push_candidate(
            Candidate::new(
                RelationshipKind::Modification,
                key,
                TargetRef::unresolved(EntityKind::Field, field_name, Some(model_name.to_string())),
                ctx.file_path,
                line,
            )
            .speculative(),
        );
    }
    out.push_entity(field);
}

// ── Methods ───────────────────────────────────────────────────────────────

fn extract_method(
    method: &Method<'_>,
    parent: &str,
    super_parents: &[String],
    in_extension: bool,
    source: &[u8],
    ctx: &FileContext<'_>,
    out: &mut Extraction,
) -> Option<EntityKey> {
    let name = node_text(method.node.child_by_field_name("name")?, source);
    let body = method.node.child_by_field_name("body")?;
    let line = line_of(method.node);

    let decorators: Vec<String> = method
        .decorators
        .iter()
        .filter_map(|d| decorator_name(*d, source))
        .collect();
    let calls_super = calls_super(body, &name, source);

    let mut function = Entity::new(EntityKind::Function, &name, ctx.module, ctx.file_path, line)
        .with_parent(parent)
        .with_attr("is_private", name.starts_with('_'))
        .with_attr("calls_super", calls_super)
        .with_attr("is_override", calls_super || in_extension);
    if !decorators.is_empty() {
        function.set_attr("decorators", decorators.join(","));
    }
    let key = function.key();

    if let (true, Some((primary, rest))) = (calls_super, super_parents.split_first()) {
        let target = |parent: &String| {
            TargetRef::unresolved(EntityKind::Function, &name, Some(parent.clone()))
        };
        out.push_candidate(
            Candidate::new(
                RelationshipKind::Override,
                key.clone(),
                target(primary),
                ctx.file_path,
                line,
            )
            .with_fallbacks(rest.iter().map(target).collect()),
        );
    }
    collect_env_references(body, &key, source, ctx, out);
    out.push_entity(function);
    Some(key)
}

/// Decorator expression without arguments: `api.depends`, `http.route`.
fn decorator_name(decorator: Node, source: &[u8]) -> Option<String> {
    let expr = decorator.named_child(0)?;
    let target = if expr.kind() == "call" {
        expr.child_by_field_name("function")?
    } else {
        expr
    };
    Some(node_text(target, source))
}

/// Whether the body contains `super(...).<name>(`.
fn calls_super(node: Node, name: &str, source: &[u8]) -> bool {
    if node.kind() == "call" {
        let is_super = node
            .child_by_field_name("function")
            .filter(|f| f.kind() == "attribute")
            .is_some_and(|f| {
                let attr_matches = f
                    .child_by_field_name("attribute")
                    .is_some_and(|a| node_text(a, source) == name);
                let on_super = f
                    .child_by_field_name("object")
                    .filter(|o| o.kind() == "call")
                    .and_then(|o| o.child_by_field_name("function"))
                    .is_some_and(|callee| node_text(callee, source) == "super");
                attr_matches && on_super
            });
        if is_super {
            return true;
        }
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().any(|c| calls_super(c, name, source))
}

/// `env['model']` subscripts and `env.ref('module.xid')` calls.
fn collect_env_references(
    node: Node,
    source_key: &EntityKey,
    source: &[u8],
    ctx: &FileContext<'_>,
    out: &mut Extraction,
) {
    match node.kind() {
        "subscript" => {
            let on_env = node
                .child_by_field_name("value")
                .is_some_and(|v| is_env(v, source));
            if on_env {
                if let Some(model) = node
                    .child_by_field_name("subscript")
                    .and_then(|s| string_literal(s, source))
                {
                    out.push_candidate(Candidate::new(
                        RelationshipKind::Reference,
                        source_key.clone(),
                        TargetRef::unresolved(EntityKind::Model, model, None),
                        ctx.file_path,
                        line_of(node),
                    ));
                }
            }
        }
        "call" => {
            let is_env_ref = node
                .child_by_field_name("function")
                .filter(|f| f.kind() == "attribute")
                .is_some_and(|f| {
                    f.child_by_field_name("attribute")
                        .is_some_and(|a| node_text(a, source) == "ref")
                        && f.child_by_field_name("object")
                            .is_some_and(|o| is_env(o, source))
                });
            if is_env_ref {
                let (positional, _) = call_arguments(node, source);
                if let Some(xml_id) = positional.first().and_then(|n| string_literal(*n, source)) {
                    out.push_candidate(Candidate::new(
                        RelationshipKind::Reference,
                        source_key.clone(),
                        TargetRef::xml_ref(qualify(&xml_id, ctx.module)),
                        ctx.file_path,
                        line_of(node),
                    ));
                }
            }
        }
        _ => {}
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_env_references(child, source_key, source, ctx, out);
    }
}

/// `env`, `self.env`, `request.env`, `record.sudo().env`...
fn is_env(node: Node, source: &[u8]) -> bool {
    match node.kind() {
        "identifier" => node_text(node, source) == "env",
        "attribute" => node
            .child_by_field_name("attribute")
            .is_some_and(|a| node_text(a, source) == "env"),
        _ => false,
    }
}

// ── Controllers ───────────────────────────────────────────────────────────

fn extract_controller(
    class_name: &str,
    bases: &[String],
    body: &ClassBody<'_>,
    source: &[u8],
    ctx: &FileContext<'_>,
    out: &mut Extraction,
) {
    // Overridden handlers live on the first base class.
    let super_parent = bases
        .first()
        .map(|b| b.rsplit('.').next().unwrap_or(b).to_string())
        .unwrap_or_else(|| class_name.to_string());
    let super_parents = [super_parent];

    for method in &body.methods {
        let Some(function_key) =
            extract_method(method, class_name, &super_parents, false, source, ctx, out)
        else {
            continue;
        };
        let Some(route) = route_decorator(method, source) else {
            continue;
        };
        let (positional, keywords) = call_arguments(route, source);
        let mut paths: Vec<String> = positional
            .first()
            .map(|n| string_list(*n, source))
            .unwrap_or_default();
        let mut route_type = AttrValue::from("http");
        let mut auth = AttrValue::from("user");
        let mut extra: Vec<(&str, AttrValue)> = Vec::new();
        for (name, value) in &keywords {
            match name.as_str() {
                "route" => paths.extend(string_list(*value, source)),
                "type" => {
                    if let Some(v) = literal_value(*value, source) {
                        route_type = v;
                    }
                }
                "auth" => {
                    if let Some(v) = literal_value(*value, source) {
                        auth = v;
                    }
                }
                "methods" => {
                    let methods = string_list(*value, source);
                    if !methods.is_empty() {
                        extra.push(("methods", AttrValue::from(methods.join(","))));
                    }
                }
                "website" | "csrf" => {
                    if let Some(v) = literal_value(*value, source) {
                        extra.push((if name == "website" { "website" } else { "csrf" }, v));
                    }
                }
                _ => {}
            }
        }

        let line = line_of(route);
        for path in paths {
            let mut entity =
                Entity::new(EntityKind::ControllerRoute, path, ctx.module, ctx.file_path, line)
                    .with_parent(class_name)
                    .with_attr("route_type", route_type.clone())
                    .with_attr("auth", auth.clone())
                    .with_attr("function", function_key.name.as_str());
            for (key, value) in &extra {
                entity.set_attr(key, value.clone());
            }
            out.push_entity(entity);
        }
    }
}

/// The `@http.route(...)` / `@route(...)` call of a method, if any.
fn route_decorator<'t>(method: &Method<'t>, source: &[u8]) -> Option<Node<'t>> {
    method.decorators.iter().find_map(|d| {
        let call = d.named_child(0).filter(|e| e.kind() == "call")?;
        let callee = node_text(call.child_by_field_name("function")?, source);
        (callee == "http.route" || callee == "route").then_some(call)
    })
}

// ── Literal Helpers ───────────────────────────────────────────────────────

fn node_text(node: Node, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or("").to_string()
}

/// 1-based line of a node.
pub(crate) fn line_of(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// Split call arguments into positional expressions and keyword pairs.
pub(crate) fn call_arguments<'t>(
    call: Node<'t>,
    source: &[u8],
) -> (Vec<Node<'t>>, Vec<(String, Node<'t>)>) {
    let mut positional = Vec::new();
    let mut keywords = Vec::new();
    let Some(args) = call.child_by_field_name("arguments") else {
        return (positional, keywords);
    };
    let mut cursor = args.walk();
    for arg in args.named_children(&mut cursor) {
        match arg.kind() {
            "keyword_argument" => {
                if let (Some(name), Some(value)) = (
                    arg.child_by_field_name("name"),
                    arg.child_by_field_name("value"),
                ) {
                    keywords.push((node_text(name, source), value));
                }
            }
            "comment" => {}
            _ => positional.push(arg),
        }
    }
    (positional, keywords)
}

/// Value of a plain string literal (implicit concatenation included).
pub(crate) fn string_literal(node: Node, source: &[u8]) -> Option<String> {
    match node.kind() {
        "string" => unquote(&node_text(node, source)),
        "concatenated_string" => {
            let mut cursor = node.walk();
            let parts: Option<Vec<String>> = node
                .named_children(&mut cursor)
                .map(|part| string_literal(part, source))
                .collect();
            parts.map(|p| p.concat())
        }
        "parenthesized_expression" => node
            .named_child(0)
            .and_then(|inner| string_literal(inner, source)),
        _ => None,
    }
}

fn unquote(raw: &str) -> Option<String> {
    let prefix_len = raw
        .find(|c: char| c == '\'' || c == '"')
        .filter(|&n| raw[..n].chars().all(|c| c.is_ascii_alphabetic()))?;
    if raw[..prefix_len].to_ascii_lowercase().contains('f') {
        return None;
    }
    let body = &raw[prefix_len..];
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= 2 * quote.len() && body.starts_with(quote) && body.ends_with(quote) {
            return Some(body[quote.len()..body.len() - quote.len()].to_string());
        }
    }
    None
}

/// A string, or a list / tuple of strings.
pub(crate) fn string_list(node: Node, source: &[u8]) -> Vec<String> {
    match node.kind() {
        "list" | "tuple" => {
            let mut cursor = node.walk();
            node.named_children(&mut cursor)
                .filter_map(|item| string_literal(item, source))
                .collect()
        }
        _ => string_literal(node, source).into_iter().collect(),
    }
}

/// String keys and values of a dict literal: `{'res.partner': 'partner_id'}`.
fn string_pairs(node: Node, source: &[u8]) -> Vec<(String, String)> {
    if node.kind() != "dictionary" {
        return Vec::new();
    }
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|p| p.kind() == "pair")
        .filter_map(|pair| {
            let key = string_literal(pair.child_by_field_name("key")?, source)?;
            let value = string_literal(pair.child_by_field_name("value")?, source)?;
            Some((key, value))
        })
        .collect()
}

/// Scalar literal (string, bool, integer, float) as an attribute value.
pub(crate) fn literal_value(node: Node, source: &[u8]) -> Option<AttrValue> {
    match node.kind() {
        "true" => Some(AttrValue::Bool(true)),
        "false" => Some(AttrValue::Bool(false)),
        "integer" => node_text(node, source)
            .replace('_', "")
            .parse::<i64>()
            .ok()
            .map(AttrValue::Int),
        "float" => node_text(node, source)
            .replace('_', "")
            .parse::<f64>()
            .ok()
            .map(AttrValue::Float),
        "unary_operator" => {
            let operand = node.child_by_field_name("argument")?;
            let negative = node_text(node, source).starts_with('-');
            match literal_value(operand, source)? {
                AttrValue::Int(i) if negative => Some(AttrValue::Int(-i)),
                AttrValue::Float(f) if negative => Some(AttrValue::Float(-f)),
                other => Some(other),
            }
        }
        _ => string_literal(node, source).map(AttrValue::Text),
    }
}

/// Whether the file is a module manifest rather than ordinary source.
pub(crate) fn is_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| MANIFEST_FILES.contains(&n))
}
