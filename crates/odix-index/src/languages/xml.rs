//! XML data file extraction using roxmltree.
//!
//! Handles `<record>` declarations of the well-known models (views, menus,
//! actions, reports, rules, access rights, crons) plus the shortcut tags
//! `<template>`, `<menuitem>`, `<act_window>` and `<report>`. Any other
//! record becomes an `xml_id` entity.

use crate::candidate::Candidate;
use crate::extractor::{Extraction, FileContext, SourceExtractor};
use crate::languages::{markup_entity, qualify, qualify_list};
use odix_core::{Entity, EntityKey, EntityKind, OdixError, RelationshipKind, TargetRef};
use roxmltree::{Document, Node, ParsingOptions};
use std::collections::HashMap;
use std::path::Path;

const ROOT_TAGS: &[&str] = &["odoo", "openerp", "data"];

const ACTION_MODELS: &[&str] = &[
    "ir.actions.act_window",
    "ir.actions.server",
    "ir.actions.client",
    "ir.actions.act_url",
];

pub struct XmlExtractor;

impl XmlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for XmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceExtractor for XmlExtractor {
    fn name(&self) -> &str {
        "xml"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("xml")
    }

    fn extract(&self, ctx: &FileContext<'_>, source: &[u8]) -> Result<Extraction, OdixError> {
        let text = std::str::from_utf8(source)
            .map_err(|e| OdixError::parse(ctx.file_path, format!("not valid UTF-8: {e}")))?;
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(text, options)
            .map_err(|e| OdixError::parse(ctx.file_path, e.to_string()))?;

        let root = doc.root_element();
        if !ROOT_TAGS.contains(&root.tag_name().name()) {
            tracing::debug!(
                "Skipping {}: root element <{}> is not a data file",
                ctx.file_path,
                root.tag_name().name()
            );
            return Ok(Extraction::default());
        }

        let mut file = XmlFile {
            doc: &doc,
            ctx,
            out: Extraction::default(),
        };
        for node in root.descendants().filter(|n| n.is_element()) {
            if inside_declaration(node) {
                continue;
            }
            match node.tag_name().name() {
                "record" => file.record(node),
                "template" => file.template(node),
                "menuitem" => file.menuitem(node),
                "act_window" => file.act_window(node),
                "report" => file.report(node),
                _ => {}
            }
        }
        Ok(file.out)
    }
}

/// Elements nested in a record or template body (view archs, QWeb) are
/// content, not declarations.
fn inside_declaration(node: Node<'_, '_>) -> bool {
    node.ancestors()
        .skip(1)
        .any(|a| a.has_tag_name("record") || a.has_tag_name("template") || a.has_tag_name("field"))
}

struct XmlFile<'d, 'input, 'c> {
    doc: &'d Document<'input>,
    ctx: &'c FileContext<'c>,
    out: Extraction,
}

impl<'d, 'input, 'c> XmlFile<'d, 'input, 'c> {
    fn line(&self, node: Node<'_, '_>) -> u32 {
        self.doc.text_pos_at(node.range().start).row
    }

    fn entity(&mut self, kind: EntityKind, id: &str, line: u32) -> Entity {
        markup_entity(&mut self.out, self.ctx, kind, id, line)
    }

    fn relate(&mut self, kind: RelationshipKind, source: &EntityKey, target: TargetRef, line: u32) {
        self.out.push_candidate(Candidate::new(
            kind,
            source.clone(),
            target,
            self.ctx.file_path,
            line,
        ));
    }

    /// Reference to a model by technical name.
    fn model_reference(&mut self, source: &EntityKey, model: &str, line: u32) {
        self.relate(
            RelationshipKind::Reference,
            source,
            TargetRef::unresolved(EntityKind::Model, model, None),
            line,
        );
    }

    /// Reference to a markup record; returns the qualified id.
    fn xml_reference(&mut self, kind: RelationshipKind, source: &EntityKey, id: &str, line: u32) -> String {
        let qualified = qualify(id, self.ctx.module);
        self.relate(kind, source, TargetRef::xml_ref(&qualified), line);
        qualified
    }

    fn group_references(&mut self, entity: &mut Entity, groups: Vec<String>, line: u32) {
        if groups.is_empty() {
            return;
        }
        let key = entity.key();
        for group in &groups {
            self.relate(
                RelationshipKind::Reference,
                &key,
                TargetRef::xml_ref(group),
                line,
            );
        }
        entity.set_attr("groups", groups.join(","));
    }

    // ── <record> ───────────────────────────────────────────────────────

    fn record(&mut self, node: Node<'_, '_>) {
        let Some(id) = node.attribute("id") else {
            return;
        };
        let model = node.attribute("model").unwrap_or_default();
        let fields = record_fields(node);
        let line = self.line(node);

        let mut entity = match model {
            "ir.ui.view" => self.view_record(id, &fields, line),
            "ir.ui.menu" => self.menu_record(id, &fields, line),
            m if ACTION_MODELS.contains(&m) => self.action_record(id, m, &fields, line),
            "ir.actions.report" | "ir.actions.report.xml" => self.report_record(id, &fields, line),
            "ir.rule" => self.rule_record(id, &fields, line),
            "ir.model.access" => self.access_record(id, &fields, line),
            "ir.cron" => self.cron_record(id, &fields, line),
            _ => {
                let mut entity = self.entity(EntityKind::XmlId, id, line);
                if !model.is_empty() {
                    entity.set_attr("model", model);
                }
                entity
            }
        };

        let groups: Vec<String> = ["groups_id", "groups"]
            .iter()
            .filter_map(|name| fields.get(name))
            .flat_map(|field| {
                field
                    .attribute("eval")
                    .map(eval_refs)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|g| qualify(&g, self.ctx.module))
            })
            .collect();
        self.group_references(&mut entity, groups, line);
        self.out.push_entity(entity);
    }

    fn view_record(&mut self, id: &str, fields: &Fields<'_, '_>, line: u32) -> Entity {
        let mut view = self.entity(EntityKind::View, id, line);
        let key = view.key();

        if let Some(name) = field_value(fields, "name") {
            view.set_attr("view_name", name);
        }
        if let Some(model) = field_value(fields, "model") {
            self.model_reference(&key, &model, line);
            view.set_attr("model", model);
        }
        if let Some(priority) = field_value(fields, "priority").and_then(|p| p.parse::<i64>().ok()) {
            view.set_attr("priority", priority);
        }
        let view_type = field_value(fields, "type").or_else(|| {
            let arch = fields.get("arch")?;
            let first = arch.children().find(|c| c.is_element())?;
            let tag = first.tag_name().name();
            (tag != "xpath" && tag != "data").then(|| tag.to_string())
        });
        if let Some(view_type) = view_type {
            view.set_attr("view_type", view_type);
        }
        let inherit = fields.get("inherit_id").and_then(|f| f.attribute("ref"));
        if let Some(parent) = inherit {
            let parent = self.xml_reference(RelationshipKind::Inheritance, &key, parent, line);
            view.set_attr("inherit_id", parent);
        }
        let default_mode = if inherit.is_some() {
            "extension"
        } else {
            "primary"
        };
        let mode = field_value(fields, "mode").unwrap_or_else(|| default_mode.to_string());
        view.set_attr("mode", mode);
        view
    }

    fn menu_record(&mut self, id: &str, fields: &Fields<'_, '_>, line: u32) -> Entity {
        let mut menu = self.entity(EntityKind::Menu, id, line);
        let key = menu.key();
        if let Some(name) = field_value(fields, "name") {
            menu.set_attr("menu_name", name);
        }
        if let Some(seq) = field_value(fields, "sequence").and_then(|s| s.parse::<i64>().ok()) {
            menu.set_attr("sequence", seq);
        }
        if let Some(parent) = fields.get("parent_id").and_then(|f| f.attribute("ref")) {
            let parent = self.xml_reference(RelationshipKind::Reference, &key, parent, line);
            menu.set_attr("parent", parent);
        }
        let action = fields.get("action").and_then(|f| {
            f.attribute("ref")
                .map(String::from)
                .or_else(|| f.attribute("eval").and_then(|e| eval_refs(e).into_iter().next()))
        });
        if let Some(action) = action {
            let action = self.xml_reference(RelationshipKind::Reference, &key, &action, line);
            menu.set_attr("action", action);
        }
        menu
    }

    fn action_record(&mut self, id: &str, model: &str, fields: &Fields<'_, '_>, line: u32) -> Entity {
        let mut action = self.entity(EntityKind::Action, id, line);
        let key = action.key();
        action.set_attr("action_type", model.trim_start_matches("ir.actions."));
        if let Some(name) = field_value(fields, "name") {
            action.set_attr("action_name", name);
        }
        if let Some(res_model) = field_value(fields, "res_model") {
            self.model_reference(&key, &res_model, line);
            action.set_attr("res_model", res_model);
        }
        for attr in ["view_mode", "target", "state", "tag", "url"] {
            if let Some(value) = field_value(fields, attr) {
                action.set_attr(attr, value);
            }
        }
        if let Some(view) = fields.get("view_id").and_then(|f| f.attribute("ref")) {
            let view = self.xml_reference(RelationshipKind::Reference, &key, view, line);
            action.set_attr("view_id", view);
        }
        if let Some(model_ref) = fields.get("model_id").and_then(|f| f.attribute("ref")) {
            let model_ref = self.xml_reference(RelationshipKind::Reference, &key, model_ref, line);
            action.set_attr("model_ref", model_ref);
        }
        if let Some(binding) = fields.get("binding_model_id").and_then(|f| f.attribute("ref")) {
            let binding = self.xml_reference(RelationshipKind::Reference, &key, binding, line);
            action.set_attr("binding_model_ref", binding);
        }
        action
    }

    fn report_record(&mut self, id: &str, fields: &Fields<'_, '_>, line: u32) -> Entity {
        let mut report = self.entity(EntityKind::ReportTemplate, id, line);
        let key = report.key();
        if let Some(model) = field_value(fields, "model") {
            self.model_reference(&key, &model, line);
            report.set_attr("model", model);
        }
        if let Some(report_name) = field_value(fields, "report_name") {
            self.xml_reference(RelationshipKind::Reference, &key, &report_name, line);
            report.set_attr("report_name", report_name);
        }
        if let Some(title) = field_value(fields, "name") {
            report.set_attr("report_title", title);
        }
        for attr in ["report_type", "report_file"] {
            if let Some(value) = field_value(fields, attr) {
                report.set_attr(attr, value);
            }
        }
        if let Some(binding) = fields.get("binding_model_id").and_then(|f| f.attribute("ref")) {
            let binding = self.xml_reference(RelationshipKind::Reference, &key, binding, line);
            report.set_attr("binding_model_ref", binding);
        }
        report
    }

    fn rule_record(&mut self, id: &str, fields: &Fields<'_, '_>, line: u32) -> Entity {
        let mut rule = self.entity(EntityKind::RecordRule, id, line);
        let key = rule.key();
        if let Some(name) = field_value(fields, "name") {
            rule.set_attr("rule_name", name);
        }
        if let Some(model_ref) = fields.get("model_id").and_then(|f| f.attribute("ref")) {
            let model_ref = self.xml_reference(RelationshipKind::Reference, &key, model_ref, line);
            rule.set_attr("model_ref", model_ref);
        }
        if let Some(domain) = field_value(fields, "domain_force") {
            rule.set_attr("domain", domain);
        }
        for attr in ["global", "perm_read", "perm_write", "perm_create", "perm_unlink", "active"] {
            if let Some(flag) = fields.get(attr).and_then(|f| field_bool(*f)) {
                rule.set_attr(attr, flag);
            }
        }
        rule
    }

    fn access_record(&mut self, id: &str, fields: &Fields<'_, '_>, line: u32) -> Entity {
        let mut access = self.entity(EntityKind::AccessRight, id, line);
        let key = access.key();
        if let Some(name) = field_value(fields, "name") {
            access.set_attr("access_name", name);
        }
        if let Some(model_ref) = fields.get("model_id").and_then(|f| f.attribute("ref")) {
            let model_ref = self.xml_reference(RelationshipKind::Reference, &key, model_ref, line);
            access.set_attr("model_ref", model_ref);
        }
        if let Some(group) = fields.get("group_id").and_then(|f| f.attribute("ref")) {
            let group = self.xml_reference(RelationshipKind::Reference, &key, group, line);
            access.set_attr("group_ref", group);
        }
        for attr in ["perm_read", "perm_write", "perm_create", "perm_unlink"] {
            if let Some(flag) = fields.get(attr).and_then(|f| field_bool(*f)) {
                access.set_attr(attr, flag);
            }
        }
        access
    }

    fn cron_record(&mut self, id: &str, fields: &Fields<'_, '_>, line: u32) -> Entity {
        let mut cron = self.entity(EntityKind::ScheduledAction, id, line);
        let key = cron.key();
        if let Some(name) = field_value(fields, "name") {
            cron.set_attr("cron_name", name);
        }
        if let Some(model_ref) = fields.get("model_id").and_then(|f| f.attribute("ref")) {
            let model_ref = self.xml_reference(RelationshipKind::Reference, &key, model_ref, line);
            cron.set_attr("model_ref", model_ref);
        }
        if let Some(code) = field_value(fields, "code") {
            cron.set_attr("code", code);
        }
        if let Some(n) = field_value(fields, "interval_number").and_then(|n| n.parse::<i64>().ok()) {
            cron.set_attr("interval_number", n);
        }
        if let Some(unit) = field_value(fields, "interval_type") {
            cron.set_attr("interval_type", unit);
        }
        if let Some(active) = fields.get("active").and_then(|f| field_bool(*f)) {
            cron.set_attr("active", active);
        }
        cron
    }

    // ── Shortcut tags ──────────────────────────────────────────────────

    fn template(&mut self, node: Node<'_, '_>) {
        let Some(id) = node.attribute("id") else {
            return;
        };
        let line = self.line(node);
        let mut view = self.entity(EntityKind::View, id, line);
        let key = view.key();
        view.set_attr("view_type", "qweb");
        if let Some(name) = node.attribute("name") {
            view.set_attr("view_name", name);
        }
        if let Some(priority) = node.attribute("priority").and_then(|p| p.parse::<i64>().ok()) {
            view.set_attr("priority", priority);
        }
        let inherit = node.attribute("inherit_id");
        if let Some(parent) = inherit {
            let parent = self.xml_reference(RelationshipKind::Inheritance, &key, parent, line);
            view.set_attr("inherit_id", parent);
        }
        let primary = node.attribute("primary").is_some_and(is_truthy);
        let mode = if inherit.is_some() && !primary {
            "extension"
        } else {
            "primary"
        };
        view.set_attr("mode", mode);
        let groups = node
            .attribute("groups")
            .map(|g| qualify_list(g, self.ctx.module))
            .unwrap_or_default();
        self.group_references(&mut view, groups, line);
        self.out.push_entity(view);
    }

    fn menuitem(&mut self, node: Node<'_, '_>) {
        let Some(id) = node.attribute("id") else {
            return;
        };
        let line = self.line(node);
        let mut menu = self.entity(EntityKind::Menu, id, line);
        let key = menu.key();
        if let Some(name) = node.attribute("name") {
            menu.set_attr("menu_name", name);
        }
        if let Some(seq) = node.attribute("sequence").and_then(|s| s.parse::<i64>().ok()) {
            menu.set_attr("sequence", seq);
        }
        // Nested menuitems take the enclosing one as parent.
        let parent = node.attribute("parent").or_else(|| {
            node.ancestors()
                .skip(1)
                .find(|a| a.has_tag_name("menuitem"))
                .and_then(|a| a.attribute("id"))
        });
        if let Some(parent) = parent {
            let parent = self.xml_reference(RelationshipKind::Reference, &key, parent, line);
            menu.set_attr("parent", parent);
        }
        if let Some(action) = node.attribute("action") {
            let action = self.xml_reference(RelationshipKind::Reference, &key, action, line);
            menu.set_attr("action", action);
        }
        let groups = node
            .attribute("groups")
            .map(|g| qualify_list(g, self.ctx.module))
            .unwrap_or_default();
        self.group_references(&mut menu, groups, line);
        self.out.push_entity(menu);
    }

    fn act_window(&mut self, node: Node<'_, '_>) {
        let Some(id) = node.attribute("id") else {
            return;
        };
        let line = self.line(node);
        let mut action = self.entity(EntityKind::Action, id, line);
        let key = action.key();
        action.set_attr("action_type", "act_window");
        if let Some(name) = node.attribute("name") {
            action.set_attr("action_name", name);
        }
        if let Some(res_model) = node.attribute("res_model") {
            self.model_reference(&key, res_model, line);
            action.set_attr("res_model", res_model);
        }
        for attr in ["view_mode", "target"] {
            if let Some(value) = node.attribute(attr) {
                action.set_attr(attr, value);
            }
        }
        if let Some(binding) = node
            .attribute("binding_model")
            .or_else(|| node.attribute("src_model"))
        {
            self.model_reference(&key, binding, line);
            action.set_attr("binding_model", binding);
        }
        if let Some(view) = node.attribute("view_id") {
            let view = self.xml_reference(RelationshipKind::Reference, &key, view, line);
            action.set_attr("view_id", view);
        }
        self.out.push_entity(action);
    }

    fn report(&mut self, node: Node<'_, '_>) {
        let Some(id) = node.attribute("id") else {
            return;
        };
        let line = self.line(node);
        let mut report = self.entity(EntityKind::ReportTemplate, id, line);
        let key = report.key();
        if let Some(model) = node.attribute("model") {
            self.model_reference(&key, model, line);
            report.set_attr("model", model);
        }
        if let Some(report_name) = node.attribute("name") {
            self.xml_reference(RelationshipKind::Reference, &key, report_name, line);
            report.set_attr("report_name", report_name);
        }
        if let Some(title) = node.attribute("string") {
            report.set_attr("report_title", title);
        }
        report.set_attr(
            "report_type",
            node.attribute("report_type").unwrap_or("qweb-pdf"),
        );
        if let Some(file) = node.attribute("file") {
            report.set_attr("report_file", file);
        }
        self.out.push_entity(report);
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────

type Fields<'a, 'input> = HashMap<&'a str, Node<'a, 'input>>;

/// Direct `<field name="...">` children of a record.
fn record_fields<'a, 'input>(record: Node<'a, 'input>) -> Fields<'a, 'input> {
    record
        .children()
        .filter(|c| c.has_tag_name("field"))
        .filter_map(|c| Some((c.attribute("name")?, c)))
        .collect()
}

/// Literal value of a field: a quoted `eval`, or the element text.
fn field_value(fields: &Fields<'_, '_>, name: &str) -> Option<String> {
    let field = fields.get(name)?;
    if let Some(eval) = field.attribute("eval") {
        let eval = eval.trim();
        let unquoted = eval
            .strip_prefix('\'')
            .and_then(|e| e.strip_suffix('\''))
            .or_else(|| eval.strip_prefix('"').and_then(|e| e.strip_suffix('"')));
        return Some(unquoted.unwrap_or(eval).to_string());
    }
    field
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

fn field_bool(field: Node<'_, '_>) -> Option<bool> {
    let raw = field.attribute("eval").or_else(|| field.text())?.trim();
    match raw {
        "True" | "true" | "1" => Some(true),
        "False" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "True" | "true" | "1")
}

/// Ids named by `ref('...')` calls in an eval expression.
fn eval_refs(expr: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let mut rest = expr;
    while let Some(pos) = rest.find("ref(") {
        rest = rest[pos + 4..].trim_start();
        let Some(quote) = rest.chars().next().filter(|c| *c == '\'' || *c == '"') else {
            continue;
        };
        let inner = &rest[1..];
        if let Some(end) = inner.find(quote) {
            refs.push(inner[..end].to_string());
            rest = &inner[end + 1..];
        }
    }
    refs
}
