//! Module manifest (`__manifest__.py` / `__openerp__.py`) extraction.
//!
//! A manifest is a single Python dict literal. It yields the `module` entity
//! carrying the manifest metadata, plus one reference per declared
//! dependency.

use crate::candidate::Candidate;
use crate::extractor::{Extraction, FileContext, SourceExtractor};
use crate::languages::python::{is_manifest, line_of, literal_value, parse_python, string_list, string_literal};
use odix_core::{AttrValue, Entity, EntityKey, EntityKind, OdixError, RelationshipKind, TargetRef};
use std::path::Path;
use tree_sitter::Node;

/// Manifest keys copied as attributes, with their attribute names.
const MANIFEST_KEYS: &[(&str, &str)] = &[
    ("name", "display_name"),
    ("version", "version"),
    ("category", "category"),
    ("license", "license"),
    ("author", "author"),
    ("summary", "summary"),
    ("website", "website"),
    ("sequence", "sequence"),
    ("application", "application"),
    ("installable", "installable"),
    ("auto_install", "auto_install"),
];

pub struct ManifestExtractor;

impl ManifestExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ManifestExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceExtractor for ManifestExtractor {
    fn name(&self) -> &str {
        "manifest"
    }

    fn handles(&self, path: &Path) -> bool {
        is_manifest(path)
    }

    fn extract(&self, ctx: &FileContext<'_>, source: &[u8]) -> Result<Extraction, OdixError> {
        let tree = parse_python(ctx.file_path, source)?;
        let dict = find_dict(tree.root_node())
            .ok_or_else(|| OdixError::parse(ctx.file_path, "manifest is not a dict literal"))?;

        let mut module =
            Entity::new(EntityKind::Module, ctx.module, ctx.module, ctx.file_path, line_of(dict));
        let mut depends: Vec<(String, u32)> = Vec::new();

        let mut cursor = dict.walk();
        for pair in dict.named_children(&mut cursor).filter(|p| p.kind() == "pair") {
            let (Some(key), Some(value)) = (
                pair.child_by_field_name("key")
                    .and_then(|k| string_literal(k, source)),
                pair.child_by_field_name("value"),
            ) else {
                continue;
            };
            if key == "depends" {
                let mut vc = value.walk();
                match value.kind() {
                    "list" | "tuple" => {
                        for item in value.named_children(&mut vc) {
                            if let Some(dep) = string_literal(item, source) {
                                depends.push((dep, line_of(item)));
                            }
                        }
                    }
                    _ => depends.extend(
                        string_list(value, source)
                            .into_iter()
                            .map(|d| (d, line_of(value))),
                    ),
                }
                continue;
            }
            let Some(attr) = MANIFEST_KEYS
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, attr)| *attr)
            else {
                continue;
            };
            match literal_value(value, source) {
                Some(v) => module.set_attr(attr, v),
                // `auto_install: ['sale', 'stock']` means "when these are installed".
                None if attr == "auto_install" && value.kind() == "list" => {
                    module.set_attr(attr, true)
                }
                None => {}
            }
        }

        module.set_attr(
            "depends",
            AttrValue::Text(
                depends
                    .iter()
                    .map(|(d, _)| d.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        );

        let mut out = Extraction::default();
        let source_key = EntityKey::module_key(ctx.module);
        for (dep, line) in depends {
            out.push_candidate(Candidate::new(
                RelationshipKind::Reference,
                source_key.clone(),
                TargetRef::unresolved(EntityKind::Module, dep, None),
                ctx.file_path,
                line,
            ));
        }
        out.push_entity(module);
        Ok(out)
    }
}

/// The first dict literal at statement level.
fn find_dict(root: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = root.walk();
    let statements: Vec<Node> = root.named_children(&mut cursor).collect();
    statements.into_iter().find_map(|stmt| {
        let expr = if stmt.kind() == "expression_statement" {
            stmt.named_child(0)?
        } else {
            stmt
        };
        (expr.kind() == "dictionary").then_some(expr)
    })
}
