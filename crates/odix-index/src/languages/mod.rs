//! Extractor registry.
//!
//! Each file format implements the `SourceExtractor` trait and is registered
//! here. Order matters: manifests are Python files too.

pub mod access_csv;
pub mod manifest;
pub mod python;
pub mod xml;

use crate::candidate::Candidate;
use crate::extractor::{Extraction, FileContext, SourceExtractor};
use odix_core::{Entity, EntityKind, RelationshipKind, TargetRef};

/// Returns all available extractors in dispatch order.
pub fn all_extractors() -> Vec<Box<dyn SourceExtractor>> {
    vec![
        Box::new(manifest::ManifestExtractor::new()),
        Box::new(python::PythonExtractor::new()),
        Box::new(xml::XmlExtractor::new()),
        Box::new(access_csv::AccessCsvExtractor::new()),
    ]
}

// ── XML id helpers shared by the markup extractors ─────────────────────────

/// `local` -> `module.local`; already qualified ids are returned as is.
pub(crate) fn qualify(id: &str, module: &str) -> String {
    if id.contains('.') {
        id.to_string()
    } else {
        format!("{module}.{id}")
    }
}

/// Split a qualified id into `(owner_module, local_id)` at the first dot.
pub(crate) fn split_xml_id(qualified: &str) -> (&str, &str) {
    qualified.split_once('.').unwrap_or(("", qualified))
}

/// Comma-separated id list (`groups="base.group_user,group_manager"`),
/// each entry qualified.
pub(crate) fn qualify_list(ids: &str, module: &str) -> Vec<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| qualify(id.trim_start_matches('!'), module))
        .collect()
}

/// Create a markup-identified entity from a raw id.
///
/// The entity is always recorded under the current module. An id owned by
/// another module also yields a modification of that foreign record.
pub(crate) fn markup_entity(
    out: &mut Extraction,
    ctx: &FileContext<'_>,
    kind: EntityKind,
    raw_id: &str,
    line: u32,
) -> Entity {
    let qualified = qualify(raw_id, ctx.module);
    let (owner, local) = split_xml_id(&qualified);
    let entity = Entity::new(kind, local, ctx.module, ctx.file_path, line).with_xml_id(&qualified);
    if owner != ctx.module {
        out.push_candidate(Candidate::new(
            RelationshipKind::Modification,
            entity.key(),
            TargetRef::xml_ref(&qualified),
            ctx.file_path,
            line,
        ));
    }
    entity
}
