//! `ir.model.access.csv` extraction.

use crate::candidate::Candidate;
use crate::extractor::{Extraction, FileContext, SourceExtractor};
use crate::languages::{markup_entity, qualify};
use crate::scanner::ACCESS_CSV;
use odix_core::{EntityKind, OdixError, RelationshipKind, TargetRef};
use std::path::Path;

const PERMISSIONS: [&str; 4] = ["perm_read", "perm_write", "perm_create", "perm_unlink"];

pub struct AccessCsvExtractor;

impl AccessCsvExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AccessCsvExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceExtractor for AccessCsvExtractor {
    fn name(&self) -> &str {
        "access_csv"
    }

    fn handles(&self, path: &Path) -> bool {
        path.file_name().and_then(|n| n.to_str()) == Some(ACCESS_CSV)
    }

    fn extract(&self, ctx: &FileContext<'_>, source: &[u8]) -> Result<Extraction, OdixError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let headers = reader
            .headers()
            .map_err(|e| OdixError::parse(ctx.file_path, e.to_string()))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let id_col = column("id")
            .ok_or_else(|| OdixError::parse(ctx.file_path, "missing 'id' column"))?;
        let name_col = column("name");
        let model_col = column("model_id:id").or_else(|| column("model_id"));
        let group_col = column("group_id:id").or_else(|| column("group_id"));
        let perm_cols: Vec<(&str, Option<usize>)> =
            PERMISSIONS.iter().map(|p| (*p, column(*p))).collect();

        let mut out = Extraction::default();
        for row in reader.records() {
            let row = row.map_err(|e| OdixError::parse(ctx.file_path, e.to_string()))?;
            let Some(id) = row.get(id_col).filter(|id| !id.is_empty()) else {
                continue;
            };
            let line = row.position().map_or(0, |p| p.line() as u32);
            let cell = |col: Option<usize>| col.and_then(|c| row.get(c)).filter(|v| !v.is_empty());

            let mut access = markup_entity(&mut out, ctx, EntityKind::AccessRight, id, line);
            let key = access.key();
            if let Some(name) = cell(name_col) {
                access.set_attr("access_name", name);
            }
            if let Some(model) = cell(model_col) {
                let model = qualify(model, ctx.module);
                out.push_candidate(Candidate::new(
                    RelationshipKind::Reference,
                    key.clone(),
                    TargetRef::xml_ref(&model),
                    ctx.file_path,
                    line,
                ));
                access.set_attr("model_ref", model);
            }
            if let Some(group) = cell(group_col) {
                let group = qualify(group, ctx.module);
                out.push_candidate(Candidate::new(
                    RelationshipKind::Reference,
                    key.clone(),
                    TargetRef::xml_ref(&group),
                    ctx.file_path,
                    line,
                ));
                access.set_attr("group_ref", group);
            }
            for (perm, col) in &perm_cols {
                if let Some(value) = cell(*col) {
                    access.set_attr(perm, value == "1");
                }
            }
            out.push_entity(access);
        }
        Ok(out)
    }
}
