//! End-to-end indexing runs over small Odoo codebases on disk.

use odix_core::{EntityKind, IndexingConfig, OdixError, RelationshipKind};
use odix_index::languages::access_csv::AccessCsvExtractor;
use odix_index::languages::manifest::ManifestExtractor;
use odix_index::languages::python::PythonExtractor;
use odix_index::languages::xml::XmlExtractor;
use odix_index::{
    Extraction, FileContext, LastRun, Orchestrator, RunCoordinator, RunParams, RunProgress,
    SourceExtractor, SourceParser,
};
use odix_storage::{SearchParams, Storage};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SALE_MANIFEST: &str = r#"{
    'name': 'Sales',
    'version': '17.0.1.0',
    'depends': ['base'],
    'installable': True,
}
"#;

const SALE_ORDER: &str = r#"from odoo import api, fields, models


class SaleOrder(models.Model):
    _name = 'sale.order'
    _description = 'Sales Order'

    partner_id = fields.Many2one('res.partner', string='Customer')
    state = fields.Selection([('draft', 'Quotation'), ('sale', 'Sales Order')], default='draft')

    def action_confirm(self):
        return True
"#;

const SALE_VIEWS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<odoo>
    <record id="view_order_form" model="ir.ui.view">
        <field name="name">sale.order.form</field>
        <field name="model">sale.order</field>
        <field name="arch" type="xml">
            <form><field name="state"/></form>
        </field>
    </record>
</odoo>
"#;

const EXTRA_MANIFEST: &str = r#"{
    'name': 'Sales Extra',
    'depends': ['sale'],
}
"#;

const EXTRA_ORDER: &str = r#"from odoo import fields, models


class SaleOrder(models.Model):
    _inherit = 'sale.order'

    note_extra = fields.Char(string='Extra Note')

    def action_confirm(self):
        res = super(SaleOrder, self).action_confirm()
        return res
"#;

const EXTRA_VIEWS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<odoo>
    <record id="view_order_form_extra" model="ir.ui.view">
        <field name="name">sale.order.form.extra</field>
        <field name="model">sale.order</field>
        <field name="inherit_id" ref="sale.view_order_form"/>
        <field name="arch" type="xml">
            <field name="state" position="after"><field name="note_extra"/></field>
        </field>
    </record>
</odoo>
"#;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn sale_codebase(root: &Path) {
    write(root, "addons/sale/__manifest__.py", SALE_MANIFEST);
    write(root, "addons/sale/models/sale_order.py", SALE_ORDER);
    write(root, "addons/sale/views/sale_views.xml", SALE_VIEWS);
    write(root, "addons/sale_extra/__manifest__.py", EXTRA_MANIFEST);
    write(root, "addons/sale_extra/models/sale_order.py", EXTRA_ORDER);
    write(root, "addons/sale_extra/views/sale_views.xml", EXTRA_VIEWS);
}

fn config() -> IndexingConfig {
    IndexingConfig {
        max_concurrent_modules: 2,
        max_worker_processes: 2,
        ..IndexingConfig::default()
    }
}

fn orchestrator(root: &Path) -> Orchestrator {
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    Orchestrator::new(storage, root, config())
}

async fn run(orch: &Orchestrator, params: RunParams) -> Result<odix_index::RunReport, OdixError> {
    orch.run(&params, &Arc::new(RunProgress::new())).await
}

/// Python extractor that sleeps before extracting.
struct SlowExtractor {
    delay: Duration,
    inner: PythonExtractor,
}

impl SourceExtractor for SlowExtractor {
    fn name(&self) -> &str {
        "slow-python"
    }

    fn handles(&self, path: &Path) -> bool {
        self.inner.handles(path)
    }

    fn extract(&self, ctx: &FileContext<'_>, source: &[u8]) -> Result<Extraction, OdixError> {
        std::thread::sleep(self.delay);
        self.inner.extract(ctx, source)
    }
}

/// The regular extractor set with a slow Python extractor.
fn slow_parser(delay: Duration) -> SourceParser {
    SourceParser::with_extractors(vec![
        Box::new(ManifestExtractor::new()),
        Box::new(SlowExtractor {
            delay,
            inner: PythonExtractor::new(),
        }),
        Box::new(XmlExtractor::new()),
        Box::new(AccessCsvExtractor::new()),
    ])
}

#[tokio::test]
async fn full_run_indexes_every_module() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let orch = orchestrator(dir.path());

    let report = run(&orch, RunParams::full()).await.unwrap();
    assert!(!report.noop);
    assert_eq!(report.files_scanned, 6);
    assert_eq!(report.files_indexed, 6);
    assert!(report.failures.is_empty());
    assert_eq!(report.modules_committed, 2);

    let storage = orch.storage();
    let modules: Vec<String> = storage
        .list_modules(None)
        .unwrap()
        .into_iter()
        .map(|m| m.module)
        .collect();
    assert_eq!(modules, vec!["sale".to_string(), "sale_extra".to_string()]);

    let details = storage
        .get_entity(EntityKind::Model, "sale.order", None, None)
        .unwrap();
    assert_eq!(details.entity.module, "sale");
    let children: Vec<&str> = details.children.iter().map(|e| e.name.as_str()).collect();
    assert!(children.contains(&"note_extra"));
    assert!(children.contains(&"partner_id"));
    assert!(details.relationships.iter().any(|h| {
        h.relationship.kind == RelationshipKind::Override
            && h.relationship.source.module == "sale_extra"
    }));
}

#[tokio::test]
async fn second_run_without_changes_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let orch = orchestrator(dir.path());

    run(&orch, RunParams::full()).await.unwrap();
    let before = orch.storage().index_stats().unwrap();

    let report = run(&orch, RunParams::default()).await.unwrap();
    assert!(report.noop);
    assert_eq!(report.files_unchanged, 6);
    assert_eq!(report.entities_written, 0);

    let after = orch.storage().index_stats().unwrap();
    assert_eq!(before.total_items, after.total_items);
    assert_eq!(before.total_relationships, after.total_relationships);
}

#[tokio::test]
async fn override_resolves_to_dependency() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let orch = orchestrator(dir.path());
    run(&orch, RunParams::full()).await.unwrap();

    let hits = orch
        .storage()
        .find_references(EntityKind::Function, "action_confirm", Some(RelationshipKind::Override))
        .unwrap();
    let overrides: Vec<_> = hits
        .iter()
        .map(|h| &h.relationship)
        .filter(|r| r.source.module == "sale_extra")
        .collect();
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].target.module.as_deref(), Some("sale"));
    assert_eq!(overrides[0].target.parent_name.as_deref(), Some("sale.order"));

    let inherited = orch
        .storage()
        .find_references(EntityKind::View, "view_order_form", Some(RelationshipKind::Inheritance))
        .unwrap();
    assert!(inherited
        .iter()
        .any(|h| h.relationship.source.name == "view_order_form_extra"
            && h.relationship.target.is_resolved()));
}

#[tokio::test]
async fn dangling_override_resolves_once_target_is_indexed() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let orch = orchestrator(dir.path());

    let only_extra = RunParams {
        incremental: true,
        modules: Some(vec!["sale_extra".to_string()]),
        clear_all: false,
    };
    let report = run(&orch, only_extra).await.unwrap();
    assert!(report.relationships_dangling > 0);

    let hits = orch
        .storage()
        .find_references(EntityKind::Function, "action_confirm", Some(RelationshipKind::Override))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(!hits[0].relationship.target.is_resolved());

    let report = run(&orch, RunParams::default()).await.unwrap();
    assert!(report.relationships_resolved_later > 0);

    let hits = orch
        .storage()
        .find_references(EntityKind::Function, "action_confirm", Some(RelationshipKind::Override))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].relationship.target.module.as_deref(), Some("sale"));
}

#[tokio::test]
async fn deleted_file_drops_its_entities() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let orch = orchestrator(dir.path());
    run(&orch, RunParams::full()).await.unwrap();

    std::fs::remove_file(dir.path().join("addons/sale_extra/models/sale_order.py")).unwrap();
    let report = run(&orch, RunParams::default()).await.unwrap();
    assert_eq!(report.files_deleted, 1);

    let err = orch
        .storage()
        .get_entity(EntityKind::Field, "note_extra", Some("sale.order"), None)
        .unwrap_err();
    assert!(matches!(err, OdixError::NotFound(_)));

    let hits = orch
        .storage()
        .find_references(EntityKind::Function, "action_confirm", Some(RelationshipKind::Override))
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn modified_file_replaces_its_entities() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let orch = orchestrator(dir.path());
    run(&orch, RunParams::full()).await.unwrap();

    write(
        dir.path(),
        "addons/sale_extra/models/sale_order.py",
        &EXTRA_ORDER.replace("note_extra", "memo_extra"),
    );
    let report = run(&orch, RunParams::default()).await.unwrap();
    assert_eq!(report.files_modified, 1);
    assert_eq!(report.files_unchanged, 5);

    let storage = orch.storage();
    assert!(storage
        .get_entity(EntityKind::Field, "note_extra", Some("sale.order"), None)
        .is_err());
    let memo = storage
        .get_entity(EntityKind::Field, "memo_extra", Some("sale.order"), None)
        .unwrap();
    assert_eq!(memo.entity.module, "sale_extra");
}

#[tokio::test]
async fn parse_failure_keeps_prior_content() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let orch = orchestrator(dir.path());
    run(&orch, RunParams::full()).await.unwrap();

    write(
        dir.path(),
        "addons/sale/models/sale_order.py",
        "class SaleOrder(models.Model:\n    _name = 'sale.order'\n",
    );
    let report = run(&orch, RunParams::default()).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].code, "parse_error");
    assert!(report.failures[0].file_path.ends_with("sale/models/sale_order.py"));

    orch.storage()
        .get_entity(EntityKind::Model, "sale.order", None, Some("sale"))
        .unwrap();

    // The fingerprint was not updated, so the file is retried.
    let report = run(&orch, RunParams::default()).await.unwrap();
    assert_eq!(report.failures.len(), 1);
}

#[tokio::test]
async fn clear_all_rebuilds_the_same_index() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let orch = orchestrator(dir.path());
    run(&orch, RunParams::full()).await.unwrap();
    let before = orch.storage().index_stats().unwrap();

    let params = RunParams {
        incremental: true,
        modules: None,
        clear_all: true,
    };
    let report = run(&orch, params).await.unwrap();
    assert!(!report.noop);
    assert_eq!(report.files_indexed, 6);

    let after = orch.storage().index_stats().unwrap();
    assert_eq!(before.total_items, after.total_items);
    assert_eq!(before.total_relationships, after.total_relationships);
}

#[tokio::test]
async fn search_pages_through_models() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "sale_models/__manifest__.py", "{'name': 'Models', 'depends': []}");
    let mut source = String::from("from odoo import models\n\n");
    for (i, name) in ["alpha", "beta", "gamma", "delta", "epsilon"].iter().enumerate() {
        source.push_str(&format!(
            "\nclass Model{i}(models.Model):\n    _name = 'sale.{name}'\n\n"
        ));
    }
    write(dir.path(), "sale_models/models/models.py", &source);

    let orch = orchestrator(dir.path());
    run(&orch, RunParams::full()).await.unwrap();

    let mut params = SearchParams {
        pattern: "sale%".to_string(),
        kind: Some(EntityKind::Model),
        limit: 2,
        ..SearchParams::default()
    };
    let page = orch.storage().search(&params).unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.returned(), 2);
    assert_eq!(page.next_offset(), Some(2));

    params.offset = 4;
    let last = orch.storage().search(&params).unwrap();
    assert_eq!(last.returned(), 1);
    assert!(!last.has_more());
}

#[tokio::test]
async fn missing_root_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&dir.path().join("nowhere"));
    let err = run(&orch, RunParams::full()).await.unwrap_err();
    assert!(matches!(err, OdixError::Scan(_)));
}

#[tokio::test]
async fn slow_file_times_out_without_failing_the_run() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let config = IndexingConfig {
        parse_timeout_secs: 1,
        ..config()
    };
    let orch = Orchestrator::new(storage, dir.path(), config)
        .with_parser(slow_parser(Duration::from_millis(1500)));

    let report = run(&orch, RunParams::full()).await.unwrap();
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.code == "timeout"));
    assert_eq!(report.files_indexed, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_trigger_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    sale_codebase(dir.path());
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let orch = Orchestrator::new(storage, dir.path(), config())
        .with_parser(slow_parser(Duration::from_millis(300)));
    let coord = RunCoordinator::new(orch, tokio::runtime::Handle::current());

    coord.trigger(RunParams::full()).unwrap();
    let err = coord.trigger(RunParams::default()).unwrap_err();
    assert!(matches!(err, OdixError::ConcurrentRunRejected { .. }));
    assert!(coord.status().unwrap().is_running);

    let mut waited = 0;
    while coord.is_running() && waited < 100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += 1;
    }
    let status = coord.status().unwrap();
    assert!(!status.is_running);
    assert!(matches!(status.last_run, Some(LastRun::Succeeded { .. })));

    // The slot is free again.
    let report = coord.run_to_completion(RunParams::default()).await.unwrap();
    assert!(report.failures.is_empty());
}

const CUSTOM_MANIFEST: &str = "{'name': 'Sale Custom', 'depends': ['sale']}\n";

fn confirm_override(class: &str) -> String {
    format!(
        "from odoo import models\n\n\nclass {class}(models.Model):\n    _inherit = 'sale.order'\n\n    def action_confirm(self):\n        return super().action_confirm()\n"
    )
}

#[tokio::test]
async fn method_defined_in_two_files_survives_deleting_one() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m/__manifest__.py", CUSTOM_MANIFEST);
    write(dir.path(), "m/models/a.py", &confirm_override("SaleOrderA"));
    write(dir.path(), "m/models/b.py", &confirm_override("SaleOrderB"));
    let orch = orchestrator(dir.path());
    run(&orch, RunParams::full()).await.unwrap();

    let details = orch
        .storage()
        .get_entity(EntityKind::Function, "action_confirm", Some("sale.order"), Some("m"))
        .unwrap();
    assert!(details.entity.file_path.ends_with("models/b.py"));

    std::fs::remove_file(dir.path().join("m/models/b.py")).unwrap();
    let report = run(&orch, RunParams::default()).await.unwrap();
    assert_eq!(report.files_deleted, 1);

    let details = orch
        .storage()
        .get_entity(EntityKind::Function, "action_confirm", Some("sale.order"), Some("m"))
        .unwrap();
    assert!(details.entity.file_path.ends_with("models/a.py"));

    std::fs::remove_file(dir.path().join("m/models/a.py")).unwrap();
    run(&orch, RunParams::default()).await.unwrap();
    let err = orch
        .storage()
        .get_entity(EntityKind::Function, "action_confirm", Some("sale.order"), Some("m"))
        .unwrap_err();
    assert!(matches!(err, OdixError::NotFound(_)));
}

#[tokio::test]
async fn file_grown_past_size_limit_is_a_failure_not_a_deletion() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x/__manifest__.py", "{'name': 'X', 'depends': []}\n");
    let model = "from odoo import models\n\n\nclass XA(models.Model):\n    _name = 'x.a'\n";
    write(dir.path(), "x/models/x_a.py", model);
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let config = IndexingConfig {
        max_file_size_bytes: 200,
        ..config()
    };
    let orch = Orchestrator::new(storage, dir.path(), config);
    let report = run(&orch, RunParams::full()).await.unwrap();
    assert!(report.failures.is_empty());

    let padded = format!("{model}# {}\n", "x".repeat(300));
    write(dir.path(), "x/models/x_a.py", &padded);
    let report = run(&orch, RunParams::default()).await.unwrap();
    assert_eq!(report.files_deleted, 0);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].code, "file_too_large");
    assert_eq!(report.failures[0].module, "x");
    assert!(report.failures[0].file_path.ends_with("x/models/x_a.py"));

    orch.storage()
        .get_entity(EntityKind::Model, "x.a", None, Some("x"))
        .unwrap();
}

#[tokio::test]
async fn override_into_later_module_stays_resolved_through_commit() {
    let dir = tempfile::tempdir().unwrap();
    // a_ext commits before the module it extends.
    write(dir.path(), "z_base/__manifest__.py", "{'name': 'Base', 'depends': []}\n");
    write(
        dir.path(),
        "z_base/models/order.py",
        "from odoo import models\n\n\nclass Order(models.Model):\n    _name = 'z.order'\n\n    def action_done(self):\n        return True\n",
    );
    write(dir.path(), "a_ext/__manifest__.py", "{'name': 'Ext', 'depends': ['z_base']}\n");
    write(
        dir.path(),
        "a_ext/models/order.py",
        "from odoo import models\n\n\nclass Order(models.Model):\n    _inherit = 'z.order'\n\n    def action_done(self):\n        return super().action_done()\n",
    );
    let orch = orchestrator(dir.path());

    let report = run(&orch, RunParams::full()).await.unwrap();
    assert_eq!(report.modules_committed, 2);
    assert_eq!(report.relationships_invalidated, 0);
    assert_eq!(report.relationships_resolved_later, 0);

    let hits = orch
        .storage()
        .find_references(EntityKind::Function, "action_done", Some(RelationshipKind::Override))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].relationship.source.module, "a_ext");
    assert_eq!(hits[0].relationship.target.module.as_deref(), Some("z_base"));
}

/// Every entity and relationship row, minus ids and timestamps, sorted.
fn dump(db: &Path) -> (Vec<String>, Vec<String>) {
    let conn = rusqlite::Connection::open(db).unwrap();
    let rows = |sql: &str| -> Vec<String> {
        let mut stmt = conn.prepare(sql).unwrap();
        let mut rows: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        rows.sort();
        rows
    };
    let entities = rows(
        "SELECT kind || '|' || name || '|' || parent_name || '|' || module || '|' || file_path
             || '|' || line_number || '|' || COALESCE(xml_id, '') || '|' || attributes
         FROM entities",
    );
    let relationships = rows(
        "SELECT kind || '|' || source_kind || '|' || source_name || '|' || source_parent
             || '|' || source_module || '|' || target_kind || '|' || target_name
             || '|' || target_parent || '|' || target_module || '|' || COALESCE(target_xml_id, '')
             || '|' || resolved || '|' || file_path || '|' || line_number
         FROM relationships",
    );
    (entities, relationships)
}

#[tokio::test]
async fn incremental_run_matches_a_fresh_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("src");
    sale_codebase(&root);
    let incremental_db = dir.path().join("incremental.db");
    let orch = Orchestrator::new(
        Arc::new(Storage::open(&incremental_db).unwrap()),
        &root,
        config(),
    );
    run(&orch, RunParams::full()).await.unwrap();

    write(
        &root,
        "addons/sale_extra/models/sale_order.py",
        &EXTRA_ORDER.replace("note_extra", "memo_extra"),
    );
    std::fs::remove_file(root.join("addons/sale_extra/views/sale_views.xml")).unwrap();
    write(
        &root,
        "addons/sale/models/sale_order_line.py",
        "from odoo import fields, models\n\n\nclass SaleOrderLine(models.Model):\n    _name = 'sale.order.line'\n\n    order_id = fields.Many2one('sale.order', string='Order')\n",
    );
    let report = run(&orch, RunParams::default()).await.unwrap();
    assert_eq!(
        (report.files_new, report.files_modified, report.files_deleted),
        (1, 1, 1)
    );
    assert!(report.failures.is_empty());

    let full_db = dir.path().join("full.db");
    let fresh = Orchestrator::new(Arc::new(Storage::open(&full_db).unwrap()), &root, config());
    run(&fresh, RunParams::full()).await.unwrap();

    let (inc_entities, inc_relationships) = dump(&incremental_db);
    let (full_entities, full_relationships) = dump(&full_db);
    assert!(inc_entities.iter().any(|e| e.contains("memo_extra")));
    assert!(!inc_entities.iter().any(|e| e.contains("note_extra")));
    assert_eq!(inc_entities, full_entities);
    assert_eq!(inc_relationships, full_relationships);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_counts_each_extracted_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m/__manifest__.py", "{'name': 'M', 'depends': []}\n");
    for name in ["one", "two", "three"] {
        write(
            dir.path(),
            &format!("m/models/{name}.py"),
            &format!("from odoo import models\n\n\nclass M(models.Model):\n    _name = 'm.{name}'\n"),
        );
    }
    let config = IndexingConfig {
        max_concurrent_modules: 1,
        max_worker_processes: 1,
        ..IndexingConfig::default()
    };
    let orch = Arc::new(
        Orchestrator::new(Arc::new(Storage::open_in_memory().unwrap()), dir.path(), config)
            .with_parser(slow_parser(Duration::from_millis(300))),
    );
    let progress = Arc::new(RunProgress::new());

    let task = {
        let orch = Arc::clone(&orch);
        let progress = Arc::clone(&progress);
        tokio::spawn(async move { orch.run(&RunParams::full(), &progress).await })
    };
    let mut seen = HashSet::new();
    while !task.is_finished() {
        seen.insert(progress.files());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.files_indexed, 4);
    assert_eq!(progress.files(), (4, 4));
    assert!(
        seen.iter().any(|&(done, total)| total == 4 && done > 0 && done < total),
        "no partial progress observed: {seen:?}"
    );
}
