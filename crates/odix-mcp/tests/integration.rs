//! Integration tests for odix-mcp: tool calls over an indexed fixture.

use odix_core::IndexingConfig;
use odix_index::{Orchestrator, RunCoordinator, RunParams};
use odix_mcp::McpServer;
use odix_storage::Storage;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ── Helpers ────────────────────────────────────────────────────────────────

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn fixture(root: &Path) {
    write(
        root,
        "sale/__manifest__.py",
        "{'name': 'Sales', 'version': '17.0.1.0', 'depends': ['base'], 'application': True}",
    );
    write(
        root,
        "sale/models/sale_order.py",
        r#"from odoo import api, fields, models


class SaleOrder(models.Model):
    _name = 'sale.order'
    _description = 'Sales Order'

    partner_id = fields.Many2one('res.partner', string='Customer', required=True)
    amount_total = fields.Monetary(compute='_compute_amounts')

    @api.depends('order_line')
    def _compute_amounts(self):
        pass

    def action_confirm(self):
        return True
"#,
    );
    write(
        root,
        "sale/views/sale_views.xml",
        r#"<?xml version="1.0" encoding="utf-8"?>
<odoo>
    <record id="view_order_form" model="ir.ui.view">
        <field name="name">sale.order.form</field>
        <field name="model">sale.order</field>
        <field name="arch" type="xml">
            <form><field name="partner_id"/></form>
        </field>
    </record>
    <record id="action_orders" model="ir.actions.act_window">
        <field name="name">Sales Orders</field>
        <field name="res_model">sale.order</field>
        <field name="view_mode">tree,form</field>
    </record>
    <menuitem id="menu_sale_order" name="Orders" action="action_orders"/>
</odoo>
"#,
    );
    write(
        root,
        "sale/security/ir.model.access.csv",
        "id,name,model_id:id,group_id:id,perm_read,perm_write,perm_create,perm_unlink\n\
         access_sale_order,sale.order,model_sale_order,base.group_user,1,1,1,0\n",
    );
    write(
        root,
        "sale_extra/__manifest__.py",
        "{'name': 'Sales Extra', 'depends': ['sale']}",
    );
    write(
        root,
        "sale_extra/models/sale_order.py",
        r#"from odoo import fields, models


class SaleOrder(models.Model):
    _inherit = 'sale.order'

    custom_note = fields.Text(string='Custom Note')

    def action_confirm(self):
        res = super().action_confirm()
        return res

    def action_cancel(self):
        return super(SaleOrder, self).action_cancel()
"#,
    );
}

fn server(root: &Path) -> (McpServer, Arc<RunCoordinator>) {
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let orchestrator = Orchestrator::new(Arc::clone(&storage), root, IndexingConfig::default());
    let coordinator = RunCoordinator::new(orchestrator, tokio::runtime::Handle::current());
    (McpServer::new(storage, Arc::clone(&coordinator)), coordinator)
}

async fn indexed_server(root: &Path) -> McpServer {
    fixture(root);
    let (server, coordinator) = server(root);
    let report = coordinator.run_to_completion(RunParams::full()).await.unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    server
}

/// Call a tool and parse its text payload, returning `(is_error, body)`.
fn call(server: &McpServer, tool: &str, arguments: Value) -> (bool, Value) {
    let params = json!({"name": tool, "arguments": arguments});
    let resp = server.handle_request("tools/call", Some(&params), json!("req"));
    assert!(resp.error.is_none(), "Unexpected error calling {tool}: {:?}", resp.error);
    let result = resp.result.unwrap();
    let text = result["content"][0]["text"].as_str().unwrap();
    (
        result["isError"].as_bool().unwrap(),
        serde_json::from_str(text).unwrap(),
    )
}

fn call_ok(server: &McpServer, tool: &str, arguments: Value) -> Value {
    let (is_error, body) = call(server, tool, arguments);
    assert!(!is_error, "{tool} failed: {body}");
    body
}

// ── Tool Tests ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn search_envelope_and_ranking() {
    let dir = tempfile::tempdir().unwrap();
    let server = indexed_server(dir.path()).await;

    let body = call_ok(&server, "search_odoo_index", json!({"query": "sale.order", "item_type": "model"}));
    assert_eq!(body["total"], 1);
    assert_eq!(body["returned"], 1);
    assert_eq!(body["has_more"], false);
    assert_eq!(body["next_offset"], Value::Null);
    assert_eq!(body["results"][0]["name"], "sale.order");
    assert_eq!(body["results"][0]["module"], "sale");

    let body = call_ok(&server, "search_odoo_index", json!({"query": "action_", "item_type": "function"}));
    let modules: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["module"].as_str().unwrap())
        .collect();
    assert_eq!(body["total"], 3);
    assert!(modules.contains(&"sale_extra"));
}

#[tokio::test]
async fn model_details_list_extension_fields_and_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let server = indexed_server(dir.path()).await;

    let body = call_ok(&server, "get_item_details", json!({"item_type": "model", "name": "sale.order"}));
    assert_eq!(body["item"]["module"], "sale");
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"custom_note"));
    assert!(fields.contains(&"partner_id"));

    let overrides: Vec<&Value> = body["relationships"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["reference_type"] == "override")
        .collect();
    assert!(overrides.iter().any(|r| r["module"] == "sale_extra"));

    let related: Vec<&str> = body["related"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["item_type"].as_str().unwrap())
        .collect();
    assert!(related.contains(&"view"));
    assert!(related.contains(&"action"));
}

#[tokio::test]
async fn missing_item_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let server = indexed_server(dir.path()).await;

    let (is_error, body) = call(&server, "get_item_details", json!({"item_type": "model", "name": "sale.nothing"}));
    assert!(is_error);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn dangling_override_is_retrievable() {
    let dir = tempfile::tempdir().unwrap();
    let server = indexed_server(dir.path()).await;

    // action_cancel is not defined anywhere in the fixture.
    let body = call_ok(
        &server,
        "find_references",
        json!({"item_type": "function", "name": "action_cancel", "reference_type": "override"}),
    );
    assert_eq!(body["total"], 1);
    let reference = &body["references"][0];
    assert_eq!(reference["target"]["resolved"], false);
    assert_eq!(reference["module"], "sale_extra");
    assert!(reference["line_number"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn attribute_search_and_xml_ids() {
    let dir = tempfile::tempdir().unwrap();
    let server = indexed_server(dir.path()).await;

    let body = call_ok(
        &server,
        "search_by_attribute",
        json!({"item_type": "field", "attribute_filters": {"field_type": "Many2one", "comodel_name": "res.partner"}}),
    );
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["name"], "partner_id");

    let body = call_ok(
        &server,
        "search_by_attribute",
        json!({"item_type": "field", "attribute_filters": {"no_such_attribute": "x"}}),
    );
    assert_eq!(body["total"], 0);

    let (is_error, body) = call(
        &server,
        "search_by_attribute",
        json!({"item_type": "field", "attribute_filters": ["field_type"]}),
    );
    assert!(is_error);
    assert_eq!(body["error"], "validation_error");

    let body = call_ok(&server, "search_xml_id", json!({"query": "sale.view_order_form"}));
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["item_type"], "view");
}

#[tokio::test]
async fn modules_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let server = indexed_server(dir.path()).await;

    let body = call_ok(&server, "list_modules", json!({}));
    assert_eq!(body["total"], 2);
    assert_eq!(body["modules"][0]["module"], "sale");

    let body = call_ok(&server, "get_module_stats", json!({"module": "sale"}));
    assert_eq!(body["counts_by_kind"]["model"], 1);
    assert_eq!(body["counts_by_kind"]["access_right"], 1);
    assert_eq!(body["manifest"]["application"], true);

    let (is_error, body) = call(&server, "get_module_stats", json!({"module": "nope"}));
    assert!(is_error);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_index_runs_in_background() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());
    let (server, coordinator) = server(dir.path());

    let body = call_ok(&server, "update_index", json!({"incremental": false}));
    assert_eq!(body["started"], true);

    let mut waited = 0;
    while coordinator.is_running() && waited < 200 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        waited += 1;
    }

    let status = call_ok(&server, "get_index_status", json!({}));
    assert_eq!(status["indexing"]["is_running"], false);
    assert_eq!(status["total_modules"], 2);
    assert_eq!(status["last_run"]["status"], "succeeded");
    assert!(status["counts_by_kind"]["field"].as_u64().unwrap() >= 3);
}

#[tokio::test]
async fn update_index_rejected_while_running() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());
    let (server, coordinator) = server(dir.path());

    let _guard = coordinator.try_start(&RunParams::default()).unwrap();
    let body = call_ok(&server, "update_index", json!({}));
    assert_eq!(body["started"], false);
    assert_eq!(body["error"], "concurrent_run_rejected");

    let status = call_ok(&server, "get_index_status", json!({}));
    assert_eq!(status["indexing"]["is_running"], true);
    assert_eq!(status["indexing"]["incremental"], true);
}
