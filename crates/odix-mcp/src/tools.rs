//! Tool schemas advertised through `tools/list`.

use serde_json::{json, Value};

const ITEM_TYPES: [&str; 13] = [
    "model",
    "field",
    "function",
    "view",
    "menu",
    "action",
    "controller_route",
    "access_right",
    "record_rule",
    "scheduled_action",
    "report_template",
    "module",
    "xml_id",
];

const REFERENCE_TYPES: [&str; 5] = [
    "definition",
    "inheritance",
    "override",
    "reference",
    "modification",
];

pub(crate) fn tool_definitions() -> Vec<Value> {
    let pagination = json!({
        "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 20 },
        "offset": { "type": "integer", "minimum": 0, "default": 0 }
    });
    let with_pagination = |mut properties: Value| {
        if let (Some(target), Some(extra)) = (properties.as_object_mut(), pagination.as_object()) {
            target.extend(extra.clone());
        }
        properties
    };

    vec![
        json!({
            "name": "search_odoo_index",
            "description": "Search indexed Odoo items by name. '%' is a wildcard; without one the query matches as a substring. Exact matches rank first, then prefix, then substring.",
            "inputSchema": {
                "type": "object",
                "properties": with_pagination(json!({
                    "query": { "type": "string", "description": "Name pattern, e.g. 'sale.order' or 'sale%'" },
                    "item_type": { "type": "string", "enum": ITEM_TYPES },
                    "module": { "type": "string", "description": "Restrict to one module" },
                    "parent_name": { "type": "string", "description": "Owning model for fields and methods" }
                })),
                "required": ["query"]
            }
        }),
        json!({
            "name": "get_item_details",
            "description": "Full detail for one item: attributes, relationships, and for models their fields, methods and related views, actions and security records from every module",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "item_type": { "type": "string", "enum": ITEM_TYPES },
                    "name": { "type": "string" },
                    "parent_name": { "type": "string" },
                    "module": { "type": "string" }
                },
                "required": ["item_type", "name"]
            }
        }),
        json!({
            "name": "list_modules",
            "description": "List indexed modules with their item counts",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Module name pattern" }
                }
            }
        }),
        json!({
            "name": "get_module_stats",
            "description": "Item and relationship counts by type for one module, plus its manifest metadata",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "module": { "type": "string" }
                },
                "required": ["module"]
            }
        }),
        json!({
            "name": "find_references",
            "description": "Every place an item is defined, inherited, overridden, referenced or modified, with file and line. Unresolved references are included.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "item_type": { "type": "string", "enum": ITEM_TYPES },
                    "name": { "type": "string" },
                    "reference_type": { "type": "string", "enum": REFERENCE_TYPES }
                },
                "required": ["item_type", "name"]
            }
        }),
        json!({
            "name": "search_by_attribute",
            "description": "Items of one type whose attributes equal every given value, e.g. {\"field_type\": \"Many2one\", \"comodel_name\": \"res.partner\"}",
            "inputSchema": {
                "type": "object",
                "properties": with_pagination(json!({
                    "item_type": { "type": "string", "enum": ITEM_TYPES },
                    "attribute_filters": { "type": "object", "description": "Attribute name to string, number or boolean" },
                    "module": { "type": "string" }
                })),
                "required": ["item_type", "attribute_filters"]
            }
        }),
        json!({
            "name": "search_xml_id",
            "description": "Search items by XML id (module.local_id)",
            "inputSchema": {
                "type": "object",
                "properties": with_pagination(json!({
                    "query": { "type": "string" },
                    "module": { "type": "string" }
                })),
                "required": ["query"]
            }
        }),
        json!({
            "name": "update_index",
            "description": "Start an indexing run in the background. Returns immediately; poll get_index_status. Rejected while another run is in progress.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "incremental": { "type": "boolean", "default": true },
                    "modules": { "type": "array", "items": { "type": "string" } },
                    "clear_db": { "type": "boolean", "default": false }
                }
            }
        }),
        json!({
            "name": "get_index_status",
            "description": "Index totals, the active run if any, and the outcome of the last run",
            "inputSchema": {
                "type": "object",
                "properties": {}
            }
        }),
    ]
}
