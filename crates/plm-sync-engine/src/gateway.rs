//! Live adapters wiring [`ArenaClient`] to the engine's transport-agnostic
//! traits ([`PlmGateway`], [`BomTreeGateway`]).
//!
//! Kept separate from `push.rs`/`loader.rs` so those modules stay testable
//! against fakes without ever importing `plm-sync-client` themselves.

use plm_sync_client::{ArenaClient, BomLineWire};
use plm_sync_types::{BomLine, Item, PlmError, Result};
use serde_json::Value;

use crate::loader::BomTreeGateway;
use crate::push::{PlmGateway, ResolvedChild};

fn wire_to_bom_line(wire: BomLineWire) -> BomLine {
    BomLine {
        line_id: wire.line_id,
        child_id: wire.child_id,
        child_number: wire.child_number,
        quantity: wire.quantity,
        level: 1,
        line_number: wire.line_number,
        attributes: wire.additional_attributes,
    }
}

fn bom_line_to_wire(line: &BomLine) -> BomLineWire {
    BomLineWire {
        line_id: line.line_id.clone(),
        child_id: line.child_id.clone(),
        child_number: line.child_number.clone(),
        quantity: line.quantity,
        line_number: line.line_number,
        revision: None,
        lifecycle: None,
        additional_attributes: line.attributes.clone(),
    }
}

fn attribute_settings_contain(settings: &Value, attribute_id: &str) -> bool {
    let list = settings.get("results").unwrap_or(settings);
    list.as_array()
        .map(|items| {
            items
                .iter()
                .any(|item| item.get("id").and_then(Value::as_str) == Some(attribute_id))
        })
        .unwrap_or(false)
}

impl PlmGateway for ArenaClient {
    fn probe(&self) -> Result<()> {
        self.get_workspace_settings().map(|_| ())
    }

    fn resolve_child(&self, number: &str) -> Result<Option<ResolvedChild>> {
        match self.get_item_by_number(number) {
            Ok(item) => Ok(Some(ResolvedChild { id: item.id, number: item.number })),
            Err(PlmError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn attribute_exists(&self, attribute_id: &str) -> Result<bool> {
        let settings = self.get_item_attribute_settings()?;
        Ok(attribute_settings_contain(&settings, attribute_id))
    }

    fn find_item_by_number(&self, number: &str) -> Result<Option<Item>> {
        match self.get_item_by_number(number) {
            Ok(item) => Ok(Some(item)),
            Err(PlmError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_item(
        &self,
        number: &str,
        name: &str,
        category: Option<&str>,
        description: Option<&str>,
    ) -> Result<Item> {
        let record = Item {
            id: String::new(),
            number: number.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            revision: None,
            category_name: category.map(str::to_string),
            category_id: None,
            lifecycle_name: None,
            lifecycle_id: None,
            is_assembly: true,
            assembly_type: None,
        };
        ArenaClient::create_item(self, &record)
    }

    fn get_bom_lines(&self, parent_id: &str) -> Result<Vec<BomLine>> {
        ArenaClient::get_bom_lines(self, parent_id).map(|wires| wires.into_iter().map(wire_to_bom_line).collect())
    }

    fn create_bom_line(&self, parent_id: &str, line: &BomLine) -> Result<BomLine> {
        let wire = bom_line_to_wire(line);
        ArenaClient::create_bom_line(self, parent_id, &wire).map(wire_to_bom_line)
    }

    fn update_bom_line(&self, parent_id: &str, line_id: &str, new_quantity: u32) -> Result<()> {
        ArenaClient::update_bom_line(self, parent_id, line_id, new_quantity).map(|_| ())
    }

    fn delete_bom_line(&self, parent_id: &str, line_id: &str) -> Result<()> {
        ArenaClient::delete_bom_line(self, parent_id, line_id)
    }

    fn delete_item(&self, opaque_id: &str) -> Result<()> {
        ArenaClient::delete_item(self, opaque_id)
    }
}

impl BomTreeGateway for ArenaClient {
    fn get_bom_lines(&self, parent_id: &str) -> Result<Vec<BomLine>> {
        PlmGateway::get_bom_lines(self, parent_id)
    }
}
