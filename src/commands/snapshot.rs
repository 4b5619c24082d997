//! Whole-collection JSON export and import: one array per entity type.

use crate::commands::{inventory, menu, orders};
use crate::db::Database;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    validate_order_lines, CreateIngredient, CreateMenuItem, IngredientStock, MenuItem, Order,
};
use crate::reservation;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

pub const INVENTORY_FILE: &str = "inventory.json";
pub const MENU_FILE: &str = "menu_items.json";
pub const ORDERS_FILE: &str = "orders.json";

/// Writes to a sibling temp file first and renames it into place, so readers
/// never see a half-written collection.
fn write_collection<T: Serialize>(dir: &Path, file_name: &str, items: &[T]) -> ServiceResult<()> {
    let path = dir.join(file_name);
    let tmp_path = dir.join(format!("{}.tmp", file_name));

    let data = serde_json::to_vec_pretty(items)?;
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, &path)?;

    Ok(())
}

fn read_collection<T: DeserializeOwned>(dir: &Path, file_name: &str) -> ServiceResult<Vec<T>> {
    let path = dir.join(file_name);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let data = fs::read(&path)?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    Ok(serde_json::from_slice(&data)?)
}

pub fn export_snapshot(db: &Database, dir: &Path) -> ServiceResult<()> {
    fs::create_dir_all(dir)?;

    // Read everything under one lock so the three files agree with each other.
    let (stock, menu_items, all_orders) = {
        let conn = db.lock()?;
        (
            inventory::list_ingredients(&conn)?,
            menu::list_menu_items(&conn)?,
            orders::list_orders(&conn, None)?,
        )
    };

    write_collection(dir, INVENTORY_FILE, &stock)?;
    write_collection(dir, MENU_FILE, &menu_items)?;
    write_collection(dir, ORDERS_FILE, &all_orders)?;

    tracing::info!(
        dir = %dir.display(),
        inventory = stock.len(),
        menu = menu_items.len(),
        orders = all_orders.len(),
        "snapshot exported"
    );
    Ok(())
}

fn validate_ingredient(item: &IngredientStock) -> ServiceResult<()> {
    CreateIngredient {
        id: item.id.clone(),
        name: item.name.clone(),
        quantity: item.quantity,
        unit: item.unit.clone(),
    }
    .validate()
}

fn validate_menu_item(item: &MenuItem) -> ServiceResult<()> {
    CreateMenuItem {
        id: item.id.clone(),
        name: item.name.clone(),
        description: item.description.clone(),
        price: item.price,
        ingredients: item.ingredients.clone(),
    }
    .validate()
}

fn validate_order(order: &Order) -> ServiceResult<()> {
    if order.id.is_empty() || order.id.chars().any(char::is_whitespace) {
        return Err(ServiceError::validation("id", format!("invalid order id {:?}", order.id)));
    }
    if order.customer_name.trim().is_empty() {
        return Err(ServiceError::validation("customer_name", "must not be empty"));
    }
    validate_order_lines(&order.lines())
}

/// Replaces the whole database content with the collections found in `dir`.
/// Missing files count as empty collections. Runs as one transaction.
///
/// History tables restart from the imported state: one ledger entry per
/// stocked ingredient, one price entry per menu item and the status rows
/// implied by each order. Imports whose open orders need more than the
/// imported ledger holds are rejected.
pub fn import_snapshot(db: &Database, dir: &Path) -> ServiceResult<()> {
    let stock: Vec<IngredientStock> = read_collection(dir, INVENTORY_FILE)?;
    let menu_items: Vec<MenuItem> = read_collection(dir, MENU_FILE)?;
    let all_orders: Vec<Order> = read_collection(dir, ORDERS_FILE)?;

    for item in &stock {
        validate_ingredient(item)?;
    }
    for item in &menu_items {
        validate_menu_item(item)?;
    }
    for order in &all_orders {
        validate_order(order)?;
    }

    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    tx.execute_batch(
        "DELETE FROM order_items;
         DELETE FROM orders;
         DELETE FROM menu_item_ingredients;
         DELETE FROM menu_items;
         DELETE FROM inventory;
         DELETE FROM inventory_transactions;
         DELETE FROM price_history;
         DELETE FROM order_status_history;",
    )?;

    for item in &stock {
        if inventory::find_ingredient(&tx, &item.id)?.is_some() {
            return Err(ServiceError::conflict("ingredient", item.id.clone()));
        }
        tx.execute(
            "INSERT INTO inventory (id, name, quantity, unit, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![item.id, item.name, item.quantity, item.unit, item.created_at],
        )?;
        if item.quantity > 0.0 {
            inventory::record_transaction(&tx, &item.id, item.quantity, "snapshot import")?;
        }
    }
    for item in &menu_items {
        if menu::find_menu_item(&tx, &item.id)?.is_some() {
            return Err(ServiceError::conflict("menu item", item.id.clone()));
        }
        menu::insert_menu_item(&tx, item)?;
        menu::record_price(&tx, &item.id, None, item.price)?;
    }
    for order in &all_orders {
        if orders::find_order(&tx, &order.id)?.is_some() {
            return Err(ServiceError::conflict("order", order.id.clone()));
        }
        orders::insert_order(&tx, order)?;
    }

    reservation::ensure_reservations_covered(&tx)?;
    tx.commit()?;

    tracing::info!(
        dir = %dir.display(),
        inventory = stock.len(),
        menu = menu_items.len(),
        orders = all_orders.len(),
        "snapshot imported"
    );
    Ok(())
}
