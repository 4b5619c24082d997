use crate::db::{now_timestamp, Database};
use crate::error::{FulfillmentStage, ServiceError, ServiceResult};
use crate::models::{
    CreateIngredient, IngredientStock, InventoryTransaction, StockAvailability, UpdateIngredient,
};
use crate::reservation::{self, QUANTITY_EPSILON};
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;

const SELECT_INGREDIENT: &str = "SELECT id, name, quantity, unit, created_at FROM inventory";

fn map_ingredient(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngredientStock> {
    Ok(IngredientStock {
        id: row.get(0)?,
        name: row.get(1)?,
        quantity: row.get(2)?,
        unit: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn find_ingredient(
    conn: &Connection,
    id: &str,
) -> ServiceResult<Option<IngredientStock>> {
    let item = conn
        .query_row(
            &format!("{} WHERE id = ?1", SELECT_INGREDIENT),
            [id],
            map_ingredient,
        )
        .optional()?;
    Ok(item)
}

pub(crate) fn list_ingredients(conn: &Connection) -> ServiceResult<Vec<IngredientStock>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_INGREDIENT))?;

    let items = stmt
        .query_map([], map_ingredient)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Ledger quantity per ingredient id.
pub(crate) fn ledger_quantities(conn: &Connection) -> ServiceResult<BTreeMap<String, f64>> {
    let mut stmt = conn.prepare("SELECT id, quantity FROM inventory")?;

    let ledger = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(ledger)
}

pub(crate) fn record_transaction(
    conn: &Connection,
    ingredient_id: &str,
    quantity_change: f64,
    reason: &str,
) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO inventory_transactions (ingredient_id, quantity_change, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![ingredient_id, quantity_change, reason, now_timestamp()],
    )?;
    Ok(())
}

/// Applies `delta` to one ledger entry and logs it. Refuses to go below zero;
/// results within float noise of zero are stored as exactly zero.
pub(crate) fn adjust_quantity_conn(
    conn: &Connection,
    ingredient_id: &str,
    delta: f64,
    reason: &str,
    stage: FulfillmentStage,
) -> ServiceResult<f64> {
    let current: f64 = conn
        .query_row(
            "SELECT quantity FROM inventory WHERE id = ?1",
            [ingredient_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| ServiceError::not_found("ingredient", ingredient_id))?;

    let mut updated = current + delta;
    if updated < -QUANTITY_EPSILON {
        return Err(ServiceError::InsufficientQuantity {
            ingredient_id: ingredient_id.to_string(),
            required: -delta,
            available: current,
            stage,
        });
    }
    if updated < 0.0 {
        updated = 0.0;
    }

    conn.execute(
        "UPDATE inventory SET quantity = ?1 WHERE id = ?2",
        rusqlite::params![updated, ingredient_id],
    )?;
    record_transaction(conn, ingredient_id, delta, reason)?;

    Ok(updated)
}

/// Refuses a ledger quantity below what open orders hold of that ingredient.
fn ensure_covers_reservation(conn: &Connection, id: &str, quantity: f64) -> ServiceResult<()> {
    let reserved = reservation::reserved_by_open_orders(conn, None)?
        .get(id)
        .copied()
        .unwrap_or(0.0);

    if quantity + QUANTITY_EPSILON < reserved {
        tracing::warn!(
            ingredient = %id,
            quantity,
            reserved,
            "ledger change rejected: below open-order reservation"
        );
        return Err(ServiceError::IngredientReserved {
            ingredient_id: id.to_string(),
            reserved,
        });
    }

    Ok(())
}

pub fn add_inventory_item(db: &Database, item: CreateIngredient) -> ServiceResult<IngredientStock> {
    item.validate()?;

    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    if find_ingredient(&tx, &item.id)?.is_some() {
        return Err(ServiceError::conflict("ingredient", item.id));
    }

    tx.execute(
        "INSERT INTO inventory (id, name, quantity, unit, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![item.id, item.name, item.quantity, item.unit, now_timestamp()],
    )?;
    if item.quantity > 0.0 {
        record_transaction(&tx, &item.id, item.quantity, "initial stock")?;
    }

    let created = find_ingredient(&tx, &item.id)?
        .ok_or_else(|| ServiceError::not_found("ingredient", item.id.clone()))?;
    tx.commit()?;

    tracing::info!(ingredient = %created.id, quantity = created.quantity, "inventory item added");
    Ok(created)
}

pub fn get_inventory(db: &Database) -> ServiceResult<Vec<IngredientStock>> {
    let conn = db.lock()?;
    list_ingredients(&conn)
}

pub fn get_inventory_item(db: &Database, id: &str) -> ServiceResult<IngredientStock> {
    let conn = db.lock()?;
    find_ingredient(&conn, id)?.ok_or_else(|| ServiceError::not_found("ingredient", id))
}

/// Replaces name, quantity and unit. Lowering the quantity below what open
/// orders reserve fails with `IngredientReserved`.
pub fn update_inventory_item(
    db: &Database,
    id: &str,
    item: UpdateIngredient,
) -> ServiceResult<IngredientStock> {
    item.validate()?;

    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    let existing =
        find_ingredient(&tx, id)?.ok_or_else(|| ServiceError::not_found("ingredient", id))?;

    tx.execute(
        "UPDATE inventory SET name = ?1, quantity = ?2, unit = ?3 WHERE id = ?4",
        rusqlite::params![item.name, item.quantity, item.unit, id],
    )?;

    let delta = item.quantity - existing.quantity;
    if delta != 0.0 {
        if delta < 0.0 {
            ensure_covers_reservation(&tx, id, item.quantity)?;
        }
        record_transaction(&tx, id, delta, "manual update")?;
    }

    let updated =
        find_ingredient(&tx, id)?.ok_or_else(|| ServiceError::not_found("ingredient", id))?;
    tx.commit()?;

    Ok(updated)
}

/// Direct ledger adjustment (restock or write-off). A write-off may not cut
/// into stock that open orders reserve.
pub fn adjust_quantity(
    db: &Database,
    id: &str,
    delta: f64,
    reason: &str,
) -> ServiceResult<IngredientStock> {
    if !delta.is_finite() {
        return Err(ServiceError::validation("delta", "must be a finite number"));
    }
    if reason.trim().is_empty() {
        return Err(ServiceError::validation("reason", "must not be empty"));
    }

    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    let quantity = adjust_quantity_conn(&tx, id, delta, reason, FulfillmentStage::Adjustment)?;
    if delta < 0.0 {
        ensure_covers_reservation(&tx, id, quantity)?;
    }

    let updated =
        find_ingredient(&tx, id)?.ok_or_else(|| ServiceError::not_found("ingredient", id))?;
    tx.commit()?;

    tracing::info!(
        ingredient = %id,
        delta,
        quantity = updated.quantity,
        reason,
        "inventory adjusted"
    );
    Ok(updated)
}

/// Removes an ingredient unless an open order's demand still references it.
pub fn delete_inventory_item(db: &Database, id: &str) -> ServiceResult<()> {
    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    if find_ingredient(&tx, id)?.is_none() {
        return Err(ServiceError::not_found("ingredient", id));
    }

    if let Some(reserved) = reservation::reserved_by_open_orders(&tx, None)?.get(id) {
        return Err(ServiceError::IngredientReserved {
            ingredient_id: id.to_string(),
            reserved: *reserved,
        });
    }

    tx.execute("DELETE FROM inventory WHERE id = ?1", [id])?;
    tx.commit()?;

    tracing::info!(ingredient = %id, "inventory item deleted");
    Ok(())
}

pub fn get_inventory_transactions(
    db: &Database,
    ingredient_id: &str,
) -> ServiceResult<Vec<InventoryTransaction>> {
    let conn = db.lock()?;

    let mut stmt = conn.prepare(
        "SELECT id, ingredient_id, quantity_change, reason, created_at
         FROM inventory_transactions
         WHERE ingredient_id = ?1
         ORDER BY id",
    )?;

    let transactions = stmt
        .query_map([ingredient_id], |row| {
            Ok(InventoryTransaction {
                id: row.get(0)?,
                ingredient_id: row.get(1)?,
                quantity_change: row.get(2)?,
                reason: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

/// Per ingredient: ledger quantity, reservation held by open orders, and the
/// free remainder new orders can draw on.
pub fn get_stock_availability(db: &Database) -> ServiceResult<Vec<StockAvailability>> {
    let conn = db.lock()?;

    let reserved = reservation::reserved_by_open_orders(&conn, None)?;
    let availability = list_ingredients(&conn)?
        .into_iter()
        .map(|item| {
            let held = reserved.get(&item.id).copied().unwrap_or(0.0);
            StockAvailability {
                free: reservation::free_quantity(item.quantity, held),
                ingredient_id: item.id,
                name: item.name,
                unit: item.unit,
                quantity: item.quantity,
                reserved: held,
            }
        })
        .collect();

    Ok(availability)
}
