use crate::db::{now_timestamp, Database};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{CreateMenuItem, MenuItem, PriceChange, RecipeLine, UpdateMenuItem};
use crate::reservation;
use rusqlite::{Connection, OptionalExtension};

fn load_recipe(conn: &Connection, menu_item_id: &str) -> ServiceResult<Vec<RecipeLine>> {
    let mut stmt = conn.prepare(
        "SELECT ingredient_id, quantity
         FROM menu_item_ingredients
         WHERE menu_item_id = ?1
         ORDER BY position",
    )?;

    let lines = stmt
        .query_map([menu_item_id], |row| {
            Ok(RecipeLine {
                ingredient_id: row.get(0)?,
                quantity: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(lines)
}

fn store_recipe(
    conn: &Connection,
    menu_item_id: &str,
    ingredients: &[RecipeLine],
) -> ServiceResult<()> {
    conn.execute(
        "DELETE FROM menu_item_ingredients WHERE menu_item_id = ?1",
        [menu_item_id],
    )?;

    for (position, line) in ingredients.iter().enumerate() {
        conn.execute(
            "INSERT INTO menu_item_ingredients (menu_item_id, position, ingredient_id, quantity) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                menu_item_id,
                position as i64,
                line.ingredient_id,
                line.quantity
            ],
        )?;
    }

    Ok(())
}

pub(crate) fn record_price(
    conn: &Connection,
    menu_item_id: &str,
    old_price: Option<f64>,
    new_price: f64,
) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO price_history (menu_item_id, old_price, new_price, changed_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![menu_item_id, old_price, new_price, now_timestamp()],
    )?;
    Ok(())
}

pub(crate) fn find_menu_item(conn: &Connection, id: &str) -> ServiceResult<Option<MenuItem>> {
    let item = conn
        .query_row(
            "SELECT id, name, description, price, created_at FROM menu_items WHERE id = ?1",
            [id],
            |row| {
                Ok(MenuItem {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    price: row.get(3)?,
                    ingredients: Vec::new(),
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;

    match item {
        Some(mut item) => {
            item.ingredients = load_recipe(conn, &item.id)?;
            Ok(Some(item))
        }
        None => Ok(None),
    }
}

pub(crate) fn list_menu_items(conn: &Connection) -> ServiceResult<Vec<MenuItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, price, created_at FROM menu_items ORDER BY id",
    )?;

    let mut items = stmt
        .query_map([], |row| {
            Ok(MenuItem {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                price: row.get(3)?,
                ingredients: Vec::new(),
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for item in &mut items {
        item.ingredients = load_recipe(conn, &item.id)?;
    }

    Ok(items)
}

pub(crate) fn insert_menu_item(conn: &Connection, item: &MenuItem) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO menu_items (id, name, description, price, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![item.id, item.name, item.description, item.price, item.created_at],
    )?;
    store_recipe(conn, &item.id, &item.ingredients)
}

/// Ordered `(ingredient, qty_per_unit)` pairs needed to make one unit of a
/// menu item.
pub fn resolve_recipe(conn: &Connection, menu_item_id: &str) -> ServiceResult<Vec<RecipeLine>> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM menu_items WHERE id = ?1",
            [menu_item_id],
            |row| row.get(0),
        )
        .optional()?;

    if exists.is_none() {
        return Err(ServiceError::ProductNotFound(menu_item_id.to_string()));
    }

    load_recipe(conn, menu_item_id)
}

pub fn add_menu_item(db: &Database, item: CreateMenuItem) -> ServiceResult<MenuItem> {
    item.validate()?;

    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    if find_menu_item(&tx, &item.id)?.is_some() {
        return Err(ServiceError::conflict("menu item", item.id));
    }

    let menu_item = MenuItem {
        id: item.id,
        name: item.name,
        description: item.description,
        price: item.price,
        ingredients: item.ingredients,
        created_at: now_timestamp(),
    };
    insert_menu_item(&tx, &menu_item)?;
    record_price(&tx, &menu_item.id, None, menu_item.price)?;
    tx.commit()?;

    tracing::info!(menu_item = %menu_item.id, price = menu_item.price, "menu item added");
    Ok(menu_item)
}

pub fn get_menu_items(db: &Database) -> ServiceResult<Vec<MenuItem>> {
    let conn = db.lock()?;
    list_menu_items(&conn)
}

pub fn get_menu_item(db: &Database, id: &str) -> ServiceResult<MenuItem> {
    let conn = db.lock()?;
    find_menu_item(&conn, id)?.ok_or_else(|| ServiceError::not_found("menu item", id))
}

/// Replaces name, description, price and recipe. Open orders pick up the new
/// recipe, so the update is refused when the ledger cannot cover what they
/// would then reserve.
pub fn update_menu_item(
    db: &Database,
    id: &str,
    item: UpdateMenuItem,
) -> ServiceResult<MenuItem> {
    item.validate()?;

    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    let existing =
        find_menu_item(&tx, id)?.ok_or_else(|| ServiceError::not_found("menu item", id))?;

    tx.execute(
        "UPDATE menu_items SET name = ?1, description = ?2, price = ?3 WHERE id = ?4",
        rusqlite::params![item.name, item.description, item.price, id],
    )?;
    store_recipe(&tx, id, &item.ingredients)?;

    if let Err(err) = reservation::ensure_reservations_covered(&tx) {
        tracing::warn!(menu_item = %id, error = %err, "recipe change rejected");
        return Err(err);
    }

    if existing.price != item.price {
        record_price(&tx, id, Some(existing.price), item.price)?;
    }

    let updated =
        find_menu_item(&tx, id)?.ok_or_else(|| ServiceError::not_found("menu item", id))?;
    tx.commit()?;

    Ok(updated)
}

/// Deletes a menu item and its recipe. Open orders that reference it stay in
/// place but can no longer be closed.
pub fn delete_menu_item(db: &Database, id: &str) -> ServiceResult<()> {
    let conn = db.lock()?;

    let open_refs: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM order_items oi
         JOIN orders o ON o.id = oi.order_id
         WHERE o.status = 'open' AND oi.menu_item_id = ?1",
        [id],
        |row| row.get(0),
    )?;

    let deleted = conn.execute("DELETE FROM menu_items WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(ServiceError::not_found("menu item", id));
    }

    if open_refs > 0 {
        tracing::warn!(
            menu_item = %id,
            open_orders = open_refs,
            "menu item deleted while referenced by open orders"
        );
    } else {
        tracing::info!(menu_item = %id, "menu item deleted");
    }

    Ok(())
}

pub fn get_price_history(
    db: &Database,
    menu_item_id: &str,
) -> ServiceResult<Vec<PriceChange>> {
    let conn = db.lock()?;

    let mut stmt = conn.prepare(
        "SELECT id, menu_item_id, old_price, new_price, changed_at
         FROM price_history
         WHERE menu_item_id = ?1
         ORDER BY id",
    )?;

    let history = stmt
        .query_map([menu_item_id], |row| {
            Ok(PriceChange {
                id: row.get(0)?,
                menu_item_id: row.get(1)?,
                old_price: row.get(2)?,
                new_price: row.get(3)?,
                changed_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(history)
}
