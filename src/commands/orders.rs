use crate::commands::inventory;
use crate::db::{now_timestamp, Database};
use crate::error::{FulfillmentStage, ServiceError, ServiceResult};
use crate::models::{
    CreateOrder, Order, OrderItem, OrderLine, OrderStatus, OrderStatusChange, UpdateOrder,
};
use crate::reservation::{self, Demand};
use rusqlite::{Connection, OptionalExtension};

const ORDER_ID_PREFIX: &str = "order";

const SELECT_ORDER: &str =
    "SELECT id, customer_name, notes, status, created_at, closed_at FROM orders";

fn map_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        customer_name: row.get(1)?,
        notes: row.get(2)?,
        status: row.get(3)?,
        items: Vec::new(),
        created_at: row.get(4)?,
        closed_at: row.get(5)?,
    })
}

fn load_items(conn: &Connection, order_id: &str) -> ServiceResult<Vec<OrderItem>> {
    let mut item_stmt = conn.prepare(
        "SELECT oi.menu_item_id, m.name, oi.quantity, oi.price_at_sale
         FROM order_items oi
         LEFT JOIN menu_items m ON oi.menu_item_id = m.id
         WHERE oi.order_id = ?1
         ORDER BY oi.position",
    )?;

    let items = item_stmt
        .query_map([order_id], |row| {
            Ok(OrderItem {
                menu_item_id: row.get(0)?,
                menu_item_name: row.get(1)?,
                quantity: row.get(2)?,
                price_at_sale: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

fn store_items(conn: &Connection, order_id: &str, lines: &[OrderLine]) -> ServiceResult<()> {
    conn.execute("DELETE FROM order_items WHERE order_id = ?1", [order_id])?;

    for (position, line) in lines.iter().enumerate() {
        conn.execute(
            "INSERT INTO order_items (order_id, position, menu_item_id, quantity) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![order_id, position as i64, line.menu_item_id, line.quantity],
        )?;
    }

    Ok(())
}

fn record_status(
    conn: &Connection,
    order_id: &str,
    status: OrderStatus,
    changed_at: &str,
) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO order_status_history (order_id, status, changed_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![order_id, status, changed_at],
    )?;
    Ok(())
}

pub(crate) fn find_order(conn: &Connection, id: &str) -> ServiceResult<Option<Order>> {
    let order = conn
        .query_row(&format!("{} WHERE id = ?1", SELECT_ORDER), [id], map_order)
        .optional()?;

    match order {
        Some(mut order) => {
            order.items = load_items(conn, &order.id)?;
            Ok(Some(order))
        }
        None => Ok(None),
    }
}

fn load_order(conn: &Connection, id: &str) -> ServiceResult<Order> {
    find_order(conn, id)?.ok_or_else(|| ServiceError::not_found("order", id))
}

pub(crate) fn list_orders(
    conn: &Connection,
    status: Option<OrderStatus>,
) -> ServiceResult<Vec<Order>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at, id",
        SELECT_ORDER
    ))?;

    let mut orders = stmt
        .query_map([status], map_order)?
        .collect::<Result<Vec<_>, _>>()?;

    for order in &mut orders {
        order.items = load_items(conn, &order.id)?;
    }

    Ok(orders)
}

/// Inserts an order row and its lines exactly as given, with status history
/// rebuilt from its timestamps. Used by snapshot import.
pub(crate) fn insert_order(conn: &Connection, order: &Order) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO orders (id, customer_name, notes, status, created_at, closed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            order.id,
            order.customer_name,
            order.notes,
            order.status,
            order.created_at,
            order.closed_at
        ],
    )?;

    for (position, item) in order.items.iter().enumerate() {
        conn.execute(
            "INSERT INTO order_items (order_id, position, menu_item_id, quantity, price_at_sale) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                order.id,
                position as i64,
                item.menu_item_id,
                item.quantity,
                item.price_at_sale
            ],
        )?;
    }

    record_status(conn, &order.id, OrderStatus::Open, &order.created_at)?;
    if order.status == OrderStatus::Closed {
        let closed_at = order.closed_at.as_deref().unwrap_or(&order.created_at);
        record_status(conn, &order.id, OrderStatus::Closed, closed_at)?;
    }

    Ok(())
}

/// `order{n}` with `n` one past the largest numeric suffix already in use.
/// Fails with `Conflict` once the suffix space is used up.
fn next_order_id(conn: &Connection) -> ServiceResult<String> {
    let mut stmt = conn.prepare("SELECT id FROM orders WHERE id LIKE 'order%'")?;

    let max = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .filter_map(|id| id.strip_prefix(ORDER_ID_PREFIX)?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);

    let next = max
        .checked_add(1)
        .ok_or_else(|| ServiceError::conflict("order", format!("{}{}", ORDER_ID_PREFIX, max)))?;

    Ok(format!("{}{}", ORDER_ID_PREFIX, next))
}

/// Admits a new order: shape check, reservation check against every open
/// order, then persist as open. Reservation failures are returned unchanged.
pub fn create_order(db: &Database, order: CreateOrder) -> ServiceResult<Order> {
    order.validate()?;

    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    let id = match order.id {
        Some(id) => {
            if find_order(&tx, &id)?.is_some() {
                return Err(ServiceError::conflict("order", id));
            }
            id
        }
        None => next_order_id(&tx)?,
    };

    if let Err(err) = reservation::ensure_satisfiable(&tx, &order.items, None) {
        tracing::warn!(order = %id, error = %err, "order rejected");
        return Err(err);
    }

    let created_at = now_timestamp();
    tx.execute(
        "INSERT INTO orders (id, customer_name, notes, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            id,
            order.customer_name,
            order.notes,
            OrderStatus::Open,
            created_at
        ],
    )?;
    store_items(&tx, &id, &order.items)?;
    record_status(&tx, &id, OrderStatus::Open, &created_at)?;

    let created = load_order(&tx, &id)?;
    tx.commit()?;

    tracing::info!(order = %created.id, lines = created.items.len(), "order admitted");
    Ok(created)
}

pub fn get_orders(db: &Database) -> ServiceResult<Vec<Order>> {
    let conn = db.lock()?;
    list_orders(&conn, None)
}

pub fn get_open_orders(db: &Database) -> ServiceResult<Vec<Order>> {
    let conn = db.lock()?;
    list_orders(&conn, Some(OrderStatus::Open))
}

pub fn get_order(db: &Database, id: &str) -> ServiceResult<Order> {
    let conn = db.lock()?;
    load_order(&conn, id)
}

/// Replaces customer, notes and lines of an open order. The new lines are
/// re-checked against free stock with the order's own reservation released.
pub fn update_order(db: &Database, id: &str, update: UpdateOrder) -> ServiceResult<Order> {
    update.validate()?;

    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    let existing = load_order(&tx, id)?;
    if !existing.is_open() {
        return Err(ServiceError::OrderAlreadyClosed(id.to_string()));
    }

    reservation::ensure_satisfiable(&tx, &update.items, Some(id))?;

    tx.execute(
        "UPDATE orders SET customer_name = ?1, notes = ?2 WHERE id = ?3",
        rusqlite::params![update.customer_name, update.notes, id],
    )?;
    store_items(&tx, id, &update.items)?;

    let updated = load_order(&tx, id)?;
    tx.commit()?;

    tracing::info!(order = %id, "order updated");
    Ok(updated)
}

/// Removes an open order, releasing its reservation. Closed orders are
/// permanent.
pub fn delete_order(db: &Database, id: &str) -> ServiceResult<()> {
    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    let existing = load_order(&tx, id)?;
    if !existing.is_open() {
        return Err(ServiceError::OrderAlreadyClosed(id.to_string()));
    }

    tx.execute("DELETE FROM orders WHERE id = ?1", [id])?;
    tx.commit()?;

    tracing::info!(order = %id, "order deleted");
    Ok(())
}

/// Finalizes an open order: deducts its full recipe demand from the ledger and
/// marks it closed.
///
/// All deltas are validated before any is applied, and the whole close runs in
/// one transaction, so a failure leaves the ledger untouched.
pub fn close_order(db: &Database, id: &str) -> ServiceResult<Order> {
    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    let order = load_order(&tx, id)?;
    if !order.is_open() {
        return Err(ServiceError::OrderAlreadyClosed(id.to_string()));
    }

    let need = reservation::demand_for_lines(&tx, &order.lines())?;
    let ledger = inventory::ledger_quantities(&tx)?;
    reservation::check_demand(&ledger, &Demand::new(), &need, FulfillmentStage::Closing)?;

    let reason = format!("order {} closed", id);
    for (ingredient_id, quantity) in &need {
        inventory::adjust_quantity_conn(
            &tx,
            ingredient_id,
            -quantity,
            &reason,
            FulfillmentStage::Closing,
        )?;
    }

    let closed_at = now_timestamp();
    tx.execute(
        "UPDATE order_items
         SET price_at_sale = (SELECT price FROM menu_items WHERE menu_items.id = order_items.menu_item_id)
         WHERE order_id = ?1",
        [id],
    )?;
    tx.execute(
        "UPDATE orders SET status = ?1, closed_at = ?2 WHERE id = ?3",
        rusqlite::params![OrderStatus::Closed, closed_at, id],
    )?;
    record_status(&tx, id, OrderStatus::Closed, &closed_at)?;

    let closed = load_order(&tx, id)?;
    tx.commit()?;

    tracing::info!(order = %id, ingredients = need.len(), "order closed");
    Ok(closed)
}

pub fn get_order_status_history(
    db: &Database,
    order_id: &str,
) -> ServiceResult<Vec<OrderStatusChange>> {
    let conn = db.lock()?;

    let mut stmt = conn.prepare(
        "SELECT id, order_id, status, changed_at
         FROM order_status_history
         WHERE order_id = ?1
         ORDER BY id",
    )?;

    let history = stmt
        .query_map([order_id], |row| {
            Ok(OrderStatusChange {
                id: row.get(0)?,
                order_id: row.get(1)?,
                status: row.get(2)?,
                changed_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(history)
}
