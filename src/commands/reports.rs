use crate::commands::menu;
use crate::db::Database;
use crate::error::ServiceResult;
use crate::models::{PopularItem, SalesSummary, TotalSales};
use rusqlite::Connection;

pub const DEFAULT_POPULAR_LIMIT: usize = 10;

fn total_sales_conn(conn: &Connection) -> ServiceResult<TotalSales> {
    let (total_revenue, closed_orders): (f64, i64) = conn.query_row(
        "SELECT
            (SELECT COALESCE(SUM(oi.price_at_sale * oi.quantity), 0)
             FROM order_items oi
             JOIN orders o ON o.id = oi.order_id
             WHERE o.status = 'closed'),
            (SELECT COUNT(*) FROM orders WHERE status = 'closed')",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(TotalSales {
        total_revenue,
        closed_orders,
    })
}

/// Top `limit` menu items by quantity sold across closed orders. Ties are
/// broken by menu item id; items never sold do not appear.
fn popular_items_conn(conn: &Connection, limit: usize) -> ServiceResult<Vec<PopularItem>> {
    let mut stmt = conn.prepare(
        "SELECT oi.menu_item_id, SUM(oi.quantity) AS sold
         FROM order_items oi
         JOIN orders o ON o.id = oi.order_id
         WHERE o.status = 'closed'
         GROUP BY oi.menu_item_id
         ORDER BY sold DESC, oi.menu_item_id ASC
         LIMIT ?1",
    )?;

    let ranking = stmt
        .query_map([limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut popular = Vec::with_capacity(ranking.len());
    for (menu_item_id, quantity_sold) in ranking {
        let menu_item = menu::find_menu_item(conn, &menu_item_id)?;
        popular.push(PopularItem {
            menu_item_id,
            menu_item,
            quantity_sold,
        });
    }

    Ok(popular)
}

/// Revenue across closed orders, each line valued at the price captured when
/// its order closed.
pub fn get_total_sales(db: &Database) -> ServiceResult<TotalSales> {
    let conn = db.lock()?;
    total_sales_conn(&conn)
}

/// `limit` defaults to the database's configured ranking size.
pub fn get_popular_items(
    db: &Database,
    limit: Option<usize>,
) -> ServiceResult<Vec<PopularItem>> {
    let conn = db.lock()?;
    popular_items_conn(&conn, limit.unwrap_or_else(|| db.popular_items_limit()))
}

pub fn get_sales_summary(db: &Database, limit: Option<usize>) -> ServiceResult<SalesSummary> {
    let conn = db.lock()?;

    let totals = total_sales_conn(&conn)?;
    let limit = limit.unwrap_or_else(|| db.popular_items_limit());
    let popular_items = popular_items_conn(&conn, limit)?;

    Ok(SalesSummary {
        total_revenue: totals.total_revenue,
        closed_orders: totals.closed_orders,
        popular_items,
    })
}
