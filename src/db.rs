use crate::commands::reports::DEFAULT_POPULAR_LIMIT;
use crate::error::{ServiceError, ServiceResult};
use rusqlite::{Connection, Result};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Single SQLite connection guarded by one coarse lock. Every mutating
/// operation holds the lock for its whole transaction, so admissions and
/// closes never interleave.
pub struct Database {
    pub conn: Mutex<Connection>,
    popular_items_limit: usize,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::configure(&conn)?;

        Ok(Database {
            conn: Mutex::new(conn),
            popular_items_limit: DEFAULT_POPULAR_LIMIT,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;

        Ok(Database {
            conn: Mutex::new(conn),
            popular_items_limit: DEFAULT_POPULAR_LIMIT,
        })
    }

    /// Ranking size used when a popular-items query names no limit.
    pub fn with_popular_items_limit(mut self, limit: usize) -> Self {
        self.popular_items_limit = limit;
        self
    }

    pub fn popular_items_limit(&self) -> usize {
        self.popular_items_limit
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_millis(5_000))?;
        Ok(())
    }

    pub fn lock(&self) -> ServiceResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ServiceError::LockPoisoned)
    }

    pub fn initialize(&self) -> ServiceResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            -- Ingredient ledger
            CREATE TABLE IF NOT EXISTS inventory (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                quantity REAL NOT NULL CHECK (quantity >= 0),
                unit TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Every ledger mutation, newest last
            CREATE TABLE IF NOT EXISTS inventory_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ingredient_id TEXT NOT NULL,
                quantity_change REAL NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Sellable menu
            CREATE TABLE IF NOT EXISTS menu_items (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                price REAL NOT NULL CHECK (price > 0),
                created_at TEXT NOT NULL
            );

            -- Recipes
            CREATE TABLE IF NOT EXISTS menu_item_ingredients (
                menu_item_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                ingredient_id TEXT NOT NULL,
                quantity REAL NOT NULL CHECK (quantity > 0),
                PRIMARY KEY (menu_item_id, ingredient_id),
                FOREIGN KEY (menu_item_id) REFERENCES menu_items(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                menu_item_id TEXT NOT NULL,
                old_price REAL,
                new_price REAL NOT NULL,
                changed_at TEXT NOT NULL
            );

            -- Orders
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                customer_name TEXT NOT NULL,
                notes TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                created_at TEXT NOT NULL,
                closed_at TEXT
            );

            -- Order lines; menu_item_id may dangle after a menu delete
            CREATE TABLE IF NOT EXISTS order_items (
                order_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                menu_item_id TEXT NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity >= 1),
                price_at_sale REAL,
                PRIMARY KEY (order_id, menu_item_id),
                FOREIGN KEY (order_id) REFERENCES orders(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS order_status_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                status TEXT NOT NULL,
                changed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
            ",
        )?;

        // Run migrations for existing databases (pass connection to avoid deadlock)
        Self::migrate_conn(&conn)?;

        Ok(())
    }

    fn migrate_conn(conn: &Connection) -> Result<()> {
        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(orders)")?
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .collect();

        if !columns.contains(&"notes".to_string()) {
            conn.execute("ALTER TABLE orders ADD COLUMN notes TEXT", [])?;
        }
        if !columns.contains(&"closed_at".to_string()) {
            conn.execute("ALTER TABLE orders ADD COLUMN closed_at TEXT", [])?;
        }

        let item_columns: Vec<String> = conn
            .prepare("PRAGMA table_info(order_items)")?
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .collect();

        if !item_columns.contains(&"price_at_sale".to_string()) {
            conn.execute("ALTER TABLE order_items ADD COLUMN price_at_sale REAL", [])?;
        }

        Ok(())
    }
}

/// Current time in RFC 3339, the format every stored timestamp uses.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
