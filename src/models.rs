use crate::error::{ServiceError, ServiceResult};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ===== Inventory =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IngredientStock {
    pub id: String,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateIngredient {
    pub id: String,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateIngredient {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryTransaction {
    pub id: i64,
    pub ingredient_id: String,
    pub quantity_change: f64,
    pub reason: String,
    pub created_at: String,
}

/// Ledger quantity split into what open orders already hold and what is left.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StockAvailability {
    pub ingredient_id: String,
    pub name: String,
    pub unit: String,
    pub quantity: f64,
    pub reserved: f64,
    pub free: f64,
}

// ===== Menu =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecipeLine {
    pub ingredient_id: String,
    pub quantity: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub ingredients: Vec<RecipeLine>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMenuItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub ingredients: Vec<RecipeLine>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateMenuItem {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub ingredients: Vec<RecipeLine>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PriceChange {
    pub id: i64,
    pub menu_item_id: String,
    pub old_price: Option<f64>,
    pub new_price: f64,
    pub changed_at: String,
}

// ===== Orders =====

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Closed => "closed",
        }
    }
}

impl ToSql for OrderStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for OrderStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "open" => Ok(OrderStatus::Open),
            "closed" => Ok(OrderStatus::Closed),
            other => Err(FromSqlError::Other(
                format!("unknown order status: {}", other).into(),
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrderLine {
    pub menu_item_id: String,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrderItem {
    pub menu_item_id: String,
    pub menu_item_name: Option<String>,
    pub quantity: i32,
    /// Unit price captured when the order closed.
    pub price_at_sale: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Order {
    pub id: String,
    pub customer_name: String,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: String,
    pub closed_at: Option<String>,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    pub fn lines(&self) -> Vec<OrderLine> {
        self.items
            .iter()
            .map(|item| OrderLine {
                menu_item_id: item.menu_item_id.clone(),
                quantity: item.quantity,
            })
            .collect()
    }
}

/// Order creation request. `status` and `created_at` exist only so that a
/// client trying to set them can be rejected.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CreateOrder {
    #[serde(default)]
    pub id: Option<String>,
    pub customer_name: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<OrderLine>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateOrder {
    pub customer_name: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderStatusChange {
    pub id: i64,
    pub order_id: String,
    pub status: OrderStatus,
    pub changed_at: String,
}

// ===== Reports =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TotalSales {
    pub total_revenue: f64,
    pub closed_orders: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PopularItem {
    pub menu_item_id: String,
    /// None when the menu item was deleted after its orders closed.
    pub menu_item: Option<MenuItem>,
    pub quantity_sold: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SalesSummary {
    pub total_revenue: f64,
    pub closed_orders: i64,
    pub popular_items: Vec<PopularItem>,
}

// ===== Validation =====

fn validate_id(field: &str, id: &str) -> ServiceResult<()> {
    if id.is_empty() {
        return Err(ServiceError::validation(field, "must not be empty"));
    }
    if id.chars().any(char::is_whitespace) {
        return Err(ServiceError::validation(field, "must not contain whitespace"));
    }
    Ok(())
}

fn validate_text(field: &str, value: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn validate_stock_quantity(quantity: f64) -> ServiceResult<()> {
    if !quantity.is_finite() || quantity < 0.0 {
        return Err(ServiceError::validation(
            "quantity",
            "must be a non-negative number",
        ));
    }
    Ok(())
}

fn validate_recipe(ingredients: &[RecipeLine]) -> ServiceResult<()> {
    if ingredients.is_empty() {
        return Err(ServiceError::validation(
            "ingredients",
            "menu item must contain at least 1 ingredient",
        ));
    }

    let mut seen = HashSet::new();
    for line in ingredients {
        validate_id("ingredients.ingredient_id", &line.ingredient_id)?;
        if !line.quantity.is_finite() || line.quantity <= 0.0 {
            return Err(ServiceError::validation(
                "ingredients.quantity",
                format!("quantity of {} must be greater than 0", line.ingredient_id),
            ));
        }
        if !seen.insert(line.ingredient_id.as_str()) {
            return Err(ServiceError::validation(
                "ingredients",
                format!("ingredient {} is repeated", line.ingredient_id),
            ));
        }
    }
    Ok(())
}

fn validate_price(price: f64) -> ServiceResult<()> {
    if !price.is_finite() || price <= 0.0 {
        return Err(ServiceError::validation("price", "must be greater than 0"));
    }
    Ok(())
}

/// Shape checks shared by order creation and update.
pub fn validate_order_lines(items: &[OrderLine]) -> ServiceResult<()> {
    if items.is_empty() {
        return Err(ServiceError::validation(
            "items",
            "order must contain at least 1 item",
        ));
    }

    let mut seen = HashSet::new();
    for line in items {
        validate_id("items.menu_item_id", &line.menu_item_id)?;
        if line.quantity < 1 {
            return Err(ServiceError::validation(
                "items.quantity",
                format!("quantity of {} must be at least 1", line.menu_item_id),
            ));
        }
        if !seen.insert(line.menu_item_id.as_str()) {
            return Err(ServiceError::validation(
                "items",
                format!("menu item {} appears more than once", line.menu_item_id),
            ));
        }
    }
    Ok(())
}

impl CreateIngredient {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_id("id", &self.id)?;
        validate_text("name", &self.name)?;
        validate_stock_quantity(self.quantity)?;
        validate_text("unit", &self.unit)
    }
}

impl UpdateIngredient {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_text("name", &self.name)?;
        validate_stock_quantity(self.quantity)?;
        validate_text("unit", &self.unit)
    }
}

impl CreateMenuItem {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_id("id", &self.id)?;
        validate_text("name", &self.name)?;
        validate_text("description", &self.description)?;
        validate_price(self.price)?;
        validate_recipe(&self.ingredients)
    }
}

impl UpdateMenuItem {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_text("name", &self.name)?;
        validate_text("description", &self.description)?;
        validate_price(self.price)?;
        validate_recipe(&self.ingredients)
    }
}

impl CreateOrder {
    pub fn validate(&self) -> ServiceResult<()> {
        if let Some(id) = &self.id {
            validate_id("id", id)?;
        }
        validate_text("customer_name", &self.customer_name)?;
        validate_order_lines(&self.items)?;
        if self.status.is_some() {
            return Err(ServiceError::validation(
                "status",
                "status cannot be set manually",
            ));
        }
        if self.created_at.is_some() {
            return Err(ServiceError::validation(
                "created_at",
                "created_at cannot be set manually",
            ));
        }
        Ok(())
    }
}

impl UpdateOrder {
    pub fn validate(&self) -> ServiceResult<()> {
        validate_text("customer_name", &self.customer_name)?;
        validate_order_lines(&self.items)
    }
}
