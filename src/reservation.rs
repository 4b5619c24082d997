//! Reservation accounting: whether a candidate order fits in the stock that
//! open orders have not already spoken for.
//!
//! Reserved stock is recomputed from the open orders on every check instead
//! of being kept as a running counter, so it can never drift from the order
//! table. Callers run these functions inside the transaction that persists the
//! outcome.

use crate::commands::{inventory, menu};
use crate::error::{FulfillmentStage, ServiceError, ServiceResult};
use crate::models::OrderLine;
use rusqlite::Connection;
use std::collections::BTreeMap;

/// Ingredient id to quantity. Ordered so shortfalls are reported
/// deterministically.
pub type Demand = BTreeMap<String, f64>;

/// Slack for float comparisons of ingredient quantities.
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Resolves each line's recipe and sums `qty_per_unit * line_quantity` per
/// ingredient. Fails with `ProductNotFound` on an unknown menu item.
pub fn demand_for_lines(conn: &Connection, lines: &[OrderLine]) -> ServiceResult<Demand> {
    let mut demand = Demand::new();

    for line in lines {
        let recipe = menu::resolve_recipe(conn, &line.menu_item_id)?;
        for ingredient in recipe {
            *demand.entry(ingredient.ingredient_id).or_insert(0.0) +=
                ingredient.quantity * f64::from(line.quantity);
        }
    }

    Ok(demand)
}

/// Demand implied by every open order except `exclude_order`.
///
/// Lines whose menu item no longer exists contribute nothing: such an order
/// can never close, so its stock is not actually going anywhere.
pub fn reserved_by_open_orders(
    conn: &Connection,
    exclude_order: Option<&str>,
) -> ServiceResult<Demand> {
    let mut stmt = conn.prepare(
        "SELECT mi.ingredient_id, SUM(mi.quantity * oi.quantity)
         FROM order_items oi
         JOIN orders o ON o.id = oi.order_id
         JOIN menu_item_ingredients mi ON mi.menu_item_id = oi.menu_item_id
         WHERE o.status = 'open' AND o.id != ?1
         GROUP BY mi.ingredient_id",
    )?;

    let reserved = stmt
        .query_map([exclude_order.unwrap_or("")], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Demand, _>>()?;

    Ok(reserved)
}

/// Ledger quantity minus reservation, clamped at zero. A negative raw value
/// means the ledger was lowered underneath open orders.
pub fn free_quantity(ledger_quantity: f64, reserved: f64) -> f64 {
    let free = ledger_quantity - reserved;
    if free < 0.0 {
        tracing::warn!(
            ledger_quantity,
            reserved,
            "open orders reserve more than the ledger holds"
        );
        0.0
    } else {
        free
    }
}

/// Checks `need` against `ledger - reserved`, ingredient by ingredient.
pub fn check_demand(
    ledger: &BTreeMap<String, f64>,
    reserved: &Demand,
    need: &Demand,
    stage: FulfillmentStage,
) -> ServiceResult<()> {
    for (ingredient_id, required) in need {
        let quantity = ledger
            .get(ingredient_id)
            .copied()
            .ok_or_else(|| ServiceError::IngredientNotFound(ingredient_id.clone()))?;
        let reserved_qty = reserved.get(ingredient_id).copied().unwrap_or(0.0);
        let available = free_quantity(quantity, reserved_qty);

        tracing::debug!(
            ingredient = %ingredient_id,
            required,
            quantity,
            reserved = reserved_qty,
            available,
            %stage,
            "reservation check"
        );

        if *required - available > QUANTITY_EPSILON {
            return Err(ServiceError::InsufficientQuantity {
                ingredient_id: ingredient_id.clone(),
                required: *required,
                available,
                stage,
            });
        }
    }

    Ok(())
}

/// Admission check for a candidate order. `exclude_order` is the order's own
/// id when re-checking an update, so it is not counted against itself.
pub fn ensure_satisfiable(
    conn: &Connection,
    lines: &[OrderLine],
    exclude_order: Option<&str>,
) -> ServiceResult<()> {
    let need = demand_for_lines(conn, lines)?;
    let reserved = reserved_by_open_orders(conn, exclude_order)?;
    let ledger = inventory::ledger_quantities(conn)?;

    check_demand(&ledger, &reserved, &need, FulfillmentStage::Admission)
}

/// Checks that the ledger still covers everything open orders reserve. Run
/// after a recipe or import changes what open orders need, before committing.
pub fn ensure_reservations_covered(conn: &Connection) -> ServiceResult<()> {
    let reserved = reserved_by_open_orders(conn, None)?;
    let ledger = inventory::ledger_quantities(conn)?;

    check_demand(&ledger, &Demand::new(), &reserved, FulfillmentStage::Admission)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demand(pairs: &[(&str, f64)]) -> Demand {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_free_stock_subtracts_reservation() {
        let ledger = demand(&[("coffee_beans", 100.0)]);
        let reserved = demand(&[("coffee_beans", 50.0)]);

        assert!(check_demand(
            &ledger,
            &reserved,
            &demand(&[("coffee_beans", 50.0)]),
            FulfillmentStage::Admission
        )
        .is_ok());

        let err = check_demand(
            &ledger,
            &reserved,
            &demand(&[("coffee_beans", 60.0)]),
            FulfillmentStage::Admission,
        )
        .unwrap_err();

        match err {
            ServiceError::InsufficientQuantity {
                ingredient_id,
                required,
                available,
                stage,
            } => {
                assert_eq!(ingredient_id, "coffee_beans");
                assert!((required - 60.0).abs() < 1e-9);
                assert!((available - 50.0).abs() < 1e-9);
                assert_eq!(stage, FulfillmentStage::Admission);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_ledger_entry_is_ingredient_not_found() {
        let ledger = demand(&[("milk", 10.0)]);
        let err = check_demand(
            &ledger,
            &Demand::new(),
            &demand(&[("syrup", 1.0)]),
            FulfillmentStage::Admission,
        )
        .unwrap_err();

        assert!(matches!(err, ServiceError::IngredientNotFound(id) if id == "syrup"));
    }

    #[test]
    fn test_overcommitted_ledger_clamps_to_zero() {
        assert_eq!(free_quantity(10.0, 25.0), 0.0);
        assert!((free_quantity(10.0, 2.5) - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_float_noise_does_not_reject_exact_fit() {
        let ledger = demand(&[("milk", 0.3)]);
        let need = demand(&[("milk", 0.1 + 0.2)]);

        assert!(check_demand(&ledger, &Demand::new(), &need, FulfillmentStage::Closing).is_ok());
    }

    #[test]
    fn test_first_shortfall_reported_in_ingredient_order() {
        let ledger = demand(&[("a", 1.0), ("b", 1.0)]);
        let need = demand(&[("b", 5.0), ("a", 5.0)]);

        let err = check_demand(&ledger, &Demand::new(), &need, FulfillmentStage::Closing)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientQuantity { ingredient_id, .. } if ingredient_id == "a"
        ));
    }
}
