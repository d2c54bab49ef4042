//! Goods receipt and weighted-average cost tests

mod common;

use common::*;
use inventory_engine::error::AppError;
use inventory_engine::services::ReceiptInput;

fn receipt(quantity: &str, unit: &str, price: &str) -> ReceiptInput {
    ReceiptInput {
        branch_id: BRANCH,
        ingredient_id: COFFEE,
        quantity: dec(quantity),
        unit_code: unit.into(),
        unit_price: dec(price),
    }
}

#[tokio::test]
async fn test_first_receipt_creates_stock_and_cost() {
    let fx = Fixture::new();
    let outcome = fx
        .services
        .costs
        .record_receipt(receipt("1000", "g", "0.02"), at(2024, 6, 1, 8, 0))
        .await
        .unwrap();

    assert_eq!(outcome.stock.unit, "G");
    assert_eq!(outcome.stock.quantity, dec("1000"));
    assert_eq!(outcome.cost.avg_cost, dec("0.02"));
}

#[tokio::test]
async fn test_receipt_in_purchase_unit_is_converted() {
    let fx = Fixture::new();
    fx.metric_units().await;
    let costs = &fx.services.costs;
    costs
        .record_receipt(receipt("1000", "G", "0.02"), at(2024, 6, 1, 8, 0))
        .await
        .unwrap();

    // 1 KG at 30 per KG lands as 1000 G at 0.03 per G
    let outcome = costs
        .record_receipt(receipt("1", "KG", "30"), at(2024, 6, 2, 8, 0))
        .await
        .unwrap();
    assert_eq!(outcome.stock.unit, "G");
    assert_eq!(outcome.stock.quantity, dec("2000"));
    assert_eq!(outcome.cost.avg_cost, dec("0.025"));

    assert_eq!(costs.average_cost(key(COFFEE)).await.unwrap().avg_cost, dec("0.025"));
}

#[tokio::test]
async fn test_receipt_keeps_reservations() {
    let fx = Fixture::new();
    fx.stock(COFFEE, "100", "G").await;
    fx.services
        .ledger
        .reserve(key(COFFEE), dec("40"), at(2024, 6, 1, 9, 0))
        .await
        .unwrap();

    fx.services
        .costs
        .record_receipt(receipt("50", "G", "0.03"), at(2024, 6, 1, 10, 0))
        .await
        .unwrap();

    let stock = fx.current(COFFEE).await;
    assert_eq!(stock.quantity, dec("150"));
    assert_eq!(stock.reserved_quantity, dec("40"));
}

#[tokio::test]
async fn test_receipt_without_conversion_path() {
    let fx = Fixture::new();
    fx.stock(COFFEE, "100", "G").await;

    let err = fx
        .services
        .costs
        .record_receipt(receipt("2", "BAG", "300"), at(2024, 6, 1, 10, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConversionNotFound { .. }));
    assert_eq!(fx.current(COFFEE).await.quantity, dec("100"));
}

#[tokio::test]
async fn test_invalid_receipts_are_rejected() {
    let fx = Fixture::new();
    let costs = &fx.services.costs;
    let now = at(2024, 6, 1, 10, 0);

    for input in [
        receipt("0", "G", "1"),
        receipt("-5", "G", "1"),
        receipt("5", "G", "-1"),
        receipt("5", "", "1"),
        receipt("5", "G-1", "1"),
    ] {
        let err = costs.record_receipt(input, now).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }), "unexpected: {err:?}");
    }
    assert!(fx.services.ledger.find(key(COFFEE)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_average_cost_for_unknown_ingredient() {
    let fx = Fixture::new();
    let err = fx.services.costs.average_cost(key(COFFEE)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
