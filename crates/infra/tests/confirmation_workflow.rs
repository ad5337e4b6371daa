mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{Harness, date, purchase_line, usage_line};
use stockkeep_core::{DomainError, ReferenceKind, UserId};
use stockkeep_documents::{Document, DocumentStatus, PurchaseRecordPatch};
use stockkeep_infra::{InfraConfig, InventoryStore, PurchaseConfirmation, ServiceError, StoreTx};
use stockkeep_stock::{AdjustmentType, StockPatch};

#[tokio::test]
async fn purchase_confirm_creates_missing_stock_and_records_receipt() {
    let h = Harness::new();
    let key = h.pair();
    let doc = h
        .purchase(
            "PR-001",
            vec![
                purchase_line(key, dec!(5))
                    .with_unit_price(dec!(2.50))
                    .with_expiry(date(2026, 1, 31)),
            ],
        )
        .await;

    let confirmed = h
        .confirm_purchase
        .confirm(doc.header().id, Some(h.user), Some("received".into()))
        .await
        .unwrap();

    assert_eq!(confirmed.status(), DocumentStatus::Confirmed);
    assert_eq!(confirmed.header().confirmed_by, Some(h.user));
    assert!(confirmed.header().confirmed_at.is_some());
    assert_eq!(confirmed.header().remarks.as_deref(), Some("received"));

    let stock = h.find(key).await.expect("row opened on receipt");
    assert_eq!(stock.quantity(), dec!(5));
    assert_eq!(stock.latest_purchase_price(), Some(dec!(2.50)));
    assert_eq!(stock.latest_purchase_date(), Some(date(2025, 5, 1)));
    assert_eq!(stock.expiry_date(), Some(date(2026, 1, 31)));
    assert_eq!(stock.memo(), Some("received"));

    let trail = h.ledger.list_adjustments(stock.id_typed()).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].adjustment_type, AdjustmentType::Purchase);
    assert_eq!(trail[0].quantity_before, Decimal::ZERO);
    assert_eq!(trail[0].delta, dec!(5));
    assert_eq!(trail[0].actor, Some(h.user));
}

#[tokio::test]
async fn purchase_confirm_adds_to_an_existing_row() {
    let h = Harness::new();
    let key = h.pair();
    h.stock(key, dec!(10)).await;
    let doc = h.purchase("PR-002", vec![purchase_line(key, dec!(2.5))]).await;

    h.confirm_purchase
        .confirm(doc.header().id, None, Some("restock".into()))
        .await
        .unwrap();

    let stock = h.find(key).await.unwrap();
    assert_eq!(stock.quantity(), dec!(12.5));
    assert_eq!(stock.memo(), None, "memo is only seeded on rows the receipt opens");
}

#[tokio::test]
async fn usage_confirm_decrements_each_line() {
    let h = Harness::new();
    let a = h.pair();
    let b = h.pair();
    h.stock(a, dec!(10)).await;
    h.stock(b, dec!(4)).await;
    let doc = h
        .usage("US-001", vec![usage_line(a, dec!(3)), usage_line(b, dec!(4))])
        .await;

    let confirmed = h
        .confirm_usage
        .confirm(doc.header().id, Some(h.user), None)
        .await
        .unwrap();

    assert_eq!(confirmed.status(), DocumentStatus::Confirmed);
    assert_eq!(h.quantity(a).await, Some(dec!(7)));
    assert_eq!(h.quantity(b).await, Some(Decimal::ZERO));

    let stock = h.find(a).await.unwrap();
    let trail = h.ledger.list_adjustments(stock.id_typed()).await.unwrap();
    assert_eq!(trail[0].adjustment_type, AdjustmentType::Usage);
    assert_eq!(trail[0].delta, dec!(-3));
}

#[tokio::test]
async fn insufficient_usage_leaves_everything_untouched() {
    let h = Harness::new();
    let key = h.pair();
    h.stock(key, dec!(6)).await;
    let doc = h.usage("US-002", vec![usage_line(key, dec!(10))]).await;

    let err = h
        .confirm_usage
        .confirm(doc.header().id, Some(h.user), None)
        .await
        .unwrap_err();

    match err.as_domain() {
        Some(DomainError::InsufficientStock {
            available,
            requested,
            ..
        }) => {
            assert_eq!(*available, dec!(6));
            assert_eq!(*requested, dec!(10));
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert_eq!(h.quantity(key).await, Some(dec!(6)));
    let reloaded = h.usages.get(doc.header().id).await.unwrap();
    assert_eq!(reloaded.status(), DocumentStatus::Draft);
}

#[tokio::test]
async fn usage_of_a_missing_row_is_insufficient_stock() {
    let h = Harness::new();
    let key = h.pair();
    let doc = h.usage("US-003", vec![usage_line(key, dec!(1))]).await;

    let err = h
        .confirm_usage
        .confirm(doc.header().id, None, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_domain(),
        Some(DomainError::InsufficientStock { available, .. }) if available.is_zero()
    ));
    assert!(h.find(key).await.is_none());
}

#[tokio::test]
async fn a_failing_later_line_rolls_back_earlier_lines() {
    let h = Harness::new();
    let plenty = h.pair();
    let scarce = h.pair();
    h.stock(plenty, dec!(10)).await;
    h.stock(scarce, dec!(1)).await;
    let doc = h
        .usage(
            "US-004",
            vec![usage_line(plenty, dec!(4)), usage_line(scarce, dec!(2))],
        )
        .await;

    assert!(
        h.confirm_usage
            .confirm(doc.header().id, None, None)
            .await
            .is_err()
    );

    assert_eq!(h.quantity(plenty).await, Some(dec!(10)));
    assert_eq!(h.quantity(scarce).await, Some(dec!(1)));
    let stock = h.find(plenty).await.unwrap();
    assert_eq!(
        h.ledger.list_adjustments(stock.id_typed()).await.unwrap().len(),
        1,
        "only the opening adjustment remains"
    );
}

#[tokio::test]
async fn repeated_pair_lines_are_checked_against_the_running_quantity() {
    let h = Harness::new();
    let key = h.pair();
    h.stock(key, dec!(5)).await;
    let doc = h
        .usage("US-005", vec![usage_line(key, dec!(3)), usage_line(key, dec!(3))])
        .await;

    let err = h
        .confirm_usage
        .confirm(doc.header().id, None, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_domain(),
        Some(DomainError::InsufficientStock { available, .. }) if *available == dec!(2)
    ));
    assert_eq!(h.quantity(key).await, Some(dec!(5)));
}

#[tokio::test]
async fn confirming_twice_is_rejected() {
    let h = Harness::new();
    let key = h.pair();
    let doc = h.purchase("PR-003", vec![purchase_line(key, dec!(1))]).await;
    let id = doc.header().id;

    h.confirm_purchase.confirm(id, None, None).await.unwrap();
    let err = h.confirm_purchase.confirm(id, None, None).await.unwrap_err();

    assert!(matches!(err.as_domain(), Some(DomainError::InvalidState(_))));
    assert_eq!(h.quantity(key).await, Some(dec!(1)));
}

#[tokio::test]
async fn confirmed_documents_are_frozen() {
    let h = Harness::new();
    let key = h.pair();
    let doc = h.purchase("PR-004", vec![purchase_line(key, dec!(1))]).await;
    let id = doc.header().id;
    h.confirm_purchase.confirm(id, None, None).await.unwrap();

    let patch = PurchaseRecordPatch {
        store_name: Some("elsewhere".into()),
        ..Default::default()
    };
    let update = h.purchases.update(id, patch).await.unwrap_err();
    assert!(matches!(update.as_domain(), Some(DomainError::InvalidState(_))));

    let remove = h.purchases.remove(id).await.unwrap_err();
    assert!(matches!(remove.as_domain(), Some(DomainError::InvalidState(_))));

    let cancel = h.purchases.cancel(id).await.unwrap_err();
    assert!(matches!(cancel.as_domain(), Some(DomainError::InvalidState(_))));
}

#[tokio::test]
async fn cancelled_documents_cannot_be_confirmed() {
    let h = Harness::new();
    let key = h.pair();
    let doc = h.purchase("PR-005", vec![purchase_line(key, dec!(1))]).await;
    let id = doc.header().id;

    let cancelled = h.purchases.cancel(id).await.unwrap();
    assert_eq!(cancelled.status(), DocumentStatus::Cancelled);

    let err = h.confirm_purchase.confirm(id, None, None).await.unwrap_err();
    assert!(matches!(err.as_domain(), Some(DomainError::InvalidState(_))));
    assert!(h.find(key).await.is_none());
}

#[tokio::test]
async fn unknown_confirmer_is_rejected_before_any_change() {
    let h = Harness::new();
    let key = h.pair();
    let doc = h.purchase("PR-006", vec![purchase_line(key, dec!(1))]).await;
    let stranger = UserId::new();

    let err = h
        .confirm_purchase
        .confirm(doc.header().id, Some(stranger), None)
        .await
        .unwrap_err();

    assert_eq!(
        err.as_domain(),
        Some(&DomainError::unknown(ReferenceKind::User, stranger))
    );
    assert!(h.find(key).await.is_none());
    let reloaded = h.purchases.get(doc.header().id).await.unwrap();
    assert_eq!(reloaded.status(), DocumentStatus::Draft);
}

#[tokio::test]
async fn a_usage_id_is_not_found_as_a_purchase() {
    let h = Harness::new();
    let key = h.pair();
    let usage = h.usage("US-006", vec![usage_line(key, dec!(1))]).await;

    let err = h
        .confirm_purchase
        .confirm(usage.header().id, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err.as_domain(), Some(DomainError::NotFound(_))));
}

#[tokio::test]
async fn confirm_in_joins_the_callers_transaction() {
    let h = Harness::new();
    let key = h.pair();
    let doc = h.purchase("PR-007", vec![purchase_line(key, dec!(3))]).await;
    let id = doc.header().id;

    let mut tx = h.store.begin().await.unwrap();
    h.confirm_purchase
        .confirm_in(&mut tx, id, None, None)
        .await
        .unwrap();
    drop(tx);

    assert!(h.find(key).await.is_none());
    assert_eq!(
        h.purchases.get(id).await.unwrap().status(),
        DocumentStatus::Draft
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_confirmations_all_succeed() {
    let h = Arc::new(Harness::new());
    let mut keys = Vec::new();
    let mut ids = Vec::new();
    for n in 0..16 {
        let key = h.pair();
        let doc = h
            .purchase(&format!("PR-D{n:02}"), vec![purchase_line(key, dec!(2))])
            .await;
        keys.push(key);
        ids.push(doc.header().id);
    }

    let tasks: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.confirm_purchase.confirm(id, None, None).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    for key in keys {
        assert_eq!(h.quantity(key).await, Some(dec!(2)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_receipts_on_one_pair_sum_exactly() {
    let h = Arc::new(Harness::new());
    let key = h.pair();
    let mut ids = Vec::new();
    let mut expected = Decimal::ZERO;
    for n in 1..=20u32 {
        let quantity = Decimal::from(n);
        expected += quantity;
        let doc = h
            .purchase(&format!("PR-S{n:02}"), vec![purchase_line(key, quantity)])
            .await;
        ids.push(doc.header().id);
    }

    let tasks: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.confirm_purchase.confirm(id, None, None).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stock = h.find(key).await.expect("exactly one row for the pair");
    assert_eq!(stock.quantity(), expected);
    let trail = h.ledger.list_adjustments(stock.id_typed()).await.unwrap();
    assert_eq!(trail.len(), 20);
    assert_eq!(trail.iter().map(|a| a.delta).sum::<Decimal>(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_usages_never_overdraw() {
    let h = Arc::new(Harness::new());
    let key = h.pair();
    h.stock(key, dec!(10)).await;
    let mut ids = Vec::new();
    for n in 0..8 {
        let doc = h
            .usage(&format!("US-C{n}"), vec![usage_line(key, dec!(3))])
            .await;
        ids.push(doc.header().id);
    }

    let tasks: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.confirm_usage.confirm(id, None, None).await })
        })
        .collect();
    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(matches!(
                err.as_domain(),
                Some(DomainError::InsufficientStock { .. })
            )),
        }
    }

    assert_eq!(succeeded, 3);
    let stock = h.find(key).await.unwrap();
    assert_eq!(stock.quantity(), dec!(1));
    let trail = h.ledger.list_adjustments(stock.id_typed()).await.unwrap();
    assert_eq!(trail.iter().map(|a| a.delta).sum::<Decimal>(), dec!(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_confirmation_rolls_back() {
    let h = Harness::with_confirm_timeout(Duration::from_millis(100));
    let key = h.pair();
    h.stock(key, dec!(5)).await;
    let doc = h.usage("US-T1", vec![usage_line(key, dec!(2))]).await;
    let id = doc.header().id;

    let mut holder = h.store.begin().await.unwrap();
    holder.lock_stock_by_key(key).await.unwrap();

    let err = h.confirm_usage.confirm(id, None, None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Timeout(_)));
    drop(holder);

    assert_eq!(h.quantity(key).await, Some(dec!(5)));
    assert_eq!(h.usages.get(id).await.unwrap().status(), DocumentStatus::Draft);

    h.confirm_usage.confirm(id, None, None).await.unwrap();
    assert_eq!(h.quantity(key).await, Some(dec!(3)));
}

#[tokio::test]
async fn confirm_timeout_comes_from_config() {
    let h = Harness::new();
    let config = InfraConfig::from_lookup(|key| (key == "CONFIRM_TIMEOUT_MS").then(|| "250".to_string()));

    let workflow = PurchaseConfirmation::from_config(h.ledger.clone(), &config);
    assert_eq!(workflow.confirm_timeout(), Duration::from_millis(250));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_documents_in_opposite_line_order_all_commit() {
    let h = Arc::new(Harness::new());
    let a = h.pair();
    let b = h.pair();
    let mut ids = Vec::new();
    for n in 0..20 {
        let lines = if n % 2 == 0 {
            vec![purchase_line(a, dec!(1)), purchase_line(b, dec!(1))]
        } else {
            vec![purchase_line(b, dec!(1)), purchase_line(a, dec!(1))]
        };
        ids.push(h.purchase(&format!("PR-X{n:02}"), lines).await.header().id);
    }

    let tasks: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.confirm_purchase.confirm(id, None, None).await })
        })
        .collect();
    let all = tokio::time::timeout(Duration::from_secs(10), async {
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    })
    .await;
    assert!(all.is_ok(), "confirmations stalled on each other's locks");

    assert_eq!(h.quantity(a).await, Some(dec!(20)));
    assert_eq!(h.quantity(b).await, Some(dec!(20)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manual_update_waits_for_the_row_lock() {
    let h = Arc::new(Harness::new());
    let key = h.pair();
    let id = h.stock(key, dec!(5)).await.id_typed();

    let mut holder = h.store.begin().await.unwrap();
    holder.lock_stock_by_key(key).await.unwrap();

    let update = {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            let patch = StockPatch {
                quantity: Some(dec!(8)),
                ..Default::default()
            };
            h.ledger.update_stock(id, patch).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!update.is_finished());

    drop(holder);
    assert_eq!(update.await.unwrap().unwrap().quantity(), dec!(8));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn manual_updates_and_confirms_on_one_row_keep_the_trail_exact() {
    let h = Arc::new(Harness::new());
    let key = h.pair();
    let id = h.stock(key, dec!(100)).await.id_typed();
    let mut ids = Vec::new();
    for n in 0..10 {
        let doc = h
            .purchase(&format!("PR-M{n}"), vec![purchase_line(key, dec!(1))])
            .await;
        ids.push(doc.header().id);
    }

    let mut tasks = Vec::new();
    for (n, doc_id) in ids.into_iter().enumerate() {
        let confirm = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            confirm
                .confirm_purchase
                .confirm(doc_id, None, None)
                .await
                .map(|_| ())
        }));
        let update = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            let patch = StockPatch {
                quantity: Some(Decimal::from(50 + n as u32)),
                ..Default::default()
            };
            update.ledger.update_stock(id, patch).await.map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stock = h.find(key).await.unwrap();
    let trail = h.ledger.list_adjustments(id).await.unwrap();
    assert_eq!(trail.iter().map(|a| a.delta).sum::<Decimal>(), stock.quantity());
    for pair in trail.windows(2) {
        assert_eq!(pair[0].quantity_before, pair[1].quantity_after);
    }
}
