mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use checkout_engine::{
    entities::discount_code::{self, DiscountType, Entity as DiscountCodeEntity, UsageClass},
    entities::order::{CustomerType, PaymentMethod},
    errors::{DiscountRejection, ServiceError},
    services::discounts::{check_code, DiscountService, NewDiscountCode},
};
use common::{address, item, order_request, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};

fn new_code(code: &str, discount_type: DiscountType, value: Decimal) -> NewDiscountCode {
    NewDiscountCode {
        code: code.to_string(),
        discount_type,
        value,
        usage_class: UsageClass::Normal,
        max_uses: None,
        valid_from: None,
        valid_until: None,
        active: true,
    }
}

fn cart_with_code(code: &str) -> checkout_engine::services::orders::CreateOrderRequest {
    let mut request = order_request(
        CustomerType::Retail,
        PaymentMethod::Gateway,
        vec![item("jersey-home", "M", 2, dec!(85000))],
    );
    request.discount_code = Some(code.to_string());
    request
}

#[tokio::test]
async fn percentage_code_is_applied_before_shipping() {
    let app = TestApp::new().await;
    app.services()
        .discounts
        .create_code(new_code("hincha10", DiscountType::Percentage, dec!(10)))
        .await
        .unwrap();

    let receipt = app.checkout(cart_with_code("  Hincha10 ")).await;
    assert_eq!(receipt.subtotal, dec!(170000));
    assert_eq!(receipt.discount_amount, dec!(17000));
    assert_eq!(receipt.total_amount, dec!(168000));

    let stored = app.services().orders.get_order(receipt.order_id).await.unwrap();
    assert_eq!(stored.order.discount_code.as_deref(), Some("HINCHA10"));
}

#[tokio::test]
async fn fixed_code_larger_than_the_order_is_rejected_and_not_consumed() {
    let app = TestApp::new().await;
    let code = app
        .services()
        .discounts
        .create_code(new_code("REGALO", DiscountType::Fixed, dec!(500000)))
        .await
        .unwrap();

    assert_matches!(
        app.services().orders.create_order(cart_with_code("REGALO")).await,
        Err(ServiceError::ValidationError(_))
    );

    let after = app.services().discounts.get_code(code.id).await.unwrap();
    assert_eq!(after.current_uses, 0);
    assert!(app.services().discounts.redemptions(code.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn normal_code_is_once_per_customer() {
    let app = TestApp::new().await;
    app.services()
        .discounts
        .create_code(new_code("PRIMERA", DiscountType::Fixed, dec!(20000)))
        .await
        .unwrap();

    app.checkout(cart_with_code("PRIMERA")).await;

    // same person, formatting differences only
    let mut again = cart_with_code("primera");
    again.shipping_address = address("  LAURA GÓMEZ ", "(300) 123-4567");
    again.shipping_address.address = " carrera 43a # 1-50\t".into();
    assert_matches!(
        app.services().orders.create_order(again).await,
        Err(ServiceError::Discount(DiscountRejection::AlreadyUsed))
    );

    let mut someone_else = cart_with_code("PRIMERA");
    someone_else.shipping_address = address("Carlos Ruiz", "310 555 0000");
    let receipt = app.checkout(someone_else).await;
    assert_eq!(receipt.discount_amount, dec!(20000));
}

#[tokio::test]
async fn authorized_code_can_be_reused_by_the_same_customer() {
    let app = TestApp::new().await;
    let mut request = new_code("MAYORISTA", DiscountType::Percentage, dec!(15));
    request.usage_class = UsageClass::Authorized;
    let code = app.services().discounts.create_code(request).await.unwrap();

    app.checkout(cart_with_code("MAYORISTA")).await;
    app.checkout(cart_with_code("MAYORISTA")).await;

    let stored = app.services().discounts.get_code(code.id).await.unwrap();
    assert_eq!(stored.current_uses, 2);
    let history = app.services().discounts.redemptions(code.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.dedupe_key.is_none()));
}

#[tokio::test]
async fn rejections_come_in_order() {
    let app = TestApp::new().await;
    let discounts = &app.services().discounts;
    let now = Utc::now();

    assert_matches!(
        discounts.validate("NOEXISTE", now).await,
        Err(ServiceError::Discount(DiscountRejection::NotFound))
    );

    let mut expired = new_code("VENCIDO", DiscountType::Fixed, dec!(1000));
    expired.valid_from = Some(now - Duration::days(10));
    expired.valid_until = Some(now - Duration::days(1));
    expired.max_uses = Some(1);
    discounts.create_code(expired).await.unwrap();
    assert_matches!(
        discounts.validate("vencido", now).await,
        Err(ServiceError::Discount(DiscountRejection::Expired))
    );

    let mut future = new_code("PRONTO", DiscountType::Fixed, dec!(1000));
    future.valid_from = Some(now + Duration::days(1));
    discounts.create_code(future).await.unwrap();
    assert_matches!(
        discounts.validate("PRONTO", now).await,
        Err(ServiceError::Discount(DiscountRejection::NotFound))
    );

    let mut single = new_code("UNAVEZ", DiscountType::Fixed, dec!(1000));
    single.max_uses = Some(1);
    single.usage_class = UsageClass::Authorized;
    discounts.create_code(single).await.unwrap();
    app.checkout(cart_with_code("UNAVEZ")).await;
    assert_matches!(
        discounts.validate("UNAVEZ", Utc::now()).await,
        Err(ServiceError::Discount(DiscountRejection::Exhausted))
    );

    let quote = discounts
        .create_code(new_code("VALE", DiscountType::Percentage, dec!(5)))
        .await
        .unwrap();
    let valid = discounts.validate("vale", Utc::now()).await.unwrap();
    assert_eq!(valid.code, quote.code);
    assert_eq!(valid.amount(dec!(200000)), dec!(10000));
}

#[tokio::test]
async fn max_uses_caps_successful_checkouts() {
    let app = Arc::new(TestApp::new().await);
    let mut request = new_code("LIMITADO", DiscountType::Fixed, dec!(5000));
    request.max_uses = Some(3);
    request.usage_class = UsageClass::Authorized;
    let code = app.services().discounts.create_code(request).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        tasks.push(tokio::spawn(async move {
            app.services()
                .orders
                .create_order(cart_with_code("LIMITADO"))
                .await
        }));
    }

    let mut applied = 0;
    let mut exhausted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => applied += 1,
            Err(ServiceError::Discount(DiscountRejection::Exhausted)) => exhausted += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(applied, 3);
    assert_eq!(exhausted, 5);

    let stored = app.services().discounts.get_code(code.id).await.unwrap();
    assert_eq!(stored.current_uses, 3);
}

#[tokio::test]
async fn code_administration() {
    let app = TestApp::new().await;
    let discounts = &app.services().discounts;

    assert_matches!(
        discounts
            .create_code(new_code("MAL", DiscountType::Percentage, dec!(150)))
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let unused = discounts
        .create_code(new_code("SINUSO", DiscountType::Fixed, dec!(1000)))
        .await
        .unwrap();
    assert_matches!(
        discounts
            .create_code(new_code("sinuso", DiscountType::Fixed, dec!(1000)))
            .await,
        Err(ServiceError::Conflict(_))
    );
    assert!(discounts.delete_code(unused.id).await.unwrap());
    assert_matches!(discounts.get_code(unused.id).await, Err(ServiceError::NotFound(_)));

    let used = discounts
        .create_code(new_code("USADO", DiscountType::Fixed, dec!(1000)))
        .await
        .unwrap();
    app.checkout(cart_with_code("USADO")).await;
    assert!(!discounts.delete_code(used.id).await.unwrap());
    let kept = discounts.get_code(used.id).await.unwrap();
    assert!(!kept.active);
    assert_matches!(
        discounts.validate("USADO", Utc::now()).await,
        Err(ServiceError::Discount(DiscountRejection::NotFound))
    );
}

#[tokio::test]
async fn stale_read_cannot_claim_past_max_uses() {
    let app = TestApp::new().await;
    let db = &*app.state.db;
    let mut request = new_code("ULTIMO", DiscountType::Fixed, dec!(5000));
    request.max_uses = Some(2);
    request.usage_class = UsageClass::Authorized;
    let code = app.services().discounts.create_code(request).await.unwrap();

    // read while uses are still free
    let stale = app.services().discounts.get_code(code.id).await.unwrap();
    assert!(check_code(Some(&stale), Utc::now()).is_ok());

    // a competing checkout takes the remaining uses before the increment runs
    DiscountCodeEntity::update_many()
        .col_expr(discount_code::Column::CurrentUses, Expr::value(2))
        .filter(discount_code::Column::Id.eq(code.id))
        .exec(db)
        .await
        .unwrap();

    assert_matches!(
        DiscountService::claim_use(db, &stale, Utc::now()).await,
        Err(ServiceError::Discount(DiscountRejection::Exhausted))
    );
    let stored = app.services().discounts.get_code(code.id).await.unwrap();
    assert_eq!(stored.current_uses, 2);

    DiscountCodeEntity::update_many()
        .col_expr(discount_code::Column::CurrentUses, Expr::value(1))
        .filter(discount_code::Column::Id.eq(code.id))
        .exec(db)
        .await
        .unwrap();
    DiscountService::claim_use(db, &stale, Utc::now()).await.unwrap();
    let stored = app.services().discounts.get_code(code.id).await.unwrap();
    assert_eq!(stored.current_uses, 2);
}
