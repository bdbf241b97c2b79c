mod common;

use assert_matches::assert_matches;
use checkout_engine::{
    entities::order::{CustomerType, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::Event,
    entities::order_item::Customization,
    services::inventory::StockAdjustment,
};
use common::{item, order_request, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn retail_order_under_threshold_pays_flat_shipping() {
    let app = TestApp::new().await;

    let receipt = app
        .checkout(order_request(
            CustomerType::Retail,
            PaymentMethod::Gateway,
            vec![item("jersey-home", "M", 2, dec!(85000))],
        ))
        .await;

    assert_eq!(receipt.subtotal, dec!(170000));
    assert_eq!(receipt.discount_amount, dec!(0));
    assert_eq!(receipt.shipping_cost, dec!(15000));
    assert_eq!(receipt.total_amount, dec!(185000));
    assert!(receipt.pickup_token.is_none());
    assert!(receipt.order_number.starts_with("ORD-"));

    let stored = app.services().orders.get_order(receipt.order_id).await.unwrap();
    assert_eq!(stored.order.payment_status, PaymentStatus::Pending);
    assert_eq!(stored.order.order_status, OrderStatus::Pending);
    assert_eq!(stored.items.len(), 1);
    assert_eq!(stored.items[0].line_total, dec!(170000));
}

#[tokio::test]
async fn retail_order_at_threshold_ships_free_and_wholesale_never_does() {
    let app = TestApp::new().await;

    let retail = app
        .checkout(order_request(
            CustomerType::Retail,
            PaymentMethod::Gateway,
            vec![
                item("jersey-home", "M", 4, dec!(85000)),
                item("jersey-away", "L", 2, dec!(85000)),
            ],
        ))
        .await;
    assert_eq!(retail.shipping_cost, dec!(0));
    assert_eq!(retail.total_amount, dec!(510000));

    let wholesale = app
        .checkout(order_request(
            CustomerType::Wholesale,
            PaymentMethod::BankTransfer,
            vec![item("jersey-home", "S", 30, dec!(60000))],
        ))
        .await;
    assert_eq!(wholesale.shipping_cost, dec!(15000));
}

#[tokio::test]
async fn explicit_shipping_cost_is_honoured_and_client_totals_are_ignored() {
    let app = TestApp::new().await;

    let mut request = order_request(
        CustomerType::Retail,
        PaymentMethod::Gateway,
        vec![item("jersey-home", "M", 1, dec!(85000))],
    );
    request.shipping_cost = Some(dec!(9000));
    request.subtotal = Some(dec!(1));
    request.total = Some(dec!(1));

    let receipt = app.checkout(request).await;
    assert_eq!(receipt.shipping_cost, dec!(9000));
    assert_eq!(receipt.subtotal, dec!(85000));
    assert_eq!(receipt.total_amount, dec!(94000));
}

#[tokio::test]
async fn checkout_decrements_stock_without_an_availability_check() {
    let app = TestApp::new().await;
    let inventory = &app.services().inventory;

    inventory
        .adjust(&[StockAdjustment {
            product_id: "jersey-home".into(),
            variant: "local".into(),
            size: "M".into(),
            delta: 3,
        }])
        .await
        .unwrap();

    app.checkout(order_request(
        CustomerType::Retail,
        PaymentMethod::Gateway,
        vec![
            item("jersey-home", "M", 2, dec!(85000)),
            item("jersey-home", "XL", 1, dec!(85000)),
        ],
    ))
    .await;
    app.checkout(order_request(
        CustomerType::Retail,
        PaymentMethod::Gateway,
        vec![item("jersey-home", "M", 2, dec!(85000))],
    ))
    .await;

    assert_eq!(inventory.stock_level("jersey-home", "local", "M").await.unwrap(), -1);
    assert_eq!(inventory.stock_level("jersey-home", "local", "XL").await.unwrap(), -1);
}

#[tokio::test]
async fn cash_on_delivery_orders_get_a_pickup_token_and_events_follow_commit() {
    let app = TestApp::new().await;

    let receipt = app
        .checkout(order_request(
            CustomerType::Retail,
            PaymentMethod::CashOnDelivery,
            vec![item("jersey-home", "M", 1, dec!(85000))],
        ))
        .await;

    let token = receipt.pickup_token.clone().expect("COD order has a token");
    let re = regex::Regex::new(r"^COD-[A-Z0-9]{8}$").unwrap();
    assert!(re.is_match(&token), "{}", token);

    let events = app.drain_events();
    assert_matches!(&events[0], Event::OrderCreated { order_id, .. } if *order_id == receipt.order_id);
    assert_matches!(
        &events[1],
        Event::PickupTokenIssued { token: sent, email, .. } if *sent == token && email == "cliente@example.co"
    );
}

#[tokio::test]
async fn invalid_requests_write_nothing() {
    let app = TestApp::new().await;

    let empty = order_request(CustomerType::Retail, PaymentMethod::Gateway, vec![]);
    assert_matches!(
        app.services().orders.create_order(empty).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut zero_quantity = order_request(
        CustomerType::Retail,
        PaymentMethod::Gateway,
        vec![item("jersey-home", "M", 0, dec!(85000))],
    );
    zero_quantity.notes = Some("should not persist".into());
    assert_matches!(
        app.services().orders.create_order(zero_quantity).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut bad_email = order_request(
        CustomerType::Retail,
        PaymentMethod::Gateway,
        vec![item("jersey-home", "M", 1, dec!(85000))],
    );
    bad_email.shipping_address.email = "not-an-email".into();
    assert_matches!(
        app.services().orders.create_order(bad_email).await,
        Err(ServiceError::ValidationError(_))
    );

    let (orders, total) = app
        .services()
        .orders
        .list_orders(Default::default(), 1, 20)
        .await
        .unwrap();
    assert!(orders.is_empty());
    assert_eq!(total, 0);
    assert!(app.drain_events().is_empty());
    assert_eq!(
        app.services()
            .inventory
            .stock_level("jersey-home", "local", "M")
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn oversized_prices_are_validation_errors() {
    let app = TestApp::new().await;
    let orders = &app.services().orders;

    let overflowing = order_request(
        CustomerType::Retail,
        PaymentMethod::Gateway,
        vec![item("jersey-home", "M", 2, Decimal::MAX)],
    );
    assert_matches!(
        orders.create_order(overflowing).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut surcharge = item("jersey-home", "M", 1, dec!(85000));
    surcharge.customizations.push(Customization {
        name: "nombre".into(),
        value: Some("JAMES".into()),
        price_delta: Decimal::MAX,
    });
    let with_surcharge = order_request(CustomerType::Retail, PaymentMethod::Gateway, vec![surcharge]);
    assert_matches!(
        orders.create_order(with_surcharge).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut shipping = order_request(
        CustomerType::Retail,
        PaymentMethod::Gateway,
        vec![item("jersey-home", "M", 1, dec!(85000))],
    );
    shipping.shipping_cost = Some(Decimal::MAX);
    assert_matches!(
        orders.create_order(shipping).await,
        Err(ServiceError::ValidationError(_))
    );

    let (stored, total) = orders.list_orders(Default::default(), 1, 20).await.unwrap();
    assert!(stored.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn status_updates_follow_the_mapping_table() {
    let app = TestApp::new().await;
    let receipt = app
        .checkout(order_request(
            CustomerType::Retail,
            PaymentMethod::BankTransfer,
            vec![item("jersey-home", "M", 1, dec!(85000))],
        ))
        .await;
    let orders = &app.services().orders;

    let paid = orders.update_status(receipt.order_id, "paid").await.unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.order_status, OrderStatus::Confirmed);

    let shipped = orders.update_status(receipt.order_id, "shipped").await.unwrap();
    assert_eq!(shipped.payment_status, PaymentStatus::Paid);
    assert_eq!(shipped.order_status, OrderStatus::Shipped);

    let delivered = orders.update_status(receipt.order_id, "Delivered").await.unwrap();
    assert_eq!(delivered.payment_status, PaymentStatus::Paid);
    assert_eq!(delivered.order_status, OrderStatus::Delivered);

    assert_matches!(
        orders.update_status(receipt.order_id, "lost").await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        orders.update_status(uuid::Uuid::new_v4(), "paid").await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn orders_list_newest_first_with_filters() {
    let app = TestApp::new().await;
    let first = app
        .checkout(order_request(
            CustomerType::Retail,
            PaymentMethod::Gateway,
            vec![item("jersey-home", "M", 1, dec!(85000))],
        ))
        .await;
    let second = app
        .checkout(order_request(
            CustomerType::Retail,
            PaymentMethod::Gateway,
            vec![item("jersey-away", "L", 1, dec!(85000))],
        ))
        .await;
    app.services()
        .orders
        .update_status(first.order_id, "cancelled")
        .await
        .unwrap();

    let orders = &app.services().orders;
    let (all, total) = orders.list_orders(Default::default(), 1, 20).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(all[0].id, second.order_id);

    let (cancelled, total) = orders
        .list_orders(
            checkout_engine::services::orders::OrderFilter {
                status: Some(OrderStatus::Cancelled),
                payment_status: None,
            },
            1,
            20,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(cancelled[0].id, first.order_id);
}

#[tokio::test]
async fn purge_removes_order_and_lines() {
    let app = TestApp::new().await;
    let receipt = app
        .checkout(order_request(
            CustomerType::Retail,
            PaymentMethod::Gateway,
            vec![item("jersey-home", "M", 1, dec!(85000))],
        ))
        .await;

    let orders = &app.services().orders;
    orders.purge_order(receipt.order_id).await.unwrap();
    assert_matches!(orders.get_order(receipt.order_id).await, Err(ServiceError::NotFound(_)));
    assert_matches!(orders.purge_order(receipt.order_id).await, Err(ServiceError::NotFound(_)));
}
