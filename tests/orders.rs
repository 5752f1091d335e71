mod common;

use common::*;
use orderease::auth::Principal;
use orderease::domain::flow::{OrderStatusFlow, StatusAction, StatusState};
use orderease::domain::value_objects::{Money, Page};
use orderease::services::{OrderSearch, OrderUpdate};
use orderease::AppError;

fn page() -> Page {
    Page::new(1, 10).unwrap()
}

#[tokio::test]
async fn happy_path_order_takes_stock_and_logs_pending() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 5)).await.product;
    let owner = owner_of(&shop);

    let order = app
        .services()
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 3)]))
        .await
        .unwrap();

    assert_ne!(order.id, 0);
    assert_eq!(order.status, 1);
    assert_eq!(order.total_price, Money::from_minor(3000));
    assert_eq!(stock_of(&app, product.id).await, 2);

    let history = app.services().orders.order_history(&owner, order.id, shop.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!((history[0].old_status, history[0].new_status), (0, 1));

    let fetched = app.services().orders.get_order(&owner, order.id, shop.id).await.unwrap();
    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.items[0].product_name_snapshot, "tea");
    assert_eq!(fetched.items[0].unit_price_snapshot, Money::from_minor(1000));
    assert!(fetched.is_consistent());
}

#[tokio::test]
async fn options_add_to_the_unit_price_and_are_snapshotted() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let mut s = spec("coffee", 1000, 10);
    s.option_categories = vec![category("size", false, false, &[("large", 250), ("small", 0)])];
    let detail = create_product(&app, &shop, s).await;
    let size = &detail.option_categories[0];
    let large = size.options.iter().find(|o| o.name == "large").unwrap();
    let owner = owner_of(&shop);

    let order = app
        .services()
        .orders
        .create_order(
            &owner,
            draft(7, shop.id, vec![item_with(detail.product.id, 2, &[(size.id, large.id)])]),
        )
        .await
        .unwrap();

    assert_eq!(order.total_price, Money::from_minor(2500));
    let opt = &order.items[0].options[0];
    assert_eq!(opt.option_name_snapshot, "large");
    assert_eq!(opt.category_name_snapshot, "size");
    assert_eq!(opt.price_adjustment_snapshot, Money::from_minor(250));
}

#[tokio::test]
async fn product_edits_do_not_touch_snapshots() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 5)).await.product;
    let owner = owner_of(&shop);
    let order = app
        .services()
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 1)]))
        .await
        .unwrap();

    let mut renamed = spec("green tea", 4000, 4);
    renamed.description = "changed".into();
    app.services().catalog.update_product(&owner, product.id, renamed).await.unwrap();

    let fetched = app.services().orders.get_order(&owner, order.id, shop.id).await.unwrap();
    assert_eq!(fetched.items[0].product_name_snapshot, "tea");
    assert_eq!(fetched.items[0].product_description_snapshot, "tea description");
    assert_eq!(fetched.items[0].unit_price_snapshot, Money::from_minor(1000));
    assert_eq!(fetched.total_price, Money::from_minor(1000));
}

#[tokio::test]
async fn quantity_boundaries() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 5)).await.product;
    let owner = owner_of(&shop);
    let orders = &app.services().orders;

    let zero = orders.create_order(&owner, draft(7, shop.id, vec![item(product.id, 0)])).await;
    assert!(matches!(zero, Err(AppError::InvalidInput(_))));

    let over = orders.create_order(&owner, draft(7, shop.id, vec![item(product.id, 6)])).await;
    assert!(matches!(over, Err(AppError::InsufficientStock { product_id }) if product_id == product.id));
    assert_eq!(stock_of(&app, product.id).await, 5);

    orders.create_order(&owner, draft(7, shop.id, vec![item(product.id, 5)])).await.unwrap();
    assert_eq!(stock_of(&app, product.id).await, 0);
}

#[tokio::test]
async fn repeated_lines_of_one_product_share_its_stock() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 5)).await.product;
    let owner = owner_of(&shop);

    let result = app
        .services()
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 3), item(product.id, 3)]))
        .await;
    assert!(matches!(result, Err(AppError::InsufficientStock { .. })));
    assert_eq!(stock_of(&app, product.id).await, 5);
}

#[tokio::test]
async fn structural_validation() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let owner = owner_of(&shop);
    let orders = &app.services().orders;

    assert!(matches!(
        orders.create_order(&owner, draft(0, shop.id, vec![item(1, 1)])).await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        orders.create_order(&owner, draft(7, shop.id, vec![])).await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        orders.create_order(&owner, draft(7, shop.id, vec![item(0, 1)])).await,
        Err(AppError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn option_rules() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let mut s = spec("coffee", 1000, 50);
    s.option_categories = vec![
        category("size", true, false, &[("large", 250), ("small", 0)]),
        category("extras", false, true, &[("milk", 50), ("sugar", 0)]),
    ];
    let coffee = create_product(&app, &shop, s).await;
    let mut other = spec("cake", 500, 50);
    other.option_categories = vec![category("topping", false, false, &[("cream", 100)])];
    let cake = create_product(&app, &shop, other).await;

    let size = &coffee.option_categories[0];
    let extras = &coffee.option_categories[1];
    let topping = &cake.option_categories[0];
    let owner = owner_of(&shop);
    let orders = &app.services().orders;
    let create = |options: Vec<(i64, i64)>| {
        orders.create_order(&owner, draft(7, shop.id, vec![item_with(coffee.product.id, 1, &options)]))
    };

    // required category left empty
    assert!(matches!(create(vec![]).await, Err(AppError::InvalidOption(_))));
    // two choices in a single-choice category
    assert!(matches!(
        create(vec![(size.id, size.options[0].id), (size.id, size.options[1].id)]).await,
        Err(AppError::InvalidOption(_))
    ));
    // option from another product's category
    assert!(matches!(
        create(vec![(size.id, size.options[0].id), (topping.id, topping.options[0].id)]).await,
        Err(AppError::InvalidOption(_))
    ));
    // option paired with the wrong category
    assert!(matches!(
        create(vec![(size.id, extras.options[0].id)]).await,
        Err(AppError::InvalidOption(_))
    ));
    // unknown option
    assert!(matches!(create(vec![(size.id, 42)]).await, Err(AppError::InvalidOption(_))));

    let ok = create(vec![
        (size.id, size.options[0].id),
        (extras.id, extras.options[0].id),
        (extras.id, extras.options[1].id),
    ])
    .await
    .unwrap();
    assert_eq!(ok.total_price, Money::from_minor(1000 + 250 + 50));
    assert_eq!(stock_of(&app, coffee.product.id).await, 49);
}

#[tokio::test]
async fn products_of_other_shops_are_rejected() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let other = create_shop(&app, "Market", "market").await;
    let foreign = create_product(&app, &other, spec("bread", 300, 5)).await.product;

    let result = app
        .services()
        .orders
        .create_order(&owner_of(&shop), draft(7, shop.id, vec![item(foreign.id, 1)]))
        .await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));
    assert_eq!(stock_of(&app, foreign.id).await, 5);
}

#[tokio::test]
async fn expired_shop_cannot_take_orders() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 5)).await.product;
    app.clock.set(shop.valid_until);

    let result = app
        .services()
        .orders
        .create_order(&app.operator, draft(7, shop.id, vec![item(product.id, 1)]))
        .await;
    assert!(matches!(result, Err(AppError::ShopExpired)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_never_oversell() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 5)).await.product;
    let owner = owner_of(&shop);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let services = app.state.services.clone();
        let owner = owner.clone();
        let d = draft(7, shop.id, vec![item(product.id, 5)]);
        handles.push(tokio::spawn(async move { services.orders.create_order(&owner, d).await }));
    }

    let mut ok = 0;
    let mut short = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(AppError::InsufficientStock { .. }) => short += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, short), (1, 1));
    assert_eq!(stock_of(&app, product.id).await, 0);
}

#[tokio::test]
async fn default_flow_walkthrough() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 5)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();
    let flow = services.shops.flow(shop.id).await.unwrap();
    let order = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 1)]))
        .await
        .unwrap();
    let toggle = |next| services.orders.toggle_status(&owner, order.id, shop.id, next, &flow);

    assert_eq!(toggle(2).await.unwrap().status, 2);
    assert!(matches!(toggle(10).await, Err(AppError::StatusNotAllowed { from: 2, to: 10 })));
    assert!(matches!(toggle(2).await, Err(AppError::StatusNotAllowed { .. })));
    assert_eq!(toggle(4).await.unwrap().status, 4);
    assert_eq!(toggle(10).await.unwrap().status, 10);
    assert!(matches!(toggle(4).await, Err(AppError::StatusNotAllowed { .. })));

    let history = services.orders.order_history(&owner, order.id, shop.id).await.unwrap();
    let path: Vec<(i32, i32)> = history.iter().map(|l| (l.old_status, l.new_status)).collect();
    assert_eq!(path, vec![(0, 1), (1, 2), (2, 4), (4, 10)]);
    assert_eq!(stock_of(&app, product.id).await, 4);
}

#[tokio::test]
async fn rejecting_and_canceling_restore_stock() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 5)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();
    let flow = services.shops.flow(shop.id).await.unwrap();

    let rejected = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 2)]))
        .await
        .unwrap();
    assert_eq!(stock_of(&app, product.id).await, 3);
    services.orders.toggle_status(&owner, rejected.id, shop.id, 3, &flow).await.unwrap();
    assert_eq!(stock_of(&app, product.id).await, 5);

    let canceled = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 4)]))
        .await
        .unwrap();
    services.orders.toggle_status(&owner, canceled.id, shop.id, 2, &flow).await.unwrap();
    assert_eq!(stock_of(&app, product.id).await, 1);
    services.orders.toggle_status(&owner, canceled.id, shop.id, -1, &flow).await.unwrap();
    assert_eq!(stock_of(&app, product.id).await, 5);
}

#[tokio::test]
async fn update_moves_stock_by_the_difference() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let tea = create_product(&app, &shop, spec("tea", 1000, 10)).await.product;
    let cake = create_product(&app, &shop, spec("cake", 500, 10)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();
    let flow = services.shops.flow(shop.id).await.unwrap();

    let order = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(tea.id, 4)]))
        .await
        .unwrap();
    assert_eq!(stock_of(&app, tea.id).await, 6);

    let update = OrderUpdate { remark: Some("no sugar".into()), items: Some(vec![item(tea.id, 1), item(cake.id, 2)]) };
    let updated = services.orders.update_order(&owner, order.id, shop.id, update, &flow).await.unwrap();
    assert_eq!(updated.remark, "no sugar");
    assert_eq!(updated.total_price, Money::from_minor(1000 + 2 * 500));
    assert!(updated.is_consistent());
    assert_eq!(stock_of(&app, tea.id).await, 9);
    assert_eq!(stock_of(&app, cake.id).await, 8);

    let too_many = OrderUpdate { remark: None, items: Some(vec![item(cake.id, 11)]) };
    assert!(matches!(
        services.orders.update_order(&owner, order.id, shop.id, too_many, &flow).await,
        Err(AppError::InsufficientStock { .. })
    ));
    assert_eq!(stock_of(&app, tea.id).await, 9);
    assert_eq!(stock_of(&app, cake.id).await, 8);
}

#[tokio::test]
async fn final_orders_are_immutable() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 10)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();
    let flow = services.shops.flow(shop.id).await.unwrap();

    let order = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 1)]))
        .await
        .unwrap();
    services.orders.toggle_status(&owner, order.id, shop.id, 3, &flow).await.unwrap();

    let update = OrderUpdate { remark: Some("late".into()), items: None };
    assert!(matches!(
        services.orders.update_order(&owner, order.id, shop.id, update, &flow).await,
        Err(AppError::OrderImmutable)
    ));
}

#[tokio::test]
async fn delete_restores_held_stock_once() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 10)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();

    let order = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 3)]))
        .await
        .unwrap();
    services.orders.delete_order(&owner, order.id, shop.id).await.unwrap();
    assert_eq!(stock_of(&app, product.id).await, 10);

    assert!(matches!(
        services.orders.delete_order(&owner, order.id, shop.id).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(stock_of(&app, product.id).await, 10);
}

#[tokio::test]
async fn rejected_orders_delete_without_double_restore() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 10)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();
    let flow = services.shops.flow(shop.id).await.unwrap();

    let order = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 3)]))
        .await
        .unwrap();
    services.orders.toggle_status(&owner, order.id, shop.id, 3, &flow).await.unwrap();
    services.orders.delete_order(&owner, order.id, shop.id).await.unwrap();
    assert_eq!(stock_of(&app, product.id).await, 10);
}

#[tokio::test]
async fn complete_and_canceled_orders_cannot_be_deleted() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 10)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();
    let flow = services.shops.flow(shop.id).await.unwrap();

    let order = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 1)]))
        .await
        .unwrap();
    for next in [2, -1] {
        services.orders.toggle_status(&owner, order.id, shop.id, next, &flow).await.unwrap();
    }
    assert!(matches!(
        services.orders.delete_order(&owner, order.id, shop.id).await,
        Err(AppError::OrderImmutable)
    ));
}

#[tokio::test]
async fn listing_search_and_unfinished() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 100, 100)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();
    let flow = services.shops.flow(shop.id).await.unwrap();

    let mut ids = Vec::new();
    for user in [7, 7, 8] {
        let order = services
            .orders
            .create_order(&owner, draft(user, shop.id, vec![item(product.id, 1)]))
            .await
            .unwrap();
        ids.push(order.id);
        app.clock.advance(chrono::Duration::minutes(1));
    }
    services.orders.toggle_status(&owner, ids[0], shop.id, 3, &flow).await.unwrap();

    let all = services.orders.list_orders_by_shop(&owner, shop.id, page()).await.unwrap();
    assert_eq!(all.total, 3);
    let listed: Vec<i64> = all.data.iter().map(|o| o.id).collect();
    assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

    let second = services
        .orders
        .list_orders_by_shop(&owner, shop.id, Page::new(2, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(second.total, 3);
    assert_eq!(second.data.len(), 1);

    let by_user = services.orders.list_orders_by_user(&owner, 7, shop.id, page()).await.unwrap();
    assert_eq!(by_user.total, 2);

    let open = services.orders.list_unfinished_orders(&owner, shop.id, &flow, page()).await.unwrap();
    assert_eq!(open.total, 2);

    let rejected = services
        .orders
        .search_orders(&owner, OrderSearch { shop_id: shop.id, statuses: Some(vec![3]), ..Default::default() }, page())
        .await
        .unwrap();
    assert_eq!(rejected.data.iter().map(|o| o.id).collect::<Vec<_>>(), vec![ids[0]]);

    let created_first = services.orders.get_order(&owner, ids[0], shop.id).await.unwrap().created_at;
    let bounded = services
        .orders
        .search_orders(
            &owner,
            OrderSearch { shop_id: shop.id, start: Some(created_first), end: Some(created_first), ..Default::default() },
            page(),
        )
        .await
        .unwrap();
    assert_eq!(bounded.total, 1);

    let inverted = services
        .orders
        .search_orders(
            &owner,
            OrderSearch {
                shop_id: shop.id,
                start: Some(created_first + chrono::Duration::hours(1)),
                end: Some(created_first),
                ..Default::default()
            },
            page(),
        )
        .await;
    assert!(matches!(inverted, Err(AppError::InvalidInput(_))));
}

#[tokio::test]
async fn other_shops_are_forbidden() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let other = create_shop(&app, "Market", "market").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 10)).await.product;
    let services = app.services();

    let order = services
        .orders
        .create_order(&owner_of(&shop), draft(7, shop.id, vec![item(product.id, 1)]))
        .await
        .unwrap();

    let intruder = owner_of(&other);
    assert!(matches!(
        services.orders.get_order(&intruder, order.id, shop.id).await,
        Err(AppError::Forbidden)
    ));
    assert!(matches!(
        services.orders.list_orders_by_shop(&intruder, shop.id, page()).await,
        Err(AppError::Forbidden)
    ));
    // Asking through its own shop id does not reveal the order either.
    assert!(matches!(
        services.orders.get_order(&intruder, order.id, other.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(services.orders.get_order(&app.operator, order.id, shop.id).await.is_ok());
}

#[tokio::test]
async fn customers_order_as_themselves_and_see_only_their_orders() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 10)).await.product;
    let services = app.services();

    let customer = Principal::Customer { user_id: 99, shop_id: shop.id, username: "walk-in".into() };
    let mine = services
        .orders
        .create_order(&customer, draft(7, shop.id, vec![item(product.id, 1)]))
        .await
        .unwrap();
    assert_eq!(mine.user_id, 99);

    let theirs = services
        .orders
        .create_order(&owner_of(&shop), draft(7, shop.id, vec![item(product.id, 1)]))
        .await
        .unwrap();
    assert!(services.orders.get_order(&customer, mine.id, shop.id).await.is_ok());
    assert!(matches!(
        services.orders.get_order(&customer, theirs.id, shop.id).await,
        Err(AppError::Forbidden)
    ));
    assert!(matches!(
        services.orders.list_orders_by_shop(&customer, shop.id, page()).await,
        Err(AppError::Forbidden)
    ));
    assert!(matches!(
        services.orders.delete_order(&customer, mine.id, shop.id).await,
        Err(AppError::Forbidden)
    ));
}

fn custom_flow() -> OrderStatusFlow {
    let state = |value: i32, is_final: bool, next: &[i32]| StatusState {
        value,
        label: format!("s{value}"),
        kind: String::new(),
        is_final,
        actions: next
            .iter()
            .map(|n| StatusAction { name: format!("to {n}"), next_status: *n, next_status_label: String::new() })
            .collect(),
    };
    OrderStatusFlow { statuses: vec![state(1, false, &[7]), state(7, false, &[-20]), state(-20, true, &[])] }
}

#[tokio::test]
async fn replaced_flow_takes_effect_immediately() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 5)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();

    let order = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 1)]))
        .await
        .unwrap();
    let cached = services.shops.flow(shop.id).await.unwrap();
    assert!(cached.can_transition(1, 2));

    services.shops.replace_flow(&owner, shop.id, custom_flow()).await.unwrap();
    let flow = services.shops.flow(shop.id).await.unwrap();
    assert_eq!(*flow, custom_flow());
    assert_eq!(services.shops.get_shop(&owner, shop.id).await.unwrap().order_status_flow, custom_flow());

    assert!(matches!(
        services.orders.toggle_status(&owner, order.id, shop.id, 2, &flow).await,
        Err(AppError::StatusNotAllowed { from: 1, to: 2 })
    ));
    services.orders.toggle_status(&owner, order.id, shop.id, 7, &flow).await.unwrap();
    let done = services.orders.toggle_status(&owner, order.id, shop.id, -20, &flow).await.unwrap();
    assert_eq!(done.status, -20);
    assert!(matches!(
        services.orders.update_order(&owner, order.id, shop.id, OrderUpdate::default(), &flow).await,
        Err(AppError::OrderImmutable)
    ));
    // -20 is neither restoring nor undeletable.
    assert_eq!(stock_of(&app, product.id).await, 4);
    services.orders.delete_order(&owner, order.id, shop.id).await.unwrap();
    assert_eq!(stock_of(&app, product.id).await, 5);
}

#[tokio::test]
async fn invalid_or_foreign_flows_are_rejected() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let other = create_shop(&app, "Other", "other").await;
    let shops = &app.services().shops;

    let mut broken = custom_flow();
    broken.statuses[1].actions[0].next_status = 99;
    assert!(matches!(shops.replace_flow(&owner_of(&shop), shop.id, broken).await, Err(AppError::InvalidInput(_))));
    assert!(matches!(
        shops.replace_flow(&owner_of(&other), shop.id, custom_flow()).await,
        Err(AppError::Forbidden)
    ));
    assert!(shops.flow(shop.id).await.unwrap().can_transition(1, 2));
}

fn reopenable_flow() -> OrderStatusFlow {
    let state = |value: i32, next: i32| StatusState {
        value,
        label: format!("s{value}"),
        kind: String::new(),
        is_final: false,
        actions: vec![StatusAction { name: format!("to {next}"), next_status: next, next_status_label: String::new() }],
    };
    OrderStatusFlow { statuses: vec![state(1, -1), state(-1, 1)] }
}

#[tokio::test]
async fn editing_a_canceled_order_leaves_stock_alone() {
    let app = setup().await;
    let shop = create_shop(&app, "Corner", "corner").await;
    let product = create_product(&app, &shop, spec("tea", 1000, 10)).await.product;
    let owner = owner_of(&shop);
    let services = app.services();
    let flow = services.shops.replace_flow(&owner, shop.id, reopenable_flow()).await.unwrap();

    let order = services
        .orders
        .create_order(&owner, draft(7, shop.id, vec![item(product.id, 3)]))
        .await
        .unwrap();
    assert_eq!(stock_of(&app, product.id).await, 7);
    services.orders.toggle_status(&owner, order.id, shop.id, -1, &flow).await.unwrap();
    assert_eq!(stock_of(&app, product.id).await, 10);

    let update = OrderUpdate { remark: None, items: Some(vec![item(product.id, 1)]) };
    let updated = services.orders.update_order(&owner, order.id, shop.id, update, &flow).await.unwrap();
    assert_eq!(updated.items[0].quantity, 1);
    assert_eq!(stock_of(&app, product.id).await, 10);

    // Reopening takes the edited quantity.
    services.orders.toggle_status(&owner, order.id, shop.id, 1, &flow).await.unwrap();
    assert_eq!(stock_of(&app, product.id).await, 9);
}
