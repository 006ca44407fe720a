mod common;

use assert_matches::assert_matches;
use common::{admin, insert_product, nobody, TestEnv};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sale_wbs::{
    entities::LineType,
    errors::ServiceError,
    services::{CreateSaleLineRequest, UpdateSaleLineRequest},
};

#[tokio::test]
async fn subtotal_sums_lines_since_previous_subtotal() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let title = env.chapter(sale.id, None, 1, LineType::Title, "Walls").await;
    env.line(sale.id, Some(title.id), 1, "Bricks", dec!(2), dec!(10))
        .await;
    env.line(sale.id, Some(title.id), 2, "Mortar", dec!(1), dec!(5))
        .await;
    let first = env
        .subtotal(sale.id, Some(title.id), 3, LineType::Subtotal)
        .await;
    env.line(sale.id, Some(title.id), 4, "Lintel", dec!(3), dec!(1))
        .await;
    let second = env
        .subtotal(sale.id, Some(title.id), 5, LineType::Subtotal)
        .await;

    let lines = &env.services.lines;
    assert_eq!(lines.amount(first.id).await.unwrap(), Some(dec!(25)));
    assert_eq!(lines.amount(second.id).await.unwrap(), Some(dec!(3)));
    assert_eq!(lines.amount(title.id).await.unwrap(), None);
    assert_eq!(
        env.services.sales.untaxed_amount(sale.id).await.unwrap(),
        dec!(28)
    );
}

#[tokio::test]
async fn subtotal_includes_nested_chapters() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let title = env.chapter(sale.id, None, 1, LineType::Title, "Walls").await;
    env.line(sale.id, Some(title.id), 1, "Bricks", dec!(2), dec!(10))
        .await;
    let sub = env
        .chapter(sale.id, Some(title.id), 2, LineType::Subtitle, "Finish")
        .await;
    env.line(sale.id, Some(sub.id), 1, "Paint", dec!(3), dec!(2.333))
        .await;
    let subsub = env
        .subtotal(sale.id, Some(sub.id), 2, LineType::Subsubtotal)
        .await;
    let total = env
        .subtotal(sale.id, Some(title.id), 3, LineType::Subtotal)
        .await;

    // 3 × 2.333 rounds to 7.00
    assert_eq!(
        env.services.lines.amount(subsub.id).await.unwrap(),
        Some(dec!(7.00))
    );
    assert_eq!(
        env.services.lines.amount(total.id).await.unwrap(),
        Some(dec!(27.00))
    );
}

#[tokio::test]
async fn subtotal_builder_closes_the_chapter() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let title = env.chapter(sale.id, None, 1, LineType::Title, "Walls").await;
    let empty = env.chapter(sale.id, None, 2, LineType::Subtitle, "Extras").await;
    env.line(sale.id, Some(title.id), 1, "Bricks", dec!(2), dec!(10))
        .await;

    let request = env
        .services
        .lines
        .subtotal_for(title.id, None)
        .await
        .unwrap();
    assert_eq!(request.line_type, LineType::Subtotal);
    assert_eq!(request.parent_id, Some(title.id));
    assert_eq!(request.sequence, Some(9999));
    assert_eq!(request.description, "Subtotal Walls");

    let subtotal = env
        .services
        .lines
        .add_line(&admin(), request)
        .await
        .unwrap();
    assert_eq!(
        env.services.lines.amount(subtotal.id).await.unwrap(),
        Some(dec!(20))
    );
    let children = env.services.lines.children(title.id).await.unwrap();
    assert_eq!(children.last().map(|l| l.id), Some(subtotal.id));

    let beside = env
        .services
        .lines
        .subtotal_for(empty.id, Some(3))
        .await
        .unwrap();
    assert_eq!(beside.line_type, LineType::Subsubtotal);
    assert_eq!(beside.parent_id, None);
    assert_eq!(beside.sequence, Some(3));

    let line = env.line(sale.id, None, 4, "Loose", dec!(1), dec!(1)).await;
    assert_matches!(
        env.services.lines.subtotal_for(line.id, None).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn chapter_numbers_follow_sibling_order() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let b = env.chapter(sale.id, None, 2, LineType::Title, "B").await;
    let a = env.chapter(sale.id, None, 1, LineType::Title, "A").await;
    let d = env.line(sale.id, Some(a.id), 2, "D", dec!(1), dec!(1)).await;
    let c = env.line(sale.id, Some(a.id), 1, "C", dec!(1), dec!(1)).await;

    let numbers = env
        .services
        .lines
        .chapter_numbers(&[a.id, b.id, c.id, d.id, 4242])
        .await
        .unwrap();
    assert_eq!(numbers[&a.id].as_deref(), Some("1"));
    assert_eq!(numbers[&c.id].as_deref(), Some("1.1"));
    assert_eq!(numbers[&d.id].as_deref(), Some("1.2"));
    assert_eq!(numbers[&b.id].as_deref(), Some("2"));
    assert_eq!(numbers[&4242], None);
    assert_eq!(numbers.len(), 5);

    let tree: Vec<i64> = env
        .services
        .sales
        .lines_tree(sale.id)
        .await
        .unwrap()
        .iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(tree, vec![a.id, b.id]);
}

#[tokio::test]
async fn parent_must_be_a_chapter_of_the_same_sale() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let other = env.new_sale().await;
    let title = env.chapter(sale.id, None, 1, LineType::Title, "Walls").await;
    let plain = env.line(sale.id, None, 2, "Bricks", dec!(1), dec!(1)).await;
    let foreign = env.chapter(other.id, None, 1, LineType::Title, "Other").await;

    let request = |parent_id| CreateSaleLineRequest {
        sale_id: sale.id,
        parent_id: Some(parent_id),
        sequence: None,
        line_type: LineType::Comment,
        description: "note".into(),
        note: None,
        product_id: None,
        unit_id: None,
        quantity: Decimal::ZERO,
        unit_price: None,
    };

    let lines = &env.services.lines;
    assert!(lines.add_line(&admin(), request(title.id)).await.is_ok());
    assert_matches!(
        lines.add_line(&admin(), request(plain.id)).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        lines.add_line(&admin(), request(foreign.id)).await,
        Err(ServiceError::ValidationError(_))
    );

    let sub = env
        .chapter(sale.id, Some(title.id), 3, LineType::Subtitle, "Inner")
        .await;
    // A chapter cannot move under its own descendant.
    assert_matches!(
        lines
            .update_line(
                &admin(),
                title.id,
                UpdateSaleLineRequest {
                    parent_id: Some(Some(sub.id)),
                    ..Default::default()
                },
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );
    // Nor stop being a chapter while it has children.
    assert_matches!(
        lines
            .update_line(
                &admin(),
                title.id,
                UpdateSaleLineRequest {
                    line_type: Some(LineType::Comment),
                    ..Default::default()
                },
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn product_and_unit_rules() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let base = CreateSaleLineRequest {
        sale_id: sale.id,
        parent_id: None,
        sequence: None,
        line_type: LineType::Line,
        description: "Bricks".into(),
        note: None,
        product_id: Some(env.product_id),
        unit_id: Some(env.dozen_id),
        quantity: dec!(1),
        unit_price: Some(dec!(6)),
    };
    let lines = &env.services.lines;

    // Same category as the product's default unit.
    assert!(lines.add_line(&admin(), base.clone()).await.is_ok());

    let wrong_category = CreateSaleLineRequest {
        unit_id: Some(env.kilogram_id),
        ..base.clone()
    };
    assert_matches!(
        lines.add_line(&admin(), wrong_category).await,
        Err(ServiceError::ValidationError(_))
    );

    let no_unit = CreateSaleLineRequest {
        unit_id: None,
        ..base.clone()
    };
    assert_matches!(
        lines.add_line(&admin(), no_unit).await,
        Err(ServiceError::ValidationError(_))
    );

    let on_title = CreateSaleLineRequest {
        line_type: LineType::Title,
        ..base.clone()
    };
    assert_matches!(
        lines.add_line(&admin(), on_title).await,
        Err(ServiceError::ValidationError(_))
    );

    let scrap = insert_product(&env.db, "Scrap", env.piece_id, false).await;
    let not_salable = CreateSaleLineRequest {
        product_id: Some(scrap.id),
        ..base.clone()
    };
    assert_matches!(
        lines.add_line(&admin(), not_salable).await,
        Err(ServiceError::ValidationError(_))
    );

    let unknown = CreateSaleLineRequest {
        product_id: Some(777),
        ..base
    };
    assert_matches!(
        lines.add_line(&admin(), unknown).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn structure_is_locked_once_quoted() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let title = env.chapter(sale.id, None, 1, LineType::Title, "Walls").await;
    let line = env
        .line(sale.id, Some(title.id), 1, "Bricks", dec!(2), dec!(10))
        .await;
    env.services.sales.quote(&admin(), sale.id).await.unwrap();

    let lines = &env.services.lines;
    assert_matches!(
        lines
            .update_line(
                &admin(),
                line.id,
                UpdateSaleLineRequest {
                    description: Some("Red bricks".into()),
                    ..Default::default()
                },
            )
            .await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_matches!(
        lines.remove_line(&admin(), line.id).await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_matches!(
        env.services
            .lines
            .add_line(
                &admin(),
                CreateSaleLineRequest {
                    sale_id: sale.id,
                    parent_id: None,
                    sequence: None,
                    line_type: LineType::Comment,
                    description: "late".into(),
                    note: None,
                    product_id: None,
                    unit_id: None,
                    quantity: Decimal::ZERO,
                    unit_price: None,
                },
            )
            .await,
        Err(ServiceError::InvalidStatus(_))
    );

    // Quantities stay editable and the node reports the new figure.
    let updated = lines
        .update_line(
            &admin(),
            line.id,
            UpdateSaleLineRequest {
                quantity: Some(dec!(5)),
                unit_id: Some(Some(env.dozen_id)),
                ..Default::default()
            },
        )
        .await;
    // The node was created for pieces, so switching units breaks the match.
    assert_matches!(updated, Err(ServiceError::ValidationError(_)));

    let updated = lines
        .update_line(
            &admin(),
            line.id,
            UpdateSaleLineRequest {
                quantity: Some(dec!(5)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let wbs_id = updated.wbs_id.unwrap();
    assert_eq!(env.services.wbs.quantity(wbs_id).await.unwrap(), dec!(5));
}

#[tokio::test]
async fn removing_a_chapter_removes_its_children() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let title = env.chapter(sale.id, None, 1, LineType::Title, "Walls").await;
    let line = env
        .line(sale.id, Some(title.id), 1, "Bricks", dec!(2), dec!(10))
        .await;

    assert_matches!(
        env.services.lines.remove_line(&nobody(), title.id).await,
        Err(ServiceError::Forbidden(_))
    );
    env.services
        .lines
        .remove_line(&admin(), title.id)
        .await
        .unwrap();
    assert_matches!(
        env.services.lines.get_line(line.id).await,
        Err(ServiceError::NotFound(_))
    );
    assert!(env.services.sales.lines(sale.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn work_breakdown_structure_preview() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let line = env.line(sale.id, None, 7, "Bricks", dec!(2), dec!(10)).await;

    let preview = env
        .services
        .lines
        .work_breakdown_structure(line.id, Some(12))
        .await
        .unwrap();
    assert_eq!(preview.description, "Bricks");
    assert_eq!(preview.node_type, LineType::Line);
    assert_eq!(preview.product_id, Some(env.product_id));
    assert_eq!(preview.unit_id, Some(env.piece_id));
    assert_eq!(preview.sequence, Some(7));
    assert_eq!(
        preview.parent,
        Some(sale_wbs::services::wbs_sync::WbsRef::Existing(12))
    );
}
