//! Quote, draft, cancel and copy of sales with hierarchical lines, and the
//! work breakdown structure nodes they maintain.

mod common;

use std::collections::HashMap;

use assert_matches::assert_matches;
use common::{admin, nobody, salesperson, TestEnv};
use rust_decimal_macros::dec;
use sale_wbs::{
    auth::AccessContext,
    entities::{sale_line, LineType, SaleState},
    errors::ServiceError,
    events::Event,
    repositories::SaleLineRepository,
    services::{
        wbs::wbs_forest_of, wbs_sync, CreateWbsRequest, Forest, UpdateSaleLineRequest, WbsService,
    },
};
use sea_orm::TransactionTrait;

/// Title A (line C, subtitle D with line E), title B
struct Layout {
    sale_id: i64,
    a: sale_line::Model,
    b: sale_line::Model,
    c: sale_line::Model,
    d: sale_line::Model,
    e: sale_line::Model,
}

async fn layout(env: &TestEnv) -> Layout {
    let sale = env.new_sale().await;
    let a = env.chapter(sale.id, None, 1, LineType::Title, "Walls").await;
    let b = env.chapter(sale.id, None, 2, LineType::Title, "Roof").await;
    let c = env
        .line(sale.id, Some(a.id), 1, "Bricks", dec!(100), dec!(0.5))
        .await;
    let d = env
        .chapter(sale.id, Some(a.id), 2, LineType::Subtitle, "Plaster")
        .await;
    let e = env
        .line(sale.id, Some(d.id), 1, "Plaster bags", dec!(4), dec!(12))
        .await;
    Layout {
        sale_id: sale.id,
        a,
        b,
        c,
        d,
        e,
    }
}

#[tokio::test]
async fn quote_mirrors_lines_into_wbs_nodes() {
    let mut env = TestEnv::new().await;
    let l = layout(&env).await;

    let sale = env.services.sales.quote(&admin(), l.sale_id).await.unwrap();
    assert_eq!(sale.state, SaleState::Quotation);
    assert_eq!(sale.number, Some(format!("SO{:05}", l.sale_id)));

    let mut node_of = HashMap::new();
    for line in [&l.a, &l.b, &l.c, &l.d, &l.e] {
        let line = env.reload(line).await;
        let wbs_id = line.wbs_id.expect("every line is linked");
        let node = env.services.wbs.get(wbs_id).await.unwrap();
        assert_eq!(node.description, line.description);
        assert_eq!(node.node_type, line.line_type);
        assert_eq!(node.product_id, line.product_id);
        assert_eq!(node.unit_id, line.unit_id);
        node_of.insert(line.id, node);
    }

    // Top-level lines map to root nodes.
    assert_eq!(node_of[&l.a.id].parent_id, None);
    assert_eq!(node_of[&l.b.id].parent_id, None);
    // Children follow their parent line's node.
    assert_eq!(node_of[&l.c.id].parent_id, Some(node_of[&l.a.id].id));
    assert_eq!(node_of[&l.d.id].parent_id, Some(node_of[&l.a.id].id));
    assert_eq!(node_of[&l.e.id].parent_id, Some(node_of[&l.d.id].id));

    let roots: Vec<i64> = env
        .services
        .wbs
        .wbs_tree(l.sale_id)
        .await
        .unwrap()
        .iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(roots, vec![node_of[&l.a.id].id, node_of[&l.b.id].id]);

    let events = env.drain_events();
    assert!(events.contains(&Event::SaleQuoted(l.sale_id)));
    let created = events
        .iter()
        .filter(|e| matches!(e, Event::WbsCreated { line_id: Some(_), .. }))
        .count();
    assert_eq!(created, 5);
}

/// (node id, parent id) of every node in the sale's WBS tree
async fn wbs_shape(env: &TestEnv, sale_id: i64) -> Vec<(i64, Option<i64>)> {
    let (_, nodes) = wbs_forest_of(&*env.db, sale_id).await.unwrap();
    let mut shape: Vec<(i64, Option<i64>)> = nodes.iter().map(|n| (n.id, n.parent_id)).collect();
    shape.sort();
    shape
}

#[tokio::test]
async fn synchronization_is_idempotent() {
    let env = TestEnv::new().await;
    let l = layout(&env).await;
    env.services.sales.quote(&admin(), l.sale_id).await.unwrap();
    let before = wbs_shape(&env, l.sale_id).await;
    assert_eq!(before.len(), 5);

    let txn = env.db.begin().await.unwrap();
    let lines = Forest::new(SaleLineRepository::find_by_sale(&txn, l.sale_id).await.unwrap());
    let (_, nodes) = wbs_forest_of(&txn, l.sale_id).await.unwrap();
    let plan = wbs_sync::plan(&lines, &nodes).unwrap();
    assert!(plan.is_empty(), "second pass planned {:?}", plan.mutations);

    let events = WbsService::apply_plan(&AccessContext::system(), &txn, &lines, &nodes, &plan)
        .await
        .unwrap();
    assert!(events.is_empty());
    txn.commit().await.unwrap();

    assert_eq!(wbs_shape(&env, l.sale_id).await, before);
    for line in [&l.a, &l.b, &l.c, &l.d, &l.e] {
        let linked = env.reload(line).await.wbs_id.unwrap();
        assert!(before.iter().any(|(id, _)| *id == linked));
    }
}

#[tokio::test]
async fn quote_requires_draft_with_lines() {
    let env = TestEnv::new().await;
    let empty = env.new_sale().await;
    assert_matches!(
        env.services.sales.quote(&admin(), empty.id).await,
        Err(ServiceError::ValidationError(_))
    );

    let l = layout(&env).await;
    env.services.sales.quote(&admin(), l.sale_id).await.unwrap();
    assert_matches!(
        env.services.sales.quote(&admin(), l.sale_id).await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_matches!(
        env.services.sales.quote(&admin(), 9999).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn salesperson_quotes_and_drafts_without_wbs_permissions() {
    let env = TestEnv::new().await;
    let l = layout(&env).await;

    assert_matches!(
        env.services.sales.quote(&nobody(), l.sale_id).await,
        Err(ServiceError::Forbidden(_))
    );

    env.services
        .sales
        .quote(&salesperson(), l.sale_id)
        .await
        .unwrap();
    let a = env.reload(&l.a).await;
    assert!(a.wbs_id.is_some());

    env.services
        .sales
        .draft(&salesperson(), l.sale_id)
        .await
        .unwrap();
    assert!(env.services.wbs.get(a.wbs_id.unwrap()).await.is_err());

    // Deleting by hand still needs the permission.
    let node = env
        .services
        .wbs
        .create(
            &admin(),
            CreateWbsRequest {
                description: "Spare".into(),
                node_type: LineType::Title,
                parent_id: None,
                sequence: None,
                product_id: None,
                unit_id: None,
            },
        )
        .await
        .unwrap();
    assert_matches!(
        env.services.wbs.delete(&salesperson(), &[node.id]).await,
        Err(ServiceError::Forbidden(_))
    );
}

#[tokio::test]
async fn draft_deletes_nodes_no_other_sale_uses() {
    let mut env = TestEnv::new().await;
    let l = layout(&env).await;
    env.services.sales.quote(&admin(), l.sale_id).await.unwrap();

    let b_node = env.reload(&l.b).await.wbs_id.unwrap();
    let c_node = env.reload(&l.c).await.wbs_id.unwrap();
    let a_node = env.reload(&l.a).await.wbs_id.unwrap();

    // A second sale shares the nodes of B and C.
    let other = env.new_sale().await;
    let roof = env.chapter(other.id, None, 1, LineType::Title, "Roof").await;
    let bricks = env
        .line(other.id, None, 2, "More bricks", dec!(20), dec!(0.5))
        .await;
    for (line, wbs_id) in [(&roof, b_node), (&bricks, c_node)] {
        env.services
            .lines
            .update_line(
                &admin(),
                line.id,
                UpdateSaleLineRequest {
                    wbs_id: Some(Some(wbs_id)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    env.drain_events();

    env.services.sales.draft(&admin(), l.sale_id).await.unwrap();

    for line in [&l.a, &l.b, &l.c, &l.d, &l.e] {
        assert_eq!(env.reload(line).await.wbs_id, None);
    }
    assert!(env.services.wbs.get(a_node).await.is_err());
    assert!(env.services.wbs.get(b_node).await.is_ok());

    // C lost its parent A but is still in use, so it moved up to the root.
    let c = env.services.wbs.get(c_node).await.unwrap();
    assert_eq!(c.parent_id, None);
    assert_eq!(env.services.wbs.sales(c_node).await.unwrap(), vec![other.id]);

    let events = env.drain_events();
    assert!(events.contains(&Event::SaleDrafted(l.sale_id)));
    assert!(events.contains(&Event::WbsDeleted(a_node)));
    assert!(events.contains(&Event::WbsReparented {
        wbs_id: c_node,
        parent_id: None
    }));
    assert!(!events.contains(&Event::WbsDeleted(b_node)));
}

#[tokio::test]
async fn draft_from_cancelled_and_requote() {
    let env = TestEnv::new().await;
    let l = layout(&env).await;
    env.services.sales.quote(&admin(), l.sale_id).await.unwrap();

    assert_matches!(
        env.services.sales.draft(&admin(), env.new_sale().await.id).await,
        Err(ServiceError::InvalidStatus(_))
    );

    let cancelled = env.services.sales.cancel(&admin(), l.sale_id).await.unwrap();
    assert_eq!(cancelled.state, SaleState::Cancelled);
    assert!(env.reload(&l.a).await.wbs_id.is_some());

    let drafted = env.services.sales.draft(&admin(), l.sale_id).await.unwrap();
    assert_eq!(drafted.state, SaleState::Draft);
    assert!(env.services.wbs.find_by_sale(l.sale_id).await.unwrap().is_empty());

    let requoted = env.services.sales.quote(&admin(), l.sale_id).await.unwrap();
    // The number is kept from the first quotation.
    assert_eq!(requoted.number, Some(format!("SO{:05}", l.sale_id)));
    assert_eq!(env.services.wbs.find_by_sale(l.sale_id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn quote_moves_linked_node_to_the_line_position() {
    let env = TestEnv::new().await;
    let first = layout(&env).await;
    env.services.sales.quote(&admin(), first.sale_id).await.unwrap();
    let plaster_node = env.reload(&first.d).await.wbs_id.unwrap();

    // A top-level subtitle of another sale points at a nested node.
    let sale = env.new_sale().await;
    let line = env
        .chapter(sale.id, None, 1, LineType::Subtitle, "Plaster")
        .await;
    env.services
        .lines
        .update_line(
            &admin(),
            line.id,
            UpdateSaleLineRequest {
                wbs_id: Some(Some(plaster_node)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    env.services.sales.quote(&admin(), sale.id).await.unwrap();
    let node = env.services.wbs.get(plaster_node).await.unwrap();
    assert_eq!(node.parent_id, None);
    assert_eq!(env.reload(&line).await.wbs_id, Some(plaster_node));
}

#[tokio::test]
async fn quote_reuses_nodes_by_description_within_a_level() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let first = env.chapter(sale.id, None, 1, LineType::Title, "Walls").await;
    let second = env.chapter(sale.id, None, 2, LineType::Title, "Walls").await;

    env.services.sales.quote(&admin(), sale.id).await.unwrap();

    let first = env.reload(&first).await;
    let second = env.reload(&second).await;
    assert!(first.wbs_id.is_some());
    assert_eq!(first.wbs_id, second.wbs_id);
    assert_eq!(env.services.wbs.find_by_sale(sale.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn mismatching_reuse_aborts_the_quote() {
    let env = TestEnv::new().await;
    let sale = env.new_sale().await;
    let title = env.chapter(sale.id, None, 1, LineType::Title, "Walls").await;
    env.line(sale.id, None, 2, "Walls", dec!(1), dec!(1)).await;

    // The plain line finds the title's planned node by description.
    assert_matches!(
        env.services.sales.quote(&admin(), sale.id).await,
        Err(ServiceError::ValidationError(_))
    );

    let sale = env.services.sales.get_order(sale.id).await.unwrap();
    assert_eq!(sale.state, SaleState::Draft);
    assert_eq!(sale.number, None);
    assert_eq!(env.reload(&title).await.wbs_id, None);
    assert!(env.services.wbs.find_by_sale(sale.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn copy_keeps_shape_without_wbs() {
    let mut env = TestEnv::new().await;
    let l = layout(&env).await;
    env.services.sales.quote(&admin(), l.sale_id).await.unwrap();

    let copy = env.services.sales.copy(&admin(), l.sale_id).await.unwrap();
    assert_ne!(copy.id, l.sale_id);
    assert_eq!(copy.state, SaleState::Draft);
    assert_eq!(copy.number, None);

    let source: Forest<sale_line::Model> = env.services.sales.lines(l.sale_id).await.unwrap();
    let copied: Forest<sale_line::Model> = env.services.sales.lines(copy.id).await.unwrap();
    assert_eq!(copied.len(), source.len());
    assert!(copied.iter().all(|line| line.wbs_id.is_none()));
    assert!(copied.iter().all(|line| line.sale_id == copy.id));

    let shape = |forest: &Forest<sale_line::Model>| -> Vec<(String, Option<String>, LineType)> {
        forest
            .preorder()
            .into_iter()
            .map(|line| {
                (
                    line.description.clone(),
                    forest.parent(line.id).map(|p| p.description.clone()),
                    line.line_type,
                )
            })
            .collect()
    };
    assert_eq!(shape(&copied), shape(&source));

    assert!(env.drain_events().contains(&Event::SaleCopied {
        source_id: l.sale_id,
        copy_id: copy.id
    }));
}

#[tokio::test]
async fn copy_of_unknown_sale_creates_nothing() {
    let env = TestEnv::new().await;
    let existing = env.new_sale().await;
    assert_matches!(
        env.services.sales.copy(&admin(), 4040).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        env.services.sales.get_order(existing.id + 1).await,
        Err(ServiceError::NotFound(_))
    );
}
