use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::{
    auth::{consts as perm, AccessContext},
    config::WbsConfig,
    db::DbPool,
    entities::{
        product, sale_line, unit,
        wbs::{ActiveModel as WbsActiveModel, Model as WbsModel},
        LineType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{SaleLineRepository, WbsRepository},
    services::{
        tree::{sibling_order, Forest},
        wbs_sync::{SyncPlan, WbsMutation, WbsRef},
    },
};

/// Quantity display precision of a node without unit
pub const DEFAULT_UNIT_DIGITS: i32 = 2;

/// Request for creating a node by hand
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateWbsRequest {
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    #[serde(default)]
    pub node_type: LineType,
    pub parent_id: Option<i64>,
    pub sequence: Option<i32>,
    pub product_id: Option<i64>,
    pub unit_id: Option<i64>,
}

/// Checks the product and unit of a node or sale line of type `line_type`:
/// both only on plain lines, the product salable, a unit whenever a product
/// is set, and the unit in the category of the product's default unit.
pub(crate) async fn check_product_unit<C: ConnectionTrait>(
    db: &C,
    what: &str,
    line_type: LineType,
    product_id: Option<i64>,
    unit_id: Option<i64>,
) -> Result<(), ServiceError> {
    if line_type != LineType::Line && (product_id.is_some() || unit_id.is_some()) {
        return Err(ServiceError::ValidationError(format!(
            "{} of type {} cannot have a product or unit",
            what, line_type
        )));
    }

    let product_id = match product_id {
        Some(id) => id,
        None => return Ok(()),
    };
    let product = product::Entity::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
    if !product.salable {
        return Err(ServiceError::ValidationError(format!(
            "product {} is not salable",
            product.name
        )));
    }

    let unit_id = unit_id.ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "{} with product {} requires a unit",
            what, product.name
        ))
    })?;
    let unit = unit::Entity::find_by_id(unit_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Unit", unit_id))?;
    let default_unit = unit::Entity::find_by_id(product.default_unit_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Unit", product.default_unit_id))?;

    if unit.category != default_unit.category {
        return Err(ServiceError::ValidationError(format!(
            "unit {} is not in category {} of product {}",
            unit.name, default_unit.category, product.name
        )));
    }
    Ok(())
}

/// Root nodes reached from the nodes linked to the lines of `sale_id`, in
/// first-seen order (linked nodes visited in sibling order).
pub async fn wbs_tree_of<C: ConnectionTrait>(
    db: &C,
    sale_id: i64,
) -> Result<Vec<WbsModel>, ServiceError> {
    let lines = SaleLineRepository::find_by_sale(db, sale_id).await?;
    let linked: Vec<i64> = lines
        .iter()
        .filter_map(|l| l.wbs_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut nodes = WbsRepository::find_by_ids(db, &linked).await?;
    nodes.sort_by_key(|n| sibling_order(n.sequence, n.id));
    let ordered: Vec<i64> = nodes.iter().map(|n| n.id).collect();

    let mut seen = HashSet::new();
    let root_ids: Vec<i64> = WbsRepository::root_ids(db, &ordered)
        .await?
        .into_iter()
        .filter(|id| seen.insert(*id))
        .collect();

    let mut by_id: HashMap<i64, WbsModel> = WbsRepository::find_by_ids(db, &root_ids)
        .await?
        .into_iter()
        .map(|n| (n.id, n))
        .collect();
    Ok(root_ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// The `wbs_tree` of `sale_id` with every descendant, plus the root order.
pub async fn wbs_forest_of<C: ConnectionTrait>(
    db: &C,
    sale_id: i64,
) -> Result<(Vec<i64>, Forest<WbsModel>), ServiceError> {
    let roots: Vec<i64> = wbs_tree_of(db, sale_id)
        .await?
        .into_iter()
        .map(|n| n.id)
        .collect();
    let nodes = WbsRepository::load_subtrees(db, &roots).await?;
    Ok((roots, Forest::new(nodes)))
}

fn resolve(created: &HashMap<usize, WbsModel>, r: WbsRef) -> Result<i64, ServiceError> {
    match r {
        WbsRef::Existing(id) => Ok(id),
        WbsRef::Planned(slot) => created.get(&slot).map(|n| n.id).ok_or_else(|| {
            ServiceError::InternalError(format!("WBS slot {} used before creation", slot))
        }),
    }
}

/// Service for work breakdown structure nodes
#[derive(Clone)]
pub struct WbsService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    config: WbsConfig,
}

impl WbsService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>, config: WbsConfig) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    async fn publish(&self, events: Vec<Event>) {
        if let Some(sender) = &self.event_sender {
            sender.send_all(events).await;
        }
    }

    /// Creates a node by hand
    #[instrument(skip(self, ctx, request), fields(description = %request.description))]
    pub async fn create(
        &self,
        ctx: &AccessContext,
        request: CreateWbsRequest,
    ) -> Result<WbsModel, ServiceError> {
        ctx.require(perm::WBS_CREATE)?;
        request.validate()?;
        if request.description.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "WBS description cannot be blank".to_string(),
            ));
        }

        let db = &*self.db;
        check_product_unit(
            db,
            "WBS",
            request.node_type,
            request.product_id,
            request.unit_id,
        )
        .await?;
        if let Some(parent_id) = request.parent_id {
            WbsRepository::get(db, parent_id).await?;
        }

        let node = WbsRepository::create(
            db,
            WbsActiveModel {
                parent_id: Set(request.parent_id),
                sequence: Set(request.sequence),
                node_type: Set(request.node_type),
                description: Set(request.description),
                product_id: Set(request.product_id),
                unit_id: Set(request.unit_id),
                ..Default::default()
            },
        )
        .await?;

        counter!("sale_wbs.wbs.created", 1);
        info!(wbs_id = node.id, "WBS created");
        self.publish(vec![Event::WbsCreated {
            wbs_id: node.id,
            line_id: None,
        }])
        .await;
        Ok(node)
    }

    pub async fn get(&self, id: i64) -> Result<WbsModel, ServiceError> {
        WbsRepository::get(&*self.db, id).await
    }

    /// Direct children in sibling order
    pub async fn children(&self, id: i64) -> Result<Vec<WbsModel>, ServiceError> {
        let mut children = WbsRepository::find_children(&*self.db, &[id]).await?;
        children.sort_by_key(|n| sibling_order(n.sequence, n.id));
        Ok(children)
    }

    /// Summed quantity of the sale lines linked to each node; 0 for nodes
    /// without lines.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn quantities(&self, ids: &[i64]) -> Result<HashMap<i64, Decimal>, ServiceError> {
        let mut result: HashMap<i64, Decimal> = ids.iter().map(|&id| (id, Decimal::ZERO)).collect();
        for chunk in ids.chunks(self.config.id_batch_size.max(1)) {
            for (wbs_id, quantity) in
                SaleLineRepository::sum_quantity_by_wbs(&*self.db, chunk).await?
            {
                result.insert(wbs_id, quantity);
            }
        }
        Ok(result)
    }

    pub async fn quantity(&self, id: i64) -> Result<Decimal, ServiceError> {
        Ok(self
            .quantities(&[id])
            .await?
            .remove(&id)
            .unwrap_or(Decimal::ZERO))
    }

    /// Display precision for the quantity of a node
    pub async fn unit_digits(&self, id: i64) -> Result<i32, ServiceError> {
        let node = self.get(id).await?;
        match node.unit_id {
            Some(unit_id) => Ok(unit::Entity::find_by_id(unit_id)
                .one(&*self.db)
                .await?
                .map(|u| u.digits)
                .unwrap_or(DEFAULT_UNIT_DIGITS)),
            None => Ok(DEFAULT_UNIT_DIGITS),
        }
    }

    /// Sales owning a line linked to the node, ascending
    pub async fn sales(&self, id: i64) -> Result<Vec<i64>, ServiceError> {
        let lines = SaleLineRepository::find_by_wbs(&*self.db, &[id]).await?;
        Ok(lines
            .into_iter()
            .map(|l| l.sale_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Nodes linked to at least one line of `sale_id`
    pub async fn find_by_sale(&self, sale_id: i64) -> Result<Vec<WbsModel>, ServiceError> {
        let db = &*self.db;
        let lines = SaleLineRepository::find_by_sale(db, sale_id).await?;
        let ids: Vec<i64> = lines
            .iter()
            .filter_map(|l| l.wbs_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut nodes = WbsRepository::find_by_ids(db, &ids).await?;
        nodes.sort_by_key(|n| sibling_order(n.sequence, n.id));
        Ok(nodes)
    }

    pub async fn wbs_tree(&self, sale_id: i64) -> Result<Vec<WbsModel>, ServiceError> {
        wbs_tree_of(&*self.db, sale_id).await
    }

    /// Dotted chapter number of each node, computed over the `wbs_tree` of
    /// every sale linked to the requested nodes. Nodes linked to no sale get
    /// `None`.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn chapter_numbers(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, Option<String>>, ServiceError> {
        let db = &*self.db;
        let mut result: HashMap<i64, Option<String>> = ids.iter().map(|&id| (id, None)).collect();

        let sale_ids: BTreeSet<i64> = SaleLineRepository::find_by_wbs(db, ids)
            .await?
            .into_iter()
            .map(|l| l.sale_id)
            .collect();

        for sale_id in sale_ids {
            let (roots, forest) = wbs_forest_of(db, sale_id).await?;
            for (id, number) in forest.chapter_numbers_from(&roots) {
                if let Some(slot) = result.get_mut(&id) {
                    *slot = Some(number);
                }
            }
        }
        Ok(result)
    }

    /// Checks the node's own fields and that every linked line shares its
    /// type, product and unit.
    pub async fn validate(&self, id: i64) -> Result<(), ServiceError> {
        let db = &*self.db;
        let node = WbsRepository::get(db, id).await?;
        if node.description.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "WBS {} has a blank description",
                id
            )));
        }
        check_product_unit(db, "WBS", node.node_type, node.product_id, node.unit_id).await?;

        let lines = SaleLineRepository::find_by_wbs(db, &[id]).await?;
        if let Some(line) = lines.iter().find(|l| !node.matches_line(l)) {
            return Err(ServiceError::ValidationError(format!(
                "sale line {} does not match type, product and unit of WBS \"{}\"",
                line.id, node.description
            )));
        }
        Ok(())
    }

    /// Deletes nodes and, through the database cascade, their descendants.
    /// Lines linked to a deleted node are detached.
    #[instrument(skip(self, ctx, ids), fields(count = ids.len()))]
    pub async fn delete(&self, ctx: &AccessContext, ids: &[i64]) -> Result<u64, ServiceError> {
        ctx.require(perm::WBS_DELETE)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for WBS deletion");
            ServiceError::DatabaseError(e)
        })?;
        let deleted = WbsRepository::delete_many(&txn, ids).await?;
        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit WBS deletion");
            ServiceError::DatabaseError(e)
        })?;

        counter!("sale_wbs.wbs.deleted", deleted);
        info!(deleted, "WBS nodes deleted");
        self.publish(ids.iter().map(|&id| Event::WbsDeleted(id)).collect())
            .await;
        Ok(deleted)
    }

    /// Writes a synchronization plan on `db`. Quoting runs this with the
    /// system context, since the nodes may be shared with other sales.
    pub async fn apply_plan<C: ConnectionTrait>(
        ctx: &AccessContext,
        db: &C,
        lines: &Forest<sale_line::Model>,
        nodes: &Forest<WbsModel>,
        plan: &SyncPlan,
    ) -> Result<Vec<Event>, ServiceError> {
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        ctx.require(perm::WBS_CREATE)?;
        ctx.require(perm::WBS_UPDATE)?;

        let mut created: HashMap<usize, WbsModel> = HashMap::new();
        let mut events = Vec::new();

        for mutation in &plan.mutations {
            match mutation {
                WbsMutation::Create {
                    slot,
                    line_id,
                    node,
                } => {
                    if node.description.trim().is_empty() {
                        return Err(ServiceError::ValidationError(format!(
                            "sale line {} needs a description to become a WBS node",
                            line_id
                        )));
                    }
                    let parent_id = node
                        .parent
                        .map(|p| resolve(&created, p))
                        .transpose()?;
                    let model = WbsRepository::create(
                        db,
                        WbsActiveModel {
                            parent_id: Set(parent_id),
                            sequence: Set(node.sequence),
                            node_type: Set(node.node_type),
                            description: Set(node.description.clone()),
                            product_id: Set(node.product_id),
                            unit_id: Set(node.unit_id),
                            ..Default::default()
                        },
                    )
                    .await?;
                    counter!("sale_wbs.wbs.created", 1);
                    info!(wbs_id = model.id, line_id, "WBS created from sale line");
                    events.push(Event::WbsCreated {
                        wbs_id: model.id,
                        line_id: Some(*line_id),
                    });
                    created.insert(*slot, model);
                }
                WbsMutation::Link { line_id, wbs } => {
                    let line = match lines.get(*line_id) {
                        Some(line) => line.clone(),
                        None => SaleLineRepository::get(db, *line_id).await?,
                    };
                    let node = match wbs {
                        WbsRef::Planned(slot) => created.get(slot).cloned().ok_or_else(|| {
                            ServiceError::InternalError(format!(
                                "WBS slot {} used before creation",
                                slot
                            ))
                        })?,
                        WbsRef::Existing(id) => match nodes.get(*id) {
                            Some(node) => node.clone(),
                            None => WbsRepository::get(db, *id).await?,
                        },
                    };
                    if !node.matches_line(&line) {
                        warn!(line_id, wbs_id = node.id, "sale line does not match WBS");
                        return Err(ServiceError::ValidationError(format!(
                            "sale line \"{}\" does not match type, product and unit of WBS \"{}\"",
                            line.description, node.description
                        )));
                    }
                    SaleLineRepository::set_wbs(db, line, Some(node.id)).await?;
                }
                WbsMutation::Reparent { wbs_id, parent } => {
                    let parent_id = parent.map(|p| resolve(&created, p)).transpose()?;
                    WbsRepository::set_parent(db, *wbs_id, parent_id).await?;
                    counter!("sale_wbs.wbs.reparented", 1);
                    info!(wbs_id, ?parent_id, "WBS moved");
                    events.push(Event::WbsReparented {
                        wbs_id: *wbs_id,
                        parent_id,
                    });
                }
            }
        }
        Ok(events)
    }

    /// Deletes the nodes among `candidates` that no sale line links to any
    /// more. Surviving children of a deleted node move up to its nearest
    /// surviving ancestor.
    pub async fn delete_orphans<C: ConnectionTrait>(
        ctx: &AccessContext,
        db: &C,
        candidates: &[i64],
    ) -> Result<Vec<Event>, ServiceError> {
        let linked = SaleLineRepository::linked_wbs_ids(db, candidates).await?;
        let doomed_nodes: Vec<WbsModel> = WbsRepository::find_by_ids(db, candidates)
            .await?
            .into_iter()
            .filter(|n| !linked.contains(&n.id))
            .collect();
        if doomed_nodes.is_empty() {
            return Ok(Vec::new());
        }
        ctx.require(perm::WBS_DELETE)?;

        let parent_of: HashMap<i64, Option<i64>> =
            doomed_nodes.iter().map(|n| (n.id, n.parent_id)).collect();
        let doomed: Vec<i64> = doomed_nodes.iter().map(|n| n.id).collect();
        let mut events = Vec::new();

        for child in WbsRepository::find_children(db, &doomed).await? {
            if parent_of.contains_key(&child.id) {
                continue;
            }
            let mut target = child.parent_id;
            let mut hops = 0;
            while let Some(p) = target {
                match parent_of.get(&p) {
                    Some(up) if hops <= parent_of.len() => {
                        target = *up;
                        hops += 1;
                    }
                    _ => break,
                }
            }
            if target.map_or(false, |t| parent_of.contains_key(&t)) {
                target = None;
            }
            WbsRepository::set_parent(db, child.id, target).await?;
            info!(wbs_id = child.id, parent_id = ?target, "WBS kept under surviving ancestor");
            events.push(Event::WbsReparented {
                wbs_id: child.id,
                parent_id: target,
            });
        }

        let deleted = WbsRepository::delete_many(db, &doomed).await?;
        counter!("sale_wbs.wbs.deleted", deleted);
        info!(deleted, "orphaned WBS nodes deleted");
        events.extend(doomed.into_iter().map(Event::WbsDeleted));
        Ok(events)
    }
}
