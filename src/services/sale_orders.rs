use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{DatabaseTransaction, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use validator::Validate;

use crate::{
    auth::{consts as perm, AccessContext},
    config::WbsConfig,
    db::{self, DbPool},
    entities::{
        currency,
        sale_line::{ActiveModel as SaleLineActiveModel, Model as SaleLineModel},
        sale_order::{ActiveModel as SaleOrderActiveModel, Model as SaleOrderModel},
        wbs::Model as WbsModel,
        SaleState,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::{SaleLineRepository, SaleOrderRepository},
    services::{
        sale_lines,
        tree::Forest,
        wbs::{wbs_forest_of, wbs_tree_of, WbsService},
        wbs_sync,
    },
};

/// Request for opening a new draft sale
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSaleOrderRequest {
    #[validate(length(max = 256, message = "Description is too long"))]
    pub description: Option<String>,
    pub currency_id: i64,
}

/// Service for sale orders and their transitions
#[derive(Clone)]
pub struct SaleOrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    config: WbsConfig,
}

impl SaleOrderService {
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

    async fn begin(&self, operation: &str) -> Result<DatabaseTransaction, ServiceError> {
        self.db.begin().await.map_err(|e| {
            error!(error = %e, operation, "Failed to start transaction");
            ServiceError::DatabaseError(e)
        })
    }

    async fn commit(txn: DatabaseTransaction, operation: &str) -> Result<(), ServiceError> {
        txn.commit().await.map_err(|e| {
            error!(error = %e, operation, "Failed to commit transaction");
            ServiceError::DatabaseError(e)
        })
    }

    /// Opens a new draft sale
    #[instrument(skip(self, ctx, request))]
    pub async fn create_order(
        &self,
        ctx: &AccessContext,
        request: CreateSaleOrderRequest,
    ) -> Result<SaleOrderModel, ServiceError> {
        ctx.require(perm::SALES_CREATE)?;
        request.validate()?;

        let db = &*self.db;
        currency::Entity::find_by_id(request.currency_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Currency", request.currency_id))?;

        let order = SaleOrderRepository::create(
            db,
            SaleOrderActiveModel {
                number: Set(None),
                description: Set(request.description),
                state: Set(SaleState::Draft),
                currency_id: Set(request.currency_id),
                ..Default::default()
            },
        )
        .await?;

        counter!("sale_wbs.sales.created", 1);
        info!(sale_id = order.id, actor = ctx.actor(), "sale created");
        self.publish(vec![Event::SaleCreated(order.id)]).await;
        Ok(order)
    }

    pub async fn get_order(&self, id: i64) -> Result<SaleOrderModel, ServiceError> {
        SaleOrderRepository::get(&*self.db, id).await
    }

    /// Every line of the sale, arranged as a forest
    pub async fn lines(&self, sale_id: i64) -> Result<Forest<SaleLineModel>, ServiceError> {
        SaleOrderRepository::get(&*self.db, sale_id).await?;
        Ok(Forest::new(
            SaleLineRepository::find_by_sale(&*self.db, sale_id).await?,
        ))
    }

    /// Top-level lines in sibling order
    pub async fn lines_tree(&self, sale_id: i64) -> Result<Vec<SaleLineModel>, ServiceError> {
        Ok(self.lines(sale_id).await?.roots().cloned().collect())
    }

    /// Root WBS nodes reached from the sale's lines
    pub async fn wbs_tree(&self, sale_id: i64) -> Result<Vec<WbsModel>, ServiceError> {
        SaleOrderRepository::get(&*self.db, sale_id).await?;
        wbs_tree_of(&*self.db, sale_id).await
    }

    pub async fn untaxed_amount(&self, sale_id: i64) -> Result<Decimal, ServiceError> {
        let db = &*self.db;
        let sale = SaleOrderRepository::get(db, sale_id).await?;
        let currency = SaleOrderRepository::currency(db, &sale).await?;
        let lines = Forest::new(SaleLineRepository::find_by_sale(db, sale_id).await?);
        Ok(sale_lines::untaxed_amount(&lines, &currency))
    }

    /// Moves a draft sale to quotation and mirrors its lines into work
    /// breakdown structure nodes, in one transaction.
    #[instrument(skip(self, ctx))]
    pub async fn quote(&self, ctx: &AccessContext, id: i64) -> Result<SaleOrderModel, ServiceError> {
        ctx.require(perm::SALES_UPDATE)?;
        let txn = self.begin("quote").await?;

        let sale = SaleOrderRepository::get(&txn, id).await?;
        if !sale.state.can_quote() {
            return Err(ServiceError::InvalidStatus(format!(
                "sale {} is {} and cannot be quoted",
                id, sale.state
            )));
        }

        let lines = Forest::new(SaleLineRepository::find_by_sale(&txn, id).await?);
        if lines.roots().next().is_none() {
            return Err(ServiceError::ValidationError(format!(
                "sale {} has no lines to quote",
                id
            )));
        }

        let mut sale = SaleOrderRepository::set_state(&txn, sale, SaleState::Quotation).await?;
        if sale.number.is_none() {
            let number = format!("{}{:05}", self.config.sale_number_prefix, sale.id);
            sale = SaleOrderRepository::set_number(&txn, sale, number).await?;
        }

        let (_, nodes) = wbs_forest_of(&txn, id).await?;
        let plan = wbs_sync::plan(&lines, &nodes)?;
        info!(
            sale_id = id,
            mutations = plan.mutations.len(),
            creations = plan.creations(),
            "synchronizing WBS"
        );

        let mut events = vec![Event::SaleQuoted(id)];
        events.extend(
            WbsService::apply_plan(&AccessContext::system(), &txn, &lines, &nodes, &plan).await?,
        );

        Self::commit(txn, "quote").await?;

        counter!("sale_wbs.sales.quoted", 1);
        info!(sale_id = id, actor = ctx.actor(), "sale quoted");
        self.publish(events).await;
        Ok(sale)
    }

    /// Returns a quoted or cancelled sale to draft, detaching its lines from
    /// their nodes and deleting the nodes no sale uses any more.
    #[instrument(skip(self, ctx))]
    pub async fn draft(&self, ctx: &AccessContext, id: i64) -> Result<SaleOrderModel, ServiceError> {
        ctx.require(perm::SALES_UPDATE)?;
        let txn = self.begin("draft").await?;

        let sale = SaleOrderRepository::get(&txn, id).await?;
        if !sale.state.can_draft() {
            return Err(ServiceError::InvalidStatus(format!(
                "sale {} is {} and cannot go back to draft",
                id, sale.state
            )));
        }

        let candidates: Vec<i64> = SaleLineRepository::find_by_sale(&txn, id)
            .await?
            .iter()
            .filter_map(|l| l.wbs_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let sale = SaleOrderRepository::set_state(&txn, sale, SaleState::Draft).await?;
        let detached = SaleLineRepository::clear_wbs_for_sale(&txn, id).await?;

        let mut events = vec![Event::SaleDrafted(id)];
        events.extend(
            WbsService::delete_orphans(&AccessContext::system(), &txn, &candidates).await?,
        );

        Self::commit(txn, "draft").await?;

        info!(sale_id = id, detached, actor = ctx.actor(), "sale back to draft");
        self.publish(events).await;
        Ok(sale)
    }

    /// Cancels a draft or quoted sale. Its WBS links are kept until the sale
    /// goes back to draft.
    #[instrument(skip(self, ctx))]
    pub async fn cancel(&self, ctx: &AccessContext, id: i64) -> Result<SaleOrderModel, ServiceError> {
        ctx.require(perm::SALES_UPDATE)?;
        let db = &*self.db;
        let sale = SaleOrderRepository::get(db, id).await?;
        if !matches!(sale.state, SaleState::Draft | SaleState::Quotation) {
            return Err(ServiceError::InvalidStatus(format!(
                "sale {} is {} and cannot be cancelled",
                id, sale.state
            )));
        }
        let sale = SaleOrderRepository::set_state(db, sale, SaleState::Cancelled).await?;
        info!(sale_id = id, actor = ctx.actor(), "sale cancelled");
        Ok(sale)
    }

    /// Copies a sale as a new draft. Top-level lines are copied with their
    /// whole subtree, detached from any WBS node.
    #[instrument(skip(self, ctx))]
    pub async fn copy(&self, ctx: &AccessContext, id: i64) -> Result<SaleOrderModel, ServiceError> {
        ctx.require(perm::SALES_CREATE)?;

        let copy = db::transaction(&self.db, move |txn| {
            Box::pin(async move {
                let source = SaleOrderRepository::get(txn, id).await?;
                let copy = SaleOrderRepository::create(
                    txn,
                    SaleOrderActiveModel {
                        number: Set(None),
                        description: Set(source.description.clone()),
                        state: Set(SaleState::Draft),
                        currency_id: Set(source.currency_id),
                        ..Default::default()
                    },
                )
                .await?;

                let lines = Forest::new(SaleLineRepository::find_by_sale(txn, id).await?);
                let mut copied: HashMap<i64, i64> = HashMap::with_capacity(lines.len());
                for line in lines.preorder() {
                    let parent_id = lines
                        .parent(line.id)
                        .and_then(|p| copied.get(&p.id).copied());
                    let new_line = SaleLineRepository::create(
                        txn,
                        SaleLineActiveModel {
                            sale_id: Set(copy.id),
                            parent_id: Set(parent_id),
                            sequence: Set(line.sequence),
                            line_type: Set(line.line_type),
                            description: Set(line.description.clone()),
                            note: Set(line.note.clone()),
                            product_id: Set(line.product_id),
                            unit_id: Set(line.unit_id),
                            quantity: Set(line.quantity),
                            unit_price: Set(line.unit_price),
                            wbs_id: Set(None),
                            ..Default::default()
                        },
                    )
                    .await?;
                    copied.insert(line.id, new_line.id);
                }
                Ok(copy)
            })
        })
        .await?;

        counter!("sale_wbs.sales.copied", 1);
        info!(source_id = id, copy_id = copy.id, "sale copied");
        self.publish(vec![Event::SaleCopied {
            source_id: id,
            copy_id: copy.id,
        }])
        .await;
        Ok(copy)
    }
}
