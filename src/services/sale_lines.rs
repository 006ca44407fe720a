use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    auth::{consts as perm, AccessContext},
    config::WbsConfig,
    db::DbPool,
    entities::{
        currency,
        sale_line::{ActiveModel as SaleLineActiveModel, Model as SaleLineModel},
        LineType, SaleState,
    },
    errors::ServiceError,
    repositories::{SaleLineRepository, SaleOrderRepository, WbsRepository},
    services::{
        tree::{sibling_order, Forest},
        wbs::check_product_unit,
        wbs_sync::{NewWbs, WbsRef},
    },
};

/// Request for adding a line to a draft sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CreateSaleLineRequest {
    pub sale_id: i64,
    pub parent_id: Option<i64>,
    pub sequence: Option<i32>,
    #[serde(default)]
    pub line_type: LineType,
    #[serde(default)]
    #[validate(length(max = 1024, message = "Description is too long"))]
    pub description: String,
    pub note: Option<String>,
    pub product_id: Option<i64>,
    pub unit_id: Option<i64>,
    #[serde(default)]
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
}

/// Partial update of a line. `None` leaves a field untouched; for nullable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateSaleLineRequest {
    pub parent_id: Option<Option<i64>>,
    pub sequence: Option<Option<i32>>,
    pub line_type: Option<LineType>,
    #[validate(length(max = 1024, message = "Description is too long"))]
    pub description: Option<String>,
    pub note: Option<Option<String>>,
    pub product_id: Option<Option<i64>>,
    pub unit_id: Option<Option<i64>>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Option<Decimal>>,
    pub wbs_id: Option<Option<i64>>,
}

impl UpdateSaleLineRequest {
    /// Fields that only a draft sale lets through. Product, quantity, unit,
    /// unit price and WBS stay editable afterwards.
    fn locked_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.parent_id.is_some() {
            fields.push("parent");
        }
        if self.sequence.is_some() {
            fields.push("sequence");
        }
        if self.line_type.is_some() {
            fields.push("type");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.note.is_some() {
            fields.push("note");
        }
        fields
    }
}

/// Currency-rounded `quantity × unit_price`; a missing price counts as 0.
pub fn line_amount(line: &SaleLineModel, currency: &currency::Model) -> Decimal {
    currency.round(line.quantity * line.unit_price.unwrap_or(Decimal::ZERO))
}

/// Running total over the children of `parent_id` up to `target`,
/// descending into nested chapters and restarting at every earlier line
/// of the target's type.
fn nested_subtotal(
    lines: &Forest<SaleLineModel>,
    currency: &currency::Model,
    parent_id: i64,
    target: &SaleLineModel,
) -> Decimal {
    let mut subtotal = Decimal::ZERO;
    for sibling in lines.children(parent_id) {
        if lines.has_children(sibling.id) {
            subtotal += nested_subtotal(lines, currency, sibling.id, target);
        }
        if sibling.line_type == LineType::Line {
            subtotal += line_amount(sibling, currency);
        } else if sibling.line_type == target.line_type {
            if sibling.id == target.id {
                return subtotal;
            }
            subtotal = Decimal::ZERO;
        }
    }
    subtotal
}

/// Running total over every line of the sale, ignoring the hierarchy.
fn flat_subtotal(
    lines: &Forest<SaleLineModel>,
    currency: &currency::Model,
    target: &SaleLineModel,
) -> Decimal {
    let mut subtotal = Decimal::ZERO;
    for line in lines.iter() {
        if line.line_type == LineType::Line {
            subtotal += line_amount(line, currency);
        } else if line.line_type == target.line_type {
            if line.id == target.id {
                break;
            }
            subtotal = Decimal::ZERO;
        }
    }
    subtotal
}

/// Amount of line `id` within the full line forest of its sale.
///
/// Plain lines yield their rounded amount. A subtotal directly inside a
/// title, or a subsubtotal directly inside a subtitle, sums its chapter
/// since the previous subtotal of the same kind; any other subtotal sums
/// the whole sale that way. Other line types have no amount.
pub fn amount(
    lines: &Forest<SaleLineModel>,
    currency: &currency::Model,
    id: i64,
) -> Option<Decimal> {
    let line = lines.get(id)?;
    match line.line_type {
        LineType::Line => Some(line_amount(line, currency)),
        LineType::Subtotal | LineType::Subsubtotal => {
            let chapter = lines
                .parent(id)
                .filter(|p| p.line_type.closing_subtotal() == Some(line.line_type));
            Some(match chapter {
                Some(chapter) => nested_subtotal(lines, currency, chapter.id, line),
                None => flat_subtotal(lines, currency, line),
            })
        }
        _ => None,
    }
}

/// Sum of the amounts of the plain lines of a sale.
pub fn untaxed_amount(lines: &Forest<SaleLineModel>, currency: &currency::Model) -> Decimal {
    lines
        .iter()
        .filter(|l| l.line_type == LineType::Line)
        .map(|l| line_amount(l, currency))
        .sum()
}

/// Service for hierarchical sale lines
#[derive(Clone)]
pub struct SaleLineService {
    db: Arc<DbPool>,
    config: WbsConfig,
}

impl SaleLineService {
    pub fn new(db: Arc<DbPool>, config: WbsConfig) -> Self {
        Self { db, config }
    }

    async fn check_parent<C: ConnectionTrait>(
        db: &C,
        sale_id: i64,
        line_id: Option<i64>,
        parent_id: i64,
    ) -> Result<(), ServiceError> {
        let parent = SaleLineRepository::get(db, parent_id).await?;
        if parent.sale_id != sale_id {
            return Err(ServiceError::ValidationError(format!(
                "parent line {} belongs to another sale",
                parent_id
            )));
        }
        if !parent.line_type.is_chapter() {
            return Err(ServiceError::ValidationError(format!(
                "parent line {} is a {}, not a title or subtitle",
                parent_id, parent.line_type
            )));
        }

        if let Some(line_id) = line_id {
            let mut current = Some(parent);
            while let Some(ancestor) = current {
                if ancestor.id == line_id {
                    return Err(ServiceError::ValidationError(format!(
                        "line {} cannot be nested under its own descendant {}",
                        line_id, parent_id
                    )));
                }
                current = match ancestor.parent_id {
                    Some(p) => Some(SaleLineRepository::get(db, p).await?),
                    None => None,
                };
            }
        }
        Ok(())
    }

    /// Adds a line to a draft sale
    #[instrument(skip(self, ctx, request), fields(sale_id = request.sale_id))]
    pub async fn add_line(
        &self,
        ctx: &AccessContext,
        request: CreateSaleLineRequest,
    ) -> Result<SaleLineModel, ServiceError> {
        ctx.require(perm::SALES_UPDATE)?;
        request.validate()?;

        let db = &*self.db;
        let sale = SaleOrderRepository::get(db, request.sale_id).await?;
        if sale.state != SaleState::Draft {
            return Err(ServiceError::InvalidStatus(format!(
                "lines can only be added to draft sales, sale {} is {}",
                sale.id, sale.state
            )));
        }
        if let Some(parent_id) = request.parent_id {
            Self::check_parent(db, sale.id, None, parent_id).await?;
        }
        check_product_unit(
            db,
            "sale line",
            request.line_type,
            request.product_id,
            request.unit_id,
        )
        .await?;

        let line = SaleLineRepository::create(
            db,
            SaleLineActiveModel {
                sale_id: Set(request.sale_id),
                parent_id: Set(request.parent_id),
                sequence: Set(request.sequence),
                line_type: Set(request.line_type),
                description: Set(request.description),
                note: Set(request.note),
                product_id: Set(request.product_id),
                unit_id: Set(request.unit_id),
                quantity: Set(request.quantity),
                unit_price: Set(request.unit_price),
                wbs_id: Set(None),
                ..Default::default()
            },
        )
        .await?;

        info!(line_id = line.id, "sale line added");
        Ok(line)
    }

    /// Updates a line. Outside the draft state only product, quantity,
    /// unit, unit price and WBS may change.
    #[instrument(skip(self, ctx, request))]
    pub async fn update_line(
        &self,
        ctx: &AccessContext,
        id: i64,
        request: UpdateSaleLineRequest,
    ) -> Result<SaleLineModel, ServiceError> {
        ctx.require(perm::SALES_UPDATE)?;
        request.validate()?;

        let db = &*self.db;
        let line = SaleLineRepository::get(db, id).await?;
        let sale = SaleOrderRepository::get(db, line.sale_id).await?;

        let locked = request.locked_fields();
        if sale.state != SaleState::Draft && !locked.is_empty() {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot change {} of a line on {} sale {}",
                locked.join(", "),
                sale.state,
                sale.id
            )));
        }

        let mut updated = line.clone();
        if let Some(parent_id) = request.parent_id {
            if let Some(parent_id) = parent_id {
                Self::check_parent(db, line.sale_id, Some(id), parent_id).await?;
            }
            updated.parent_id = parent_id;
        }
        if let Some(sequence) = request.sequence {
            updated.sequence = sequence;
        }
        if let Some(line_type) = request.line_type {
            if !line_type.is_chapter()
                && !SaleLineRepository::find_children(db, id).await?.is_empty()
            {
                return Err(ServiceError::ValidationError(format!(
                    "line {} has children and must stay a title or subtitle",
                    id
                )));
            }
            updated.line_type = line_type;
        }
        if let Some(description) = request.description {
            updated.description = description;
        }
        if let Some(note) = request.note {
            updated.note = note;
        }
        if let Some(product_id) = request.product_id {
            updated.product_id = product_id;
        }
        if let Some(unit_id) = request.unit_id {
            updated.unit_id = unit_id;
        }
        if let Some(quantity) = request.quantity {
            updated.quantity = quantity;
        }
        if let Some(unit_price) = request.unit_price {
            updated.unit_price = unit_price;
        }
        if let Some(wbs_id) = request.wbs_id {
            updated.wbs_id = wbs_id;
        }

        check_product_unit(
            db,
            "sale line",
            updated.line_type,
            updated.product_id,
            updated.unit_id,
        )
        .await?;
        if let Some(wbs_id) = updated.wbs_id {
            let node = WbsRepository::get(db, wbs_id).await?;
            if !node.matches_line(&updated) {
                return Err(ServiceError::ValidationError(format!(
                    "WBS \"{}\" does not match type, product and unit of sale line {}",
                    node.description, id
                )));
            }
        }

        let mut active: SaleLineActiveModel = line.into();
        active.parent_id = Set(updated.parent_id);
        active.sequence = Set(updated.sequence);
        active.line_type = Set(updated.line_type);
        active.description = Set(updated.description);
        active.note = Set(updated.note);
        active.product_id = Set(updated.product_id);
        active.unit_id = Set(updated.unit_id);
        active.quantity = Set(updated.quantity);
        active.unit_price = Set(updated.unit_price);
        active.wbs_id = Set(updated.wbs_id);

        let saved = SaleLineRepository::update(db, active).await?;
        info!(line_id = id, "sale line updated");
        Ok(saved)
    }

    /// Removes a line of a draft sale together with its children
    #[instrument(skip(self, ctx))]
    pub async fn remove_line(&self, ctx: &AccessContext, id: i64) -> Result<(), ServiceError> {
        ctx.require(perm::SALES_UPDATE)?;
        let db = &*self.db;
        let line = SaleLineRepository::get(db, id).await?;
        let sale = SaleOrderRepository::get(db, line.sale_id).await?;
        if sale.state != SaleState::Draft {
            return Err(ServiceError::InvalidStatus(format!(
                "lines can only be removed from draft sales, sale {} is {}",
                sale.id, sale.state
            )));
        }
        SaleLineRepository::delete(db, id).await?;
        info!(line_id = id, "sale line removed");
        Ok(())
    }

    pub async fn get_line(&self, id: i64) -> Result<SaleLineModel, ServiceError> {
        SaleLineRepository::get(&*self.db, id).await
    }

    /// Direct children in sibling order
    pub async fn children(&self, id: i64) -> Result<Vec<SaleLineModel>, ServiceError> {
        let mut children = SaleLineRepository::find_children(&*self.db, id).await?;
        children.sort_by_key(|l| sibling_order(l.sequence, l.id));
        Ok(children)
    }

    /// Amount of a line; `None` for comments and chapters.
    #[instrument(skip(self))]
    pub async fn amount(&self, id: i64) -> Result<Option<Decimal>, ServiceError> {
        let db = &*self.db;
        let line = SaleLineRepository::get(db, id).await?;
        let sale = SaleOrderRepository::get(db, line.sale_id).await?;
        let currency = SaleOrderRepository::currency(db, &sale).await?;
        let lines = Forest::new(SaleLineRepository::find_by_sale(db, sale.id).await?);
        Ok(amount(&lines, &currency, id))
    }

    /// Dotted chapter number of each line within its sale. Ids that do not
    /// exist map to `None`.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn chapter_numbers(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, Option<String>>, ServiceError> {
        let db = &*self.db;
        let mut result: HashMap<i64, Option<String>> = ids.iter().map(|&id| (id, None)).collect();
        let sale_ids: BTreeSet<i64> = SaleLineRepository::find_by_ids(db, ids)
            .await?
            .into_iter()
            .map(|l| l.sale_id)
            .collect();

        for sale_id in sale_ids {
            let lines = Forest::new(SaleLineRepository::find_by_sale(db, sale_id).await?);
            for (id, number) in lines.chapter_numbers() {
                if let Some(slot) = result.get_mut(&id) {
                    *slot = Some(number);
                }
            }
        }
        Ok(result)
    }

    /// Builds, without saving, the subtotal line closing a chapter. When
    /// the chapter has children the subtotal goes inside it, last;
    /// otherwise it is placed next to the chapter with `sequence`.
    pub async fn subtotal_for(
        &self,
        chapter_id: i64,
        sequence: Option<i32>,
    ) -> Result<CreateSaleLineRequest, ServiceError> {
        let db = &*self.db;
        let chapter = SaleLineRepository::get(db, chapter_id).await?;
        let line_type = chapter.line_type.closing_subtotal().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "line {} is a {}, not a title or subtitle",
                chapter_id, chapter.line_type
            ))
        })?;
        let has_children = !SaleLineRepository::find_children(db, chapter_id)
            .await?
            .is_empty();

        let (parent_id, sequence) = if has_children {
            (Some(chapter.id), Some(self.config.subtotal_sequence))
        } else {
            (chapter.parent_id, sequence)
        };

        Ok(CreateSaleLineRequest {
            sale_id: chapter.sale_id,
            parent_id,
            sequence,
            line_type,
            description: format!("Subtotal {}", chapter.description),
            note: None,
            product_id: None,
            unit_id: None,
            quantity: Decimal::ZERO,
            unit_price: None,
        })
    }

    /// The node a line would become under `parent`, without saving it
    pub async fn work_breakdown_structure(
        &self,
        line_id: i64,
        parent: Option<i64>,
    ) -> Result<NewWbs, ServiceError> {
        let line = SaleLineRepository::get(&*self.db, line_id).await?;
        Ok(NewWbs::from_line(&line, parent.map(WbsRef::Existing)))
    }
}
