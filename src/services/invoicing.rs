use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    db::DbPool,
    entities::{sale_line::Model as SaleLineModel, LineType},
    errors::AppError,
    repositories::{SaleLineRepository, SaleOrderRepository},
    services::tree::Forest,
};

/// Unsaved invoice line derived from a sale line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineDraft {
    pub line_type: LineType,
    pub description: String,
    pub note: Option<String>,
    /// Sale line the draft comes from
    pub origin_line_id: i64,
    pub sequence: Option<i32>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub product_id: Option<i64>,
    pub unit_id: Option<i64>,
}

impl InvoiceLineDraft {
    fn invoiced(line: &SaleLineModel) -> Self {
        Self {
            line_type: LineType::Line,
            description: line.description.clone(),
            note: line.note.clone(),
            origin_line_id: line.id,
            sequence: line.sequence,
            quantity: Some(line.quantity),
            unit_price: Some(line.unit_price.unwrap_or(Decimal::ZERO)),
            product_id: line.product_id,
            unit_id: line.unit_id,
        }
    }

    /// Keeps a line that is not invoiced visible as structure: plain lines
    /// become comments, chapters and subtotals keep their type.
    fn placeholder(line: &SaleLineModel) -> Self {
        let line_type = match line.line_type {
            LineType::Line => LineType::Comment,
            other => other,
        };
        Self {
            line_type,
            description: line.description.clone(),
            note: line.note.clone(),
            origin_line_id: line.id,
            sequence: line.sequence,
            quantity: None,
            unit_price: None,
            product_id: None,
            unit_id: None,
        }
    }
}

/// Invoice line drafts for the `selected` plain lines of a sale. As soon as
/// one line is invoiced, every other line contributes a placeholder so the
/// chapter layout survives on the invoice.
pub fn build_invoice_lines(
    lines: &Forest<SaleLineModel>,
    selected: &HashSet<i64>,
) -> BTreeMap<i64, Vec<InvoiceLineDraft>> {
    let mut result: BTreeMap<i64, Vec<InvoiceLineDraft>> = lines
        .iter()
        .filter(|l| l.line_type == LineType::Line && selected.contains(&l.id))
        .map(|l| (l.id, vec![InvoiceLineDraft::invoiced(l)]))
        .collect();

    if result.is_empty() {
        return result;
    }

    for line in lines.iter() {
        result
            .entry(line.id)
            .or_insert_with(|| vec![InvoiceLineDraft::placeholder(line)]);
    }
    result
}

pub struct InvoicingService {
    db: Arc<DbPool>,
}

impl InvoicingService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Invoice line drafts keyed by originating sale line
    pub async fn invoice_lines(
        &self,
        sale_id: i64,
        selected: &HashSet<i64>,
    ) -> Result<BTreeMap<i64, Vec<InvoiceLineDraft>>, AppError> {
        let db = &*self.db;
        SaleOrderRepository::get(db, sale_id).await?;
        let lines = Forest::new(SaleLineRepository::find_by_sale(db, sale_id).await?);
        let drafts = build_invoice_lines(&lines, selected);
        debug!(sale_id, drafts = drafts.len(), "invoice lines prepared");
        Ok(drafts)
    }
}
