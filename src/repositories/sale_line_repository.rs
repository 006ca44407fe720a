use std::collections::HashSet;

use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

use crate::entities::sale_line::{
    ActiveModel as SaleLineActiveModel, Column, Entity as SaleLine, Model as SaleLineModel,
};
use crate::errors::{AppError, ServiceError};

/// Repository for sale line rows
#[derive(Debug, Clone, Copy, Default)]
pub struct SaleLineRepository;

impl SaleLineRepository {
    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: i64,
    ) -> Result<Option<SaleLineModel>, AppError> {
        SaleLine::find_by_id(id)
            .one(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn get<C: ConnectionTrait>(db: &C, id: i64) -> Result<SaleLineModel, AppError> {
        Self::find_by_id(db, id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Sale line", id))
    }

    pub async fn find_by_ids<C: ConnectionTrait>(
        db: &C,
        ids: &[i64],
    ) -> Result<Vec<SaleLineModel>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        SaleLine::find()
            .filter(Column::Id.is_in(ids.iter().copied()))
            .all(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    /// Every line of a sale, all levels
    pub async fn find_by_sale<C: ConnectionTrait>(
        db: &C,
        sale_id: i64,
    ) -> Result<Vec<SaleLineModel>, AppError> {
        SaleLine::find()
            .filter(Column::SaleId.eq(sale_id))
            .order_by_asc(Column::Id)
            .all(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn find_by_sales<C: ConnectionTrait>(
        db: &C,
        sale_ids: &[i64],
    ) -> Result<Vec<SaleLineModel>, AppError> {
        if sale_ids.is_empty() {
            return Ok(Vec::new());
        }
        SaleLine::find()
            .filter(Column::SaleId.is_in(sale_ids.iter().copied()))
            .order_by_asc(Column::Id)
            .all(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn find_children<C: ConnectionTrait>(
        db: &C,
        parent_id: i64,
    ) -> Result<Vec<SaleLineModel>, AppError> {
        SaleLine::find()
            .filter(Column::ParentId.eq(parent_id))
            .order_by_asc(Column::Id)
            .all(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    /// Lines attached to any of `wbs_ids`
    pub async fn find_by_wbs<C: ConnectionTrait>(
        db: &C,
        wbs_ids: &[i64],
    ) -> Result<Vec<SaleLineModel>, AppError> {
        if wbs_ids.is_empty() {
            return Ok(Vec::new());
        }
        SaleLine::find()
            .filter(Column::WbsId.is_in(wbs_ids.iter().copied()))
            .order_by_asc(Column::Id)
            .all(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    /// Subset of `wbs_ids` that still has at least one linked line
    pub async fn linked_wbs_ids<C: ConnectionTrait>(
        db: &C,
        wbs_ids: &[i64],
    ) -> Result<HashSet<i64>, AppError> {
        if wbs_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<Option<i64>> = SaleLine::find()
            .select_only()
            .column(Column::WbsId)
            .distinct()
            .filter(Column::WbsId.is_in(wbs_ids.iter().copied()))
            .into_tuple()
            .all(db)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(rows.into_iter().flatten().collect())
    }

    /// Sum of line quantities grouped by WBS node, for one batch of ids
    pub async fn sum_quantity_by_wbs<C: ConnectionTrait>(
        db: &C,
        wbs_ids: &[i64],
    ) -> Result<Vec<(i64, Decimal)>, AppError> {
        if wbs_ids.is_empty() {
            return Ok(Vec::new());
        }
        SaleLine::find()
            .select_only()
            .column(Column::WbsId)
            .column_as(Column::Quantity.sum(), "quantity")
            .filter(Column::WbsId.is_in(wbs_ids.iter().copied()))
            .group_by(Column::WbsId)
            .into_tuple::<(i64, Decimal)>()
            .all(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        line: SaleLineActiveModel,
    ) -> Result<SaleLineModel, AppError> {
        line.insert(db).await.map_err(AppError::DatabaseError)
    }

    pub async fn update<C: ConnectionTrait>(
        db: &C,
        line: SaleLineActiveModel,
    ) -> Result<SaleLineModel, AppError> {
        line.update(db).await.map_err(AppError::DatabaseError)
    }

    pub async fn set_wbs<C: ConnectionTrait>(
        db: &C,
        line: SaleLineModel,
        wbs_id: Option<i64>,
    ) -> Result<SaleLineModel, AppError> {
        let mut active: SaleLineActiveModel = line.into();
        active.wbs_id = Set(wbs_id);
        active.update(db).await.map_err(AppError::DatabaseError)
    }

    /// Detaches every line of `sale_id` from its WBS node
    pub async fn clear_wbs_for_sale<C: ConnectionTrait>(
        db: &C,
        sale_id: i64,
    ) -> Result<u64, AppError> {
        let result = SaleLine::update_many()
            .col_expr(Column::WbsId, Expr::value(Option::<i64>::None))
            .col_expr(Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(Column::SaleId.eq(sale_id))
            .filter(Column::WbsId.is_not_null())
            .exec(db)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected)
    }

    pub async fn delete<C: ConnectionTrait>(db: &C, id: i64) -> Result<u64, AppError> {
        let result = SaleLine::delete_by_id(id)
            .exec(db)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected)
    }
}
