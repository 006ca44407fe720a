use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};

use crate::entities::currency::{Entity as Currency, Model as CurrencyModel};
use crate::entities::sale_order::{
    ActiveModel as SaleOrderActiveModel, Entity as SaleOrder, Model as SaleOrderModel, SaleState,
};
use crate::errors::{AppError, ServiceError};

/// Repository for sale order rows
#[derive(Debug, Clone, Copy, Default)]
pub struct SaleOrderRepository;

impl SaleOrderRepository {
    /// Find a sale order by ID
    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: i64,
    ) -> Result<Option<SaleOrderModel>, AppError> {
        SaleOrder::find_by_id(id)
            .one(db)
            .await
            .map_err(AppError::DatabaseError)
    }

    /// Find a sale order by ID, failing with `NotFound`
    pub async fn get<C: ConnectionTrait>(db: &C, id: i64) -> Result<SaleOrderModel, AppError> {
        Self::find_by_id(db, id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Sale", id))
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        order: SaleOrderActiveModel,
    ) -> Result<SaleOrderModel, AppError> {
        order.insert(db).await.map_err(AppError::DatabaseError)
    }

    pub async fn set_state<C: ConnectionTrait>(
        db: &C,
        order: SaleOrderModel,
        state: SaleState,
    ) -> Result<SaleOrderModel, AppError> {
        let mut active: SaleOrderActiveModel = order.into();
        active.state = Set(state);
        active.update(db).await.map_err(AppError::DatabaseError)
    }

    pub async fn set_number<C: ConnectionTrait>(
        db: &C,
        order: SaleOrderModel,
        number: String,
    ) -> Result<SaleOrderModel, AppError> {
        let mut active: SaleOrderActiveModel = order.into();
        active.number = Set(Some(number));
        active.update(db).await.map_err(AppError::DatabaseError)
    }

    /// Currency used to round the amounts of `order`
    pub async fn currency<C: ConnectionTrait>(
        db: &C,
        order: &SaleOrderModel,
    ) -> Result<CurrencyModel, AppError> {
        Currency::find_by_id(order.currency_id)
            .one(db)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| ServiceError::not_found("Currency", order.currency_id))
    }
}
