#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sale_wbs::{
    auth::{consts as perm, AccessContext, AuthUser},
    config::WbsConfig,
    db::{self, DbConfig, DbPool},
    entities::{currency, product, sale_line, sale_order, unit, LineType},
    events::{Event, EventSender},
    services::{CreateSaleLineRequest, CreateSaleOrderRequest},
    AppServices,
};
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;

/// Services over a freshly migrated in-memory database with reference data.
pub struct TestEnv {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    pub events: mpsc::Receiver<Event>,
    pub currency_id: i64,
    /// "unit" category
    pub piece_id: i64,
    /// "unit" category, same as `piece_id`
    pub dozen_id: i64,
    /// "weight" category
    pub kilogram_id: i64,
    pub product_id: i64,
    pub service_product_id: i64,
}

impl TestEnv {
    pub async fn new() -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory())
            .await
            .expect("in-memory database");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let currency = currency::ActiveModel {
            code: Set("EUR".into()),
            name: Set("Euro".into()),
            rounding: Set(dec!(0.01)),
            digits: Set(2),
            ..Default::default()
        }
        .insert(&*db)
        .await
        .expect("currency");

        let piece = insert_unit(&db, "Unit", "u", "unit", 0).await;
        let dozen = insert_unit(&db, "Dozen", "dz", "unit", 0).await;
        let kilogram = insert_unit(&db, "Kilogram", "kg", "weight", 3).await;
        let product = insert_product(&db, "Brick", piece.id, true).await;
        let service_product = insert_product(&db, "Masonry", piece.id, true).await;

        let (tx, rx) = mpsc::channel(256);
        let services = AppServices::new(
            db.clone(),
            Some(Arc::new(EventSender::new(tx))),
            WbsConfig::default(),
        );

        Self {
            db,
            services,
            events: rx,
            currency_id: currency.id,
            piece_id: piece.id,
            dozen_id: dozen.id,
            kilogram_id: kilogram.id,
            product_id: product.id,
            service_product_id: service_product.id,
        }
    }

    pub async fn new_sale(&self) -> sale_order::Model {
        self.services
            .sales
            .create_order(
                &admin(),
                CreateSaleOrderRequest {
                    description: Some("Renovation".into()),
                    currency_id: self.currency_id,
                },
            )
            .await
            .expect("sale")
    }

    /// Adds a title, subtitle or comment
    pub async fn chapter(
        &self,
        sale_id: i64,
        parent_id: Option<i64>,
        sequence: i32,
        line_type: LineType,
        description: &str,
    ) -> sale_line::Model {
        self.services
            .lines
            .add_line(
                &admin(),
                CreateSaleLineRequest {
                    sale_id,
                    parent_id,
                    sequence: Some(sequence),
                    line_type,
                    description: description.into(),
                    note: None,
                    product_id: None,
                    unit_id: None,
                    quantity: Decimal::ZERO,
                    unit_price: None,
                },
            )
            .await
            .expect("chapter line")
    }

    /// Adds a plain line selling `product_id` by the piece
    pub async fn line(
        &self,
        sale_id: i64,
        parent_id: Option<i64>,
        sequence: i32,
        description: &str,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> sale_line::Model {
        self.services
            .lines
            .add_line(
                &admin(),
                CreateSaleLineRequest {
                    sale_id,
                    parent_id,
                    sequence: Some(sequence),
                    line_type: LineType::Line,
                    description: description.into(),
                    note: None,
                    product_id: Some(self.product_id),
                    unit_id: Some(self.piece_id),
                    quantity,
                    unit_price: Some(unit_price),
                },
            )
            .await
            .expect("plain line")
    }

    /// Adds a subtotal or subsubtotal
    pub async fn subtotal(
        &self,
        sale_id: i64,
        parent_id: Option<i64>,
        sequence: i32,
        line_type: LineType,
    ) -> sale_line::Model {
        self.chapter(sale_id, parent_id, sequence, line_type, "Subtotal")
            .await
    }

    pub async fn reload(&self, line: &sale_line::Model) -> sale_line::Model {
        self.services
            .lines
            .get_line(line.id)
            .await
            .expect("line exists")
    }

    /// Events published so far
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

async fn insert_unit(db: &DbPool, name: &str, symbol: &str, category: &str, digits: i32) -> unit::Model {
    unit::ActiveModel {
        name: Set(name.into()),
        symbol: Set(symbol.into()),
        category: Set(category.into()),
        digits: Set(digits),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("unit")
}

pub async fn insert_product(db: &DbPool, name: &str, default_unit_id: i64, salable: bool) -> product::Model {
    product::ActiveModel {
        name: Set(name.into()),
        salable: Set(salable),
        default_unit_id: Set(default_unit_id),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("product")
}

pub fn admin() -> AccessContext {
    AccessContext::user(AuthUser::new("admin").with_role("admin"))
}

/// A salesperson who may edit sales but holds no WBS permission
pub fn salesperson() -> AccessContext {
    AccessContext::user(AuthUser::new("sales-1").with_permissions([
        perm::SALES_CREATE,
        perm::SALES_UPDATE,
    ]))
}

pub fn nobody() -> AccessContext {
    AccessContext::user(AuthUser::new("guest"))
}
