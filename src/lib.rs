//! Sale WBS Library
//!
//! Sale orders whose lines form a chapter hierarchy (titles, subtitles and
//! their subtotals), mirrored into a tree of work breakdown structure nodes
//! when the sale is quoted.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod repositories;
pub mod services;

use std::sync::Arc;

use tokio::sync::mpsc;

/// Services sharing one pool, one event channel and one configuration
#[derive(Clone)]
pub struct AppServices {
    pub sales: Arc<services::SaleOrderService>,
    pub lines: Arc<services::SaleLineService>,
    pub wbs: Arc<services::WbsService>,
    pub invoicing: Arc<services::InvoicingService>,
}

impl AppServices {
    pub fn new(
        db: Arc<db::DbPool>,
        event_sender: Option<Arc<events::EventSender>>,
        config: config::WbsConfig,
    ) -> Self {
        Self {
            sales: Arc::new(services::SaleOrderService::new(
                db.clone(),
                event_sender.clone(),
                config.clone(),
            )),
            lines: Arc::new(services::SaleLineService::new(db.clone(), config.clone())),
            wbs: Arc::new(services::WbsService::new(db.clone(), event_sender, config)),
            invoicing: Arc::new(services::InvoicingService::new(db)),
        }
    }

    /// Builds the services around a fresh event channel whose receiving end
    /// is drained by [`events::process_events`] on a background task.
    pub fn with_event_processing(db: Arc<db::DbPool>, config: &config::AppConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(rx));
        Self::new(
            db,
            Some(Arc::new(events::EventSender::new(tx))),
            config.wbs.clone(),
        )
    }
}

pub mod prelude {
    pub use crate::auth::{AccessContext, AuthUser};
    pub use crate::config::{AppConfig, WbsConfig};
    pub use crate::db::{DbConfig, DbPool};
    pub use crate::entities::{LineType, SaleState};
    pub use crate::errors::*;
    pub use crate::events::{Event, EventSender};
    pub use crate::services::*;
    pub use crate::AppServices;
}
