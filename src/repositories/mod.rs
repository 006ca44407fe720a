//! Query helpers over the sea-orm entities.
//!
//! Repositories are stateless and take the connection per call, so the same
//! function serves a pooled connection and an open transaction.

pub mod sale_line_repository;
pub mod sale_order_repository;
pub mod wbs_repository;

pub use sale_line_repository::SaleLineRepository;
pub use sale_order_repository::SaleOrderRepository;
pub use wbs_repository::WbsRepository;
