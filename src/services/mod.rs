// Hierarchy helpers
pub mod tree;
pub mod wbs_sync;

// Sales
pub mod invoicing;
pub mod sale_lines;
pub mod sale_orders;

// Work breakdown structures
pub mod wbs;

pub use invoicing::{InvoiceLineDraft, InvoicingService};
pub use sale_lines::{CreateSaleLineRequest, SaleLineService, UpdateSaleLineRequest};
pub use sale_orders::{CreateSaleOrderRequest, SaleOrderService};
pub use tree::{Forest, TreeRecord};
pub use wbs::{CreateWbsRequest, WbsService};
