// Reference data
pub mod currency;
pub mod product;
pub mod unit;

// Sales and work breakdown structures
pub mod sale_line;
pub mod sale_order;
pub mod wbs;

pub use sale_line::LineType;
pub use sale_order::SaleState;
