use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

/// Kind of a sale line. Work breakdown structure nodes and invoice line
/// drafts use the same selection.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LineType {
    #[default]
    #[sea_orm(string_value = "line")]
    Line,
    #[sea_orm(string_value = "comment")]
    Comment,
    #[sea_orm(string_value = "title")]
    Title,
    #[sea_orm(string_value = "subtitle")]
    Subtitle,
    #[sea_orm(string_value = "subtotal")]
    Subtotal,
    #[sea_orm(string_value = "subsubtotal")]
    Subsubtotal,
}

impl LineType {
    /// Chapters are the only lines that may have children.
    pub fn is_chapter(self) -> bool {
        matches!(self, LineType::Title | LineType::Subtitle)
    }

    pub fn is_subtotal(self) -> bool {
        matches!(self, LineType::Subtotal | LineType::Subsubtotal)
    }

    /// The subtotal kind that closes a chapter of this type.
    pub fn closing_subtotal(self) -> Option<LineType> {
        match self {
            LineType::Title => Some(LineType::Subtotal),
            LineType::Subtitle => Some(LineType::Subsubtotal),
            _ => None,
        }
    }
}

/// The `sale_lines` table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sale_lines")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub sale_id: i64,
    /// Enclosing chapter of the same sale
    pub parent_id: Option<i64>,
    pub sequence: Option<i32>,
    pub line_type: LineType,
    pub description: String,
    pub note: Option<String>,
    pub product_id: Option<i64>,
    pub unit_id: Option<i64>,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    /// Work breakdown structure node this line is attached to
    pub wbs_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sale_order::Entity",
        from = "Column::SaleId",
        to = "super::sale_order::Column::Id"
    )]
    SaleOrder,
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ParentId",
        to = "Column::Id"
    )]
    Parent,
    #[sea_orm(
        belongs_to = "super::wbs::Entity",
        from = "Column::WbsId",
        to = "super::wbs::Column::Id"
    )]
    Wbs,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::unit::Entity",
        from = "Column::UnitId",
        to = "super::unit::Column::Id"
    )]
    Unit,
}

impl Related<super::sale_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SaleOrder.def()
    }
}

impl Related<super::wbs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wbs.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::unit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Unit.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
        }
        active_model.updated_at = Set(now);

        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapters_close_with_matching_subtotal() {
        assert_eq!(LineType::Title.closing_subtotal(), Some(LineType::Subtotal));
        assert_eq!(
            LineType::Subtitle.closing_subtotal(),
            Some(LineType::Subsubtotal)
        );
        assert_eq!(LineType::Line.closing_subtotal(), None);
    }

    #[test]
    fn only_titles_are_chapters() {
        assert!(LineType::Title.is_chapter());
        assert!(LineType::Subtitle.is_chapter());
        assert!(!LineType::Subtotal.is_chapter());
        assert!(!LineType::Comment.is_chapter());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&LineType::Subsubtotal).unwrap();
        assert_eq!(json, "\"subsubtotal\"");
        assert_eq!(LineType::default(), LineType::Line);
    }
}
