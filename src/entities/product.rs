use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub salable: bool,
    pub default_unit_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::unit::Entity",
        from = "Column::DefaultUnitId",
        to = "super::unit::Column::Id"
    )]
    DefaultUnit,
}

impl Related<super::unit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DefaultUnit.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
