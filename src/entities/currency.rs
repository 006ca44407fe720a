use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "currencies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub code: String,
    pub name: String,
    /// Smallest representable amount, e.g. 0.01
    pub rounding: Decimal,
    pub digits: i32,
}

impl Model {
    /// Rounds `amount` to a multiple of the currency rounding (banker's rounding).
    pub fn round(&self, amount: Decimal) -> Decimal {
        if self.rounding.is_zero() {
            return amount;
        }
        ((amount / self.rounding).round() * self.rounding).round_dp(self.digits.max(0) as u32)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sale_order::Entity")]
    SaleOrders,
}

impl Related<super::sale_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SaleOrders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn currency(rounding: Decimal, digits: i32) -> Model {
        Model {
            id: 1,
            code: "EUR".into(),
            name: "Euro".into(),
            rounding,
            digits,
        }
    }

    #[test]
    fn rounds_to_cents() {
        let eur = currency(dec!(0.01), 2);
        assert_eq!(eur.round(dec!(10.004)), dec!(10.00));
        assert_eq!(eur.round(dec!(10.006)), dec!(10.01));
    }

    #[test]
    fn midpoint_rounds_to_even() {
        let eur = currency(dec!(0.01), 2);
        assert_eq!(eur.round(dec!(0.125)), dec!(0.12));
        assert_eq!(eur.round(dec!(0.135)), dec!(0.14));
    }

    #[test]
    fn coarse_rounding() {
        let chf = currency(dec!(0.05), 2);
        assert_eq!(chf.round(dec!(1.03)), dec!(1.05));
        assert_eq!(chf.round(dec!(1.02)), dec!(1.00));
    }
}
