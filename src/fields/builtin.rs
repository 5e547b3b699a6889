//! Built-in computation fields
//!
//! Value fields aggregate `value`; the quantity variants aggregate
//! `quantity` and are not summable.

use crate::fields::spec::{ComputationField, DateScope, FieldRef, Resolver};

pub const DEBIT: &str = "__debit__";
pub const CREDIT: &str = "__credit__";
pub const TOTAL: &str = "__total__";
pub const OPENING_BALANCE: &str = "__fb__";
pub const BALANCE: &str = "__balance__";
pub const PERCENT_TO_TOTAL_BALANCE: &str = "__percent_to_total_balance__";
pub const DEBIT_QUANTITY: &str = "__debit_quantity__";
pub const CREDIT_QUANTITY: &str = "__credit_quantity__";
pub const TOTAL_QUANTITY: &str = "__total_quantity__";
pub const OPENING_QUANTITY: &str = "__fb_quantity__";
pub const BALANCE_QUANTITY: &str = "__balance_quantity__";

fn quantity(field: ComputationField) -> ComputationField {
    field
        .calculation(crate::source::CalculationMethod::Sum, "quantity")
        .summable(false)
}

/// Every built-in field, dependencies before dependents
pub fn builtin_fields() -> Vec<FieldRef> {
    vec![
        ComputationField::new(DEBIT)
            .verbose("Debit")
            .resolver(Resolver::DebitOnly)
            .into_ref(),
        ComputationField::new(CREDIT)
            .verbose("Credit")
            .resolver(Resolver::CreditOnly)
            .into_ref(),
        ComputationField::new(TOTAL)
            .verbose("Sum of value")
            .requires(DEBIT)
            .requires(CREDIT)
            .into_ref(),
        ComputationField::new(OPENING_BALANCE)
            .verbose("opening balance")
            .date_scope(DateScope::Before)
            .resolver(Resolver::OpeningBalance)
            .into_ref(),
        ComputationField::new(BALANCE)
            .verbose("Closing Total")
            .requires(OPENING_BALANCE)
            .resolver(Resolver::ClosingBalance {
                opening: OPENING_BALANCE.to_string(),
            })
            .into_ref(),
        ComputationField::new(PERCENT_TO_TOTAL_BALANCE)
            .verbose("%")
            .requires(BALANCE)
            .prevent_group_by(true)
            .resolver(Resolver::PercentageOfTotal {
                of: BALANCE.to_string(),
            })
            .into_ref(),
        quantity(ComputationField::new(DEBIT_QUANTITY))
            .verbose("Debit QTY")
            .resolver(Resolver::DebitOnly)
            .into_ref(),
        quantity(ComputationField::new(CREDIT_QUANTITY))
            .verbose("Credit QTY")
            .resolver(Resolver::CreditOnly)
            .into_ref(),
        quantity(ComputationField::new(TOTAL_QUANTITY))
            .verbose("Total QTY")
            .into_ref(),
        quantity(ComputationField::new(OPENING_QUANTITY))
            .verbose("Opening QTY")
            .date_scope(DateScope::Before)
            .resolver(Resolver::OpeningBalance)
            .into_ref(),
        quantity(ComputationField::new(BALANCE_QUANTITY))
            .verbose("Closing QTY")
            .requires(OPENING_QUANTITY)
            .resolver(Resolver::ClosingBalance {
                opening: OPENING_QUANTITY.to_string(),
            })
            .into_ref(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::spec::ComputationFieldSpec;

    #[test]
    fn test_builtin_shapes() {
        let fields = builtin_fields();
        assert_eq!(fields.len(), 11);

        let get = |name: &str| fields.iter().find(|f| f.name() == name).unwrap().clone();
        assert_eq!(get(OPENING_BALANCE).date_scope(), DateScope::Before);
        assert_eq!(get(BALANCE_QUANTITY).calculation_field(), "quantity");
        assert!(!get(TOTAL_QUANTITY).is_summable());
        assert!(get(PERCENT_TO_TOTAL_BALANCE).prevent_group_by());
        assert_eq!(
            get(TOTAL).requires().iter().map(|r| r.name().to_string()).collect::<Vec<_>>(),
            vec![DEBIT, CREDIT]
        );
    }
}
