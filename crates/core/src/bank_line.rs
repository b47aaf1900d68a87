//! BankLine - a single deposit as received from the bank feed

use crate::amount::{Amount, AmountError};
use crate::currency::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deposit line, created upstream and read-only here.
///
/// The amount is kept raw so that validation (negative amounts) happens in
/// the allocation engine, where it is reported as `InvalidAmount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankLine {
    pub id: String,
    pub org_id: String,
    pub amount_minor_units: i64,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

impl BankLine {
    pub fn new(
        id: impl Into<String>,
        org_id: impl Into<String>,
        amount_minor_units: i64,
        currency: Currency,
    ) -> Self {
        Self {
            id: id.into(),
            org_id: org_id.into(),
            amount_minor_units,
            currency,
            created_at: Utc::now(),
        }
    }

    /// Validated amount
    pub fn amount(&self) -> Result<Amount, AmountError> {
        Amount::new(self.amount_minor_units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_validation() {
        let line = BankLine::new("bl-1", "org-1", 10_000, Currency::Aud);
        assert_eq!(line.amount().unwrap().minor_units(), 10_000);

        let negative = BankLine::new("bl-2", "org-1", -1, Currency::Aud);
        assert!(matches!(negative.amount(), Err(AmountError::NegativeAmount(-1))));
    }

    #[test]
    fn test_camel_case_wire_format() {
        let line = BankLine::new("bl-1", "org-1", 500, Currency::Aud);
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["orgId"], "org-1");
        assert_eq!(json["amountMinorUnits"], 500);
        assert_eq!(json["currency"], "AUD");
    }
}
