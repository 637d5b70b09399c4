use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request to create a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<String>,
}

impl CreatePaymentRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.amount <= Decimal::ZERO {
            errors.push(ValidationError { field: "amount".to_string(), message: "amount must be positive".to_string() });
        }
        if self.currency.len() != 3 {
            errors.push(ValidationError { field: "currency".to_string(), message: "currency must be a 3-letter ISO 4217 code".to_string() });
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Request to create or replace an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub item: String,
    pub quantity: u32,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.item.trim().is_empty() {
            errors.push(ValidationError { field: "item".to_string(), message: "item cannot be empty".to_string() });
        }
        if self.quantity == 0 {
            errors.push(ValidationError { field: "quantity".to_string(), message: "quantity must be at least 1".to_string() });
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payment_validation() {
        let valid = CreatePaymentRequest { amount: dec!(10.00), currency: "USD".to_string(), reference: None };
        assert!(valid.validate().is_ok());

        let invalid = CreatePaymentRequest { amount: dec!(0), currency: "US".to_string(), reference: None };
        let errors = invalid.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "amount");
        assert_eq!(errors[1].field, "currency");
    }

    #[test]
    fn test_order_validation() {
        let invalid = OrderRequest { item: "  ".to_string(), quantity: 0 };
        assert_eq!(invalid.validate().unwrap_err().len(), 2);
    }
}
