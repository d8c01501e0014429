//! Field checks applied to checkout input before anything is persisted.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::CheckoutError;
use crate::models::CartLine;

const MAX_NAME_LENGTH: usize = 200;
const MAX_EMAIL_LENGTH: usize = 254;
const MAX_ADDRESS_LENGTH: usize = 1000;
const MAX_ITEM_QUANTITY: i32 = 999;
/// 1,000,000.00 in major units.
const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 2);
const TAX_ID_LENGTH: usize = 11;

fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Check digit for `digits` using descending weights starting at `first_weight`.
///
/// A remainder of 10 counts as 0.
fn check_digit(digits: &[u32], first_weight: u32) -> u32 {
    let sum: u32 = digits
        .iter()
        .zip((2..=first_weight).rev())
        .map(|(digit, weight)| digit * weight)
        .sum();

    match (sum * 10) % 11 {
        10 => 0,
        remainder => remainder,
    }
}

/// Validates a Brazilian individual tax id (CPF) and returns its 11 digits.
///
/// Punctuation is ignored, so `529.982.247-25` and `52998224725` are equivalent.
pub fn validate_tax_id(raw: &str) -> Result<String, CheckoutError> {
    let cleaned = digits_only(raw);
    if cleaned.len() != TAX_ID_LENGTH {
        return Err(CheckoutError::InvalidTaxId);
    }

    let digits: Vec<u32> = cleaned.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.iter().all(|d| *d == digits[0]) {
        return Err(CheckoutError::InvalidTaxId);
    }

    let first = check_digit(&digits[..9], 10);
    let second = check_digit(&digits[..10], 11);
    if digits[9] != first || digits[10] != second {
        return Err(CheckoutError::InvalidTaxId);
    }

    Ok(cleaned)
}

/// Accepts 10 or 11 digits once formatting is stripped; returns the digits.
pub fn validate_phone(raw: &str) -> Result<String, CheckoutError> {
    let cleaned = digits_only(raw);
    if !(10..=11).contains(&cleaned.len()) {
        return Err(CheckoutError::invalid_field(
            "phone",
            format!("expected 10 or 11 digits, got {}", cleaned.len()),
        ));
    }
    Ok(cleaned)
}

pub fn validate_email(raw: &str) -> Result<String, CheckoutError> {
    let email = ensure_non_empty("email", raw, MAX_EMAIL_LENGTH)?;
    if !validator::validate_email(email.as_str()) {
        return Err(CheckoutError::invalid_field(
            "email",
            "not a valid email address",
        ));
    }
    Ok(email)
}

pub fn validate_name(raw: &str) -> Result<String, CheckoutError> {
    ensure_non_empty("name", raw, MAX_NAME_LENGTH)
}

pub fn validate_address(raw: &str) -> Result<String, CheckoutError> {
    ensure_non_empty("shipping_address", raw, MAX_ADDRESS_LENGTH)
}

fn ensure_non_empty(
    field: &'static str,
    raw: &str,
    max_len: usize,
) -> Result<String, CheckoutError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CheckoutError::invalid_field(field, "must not be blank"));
    }
    if trimmed.chars().count() > max_len {
        return Err(CheckoutError::invalid_field(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Rejects an empty cart or any line that could not be priced.
pub fn validate_cart(items: &[CartLine]) -> Result<(), CheckoutError> {
    if items.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    for item in items {
        if item.product_id.trim().is_empty() {
            return Err(CheckoutError::invalid_field(
                "items",
                "product id must not be blank",
            ));
        }
        if item.quantity < 1 || item.quantity > MAX_ITEM_QUANTITY {
            return Err(CheckoutError::invalid_field(
                "items",
                format!(
                    "quantity for {} must be between 1 and {}",
                    item.product_id, MAX_ITEM_QUANTITY
                ),
            ));
        }
        if item.unit_price.is_sign_negative() {
            return Err(CheckoutError::invalid_field(
                "items",
                format!("unit price for {} must not be negative", item.product_id),
            ));
        }
        if item.unit_price > MAX_UNIT_PRICE {
            return Err(CheckoutError::invalid_field(
                "items",
                format!(
                    "unit price for {} must be at most {}",
                    item.product_id, MAX_UNIT_PRICE
                ),
            ));
        }
        if item.unit_price.normalize().scale() > 2 {
            return Err(CheckoutError::invalid_field(
                "items",
                format!("unit price for {} has fractions of a cent", item.product_id),
            ));
        }
    }

    Ok(())
}

/// Converts a major-unit amount to cents, rounding half away from zero.
///
/// `None` when the amount does not fit in an `i64` of cents.
pub fn amount_to_cents(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Sum of line totals in major units, `None` on overflow.
pub fn cart_total(items: &[CartLine]) -> Option<Decimal> {
    items.iter().try_fold(Decimal::ZERO, |total, item| {
        total.checked_add(item.line_total()?)
    })
}

pub fn ensure_min_amount(amount_cents: i64, minimum_cents: i64) -> Result<(), CheckoutError> {
    if amount_cents < minimum_cents {
        return Err(CheckoutError::AmountTooLow {
            amount_cents,
            minimum_cents,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    const VALID_TAX_ID: &str = "52998224725";

    fn line(price: Decimal, quantity: i32) -> CartLine {
        CartLine {
            product_id: "p1".into(),
            name: "Camiseta".into(),
            unit_price: price,
            quantity,
        }
    }

    /// Appends both check digits to nine base digits.
    fn with_check_digits(base: &[u32]) -> String {
        let mut digits = base.to_vec();
        digits.push(check_digit(&digits, 10));
        digits.push(check_digit(&digits, 11));
        digits.iter().map(|d| char::from_digit(*d, 10).unwrap()).collect()
    }

    #[test]
    fn known_tax_ids_pass() {
        assert_eq!(validate_tax_id(VALID_TAX_ID).unwrap(), VALID_TAX_ID);
        assert_eq!(validate_tax_id("529.982.247-25").unwrap(), VALID_TAX_ID);
        assert!(validate_tax_id("111.444.777-35").is_ok());
    }

    #[test]
    fn flipping_any_digit_breaks_the_tax_id() {
        let original: Vec<char> = VALID_TAX_ID.chars().collect();
        for position in 0..original.len() {
            for replacement in '0'..='9' {
                if replacement == original[position] {
                    continue;
                }
                let mut mutated = original.clone();
                mutated[position] = replacement;
                let mutated: String = mutated.into_iter().collect();
                assert_matches!(
                    validate_tax_id(&mutated),
                    Err(CheckoutError::InvalidTaxId),
                    "{mutated} should be rejected"
                );
            }
        }
    }

    #[test]
    fn tax_id_length_is_checked_after_stripping() {
        assert!(validate_tax_id("5299822472").is_err());
        assert!(validate_tax_id("529982247250").is_err());
        assert!(validate_tax_id("").is_err());
        assert!(validate_tax_id("abc.def.ghi-jk").is_err());
    }

    #[test]
    fn phone_accepts_ten_or_eleven_digits() {
        assert_eq!(validate_phone("(11) 98765-4321").unwrap(), "11987654321");
        assert_eq!(validate_phone("11 3456-7890").unwrap(), "1134567890");
        assert_matches!(
            validate_phone("98765-4321"),
            Err(CheckoutError::InvalidField { field: "phone", .. })
        );
        assert!(validate_phone("+55 11 98765-4321").is_err());
    }

    #[test]
    fn email_and_text_fields() {
        assert_eq!(validate_email(" ana@example.com ").unwrap(), "ana@example.com");
        assert_matches!(
            validate_email("ana.example.com"),
            Err(CheckoutError::InvalidField { field: "email", .. })
        );
        assert_matches!(
            validate_name("   "),
            Err(CheckoutError::InvalidField { field: "name", .. })
        );
        assert!(validate_address("Rua das Flores, 123 - São Paulo/SP").is_ok());
    }

    #[test]
    fn empty_cart_is_rejected() {
        assert_matches!(validate_cart(&[]), Err(CheckoutError::EmptyCart));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert_matches!(
            validate_cart(&[line(dec!(10), 0)]),
            Err(CheckoutError::InvalidField { field: "items", .. })
        );
    }

    #[test]
    fn cart_total_and_cents() {
        let items = vec![line(dec!(29.90), 2)];
        let total = cart_total(&items).unwrap();
        assert_eq!(total, dec!(59.80));
        assert_eq!(amount_to_cents(total), Some(5980));
    }

    #[test]
    fn unit_price_is_capped_and_whole_cents() {
        assert!(validate_cart(&[line(dec!(1000000.00), 999)]).is_ok());
        assert_matches!(
            validate_cart(&[line(dec!(1000000.01), 1)]),
            Err(CheckoutError::InvalidField { field: "items", .. })
        );
        assert_matches!(
            validate_cart(&[line(Decimal::MAX, 2)]),
            Err(CheckoutError::InvalidField { field: "items", .. })
        );
        assert_matches!(
            validate_cart(&[line(dec!(9.999), 1)]),
            Err(CheckoutError::InvalidField { field: "items", .. })
        );
        // Trailing zeros are not fractions of a cent.
        assert!(validate_cart(&[line(dec!(9.9900), 1)]).is_ok());
    }

    #[test]
    fn overflowing_amounts_are_none_not_panics() {
        assert_eq!(amount_to_cents(Decimal::MAX), None);
        assert_eq!(cart_total(&[line(Decimal::MAX, 2)]), None);
        assert_eq!(
            cart_total(&[line(Decimal::MAX, 1), line(Decimal::MAX, 1)]),
            None
        );
        assert_eq!(line(Decimal::MAX, 2).line_total(), None);
    }

    #[test]
    fn cents_round_half_away_from_zero() {
        assert_eq!(amount_to_cents(dec!(5.005)), Some(501));
        assert_eq!(amount_to_cents(dec!(5.004)), Some(500));
        assert_eq!(amount_to_cents(dec!(0.125)), Some(13));
    }

    #[test]
    fn minimum_amount_boundary() {
        assert_matches!(
            ensure_min_amount(500, 501),
            Err(CheckoutError::AmountTooLow {
                amount_cents: 500,
                minimum_cents: 501
            })
        );
        assert!(ensure_min_amount(501, 501).is_ok());
    }

    proptest! {
        #[test]
        fn repeated_digit_tax_ids_always_fail(digit in 0u32..10) {
            let raw: String = std::iter::repeat(char::from_digit(digit, 10).unwrap())
                .take(11)
                .collect();
            prop_assert!(validate_tax_id(&raw).is_err());
        }

        #[test]
        fn generated_tax_ids_validate(base in proptest::collection::vec(0u32..10, 9)) {
            prop_assume!(base.iter().any(|d| *d != base[0]));
            let tax_id = with_check_digits(&base);
            prop_assert_eq!(validate_tax_id(&tax_id).unwrap(), tax_id);
        }

        #[test]
        fn wrong_length_never_validates(raw in "[0-9]{0,10}|[0-9]{12,15}") {
            prop_assert!(validate_tax_id(&raw).is_err());
        }

        #[test]
        fn cents_conversion_is_exact_for_two_decimals(cents in 0i64..10_000_000) {
            let amount = Decimal::new(cents, 2);
            prop_assert_eq!(amount_to_cents(amount), Some(cents));
        }
    }
}
