//! Property-based tests for checkout validation and status mapping.
//!
//! These tests use proptest to verify invariants across a wide range of inputs,
//! helping to catch edge cases that unit tests might miss.

use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_api::{
    models::{AttributionStatus, CartLine, GatewayStatus, OrderStatus},
    validation::{amount_to_cents, cart_total, validate_tax_id},
};

fn check_digit(digits: &[u32]) -> u32 {
    let first_weight = digits.len() as u32 + 1;
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, d)| d * (first_weight - i as u32))
        .sum();
    let remainder = (sum * 10) % 11;
    if remainder == 10 {
        0
    } else {
        remainder
    }
}

// Strategies for generating test data
fn valid_cpf_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec(0u32..10, 9)
        .prop_filter("not all digits equal", |digits| {
            digits.iter().any(|d| *d != digits[0])
        })
        .prop_map(|mut digits| {
            digits.push(check_digit(&digits));
            digits.push(check_digit(&digits));
            digits.iter().map(|d| char::from_digit(*d, 10).unwrap()).collect()
        })
}

fn formatted(cpf: &str) -> String {
    format!("{}.{}.{}-{}", &cpf[0..3], &cpf[3..6], &cpf[6..9], &cpf[9..11])
}

fn cents_strategy() -> impl Strategy<Value = i64> {
    0i64..10_000_000
}

fn cart_strategy() -> impl Strategy<Value = Vec<CartLine>> {
    proptest::collection::vec((1i64..100_000, 1i32..20), 1..6).prop_map(|lines| {
        lines
            .into_iter()
            .enumerate()
            .map(|(i, (cents, quantity))| CartLine {
                product_id: format!("p{}", i),
                name: format!("Product {}", i),
                unit_price: Decimal::new(cents, 2),
                quantity,
            })
            .collect()
    })
}

// Property: CPF check digits
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn generated_cpfs_pass_with_or_without_punctuation(cpf in valid_cpf_strategy()) {
        prop_assert_eq!(validate_tax_id(&cpf).ok(), Some(cpf.clone()));
        prop_assert_eq!(validate_tax_id(&formatted(&cpf)).ok(), Some(cpf));
    }

    #[test]
    fn repeated_digit_cpfs_always_fail(digit in 0u32..10) {
        let cpf: String = std::iter::repeat(char::from_digit(digit, 10).unwrap())
            .take(11)
            .collect();
        prop_assert!(validate_tax_id(&cpf).is_err());
    }

    #[test]
    fn changing_a_check_digit_fails(cpf in valid_cpf_strategy(), bump in 1u32..10) {
        let mut digits: Vec<u32> = cpf.chars().filter_map(|c| c.to_digit(10)).collect();
        digits[10] = (digits[10] + bump) % 10;
        let tampered: String = digits.iter().map(|d| char::from_digit(*d, 10).unwrap()).collect();
        prop_assert!(validate_tax_id(&tampered).is_err());
    }

    #[test]
    fn wrong_length_fails(digits in "[0-9]{1,10}|[0-9]{12,14}") {
        prop_assert!(validate_tax_id(&digits).is_err());
    }
}

// Property: money conversion
proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn two_decimal_amounts_convert_exactly(cents in cents_strategy()) {
        prop_assert_eq!(amount_to_cents(Decimal::new(cents, 2)), Some(cents));
    }

    #[test]
    fn sub_cent_amounts_round_half_away_from_zero(cents in cents_strategy(), mills in 0i64..10) {
        let amount = Decimal::new(cents * 10 + mills, 3);
        let expected = if mills >= 5 { cents + 1 } else { cents };
        prop_assert_eq!(amount_to_cents(amount), Some(expected));
    }

    #[test]
    fn cart_total_in_cents_equals_sum_of_line_cents(cart in cart_strategy()) {
        let expected: i64 = cart
            .iter()
            .map(|line| amount_to_cents(line.unit_price).unwrap() * i64::from(line.quantity))
            .sum();
        prop_assert_eq!(cart_total(&cart).and_then(amount_to_cents), Some(expected));
    }
}

// Property: gateway status mapping
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn unrecognised_statuses_never_settle(raw in "[A-Za-z_]{0,16}") {
        let status = GatewayStatus::from(raw.as_str());
        let documented = GatewayStatus::KNOWN
            .iter()
            .any(|known| known.as_str().eq_ignore_ascii_case(raw.trim()));
        if !documented {
            prop_assert!(!status.is_settled());
            prop_assert_eq!(status.to_order_status(), OrderStatus::Pending);
            prop_assert_eq!(status.to_attribution_status(), AttributionStatus::WaitingPayment);
        }
    }

    #[test]
    fn parsing_is_case_insensitive(index in 0usize..6, lower in any::<bool>()) {
        let known = GatewayStatus::KNOWN[index].clone();
        let raw = if lower {
            known.as_str().to_lowercase()
        } else {
            known.as_str().to_string()
        };
        prop_assert_eq!(GatewayStatus::from(raw.as_str()), known);
    }
}
