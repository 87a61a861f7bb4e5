//! Deterministic idempotency keys.
//!
//! When the caller does not supply a key, one is derived from the order's
//! identity fields plus a caller-supplied nonce. Identical requests with the
//! same nonce always map to the same key, so a retried placement lands on
//! the UNIQUE constraint instead of creating a second order.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use sp_domain::{OrderType, Side};

pub fn derive_idempotency_key(
    account_id: &str,
    symbol: &str,
    side: Side,
    order_type: OrderType,
    qty: i64,
    price: Option<Decimal>,
    strategy_id: Option<&str>,
    nonce: &str,
) -> String {
    let mut hasher = Sha256::new();
    // Field-separated canonical form; '\x1f' cannot occur in any component.
    for part in [
        account_id,
        symbol,
        side.as_str(),
        order_type.as_str(),
        &qty.to_string(),
        &price.map(|p| p.normalize().to_string()).unwrap_or_default(),
        strategy_id.unwrap_or(""),
        nonce,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = derive_idempotency_key(
            "acct-1", "005930", Side::Buy, OrderType::Limit, 10,
            Some(dec!(70000)), Some("strat-1"), "nonce-1",
        );
        let b = derive_idempotency_key(
            "acct-1", "005930", Side::Buy, OrderType::Limit, 10,
            Some(dec!(70000)), Some("strat-1"), "nonce-1",
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn any_field_change_changes_the_key() {
        let base = derive_idempotency_key(
            "acct-1", "005930", Side::Buy, OrderType::Limit, 10,
            Some(dec!(70000)), Some("strat-1"), "nonce-1",
        );
        let variants = [
            derive_idempotency_key("acct-2", "005930", Side::Buy, OrderType::Limit, 10, Some(dec!(70000)), Some("strat-1"), "nonce-1"),
            derive_idempotency_key("acct-1", "005930", Side::Sell, OrderType::Limit, 10, Some(dec!(70000)), Some("strat-1"), "nonce-1"),
            derive_idempotency_key("acct-1", "005930", Side::Buy, OrderType::Market, 10, None, Some("strat-1"), "nonce-1"),
            derive_idempotency_key("acct-1", "005930", Side::Buy, OrderType::Limit, 11, Some(dec!(70000)), Some("strat-1"), "nonce-1"),
            derive_idempotency_key("acct-1", "005930", Side::Buy, OrderType::Limit, 10, Some(dec!(70000)), None, "nonce-1"),
            derive_idempotency_key("acct-1", "005930", Side::Buy, OrderType::Limit, 10, Some(dec!(70000)), Some("strat-1"), "nonce-2"),
        ];
        for v in variants {
            assert_ne!(base, v);
        }
    }

    #[test]
    fn price_scale_is_normalized() {
        // 70000 and 70000.00 are the same price, so the same key.
        let a = derive_idempotency_key(
            "acct-1", "005930", Side::Buy, OrderType::Limit, 10,
            Some(dec!(70000)), None, "n",
        );
        let b = derive_idempotency_key(
            "acct-1", "005930", Side::Buy, OrderType::Limit, 10,
            Some(dec!(70000.00)), None, "n",
        );
        assert_eq!(a, b);
    }
}
