use crate::types::PositionSide;

/// Deterministic stand-in for the original's `hash(symbol)` fallback: any
/// stable hash works here since its only job is to shorten a too-long prefix
/// without colliding across distinct symbols in practice.
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Prefix = fixed process-wide prefix ‖ encoded symbol ‖ side-code. If that
/// would reach 30 characters or more, the symbol is replaced by a 7-hex-digit
/// hash so prefix matching stays short and collision-free in practice.
pub fn build_prefix(base_prefix: &str, symbol: &str, side: PositionSide) -> String {
    let side_code = side.code();
    let natural = format!("{base_prefix}{symbol}-{side_code}");
    if natural.len() >= 30 {
        let h = fnv1a(symbol.as_bytes()) & 0x0fff_ffff;
        format!("{base_prefix}{h:07x}-{side_code}")
    } else {
        natural
    }
}

/// Appends a millisecond-derived suffix and truncates to the venue's 36
/// character id limit.
pub fn build_client_order_id(base_prefix: &str, symbol: &str, side: PositionSide, now_ms: i64) -> String {
    let prefix = build_prefix(base_prefix, symbol, side);
    let suffix = now_ms.rem_euclid(100_000);
    let full = format!("{prefix}-{suffix}");
    if full.len() > 36 {
        full[..36].to_string()
    } else {
        full
    }
}

pub fn matches_prefix(client_order_id: &str, prefix: &str) -> bool {
    client_order_id.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_symbol_keeps_natural_prefix() {
        let prefix = build_prefix("BOT-", "BTCUSDT", PositionSide::Long);
        assert_eq!(prefix, "BOT-BTCUSDT-L");
    }

    #[test]
    fn long_symbol_falls_back_to_hash() {
        let symbol = "SOMEVERYLONGPERPETUALSYMBOLUSDT";
        let natural = format!("BOT-{symbol}-{}", PositionSide::Short.code());
        assert!(natural.len() >= 30);
        let prefix = build_prefix("BOT-", symbol, PositionSide::Short);
        assert!(prefix.len() < natural.len());
        assert!(prefix.starts_with("BOT-"));
        assert!(prefix.ends_with("-S"));
    }

    #[test]
    fn client_order_id_never_exceeds_36_chars() {
        let id = build_client_order_id("BOT-", "SOMEVERYLONGPERPETUALSYMBOLUSDT", PositionSide::Short, 1_700_000_123_456);
        assert!(id.len() <= 36);
    }

    #[test]
    fn matches_prefix_identifies_ownership() {
        let prefix = build_prefix("BOT-", "ETHUSDT", PositionSide::Long);
        let id = build_client_order_id("BOT-", "ETHUSDT", PositionSide::Long, 1_700_000_000_000);
        assert!(matches_prefix(&id, &prefix));
        assert!(!matches_prefix("someone-elses-order", &prefix));
    }
}
