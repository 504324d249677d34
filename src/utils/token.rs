use rand::distributions::Alphanumeric;
use rand::Rng;

const QR_TOKEN_LEN: usize = 32;

/// Generate an opaque QR bearer token.
///
/// 32 alphanumeric characters sampled from the OS-seeded thread RNG give
/// ~190 bits of entropy, which rules out enumeration or guessing. Global
/// uniqueness is additionally enforced by the store's unique constraint.
pub fn generate_qr_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(QR_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Generate an external payment reference handed to the payment provider.
pub fn generate_payment_reference() -> String {
    format!("pay_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_tokens_have_expected_shape() {
        let token = generate_qr_token();
        assert_eq!(token.len(), QR_TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn qr_tokens_do_not_repeat() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_qr_token()));
        }
    }

    #[test]
    fn payment_references_are_prefixed() {
        assert!(generate_payment_reference().starts_with("pay_"));
    }
}
