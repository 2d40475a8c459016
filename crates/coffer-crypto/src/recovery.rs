//! BIP-39 rendering of the recovery key
//!
//! The recovery key's 256 bits are the mnemonic's entropy, so the 24 words
//! encode the key exactly and parsing them gives the same key back. The
//! phrase is shown to the user once and never stored.

use bip39::Mnemonic;
use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeyMaterial, RecoveryKey};
use crate::KEY_SIZE;

/// Render a recovery key as a 24-word English mnemonic.
pub fn recovery_key_to_mnemonic(key: &RecoveryKey) -> CryptoResult<SecretString> {
    let mnemonic = Mnemonic::from_entropy(key.as_bytes())
        .map_err(|e| CryptoError::InvalidMnemonic(format!("BIP-39 encoding failed: {e}")))?;
    Ok(SecretString::from(mnemonic.to_string()))
}

/// Parse a mnemonic back into the recovery key. Whitespace and case are
/// normalized before validation.
pub fn mnemonic_to_recovery_key(words: &str) -> CryptoResult<RecoveryKey> {
    let normalized = Zeroizing::new(
        words
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );
    let mnemonic: Mnemonic = normalized
        .parse()
        .map_err(|e| CryptoError::InvalidMnemonic(format!("{e}")))?;

    let entropy = Zeroizing::new(mnemonic.to_entropy());
    if entropy.len() != KEY_SIZE {
        return Err(CryptoError::InvalidMnemonic(format!(
            "expected 24 words, got {}",
            mnemonic.word_count()
        )));
    }
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    bytes.copy_from_slice(&entropy);
    Ok(RecoveryKey::from_bytes(*bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;
    use secrecy::ExposeSecret;

    #[test]
    fn test_mnemonic_has_24_words() {
        let key: RecoveryKey = generate_key();
        let words = recovery_key_to_mnemonic(&key).unwrap();
        assert_eq!(words.expose_secret().split_whitespace().count(), 24);
    }

    #[test]
    fn test_mnemonic_roundtrip() {
        let key: RecoveryKey = generate_key();
        let words = recovery_key_to_mnemonic(&key).unwrap();
        let back = mnemonic_to_recovery_key(words.expose_secret()).unwrap();
        assert_eq!(key.as_bytes(), back.as_bytes());
    }

    #[test]
    fn test_mnemonic_tolerates_spacing_and_case() {
        let key: RecoveryKey = generate_key();
        let words = recovery_key_to_mnemonic(&key).unwrap();
        let messy = format!("  {}  ", words.expose_secret().to_uppercase().replace(' ', "   "));
        let back = mnemonic_to_recovery_key(&messy).unwrap();
        assert_eq!(key.as_bytes(), back.as_bytes());
    }

    #[test]
    fn test_invalid_mnemonic() {
        let err = mnemonic_to_recovery_key("not a valid mnemonic at all").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidMnemonic(_)));
    }

    #[test]
    fn test_short_mnemonic_rejected() {
        let twelve = Mnemonic::from_entropy(&[7u8; 16]).unwrap().to_string();
        let err = mnemonic_to_recovery_key(&twelve).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidMnemonic(_)));
    }
}
