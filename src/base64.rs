//! URL-safe base64 as used throughout the MEGA protocol.
//!
//! Keys, handles and encrypted attributes travel as unpadded base64 with the
//! URL-safe alphabet (`-` and `_`). Some server fields still arrive with the
//! standard alphabet or trailing padding, so decoding accepts both.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Encode bytes to unpadded URL-safe base64.
///
/// # Example
/// ```
/// use megacore::base64::base64url_encode;
/// let encoded = base64url_encode(&[0xfb, 0xff]);
/// assert_eq!(encoded, "-_8");
/// ```
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode URL-safe base64, tolerating padding and the standard alphabet.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = s
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    URL_SAFE_NO_PAD.decode(normalized)
}

/// Decode into a fixed-size array, failing on any length mismatch.
pub(crate) fn base64url_decode_array<const N: usize>(s: &str) -> Option<[u8; N]> {
    base64url_decode(s).ok()?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_safe_alphabet() {
        let data: Vec<u8> = (0..=255).collect();
        let encoded = base64url_encode(&data);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
        assert_eq!(base64url_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_decode_accepts_padding_and_standard_alphabet() {
        assert_eq!(base64url_decode("-_8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(base64url_decode("+/8").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn test_decode_array_checks_length() {
        let key = [7u8; 16];
        let encoded = base64url_encode(&key);
        assert_eq!(base64url_decode_array::<16>(&encoded), Some(key));
        assert_eq!(base64url_decode_array::<32>(&encoded), None);
        assert_eq!(base64url_decode_array::<16>("!!"), None);
    }
}
