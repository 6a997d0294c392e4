//! Request signing shared by every exchange adapter.
//!
//! Both supported venues sign with **HMAC-SHA256** and differ only in the
//! prehash layout and the output encoding:
//!
//! | Exchange | Prehash                                   | Encoding |
//! |----------|-------------------------------------------|----------|
//! | MEXC     | `apiKey + timestamp + (query \| body)`    | hex      |
//! | Bitget   | `timestamp + METHOD + path[?query] + body` | base64   |
//!
//! Query parameters are always canonicalized first: sorted by key, joined as
//! `key=value` with `&`, values URL-encoded. The signature therefore does not
//! depend on the order in which the caller built the parameter list.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use grid_core::{Credentials, GridError, GridResult};

type HmacSha256 = Hmac<Sha256>;

/// Output encoding of the raw HMAC bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// Lowercase hex (MEXC).
    Hex,
    /// Standard base64 with padding (Bitget).
    Base64,
}

/// Keyed HMAC-SHA256 signer for one credential set.
///
/// Construction fails when the key or secret is missing; signing itself is
/// infallible and free of side effects.
#[derive(Clone)]
pub struct Signer {
    api_key: String,
    mac: HmacSha256,
    encoding: SignatureEncoding,
}

impl Signer {
    pub fn new(credentials: &Credentials, encoding: SignatureEncoding) -> GridResult<Self> {
        if credentials.api_key.trim().is_empty() {
            return Err(GridError::Config("api key is missing".into()));
        }
        if credentials.secret_key.trim().is_empty() {
            return Err(GridError::Config("secret key is missing".into()));
        }
        let mac = HmacSha256::new_from_slice(credentials.secret_key.as_bytes())
            .map_err(|e| GridError::Config(format!("invalid secret key: {e}")))?;
        Ok(Self { api_key: credentials.api_key.clone(), mac, encoding })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign the canonical query string of `params`.
    pub fn sign<K: AsRef<str>, V: AsRef<str>>(&self, params: &[(K, V)]) -> String {
        self.sign_payload(&canonical_query(params))
    }

    /// Sign an already assembled prehash string.
    pub fn sign_payload(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let bytes = mac.finalize().into_bytes();
        match self.encoding {
            SignatureEncoding::Hex => hex::encode(bytes),
            SignatureEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("encoding", &self.encoding).finish_non_exhaustive()
    }
}

/// Sort `params` by key (then value) and join them as a URL-encoded query.
pub fn canonical_query<K: AsRef<str>, V: AsRef<str>>(params: &[(K, V)]) -> String {
    let mut pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect();
    pairs.sort_unstable();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(encoding: SignatureEncoding) -> Signer {
        Signer::new(&Credentials::new("key", "test_secret"), encoding).unwrap()
    }

    #[test]
    fn hex_known_vector() {
        let sig = signer(SignatureEncoding::Hex).sign(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(sig, "ed5d29aee39f243f7aaec7c9c597dc8c967cb8fb3a3a37bff7dfd4939672c0c7");
    }

    #[test]
    fn base64_known_vector() {
        let sig = signer(SignatureEncoding::Base64).sign(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(sig, "7V0pruOfJD96rsfJxZfcjJZ8uPs6Oje/99/Uk5ZywMc=");
    }

    #[test]
    fn signature_is_independent_of_parameter_order() {
        let s = signer(SignatureEncoding::Hex);
        let forward = s.sign(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let reversed = s.sign(&[("c", "3"), ("b", "2"), ("a", "1")]);
        let shuffled = s.sign(&[("b", "2"), ("a", "1"), ("c", "3")]);
        assert_eq!(forward, reversed);
        assert_eq!(forward, shuffled);
        assert_eq!(forward, s.sign(&[("a", "1"), ("b", "2"), ("c", "3")]));
    }

    #[test]
    fn canonical_query_sorts_and_encodes() {
        let q = canonical_query(&[("symbol", "BTC_USDT"), ("end", "a b"), ("page_size", "100")]);
        assert_eq!(q, "end=a%20b&page_size=100&symbol=BTC_USDT");
        assert_eq!(canonical_query::<&str, &str>(&[]), "");
    }

    #[test]
    fn missing_secret_is_a_construction_error() {
        let err = Signer::new(&Credentials::new("key", ""), SignatureEncoding::Hex).unwrap_err();
        assert!(matches!(err, GridError::Config(_)));
        let err = Signer::new(&Credentials::new("", "secret"), SignatureEncoding::Hex).unwrap_err();
        assert!(matches!(err, GridError::Config(_)));
    }

    #[test]
    fn sign_payload_matches_mexc_login_prehash() {
        let s = Signer::new(&Credentials::new("key", "secret"), SignatureEncoding::Hex).unwrap();
        assert_eq!(
            s.sign_payload("key1700000000000"),
            "0eb15ed09c26d51b65c3de4a2c219450f5835924b266e2fe34bb0249b2be2309"
        );
    }
}
