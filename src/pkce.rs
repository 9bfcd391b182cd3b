/// PKCE (Proof Key for Code Exchange), RFC 7636, S256 only
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Verifier/challenge pair for one authorization attempt
#[derive(Debug, Clone)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    pub const METHOD: &'static str = "S256";

    /// Generate a fresh pair from 32 random bytes
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::thread_rng().gen();
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Derive the challenge for a known verifier
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_generation() {
        let pair = PkcePair::generate();

        // 32 bytes base64url without padding
        assert_eq!(pair.verifier().len(), 43);
        assert_eq!(pair.challenge().len(), 43);
        assert_ne!(pair.verifier(), pair.challenge());
        assert_ne!(pair.verifier(), PkcePair::generate().verifier());
    }

    #[test]
    fn test_rfc7636_appendix_b() {
        let pair =
            PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(
            pair.challenge(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGDSMw45-cM"
        );
    }
}
