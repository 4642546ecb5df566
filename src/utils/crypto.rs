use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;

/// Salted SHA-256 verifier stored in place of a plaintext password.
///
/// Encoded as `salt$digest`, both hex. The tracker only ever calls
/// [`Credential::hash`] and [`Credential::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    salt: String,
    digest: String,
}

impl Credential {
    pub fn hash(password: &str) -> Self {
        let salt = hex::encode(rand::random::<[u8; SALT_LEN]>());
        let digest = Self::digest(&salt, password);
        Self { salt, digest }
    }

    pub fn verify(&self, password: &str) -> bool {
        let candidate = Self::digest(&self.salt, password);
        constant_time_eq(candidate.as_bytes(), self.digest.as_bytes())
    }

    pub fn encode(&self) -> String {
        format!("{}${}", self.salt, self.digest)
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        let (salt, digest) = encoded.split_once('$')?;
        if salt.is_empty() || digest.is_empty() {
            return None;
        }
        Some(Self {
            salt: salt.to_string(),
            digest: digest.to_string(),
        })
    }

    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_matches_only_original_password() {
        let credential = Credential::hash("pw1");
        assert!(credential.verify("pw1"));
        assert!(!credential.verify("pw2"));
        assert!(!credential.verify(""));
        assert!(!credential.verify("PW1"));
    }

    #[test]
    fn test_salts_differ() {
        let a = Credential::hash("same");
        let b = Credential::hash("same");
        assert_ne!(a.encode(), b.encode());
        assert!(a.verify("same") && b.verify("same"));
    }

    #[test]
    fn test_encode_decode() {
        let credential = Credential::hash("secret");
        let decoded = Credential::decode(&credential.encode()).unwrap();
        assert_eq!(decoded, credential);
        assert!(decoded.verify("secret"));
        assert!(Credential::decode("no-separator").is_none());
    }
}
