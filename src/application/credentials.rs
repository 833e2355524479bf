//! Salted password hashing.
//!
//! Each user gets a random salt at registration; the stored credential is the
//! hex SHA-256 digest of salt followed by password. Comparison is constant
//! time so login timing does not reveal how far a guess matched.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub fn generate_salt() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_password(salt: &str, stored_hash: &str, candidate: &str) -> bool {
    let computed = hash_password(salt, candidate);
    stored_hash.as_bytes().ct_eq(computed.as_bytes()).unwrap_u8() == 1
}
