//! Password hashing and policy checks.
//!
//! Hashes are Argon2id PHC strings (`$argon2id$v=19$...`), which carry their
//! own salt and parameters. That makes an already-hashed value detectable.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("password must be between {min} and {max} characters")]
    Length { min: usize, max: usize },
    #[error("password must contain an uppercase letter, a lowercase letter, a digit and a symbol")]
    NotStrong,
    #[error("password must contain a letter and a digit")]
    NotWeak,
    #[error("code must be exactly 6 digits")]
    NotSimple,
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Which rules a plaintext password has to satisfy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Operators and shop owners.
    Strict,
    /// Customers.
    Weak,
    /// Six digits, for temp codes.
    Simple,
}

impl Policy {
    pub fn check(&self, password: &str) -> Result<(), PasswordError> {
        let len = password.chars().count();
        match self {
            Policy::Strict => {
                if !(8..=20).contains(&len) {
                    return Err(PasswordError::Length { min: 8, max: 20 });
                }
                let upper = password.chars().any(|c| c.is_uppercase());
                let lower = password.chars().any(|c| c.is_lowercase());
                let digit = password.chars().any(|c| c.is_ascii_digit());
                let symbol = password.chars().any(|c| !c.is_alphanumeric());
                if upper && lower && digit && symbol {
                    Ok(())
                } else {
                    Err(PasswordError::NotStrong)
                }
            }
            Policy::Weak => {
                if !(6..=20).contains(&len) {
                    return Err(PasswordError::Length { min: 6, max: 20 });
                }
                let letter = password.chars().any(|c| c.is_alphabetic());
                let digit = password.chars().any(|c| c.is_ascii_digit());
                if letter && digit {
                    Ok(())
                } else {
                    Err(PasswordError::NotWeak)
                }
            }
            Policy::Simple => {
                if len == 6 && password.chars().all(|c| c.is_ascii_digit()) {
                    Ok(())
                } else {
                    Err(PasswordError::NotSimple)
                }
            }
        }
    }
}

pub fn hash(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// False on mismatch and on an unparseable stored value.
pub fn verify(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn is_hashed(value: &str) -> bool {
    value.starts_with("$argon2") && PasswordHash::new(value).is_ok()
}

/// Hash `value` unless it already is a PHC hash.
pub fn ensure_hashed(value: &str) -> Result<String, PasswordError> {
    if is_hashed(value) {
        Ok(value.to_string())
    } else {
        hash(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_policy() {
        assert_eq!(Policy::Strict.check("Abcdef1!"), Ok(()));
        assert_eq!(Policy::Strict.check("Ab1!"), Err(PasswordError::Length { min: 8, max: 20 }));
        assert_eq!(Policy::Strict.check("Abcdefg1"), Err(PasswordError::NotStrong));
        assert_eq!(Policy::Strict.check("abcdef1!"), Err(PasswordError::NotStrong));
        assert!(Policy::Strict.check("Abcdefghijklmnopqr1!X").is_err());
    }

    #[test]
    fn weak_policy() {
        assert_eq!(Policy::Weak.check("abc123"), Ok(()));
        assert_eq!(Policy::Weak.check("abcdef"), Err(PasswordError::NotWeak));
        assert_eq!(Policy::Weak.check("ab12"), Err(PasswordError::Length { min: 6, max: 20 }));
    }

    #[test]
    fn simple_policy() {
        assert_eq!(Policy::Simple.check("123456"), Ok(()));
        assert_eq!(Policy::Simple.check("12345"), Err(PasswordError::NotSimple));
        assert_eq!(Policy::Simple.check("12345a"), Err(PasswordError::NotSimple));
    }

    #[test]
    fn hash_and_verify() {
        let hashed = hash("Secret1!").unwrap();
        assert!(is_hashed(&hashed));
        assert!(verify("Secret1!", &hashed));
        assert!(!verify("Secret2!", &hashed));
        assert!(!verify("Secret1!", "Secret1!"));
    }

    #[test]
    fn ensure_hashed_skips_existing_hashes() {
        let hashed = hash("Secret1!").unwrap();
        assert_eq!(ensure_hashed(&hashed).unwrap(), hashed);
        let fresh = ensure_hashed("Secret1!").unwrap();
        assert_ne!(fresh, "Secret1!");
        assert!(verify("Secret1!", &fresh));
    }
}
