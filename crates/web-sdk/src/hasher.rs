//! One-way hashing of contact fields for enhanced matching.
//!
//! Emails are trimmed and lower-cased, phones reduced to digits, then the
//! UTF-8 bytes are SHA-256 hashed and hex encoded. Without a digest primitive
//! the result is an empty string, which callers treat as "omit the field".

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct SensitiveFieldHasher {
    available: bool,
}

impl SensitiveFieldHasher {
    pub fn new(available: bool) -> Self {
        Self { available }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub async fn hash_email(&self, email: &str) -> String {
        self.digest(&normalize_email(email)).await
    }

    pub async fn hash_phone(&self, phone: &str) -> String {
        self.digest(&normalize_phone(phone)).await
    }

    async fn digest(&self, normalized: &str) -> String {
        if !self.available {
            return String::new();
        }
        // Suspension point, like the page's async digest call.
        tokio::task::yield_now().await;
        sha256_hex(normalized)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Compute SHA-256 hex digest.
fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
