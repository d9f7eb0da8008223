use std::collections::HashSet;

use ammonia::Builder;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use html_escape::decode_html_entities;
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use spin_sdk::http::{Request, Response};

use crate::core::errors::ApiError;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Strips all markup and stores the remaining text unescaped, so `&`, `<`
/// and `>` outside of tags come back as typed.
pub fn sanitize_text(text: &str) -> String {
    let cleaned = Builder::default()
        .tags(HashSet::new())
        .clean(text)
        .to_string();
    decode_html_entities(&cleaned).into_owned()
}

/// Rejects text longer than `max` characters as submitted.
pub fn check_length(text: &str, max: usize, what: &str) -> Result<(), ApiError> {
    if text.chars().count() > max {
        return Err(ApiError::BadRequest(format!("{} too long (max {} chars)", what, max)));
    }
    Ok(())
}

pub fn json<T: Serialize + ?Sized>(status: u16, body: &T) -> Result<Response, ApiError> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(serde_json::to_vec(body)?)
        .build())
}

pub fn message(status: u16, text: &str) -> Result<Response, ApiError> {
    json(status, &serde_json::json!({ "message": text }))
}

/// Decodes a JSON request body; anything malformed is the client's fault.
pub fn parse_body<T: DeserializeOwned>(req: &Request) -> Result<T, ApiError> {
    let body = req.body();
    let body: &[u8] = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

pub fn parse_id(raw: &str) -> Result<u64, ApiError> {
    raw.parse::<u64>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid id: {}", raw)))
}

/// Round to one decimal place, half away from zero.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn default_avatar(username: &str) -> String {
    format!(
        "https://api.dicebear.com/7.x/avataaars/svg?seed={}",
        urlencoding::encode(username)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hashes_verify_and_reject() {
        let hash = hash_password("password123").unwrap();
        assert_ne!(hash, "password123");
        assert!(verify_password("password123", &hash));
        assert!(!verify_password("password124", &hash));
        assert!(!verify_password("password123", "plaintext"));
    }

    #[test]
    fn sanitize_strips_markup() {
        assert_eq!(sanitize_text("<b>heavy</b> day<script>x()</script>"), "heavy day");
    }

    #[test]
    fn sanitize_keeps_plain_text_unescaped() {
        assert_eq!(sanitize_text("a & b < c"), "a & b < c");
        assert_eq!(sanitize_text("5 < 6 & 7 > 2"), "5 < 6 & 7 > 2");
        assert_eq!(sanitize_text("Push & Pull <i>day</i>"), "Push & Pull day");
    }

    #[test]
    fn length_is_counted_on_submitted_text() {
        assert!(check_length(&"&".repeat(1000), 1000, "Comment").is_ok());
        assert!(matches!(check_length(&"&".repeat(1001), 1000, "Comment"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(matches!(parse_id("abc"), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_id("-1"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn round1_keeps_one_decimal() {
        assert_eq!(round1(7.0 / 3.0), 2.3);
        assert_eq!(round1(4.0), 4.0);
    }
}
