//! Canned OCR service payloads

#![allow(dead_code)]

pub const ACCESS_TOKEN: &str = "24.test-token.2592000";

pub fn token_body() -> String {
    serde_json::json!({
        "access_token": ACCESS_TOKEN,
        "expires_in": 2_592_000,
    })
    .to_string()
}

pub const TOKEN_ERROR_BODY: &str =
    r#"{"error":"invalid_client","error_description":"unknown client id"}"#;

/// Handwriting response with one `words_result` entry per line.
pub fn words_body(lines: &[&str]) -> String {
    let words: Vec<serde_json::Value> = lines
        .iter()
        .map(|line| serde_json::json!({ "words": line }))
        .collect();
    serde_json::json!({
        "log_id": 1_234_567_890u64,
        "words_result_num": words.len(),
        "words_result": words,
    })
    .to_string()
}

pub const QUOTA_ERROR_BODY: &str = r#"{"error_code":17,"error_msg":"Open api daily request limit reached"}"#;
