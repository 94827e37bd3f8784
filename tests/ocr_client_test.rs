//! Handwriting OCR client against a mocked token and recognition endpoint.
//!
//! Run with: cargo test --test ocr_client_test

mod fixtures;
mod helpers;

use fixtures::*;
use hanzi_import::models::recognition::Recognition;
use hanzi_import::services::merge::GridShape;
use hanzi_import::services::ocr::{HandwritingOcrClient, OcrError, OcrSettings, Recognizer};
use hanzi_import::services::storage::ObjectStore;
use helpers::*;
use mockito::{Matcher, Mock, ServerGuard};
use std::sync::Arc;
use std::time::Duration;

const TOKEN_PATH: &str = "/oauth/2.0/token";
const HANDWRITING_PATH: &str = "/rest/2.0/ocr/v1/handwriting";
const IMAGE_BASE_URL: &str = "https://images.test";

fn client(server: &ServerGuard, store: Arc<MemoryObjectStore>) -> HandwritingOcrClient {
    let settings = OcrSettings {
        api_key: Some("api-key".to_string()),
        secret_key: Some("secret-key".to_string()),
        base_url: server.url(),
        timeout: Duration::from_secs(5),
    };
    HandwritingOcrClient::new(settings, Some(store as Arc<dyn ObjectStore>)).unwrap()
}

async fn mock_token(server: &mut ServerGuard, hits: usize) -> Mock {
    server
        .mock("POST", TOKEN_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            Matcher::UrlEncoded("client_id".into(), "api-key".into()),
            Matcher::UrlEncoded("client_secret".into(), "secret-key".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body())
        .expect(hits)
        .create_async()
        .await
}

async fn mock_handwriting(server: &mut ServerGuard, status: usize, body: String, hits: usize) -> Mock {
    server
        .mock("POST", HANDWRITING_PATH)
        .match_query(Matcher::UrlEncoded("access_token".into(), ACCESS_TOKEN.into()))
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("detect_direction".into(), "true".into()),
            Matcher::Regex(format!("url={}", "https%3A%2F%2Fimages.test%2Focr%2F")),
        ]))
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

#[tokio::test]
async fn test_token_is_reused_across_recognitions() {
    let mut server = mockito::Server::new_async().await;
    let token = mock_token(&mut server, 1).await;
    let ocr = mock_handwriting(&mut server, 200, words_body(&["永"]), 2).await;

    let dir = tempfile::tempdir().unwrap();
    let first = write_png(&dir.path().join("a.png"), 8, 8);
    std::fs::write(dir.path().join("b.png"), png_bytes(8, 8, 200)).unwrap();
    let second = dir.path().join("b.png");

    let store = Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL));
    let client = client(&server, store.clone());

    assert_eq!(
        client.recognize(&first).await.unwrap(),
        Recognition::Single("永".to_string())
    );
    assert_eq!(
        client.recognize(&second).await.unwrap(),
        Recognition::Single("永".to_string())
    );

    token.assert_async().await;
    ocr.assert_async().await;
    assert_eq!(store.keys().len(), 2);
    assert!(store.keys().iter().all(|k| k.starts_with("ocr/") && k.ends_with(".png")));
}

#[tokio::test]
async fn test_identical_images_share_one_stored_object() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server, 1).await;
    let _ocr = mock_handwriting(&mut server, 200, words_body(&["日"]), 2).await;

    let dir = tempfile::tempdir().unwrap();
    let bytes = png_bytes(6, 6, 42);
    let a = dir.path().join("copy1.png");
    let b = dir.path().join("copy2.png");
    std::fs::write(&a, &bytes).unwrap();
    std::fs::write(&b, &bytes).unwrap();

    let store = Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL));
    let client = client(&server, store.clone());
    client.recognize(&a).await.unwrap();
    client.recognize(&b).await.unwrap();

    assert_eq!(store.keys().len(), 1);
}

#[tokio::test]
async fn test_multi_line_result_is_split_into_characters() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server, 1).await;
    let _ocr = mock_handwriting(&mut server, 200, words_body(&["日 月", "星"]), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let image = write_png(&dir.path().join("sky.png"), 8, 8);
    let client = client(&server, Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL)));

    let recognition = client.recognize(&image).await.unwrap();
    assert_eq!(
        recognition,
        Recognition::Multiple(vec!["日".into(), "月".into(), "星".into()])
    );
}

#[tokio::test]
async fn test_empty_words_result_is_empty_recognition() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server, 1).await;
    let _ocr = mock_handwriting(&mut server, 200, words_body(&[]), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let image = write_png(&dir.path().join("blank.png"), 8, 8);
    let client = client(&server, Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL)));

    assert!(client.recognize(&image).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_token_without_access_token_is_an_auth_error() {
    let mut server = mockito::Server::new_async().await;
    let _token = server
        .mock("POST", TOKEN_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(TOKEN_ERROR_BODY)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let image = write_png(&dir.path().join("a.png"), 8, 8);
    let client = client(&server, Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL)));

    let err = client.recognize(&image).await.unwrap_err();
    assert!(matches!(err, OcrError::Auth(ref msg) if msg.contains("unknown client id")));
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server, 1).await;
    let _ocr = mock_handwriting(&mut server, 502, "bad gateway".to_string(), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let image = write_png(&dir.path().join("a.png"), 8, 8);
    let client = client(&server, Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL)));

    let err = client.recognize(&image).await.unwrap_err();
    assert!(matches!(err, OcrError::Status { status: 502, .. }));
}

#[tokio::test]
async fn test_service_error_code_is_an_error() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server, 1).await;
    let _ocr = mock_handwriting(&mut server, 200, QUOTA_ERROR_BODY.to_string(), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let image = write_png(&dir.path().join("a.png"), 8, 8);
    let client = client(&server, Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL)));

    let err = client.recognize(&image).await.unwrap_err();
    assert!(matches!(err, OcrError::Remote { code: 17, .. }));
}

#[tokio::test]
async fn test_missing_image_fails_before_upload() {
    let server = mockito::Server::new_async().await;
    let store = Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL));
    let client = client(&server, store.clone());

    let dir = tempfile::tempdir().unwrap();
    let err = client
        .recognize(&dir.path().join("gone.png"))
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::MissingImage(_)));
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_batch_recognition_merges_then_flattens() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server, 1).await;
    let ocr = server
        .mock("POST", HANDWRITING_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(words_body(&["日月", "星"]))
        .expect(2)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let images: Vec<_> = (0..5)
        .map(|i| write_png(&dir.path().join(format!("{i}.png")), 20, 30))
        .collect();
    let client = client(&server, Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL)));

    let scratch = tempfile::tempdir().unwrap();
    let batch = client
        .batch_recognize_in(&images, GridShape { cols: 2, rows: 2 }, scratch.path())
        .await
        .unwrap();

    ocr.assert_async().await;
    assert_eq!(batch.merged_paths.len(), 2);
    assert!(batch
        .merged_paths
        .iter()
        .all(|p| p.is_file() && p.starts_with(scratch.path())));
    assert_eq!(batch.characters, vec!["日", "月", "星", "日", "月", "星"]);

    for merged in &batch.merged_paths {
        std::fs::remove_file(merged).unwrap();
    }
}

#[tokio::test]
async fn test_failed_batch_leaves_no_composites_behind() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server, 1).await;
    let _ocr = server
        .mock("POST", HANDWRITING_PATH)
        .match_query(Matcher::Any)
        .with_status(502)
        .with_body("bad gateway")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let images: Vec<_> = (0..5)
        .map(|i| write_png(&dir.path().join(format!("{i}.png")), 20, 30))
        .collect();
    let client = client(&server, Arc::new(MemoryObjectStore::new(IMAGE_BASE_URL)));

    let scratch = tempfile::tempdir().unwrap();
    let err = client
        .batch_recognize_in(&images, GridShape { cols: 2, rows: 2 }, scratch.path())
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::Status { status: 502, .. }));
    let leftovers: Vec<_> = std::fs::read_dir(scratch.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "composites left behind: {leftovers:?}");
}
