//! Tests for DriveClient with mocked HTTP responses.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use tempfile::NamedTempFile;

use drive_upload::auth::StaticToken;
use drive_upload::models::{FileListResponse, FileMetadata, FOLDER_MIME_TYPE};
use drive_upload::{DriveClient, DriveError, RemoteDirectory};

fn client_for(server: &ServerGuard) -> DriveClient {
    DriveClient::new(Arc::new(StaticToken("test-token".to_string())))
        .with_base_urls(server.url(), format!("{}/upload", server.url()))
}

fn temp_file(content: &[u8]) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    file
}

mod find_folder {
    use super::*;

    #[tokio::test]
    async fn returns_first_match() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .match_header("authorization", "Bearer test-token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "q".into(),
                    format!(
                        "name = 'reports' and mimeType = '{}' and trashed = false",
                        FOLDER_MIME_TYPE
                    ),
                ),
                Matcher::UrlEncoded("spaces".into(), "drive".into()),
                Matcher::UrlEncoded("pageSize".into(), "10".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"files": [
                    {"id": "first", "name": "reports"},
                    {"id": "second", "name": "reports"}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let id = client.find_folder("reports", None).await.unwrap();

        assert_eq!(id.as_deref(), Some("first"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn constrains_to_parent_and_escapes_quotes() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                format!(
                    "name = 'Bob\\'s files' and mimeType = '{}' and trashed = false and 'parent1' in parents",
                    FOLDER_MIME_TYPE
                ),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"files": []}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let id = client.find_folder("Bob's files", Some("parent1")).await.unwrap();

        assert_eq!(id, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn shared_drive_adds_drive_params_and_root_parent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("driveId".into(), "drive1".into()),
                Matcher::UrlEncoded("corpora".into(), "drive".into()),
                Matcher::UrlEncoded("supportsAllDrives".into(), "true".into()),
                Matcher::Regex("in\\+parents|in%20parents".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"files": [{"id": "f1"}]}).to_string())
            .create_async()
            .await;

        let client = client_for(&server).with_shared_drive("drive1");
        let id = client.find_folder("docs", None).await.unwrap();

        assert_eq!(id.as_deref(), Some("f1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_error_is_parsed() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"error": {"code": 403, "message": "Insufficient Permission"}}).to_string(),
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.find_folder("docs", None).await.unwrap_err();

        match err {
            DriveError::ApiError { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Insufficient Permission");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_keeps_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.find_folder("docs", None).await.unwrap_err();

        assert!(matches!(
            err,
            DriveError::ApiError { status: 502, ref message } if message == "Bad Gateway"
        ));
    }
}

mod create_folder {
    use super::*;

    #[tokio::test]
    async fn posts_folder_metadata() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/files")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({
                "name": "reports",
                "mimeType": FOLDER_MIME_TYPE,
                "parents": ["parent1"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"id": "new-folder"}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let id = client.create_folder("reports", Some("parent1")).await.unwrap();

        assert_eq!(id, "new-folder");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn root_folder_has_no_parents() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/files")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({
                "name": "top",
                "mimeType": FOLDER_MIME_TYPE
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"id": "top-id"}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        assert_eq!(client.create_folder("top", None).await.unwrap(), "top-id");
        mock.assert_async().await;
    }
}

mod create_file {
    use super::*;

    #[tokio::test]
    async fn small_file_uses_multipart() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/upload/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "multipart".into()))
            .match_header("authorization", "Bearer test-token")
            .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
            .match_body(Matcher::Regex("hello drive".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"id": "file1", "name": "notes.txt", "mimeType": "text/plain", "size": "11"})
                    .to_string(),
            )
            .create_async()
            .await;

        let local = temp_file(b"hello drive");
        let client = client_for(&server);
        let file = client
            .create_file(local.path(), "notes.txt", Some("folder1"))
            .await
            .unwrap();

        assert_eq!(file.id, "file1");
        assert_eq!(file.size, Some(11));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn large_file_uses_resumable_chunks() {
        const CHUNK: usize = 256 * 1024;
        const TOTAL: usize = 300 * 1024;

        let mut server = Server::new_async().await;
        let session = format!("{}/session/abc", server.url());

        let init = server
            .mock("POST", "/upload/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "resumable".into()))
            .match_header("x-upload-content-length", TOTAL.to_string().as_str())
            .match_body(Matcher::Json(json!({"name": "big.txt", "parents": ["folder1"]})))
            .with_status(200)
            .with_header("location", &session)
            .create_async()
            .await;

        let first = server
            .mock("PUT", "/session/abc")
            .match_header(
                "content-range",
                format!("bytes 0-{}/{}", CHUNK - 1, TOTAL).as_str(),
            )
            .with_status(308)
            .with_header("range", &format!("bytes=0-{}", CHUNK - 1))
            .create_async()
            .await;

        let last = server
            .mock("PUT", "/session/abc")
            .match_header(
                "content-range",
                format!("bytes {}-{}/{}", CHUNK, TOTAL - 1, TOTAL).as_str(),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"id": "big1", "name": "big.txt"}).to_string())
            .create_async()
            .await;

        let local = temp_file(&vec![b'x'; TOTAL]);
        let client = client_for(&server)
            .with_multipart_threshold(0)
            .with_chunk_size(CHUNK);
        let file = client
            .create_file(local.path(), "big.txt", Some("folder1"))
            .await
            .unwrap();

        assert_eq!(file.id, "big1");
        init.assert_async().await;
        first.assert_async().await;
        last.assert_async().await;
    }

    async fn open_session(server: &mut ServerGuard) -> String {
        let session = format!("{}/session/abc", server.url());
        server
            .mock("POST", "/upload/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "resumable".into()))
            .with_status(200)
            .with_header("location", &session)
            .create_async()
            .await;
        session
    }

    #[tokio::test]
    async fn resume_without_range_header_fails_instead_of_resending() {
        let mut server = Server::new_async().await;
        open_session(&mut server).await;
        let chunk = server
            .mock("PUT", "/session/abc")
            .with_status(308)
            .expect(1)
            .create_async()
            .await;

        let local = temp_file(&[b'x'; 1024]);
        let client = client_for(&server).with_multipart_threshold(0);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.create_file(local.path(), "small.txt", None),
        )
        .await
        .expect("resumable upload did not return");

        assert!(matches!(
            result,
            Err(DriveError::ApiError { status: 308, .. })
        ));
        chunk.assert_async().await;
    }

    #[tokio::test]
    async fn resume_that_does_not_advance_fails() {
        const CHUNK: usize = 256 * 1024;
        const TOTAL: usize = 300 * 1024;

        let mut server = Server::new_async().await;
        open_session(&mut server).await;
        let first = server
            .mock("PUT", "/session/abc")
            .match_header(
                "content-range",
                format!("bytes 0-{}/{}", CHUNK - 1, TOTAL).as_str(),
            )
            .with_status(308)
            .with_header("range", &format!("bytes=0-{}", CHUNK - 1))
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("PUT", "/session/abc")
            .match_header(
                "content-range",
                format!("bytes {}-{}/{}", CHUNK, TOTAL - 1, TOTAL).as_str(),
            )
            .with_status(308)
            .with_header("range", &format!("bytes=0-{}", CHUNK - 1))
            .expect(1)
            .create_async()
            .await;

        let local = temp_file(&vec![b'x'; TOTAL]);
        let client = client_for(&server)
            .with_multipart_threshold(0)
            .with_chunk_size(CHUNK);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.create_file(local.path(), "big.txt", None),
        )
        .await
        .expect("resumable upload did not return");

        assert!(matches!(
            result,
            Err(DriveError::ApiError { status: 308, .. })
        ));
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn missing_local_file_is_reported_before_any_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .create_file(
                std::path::Path::new("/nonexistent/path/file.bin"),
                "file.bin",
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::FileNotFound(_)));
        mock.assert_async().await;
    }
}

mod models {
    use super::*;

    #[test]
    fn test_file_metadata_without_size() {
        let json = json!({
            "id": "folder123",
            "name": "My Folder",
            "mimeType": "application/vnd.google-apps.folder"
        });

        let metadata: FileMetadata = serde_json::from_value(json).unwrap();

        assert_eq!(metadata.id, "folder123");
        assert_eq!(metadata.size, None);
        assert!(metadata.is_folder());
    }

    #[test]
    fn test_file_list_response_empty() {
        let response: FileListResponse = serde_json::from_value(json!({})).unwrap();

        assert!(response.files.is_empty());
    }
}

mod error_handling {
    use drive_upload::error::DriveError;

    #[test]
    fn test_error_display() {
        let err = DriveError::ApiError {
            status: 404,
            message: "File not found".to_string(),
        };

        let display = format!("{}", err);
        assert!(display.contains("404"));
        assert!(display.contains("File not found"));
    }

    #[test]
    fn test_invalid_destination_error() {
        let err = DriveError::InvalidDestination("a/".to_string());
        assert!(format!("{}", err).contains("a/"));
    }
}
