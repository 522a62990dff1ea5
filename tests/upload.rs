use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::Bytes;
use futures_util::stream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use mpart_upload::form::{FilePart, MultipartForm};
use mpart_upload::upload::{PhotoUpload, UploadConfig, UploadError, Uploader};

#[tokio::test]
async fn parser_recovers_parts_in_order() {
    let mut form = MultipartForm::new(FilePart::new(
        "image",
        "a.png",
        "image/png",
        vec![0u8, 1, 2, 3],
    ));

    form.add_field("eventId", "00000");
    form.add_field("price", "100");

    let encoded = form.encode().expect("encode");
    let boundary = encoded.boundary.clone();

    let body = stream::iter([Ok::<Bytes, Infallible>(encoded.bytes)]);
    let mut multipart = multer::Multipart::new(body, boundary);

    let field = multipart.next_field().await.unwrap().expect("image part");
    assert_eq!(field.name(), Some("image"));
    assert_eq!(field.file_name(), Some("a.png"));
    assert_eq!(
        field.content_type().map(|mime| mime.essence_str()),
        Some("image/png")
    );
    assert_eq!(
        field.bytes().await.unwrap(),
        Bytes::from_static(&[0, 1, 2, 3])
    );

    let field = multipart.next_field().await.unwrap().expect("eventId part");
    assert_eq!(field.name(), Some("eventId"));
    assert_eq!(field.text().await.unwrap(), "00000");

    let field = multipart.next_field().await.unwrap().expect("price part");
    assert_eq!(field.name(), Some("price"));
    assert_eq!(field.text().await.unwrap(), "100");

    assert!(multipart.next_field().await.unwrap().is_none());
}

#[tokio::test]
async fn parser_recovers_binary_content_exactly() {
    // Dashes and CRLFs inside the content must survive the framing
    let content = b"Lorem\r\n--tricky\r\nIpsum--".to_vec();

    let form = MultipartForm::new(FilePart::new(
        "image",
        "a.bin",
        "application/octet-stream",
        content.clone(),
    ));

    let encoded = form.encode().expect("encode");
    let boundary = encoded.boundary.clone();

    let body = stream::iter([Ok::<Bytes, Infallible>(encoded.bytes)]);
    let mut multipart = multer::Multipart::new(body, boundary);

    let field = multipart.next_field().await.unwrap().expect("image part");
    assert_eq!(field.bytes().await.unwrap(), Bytes::from(content));

    assert!(multipart.next_field().await.unwrap().is_none());
}

async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let authorized = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == "Bearer secret-token")
        .unwrap_or(false);

    if !authorized {
        return Ok(Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Body::from(r#"{"error":"bad token"}"#))
            .unwrap());
    }

    let content_type = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let boundary = match multer::parse_boundary(&content_type) {
        Ok(boundary) => boundary,
        Err(_) => {
            return Ok(Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Body::from(r#"{"error":"not multipart"}"#))
                .unwrap());
        }
    };

    let mut multipart = multer::Multipart::new(req.into_body(), boundary);
    let mut names = Vec::new();

    while let Some(field) = multipart.next_field().await.unwrap() {
        names.push(field.name().unwrap_or_default().to_string());
        field.bytes().await.unwrap();
    }

    if names != ["image", "eventId", "bibNumber", "location", "price"] {
        return Ok(Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Body::from(r#"{"error":"unexpected fields"}"#))
            .unwrap());
    }

    Ok(Response::new(Body::from(
        r#"{"success":true,"photoId":"p-1","originalFileId":"f-1","cloudflareId":"c-1","message":"stored"}"#,
    )))
}

async fn spawn_server() -> SocketAddr {
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
    let addr = server.local_addr();

    tokio::spawn(server);

    addr
}

fn write_photo(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, [0u8, 1, 2, 3]).expect("write photo");
    path
}

#[tokio::test]
async fn uploads_end_to_end() {
    let addr = spawn_server().await;
    let photo_path = write_photo("mpart-upload-e2e.png");

    let config = UploadConfig::new(
        &format!("http://{addr}/api/photographer/upload"),
        "secret-token",
    )
    .expect("config");

    let uploader = Uploader::new(hyper::Client::new(), config);

    let photo = PhotoUpload::new(&photo_path, "00000", "finish line", 100)
        .expect("photo")
        .bib_number("123");

    let reply = uploader.upload(&photo).await.expect("upload");

    assert!(reply.success);
    assert_eq!(reply.photo_id.as_deref(), Some("p-1"));
    assert_eq!(reply.original_file_id.as_deref(), Some("f-1"));
    assert_eq!(reply.cloudflare_id.as_deref(), Some("c-1"));
    assert_eq!(reply.message.as_deref(), Some("stored"));
}

#[tokio::test]
async fn surfaces_api_errors() {
    let addr = spawn_server().await;
    let photo_path = write_photo("mpart-upload-err.png");

    let config = UploadConfig::new(
        &format!("http://{addr}/api/photographer/upload"),
        "wrong-token",
    )
    .expect("config");

    let uploader = Uploader::new(hyper::Client::new(), config);

    let photo = PhotoUpload::new(&photo_path, "00000", "finish line", 100).expect("photo");

    match uploader.upload(&photo).await {
        Err(UploadError::Api { status, message }) => {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(message, "bad token");
        }
        other => panic!("expected an api error, got {other:?}"),
    }
}
