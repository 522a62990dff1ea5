//! Upload photos to an HTTP API as `multipart/form-data` submissions.
//!
//! The [`form`] module assembles RFC 7578 bodies, either eagerly via
//! [`form::MultipartForm`] or incrementally via the
//! [`form::MultipartRequest`] stream for handing to an async HTTP body.
//! The [`upload`] module wraps the upload endpoint itself: validated
//! parameters, bearer authentication and a typed JSON reply.
//!
//! ```no_run
//! use hyper::Client;
//! use mpart_upload::upload::{PhotoUpload, UploadConfig, Uploader};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = UploadConfig::from_env()?;
//! let uploader = Uploader::new(Client::new(), config);
//!
//! let photo = PhotoUpload::new("finish-line.jpg", "00000", "finish line", 100)?
//!     .bib_number("123");
//!
//! let reply = uploader.upload(&photo).await?;
//! println!("photo id: {:?}", reply.photo_id);
//! # Ok(())
//! # }
//! ```

pub mod form;
pub mod upload;
