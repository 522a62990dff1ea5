//! Assembling `multipart/form-data` request bodies.
//!
//! [`MultipartForm`] builds the whole body in memory and hands back an
//! [`EncodedBody`] carrying the boundary needed for the `Content-Type`
//! header. [`MultipartRequest`] writes the same framing as a `Stream` so
//! the body can be fed to an async HTTP client chunk by chunk.
//!
//! Part names, filenames and values are framed verbatim. Quotes or CRLF
//! sequences inside them will corrupt the framing, so callers must keep
//! them clean.

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use log::debug;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;

/// Errors raised while assembling a multipart body.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MultipartError {
    /// A part that cannot be framed, such as a file part with an empty filename.
    #[error("invalid part: {0}")]
    InvalidInput(&'static str),
}

/// The binary part of a form, held fully in memory.
pub struct FilePart {
    name: String,
    filename: String,
    content_type: String,
    bytes: Bytes,
}

impl FilePart {
    /// Construct a file part from its field name, filename, content type and content.
    pub fn new(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        FilePart {
            name: name.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// A plain text field of a form.
pub struct TextPart {
    name: String,
    value: String,
}

impl TextPart {
    /// Construct a text part given a name and value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        TextPart {
            name: name.into(),
            value: value.into(),
        }
    }

    fn framed(&self, boundary: &str) -> Bytes {
        let mut buf = BytesMut::new();

        push_text_part(&mut buf, boundary, &self.name, &self.value);

        buf.freeze()
    }
}

/// One file part plus zero or more text parts, encoded in one go.
///
/// A form is built fresh per request and consumed by [`encode`](Self::encode).
pub struct MultipartForm {
    boundary: String,
    file: FilePart,
    fields: Vec<TextPart>,
}

impl MultipartForm {
    /// Construct a form around its file part, with a random boundary.
    pub fn new(file: FilePart) -> Self {
        MultipartForm {
            boundary: random_boundary(),
            file,
            fields: Vec::new(),
        }
    }

    /// Construct a form with an explicit boundary, useful for deterministic output.
    pub fn with_boundary(file: FilePart, boundary: impl Into<String>) -> Self {
        MultipartForm {
            boundary: boundary.into(),
            file,
            fields: Vec::new(),
        }
    }

    /// Append a text field. Fields keep their insertion order on the wire.
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(TextPart::new(name, value));
    }

    /// Gets the boundary for the form.
    pub fn get_boundary(&self) -> &str {
        &self.boundary
    }

    /// Encode the form: file part first, then each text field, then the
    /// closing delimiter. Every separator is CRLF.
    pub fn encode(self) -> Result<EncodedBody, MultipartError> {
        if self.file.filename.is_empty() {
            return Err(MultipartError::InvalidInput(
                "file part has an empty filename",
            ));
        }

        let mut buf = BytesMut::with_capacity(self.file.bytes.len() + 256);

        push_file_header(
            &mut buf,
            &self.boundary,
            &self.file.name,
            &self.file.filename,
            &self.file.content_type,
        );
        buf.extend_from_slice(&self.file.bytes);
        buf.extend_from_slice(b"\r\n");

        for field in &self.fields {
            push_text_part(&mut buf, &self.boundary, &field.name, &field.value);
        }

        push_closing(&mut buf, &self.boundary);

        debug!("encoded {} bytes, boundary {}", buf.len(), self.boundary);

        Ok(EncodedBody {
            bytes: buf.freeze(),
            boundary: self.boundary,
        })
    }
}

/// The encoded byte sequence plus the boundary it was framed with.
pub struct EncodedBody {
    /// The full multipart payload.
    pub bytes: Bytes,
    /// The boundary token separating the parts.
    pub boundary: String,
}

impl EncodedBody {
    /// The value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

/// The main `MultipartRequest` struct for streaming multipart submissions to servers
pub struct MultipartRequest<S> {
    boundary: String,
    items: VecDeque<Part<S>>,
    state: Option<WriteState<S>>,
    written: usize,
}

enum WriteState<S> {
    Text(TextPart),
    StreamHeader(StreamPart<S>),
    StreamBody(StreamPart<S>),
    Finished,
}

enum Part<S> {
    Text(TextPart),
    Stream(StreamPart<S>),
}

/// A part whose content is produced by a stream of bytes, used for file content.
pub struct StreamPart<S> {
    name: String,
    filename: String,
    content_type: String,
    stream: S,
}

impl<S> StreamPart<S> {
    /// Construct a stream part providing name, filename & content type.
    pub fn new(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        stream: S,
    ) -> Self {
        StreamPart {
            name: name.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            stream,
        }
    }

    fn write_header(&self, boundary: &str) -> Bytes {
        let mut buf = BytesMut::new();

        push_file_header(
            &mut buf,
            boundary,
            &self.name,
            &self.filename,
            &self.content_type,
        );

        buf.freeze()
    }
}

impl<E, S> MultipartRequest<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    /// Construct a new MultipartRequest with a given boundary
    ///
    /// If you want a boundary generated automatically, then you can use `MultipartRequest::default()`
    pub fn new(boundary: impl Into<String>) -> Self {
        MultipartRequest {
            boundary: boundary.into(),
            items: VecDeque::new(),
            state: None,
            written: 0,
        }
    }

    fn next_item(&mut self) -> WriteState<S> {
        match self.items.pop_front() {
            Some(Part::Text(field)) => WriteState::Text(field),
            Some(Part::Stream(part)) => WriteState::StreamHeader(part),
            None => WriteState::Finished,
        }
    }

    /// Add a file part backed by a raw stream of `Result<Bytes, Error>`
    pub fn add_stream(
        &mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        stream: S,
    ) {
        let part = StreamPart::new(name, filename, content_type, stream);

        if self.state.is_some() {
            self.items.push_back(Part::Stream(part));
        } else {
            self.state = Some(WriteState::StreamHeader(part));
        }
    }

    /// Add a text field to the request
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let field = TextPart::new(name, value);

        if self.state.is_some() {
            self.items.push_back(Part::Text(field));
        } else {
            self.state = Some(WriteState::Text(field));
        }
    }

    /// Gets the boundary for the request
    ///
    /// This is useful for supplying the `Content-Type` header
    pub fn get_boundary(&self) -> &str {
        &self.boundary
    }

    fn write_ending(&self) -> Bytes {
        let mut buf = BytesMut::new();

        push_closing(&mut buf, &self.boundary);

        buf.freeze()
    }
}

impl<E, S> Default for MultipartRequest<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    fn default() -> Self {
        MultipartRequest {
            boundary: random_boundary(),
            items: VecDeque::new(),
            state: None,
            written: 0,
        }
    }
}

impl<E, S> Stream for MultipartRequest<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let self_ref = self.get_mut();

        let mut bytes = None;

        let mut new_state = None;

        let mut waiting = false;

        if let Some(state) = self_ref.state.take() {
            match state {
                WriteState::StreamHeader(part) => {
                    debug!("writing stream header for:{}", &part.filename);
                    bytes = Some(part.write_header(&self_ref.boundary));

                    new_state = Some(WriteState::StreamBody(part));
                }
                WriteState::StreamBody(mut part) => {
                    debug!("writing stream body for:{}", &part.filename);

                    match Pin::new(&mut part.stream).poll_next(cx) {
                        Poll::Pending => {
                            waiting = true;
                            new_state = Some(WriteState::StreamBody(part));
                        }
                        Poll::Ready(Some(Ok(chunk))) => {
                            bytes = Some(chunk);
                            new_state = Some(WriteState::StreamBody(part));
                        }
                        Poll::Ready(None) => {
                            //The part terminator shares a chunk with whatever comes next
                            let mut buf = BytesMut::new();

                            buf.extend_from_slice(b"\r\n");

                            match self_ref.next_item() {
                                WriteState::StreamHeader(part) => {
                                    debug!("writing next stream header");
                                    buf.extend_from_slice(&part.write_header(&self_ref.boundary));
                                    new_state = Some(WriteState::StreamBody(part));
                                }
                                WriteState::Text(field) => {
                                    debug!("writing next field");
                                    buf.extend_from_slice(&field.framed(&self_ref.boundary));
                                    new_state = Some(self_ref.next_item());
                                }
                                WriteState::Finished => {
                                    debug!("writing ending");
                                    buf.extend_from_slice(&self_ref.write_ending());
                                }
                                _ => (),
                            }

                            bytes = Some(buf.freeze())
                        }
                        an_error @ Poll::Ready(Some(Err(_))) => return an_error,
                    }
                }
                WriteState::Finished => {
                    debug!("writing ending");
                    bytes = Some(self_ref.write_ending());
                }
                WriteState::Text(field) => {
                    debug!("writing field: {}", &field.name);
                    bytes = Some(field.framed(&self_ref.boundary));
                    new_state = Some(self_ref.next_item());
                }
            }
        }

        if let Some(state) = new_state {
            self_ref.state = Some(state);
        }

        if waiting {
            return Poll::Pending;
        }

        if let Some(ref bytes) = bytes {
            self_ref.written += bytes.len();
        } else {
            debug!("stream finished, total bytes:{}", self_ref.written);
        }

        Poll::Ready(bytes.map(Ok))
    }
}

/// A simple in-memory stream that can be used as a part's content
#[derive(Clone)]
pub struct ByteStream {
    bytes: Option<Bytes>,
}

impl ByteStream {
    /// Create a new ByteStream based upon the byte slice (note: this will copy from the slice)
    pub fn new(bytes: &[u8]) -> Self {
        let mut buf = BytesMut::new();

        buf.extend_from_slice(bytes);

        ByteStream {
            bytes: Some(buf.freeze()),
        }
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.as_mut().bytes.take().map(Ok))
    }
}

fn random_boundary() -> String {
    let mut rng = thread_rng();

    (&mut rng)
        .sample_iter(Alphanumeric)
        .take(60)
        .map(char::from)
        .collect()
}

fn push_delimiter(buf: &mut BytesMut, boundary: &str) {
    buf.extend_from_slice(b"--");
    buf.extend_from_slice(boundary.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

fn push_file_header(
    buf: &mut BytesMut,
    boundary: &str,
    name: &str,
    filename: &str,
    content_type: &str,
) {
    push_delimiter(buf, boundary);

    buf.extend_from_slice(b"Content-Disposition: form-data; name=\"");
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b"\"; filename=\"");
    buf.extend_from_slice(filename.as_bytes());
    buf.extend_from_slice(b"\"\r\n");
    buf.extend_from_slice(b"Content-Type: ");
    buf.extend_from_slice(content_type.as_bytes());
    buf.extend_from_slice(b"\r\n\r\n");
}

fn push_text_part(buf: &mut BytesMut, boundary: &str, name: &str, value: &str) {
    push_delimiter(buf, boundary);

    buf.extend_from_slice(b"Content-Disposition: form-data; name=\"");
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b"\"\r\n\r\n");

    buf.extend_from_slice(value.as_bytes());

    buf.extend_from_slice(b"\r\n");
}

fn push_closing(buf: &mut BytesMut, boundary: &str) {
    buf.extend_from_slice(b"--");
    buf.extend_from_slice(boundary.as_bytes());
    buf.extend_from_slice(b"--\r\n");
}
