//! Response writer that keeps a copy of every body byte it forwards.

use std::io;

use bytes::{Bytes, BytesMut};

use crate::http::{Headers, ResponseWriter, StatusCode};

/// Wraps a [`ResponseWriter`] and records the body written through it.
///
/// Body bytes are copied into a buffer and then forwarded unchanged; the result of
/// [`write`](ResponseWriter::write) is whatever the wrapped writer returned. Status and
/// header calls go straight to the wrapped writer and are not recorded.
///
/// The buffer is only allocated once the first body bytes arrive.
///
/// # Examples
///
/// ```
/// use memoserve::cache::Interceptor;
/// use memoserve::http::{Response, ResponseWriter};
///
/// let mut response = Response::default();
/// let mut interceptor = Interceptor::new(&mut response);
/// interceptor.write_all(b"hello").unwrap();
/// assert_eq!(interceptor.captured(), b"hello");
///
/// let captured = interceptor.into_captured();
/// assert_eq!(&captured[..], b"hello");
/// assert_eq!(response.content(), b"hello");
/// ```
pub struct Interceptor<'a> {
    inner: &'a mut dyn ResponseWriter,
    captured: Option<BytesMut>,
}

impl<'a> Interceptor<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self {
            inner,
            captured: None,
        }
    }

    /// The bytes written so far.
    pub fn captured(&self) -> &[u8] {
        self.captured.as_deref().unwrap_or_default()
    }

    /// Releases the wrapped writer and returns everything that was written.
    pub fn into_captured(self) -> Bytes {
        self.captured.map(BytesMut::freeze).unwrap_or_default()
    }
}

impl ResponseWriter for Interceptor<'_> {
    fn write_status(&mut self, status: StatusCode) {
        self.inner.write_status(status);
    }

    fn headers_mut(&mut self) -> &mut Headers {
        self.inner.headers_mut()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let captured = self
            .captured
            .get_or_insert_with(|| BytesMut::with_capacity(buf.len()));
        let before = captured.len();
        captured.extend_from_slice(buf);

        let written = self.inner.write(buf)?;
        // Short write: the caller resends the tail, so drop it from the capture.
        if let Some(captured) = self.captured.as_mut() {
            captured.truncate(before + written);
        }
        Ok(written)
    }
}
