//! The response sink that handlers and middleware write into.

use std::io;

use super::{Headers, StatusCode};

/// Destination for one response: status, headers, then body bytes.
///
/// Handlers receive a `&mut dyn ResponseWriter`. Middleware that needs to observe what
/// an inner handler produces wraps the writer it was given in another
/// `ResponseWriter` (see [`Interceptor`](crate::cache::Interceptor)) and forwards every
/// call it does not care about.
///
/// Status semantics follow HTTP/1.1 servers generally: the status defaults to
/// `200 OK`, and once body bytes have been written the status is committed and later
/// [`write_status`](Self::write_status) calls are ignored by the sink.
pub trait ResponseWriter: Send {
    /// Sets the response status.
    fn write_status(&mut self, status: StatusCode);

    /// Mutable access to the response headers.
    fn headers_mut(&mut self) -> &mut Headers;

    /// Writes body bytes, returning how many were accepted.
    ///
    /// # Errors
    ///
    /// Returns the sink's I/O error, e.g. when the peer has gone away.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Writes the entire buffer, calling [`write`](Self::write) until it is consumed.
    ///
    /// # Errors
    ///
    /// Propagates the first error from [`write`](Self::write), or
    /// [`io::ErrorKind::WriteZero`] if the sink stops accepting bytes.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "response sink accepted zero bytes",
                    ));
                }
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}
