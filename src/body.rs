//! Request and response bodies.
//!
//! Response bodies are either a single buffer (XML documents, error
//! messages, whole or single-range entity content) or a stream of
//! buffers (`multipart/byteranges`).
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::{BoxStream, Stream};
use http::header::HeaderMap;
use http_body::{Body as HttpBody, SizeHint};

use pin_project::pin_project;
use pin_utils::pin_mut;

/// Body of the responses produced by [`DavHandler`](crate::DavHandler).
///
/// Implements both `Stream` and `http_body::Body`.
pub struct Body {
    inner: BodyType,
}

enum BodyType {
    Bytes(Option<Bytes>),
    Stream(BoxStream<'static, Result<Bytes, io::Error>>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.inner {
            BodyType::Bytes(b) => {
                let len = b.as_ref().map(|b| b.len()).unwrap_or(0);
                f.debug_struct("Body").field("bytes", &len).finish()
            }
            BodyType::Stream(_) => f.write_str("Body(stream)"),
        }
    }
}

impl Body {
    pub fn empty() -> Body {
        Body {
            inner: BodyType::Bytes(None),
        }
    }

    pub fn stream(stream: impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static) -> Body {
        Body {
            inner: BodyType::Stream(Box::pin(stream)),
        }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match &mut self.inner {
            BodyType::Bytes(bytes) => Poll::Ready(bytes.take().filter(|b| !b.is_empty()).map(Ok)),
            BodyType::Stream(stream) => {
                pin_mut!(stream);
                stream.poll_next(cx)
            }
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(&self.inner, BodyType::Bytes(None))
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            BodyType::Bytes(b) => SizeHint::with_exact(b.as_ref().map(|b| b.len() as u64).unwrap_or(0)),
            BodyType::Stream(_) => SizeHint::default(),
        }
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body::from(Bytes::from(t))
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body::from(Bytes::copy_from_slice(t.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(t: Vec<u8>) -> Body {
        Body::from(Bytes::from(t))
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        Body {
            inner: BodyType::Bytes(Some(t)),
        }
    }
}

// Adapts a `Stream` request body to `http_body::Body`.
#[pin_project]
pub(crate) struct StreamBody<B> {
    #[pin]
    body: B,
}

impl<ReqBody, ReqData, ReqError> HttpBody for StreamBody<ReqBody>
where
    ReqData: Buf + Send,
    ReqError: StdError + Send + Sync + 'static,
    ReqBody: Stream<Item = Result<ReqData, ReqError>>,
{
    type Data = ReqData;
    type Error = ReqError;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.project().body.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }
}

impl<B> StreamBody<B> {
    pub fn new(body: B) -> StreamBody<B> {
        StreamBody { body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn bytes_body() {
        let mut b = Body::from("hello");
        assert_eq!(http_body::Body::size_hint(&b).exact(), Some(5));
        assert_eq!(b.next().await.unwrap().unwrap(), Bytes::from("hello"));
        assert!(b.next().await.is_none());
        let mut e = Body::empty();
        assert!(HttpBody::is_end_stream(&e));
        assert!(e.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_body() {
        let s = futures_util::stream::iter(vec![Ok(Bytes::from("a")), Ok(Bytes::from("b"))]);
        let b = Body::stream(s);
        let parts: Vec<_> = b.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec![Bytes::from("a"), Bytes::from("b")]);
    }
}
