use std::io;

use bytes::Bytes;
use headers::HeaderMapExt;
use http::header::{HeaderValue, ACCEPT_RANGES, CONTENT_TYPE, LAST_MODIFIED};
use http::{Method, Request, Response, StatusCode};

use crate::body::Body;
use crate::condition::ConditionCode;
use crate::conditional::{http_preconditions, if_range_matches};
use crate::davhandler::DavInner;
use crate::davheaders::{self, ContentRange};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::service::{DavResource, EntityMetadata};
use crate::util::{mime_boundary, quote_string, systemtime_to_httpdate, DavMethod};
use crate::DavResult;

// validators that go on 200, 206 and 304 responses.
fn entity_headers(res: &mut Response<Body>, meta: &EntityMetadata) {
    let h = res.headers_mut();
    if let Some(etag) = meta.etag.as_ref() {
        h.typed_insert(davheaders::ETag(etag.clone()));
    }
    if let Some(modified) = meta.modified {
        if let Ok(v) = HeaderValue::from_str(&systemtime_to_httpdate(modified)) {
            h.insert(LAST_MODIFIED, v);
        }
    }
}

fn header_value(s: &str) -> DavResult<HeaderValue> {
    HeaderValue::from_str(s).map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))
}

impl DavInner {
    pub(crate) async fn handle_get(&self, req: &Request<()>, path: &DavPath) -> DavResult<Response<Body>> {
        let head = req.method() == Method::HEAD;
        let method = if head { DavMethod::HEAD } else { DavMethod::GET };

        let resource = self
            .resolve(path, method)
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        let mut res = Response::new(Body::empty());
        let mut path = path.clone();
        self.fixpath(&mut res, &mut path, &*resource);
        let meta = resource.metadata().clone();

        if let Some(cond) = http_preconditions(req, Some(&meta)) {
            if cond.status() != StatusCode::NOT_MODIFIED {
                return Err(cond.into());
            }
            entity_headers(&mut res, &meta);
            *res.status_mut() = StatusCode::NOT_MODIFIED;
            return Ok(res);
        }

        if meta.is_collection {
            return self.handle_autoindex(res, &path, resource, head).await;
        }

        entity_headers(&mut res, &meta);
        let content_type = meta
            .media_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        res.headers_mut()
            .insert(CONTENT_TYPE, header_value(&content_type)?);
        res.headers_mut()
            .insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        // without a known length we read everything up front.
        let (len, data) = match meta.length {
            Some(len) => (len, None),
            None => {
                let data = resource.read(0, None).await?;
                (data.len() as u64, Some(data))
            }
        };

        let ranges = match req.headers().typed_get::<davheaders::Range>() {
            Some(r) if if_range_matches(req, &meta) => Some(r),
            _ => None,
        };

        if let Some(range) = ranges {
            let ranges = match range.satisfiable(len) {
                Some(r) => r,
                None => {
                    debug!("range {:?} not satisfiable for length {}", range, len);
                    let mut res = Response::new(Body::empty());
                    *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                    res.headers_mut().typed_insert(ContentRange::unsatisfied(len));
                    res.headers_mut().typed_insert(headers::ContentLength(0));
                    return Ok(res);
                }
            };
            *res.status_mut() = StatusCode::PARTIAL_CONTENT;

            if ranges.len() == 1 {
                let (start, end) = ranges[0];
                let count = end - start + 1;
                if let Some(cr) = ContentRange::new(start, count, Some(len)) {
                    res.headers_mut().typed_insert(cr);
                }
                res.headers_mut().typed_insert(headers::ContentLength(count));
                if !head {
                    let body = match data {
                        Some(d) => d.slice(start as usize..(end + 1) as usize),
                        None => resource.read(start, Some(count)).await?,
                    };
                    *res.body_mut() = Body::from(body);
                }
                return Ok(res);
            }

            let boundary = mime_boundary();
            let ctype = format!("multipart/byteranges; boundary={}", quote_string(&boundary));
            res.headers_mut().insert(CONTENT_TYPE, header_value(&ctype)?);
            if !head {
                *res.body_mut() = multipart_body(resource, data, ranges, len, boundary, content_type);
            }
            return Ok(res);
        }

        res.headers_mut().typed_insert(headers::ContentLength(len));
        if !head {
            let body = match data {
                Some(d) => d,
                None => resource.read(0, None).await?,
            };
            *res.body_mut() = Body::from(body);
        }
        Ok(res)
    }

    async fn handle_autoindex(
        &self,
        mut res: Response<Body>,
        path: &DavPath,
        resource: Box<dyn DavResource>,
        head: bool,
    ) -> DavResult<Response<Body>> {
        if !self.autoindex {
            return Err(ConditionCode::method_not_allowed().into());
        }
        let mut children = resource.children().await?;
        children.sort_by(|a, b| {
            let (ac, bc) = (a.metadata().is_collection, b.metadata().is_collection);
            bc.cmp(&ac).then_with(|| a.member_name().cmp(&b.member_name()))
        });

        let title = htmlescape::encode_minimal(&path.with_prefix().to_string());
        let mut w = String::new();
        w.push_str("<html><head>\n");
        w.push_str(&format!("<title>Index of {}</title>\n", title));
        w.push_str("<style>\n");
        w.push_str("table { border-collapse: separate; border-spacing: 1.5em 0.25em; }\n");
        w.push_str("h1 { padding-left: 0.3em; }\n");
        w.push_str(".mono { font-family: monospace; }\n");
        w.push_str("</style>\n");
        w.push_str("</head><body>\n");
        w.push_str(&format!("<h1>Index of {}</h1>\n", title));
        w.push_str("<table>\n");
        w.push_str("<tr><th>Name</th><th>Last modified</th><th>Size</th></tr>\n");
        if !path.is_root() {
            w.push_str("<tr><td><a href=\"..\">Parent Directory</a></td><td>&nbsp;</td><td class=\"mono\" align=\"right\">[DIR]</td></tr>\n");
        }
        for child in &children {
            let meta = child.metadata();
            let mut name = child.member_name();
            if meta.is_collection {
                name.push('/');
            }
            let href = self.href(child.path());
            let modified = meta
                .modified
                .map(systemtime_to_httpdate)
                .unwrap_or_default();
            let size = if meta.is_collection {
                "[DIR]".to_string()
            } else {
                meta.length.map(|l| l.to_string()).unwrap_or_default()
            };
            w.push_str(&format!(
                "<tr><td><a href=\"{}\">{}</a></td><td class=\"mono\">{}</td><td class=\"mono\" align=\"right\">{}</td></tr>\n",
                htmlescape::encode_attribute(&href),
                htmlescape::encode_minimal(&name),
                modified,
                size
            ));
        }
        w.push_str("</table></body></html>\n");

        let h = res.headers_mut();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        h.typed_insert(headers::ContentLength(w.len() as u64));
        if !head {
            *res.body_mut() = Body::from(w);
        }
        Ok(res)
    }
}

// multipart/byteranges, one part per range, read as the client consumes it.
fn multipart_body(
    resource: Box<dyn DavResource>,
    data: Option<Bytes>,
    ranges: Vec<(u64, u64)>,
    len: u64,
    boundary: String,
    content_type: String,
) -> Body {
    Body::stream(async_stream::stream! {
        for (start, end) in ranges {
            let hdr = format!(
                "\r\n--{}\r\nContent-Type: {}\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
                boundary, content_type, start, end, len
            );
            yield Ok(Bytes::from(hdr));
            let part = match data.as_ref() {
                Some(d) => Ok(d.slice(start as usize..(end + 1) as usize)),
                None => resource.read(start, Some(end - start + 1)).await,
            };
            match part {
                Ok(b) => yield Ok(b),
                Err(e) => {
                    yield Err(io::Error::new(io::ErrorKind::Other, e.to_string()));
                    return;
                }
            }
        }
        yield Ok(Bytes::from(format!("\r\n--{}--\r\n", boundary)));
    })
}
