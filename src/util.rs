use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use bitflags::bitflags;
use bytes::Bytes;
use headers::Header;
use http::method::InvalidMethod;
use http::StatusCode;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::errors::DavError;
use crate::DavResult;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const POST = 0x0008;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits() | Self::POST.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
    }
}
impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();

    /// Method names as they appear on the wire, in `Allow` header order.
    pub(crate) fn names(self) -> Vec<&'static str> {
        let all = [
            (DavMethod::OPTIONS, "OPTIONS"),
            (DavMethod::HEAD, "HEAD"),
            (DavMethod::GET, "GET"),
            (DavMethod::POST, "POST"),
            (DavMethod::PUT, "PUT"),
            (DavMethod::DELETE, "DELETE"),
            (DavMethod::PROPFIND, "PROPFIND"),
            (DavMethod::PROPPATCH, "PROPPATCH"),
            (DavMethod::MKCOL, "MKCOL"),
            (DavMethod::COPY, "COPY"),
            (DavMethod::MOVE, "MOVE"),
            (DavMethod::LOCK, "LOCK"),
            (DavMethod::UNLOCK, "UNLOCK"),
        ];
        all.iter()
            .filter(|(m, _)| self.contains(*m))
            .map(|(_, n)| *n)
            .collect()
    }
}

/// A set of allowed [`DavMethod`]s.
pub type DavMethodSet = DavMethod;

// translate method into our own enum that has webdav methods as well.
pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::HEAD,
        http::Method::GET => DavMethod::GET,
        http::Method::PUT => DavMethod::PUT,
        http::Method::POST => DavMethod::POST,
        http::Method::DELETE => DavMethod::DELETE,
        http::Method::OPTIONS => DavMethod::OPTIONS,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PROPFIND,
            "PROPPATCH" => DavMethod::PROPPATCH,
            "MKCOL" => DavMethod::MKCOL,
            "COPY" => DavMethod::COPY,
            "MOVE" => DavMethod::MOVE,
            "LOCK" => DavMethod::LOCK,
            "UNLOCK" => DavMethod::UNLOCK,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| {
            // A trick to get at the value of http::method::InvalidMethod.
            match http::method::Method::from_bytes(b"") {
                Err(e) => e,
                Ok(_) => unreachable!(),
            }
        })
    }
}

lazy_static! {
    static ref STATUS_MESSAGES: HashMap<u16, &'static str> = {
        let mut m = HashMap::new();
        for (code, msg) in [
            (100, "Continue"),
            (101, "Switching Protocols"),
            (102, "Processing"),
            (200, "OK"),
            (201, "Created"),
            (202, "Accepted"),
            (203, "Non-Authoritative Information"),
            (204, "No Content"),
            (205, "Reset Content"),
            (206, "Partial Content"),
            (207, "Multi-Status"),
            (300, "Multiple Choices"),
            (301, "Moved Permanently"),
            (302, "Found"),
            (303, "See Other"),
            (304, "Not Modified"),
            (305, "Use Proxy"),
            (307, "Temporary Redirect"),
            (308, "Permanent Redirect"),
            (400, "Bad Request"),
            (401, "Unauthorized"),
            (402, "Payment Required"),
            (403, "Forbidden"),
            (404, "Not Found"),
            (405, "Method Not Allowed"),
            (406, "Not Acceptable"),
            (407, "Proxy Authentication Required"),
            (408, "Request Timeout"),
            (409, "Conflict"),
            (410, "Gone"),
            (411, "Length Required"),
            (412, "Precondition Failed"),
            (413, "Payload Too Large"),
            (414, "URI Too Long"),
            (415, "Unsupported Media Type"),
            (416, "Range Not Satisfiable"),
            (417, "Expectation Failed"),
            (422, "Unprocessable Entity"),
            (423, "Locked"),
            (424, "Failed Dependency"),
            (426, "Upgrade Required"),
            (428, "Precondition Required"),
            (429, "Too Many Requests"),
            (431, "Request Header Fields Too Large"),
            (500, "Internal Server Error"),
            (501, "Not Implemented"),
            (502, "Bad Gateway"),
            (503, "Service Unavailable"),
            (504, "Gateway Timeout"),
            (505, "HTTP Version Not Supported"),
            (507, "Insufficient Storage"),
        ] {
            m.insert(code, msg);
        }
        m
    };
    static ref RFC1123_RE: Regex = Regex::new(
        r"^\s*[A-Za-z]{3}, (\d{2}) ([A-Za-z]{3}) (\d{4}) (\d{2}):(\d{2}):(\d{2}) GMT\s*$"
    )
    .unwrap();
    static ref RFC850_RE: Regex = Regex::new(
        r"^\s*[A-Za-z]{6,9}, (\d{2})-([A-Za-z]{3})-(\d{2}) (\d{2}):(\d{2}):(\d{2}) GMT\s*$"
    )
    .unwrap();
    static ref ASCTIME_RE: Regex = Regex::new(
        r"^\s*[A-Za-z]{3} ([A-Za-z]{3}) ([ \d]\d) (\d{2}):(\d{2}):(\d{2}) (\d{4})\s*$"
    )
    .unwrap();
}

/// Reason phrase for a status code, as used in `DAV:status` lines.
pub fn status_message(status: StatusCode) -> &'static str {
    match STATUS_MESSAGES.get(&status.as_u16()) {
        Some(msg) => msg,
        None => status.canonical_reason().unwrap_or("Unknown"),
    }
}

pub fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(t) => {
            let tm = time::OffsetDateTime::from_unix_timestamp(t.as_secs() as i64)
                .unwrap_or(time::OffsetDateTime::UNIX_EPOCH);
            tm.to_offset(offset!(UTC))
        }
        Err(_) => time::OffsetDateTime::UNIX_EPOCH.to_offset(offset!(UTC)),
    }
}

pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v: Vec<http::HeaderValue> = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    // 1996-12-19T16:39:57Z
    systemtime_to_offsetdatetime(t)
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// HTTP dates have a resolution of one second.
pub fn truncate_secs(t: SystemTime) -> SystemTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_secs(d.as_secs()),
        Err(e) => {
            let d = e.duration();
            let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
            UNIX_EPOCH - Duration::from_secs(secs)
        }
    }
}

fn month_from_name(name: &str) -> Option<time::Month> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let idx = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name))?;
    time::Month::try_from(idx as u8 + 1).ok()
}

// two-digit years resolve to the year closest to `now`.
fn expand_year(yy: i32, now: i32) -> i32 {
    let mut year = now - now.rem_euclid(100) + yy;
    if year > now + 50 {
        year -= 100;
    } else if year < now - 50 {
        year += 100;
    }
    year
}

fn make_time(year: i32, month: &str, day: &str, h: &str, m: &str, s: &str) -> Option<SystemTime> {
    let month = month_from_name(month)?;
    let date = time::Date::from_calendar_date(year, month, day.trim().parse().ok()?).ok()?;
    let tm = time::Time::from_hms(h.parse().ok()?, m.parse().ok()?, s.parse().ok()?).ok()?;
    let secs = time::PrimitiveDateTime::new(date, tm)
        .assume_utc()
        .unix_timestamp();
    if secs >= 0 {
        Some(UNIX_EPOCH + Duration::from_secs(secs as u64))
    } else {
        Some(UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()))
    }
}

/// Parse an HTTP-date in RFC 1123, RFC 850 or asctime format.
pub fn parse_http_date(s: &str) -> Option<SystemTime> {
    if let Some(c) = RFC1123_RE.captures(s) {
        let year = c[3].parse().ok()?;
        return make_time(year, &c[2], &c[1], &c[4], &c[5], &c[6]);
    }
    if let Some(c) = RFC850_RE.captures(s) {
        let now = time::OffsetDateTime::now_utc().year();
        let year = expand_year(c[3].parse().ok()?, now);
        return make_time(year, &c[2], &c[1], &c[4], &c[5], &c[6]);
    }
    if let Some(c) = ASCTIME_RE.captures(s) {
        let year = c[6].parse().ok()?;
        return make_time(year, &c[1], &c[2], &c[3], &c[4], &c[5]);
    }
    None
}

/// Quote a string per the RFC 7230 `quoted-string` rule.
pub fn quote_string(s: &str) -> String {
    let mut r = String::with_capacity(s.len() + 2);
    r.push('"');
    for c in s.chars() {
        if (c < ' ' && c != '\t') || c == '"' || c == '\\' || c == '\x7f' {
            r.push('\\');
        }
        r.push(c);
    }
    r.push('"');
    r
}

/// A random 69-character MIME boundary.
pub fn mime_boundary() -> String {
    let mut bytes = [0u8; 52];
    OsRng.fill_bytes(&mut bytes);
    let mut s = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    s.truncate(69);
    s
}

// A buffer that implements "Write".
#[derive(Clone)]
pub struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_http_date_formats() {
        let t = UNIX_EPOCH + Duration::from_secs(784111777);
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(t));
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(t));
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(t));
        assert_eq!(systemtime_to_httpdate(t), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 PST"), None);
        assert_eq!(parse_http_date("Sun, 31 Feb 1994 08:49:37 GMT"), None);
    }

    #[test]
    fn test_http_date_roundtrip() {
        let now = SystemTime::now();
        let s = systemtime_to_httpdate(now);
        assert_eq!(parse_http_date(&s), Some(truncate_secs(now)));
    }

    #[test]
    fn test_two_digit_years() {
        assert_eq!(expand_year(94, 2026), 1994);
        assert_eq!(expand_year(76, 2026), 2076);
        assert_eq!(expand_year(77, 2026), 1977);
        assert_eq!(expand_year(5, 2026), 2005);
        assert_eq!(expand_year(10, 2090), 2110);
    }

    #[test]
    fn test_quote_string() {
        assert_eq!(quote_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn test_mime_boundary() {
        let a = mime_boundary();
        let b = mime_boundary();
        assert_eq!(a.len(), 69);
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_status_message() {
        assert_eq!(status_message(StatusCode::LOCKED), "Locked");
        assert_eq!(status_message(StatusCode::INSUFFICIENT_STORAGE), "Insufficient Storage");
    }

    #[test]
    fn test_method_names() {
        let m = DavMethod::GET | DavMethod::OPTIONS | DavMethod::LOCK;
        assert_eq!(m.names(), vec!["OPTIONS", "GET", "LOCK"]);
    }
}
