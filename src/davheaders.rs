//! Typed headers: the WebDAV ones from RFC 4918, and our own versions
//! of the conditional and range headers, which need to keep weak entity
//! tags, three date formats and `Content-Range` on requests.
use std::fmt;
use std::time::{Duration, SystemTime};

use headers::Header;
use http::header::{HeaderName, HeaderValue};
use regex::Regex;

use crate::util::{parse_http_date, systemtime_to_httpdate};

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref ETAG: HeaderName = HeaderName::from_static("etag");
    static ref IF_RANGE: HeaderName = HeaderName::from_static("if-range");
    static ref IF_MATCH: HeaderName = HeaderName::from_static("if-match");
    static ref IF_NONE_MATCH: HeaderName = HeaderName::from_static("if-none-match");
    static ref IF_MODIFIED_SINCE: HeaderName = HeaderName::from_static("if-modified-since");
    static ref IF_UNMODIFIED_SINCE: HeaderName = HeaderName::from_static("if-unmodified-since");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref CONTENT_LOCATION: HeaderName = HeaderName::from_static("content-location");
    static ref CONTENT_RANGE: HeaderName = HeaderName::from_static("content-range");
    static ref RANGE: HeaderName = HeaderName::from_static("range");
    static ref CONTENT_RANGE_RE: Regex =
        Regex::new(r"^\s*bytes (?:\*|(\d+)-(\d+))/(?:\*|(\d+))\s*$").unwrap();
}

fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        return Err(invalid());
    }
    Ok(v)
}

fn one_str<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    one(values)?.to_str().map_err(|_| invalid())
}

// all values of a header, joined as if it were one comma separated list.
fn joined<'i, I>(values: &mut I) -> Result<String, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let mut s = String::new();
    for v in values {
        if !s.is_empty() {
            s.push(',');
        }
        s.push_str(v.to_str().map_err(|_| invalid())?);
    }
    if s.is_empty() {
        return Err(invalid());
    }
    Ok(s)
}

fn invalid() -> headers::Error {
    headers::Error::invalid()
}

fn to_value(s: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(s).ok()
}

/// An HTTP entity tag (RFC 7232 section 2.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTag {
    tag: String,
    weak: bool,
}

impl EntityTag {
    /// Create a tag. Returns `None` if the tag contains characters that
    /// are not allowed in an entity tag.
    pub fn new(weak: bool, tag: impl Into<String>) -> Option<EntityTag> {
        let tag = tag.into();
        if !EntityTag::is_valid(&tag) {
            return None;
        }
        Some(EntityTag { tag, weak })
    }

    fn is_valid(tag: &str) -> bool {
        tag.chars()
            .all(|c| c != '"' && c >= ' ' && c != '\x7f' && (c as u32) <= 0xff)
    }

    /// Parse the value of an `ETag` header.
    pub fn parse(s: &str) -> Option<EntityTag> {
        let s = s.trim();
        let mut pos = 0;
        let tag = parse_etag_at(s, &mut pos)?;
        if pos != s.len() {
            return None;
        }
        Some(tag)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// The strong comparison function: neither tag may be weak.
    pub fn strong_eq(&self, other: &EntityTag) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }

    /// The weak comparison function: weakness is ignored.
    pub fn weak_eq(&self, other: &EntityTag) -> bool {
        self.tag == other.tag
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.weak {
            write!(f, "W/")?;
        }
        write!(f, "\"{}\"", self.tag)
    }
}

// parse one entity-tag starting at `*pos`, advancing `*pos` past it.
fn parse_etag_at(s: &str, pos: &mut usize) -> Option<EntityTag> {
    let rest = &s[*pos..];
    let (weak, rest, skip) = match rest.strip_prefix("W/") {
        Some(r) => (true, r, 2),
        None => (false, rest, 0),
    };
    let inner = rest.strip_prefix('"')?;
    let end = inner.find('"')?;
    let tag = &inner[..end];
    if !EntityTag::is_valid(tag) {
        return None;
    }
    *pos += skip + 1 + end + 1;
    Some(EntityTag {
        tag: tag.to_string(),
        weak,
    })
}

/// A byte range, as in the `Content-Range` header. `None` stands for `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    start: Option<u64>,
    length: Option<u64>,
    total: Option<u64>,
}

impl ContentRange {
    /// A range of `length` bytes starting at `start`. `length` must be
    /// non-zero and `start + length` must not overflow.
    pub fn new(start: u64, length: u64, total: Option<u64>) -> Option<ContentRange> {
        if length == 0 || start.checked_add(length).is_none() {
            return None;
        }
        if let Some(t) = total {
            if start + length > t {
                return None;
            }
        }
        Some(ContentRange {
            start: Some(start),
            length: Some(length),
            total,
        })
    }

    /// `bytes */total`, used with 416 responses.
    pub fn unsatisfied(total: u64) -> ContentRange {
        ContentRange {
            start: None,
            length: None,
            total: Some(total),
        }
    }

    pub fn parse(s: &str) -> Option<ContentRange> {
        let caps = CONTENT_RANGE_RE.captures(s)?;
        let total = match caps.get(3) {
            Some(t) => Some(t.as_str().parse::<u64>().ok()?),
            None => None,
        };
        match (caps.get(1), caps.get(2)) {
            (Some(a), Some(b)) => {
                let start: u64 = a.as_str().parse().ok()?;
                let end: u64 = b.as_str().parse().ok()?;
                if end < start {
                    return None;
                }
                ContentRange::new(start, (end - start).checked_add(1)?, total)
            }
            _ => Some(ContentRange {
                start: None,
                length: None,
                total: Some(total?),
            }),
        }
    }

    pub fn start(&self) -> Option<u64> {
        self.start
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn total_length(&self) -> Option<u64> {
        self.total
    }

    pub fn to_header_string(&self) -> String {
        let range = match (self.start, self.length) {
            (Some(s), Some(l)) => format!("{}-{}", s, s + l - 1),
            _ => "*".to_string(),
        };
        let total = match self.total {
            Some(t) => t.to_string(),
            None => "*".to_string(),
        };
        format!("bytes {}/{}", range, total)
    }
}

impl Header for ContentRange {
    fn name() -> &'static HeaderName {
        &CONTENT_RANGE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        ContentRange::parse(one_str(values)?).ok_or_else(invalid)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(to_value(&self.to_header_string()));
    }
}

/// One `byte-range-spec` of a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `first-last` or `first-`.
    FromTo(u64, Option<u64>),
    /// `-suffix`
    Last(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range(pub Vec<ByteRange>);

impl Range {
    /// Resolve against the entity length. Returns inclusive `(first, last)`
    /// pairs, or `None` if nothing is satisfiable.
    pub fn satisfiable(&self, total: u64) -> Option<Vec<(u64, u64)>> {
        if total == 0 {
            return None;
        }
        let mut out = Vec::new();
        for r in &self.0 {
            let (start, end) = match *r {
                ByteRange::FromTo(s, e) => (s, e.unwrap_or(total - 1).min(total - 1)),
                ByteRange::Last(0) => continue,
                ByteRange::Last(n) => (total.saturating_sub(n), total - 1),
            };
            if start >= total || end < start {
                continue;
            }
            out.push((start, end));
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

impl Header for Range {
    fn name() -> &'static HeaderName {
        &RANGE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?;
        let (unit, set) = s.split_once('=').ok_or_else(invalid)?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(invalid());
        }
        let mut ranges = Vec::new();
        for part in set.split(',') {
            let part = part.trim();
            let (a, b) = part.split_once('-').ok_or_else(invalid)?;
            let (a, b) = (a.trim(), b.trim());
            let r = if a.is_empty() {
                ByteRange::Last(b.parse().map_err(|_| invalid())?)
            } else {
                let start = a.parse().map_err(|_| invalid())?;
                let end = if b.is_empty() {
                    None
                } else {
                    let end: u64 = b.parse().map_err(|_| invalid())?;
                    if end < start {
                        return Err(invalid());
                    }
                    Some(end)
                };
                ByteRange::FromTo(start, end)
            };
            ranges.push(r);
        }
        if ranges.is_empty() {
            return Err(invalid());
        }
        Ok(Range(ranges))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let v: Vec<String> = self
            .0
            .iter()
            .map(|r| match r {
                ByteRange::FromTo(s, Some(e)) => format!("{}-{}", s, e),
                ByteRange::FromTo(s, None) => format!("{}-", s),
                ByteRange::Last(n) => format!("-{}", n),
            })
            .collect();
        values.extend(to_value(&format!("bytes={}", v.join(","))));
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            v if v.eq_ignore_ascii_case(b"infinity") => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

#[derive(Debug, Clone)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Timeout {
    /// The first timeout the client asked for. `None` means infinite.
    pub fn first(&self) -> Option<Duration> {
        match self.0.first() {
            Some(DavTimeout::Seconds(n)) => Some(Duration::from_secs(*n as u64)),
            _ => None,
        }
    }
}

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = joined(values)?;
        let mut v = Vec::new();
        for word in value.split(',') {
            let word = word.trim();
            if word.eq_ignore_ascii_case("infinite") {
                v.push(DavTimeout::Infinite);
            } else if word
                .get(..7)
                .map_or(false, |p| p.eq_ignore_ascii_case("second-"))
            {
                // clamp silly values.
                let n = word[7..].parse::<u64>().map_err(|_| invalid())?;
                v.push(DavTimeout::Seconds(n.min(u32::MAX as u64) as u32));
            }
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let v: Vec<String> = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Seconds(n) => format!("Second-{}", n),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect();
        values.extend(to_value(&v.join(", ")));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?.trim();
        if s.starts_with('/') || url::Url::parse(s).is_ok() {
            return Ok(Destination(s.to_string()));
        }
        Err(invalid())
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(to_value(&self.0));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let line = one(values)?;
        match line.as_bytes() {
            b"F" | b"f" => Ok(Overwrite(false)),
            b"T" | b"t" => Ok(Overwrite(true)),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// `Lock-Token: <absolute-URI>`. Holds the URI without the brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?.trim();
        if s.len() < 5 {
            return Err(invalid());
        }
        let inner = s
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(invalid)?;
        url::Url::parse(inner).map_err(|_| invalid())?;
        Ok(LockToken(inner.to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(to_value(&format!("<{}>", self.0)));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLocation(pub String);

impl Header for ContentLocation {
    fn name() -> &'static HeaderName {
        &CONTENT_LOCATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(ContentLocation(one_str(values)?.to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(to_value(&self.0));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ETag(pub EntityTag);

impl Header for ETag {
    fn name() -> &'static HeaderName {
        &ETAG
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        EntityTag::parse(one_str(values)?)
            .map(ETag)
            .ok_or_else(invalid)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(to_value(&self.0.to_string()));
    }
}

/// The value of an `If-Match` or `If-None-Match` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ETagList {
    Star,
    Tags(Vec<EntityTag>),
}

impl ETagList {
    fn parse(s: &str) -> Option<ETagList> {
        if s.trim() == "*" {
            return Some(ETagList::Star);
        }
        let mut tags = Vec::new();
        let mut pos = 0;
        loop {
            while pos < s.len() && matches!(s.as_bytes()[pos], b' ' | b'\t' | b',') {
                pos += 1;
            }
            if pos == s.len() {
                break;
            }
            tags.push(parse_etag_at(s, &mut pos)?);
        }
        if tags.is_empty() {
            return None;
        }
        Some(ETagList::Tags(tags))
    }

    fn to_header_string(&self) -> String {
        match self {
            ETagList::Star => "*".to_string(),
            ETagList::Tags(t) => t
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

macro_rules! etaglist_header {
    ($type:ident, $name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $type(pub ETagList);

        impl Header for $type {
            fn name() -> &'static HeaderName {
                &$name
            }

            fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
            where
                I: Iterator<Item = &'i HeaderValue>,
            {
                ETagList::parse(&joined(values)?)
                    .map($type)
                    .ok_or_else(invalid)
            }

            fn encode<E>(&self, values: &mut E)
            where
                E: Extend<HeaderValue>,
            {
                values.extend(to_value(&self.0.to_header_string()));
            }
        }
    };
}

etaglist_header!(IfMatch, IF_MATCH);
etaglist_header!(IfNoneMatch, IF_NONE_MATCH);

macro_rules! date_header {
    ($type:ident, $name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $type(pub SystemTime);

        impl Header for $type {
            fn name() -> &'static HeaderName {
                &$name
            }

            fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
            where
                I: Iterator<Item = &'i HeaderValue>,
            {
                parse_http_date(one_str(values)?)
                    .map($type)
                    .ok_or_else(invalid)
            }

            fn encode<E>(&self, values: &mut E)
            where
                E: Extend<HeaderValue>,
            {
                values.extend(to_value(&systemtime_to_httpdate(self.0)));
            }
        }
    };
}

date_header!(IfModifiedSince, IF_MODIFIED_SINCE);
date_header!(IfUnmodifiedSince, IF_UNMODIFIED_SINCE);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfRange {
    ETag(EntityTag),
    Date(SystemTime),
}

impl Header for IfRange {
    fn name() -> &'static HeaderName {
        &IF_RANGE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?;
        if let Some(tag) = EntityTag::parse(s) {
            return Ok(IfRange::ETag(tag));
        }
        parse_http_date(s).map(IfRange::Date).ok_or_else(invalid)
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let s = match self {
            IfRange::ETag(t) => t.to_string(),
            IfRange::Date(d) => systemtime_to_httpdate(*d),
        };
        values.extend(to_value(&s));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfItem {
    StateToken(String),
    ETag(EntityTag),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

/// One parenthesized list of the `If` header, with its resource tag
/// if it is a tagged list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfList {
    pub resource_tag: Option<String>,
    pub conditions: Vec<IfCondition>,
}

impl IfList {
    /// The state tokens in this list that are not negated.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().filter_map(|c| match &c.item {
            IfItem::StateToken(t) if !c.not => Some(t.as_str()),
            _ => None,
        })
    }
}

/// The WebDAV `If` header (RFC 4918 section 10.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct If(pub Vec<IfList>);

fn skip_ws(s: &[u8], pos: &mut usize) {
    while *pos < s.len() && matches!(s[*pos], b' ' | b'\t' | b'\r' | b'\n') {
        *pos += 1;
    }
}

// read up to (not including) `end`, and skip past it.
fn read_until<'a>(s: &'a str, pos: &mut usize, end: char) -> Option<&'a str> {
    let rest = &s[*pos..];
    let idx = rest.find(end)?;
    *pos += idx + end.len_utf8();
    Some(&rest[..idx])
}

fn parse_if(s: &str) -> Option<Vec<IfList>> {
    let b = s.as_bytes();
    let mut pos = 0;
    let mut lists = Vec::new();
    let mut tag: Option<String> = None;
    loop {
        skip_ws(b, &mut pos);
        if pos == b.len() {
            break;
        }
        match b[pos] {
            b'<' => {
                pos += 1;
                tag = Some(read_until(s, &mut pos, '>')?.to_string());
            }
            b'(' => {
                pos += 1;
                let mut conditions = Vec::new();
                loop {
                    skip_ws(b, &mut pos);
                    if pos == b.len() {
                        return None;
                    }
                    if b[pos] == b')' {
                        pos += 1;
                        break;
                    }
                    let mut not = false;
                    if s.get(pos..pos + 3).map_or(false, |w| w.eq_ignore_ascii_case("not")) {
                        not = true;
                        pos += 3;
                        skip_ws(b, &mut pos);
                    }
                    let item = match b.get(pos) {
                        Some(b'<') => {
                            pos += 1;
                            IfItem::StateToken(read_until(s, &mut pos, '>')?.to_string())
                        }
                        Some(b'[') => {
                            pos += 1;
                            let inner = read_until(s, &mut pos, ']')?;
                            IfItem::ETag(EntityTag::parse(inner)?)
                        }
                        _ => return None,
                    };
                    conditions.push(IfCondition { not, item });
                }
                if conditions.is_empty() {
                    return None;
                }
                lists.push(IfList {
                    resource_tag: tag.clone(),
                    conditions,
                });
            }
            _ => return None,
        }
    }
    if lists.is_empty() {
        return None;
    }
    Some(lists)
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut lists = Vec::new();
        for v in values {
            let s = v.to_str().map_err(|_| invalid())?;
            lists.extend(parse_if(s).ok_or_else(invalid)?);
        }
        if lists.is_empty() {
            return Err(invalid());
        }
        Ok(If(lists))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let mut s = String::new();
        for list in &self.0 {
            if let Some(tag) = &list.resource_tag {
                s.push_str(&format!("<{}> ", tag));
            }
            s.push('(');
            let conds: Vec<String> = list
                .conditions
                .iter()
                .map(|c| {
                    let item = match &c.item {
                        IfItem::StateToken(t) => format!("<{}>", t),
                        IfItem::ETag(e) => format!("[{}]", e),
                    };
                    if c.not {
                        format!("Not {}", item)
                    } else {
                        item
                    }
                })
                .collect();
            s.push_str(&conds.join(" "));
            s.push_str(") ");
        }
        values.extend(to_value(s.trim_end()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers::HeaderMapExt;
    use http::HeaderMap;

    fn get<H: Header>(name: &'static str, value: &'static str) -> Option<H> {
        let mut h = HeaderMap::new();
        h.insert(name, HeaderValue::from_static(value));
        h.typed_get::<H>()
    }

    #[test]
    fn entity_tag_comparison() {
        let a = EntityTag::new(false, "abc").unwrap();
        let b = EntityTag::new(false, "abc").unwrap();
        let w = EntityTag::new(true, "abc").unwrap();
        assert!(a.strong_eq(&a));
        assert!(a.strong_eq(&b) && b.strong_eq(&a));
        assert!(!a.strong_eq(&w) && !w.strong_eq(&a) && !w.strong_eq(&w));
        assert!(a.weak_eq(&w) && w.weak_eq(&w));
        assert!(EntityTag::new(false, "a\"b").is_none());
        assert!(EntityTag::new(false, "a\u{1}").is_none());
        assert!(EntityTag::new(false, "\u{100}").is_none());
    }

    #[test]
    fn entity_tag_parse() {
        let t = EntityTag::parse("W/\"xyz\"").unwrap();
        assert!(t.is_weak());
        assert_eq!(t.tag(), "xyz");
        assert_eq!(t.to_string(), "W/\"xyz\"");
        assert_eq!(EntityTag::parse("\"\"").unwrap().tag(), "");
        assert!(EntityTag::parse("xyz").is_none());
        assert!(EntityTag::parse("\"a\" junk").is_none());
    }

    #[test]
    fn content_range() {
        let r = ContentRange::parse("bytes 0-5/10").unwrap();
        assert_eq!(r.start(), Some(0));
        assert_eq!(r.length(), Some(6));
        assert_eq!(r.total_length(), Some(10));
        assert_eq!(r.to_header_string(), "bytes 0-5/10");

        let r = ContentRange::parse("bytes 3-4/*").unwrap();
        assert_eq!(r.total_length(), None);
        assert_eq!(ContentRange::unsatisfied(7).to_header_string(), "bytes */7");
        assert!(ContentRange::parse("bytes 5-3/10").is_none());
        assert!(ContentRange::parse("bytes 0-10/10").is_none());
        assert!(ContentRange::parse("bytes */*").is_none());
        assert!(ContentRange::new(u64::MAX, 2, None).is_none());
    }

    #[test]
    fn range_header() {
        let r: Range = get("range", "bytes=0-1, 5-, -3").unwrap();
        assert_eq!(r.satisfiable(10), Some(vec![(0, 1), (5, 9), (7, 9)]));
        let r: Range = get("range", "bytes=20-").unwrap();
        assert_eq!(r.satisfiable(10), None);
        assert!(get::<Range>("range", "lines=1-2").is_none());
    }

    #[test]
    fn etag_lists() {
        let m: IfMatch = get("if-match", "\"a\", W/\"b,c\"").unwrap();
        match m.0 {
            ETagList::Tags(t) => {
                assert_eq!(t.len(), 2);
                assert_eq!(t[1].tag(), "b,c");
            }
            ETagList::Star => panic!("expected tags"),
        }
        let m: IfNoneMatch = get("if-none-match", "*").unwrap();
        assert_eq!(m.0, ETagList::Star);
    }

    #[test]
    fn if_header() {
        let h: If = get(
            "if",
            "<http://x/a> (<urn:uuid:1> [\"e\"]) (Not <DAV:no-lock>) </b> ([W/\"w\"])",
        )
        .unwrap();
        assert_eq!(h.0.len(), 3);
        assert_eq!(h.0[0].resource_tag.as_deref(), Some("http://x/a"));
        assert_eq!(h.0[0].tokens().collect::<Vec<_>>(), vec!["urn:uuid:1"]);
        assert!(h.0[1].conditions[0].not);
        assert_eq!(h.0[1].resource_tag.as_deref(), Some("http://x/a"));
        assert_eq!(h.0[2].resource_tag.as_deref(), Some("/b"));
        assert!(get::<If>("if", "(<a:b>").is_none());
        assert!(get::<If>("if", "()").is_none());
    }

    #[test]
    fn lock_token() {
        let t: LockToken = get("lock-token", "<urn:uuid:1234>").unwrap();
        assert_eq!(t.0, "urn:uuid:1234");
        assert!(get::<LockToken>("lock-token", "urn:uuid:1234").is_none());
        assert!(get::<LockToken>("lock-token", "<x>").is_none());
    }

    #[test]
    fn timeouts() {
        let t: Timeout = get("timeout", "Second-60, Infinite").unwrap();
        assert_eq!(t.first(), Some(Duration::from_secs(60)));
        let t: Timeout = get("timeout", "Infinite").unwrap();
        assert_eq!(t.first(), None);
        assert_eq!(get::<Depth>("depth", "Infinity"), Some(Depth::Infinity));
        assert!(get::<Depth>("depth", "2").is_none());
    }
}
