//! Utility module to handle the path part of an URL as a resource path.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::errors::DavError;
use crate::DavResult;

// Minimal encoding for a path: controls, space, '#' and '?'. '%' is
// optional and added by `canonical_path_encode`.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'#').add(b'?');
const PATH_ENCODE_SET_PCT: &AsciiSet = &PATH_ENCODE_SET.add(b'%');

/// Encode a decoded path for use in a URL.
///
/// Only the characters that would otherwise end or corrupt the path part
/// of an URL are escaped, plus anything outside printable ASCII.
pub fn canonical_path_encode(path: &str, encode_percent: bool) -> String {
    let set = if encode_percent {
        PATH_ENCODE_SET_PCT
    } else {
        PATH_ENCODE_SET
    };
    utf8_percent_encode(path, set).to_string()
}

/// A decoded, normalized resource path.
///
/// The path is relative to the location (service) that serves it and
/// always starts with `/`. Collections may end in `/`. The raw URL
/// prefix of the location is carried along so that absolute hrefs can
/// be produced.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    prefix: String,
    path: String,
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_url_string())
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

// normalize path segments. ".." above the root is an error.
fn normalize(path: &str) -> Option<String> {
    let mut segs: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segs.pop()?;
            }
            s => segs.push(s),
        }
    }
    let mut p = String::with_capacity(path.len() + 1);
    for s in &segs {
        p.push('/');
        p.push_str(s);
    }
    if p.is_empty() || (path.ends_with('/') || path.ends_with("/.")) {
        p.push('/');
    }
    Some(p)
}

impl DavPath {
    /// Create a path from a decoded, absolute path string.
    ///
    /// `.` and `..` segments are resolved; `..` never climbs above `/`.
    pub fn new(path: &str) -> DavPath {
        let path = normalize(path).unwrap_or_else(|| {
            let trimmed: Vec<&str> = path.split('/').filter(|s| *s != "..").collect();
            normalize(&trimmed.join("/")).unwrap_or_else(|| "/".to_string())
        });
        DavPath {
            prefix: String::new(),
            path,
        }
    }

    /// Parse the path part of a request URI, stripping the location prefix.
    pub(crate) fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> DavResult<DavPath> {
        let raw = uri.path();
        if raw == "*" {
            return Ok(DavPath {
                prefix: String::new(),
                path: "*".to_string(),
            });
        }
        DavPath::from_raw_and_prefix(raw, prefix)
    }

    /// Same as `from_uri_and_prefix`, for a raw (still encoded) path.
    pub(crate) fn from_raw_and_prefix(raw: &str, prefix: &str) -> DavResult<DavPath> {
        if !raw.starts_with('/') {
            return Err(DavError::InvalidPath);
        }
        let prefix = prefix.trim_end_matches('/');
        let rest = match raw.get(..prefix.len()) {
            Some(p) if p.eq_ignore_ascii_case(prefix) => &raw[prefix.len()..],
            _ => return Err(DavError::IllegalPath),
        };
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(DavError::IllegalPath);
        }
        let decoded = percent_decode_str(rest).decode_utf8()?;
        if decoded.contains('\0') {
            return Err(DavError::InvalidPath);
        }
        let path = normalize(&decoded).ok_or(DavError::ForbiddenPath)?;
        Ok(DavPath {
            prefix: raw[..prefix.len()].to_string(),
            path,
        })
    }

    /// The decoded path, relative to the location.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The path without a trailing slash (except for the root).
    pub fn key(&self) -> &str {
        if self.path.len() > 1 {
            self.path.trim_end_matches('/')
        } else {
            &self.path
        }
    }

    /// The raw URL prefix of the location this path belongs to.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_star(&self) -> bool {
        self.path == "*"
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Ends in a slash.
    pub fn is_collection(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Add a slash to the end of the path (if not already present).
    pub fn add_slash(&mut self) {
        if !self.is_collection() {
            self.path.push('/');
        }
    }

    /// Add a slash if `is_collection` says this is a collection.
    pub fn add_slash_if(&mut self, is_collection: bool) {
        if is_collection {
            self.add_slash();
        }
    }

    /// The parent collection. The parent of `/` is `/`.
    pub fn parent(&self) -> DavPath {
        let key = self.key();
        let path = match key.rfind('/') {
            Some(idx) => key[..idx + 1].to_string(),
            None => "/".to_string(),
        };
        DavPath {
            prefix: self.prefix.clone(),
            path,
        }
    }

    /// The last segment of the path, without slashes.
    pub fn file_name(&self) -> &str {
        let key = self.key();
        key.rsplit('/').next().unwrap_or_default()
    }

    /// A member of this collection.
    pub fn join(&self, name: &str) -> DavPath {
        let mut path = self.key().trim_end_matches('/').to_string();
        path.push('/');
        path.push_str(name.trim_start_matches('/'));
        DavPath {
            prefix: self.prefix.clone(),
            path,
        }
    }

    /// `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &DavPath) -> bool {
        is_ancestor_or_self(self.key(), other.key())
    }

    /// The path with `from` replaced by `to` at the start, if `from` contains it.
    pub fn rebase(&self, from: &DavPath, to: &DavPath) -> Option<DavPath> {
        if !from.contains(self) {
            return None;
        }
        let rest = &self.path[from.key().trim_end_matches('/').len()..];
        let base = to.key().trim_end_matches('/');
        let path = if rest.is_empty() || rest == "/" {
            let mut p = to.path.clone();
            if rest == "/" {
                p = format!("{}/", base);
            }
            p
        } else {
            format!("{}{}", base, rest)
        };
        Some(DavPath {
            prefix: to.prefix.clone(),
            path,
        })
    }

    /// The path with the prefix prepended, as a new path without prefix.
    pub fn with_prefix(&self) -> DavPath {
        let path = if self.prefix.is_empty() {
            self.path.clone()
        } else {
            let decoded = percent_decode_str(&self.prefix).decode_utf8_lossy();
            format!("{}{}", decoded, self.path)
        };
        DavPath {
            prefix: String::new(),
            path,
        }
    }

    /// The full (prefixed) path as an URL path, `%` encoded.
    pub fn as_url_string(&self) -> String {
        self.as_url_string_with(true)
    }

    /// The full (prefixed) path as an URL path.
    pub fn as_url_string_with(&self, encode_percent: bool) -> String {
        let mut s = self.prefix.clone();
        s.push_str(&canonical_path_encode(&self.path, encode_percent));
        s
    }
}

// component-wise prefix check on keys (paths without trailing slash).
pub(crate) fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    if ancestor == "/" {
        return true;
    }
    match path.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
