//! Locations and the service registry.
//!
//! A location maps a URL pattern to a service. The service is either
//! created from the [`ServiceRegistry`] by its type key, or handed to
//! the builder directly with [`DavBuilder::mount`](crate::DavBuilder::mount).
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::service::DavService;

/// Error in the handler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No factory is registered under this service type key.
    UnknownService(String),
    /// A location pattern that cannot be parsed.
    BadPattern(String),
    /// A parameter value that is invalid.
    BadParam(String),
    /// A service factory refused its parameters.
    Service(String),
}

impl Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::UnknownService(s) => write!(f, "unknown service type \"{}\"", s),
            ConfigError::BadPattern(s) => write!(f, "invalid location pattern \"{}\"", s),
            ConfigError::BadParam(s) | ConfigError::Service(s) => write!(f, "{}", s),
        }
    }
}

/// String parameters of a location, with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Params {
        Params::default()
    }

    /// Add a parameter.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Params {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str()).filter(|s| !s.is_empty())
    }

    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        let s = match self.get(name) {
            Some(s) => s.trim(),
            None => return Ok(default),
        };
        if s.eq_ignore_ascii_case("true") || s == "1" {
            Ok(true)
        } else if s.eq_ignore_ascii_case("false") || s == "0" {
            Ok(false)
        } else {
            Err(ConfigError::BadParam(format!(
                "The {} value \"{}\" is not a valid boolean.",
                name, s
            )))
        }
    }

    /// An integer parameter in `min..=max`. A `max` of 0 means no maximum.
    pub fn get_u32(&self, name: &str, default: u32, min: u32, max: u32) -> Result<u32, ConfigError> {
        let s = match self.get(name) {
            Some(s) => s.trim(),
            None => return Ok(default),
        };
        let value: u32 = s.parse().map_err(|_| {
            ConfigError::BadParam(format!(
                "The {} value \"{}\" is not a valid integer or is out of range.",
                name, s
            ))
        })?;
        if value < min || (max != 0 && value > max) {
            let upper = if max == 0 {
                String::new()
            } else {
                format!(" and at most {}", max)
            };
            return Err(ConfigError::BadParam(format!(
                "The {} value \"{}\" is out of range. It must be at least {}{}.",
                name, s, min, upper
            )));
        }
        Ok(value)
    }
}

/// One location of the URL space.
#[derive(Debug, Clone)]
pub struct LocationConfig {
    /// `[scheme://]host[:port][/path]` or `/path`.
    pub pattern: String,
    /// Service type key in the registry.
    pub service: String,
    pub enabled: bool,
    /// Match the path part case-sensitively.
    pub case_sensitive: bool,
    pub params: Params,
}

impl LocationConfig {
    pub fn new(pattern: impl Into<String>, service: impl Into<String>) -> LocationConfig {
        LocationConfig {
            pattern: pattern.into(),
            service: service.into(),
            enabled: true,
            case_sensitive: false,
            params: Params::new(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> LocationConfig {
        self.enabled = enabled;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> LocationConfig {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> LocationConfig {
        self.params = self.params.set(name, value);
        self
    }
}

/// A parsed location pattern.
#[derive(Debug, Clone)]
pub(crate) struct LocationMatch {
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    // no trailing slash, empty for the root.
    path: String,
    case_sensitive: bool,
}

impl LocationMatch {
    pub(crate) fn parse(pattern: &str, case_sensitive: bool) -> Result<LocationMatch, ConfigError> {
        let bad = || ConfigError::BadPattern(pattern.to_string());
        let mut rest = pattern.trim();
        let mut scheme = None;
        if let Some(idx) = rest.find("://") {
            let s = &rest[..idx];
            if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
                return Err(bad());
            }
            scheme = Some(s.to_ascii_lowercase());
            rest = &rest[idx + 3..];
        }
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if authority.is_empty() && scheme.is_some() {
            return Err(bad());
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (h, Some(p.parse::<u16>().map_err(|_| bad())?)),
            None => (authority, None),
        };
        if path.contains(|c: char| c == '?' || c == '#') {
            return Err(bad());
        }
        Ok(LocationMatch {
            scheme,
            host: if host.is_empty() {
                None
            } else {
                Some(host.to_ascii_lowercase())
            },
            port,
            path: path.trim_end_matches('/').to_string(),
            case_sensitive,
        })
    }

    /// If the request matches, the raw prefix of its path that belongs
    /// to the location.
    pub(crate) fn matches<'a>(&self, uri: &'a http::Uri, host_header: Option<&str>) -> Option<&'a str> {
        let scheme = uri.scheme_str().map(|s| s.to_ascii_lowercase());
        if let (Some(want), Some(have)) = (self.scheme.as_ref(), scheme.as_ref()) {
            if want != have {
                return None;
            }
        }
        // host and port from the URI, or the Host header.
        let (host, port) = match uri.host() {
            Some(h) => (Some(h.to_string()), uri.port_u16()),
            None => match host_header {
                Some(hh) => match hh.rsplit_once(':') {
                    Some((h, p)) if !h.contains(':') || h.ends_with(']') => {
                        (Some(h.to_string()), p.parse().ok())
                    }
                    _ => (Some(hh.to_string()), None),
                },
                None => (None, None),
            },
        };
        if let Some(want) = self.host.as_ref() {
            match host {
                Some(h) if h.eq_ignore_ascii_case(want) => {}
                _ => return None,
            }
        }
        if let Some(want) = self.port {
            let default = match self.scheme.as_deref().or(scheme.as_deref()) {
                Some("https") => 443,
                _ => 80,
            };
            if port.unwrap_or(default) != want {
                return None;
            }
        }

        let path = uri.path();
        let prefix = path.get(..self.path.len())?;
        let same = if self.case_sensitive {
            prefix == self.path
        } else {
            prefix.eq_ignore_ascii_case(&self.path)
        };
        let rest = &path[self.path.len()..];
        if !same || !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        Some(prefix)
    }
}

/// Creates a service from the parameters of its location.
pub type ServiceFactory =
    Arc<dyn Fn(&Params) -> Result<Arc<dyn DavService>, ConfigError> + Send + Sync>;

/// Map from service type key to factory.
#[derive(Clone)]
pub struct ServiceRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut keys: Vec<&String> = self.factories.keys().collect();
        keys.sort();
        f.debug_struct("ServiceRegistry").field("services", &keys).finish()
    }
}

impl Default for ServiceRegistry {
    fn default() -> ServiceRegistry {
        ServiceRegistry::new()
    }
}

impl ServiceRegistry {
    /// A registry with the built-in services.
    pub fn new() -> ServiceRegistry {
        let reg = ServiceRegistry::empty();
        #[cfg(feature = "memfs")]
        let reg = reg.register("memfs", |_: &Params| {
            Ok(crate::memfs::MemFs::new() as Arc<dyn DavService>)
        });
        reg
    }

    pub fn empty() -> ServiceRegistry {
        ServiceRegistry {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(mut self, key: impl Into<String>, factory: F) -> ServiceRegistry
    where
        F: Fn(&Params) -> Result<Arc<dyn DavService>, ConfigError> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    pub(crate) fn create(&self, key: &str, params: &Params) -> Result<Arc<dyn DavService>, ConfigError> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| ConfigError::UnknownService(key.to_string()))?;
        factory(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> http::Uri {
        s.parse().unwrap()
    }

    #[test]
    fn params() {
        let p = Params::new()
            .set("allowInfinitePropFind", "false")
            .set("maxLockTimeout", "600")
            .set("bad", "x");
        assert_eq!(p.get_bool("allowInfinitePropFind", true), Ok(false));
        assert_eq!(p.get_bool("missing", true), Ok(true));
        assert!(p.get_bool("bad", true).is_err());
        assert_eq!(p.get_u32("maxLockTimeout", 0, 1, 0), Ok(600));
        assert_eq!(p.get_u32("missing", 7, 1, 0), Ok(7));
        let e = p.get_u32("maxLockTimeout", 0, 1, 60).unwrap_err();
        assert_eq!(
            e.to_string(),
            "The maxLockTimeout value \"600\" is out of range. It must be at least 1 and at most 60."
        );
    }

    #[test]
    fn path_patterns() {
        let m = LocationMatch::parse("/dav/", false).unwrap();
        assert_eq!(m.matches(&uri("/DAV/x"), None), Some("/DAV"));
        assert_eq!(m.matches(&uri("/dav"), None), Some("/dav"));
        assert_eq!(m.matches(&uri("/davx"), None), None);
        let m = LocationMatch::parse("/dav", true).unwrap();
        assert_eq!(m.matches(&uri("/DAV/x"), None), None);
        let m = LocationMatch::parse("/", false).unwrap();
        assert_eq!(m.matches(&uri("/anything"), None), Some(""));
    }

    #[test]
    fn host_patterns() {
        let m = LocationMatch::parse("https://example.com:8443/files", false).unwrap();
        assert!(m.matches(&uri("https://example.com:8443/files/a"), None).is_some());
        assert!(m.matches(&uri("http://example.com:8443/files/a"), None).is_none());
        assert!(m.matches(&uri("/files/a"), Some("EXAMPLE.com:8443")).is_some());
        assert!(m.matches(&uri("/files/a"), Some("example.com")).is_none());
        let m = LocationMatch::parse("example.com", false).unwrap();
        assert!(m.matches(&uri("/x"), Some("other.org")).is_none());
        assert!(LocationMatch::parse("://x", false).is_err());
        assert!(LocationMatch::parse("host:port/", false).is_err());
    }

    #[test]
    fn registry() {
        let reg = ServiceRegistry::new();
        assert!(reg.create("memfs", &Params::new()).is_ok());
        assert_eq!(
            reg.create("nope", &Params::new()).unwrap_err(),
            ConfigError::UnknownService("nope".to_string())
        );
    }
}
