//! Request outcomes.
//!
//! A [`ConditionCode`] is what every step of request processing produces
//! when it decides something: a plain status, a status with a message,
//! or a status with a structured `DAV:error` element (RFC 4918 section 16).
use std::fmt;

use bytes::Bytes;
use http::StatusCode;

use crate::util::status_message;
use crate::xmldom::Element;

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionCode {
    status: StatusCode,
    message: Option<String>,
    error: Option<Element>,
}

impl ConditionCode {
    pub fn new(status: StatusCode) -> ConditionCode {
        ConditionCode {
            status,
            message: None,
            error: None,
        }
    }

    pub fn with_message(status: StatusCode, message: impl Into<String>) -> ConditionCode {
        ConditionCode {
            status,
            message: Some(message.into()),
            error: None,
        }
    }

    /// A status with a precondition/postcondition element. `condition` is
    /// the child of `DAV:error`, e.g. `DAV:lock-token-matches-request-uri`.
    pub fn with_error(
        status: StatusCode,
        condition: Element,
        message: Option<&str>,
    ) -> ConditionCode {
        ConditionCode {
            status,
            message: message.map(|m| m.to_string()),
            error: Some(condition),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The condition element (the child of `DAV:error`), if any.
    pub fn error_element(&self) -> Option<&Element> {
        self.error.as_ref()
    }

    /// Anything outside 2xx is an error, including 304.
    pub fn is_error(&self) -> bool {
        !self.status.is_success()
    }

    /// `HTTP/1.1 <code> <reason>`, as used in `DAV:status`.
    pub fn status_line(&self) -> String {
        status_line(self.status)
    }

    /// The `DAV:error` document, if this code has a condition element.
    pub fn error_body(&self) -> Option<Bytes> {
        let cond = self.error.as_ref()?;
        let error = Element::dav("error").with_child(cond.clone());
        error.to_document().ok()
    }

    pub fn ok() -> ConditionCode {
        ConditionCode::new(StatusCode::OK)
    }

    pub fn not_found() -> ConditionCode {
        ConditionCode::new(StatusCode::NOT_FOUND)
    }

    pub fn forbidden(message: &str) -> ConditionCode {
        ConditionCode::with_message(StatusCode::FORBIDDEN, message)
    }

    pub fn method_not_allowed() -> ConditionCode {
        ConditionCode::new(StatusCode::METHOD_NOT_ALLOWED)
    }

    pub fn conflict(message: &str) -> ConditionCode {
        ConditionCode::with_message(StatusCode::CONFLICT, message)
    }

    pub fn precondition_failed() -> ConditionCode {
        ConditionCode::new(StatusCode::PRECONDITION_FAILED)
    }

    pub fn not_modified() -> ConditionCode {
        ConditionCode::new(StatusCode::NOT_MODIFIED)
    }

    pub fn bad_request(message: &str) -> ConditionCode {
        ConditionCode::with_message(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: &str) -> ConditionCode {
        ConditionCode::with_message(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn insufficient_storage() -> ConditionCode {
        ConditionCode::new(StatusCode::INSUFFICIENT_STORAGE)
    }

    pub fn failed_dependency() -> ConditionCode {
        ConditionCode::new(StatusCode::FAILED_DEPENDENCY)
    }

    pub fn unprocessable(message: &str) -> ConditionCode {
        ConditionCode::with_message(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    /// 423, listing the roots of the locks that were in the way.
    pub fn locked(roots: &[String]) -> ConditionCode {
        ConditionCode::with_error(
            StatusCode::LOCKED,
            hrefs("lock-token-submitted", roots),
            None,
        )
    }

    /// 423 for a LOCK request that collides with existing locks.
    pub fn conflicting_lock(roots: &[String]) -> ConditionCode {
        ConditionCode::with_error(
            StatusCode::LOCKED,
            hrefs("no-conflicting-lock", roots),
            None,
        )
    }

    pub fn lock_token_matches_request_uri() -> ConditionCode {
        ConditionCode::with_error(
            StatusCode::CONFLICT,
            Element::dav("lock-token-matches-request-uri"),
            Some("The lock token does not refer to a lock on the request resource."),
        )
    }

    pub fn lock_token_matches_request_uri_412() -> ConditionCode {
        ConditionCode::with_error(
            StatusCode::PRECONDITION_FAILED,
            Element::dav("lock-token-matches-request-uri"),
            Some("No submitted lock token refers to a lock on the request resource."),
        )
    }

    pub fn propfind_finite_depth() -> ConditionCode {
        ConditionCode::with_error(
            StatusCode::FORBIDDEN,
            Element::dav("propfind-finite-depth"),
            Some("This server does not allow infinite-depth PROPFIND requests."),
        )
    }

    pub fn cannot_modify_protected_property() -> ConditionCode {
        ConditionCode::with_error(
            StatusCode::FORBIDDEN,
            Element::dav("cannot-modify-protected-property"),
            Some("An attempt was made to set a protected property."),
        )
    }
}

fn hrefs(condition: &str, roots: &[String]) -> Element {
    let mut e = Element::dav(condition);
    for r in roots {
        e.push(Element::dav("href").with_text(r.as_str()));
    }
    e
}

pub(crate) fn status_line(status: StatusCode) -> String {
    format!("HTTP/1.1 {} {}", status.as_u16(), status_message(status))
}

impl From<StatusCode> for ConditionCode {
    fn from(status: StatusCode) -> ConditionCode {
        ConditionCode::new(status)
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), status_message(self.status))?;
        if let Some(m) = &self.message {
            write!(f, ". {}", m)?;
        }
        Ok(())
    }
}
