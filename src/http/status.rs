//! HTTP status codes
//!
//! A 3-digit status code plus the reason phrases recommended by RFC7231.

use super::{Error, Result};
use std::fmt;

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a new status code
    ///
    /// Any 3-digit code is accepted, including ones without a registered
    /// reason phrase.
    pub fn new(code: u16) -> Result<Self> {
        if (100..=999).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(code))
        }
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        reason_phrase(self.code)
    }

    /// Check if this is an informational status (1xx)
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Check if this is a redirection status (3xx)
    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Responses with this status never carry a body (1xx, 204, 304)
    pub fn forbids_body(&self) -> bool {
        self.is_informational() || self.code == 204 || self.code == 304
    }

    pub const CONTINUE: Status = Status { code: 100 };
    pub const SWITCHING_PROTOCOLS: Status = Status { code: 101 };
    pub const OK: Status = Status { code: 200 };
    pub const CREATED: Status = Status { code: 201 };
    pub const ACCEPTED: Status = Status { code: 202 };
    pub const NO_CONTENT: Status = Status { code: 204 };
    pub const MOVED_PERMANENTLY: Status = Status { code: 301 };
    pub const FOUND: Status = Status { code: 302 };
    pub const SEE_OTHER: Status = Status { code: 303 };
    pub const NOT_MODIFIED: Status = Status { code: 304 };
    pub const TEMPORARY_REDIRECT: Status = Status { code: 307 };
    pub const PERMANENT_REDIRECT: Status = Status { code: 308 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const UNAUTHORIZED: Status = Status { code: 401 };
    pub const FORBIDDEN: Status = Status { code: 403 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const METHOD_NOT_ALLOWED: Status = Status { code: 405 };
    pub const LENGTH_REQUIRED: Status = Status { code: 411 };
    pub const PAYLOAD_TOO_LARGE: Status = Status { code: 413 };
    pub const IM_A_TEAPOT: Status = Status { code: 418 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
    pub const NOT_IMPLEMENTED: Status = Status { code: 501 };
    pub const SERVICE_UNAVAILABLE: Status = Status { code: 503 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// Look up the RFC7231 recommended reason phrase for a status code
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a teapot",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}
