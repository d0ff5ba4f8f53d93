//! Status codes and their fixed stock-response tables.
//!
//! Every status the engine can emit maps to a literal status line and a
//! literal HTML error body; codes outside the table fall back to the
//! `500 Internal Server Error` mapping.

use std::fmt;

/// HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

macro_rules! stock_body {
    ($code:literal, $reason:literal) => {
        concat!(
            "<html>",
            "<head><style>h1 {text-align: center;}</style><title>",
            $reason,
            "</title></head>",
            "<body><h1>",
            $code,
            " ",
            $reason,
            "</h1></body>",
            "</html>"
        )
    };
}

impl StatusCode {
    /// 200 OK
    pub const OK: Self = Self(200);
    /// 201 Created
    pub const CREATED: Self = Self(201);
    /// 202 Accepted
    pub const ACCEPTED: Self = Self(202);
    /// 204 No Content
    pub const NO_CONTENT: Self = Self(204);
    /// 206 Partial Content
    pub const PARTIAL_CONTENT: Self = Self(206);
    /// 300 Multiple Choices
    pub const MULTIPLE_CHOICES: Self = Self(300);
    /// 301 Moved Permanently
    pub const MOVED_PERMANENTLY: Self = Self(301);
    /// 302 Moved Temporarily
    pub const MOVED_TEMPORARILY: Self = Self(302);
    /// 304 Not Modified
    pub const NOT_MODIFIED: Self = Self(304);
    /// 400 Bad Request
    pub const BAD_REQUEST: Self = Self(400);
    /// 401 Unauthorized
    pub const UNAUTHORIZED: Self = Self(401);
    /// 403 Forbidden
    pub const FORBIDDEN: Self = Self(403);
    /// 404 Not Found
    pub const NOT_FOUND: Self = Self(404);
    /// 408 Request Timeout
    pub const REQUEST_TIMEOUT: Self = Self(408);
    /// 411 Length Required
    pub const LENGTH_REQUIRED: Self = Self(411);
    /// 413 Payload Too Large
    pub const PAYLOAD_TOO_LARGE: Self = Self(413);
    /// 414 URI Too Long
    pub const URI_TOO_LONG: Self = Self(414);
    /// 416 Range Not Satisfiable
    pub const RANGE_NOT_SATISFIABLE: Self = Self(416);
    /// 500 Internal Server Error
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    /// 501 Not Implemented
    pub const NOT_IMPLEMENTED: Self = Self(501);
    /// 502 Bad Gateway
    pub const BAD_GATEWAY: Self = Self(502);
    /// 503 Service Unavailable
    pub const SERVICE_UNAVAILABLE: Self = Self(503);
    /// 505 HTTP Version not supported
    pub const HTTP_VERSION_NOT_SUPPORTED: Self = Self(505);

    /// Create a status code from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        Self(code)
    }

    /// Numeric value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// The literal status line for this code, CRLF included.
    ///
    /// Codes outside the fixed table fall back to the 500 line.
    #[must_use]
    pub const fn status_line(self) -> &'static str {
        match self.0 {
            200 => "HTTP/1.1 200 OK\r\n",
            201 => "HTTP/1.1 201 Created\r\n",
            202 => "HTTP/1.1 202 Accepted\r\n",
            204 => "HTTP/1.1 204 No Content\r\n",
            206 => "HTTP/1.1 206 Partial Content\r\n",
            300 => "HTTP/1.1 300 Multiple Choices\r\n",
            301 => "HTTP/1.1 301 Moved Permanently\r\n",
            302 => "HTTP/1.1 302 Moved Temporarily\r\n",
            304 => "HTTP/1.1 304 Not Modified\r\n",
            400 => "HTTP/1.1 400 Bad Request\r\n",
            401 => "HTTP/1.1 401 Unauthorized\r\n",
            403 => "HTTP/1.1 403 Forbidden\r\n",
            404 => "HTTP/1.1 404 Not Found\r\n",
            408 => "HTTP/1.1 408 Request Timeout\r\n",
            411 => "HTTP/1.1 411 Length Required\r\n",
            413 => "HTTP/1.1 413 Payload Too Large\r\n",
            414 => "HTTP/1.1 414 URI Too Long\r\n",
            416 => "HTTP/1.1 416 Range Not Satisfiable\r\n",
            501 => "HTTP/1.1 501 Not Implemented\r\n",
            502 => "HTTP/1.1 502 Bad Gateway\r\n",
            503 => "HTTP/1.1 503 Service Unavailable\r\n",
            505 => "HTTP/1.1 505 HTTP Version not supported\r\n",
            _ => "HTTP/1.1 500 Internal Server Error\r\n",
        }
    }

    /// The literal HTML error body for this code.
    ///
    /// `200 OK` has an empty stock body; codes outside the table fall back
    /// to the 500 body.
    #[must_use]
    pub const fn stock_body(self) -> &'static str {
        match self.0 {
            200 => "",
            201 => stock_body!("201", "Created"),
            202 => stock_body!("202", "Accepted"),
            204 => stock_body!("204", "No Content"),
            206 => stock_body!("206", "Partial Content"),
            300 => stock_body!("300", "Multiple Choices"),
            301 => stock_body!("301", "Moved Permanently"),
            302 => stock_body!("302", "Moved Temporarily"),
            304 => stock_body!("304", "Not Modified"),
            400 => stock_body!("400", "Bad Request"),
            401 => stock_body!("401", "Unauthorized"),
            403 => stock_body!("403", "Forbidden"),
            404 => stock_body!("404", "Not Found"),
            408 => stock_body!("408", "Request Timeout"),
            411 => stock_body!("411", "Length Required"),
            413 => stock_body!("413", "Payload Too Large"),
            414 => stock_body!("414", "URI Too Long"),
            416 => stock_body!("416", "Range Not Satisfiable"),
            501 => stock_body!("501", "Not Implemented"),
            502 => stock_body!("502", "Bad Gateway"),
            503 => stock_body!("503", "Service Unavailable"),
            505 => stock_body!("505", "HTTP Version not supported"),
            _ => stock_body!("500", "Internal Server Error"),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
