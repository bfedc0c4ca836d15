use std::fmt;
use std::str::FromStr;

/// The status of a processed request.
///
/// Statuses are transport-neutral; each transport maps them onto its native
/// convention (the HTTP transport uses [`Status::http_code`]). The textual
/// form used on the wire by the message transport is the uppercase token
/// returned by [`Status::token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Ok,
    Created,
    Accepted,
    Subset,
    Partial,
    BadRequest,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Invalid,
    Timeout,
    Conflict,
    Gone,
    ServerError,
    Unimplemented,
    BadGateway,
    Unavailable,
}

/// All recognized statuses, valid before error.
pub const STATUS_CODES: [Status; 17] = [
    Status::Ok,
    Status::Created,
    Status::Accepted,
    Status::Subset,
    Status::Partial,
    Status::BadRequest,
    Status::Forbidden,
    Status::NotFound,
    Status::MethodNotAllowed,
    Status::Invalid,
    Status::Timeout,
    Status::Conflict,
    Status::Gone,
    Status::ServerError,
    Status::Unimplemented,
    Status::BadGateway,
    Status::Unavailable,
];

impl Status {
    /// The uppercase wire token for this status.
    pub fn token(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Created => "CREATED",
            Status::Accepted => "ACCEPTED",
            Status::Subset => "SUBSET",
            Status::Partial => "PARTIAL",
            Status::BadRequest => "BAD_REQUEST",
            Status::Forbidden => "FORBIDDEN",
            Status::NotFound => "NOT_FOUND",
            Status::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Status::Invalid => "INVALID",
            Status::Timeout => "TIMEOUT",
            Status::Conflict => "CONFLICT",
            Status::Gone => "GONE",
            Status::ServerError => "SERVER_ERROR",
            Status::Unimplemented => "UNIMPLEMENTED",
            Status::BadGateway => "BAD_GATEWAY",
            Status::Unavailable => "UNAVAILABLE",
        }
    }

    /// The numeric HTTP status code for this status.
    pub fn http_code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::Accepted => 202,
            Status::Subset => 203,
            Status::Partial => 206,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::Invalid => 406,
            Status::Timeout => 408,
            Status::Conflict => 409,
            Status::Gone => 410,
            Status::ServerError => 500,
            Status::Unimplemented => 501,
            Status::BadGateway => 502,
            Status::Unavailable => 503,
        }
    }

    /// Inverse of [`Status::http_code`].
    pub fn from_http_code(code: u16) -> Option<Status> {
        STATUS_CODES.iter().copied().find(|s| s.http_code() == code)
    }

    /// True for the non-error statuses (OK through PARTIAL).
    pub fn is_valid(self) -> bool {
        matches!(
            self,
            Status::Ok | Status::Created | Status::Accepted | Status::Subset | Status::Partial
        )
    }

    /// True for the recognized error statuses.
    pub fn is_error(self) -> bool {
        !self.is_valid()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        STATUS_CODES
            .iter()
            .copied()
            .find(|s| s.token() == token)
            .ok_or(())
    }
}
