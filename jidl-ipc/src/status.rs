//! One-byte status codes of the jidl protocol.
//!
//! The byte is partitioned by its two top bits:
//!
//! | bits       | meaning        |
//! |------------|----------------|
//! | `00xxxxxx` | request        |
//! | `01xxxxxx` | good response  |
//! | `10xxxxxx` | bad response   |
//! | `11xxxxxx` | reserved       |
//!
//! Request sub-codes encode which body fields are present.

/// Status code of a protocol frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    /// Bare request, neither method nor payload.
    Request = 0,
    /// Request carrying a `method` field.
    RequestWithMethod = 1,
    /// Request carrying a `payload` field.
    RequestWithPayload = 2,
    /// Request carrying both `method` and `payload`.
    RequestWithMethodAndPayload = 3,
    GoodResponse = 64,
    GoodResponseWithPayload = 65,
    BadResponse = 128,
    UnrecognizedProtocol = 129,
    IncompleteData = 130,
    InvalidStatusCode = 131,
    InvalidBody = 132,
    BufferOverflow = 133,
    FailedRequestHandling = 134,
}

impl StatusCode {
    /// All recognized codes, in raw-value order.
    pub const ALL: [StatusCode; 13] = [
        StatusCode::Request,
        StatusCode::RequestWithMethod,
        StatusCode::RequestWithPayload,
        StatusCode::RequestWithMethodAndPayload,
        StatusCode::GoodResponse,
        StatusCode::GoodResponseWithPayload,
        StatusCode::BadResponse,
        StatusCode::UnrecognizedProtocol,
        StatusCode::IncompleteData,
        StatusCode::InvalidStatusCode,
        StatusCode::InvalidBody,
        StatusCode::BufferOverflow,
        StatusCode::FailedRequestHandling,
    ];

    /// Maps a raw byte back to a status code. Unknown bytes yield `None`.
    pub fn from_raw(value: u8) -> Option<StatusCode> {
        StatusCode::ALL.into_iter().find(|c| c.raw() == value)
    }

    /// The raw wire value of this code.
    pub fn raw(self) -> u8 {
        self as u8
    }

    /// The request code for the given combination of body fields.
    pub fn request(has_method: bool, has_payload: bool) -> StatusCode {
        match (has_method, has_payload) {
            (false, false) => StatusCode::Request,
            (true, false) => StatusCode::RequestWithMethod,
            (false, true) => StatusCode::RequestWithPayload,
            (true, true) => StatusCode::RequestWithMethodAndPayload,
        }
    }

    /// The text message associated with this code. Bad responses carry it
    /// in their body under the `message` key.
    pub fn text_message(self) -> &'static str {
        match self {
            StatusCode::Request => "request",
            StatusCode::RequestWithMethod => "request with method",
            StatusCode::RequestWithPayload => "request with payload",
            StatusCode::RequestWithMethodAndPayload => "request with method and payload",
            StatusCode::GoodResponse => "OK",
            StatusCode::GoodResponseWithPayload => "payload",
            StatusCode::BadResponse => "error",
            StatusCode::UnrecognizedProtocol => "unrecognized protocol",
            StatusCode::IncompleteData => "incomplete data",
            StatusCode::InvalidStatusCode => "invalid status code",
            StatusCode::InvalidBody => "invalid body",
            StatusCode::BufferOverflow => "buffer overflow",
            StatusCode::FailedRequestHandling => "failed request handling",
        }
    }

    /// `true` for request codes (`00xxxxxx`).
    pub fn is_request(self) -> bool {
        self.raw() < 64
    }

    /// `true` for good response codes (`01xxxxxx`).
    pub fn is_good(self) -> bool {
        (64..128).contains(&self.raw())
    }

    /// `true` for bad response codes (`10xxxxxx`).
    pub fn is_bad(self) -> bool {
        (128..192).contains(&self.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_match_the_wire_format() {
        assert_eq!(StatusCode::Request.raw(), 0);
        assert_eq!(StatusCode::GoodResponse.raw(), 64);
        assert_eq!(StatusCode::GoodResponseWithPayload.raw(), 65);
        assert_eq!(StatusCode::BadResponse.raw(), 128);
        assert_eq!(StatusCode::FailedRequestHandling.raw(), 134);
    }

    #[test]
    fn from_raw_round_trips_recognized_codes() {
        for code in StatusCode::ALL {
            assert_eq!(StatusCode::from_raw(code.raw()), Some(code));
        }
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        assert_eq!(StatusCode::from_raw(4), None);
        assert_eq!(StatusCode::from_raw(63), None);
        assert_eq!(StatusCode::from_raw(66), None);
        assert_eq!(StatusCode::from_raw(192), None);
        assert_eq!(StatusCode::from_raw(255), None);
    }

    #[test]
    fn partition_is_exclusive_for_recognized_codes() {
        for byte in 0..=255u8 {
            if let Some(code) = StatusCode::from_raw(byte) {
                let classes =
                    [code.is_request(), code.is_good(), code.is_bad()];
                assert_eq!(
                    classes.iter().filter(|c| **c).count(),
                    1,
                    "status byte {byte} must fall in exactly one class"
                );
            }
        }
    }

    #[test]
    fn request_codes_encode_field_presence() {
        assert_eq!(StatusCode::request(false, false), StatusCode::Request);
        assert_eq!(StatusCode::request(true, false), StatusCode::RequestWithMethod);
        assert_eq!(StatusCode::request(false, true), StatusCode::RequestWithPayload);
        assert_eq!(
            StatusCode::request(true, true),
            StatusCode::RequestWithMethodAndPayload
        );
    }
}
