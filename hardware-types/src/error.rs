//! The closed error taxonomy shared with backends

use serde::{Deserialize, Serialize};

/// Classified outcome of a failed device operation.
///
/// Backends report failures as a small closed set of string codes plus a
/// free-text message; [`ErrorType::from_wire_code`] maps the code, the message
/// travels alongside unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    UnknownDevice,
    UnsupportedCapability,
    DeviceBusy,
    OperationFailed,
    UserCanceled,
    InvalidOption,
    MissingDriver,
    UnauthorizedOperation,
}

impl ErrorType {
    /// Map a backend wire code to the taxonomy. Unrecognized codes fall back
    /// to `UnauthorizedOperation`; callers keep the raw message for display.
    pub fn from_wire_code(code: &str) -> ErrorType {
        match code {
            "Busy" => ErrorType::DeviceBusy,
            "Failed" => ErrorType::OperationFailed,
            "Canceled" => ErrorType::UserCanceled,
            "InvalidOption" => ErrorType::InvalidOption,
            "MissingDriver" => ErrorType::MissingDriver,
            _ => ErrorType::UnauthorizedOperation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_wire_codes_map_to_their_member() {
        assert_eq!(ErrorType::from_wire_code("Busy"), ErrorType::DeviceBusy);
        assert_eq!(
            ErrorType::from_wire_code("Failed"),
            ErrorType::OperationFailed
        );
        assert_eq!(
            ErrorType::from_wire_code("Canceled"),
            ErrorType::UserCanceled
        );
        assert_eq!(
            ErrorType::from_wire_code("InvalidOption"),
            ErrorType::InvalidOption
        );
        assert_eq!(
            ErrorType::from_wire_code("MissingDriver"),
            ErrorType::MissingDriver
        );
    }

    #[test]
    fn unknown_wire_codes_fall_back_to_unauthorized() {
        assert_eq!(
            ErrorType::from_wire_code("SomethingNew"),
            ErrorType::UnauthorizedOperation
        );
        assert_eq!(
            ErrorType::from_wire_code(""),
            ErrorType::UnauthorizedOperation
        );
    }
}
