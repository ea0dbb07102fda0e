//! Credential identifiers, request flags and the service's error taxonomy

use serde::{Deserialize, Serialize};

/// Opaque credential identifier issued by the granting service.
///
/// Shared between ranks by value only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(u32);

impl Credential {
    /// Size of the identifier on the wire
    pub const WIRE_SIZE: usize = 4;

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }

    pub fn to_wire(self) -> [u8; Self::WIRE_SIZE] {
        self.0.to_le_bytes()
    }

    pub fn from_wire(buf: [u8; Self::WIRE_SIZE]) -> Self {
        Self(u32::from_le_bytes(buf))
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability flags passed to acquire/access/release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialFlags(u32);

impl CredentialFlags {
    pub const NONE: Self = Self(0);
    /// Credential may be redeemed by jobs other than the one that acquired it
    pub const FLEX_CREDENTIAL: Self = Self(1 << 0);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CredentialFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Failure taxonomy reported by the granting service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameter,
    PermissionDenied,
    NoSpace,
    ConnectionRefused,
    AlreadyGranted,
    CredentialNotFound,
    CredentialCreateFailure,
    CredentialExternalFailure,
    BadOrExpiredToken,
    UnknownCode,
}

impl ErrorKind {
    /// Classify a raw service return code. Codes are negated on the wire but
    /// either sign is accepted.
    pub fn from_code(code: i32) -> Self {
        match code.unsigned_abs() {
            1 => ErrorKind::InvalidParameter,
            2 => ErrorKind::PermissionDenied,
            3 => ErrorKind::NoSpace,
            4 => ErrorKind::ConnectionRefused,
            5 => ErrorKind::AlreadyGranted,
            6 => ErrorKind::CredentialNotFound,
            7 => ErrorKind::CredentialCreateFailure,
            8 => ErrorKind::CredentialExternalFailure,
            9 => ErrorKind::BadOrExpiredToken,
            _ => ErrorKind::UnknownCode,
        }
    }

    /// Raw (negative) code for this kind; `None` for `UnknownCode`.
    pub fn code(&self) -> Option<i32> {
        let code = match self {
            ErrorKind::InvalidParameter => 1,
            ErrorKind::PermissionDenied => 2,
            ErrorKind::NoSpace => 3,
            ErrorKind::ConnectionRefused => 4,
            ErrorKind::AlreadyGranted => 5,
            ErrorKind::CredentialNotFound => 6,
            ErrorKind::CredentialCreateFailure => 7,
            ErrorKind::CredentialExternalFailure => 8,
            ErrorKind::BadOrExpiredToken => 9,
            ErrorKind::UnknownCode => return None,
        };
        Some(-code)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidParameter => write!(f, "invalid parameter"),
            ErrorKind::PermissionDenied => write!(f, "permission denied"),
            ErrorKind::NoSpace => write!(f, "no space left"),
            ErrorKind::ConnectionRefused => write!(f, "connection refused"),
            ErrorKind::AlreadyGranted => write!(f, "access already granted"),
            ErrorKind::CredentialNotFound => write!(f, "credential not found"),
            ErrorKind::CredentialCreateFailure => write!(f, "credential create failure"),
            ErrorKind::CredentialExternalFailure => write!(f, "external application failure"),
            ErrorKind::BadOrExpiredToken => write!(f, "bad or expired token"),
            ErrorKind::UnknownCode => write!(f, "unknown code"),
        }
    }
}

/// Human-readable label for a raw service return code.
///
/// Never fails: unrecognised codes map to `"unknown error"`.
pub fn describe_error(code: i32) -> &'static str {
    match code.unsigned_abs() {
        0 => "DRC_SUCCESS ( success )",
        1 => "DRC_EINVAL ( invalid parameter )",
        2 => "DRC_EPERM ( invalid permissions )",
        3 => "DRC_ENOSPC ( no space left )",
        4 => "DRC_ECONNREFUSED ( connection refused )",
        5 => "DRC_ALREADY_GRANTED ( access already granted )",
        6 => "DRC_CRED_NOT_FOUND ( credential not found )",
        7 => "DRC_CRED_CREATE_FAILURE ( could not create credential )",
        8 => "DRC_CRED_EXTERNAL_FAILURE ( external application failure )",
        9 => "DRC_BAD_TOKEN ( bad/expired token passed to system )",
        _ => "unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_error_known_codes() {
        assert_eq!(describe_error(0), "DRC_SUCCESS ( success )");
        assert_eq!(describe_error(-6), "DRC_CRED_NOT_FOUND ( credential not found )");
        assert_eq!(describe_error(6), describe_error(-6));
        assert_eq!(
            describe_error(-9),
            "DRC_BAD_TOKEN ( bad/expired token passed to system )"
        );
    }

    #[test]
    fn test_describe_error_unknown_is_fallback() {
        assert_eq!(describe_error(-10), "unknown error");
        assert_eq!(describe_error(i32::MIN), "unknown error");
        assert_eq!(describe_error(12345), describe_error(12345));
    }

    #[test]
    fn test_kind_code_mapping() {
        for code in -9..=-1 {
            let kind = ErrorKind::from_code(code);
            assert_ne!(kind, ErrorKind::UnknownCode);
            assert_eq!(kind.code(), Some(code));
        }
        assert_eq!(ErrorKind::from_code(-77), ErrorKind::UnknownCode);
        assert_eq!(ErrorKind::UnknownCode.code(), None);
    }

    #[test]
    fn test_credential_wire() {
        let cred = Credential::new(0xdead_beef);
        assert_eq!(Credential::from_wire(cred.to_wire()), cred);
        assert_eq!(cred.to_string(), "3735928559");
    }

    #[test]
    fn test_flags() {
        let flags = CredentialFlags::NONE | CredentialFlags::FLEX_CREDENTIAL;
        assert!(flags.contains(CredentialFlags::FLEX_CREDENTIAL));
        assert!(!CredentialFlags::NONE.contains(CredentialFlags::FLEX_CREDENTIAL));
        assert_eq!(flags.bits(), 1);
    }
}
