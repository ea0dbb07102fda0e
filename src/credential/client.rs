//! Client over the external credential-granting service

use super::codes::{describe_error, Credential, CredentialFlags};
use crate::common::{Error, Result};
use std::sync::Arc;

/// Result of a raw service call: the value or a negative return code
pub type ServiceResult<T> = std::result::Result<T, i32>;

/// Boundary to the granting service, as linked into a single rank.
pub trait CredentialService: Send + Sync {
    /// Request a new credential.
    fn acquire(&self, flags: CredentialFlags) -> ServiceResult<u32>;

    /// Redeem a credential for a local handle token.
    fn access(&self, credential: u32, flags: CredentialFlags) -> ServiceResult<u64>;

    /// Relinquish the local claim on a credential.
    fn release(&self, credential: u32, flags: CredentialFlags) -> ServiceResult<()>;
}

impl<S: CredentialService + ?Sized> CredentialService for Arc<S> {
    fn acquire(&self, flags: CredentialFlags) -> ServiceResult<u32> {
        (**self).acquire(flags)
    }

    fn access(&self, credential: u32, flags: CredentialFlags) -> ServiceResult<u64> {
        (**self).access(credential, flags)
    }

    fn release(&self, credential: u32, flags: CredentialFlags) -> ServiceResult<()> {
        (**self).release(credential, flags)
    }
}

/// A redeemed credential, owned by the rank that redeemed it.
///
/// Deliberately neither `Clone` nor serialisable: it is consumed by
/// [`CredentialClient::release`] and never leaves the rank.
#[derive(Debug)]
pub struct CredentialHandle {
    credential: Credential,
    token: u64,
}

impl CredentialHandle {
    pub fn credential(&self) -> Credential {
        self.credential
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Typed wrapper translating raw service codes into [`Error::Service`].
pub struct CredentialClient<S> {
    service: S,
}

impl<S: CredentialService> CredentialClient<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn acquire(&self, flags: CredentialFlags) -> Result<Credential> {
        self.service
            .acquire(flags)
            .map(Credential::new)
            .map_err(Error::service)
    }

    pub fn access(&self, credential: Credential, flags: CredentialFlags) -> Result<CredentialHandle> {
        let token = self
            .service
            .access(credential.id(), flags)
            .map_err(Error::service)?;
        Ok(CredentialHandle { credential, token })
    }

    pub fn release(&self, handle: CredentialHandle, flags: CredentialFlags) -> Result<()> {
        self.service
            .release(handle.credential.id(), flags)
            .map_err(Error::service)
    }

    pub fn describe_error(&self, code: i32) -> &'static str {
        describe_error(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyService {
        misses: AtomicU32,
    }

    impl CredentialService for FlakyService {
        fn acquire(&self, _flags: CredentialFlags) -> ServiceResult<u32> {
            Ok(42)
        }

        fn access(&self, credential: u32, _flags: CredentialFlags) -> ServiceResult<u64> {
            if self.misses.load(Ordering::SeqCst) > 0 {
                self.misses.fetch_sub(1, Ordering::SeqCst);
                return Err(-6);
            }
            Ok(u64::from(credential) << 8)
        }

        fn release(&self, _credential: u32, _flags: CredentialFlags) -> ServiceResult<()> {
            Err(-8)
        }
    }

    #[test]
    fn test_access_maps_codes() {
        let client = CredentialClient::new(FlakyService {
            misses: AtomicU32::new(1),
        });
        let cred = client.acquire(CredentialFlags::FLEX_CREDENTIAL).unwrap();
        assert_eq!(cred, Credential::new(42));

        let err = client.access(cred, CredentialFlags::NONE).unwrap_err();
        assert!(err.is_retryable());

        let handle = client.access(cred, CredentialFlags::NONE).unwrap();
        assert_eq!(handle.credential(), cred);
        assert_eq!(handle.token(), 42 << 8);
    }

    #[test]
    fn test_release_failure_is_reported() {
        let client = CredentialClient::new(FlakyService {
            misses: AtomicU32::new(0),
        });
        let handle = client.access(Credential::new(1), CredentialFlags::NONE).unwrap();
        let err = client.release(handle, CredentialFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::CredentialExternalFailure));
        assert_eq!(
            client.describe_error(-8),
            "DRC_CRED_EXTERNAL_FAILURE ( external application failure )"
        );
    }
}
