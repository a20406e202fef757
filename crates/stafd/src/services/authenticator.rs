//! Authenticator sub-registry.
//!
//! Remote requests carry an authenticator name, a user and opaque
//! authentication data. The named authenticator vouches for the pair before
//! the request is trusted as that user. `none` is always registered and
//! accepts everything as the anonymous user.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use staf_proto::ReturnCode;

use super::ServiceResult;
use crate::handles::{Authentication, NO_AUTHENTICATOR};

/// Verifies remote identities.
pub(crate) trait Authenticator: Send + Sync {
    fn name(&self) -> &str;

    /// Credentials for this authenticator must not cross insecure links.
    fn requires_secure(&self) -> bool;

    /// Checks `data` for `user`, returning a non-`Ok` result on rejection.
    fn authenticate(&self, user: &str, data: &str) -> ServiceResult;
}

#[derive(Debug)]
struct NoneAuthenticator;

impl Authenticator for NoneAuthenticator {
    fn name(&self) -> &str {
        NO_AUTHENTICATOR
    }

    fn requires_secure(&self) -> bool {
        false
    }

    fn authenticate(&self, _user: &str, _data: &str) -> ServiceResult {
        ServiceResult::ok("")
    }
}

pub(crate) struct AuthenticatorRegistry {
    authenticators: RwLock<BTreeMap<String, Arc<dyn Authenticator>>>,
    default: RwLock<String>,
    verified: Mutex<BTreeMap<String, Authentication>>,
}

impl fmt::Debug for AuthenticatorRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthenticatorRegistry")
            .field("authenticators", &self.names())
            .field("default", &self.default_authenticator())
            .finish_non_exhaustive()
    }
}

impl AuthenticatorRegistry {
    pub(crate) fn new() -> Self {
        let mut authenticators: BTreeMap<String, Arc<dyn Authenticator>> = BTreeMap::new();
        authenticators.insert(NO_AUTHENTICATOR.to_owned(), Arc::new(NoneAuthenticator));
        Self {
            authenticators: RwLock::new(authenticators),
            default: RwLock::new(NO_AUTHENTICATOR.to_owned()),
            verified: Mutex::new(BTreeMap::new()),
        }
    }

    /// Adds an authenticator; the first one besides `none` becomes the
    /// default.
    pub(crate) fn register(&self, authenticator: Arc<dyn Authenticator>) -> ReturnCode {
        let key = authenticator.name().to_ascii_lowercase();
        let mut authenticators = self.authenticators.write();
        if authenticators.contains_key(&key) {
            return ReturnCode::AlreadyExists;
        }
        authenticators.insert(key.clone(), authenticator);
        let mut default = self.default.write();
        if default.as_str() == NO_AUTHENTICATOR {
            *default = key;
        }
        ReturnCode::Ok
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn Authenticator>> {
        self.authenticators
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    pub(crate) fn default_authenticator(&self) -> String {
        self.default.read().clone()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.authenticators.read().keys().cloned().collect()
    }

    /// Unknown authenticators never require a secure link.
    pub(crate) fn requires_secure(&self, name: &str) -> bool {
        !name.eq_ignore_ascii_case(NO_AUTHENTICATOR)
            && self.get(name).is_some_and(|auth| auth.requires_secure())
    }

    /// Verifies the identity a remote handle presents.
    ///
    /// An unregistered authenticator downgrades the identity to
    /// `none://anonymous` instead of failing. Successful verifications are
    /// remembered per remote handle so repeated requests skip the check.
    pub(crate) fn authenticate_remote(
        &self,
        machine: &str,
        handle: u32,
        identity: &mut Authentication,
    ) -> ServiceResult {
        let Some(authenticator) = self.get(&identity.authenticator) else {
            *identity = Authentication::anonymous();
            return ServiceResult::ok("");
        };
        let key = format!("{};{handle}", machine.to_lowercase());
        if self.verified.lock().get(&key) == Some(identity) {
            return ServiceResult::ok("");
        }
        let result = authenticator.authenticate(&identity.user, &identity.data);
        if result.is_ok() {
            self.verified.lock().insert(key, identity.clone());
        }
        result
    }
}

impl Default for AuthenticatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
