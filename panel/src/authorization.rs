use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use svcpanel_common::error::{PanelError, PanelResult};
use tracing::{debug, info};

/// Opaque capability token proving the holder may request privilege
/// elevation. Never serialized; the token value stays out of logs.
pub struct AuthorizationCredential {
    token: u64,
}

impl AuthorizationCredential {
    fn token(&self) -> u64 {
        self.token
    }
}

impl std::fmt::Debug for AuthorizationCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The token itself must never surface in diagnostics.
        f.write_str("AuthorizationCredential(<redacted>)")
    }
}

/// Capability interface: "who may authorize privileged execution".
///
/// Injected into the executor rather than looked up globally, so tests can
/// substitute their own policy and teardown can revoke deterministically.
pub trait Authorizer: Send + Sync {
    /// Obtain a fresh credential, possibly after interactive consent.
    /// Denial is terminal for the requesting action; callers must not
    /// retry without new user interaction.
    fn acquire(&self) -> PanelResult<AuthorizationCredential>;

    /// Whether a previously issued credential is still live.
    fn validate(&self, credential: &AuthorizationCredential) -> bool;

    /// Revoke a credential. Privileged calls made with it afterwards must
    /// fail with `AuthorizationDenied`.
    fn release(&self, credential: AuthorizationCredential);
}

/// System policy: the invoking user must be root or a member of the
/// OS admin group. Issued tokens are tracked so release actually revokes.
pub struct SystemAuthorizer {
    next_token: AtomicU64,
    live: Mutex<HashSet<u64>>,
    admin_group: String,
}

impl SystemAuthorizer {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
            admin_group: "admin".to_string(),
        }
    }

    fn invoking_user_may_elevate(&self) -> bool {
        if nix::unistd::Uid::effective().is_root() {
            return true;
        }

        let user = svcpanel_common::descriptor::invoking_user();
        match nix::unistd::Group::from_name(&self.admin_group) {
            Ok(Some(group)) => group.mem.iter().any(|member| member == &user),
            _ => false,
        }
    }
}

impl Default for SystemAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Authorizer for SystemAuthorizer {
    fn acquire(&self) -> PanelResult<AuthorizationCredential> {
        if !self.invoking_user_may_elevate() {
            info!("authorization denied for invoking user");
            return Err(PanelError::AuthorizationDenied);
        }

        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(token);
        debug!("authorization credential issued");
        Ok(AuthorizationCredential { token })
    }

    fn validate(&self, credential: &AuthorizationCredential) -> bool {
        self.live.lock().unwrap().contains(&credential.token())
    }

    fn release(&self, credential: AuthorizationCredential) {
        self.live.lock().unwrap().remove(&credential.token());
        debug!("authorization credential released");
    }
}
