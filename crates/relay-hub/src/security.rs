//! The security actor/scope service is an external collaborator (spec
//! §1): "opaque tokens attached at spawn". This module only defines
//! the seam the Central Hub calls through — a real deployment plugs
//! in whatever token/capability service it already runs.

use relay_core::{RelayError, UserId};
use serde_json::Value;

/// A scoped capability token bound to one user at User Hub spawn time,
/// per spec §4.1.1(a): "construct a security actor from `(user_id,
/// user_metadata)`".
#[derive(Debug, Clone)]
pub struct SecurityActor {
    /// Opaque token; never inspected by the hub hierarchy itself.
    pub token: String,
}

/// A named security scope looked up once per spawn (spec §4.1.1(b)).
#[derive(Debug, Clone)]
pub struct SecurityScope {
    /// The scope name this was resolved from.
    pub name: String,
}

/// Bundles an actor with the scope it will run under, handed to the
/// User Hub factory as the spawned process's credentials.
#[derive(Debug, Clone)]
pub struct ScopedCredentials {
    /// The per-user actor.
    pub actor: SecurityActor,
    /// The scope it is bound to.
    pub scope: SecurityScope,
}

/// Seam to the external security/scope service.
pub trait SecurityProvider: Send + Sync {
    /// Build a security actor for `(user_id, user_metadata)`. Infallible
    /// per spec — actor construction has no documented failure mode.
    fn build_actor(&self, user_id: &UserId, user_metadata: Option<&Value>) -> SecurityActor;

    /// Resolve a named scope. Missing scopes are fatal at Central Hub
    /// startup per spec §4.1.1(b)/§7.
    fn lookup_scope(&self, name: &str) -> Result<SecurityScope, RelayError>;
}

/// A provider that always succeeds, for use by the default binary and
/// by tests that don't exercise the missing-scope failure path.
#[derive(Debug, Clone, Default)]
pub struct AlwaysAllowSecurityProvider;

impl SecurityProvider for AlwaysAllowSecurityProvider {
    fn build_actor(&self, user_id: &UserId, _user_metadata: Option<&Value>) -> SecurityActor {
        SecurityActor {
            token: format!("actor:{user_id}"),
        }
    }

    fn lookup_scope(&self, name: &str) -> Result<SecurityScope, RelayError> {
        Ok(SecurityScope {
            name: name.to_string(),
        })
    }
}
