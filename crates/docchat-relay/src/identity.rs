use std::fmt;

/// User id attached to callers without a usable session.
pub const ANONYMOUS_USER_ID: &str = "anonymous";

/// Decoded session payload issued by the external auth provider.
///
/// Only the fields the relay needs are modelled; anything else in the token is
/// ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionClaims {
    /// Stable subject id of the signed-in user.
    #[serde(default)]
    pub sub: Option<String>,
    /// Identity-provider token forwarded to the backend as the bearer credential.
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<u64>,
}

/// Caller identity and bearer token for a single request.
///
/// A credential is built per request and handed to the relay explicitly; it is
/// never cached.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    user_id: String,
    bearer_token: String,
}

impl Credential {
    pub fn new(user_id: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            bearer_token: bearer_token.into(),
        }
    }

    /// The identity used when no valid session exists.
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER_ID, "")
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == ANONYMOUS_USER_ID || self.bearer_token.is_empty()
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field(
                "bearer_token",
                &if self.bearer_token.is_empty() {
                    "[missing]"
                } else {
                    "[present]"
                },
            )
            .finish()
    }
}

/// Resolves the caller's credential from an already-decoded session.
///
/// Missing or malformed sessions (no subject, blank subject, no identity
/// token) degrade to [`Credential::anonymous`]; authorization is left to the
/// HTTP layer and the backend.
pub fn resolve_credential(session: Option<&SessionClaims>) -> Credential {
    let Some(session) = session else {
        return Credential::anonymous();
    };
    let user_id = session
        .sub
        .as_deref()
        .map(str::trim)
        .filter(|sub| !sub.is_empty());
    let token = session
        .id_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty());
    match (user_id, token) {
        (Some(user_id), Some(token)) => Credential::new(user_id, token),
        _ => {
            tracing::debug!(
                has_sub = user_id.is_some(),
                has_id_token = token.is_some(),
                "malformed session; falling back to anonymous"
            );
            Credential::anonymous()
        }
    }
}
