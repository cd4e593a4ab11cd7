use std::sync::Arc;

use axum::extract::FromRef;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::dto::PublicUser;
use crate::auth::error::AuthError;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_secret, verify_secret};
use crate::auth::store::{User, UserStore};
use crate::state::AppState;

/// Freshly issued access/refresh pair. Never persisted; only the hash of
/// the refresh token lands in the user's session slot.
#[derive(Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Session manager: the one component with business rules. Orchestrates
/// the password hasher, the token codec and the user store into
/// register/login/verify/refresh/logout with single-slot rotation.
#[derive(Clone)]
pub struct AuthService {
    pub store: Arc<dyn UserStore>,
    pub keys: JwtKeys,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            keys: JwtKeys::from_ref(state),
        }
    }
}

impl AuthService {
    pub fn new(store: Arc<dyn UserStore>, keys: JwtKeys) -> Self {
        Self { store, keys }
    }

    fn issue_pair(&self, user: &User) -> Result<TokenPair, AuthError> {
        let access_token = self.keys.sign_access(user)?;
        let refresh_token = self.keys.sign_refresh(user)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Create a user with an empty session slot.
    pub async fn register(&self, email: &str, password: &str) -> Result<PublicUser, AuthError> {
        if self.store.find_by_email(email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AuthError::DuplicateIdentity);
        }
        let hash = hash_secret(password)?;
        // a concurrent register can still hit the unique constraint here;
        // the store reports it as DuplicateEmail
        let user = self.store.create(email, &hash).await?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(PublicUser::from(&user))
    }

    /// Verify credentials and establish the session slot. Unknown email and
    /// wrong password collapse into the same failure kind.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(PublicUser, TokenPair), AuthError> {
        let user = match self.store.find_by_email(email).await? {
            Some(u) => u,
            None => {
                warn!(email = %email, "login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !verify_secret(password, &user.password_hash)? {
            warn!(email = %email, user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        let pair = self.issue_pair(&user)?;
        // rotation even on first login: overwriting the slot invalidates
        // every previously issued refresh token for this user
        let slot = hash_secret(&pair.refresh_token)?;
        self.store.set_refresh_hash(user.id, Some(slot)).await?;

        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok((PublicUser::from(&user), pair))
    }

    /// Resolve an access token to its user. Stateless: the session slot is
    /// not consulted, so logout does not revoke unexpired access tokens.
    pub async fn verify_access_token(&self, token: &str) -> Result<PublicUser, AuthError> {
        let claims = self
            .keys
            .verify_access(token)
            .map_err(|_| AuthError::Unauthenticated)?;
        let user = self
            .store
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        Ok(PublicUser::from(&user))
    }

    /// Rotate the session: check the presented refresh token against the
    /// slot, then compare-and-swap the slot to a freshly issued pair. A
    /// superseded token fails the hash check; a concurrent rotation loses
    /// the swap. Both surface as `Unauthenticated`.
    pub async fn refresh(&self, token: &str) -> Result<(PublicUser, TokenPair), AuthError> {
        let claims = self
            .keys
            .verify_refresh(token)
            .map_err(|_| AuthError::Unauthenticated)?;
        let user = self
            .store
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        let current = match user.refresh_token_hash.as_deref() {
            Some(h) => h.to_string(),
            None => {
                warn!(user_id = %user.id, "refresh with no active session");
                return Err(AuthError::Unauthenticated);
            }
        };

        if !verify_secret(token, &current)? {
            warn!(user_id = %user.id, "refresh token does not match session slot");
            return Err(AuthError::Unauthenticated);
        }

        let pair = self.issue_pair(&user)?;
        let next = hash_secret(&pair.refresh_token)?;
        let won = self
            .store
            .swap_refresh_hash(user.id, Some(&current), Some(next))
            .await?;
        if !won {
            warn!(user_id = %user.id, "session slot rotated concurrently");
            return Err(AuthError::Unauthenticated);
        }

        info!(user_id = %user.id, "session rotated");
        Ok((PublicUser::from(&user), pair))
    }

    /// Clear the session slot. Idempotent; a user with no active session
    /// logs out successfully.
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.store.set_refresh_hash(user_id, None).await?;
        info!(user_id = %user_id, "user logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{Claims, TokenKind};
    use jsonwebtoken::{encode, Header};
    use time::{Duration as TimeDuration, OffsetDateTime};

    fn make_service() -> AuthService {
        let state = AppState::fake();
        AuthService::from_ref(&state)
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let svc = make_service();
        svc.register("alice@example.com", "password1")
            .await
            .expect("first registration");
        let err = svc
            .register("alice@example.com", "password2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateIdentity));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let svc = make_service();
        svc.register("alice@example.com", "password1")
            .await
            .expect("register");

        let wrong_password = svc
            .login("alice@example.com", "not-the-password")
            .await
            .unwrap_err();
        let unknown_email = svc.login("bob@example.com", "password1").await.unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_email, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn access_token_round_trip() {
        let svc = make_service();
        let registered = svc
            .register("alice@example.com", "password1")
            .await
            .expect("register");
        let (_, pair) = svc
            .login("alice@example.com", "password1")
            .await
            .expect("login");

        let resolved = svc
            .verify_access_token(&pair.access_token)
            .await
            .expect("verify");
        assert_eq!(resolved.id, registered.id);
        assert_eq!(resolved.email, "alice@example.com");
    }

    #[tokio::test]
    async fn refresh_token_is_not_a_valid_access_token() {
        let svc = make_service();
        svc.register("alice@example.com", "password1").await.unwrap();
        let (_, pair) = svc.login("alice@example.com", "password1").await.unwrap();

        let err = svc
            .verify_access_token(&pair.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_superseded_token() {
        let svc = make_service();
        svc.register("alice@example.com", "password1").await.unwrap();
        let (_, pair1) = svc.login("alice@example.com", "password1").await.unwrap();

        let (_, pair2) = svc.refresh(&pair1.refresh_token).await.expect("rotate");

        // the superseded token is dead
        let err = svc.refresh(&pair1.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));

        // the current one still rotates
        svc.refresh(&pair2.refresh_token)
            .await
            .expect("current token rotates");
    }

    #[tokio::test]
    async fn login_rotation_invalidates_previous_session() {
        let svc = make_service();
        svc.register("alice@example.com", "password1").await.unwrap();
        let (_, pair1) = svc.login("alice@example.com", "password1").await.unwrap();
        let (_, pair2) = svc.login("alice@example.com", "password1").await.unwrap();

        let err = svc.refresh(&pair1.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
        svc.refresh(&pair2.refresh_token).await.expect("refresh");
    }

    #[tokio::test]
    async fn logout_invalidates_refresh_and_is_idempotent() {
        let svc = make_service();
        let user = svc.register("alice@example.com", "password1").await.unwrap();
        let (_, pair) = svc.login("alice@example.com", "password1").await.unwrap();

        svc.logout(user.id).await.expect("logout");
        svc.logout(user.id).await.expect("logout is idempotent");

        let err = svc.refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn logout_does_not_revoke_unexpired_access_tokens() {
        let svc = make_service();
        let user = svc.register("alice@example.com", "password1").await.unwrap();
        let (_, pair) = svc.login("alice@example.com", "password1").await.unwrap();

        svc.logout(user.id).await.expect("logout");
        // access tokens are stateless until natural expiry
        let resolved = svc
            .verify_access_token(&pair.access_token)
            .await
            .expect("still valid");
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn expired_access_token_is_unauthenticated() {
        let svc = make_service();
        let user = svc.register("alice@example.com", "password1").await.unwrap();

        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            jti: uuid::Uuid::new_v4(),
            iat: (now - TimeDuration::minutes(10)).unix_timestamp() as usize,
            exp: (now - TimeDuration::minutes(2)).unix_timestamp() as usize,
            iss: svc.keys.issuer.clone(),
            aud: svc.keys.audience.clone(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &svc.keys.encoding).expect("encode");

        let err = svc.verify_access_token(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn garbage_tokens_are_unauthenticated() {
        let svc = make_service();
        assert!(matches!(
            svc.verify_access_token("not-a-jwt").await.unwrap_err(),
            AuthError::Unauthenticated
        ));
        assert!(matches!(
            svc.refresh("not-a-jwt").await.unwrap_err(),
            AuthError::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn concurrent_refresh_has_exactly_one_winner() {
        let svc = make_service();
        let user = svc.register("alice@example.com", "password1").await.unwrap();
        let (_, pair) = svc.login("alice@example.com", "password1").await.unwrap();

        let (r1, r2) = tokio::join!(
            svc.refresh(&pair.refresh_token),
            svc.refresh(&pair.refresh_token)
        );

        let (winner, loser) = match (r1, r2) {
            (Ok(w), Err(l)) => (w, l),
            (Err(l), Ok(w)) => (w, l),
            (Ok(_), Ok(_)) => panic!("both refreshes won"),
            (Err(_), Err(_)) => panic!("both refreshes lost"),
        };
        assert!(matches!(loser, AuthError::Unauthenticated));

        // the slot matches the winner's new refresh token
        let (_, pair2) = svc.refresh(&winner.1.refresh_token).await.expect("refresh");
        assert_eq!(user.id, svc.verify_access_token(&pair2.access_token).await.unwrap().id);
    }
}
