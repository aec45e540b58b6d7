#[cfg(feature = "web")]
use crate::app::AppState;
use crate::error::AppError;
#[cfg(feature = "web")]
use crate::sheets::SheetsClient;
use crate::store::{Database, UserRow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::{
    Extension, Json,
    extract::{Path as AxumPath, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::{
    WithRejection,
    cookie::{Cookie, CookieJar},
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "web")]
use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Shortest password accepted on create, change and reset.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Roles a portal user can hold.
///
/// `admin` sees and manages everything; `reviewer` only sees applications of
/// the programs assigned to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Reviewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Reviewer => "reviewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "reviewer" => Ok(Role::Reviewer),
            _ => Err(AppError::ValidationFailed("Invalid role".to_string())),
        }
    }
}

/// A registered portal user, without credentials.
///
/// This is also the authenticated principal attached to every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role: Role = row.role.parse().map_err(|_| {
            AppError::Internal(format!("User {} has unknown role {:?}", row.id, row.role))
        })?;
        Ok(User {
            id: row.id,
            username: row.username,
            email: row.email,
            role,
            created_at: row.created_at,
        })
    }
}

/// Data for creating a user.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Option<String>,
}

/// Hash a password using Argon2
///
/// Creates a cryptographically secure hash of a password using Argon2id.
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String, AppError>` - The password hash or an error
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err(AppError::Internal("Password hashing failed".to_string())),
    }
}

/// Verify a password against a stored hash
///
/// # Returns
/// * `Result<bool, AppError>` - True if the password matches, false if not,
///   or an error when the stored hash is malformed
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(_) => return Err(AppError::Internal("Invalid password hash format".to_string())),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false), // Password didn't match
    }
}

fn check_password_strength(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::ValidationFailed(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// User session data
#[derive(Debug, Clone)]
pub struct Session {
    /// Id of the authenticated user
    pub user_id: i64,

    /// Time when the session expires
    pub expires_at: SystemTime,
}

/// Active sessions, keyed by opaque token.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a new session and return its token.
    pub fn create(&self, user_id: i64) -> String {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            user_id,
            expires_at: SystemTime::now() + self.ttl,
        };

        let mut sessions = self.sessions.write().unwrap();
        let now = SystemTime::now();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token.clone(), session);

        token
    }

    /// The user id for a live session, `None` if unknown or expired.
    pub fn validate(&self, token: &str) -> Option<i64> {
        let sessions = self.sessions.read().unwrap();

        if let Some(session) = sessions.get(token) {
            if session.expires_at > SystemTime::now() {
                return Some(session.user_id);
            }
        }

        None
    }

    pub fn revoke(&self, token: &str) {
        self.sessions.write().unwrap().remove(token);
    }

    /// Drop every session belonging to a user.
    pub fn revoke_user(&self, user_id: i64) {
        self.sessions
            .write()
            .unwrap()
            .retain(|_, s| s.user_id != user_id);
    }
}

/// User management over the relational store.
#[derive(Debug, Clone)]
pub struct Accounts {
    db: Database,
}

impl Accounts {
    pub fn new(db: Database) -> Self {
        Accounts { db }
    }

    /// Check a username (or email) and password.
    ///
    /// # Errors
    /// * `AppError::AuthRequired` for an unknown login or wrong password
    pub fn authenticate(&self, login: &str, password: &str) -> Result<User, AppError> {
        if login.is_empty() || password.is_empty() {
            return Err(AppError::ValidationFailed(
                "Username and password required".to_string(),
            ));
        }

        let row = self
            .db
            .user_by_login(login)
            .map_err(|e| AppError::from_store(e, "Failed to look up user"))?
            .ok_or_else(|| AppError::AuthRequired("Invalid credentials".to_string()))?;

        if !verify_password(password, &row.password_hash)? {
            return Err(AppError::AuthRequired("Invalid credentials".to_string()));
        }

        row.try_into()
    }

    pub fn get(&self, id: i64) -> Result<Option<User>, AppError> {
        self.db
            .user_by_id(id)
            .map_err(|e| AppError::from_store(e, "Failed to fetch user"))?
            .map(User::try_from)
            .transpose()
    }

    pub fn list(&self) -> Result<Vec<User>, AppError> {
        self.db
            .list_users()
            .map_err(|e| AppError::from_store(e, "Failed to fetch users"))?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    /// Register a new user
    ///
    /// # Errors
    /// * `AppError::ValidationFailed` for a missing username, a short
    ///   password or an unknown role
    /// * `AppError::Conflict` when the username or email is taken
    pub fn create(&self, new_user: &NewUser) -> Result<User, AppError> {
        let username = new_user.username.trim();
        if username.is_empty() || new_user.password.is_empty() {
            return Err(AppError::ValidationFailed(
                "Username and password required".to_string(),
            ));
        }
        check_password_strength(&new_user.password)?;
        let role: Role = new_user.role.as_deref().unwrap_or("reviewer").parse()?;
        let email = new_user
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());

        let hash = hash_password(&new_user.password)?;
        let row = self
            .db
            .insert_user(username, email, &hash, role.as_str())
            .map_err(|e| AppError::from_store(e, "Failed to create user"))?;

        info!("Created {role} user {username}");
        row.try_into()
    }

    /// Delete a user other than `actor`.
    pub fn delete(&self, actor: &User, id: i64) -> Result<(), AppError> {
        if actor.id == id {
            return Err(AppError::ValidationFailed(
                "Cannot delete your own account".to_string(),
            ));
        }
        let deleted = self
            .db
            .delete_user(id)
            .map_err(|e| AppError::from_store(e, "Failed to delete user"))?;
        if !deleted {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        info!("User {id} deleted by {}", actor.username);
        Ok(())
    }

    /// Change the caller's own password after checking the current one.
    pub fn change_password(
        &self,
        user: &User,
        current: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        if current.is_empty() || new_password.is_empty() {
            return Err(AppError::ValidationFailed(
                "Current password and new password are required".to_string(),
            ));
        }
        check_password_strength(new_password)?;

        let row = self
            .db
            .user_by_id(user.id)
            .map_err(|e| AppError::from_store(e, "Failed to update password"))?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        if !verify_password(current, &row.password_hash)? {
            return Err(AppError::AuthRequired(
                "Current password is incorrect".to_string(),
            ));
        }

        self.set_password(user.id, new_password)
    }

    /// Set any user's password without knowing the old one.
    pub fn set_password(&self, id: i64, new_password: &str) -> Result<(), AppError> {
        check_password_strength(new_password)?;
        let hash = hash_password(new_password)?;
        let updated = self
            .db
            .update_password(id, &hash)
            .map_err(|e| AppError::from_store(e, "Failed to update password"))?;
        if !updated {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    /// Create `username` with `role` unless it already exists.
    ///
    /// # Returns
    /// * `Ok(true)` when the user was created, `Ok(false)` when it existed
    pub fn ensure_user(&self, username: &str, password: &str, role: Role) -> Result<bool, AppError> {
        let existing = self
            .db
            .user_by_login(username)
            .map_err(|e| AppError::from_store(e, "Failed to look up user"))?;
        if existing.is_some() {
            warn!("User {username} already exists");
            return Ok(false);
        }

        self.create(&NewUser {
            username: username.to_string(),
            password: password.to_string(),
            email: None,
            role: Some(role.as_str().to_string()),
        })?;
        Ok(true)
    }

    /// Seed an `admin` account when no user exists at all.
    pub fn seed_admin_if_empty(&self, password: &str) -> Result<bool, AppError> {
        let count = self
            .db
            .count_users()
            .map_err(|e| AppError::from_store(e, "Failed to count users"))?;
        if count > 0 {
            return Ok(false);
        }
        self.ensure_user("admin", password, Role::Admin)
    }
}

// Web handler functions below (only compiled with "web" feature)

/// Credential data for login
#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct UserCredentials {
    /// Username or email
    #[serde(default)]
    pub username: String,

    /// Password in plaintext (only transmitted, never stored)
    #[serde(default)]
    pub password: String,
}

/// Password change request data
#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangeRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

/// Admin password reset data
#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetRequest {
    #[serde(default)]
    pub new_password: String,
}

/// Login response body
#[cfg(feature = "web")]
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// Token presented by the current request, kept for logout.
#[cfg(feature = "web")]
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

#[cfg(feature = "web")]
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(feature = "web")]
fn success(message: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "message": message }))
}

/// Handle user login requests
///
/// Validates credentials and creates a session. The token is returned in the
/// body and also set as the `session` cookie.
///
/// # Arguments
/// * `state` - Shared application state
/// * `jar` - Cookie jar for storing the session cookie
/// * `credentials` - JSON body containing the username and password
#[cfg(feature = "web")]
pub async fn handle_login<C: SheetsClient>(
    State(state): State<Arc<AppState<C>>>,
    jar: CookieJar,
    WithRejection(Json(credentials), _): WithRejection<Json<UserCredentials>, AppError>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    let user = state
        .portal
        .accounts
        .authenticate(credentials.username.trim(), &credentials.password)
        .inspect_err(|_| warn!("Failed login for {:?}", credentials.username))?;

    let token = state.sessions.create(user.id);
    info!("{} logged in", user.username);

    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .build();
    Ok((jar.add(cookie), Json(LoginResponse { token, user })))
}

/// Handle user logout
///
/// Revokes the session and clears the session cookie.
#[cfg(feature = "web")]
pub async fn handle_logout<C: SheetsClient>(
    State(state): State<Arc<AppState<C>>>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    state.sessions.revoke(&token);
    let cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (jar.remove(cookie), success("Logged out"))
}

/// Return the authenticated user.
#[cfg(feature = "web")]
pub async fn handle_me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

/// Authentication middleware
///
/// Accepts a bearer token or the `session` cookie, resolves it to a current
/// user row and stores the [`User`] and [`SessionToken`] in the request
/// extensions.
///
/// # Returns
/// * `Response` - Either the downstream response or a 401
#[cfg(feature = "web")]
pub async fn require_auth<C: SheetsClient>(
    State(state): State<Arc<AppState<C>>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let token = bearer_token(request.headers())
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()));

    let Some(token) = token else {
        return AppError::AuthRequired("Access token required".to_string()).into_response();
    };

    let Some(user_id) = state.sessions.validate(&token) else {
        return AppError::AuthRequired("Invalid or expired token".to_string()).into_response();
    };

    match state.portal.accounts.get(user_id) {
        Ok(Some(user)) => {
            request.extensions_mut().insert(user);
            request.extensions_mut().insert(SessionToken(token));
            next.run(request).await
        }
        Ok(None) => {
            state.sessions.revoke(&token);
            AppError::AuthRequired("User not found".to_string()).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// List all users (admin only).
#[cfg(feature = "web")]
pub async fn list_users<C: SheetsClient>(
    State(state): State<Arc<AppState<C>>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<User>>, AppError> {
    crate::access::require_admin(&user)?;
    Ok(Json(state.portal.accounts.list()?))
}

/// Create a user (admin only).
#[cfg(feature = "web")]
pub async fn create_user<C: SheetsClient>(
    State(state): State<Arc<AppState<C>>>,
    Extension(user): Extension<User>,
    WithRejection(Json(new_user), _): WithRejection<Json<NewUser>, AppError>,
) -> Result<(StatusCode, Json<User>), AppError> {
    crate::access::require_admin(&user)?;
    let created = state.portal.accounts.create(&new_user)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Delete a user (admin only, never yourself).
#[cfg(feature = "web")]
pub async fn delete_user<C: SheetsClient>(
    State(state): State<Arc<AppState<C>>>,
    Extension(user): Extension<User>,
    WithRejection(AxumPath(id), _): WithRejection<AxumPath<i64>, AppError>,
) -> Result<Json<serde_json::Value>, AppError> {
    crate::access::require_admin(&user)?;
    state.portal.accounts.delete(&user, id)?;
    state.sessions.revoke_user(id);
    Ok(success("User deleted successfully"))
}

/// Handle password change for the authenticated user.
#[cfg(feature = "web")]
pub async fn handle_change_password<C: SheetsClient>(
    State(state): State<Arc<AppState<C>>>,
    Extension(user): Extension<User>,
    WithRejection(Json(change_req), _): WithRejection<Json<PasswordChangeRequest>, AppError>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.portal.accounts.change_password(
        &user,
        &change_req.current_password,
        &change_req.new_password,
    )?;
    Ok(success("Password updated successfully"))
}

/// Set another user's password (admin only).
#[cfg(feature = "web")]
pub async fn handle_reset_password<C: SheetsClient>(
    State(state): State<Arc<AppState<C>>>,
    Extension(user): Extension<User>,
    WithRejection(AxumPath(id), _): WithRejection<AxumPath<i64>, AppError>,
    WithRejection(Json(reset_req), _): WithRejection<Json<PasswordResetRequest>, AppError>,
) -> Result<Json<serde_json::Value>, AppError> {
    crate::access::require_admin(&user)?;
    state
        .portal
        .accounts
        .set_password(id, &reset_req.new_password)?;
    info!("Password for user {id} reset by {}", user.username);
    Ok(success("Password reset successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> Accounts {
        Accounts::new(Database::open_in_memory().unwrap())
    }

    fn new_user(username: &str, password: &str, role: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password: password.to_string(),
            email: None,
            role: Some(role.to_string()),
        }
    }

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("secret123").unwrap();
        assert!(verify_password("secret123", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
        assert!(verify_password("x", "not a hash").is_err());
    }

    #[test]
    fn roles_parse() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("reviewer".parse::<Role>().unwrap(), Role::Reviewer);
        assert!("rerc_head".parse::<Role>().is_err());
        assert_eq!(Role::Reviewer.to_string(), "reviewer");
    }

    #[test]
    fn create_and_authenticate() {
        let accounts = accounts();
        let user = accounts
            .create(&NewUser {
                email: Some("ana@example.com".to_string()),
                ..new_user("ana", "secret123", "reviewer")
            })
            .unwrap();
        assert_eq!(user.role, Role::Reviewer);

        assert_eq!(accounts.authenticate("ana", "secret123").unwrap().id, user.id);
        assert_eq!(
            accounts.authenticate("ana@example.com", "secret123").unwrap().id,
            user.id
        );
        assert!(matches!(
            accounts.authenticate("ana", "nope"),
            Err(AppError::AuthRequired(_))
        ));
        assert!(matches!(
            accounts.authenticate("bo", "secret123"),
            Err(AppError::AuthRequired(_))
        ));
    }

    #[test]
    fn create_validates_input() {
        let accounts = accounts();
        assert!(matches!(
            accounts.create(&new_user("", "secret123", "admin")),
            Err(AppError::ValidationFailed(_))
        ));
        assert!(matches!(
            accounts.create(&new_user("ana", "123", "admin")),
            Err(AppError::ValidationFailed(_))
        ));
        assert!(matches!(
            accounts.create(&new_user("ana", "secret123", "owner")),
            Err(AppError::ValidationFailed(_))
        ));

        accounts.create(&new_user("ana", "secret123", "admin")).unwrap();
        assert!(matches!(
            accounts.create(&new_user("ana", "secret123", "admin")),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn cannot_delete_self() {
        let accounts = accounts();
        let admin = accounts.create(&new_user("admin", "secret123", "admin")).unwrap();
        let other = accounts.create(&new_user("bo", "secret123", "reviewer")).unwrap();

        assert!(matches!(
            accounts.delete(&admin, admin.id),
            Err(AppError::ValidationFailed(_))
        ));
        accounts.delete(&admin, other.id).unwrap();
        assert!(accounts.get(other.id).unwrap().is_none());
        assert!(matches!(
            accounts.delete(&admin, other.id),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn change_password_checks_current() {
        let accounts = accounts();
        let user = accounts.create(&new_user("ana", "secret123", "reviewer")).unwrap();

        assert!(matches!(
            accounts.change_password(&user, "wrong", "newsecret"),
            Err(AppError::AuthRequired(_))
        ));
        assert!(matches!(
            accounts.change_password(&user, "secret123", "short"),
            Err(AppError::ValidationFailed(_))
        ));
        accounts
            .change_password(&user, "secret123", "newsecret")
            .unwrap();
        assert!(accounts.authenticate("ana", "newsecret").is_ok());
    }

    #[test]
    fn seeding_only_when_empty() {
        let accounts = accounts();
        assert!(accounts.seed_admin_if_empty("admin123").unwrap());
        assert!(!accounts.seed_admin_if_empty("admin123").unwrap());
        assert!(!accounts.ensure_user("admin", "admin123", Role::Admin).unwrap());
        assert!(accounts.authenticate("admin", "admin123").unwrap().is_admin());
    }

    #[test]
    fn sessions_expire_and_revoke() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.create(7);
        assert_eq!(store.validate(&token), Some(7));
        assert_eq!(store.validate("unknown"), None);

        store.revoke(&token);
        assert_eq!(store.validate(&token), None);

        let a = store.create(7);
        let b = store.create(8);
        store.revoke_user(7);
        assert_eq!(store.validate(&a), None);
        assert_eq!(store.validate(&b), Some(8));

        let expired = SessionStore::new(Duration::from_secs(0));
        let token = expired.create(1);
        assert_eq!(expired.validate(&token), None);
    }
}
