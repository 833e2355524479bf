use std::sync::Arc;

use thiserror::Error;

use crate::application::credentials;
use crate::application::repos::{CreateUserParams, RepoError, UsersRepo};
use crate::application::tokens::{TokenError, TokenPair, TokenService};
use crate::domain::accounts::{
    normalize_email, validate_bio, validate_email, validate_name, validate_password,
    validate_password_pair,
};
use crate::domain::entities::UserRecord;
use crate::domain::error::DomainError;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("email already taken")]
    EmailTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone)]
pub struct RegisterCommand {
    pub name: String,
    pub email: String,
    pub bio: Option<String>,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone)]
pub struct LoginCommand {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedAccount {
    pub user: UserRecord,
    pub tokens: TokenPair,
}

#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UsersRepo>,
    tokens: Arc<TokenService>,
}

impl AccountService {
    pub fn new(users: Arc<dyn UsersRepo>, tokens: Arc<TokenService>) -> Self {
        Self { users, tokens }
    }

    pub async fn register(&self, cmd: RegisterCommand) -> Result<AuthenticatedAccount, AccountError> {
        validate_name(&cmd.name)?;
        let email = normalize_email(&cmd.email);
        validate_email(&email)?;
        if let Some(bio) = cmd.bio.as_deref() {
            validate_bio(bio)?;
        }
        validate_password_pair(&cmd.password, &cmd.confirm_password)?;
        validate_password(&cmd.password)?;

        let salt = credentials::generate_salt();
        let password_hash = credentials::hash_password(&salt, &cmd.password);

        let user = self
            .users
            .create_user_with_profile(CreateUserParams {
                email,
                name: cmd.name,
                password_hash,
                password_salt: salt,
                bio: cmd.bio,
            })
            .await
            .map_err(|err| match err {
                RepoError::Duplicate { .. } => AccountError::EmailTaken,
                other => AccountError::Repo(other),
            })?;

        let tokens = self.tokens.issue_pair(user.id, &user.email)?;
        Ok(AuthenticatedAccount { user, tokens })
    }

    /// Look up the account and check the password in constant time. Unknown
    /// email and wrong password are indistinguishable to the caller.
    pub async fn login(&self, cmd: LoginCommand) -> Result<AuthenticatedAccount, AccountError> {
        let email = normalize_email(&cmd.email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            return Err(AccountError::InvalidCredentials);
        };

        if !credentials::verify_password(&user.password_salt, &user.password_hash, &cmd.password) {
            return Err(AccountError::InvalidCredentials);
        }

        let tokens = self.tokens.issue_pair(user.id, &user.email)?;
        Ok(AuthenticatedAccount { user, tokens })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthenticatedAccount, AccountError> {
        let claims = self.tokens.verify_refresh(refresh_token)?;
        let user_id = claims.user_id()?;

        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Err(AccountError::InvalidCredentials);
        };

        let tokens = self.tokens.issue_pair(user.id, &user.email)?;
        Ok(AuthenticatedAccount { user, tokens })
    }
}
