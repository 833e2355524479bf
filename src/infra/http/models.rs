use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::application::accounts::AuthenticatedAccount;
use crate::application::tokens::TokenPair;
use crate::domain::entities::UserRecord;

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub bio: Option<String>,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Public shape of a user row. Credentials never leave the database layer.
#[derive(Debug, Serialize)]
pub struct UserBody {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_path: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<UserRecord> for UserBody {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            signature_path: user.signature_path,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenPairBody {
    pub access: String,
    pub refresh: String,
}

impl From<TokenPair> for TokenPairBody {
    fn from(pair: TokenPair) -> Self {
        Self {
            access: pair.access,
            refresh: pair.refresh,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserBody,
    pub tokens: TokenPairBody,
}

impl From<AuthenticatedAccount> for SessionResponse {
    fn from(account: AuthenticatedAccount) -> Self {
        Self {
            user: account.user.into(),
            tokens: account.tokens.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignatureResponse {
    pub signature_path: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PdfTaskRequest {
    /// Last task id the client saw for this document, if any. Supplying it
    /// turns a submission that finds the file already rendered into a poll.
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TaskStatusRequest {
    pub task_id: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PdfTaskResponse {
    Queued { task_id: String },
    AlreadyQueued { task_id: String },
    Ready { path: String },
    InProgress { task_id: String, state: String },
    Completed { path: String },
    Retrying { task_id: String, attempt: i32 },
    Failed { attempts: i32, detail: String },
}
