use axum::Json;
use axum::extract::{Extension, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::accounts::{AccountError, LoginCommand, RegisterCommand};
use crate::application::pdf::workflow::{CheckOutcome, SubmitOutcome, WorkflowError};
use crate::application::profile::ProfileError;
use crate::application::repos::RepoError;
use crate::application::signatures::SignatureError;
use crate::application::tokens::TokenError;
use crate::domain::error::DomainError;
use crate::infra::media::MediaStorageError;

use super::AppState;
use super::error::{ApiError, codes};
use super::middleware::AuthUser;
use super::models::*;

/// -------- Accounts --------
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = RegisterCommand {
        name: payload.name,
        email: payload.email,
        bio: payload.bio,
        password: payload.password,
        confirm_password: payload.confirm_password,
    };

    let account = state
        .accounts
        .register(command)
        .await
        .map_err(account_to_api)?;

    Ok((StatusCode::CREATED, Json(SessionResponse::from(account))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = LoginCommand {
        email: payload.email,
        password: payload.password,
    };

    let account = state
        .accounts
        .login(command)
        .await
        .map_err(account_to_api)?;

    Ok(Json(SessionResponse::from(account)))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .accounts
        .refresh(&payload.refresh)
        .await
        .map_err(account_to_api)?;

    Ok(Json(TokenPairBody::from(account.tokens)))
}

/// -------- Profile --------
pub async fn profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .profiles
        .view(user.id, &user.email)
        .await
        .map_err(profile_to_api)?;

    Ok(Json(view))
}

/// -------- Signature upload --------
pub async fn sign(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut data: Option<bytes::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request("invalid multipart payload", Some(err.to_string())))?
    {
        // Older clients send the file under `signFile`.
        if matches!(field.name(), Some("signature") | Some("signFile")) {
            data = Some(field.bytes().await.map_err(|err| {
                ApiError::bad_request("failed to read signature", Some(err.to_string()))
            })?);
            break;
        }
    }

    let data = data.ok_or_else(|| ApiError::bad_request("missing signature file", None))?;

    let updated = state
        .signatures
        .update_signature(user.id, data)
        .await
        .map_err(signature_to_api)?;

    let signature_path = updated.signature_path.unwrap_or_default();
    Ok((StatusCode::CREATED, Json(SignatureResponse { signature_path })))
}

/// -------- PDF workflow --------
pub async fn start_pdf_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<PdfTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .pdf
        .submit(user.id, payload.task_id.as_deref())
        .await
        .map_err(workflow_to_api)?;

    let (status, body) = submit_response(payload.task_id.as_deref(), outcome);
    Ok((status, Json(body)))
}

pub async fn check_task_status(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Json(payload): Json<TaskStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .pdf
        .check(&payload.task_id)
        .await
        .map_err(workflow_to_api)?;

    Ok(Json(check_response(&payload.task_id, outcome)))
}

pub async fn check_task_status_by_id(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .pdf
        .check(&task_id)
        .await
        .map_err(workflow_to_api)?;

    Ok(Json(check_response(&task_id, outcome)))
}

/// -------- Health --------
pub async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn submit_response(
    prior_id: Option<&str>,
    outcome: SubmitOutcome,
) -> (StatusCode, PdfTaskResponse) {
    match outcome {
        SubmitOutcome::Enqueued { job_id } => (
            StatusCode::ACCEPTED,
            PdfTaskResponse::Queued { task_id: job_id },
        ),
        SubmitOutcome::AlreadyQueued { job_id } => (
            StatusCode::ACCEPTED,
            PdfTaskResponse::AlreadyQueued { task_id: job_id },
        ),
        SubmitOutcome::FileReady { path } => (StatusCode::OK, PdfTaskResponse::Ready { path }),
        SubmitOutcome::StatusChecked(check) => (
            StatusCode::OK,
            check_response(prior_id.unwrap_or_default(), check),
        ),
    }
}

fn check_response(checked_id: &str, outcome: CheckOutcome) -> PdfTaskResponse {
    match outcome {
        CheckOutcome::InProgress { state } => PdfTaskResponse::InProgress {
            task_id: checked_id.to_string(),
            state: state.as_str().to_string(),
        },
        CheckOutcome::Completed { path } => PdfTaskResponse::Completed { path },
        CheckOutcome::Retrying {
            attempt,
            new_job_id,
        } => PdfTaskResponse::Retrying {
            task_id: new_job_id,
            attempt,
        },
        CheckOutcome::Exhausted { attempts, reason } => PdfTaskResponse::Failed {
            attempts,
            detail: reason,
        },
    }
}

fn domain_to_api(err: DomainError) -> ApiError {
    match err {
        DomainError::Validation { field, message } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::VALIDATION,
            "Invalid input",
            Some(format!("{field}: {message}")),
        ),
        DomainError::NotFound { entity } => ApiError::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "Resource not found",
            Some(entity.to_string()),
        ),
        DomainError::Invariant { message } => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL,
            "Invariant violated",
            Some(message),
        ),
    }
}

fn token_to_api(err: TokenError) -> ApiError {
    match err {
        TokenError::Expired => ApiError::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Token expired",
            None,
        ),
        TokenError::Invalid(detail) => ApiError::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Token invalid",
            Some(detail),
        ),
        TokenError::WrongUse { expected } => ApiError::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Token invalid",
            Some(format!("expected a {expected} token")),
        ),
        TokenError::Signing(detail) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL,
            "Token signing failed",
            Some(detail),
        ),
    }
}

fn account_to_api(err: AccountError) -> ApiError {
    match err {
        AccountError::Validation(domain) => domain_to_api(domain),
        AccountError::EmailTaken => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::EMAIL_TAKEN,
            "email already taken",
            None,
        ),
        AccountError::InvalidCredentials => ApiError::new(
            StatusCode::UNAUTHORIZED,
            codes::INVALID_CREDENTIALS,
            "Invalid email or password",
            None,
        ),
        AccountError::Token(err) => token_to_api(err),
        AccountError::Repo(err) => repo_to_api(err),
    }
}

fn profile_to_api(err: ProfileError) -> ApiError {
    match err {
        ProfileError::NotFound => ApiError::not_found("profile not found"),
        ProfileError::Repo(err) => repo_to_api(err),
    }
}

fn signature_to_api(err: SignatureError) -> ApiError {
    match err {
        SignatureError::UserNotFound => ApiError::not_found("user not found"),
        SignatureError::NotAnImage => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::UPLOAD,
            "Signature is not a readable image",
            None,
        ),
        SignatureError::UnsupportedFormat(format) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::UPLOAD,
            "Unsupported signature format",
            Some(format),
        ),
        SignatureError::Repo(err) => repo_to_api(err),
        SignatureError::Storage(err) => storage_to_api(err),
    }
}

fn workflow_to_api(err: WorkflowError) -> ApiError {
    match err {
        WorkflowError::UserNotFound => ApiError::not_found("user not found"),
        WorkflowError::JobNotFound => ApiError::new(
            StatusCode::NOT_FOUND,
            codes::JOBS,
            "Task not found",
            None,
        ),
        WorkflowError::MalformedPayload(detail) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::JOBS,
            "Task record is malformed",
            Some(detail),
        ),
        WorkflowError::Repo(err) => repo_to_api(err),
        WorkflowError::Storage(err) => storage_to_api(err),
    }
}

fn storage_to_api(err: MediaStorageError) -> ApiError {
    match err {
        MediaStorageError::InvalidPath => ApiError::bad_request("invalid media path", None),
        MediaStorageError::NotFound { path } => ApiError::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "File not found",
            Some(path),
        ),
        MediaStorageError::Io(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::UPLOAD,
            "Storage failure",
            Some(err.to_string()),
        ),
    }
}

fn repo_to_api(err: RepoError) -> ApiError {
    match err {
        RepoError::Duplicate { constraint } => ApiError::new(
            StatusCode::CONFLICT,
            codes::DUPLICATE,
            "Duplicate record",
            Some(constraint),
        ),
        RepoError::NotFound => ApiError::not_found("resource not found"),
        RepoError::InvalidInput { message } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Invalid input",
            Some(message),
        ),
        RepoError::Integrity { message } => ApiError::new(
            StatusCode::CONFLICT,
            codes::INTEGRITY,
            "Integrity constraint violated",
            Some(message),
        ),
        RepoError::Timeout => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::DB_TIMEOUT,
            "Database timeout",
            None,
        ),
        RepoError::Persistence(msg) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Persistence error",
            Some(msg),
        ),
    }
}
