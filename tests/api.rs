use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

use firma::application::accounts::AccountService;
use firma::application::cache::{CacheError, CachedCounters, ProfileCache};
use firma::application::pdf::{DocumentRenderer, PdfWorkflow, RetryPolicy};
use firma::application::profile::ProfileService;
use firma::application::repos::{
    CreateUserParams, EnqueueOutcome, JobsRepo, NewJobRecord, ProfilesRepo, RepoError, RetriesRepo,
    UsersRepo,
};
use firma::application::signatures::SignatureService;
use firma::application::tokens::TokenService;
use firma::domain::entities::{
    JobRecord, ProfileOwner, ProfileRecord, RetryCounterRecord, UserRecord,
};
use firma::domain::types::JobState;
use firma::infra::http::{AppState, build_router};
use firma::infra::media::MediaStorage;

const TEST_TOKEN_SECRET: &str = "integration-test-secret-0123456789";
const PASSWORD: &str = "s3cretpass!";

struct MemoryRepos {
    next_user_id: AtomicI64,
    users: Mutex<HashMap<i64, UserRecord>>,
    profiles: Mutex<HashMap<i64, ProfileRecord>>,
    jobs: Mutex<HashMap<String, JobRecord>>,
    retries: Mutex<HashMap<String, RetryCounterRecord>>,
}

impl MemoryRepos {
    fn new() -> Self {
        Self {
            next_user_id: AtomicI64::new(1),
            users: Mutex::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            retries: Mutex::new(HashMap::new()),
        }
    }

    async fn user(&self, id: i64) -> UserRecord {
        self.users
            .lock()
            .await
            .get(&id)
            .cloned()
            .expect("user exists")
    }

    async fn rename_user(&self, id: i64, name: &str) {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).expect("user exists");
        user.name = name.to_string();
        user.updated_at = OffsetDateTime::now_utc();
    }

    async fn job(&self, id: &str) -> JobRecord {
        self.jobs
            .lock()
            .await
            .get(id)
            .cloned()
            .expect("job exists")
    }

    async fn finish_job(&self, id: &str) {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(id).expect("job exists");
        job.state = JobState::Done;
        job.attempts = 1;
        job.done_at = Some(OffsetDateTime::now_utc());
    }

    async fn fail_job(&self, id: &str, error: &str) {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(id).expect("job exists");
        job.state = JobState::Failed;
        job.attempts = 1;
        job.done_at = Some(OffsetDateTime::now_utc());
        job.last_error = Some(error.to_string());
    }
}

#[async_trait]
impl UsersRepo for MemoryRepos {
    async fn create_user_with_profile(
        &self,
        params: CreateUserParams,
    ) -> Result<UserRecord, RepoError> {
        let mut users = self.users.lock().await;
        if users.values().any(|user| user.email == params.email) {
            return Err(RepoError::Duplicate {
                constraint: "users_email_key".to_string(),
            });
        }

        let id = self.next_user_id.fetch_add(1, Ordering::SeqCst);
        let now = OffsetDateTime::now_utc();
        let user = UserRecord {
            id,
            email: params.email,
            name: params.name,
            password_hash: params.password_hash,
            password_salt: params.password_salt,
            signature_path: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(id, user.clone());
        self.profiles.lock().await.insert(
            id,
            ProfileRecord {
                user_id: id,
                bio: params.bio,
                posts_count: 0,
                subscribers_count: 0,
                subscriptions_count: 0,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, RepoError> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn update_signature_path(
        &self,
        id: i64,
        signature_path: Option<String>,
    ) -> Result<UserRecord, RepoError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(RepoError::NotFound)?;
        user.signature_path = signature_path;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }
}

#[async_trait]
impl ProfilesRepo for MemoryRepos {
    async fn find_profile(&self, user_id: i64) -> Result<Option<ProfileRecord>, RepoError> {
        Ok(self.profiles.lock().await.get(&user_id).cloned())
    }

    async fn list_owners(&self) -> Result<Vec<ProfileOwner>, RepoError> {
        let users = self.users.lock().await;
        let profiles = self.profiles.lock().await;
        let mut owners: Vec<ProfileOwner> = profiles
            .keys()
            .filter_map(|user_id| {
                users.get(user_id).map(|user| ProfileOwner {
                    user_id: *user_id,
                    email: user.email.clone(),
                })
            })
            .collect();
        owners.sort_by_key(|owner| owner.user_id);
        Ok(owners)
    }

    async fn apply_counters(
        &self,
        user_id: i64,
        counters: &CachedCounters,
    ) -> Result<(), RepoError> {
        let mut profiles = self.profiles.lock().await;
        let Some(profile) = profiles.get_mut(&user_id) else {
            return Ok(());
        };
        if let Some(value) = counters.posts_count {
            profile.posts_count = value;
        }
        if let Some(value) = counters.subscribers_count {
            profile.subscribers_count = value;
        }
        if let Some(value) = counters.subscriptions_count {
            profile.subscriptions_count = value;
        }
        profile.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[async_trait]
impl JobsRepo for MemoryRepos {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<EnqueueOutcome, RepoError> {
        let mut jobs = self.jobs.lock().await;

        let mut payload = job.payload;
        if let Some(key) = job.idempotency_key.as_deref() {
            if let Some(map) = payload.as_object_mut() {
                map.insert(
                    "idempotency_key".to_string(),
                    Value::String(key.to_string()),
                );
            }
            let waiting = jobs.values().find(|record| {
                record.job_type == job.job_type
                    && !record.state.is_terminal()
                    && record.payload.get("idempotency_key").and_then(Value::as_str) == Some(key)
            });
            if let Some(record) = waiting {
                return Ok(EnqueueOutcome::Deduplicated {
                    job_id: record.id.clone(),
                });
            }
        }

        let id = Uuid::new_v4().to_string();
        jobs.insert(
            id.clone(),
            JobRecord {
                id: id.clone(),
                job_type: job.job_type,
                payload,
                state: JobState::Pending,
                attempts: 0,
                max_attempts: job.max_attempts,
                run_at: job.run_at,
                lock_at: None,
                lock_by: None,
                done_at: None,
                last_error: None,
                priority: job.priority,
            },
        );
        Ok(EnqueueOutcome::Created { job_id: id })
    }

    async fn find_job(&self, id: &str) -> Result<Option<JobRecord>, RepoError> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }
}

#[async_trait]
impl RetriesRepo for MemoryRepos {
    async fn claim_attempt(&self, job_id: &str, cap: i32) -> Result<Option<i32>, RepoError> {
        let mut retries = self.retries.lock().await;
        match retries.get_mut(job_id) {
            None => {
                if cap <= 0 {
                    return Ok(None);
                }
                retries.insert(
                    job_id.to_string(),
                    RetryCounterRecord {
                        job_id: job_id.to_string(),
                        attempts: 1,
                        replacement_job_id: None,
                        updated_at: OffsetDateTime::now_utc(),
                    },
                );
                Ok(Some(1))
            }
            Some(counter) => {
                if counter.attempts >= cap {
                    return Ok(None);
                }
                counter.attempts += 1;
                counter.updated_at = OffsetDateTime::now_utc();
                Ok(Some(counter.attempts))
            }
        }
    }

    async fn record_replacement(
        &self,
        job_id: &str,
        replacement_job_id: &str,
    ) -> Result<(), RepoError> {
        if let Some(counter) = self.retries.lock().await.get_mut(job_id) {
            counter.replacement_job_id = Some(replacement_job_id.to_string());
            counter.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn find_counter(&self, job_id: &str) -> Result<Option<RetryCounterRecord>, RepoError> {
        Ok(self.retries.lock().await.get(job_id).cloned())
    }
}

#[derive(Default)]
struct MemoryProfileCache {
    entries: Mutex<HashMap<String, CachedCounters>>,
    unavailable: AtomicBool,
}

impl MemoryProfileCache {
    async fn publish(&self, email: &str, counters: CachedCounters) {
        self.entries.lock().await.insert(email.to_string(), counters);
    }

    fn break_connection(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileCache for MemoryProfileCache {
    async fn counters_for(&self, email: &str) -> Result<Option<CachedCounters>, CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".to_string()));
        }
        Ok(self.entries.lock().await.get(email).copied())
    }
}

struct TestApp {
    router: Router,
    repos: Arc<MemoryRepos>,
    cache: Arc<MemoryProfileCache>,
    media: Arc<MediaStorage>,
    renderer: DocumentRenderer,
    _media_dir: TempDir,
}

fn test_app() -> TestApp {
    let media_dir = tempfile::tempdir().expect("tempdir");
    let media =
        Arc::new(MediaStorage::new(media_dir.path().to_path_buf()).expect("media storage"));

    let repos = Arc::new(MemoryRepos::new());
    let cache = Arc::new(MemoryProfileCache::default());

    let users_repo: Arc<dyn UsersRepo> = repos.clone();
    let profiles_repo: Arc<dyn ProfilesRepo> = repos.clone();
    let jobs_repo: Arc<dyn JobsRepo> = repos.clone();
    let retries_repo: Arc<dyn RetriesRepo> = repos.clone();
    let profile_cache: Arc<dyn ProfileCache> = cache.clone();

    let tokens = Arc::new(TokenService::new(
        TEST_TOKEN_SECRET,
        "firma-test",
        Duration::from_secs(900),
        Duration::from_secs(86_400),
    ));

    let state = AppState {
        accounts: Arc::new(AccountService::new(users_repo.clone(), tokens.clone())),
        profiles: Arc::new(ProfileService::new(profiles_repo, profile_cache)),
        signatures: Arc::new(SignatureService::new(users_repo.clone(), media.clone())),
        pdf: Arc::new(PdfWorkflow::new(
            users_repo,
            jobs_repo,
            retries_repo,
            media.clone(),
            RetryPolicy::new(5),
        )),
        tokens,
    };

    TestApp {
        router: build_router(state),
        repos,
        cache,
        renderer: DocumentRenderer::new(media.clone()),
        media,
        _media_dir: media_dir,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request builds")
}

fn multipart_request(uri: &str, token: &str, field_name: &str, data: &[u8]) -> Request<Body> {
    let boundary = "firma-test-boundary-7349";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field_name}\"; filename=\"sig.bmp\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .expect("request builds")
}

async fn body_to_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

// 2x2 24-bit BMP, written out header byte by byte.
fn tiny_bmp() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"BM");
    data.extend_from_slice(&70u32.to_le_bytes());
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(&54u32.to_le_bytes());
    data.extend_from_slice(&40u32.to_le_bytes());
    data.extend_from_slice(&2i32.to_le_bytes());
    data.extend_from_slice(&2i32.to_le_bytes());
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&24u16.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&16u32.to_le_bytes());
    data.extend_from_slice(&[0; 16]);
    data.extend_from_slice(&[0x20; 16]);
    data
}

/// Register a user and hand back its id plus the issued token pair.
async fn register_user(app: &TestApp, name: &str, email: &str) -> (i64, String, String) {
    let response = app
        .send(json_request(
            Method::POST,
            "/register/",
            None,
            &json!({
                "name": name,
                "email": email,
                "password": PASSWORD,
                "confirm_password": PASSWORD,
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_to_json(response).await;
    let id = body["user"]["id"].as_i64().expect("user id");
    let access = body["tokens"]["access"].as_str().expect("access").to_string();
    let refresh = body["tokens"]["refresh"]
        .as_str()
        .expect("refresh")
        .to_string();
    (id, access, refresh)
}

async fn submit_pdf_task(app: &TestApp, token: &str) -> String {
    let response = app
        .send(json_request(
            Method::POST,
            "/start_pdf_task/",
            Some(token),
            &json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_to_json(response).await;
    assert_eq!(body["status"], "queued");
    body["task_id"].as_str().expect("task id").to_string()
}

// ============ Accounts ============

#[tokio::test]
async fn register_creates_an_account_and_issues_tokens() {
    let app = test_app();

    let response = app
        .send(json_request(
            Method::POST,
            "/register/",
            None,
            &json!({
                "name": "Ann",
                "email": "Ann@Example.com",
                "bio": "Climbs.",
                "password": PASSWORD,
                "confirm_password": PASSWORD,
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_to_json(response).await;
    assert_eq!(body["user"]["name"], "Ann");
    assert_eq!(body["user"]["email"], "ann@example.com");
    assert!(body["user"]["password"].is_null());
    assert!(body["user"]["password_hash"].is_null());
    assert!(body["user"]["password_salt"].is_null());

    let access = body["tokens"]["access"].as_str().expect("access token");
    let profile = app.send(get_request("/profile/", Some(access))).await;
    assert_eq!(profile.status(), StatusCode::OK);
    let profile = body_to_json(profile).await;
    assert_eq!(profile["bio"], "Climbs.");
    assert_eq!(profile["posts_count"], 0);
}

#[tokio::test]
async fn register_rejects_a_taken_email() {
    let app = test_app();
    register_user(&app, "Ann", "ann@example.com").await;

    let response = app
        .send(json_request(
            Method::POST,
            "/register/",
            None,
            &json!({
                "name": "Impostor",
                "email": "ANN@example.com",
                "password": PASSWORD,
                "confirm_password": PASSWORD,
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_to_json(response).await;
    assert_eq!(body["error"]["code"], "email_taken");
    assert!(
        body["error"]["message"]
            .as_str()
            .expect("message")
            .contains("already taken")
    );
}

#[tokio::test]
async fn register_rejects_a_mismatched_confirmation() {
    let app = test_app();

    let response = app
        .send(json_request(
            Method::POST,
            "/register/",
            None,
            &json!({
                "name": "Ann",
                "email": "ann@example.com",
                "password": PASSWORD,
                "confirm_password": "different-p4ss!",
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_to_json(response).await;
    assert_eq!(body["error"]["code"], "validation_failed");
    assert!(
        body["error"]["hint"]
            .as_str()
            .expect("hint")
            .starts_with("confirm_password")
    );
}

#[tokio::test]
async fn login_verifies_the_stored_password() {
    let app = test_app();
    register_user(&app, "Ann", "ann@example.com").await;

    let wrong = app
        .send(json_request(
            Method::POST,
            "/login/",
            None,
            &json!({ "email": "ann@example.com", "password": "wrong-pass-1!" }),
        ))
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let body = body_to_json(wrong).await;
    assert_eq!(body["error"]["code"], "invalid_credentials");

    let right = app
        .send(json_request(
            Method::POST,
            "/login/",
            None,
            &json!({ "email": "ann@example.com", "password": PASSWORD }),
        ))
        .await;
    assert_eq!(right.status(), StatusCode::OK);
    let body = body_to_json(right).await;
    assert_eq!(body["user"]["email"], "ann@example.com");
    assert!(body["tokens"]["access"].is_string());
}

#[tokio::test]
async fn unknown_email_and_wrong_password_are_indistinguishable() {
    let app = test_app();
    register_user(&app, "Ann", "ann@example.com").await;

    let unknown = app
        .send(json_request(
            Method::POST,
            "/login/",
            None,
            &json!({ "email": "ghost@example.com", "password": PASSWORD }),
        ))
        .await;
    let wrong = app
        .send(json_request(
            Method::POST,
            "/login/",
            None,
            &json!({ "email": "ann@example.com", "password": "wrong-pass-1!" }),
        ))
        .await;

    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_to_json(unknown).await["error"],
        body_to_json(wrong).await["error"]
    );
}

#[tokio::test]
async fn refresh_accepts_only_refresh_tokens() {
    let app = test_app();
    let (_, access, refresh) = register_user(&app, "Ann", "ann@example.com").await;

    let misused = app
        .send(json_request(
            Method::POST,
            "/refresh/",
            None,
            &json!({ "refresh": access }),
        ))
        .await;
    assert_eq!(misused.status(), StatusCode::UNAUTHORIZED);

    let renewed = app
        .send(json_request(
            Method::POST,
            "/refresh/",
            None,
            &json!({ "refresh": refresh }),
        ))
        .await;
    assert_eq!(renewed.status(), StatusCode::OK);
    let body = body_to_json(renewed).await;
    let new_access = body["access"].as_str().expect("new access token");

    let profile = app.send(get_request("/profile/", Some(new_access))).await;
    assert_eq!(profile.status(), StatusCode::OK);
}

// ============ Profile ============

#[tokio::test]
async fn profile_requires_a_bearer_token() {
    let app = test_app();
    register_user(&app, "Ann", "ann@example.com").await;

    let missing = app.send(get_request("/profile/", None)).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body = body_to_json(missing).await;
    assert_eq!(body["error"]["code"], "unauthorized");

    let garbage = app
        .send(get_request("/profile/", Some("not-a-real-token")))
        .await;
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_overlays_cached_counters_per_field() {
    let app = test_app();
    let (_, access, _) = register_user(&app, "Ann", "ann@example.com").await;

    app.cache
        .publish(
            "ann@example.com",
            CachedCounters {
                posts_count: Some(12),
                subscribers_count: None,
                subscriptions_count: Some(3),
            },
        )
        .await;

    let response = app.send(get_request("/profile/", Some(&access))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response).await;
    assert_eq!(body["posts_count"], 12);
    assert_eq!(body["subscriber_count"], 0);
    assert_eq!(body["subscription_count"], 3);
}

#[tokio::test]
async fn profile_serves_persisted_counters_when_the_cache_is_down() {
    let app = test_app();
    let (user_id, access, _) = register_user(&app, "Ann", "ann@example.com").await;

    app.repos
        .apply_counters(
            user_id,
            &CachedCounters {
                posts_count: Some(4),
                subscribers_count: Some(9),
                subscriptions_count: Some(2),
            },
        )
        .await
        .expect("seed persisted counters");
    app.cache.break_connection();

    let response = app.send(get_request("/profile/", Some(&access))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response).await;
    assert_eq!(body["posts_count"], 4);
    assert_eq!(body["subscriber_count"], 9);
    assert_eq!(body["subscription_count"], 2);
}

// ============ Signature upload ============

#[tokio::test]
async fn signature_upload_stores_the_file_and_updates_the_user() {
    let app = test_app();
    let (user_id, access, _) = register_user(&app, "Ann", "ann@example.com").await;

    let response = app
        .send(multipart_request("/sign/", &access, "signature", &tiny_bmp()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_json(response).await;
    assert_eq!(body["signature_path"], "signatures/user_1.bmp");

    assert!(app.media.exists("signatures/user_1.bmp").await.expect("exists"));
    let user = app.repos.user(user_id).await;
    assert_eq!(user.signature_path.as_deref(), Some("signatures/user_1.bmp"));
}

#[tokio::test]
async fn signature_upload_accepts_the_legacy_field_name() {
    let app = test_app();
    let (_, access, _) = register_user(&app, "Ann", "ann@example.com").await;

    let response = app
        .send(multipart_request("/sign/", &access, "signFile", &tiny_bmp()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn signature_upload_discards_the_stale_rendered_summary() {
    let app = test_app();
    let (_, access, _) = register_user(&app, "Ann", "ann@example.com").await;

    app.media
        .persist_atomic("pdfs/user_1.pdf", b"stale".to_vec())
        .await
        .expect("seed stale pdf");

    let response = app
        .send(multipart_request("/sign/", &access, "signature", &tiny_bmp()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    assert!(!app.media.exists("pdfs/user_1.pdf").await.expect("exists"));
}

#[tokio::test]
async fn signature_upload_rejects_payloads_that_are_not_images() {
    let app = test_app();
    let (_, access, _) = register_user(&app, "Ann", "ann@example.com").await;

    let response = app
        .send(multipart_request(
            "/sign/",
            &access,
            "signature",
            b"definitely not pixels",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response).await;
    assert_eq!(body["error"]["code"], "upload_error");
}

#[tokio::test]
async fn signature_upload_requires_the_file_field() {
    let app = test_app();
    let (_, access, _) = register_user(&app, "Ann", "ann@example.com").await;

    let response = app
        .send(multipart_request("/sign/", &access, "avatar", &tiny_bmp()))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(response).await;
    assert_eq!(body["error"]["message"], "missing signature file");
}

// ============ PDF workflow ============

#[tokio::test]
async fn pdf_task_lifecycle_reaches_completed() {
    let app = test_app();
    let (user_id, access, _) = register_user(&app, "Ann", "ann@example.com").await;
    app.send(multipart_request("/sign/", &access, "signature", &tiny_bmp()))
        .await;

    let task_id = submit_pdf_task(&app, &access).await;

    let pending = app
        .send(json_request(
            Method::POST,
            "/check_task_status/",
            Some(&access),
            &json!({ "task_id": task_id }),
        ))
        .await;
    assert_eq!(pending.status(), StatusCode::OK);
    let body = body_to_json(pending).await;
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["state"], "Pending");
    assert_eq!(body["task_id"], task_id);

    // Run the render the worker would have performed, then mark the job done.
    let user = app.repos.user(user_id).await;
    app.renderer
        .render_for_user(&user)
        .await
        .expect("render summary");
    app.repos.finish_job(&task_id).await;

    let done = app
        .send(get_request(
            &format!("/check_task_status/{task_id}"),
            Some(&access),
        ))
        .await;
    assert_eq!(done.status(), StatusCode::OK);
    let body = body_to_json(done).await;
    assert_eq!(body["status"], "completed");
    assert!(
        body["path"]
            .as_str()
            .expect("path")
            .ends_with("pdfs/user_1.pdf")
    );
}

#[tokio::test]
async fn resubmitting_while_queued_returns_the_same_task() {
    let app = test_app();
    let (_, access, _) = register_user(&app, "Ann", "ann@example.com").await;
    app.send(multipart_request("/sign/", &access, "signature", &tiny_bmp()))
        .await;

    let first = submit_pdf_task(&app, &access).await;

    let second = app
        .send(json_request(
            Method::POST,
            "/start_pdf_task/",
            Some(&access),
            &json!({}),
        ))
        .await;
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let body = body_to_json(second).await;
    assert_eq!(body["status"], "already_queued");
    assert_eq!(body["task_id"], first);
}

#[tokio::test]
async fn submitting_after_completion_reports_the_existing_file() {
    let app = test_app();
    let (user_id, access, _) = register_user(&app, "Ann", "ann@example.com").await;
    app.send(multipart_request("/sign/", &access, "signature", &tiny_bmp()))
        .await;

    let task_id = submit_pdf_task(&app, &access).await;
    let user = app.repos.user(user_id).await;
    app.renderer
        .render_for_user(&user)
        .await
        .expect("render summary");
    app.repos.finish_job(&task_id).await;

    // Without a prior task id the existing file short-circuits the queue.
    let bare = app
        .send(json_request(
            Method::POST,
            "/start_pdf_task/",
            Some(&access),
            &json!({}),
        ))
        .await;
    assert_eq!(bare.status(), StatusCode::OK);
    let body = body_to_json(bare).await;
    assert_eq!(body["status"], "ready");

    // With the prior task id the submission degrades into a poll.
    let polled = app
        .send(json_request(
            Method::POST,
            "/start_pdf_task/",
            Some(&access),
            &json!({ "task_id": task_id }),
        ))
        .await;
    assert_eq!(polled.status(), StatusCode::OK);
    let body = body_to_json(polled).await;
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn stale_output_triggers_a_replacement_task() {
    let app = test_app();
    let (user_id, access, _) = register_user(&app, "Ann", "ann@example.com").await;
    app.send(multipart_request("/sign/", &access, "signature", &tiny_bmp()))
        .await;

    let task_id = submit_pdf_task(&app, &access).await;
    let user = app.repos.user(user_id).await;
    app.renderer
        .render_for_user(&user)
        .await
        .expect("render summary");
    app.repos.finish_job(&task_id).await;

    // The user record moves on after the render completed.
    app.repos.rename_user(user_id, "Ann Prime").await;

    let response = app
        .send(json_request(
            Method::POST,
            "/check_task_status/",
            Some(&access),
            &json!({ "task_id": task_id }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response).await;
    assert_eq!(body["status"], "retrying");
    assert_eq!(body["attempt"], 1);
    let replacement = body["task_id"].as_str().expect("replacement id").to_string();
    assert_ne!(replacement, task_id);

    let job = app.repos.job(&replacement).await;
    assert_eq!(
        job.payload["origin_job_id"].as_str(),
        Some(task_id.as_str())
    );

    // Polling the original again hands back the queued replacement without
    // spending another attempt.
    let repeat = app
        .send(json_request(
            Method::POST,
            "/check_task_status/",
            Some(&access),
            &json!({ "task_id": task_id }),
        ))
        .await;
    let body = body_to_json(repeat).await;
    assert_eq!(body["status"], "retrying");
    assert_eq!(body["task_id"], replacement);
    let counter = app
        .repos
        .find_counter(&task_id)
        .await
        .expect("counter")
        .expect("recorded");
    assert_eq!(counter.attempts, 1);
}

#[tokio::test]
async fn retry_budget_is_spent_after_five_replacements() {
    let app = test_app();
    let (_, access, _) = register_user(&app, "Ann", "ann@example.com").await;
    app.send(multipart_request("/sign/", &access, "signature", &tiny_bmp()))
        .await;

    let mut current = submit_pdf_task(&app, &access).await;

    for attempt in 1..=5 {
        app.repos.fail_job(&current, "render exploded").await;
        let response = app
            .send(json_request(
                Method::POST,
                "/check_task_status/",
                Some(&access),
                &json!({ "task_id": current }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_to_json(response).await;
        assert_eq!(body["status"], "retrying", "attempt {attempt}");
        assert_eq!(body["attempt"], attempt);
        let next = body["task_id"].as_str().expect("task id").to_string();
        assert_ne!(next, current);
        current = next;
    }

    app.repos.fail_job(&current, "render exploded").await;
    let response = app
        .send(json_request(
            Method::POST,
            "/check_task_status/",
            Some(&access),
            &json!({ "task_id": current }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["attempts"], 5);
    assert!(
        body["detail"]
            .as_str()
            .expect("detail")
            .contains("render exploded")
    );

    // The chain stays exhausted on later polls.
    let again = app
        .send(json_request(
            Method::POST,
            "/check_task_status/",
            Some(&access),
            &json!({ "task_id": current }),
        ))
        .await;
    let body = body_to_json(again).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["attempts"], 5);
}

#[tokio::test]
async fn checking_an_unknown_task_is_a_not_found() {
    let app = test_app();
    let (_, access, _) = register_user(&app, "Ann", "ann@example.com").await;

    let response = app
        .send(json_request(
            Method::POST,
            "/check_task_status/",
            Some(&access),
            &json!({ "task_id": "no-such-task" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_to_json(response).await;
    assert_eq!(body["error"]["code"], "jobs_error");
}

#[tokio::test]
async fn pdf_endpoints_require_authentication() {
    let app = test_app();

    let submit = app
        .send(json_request(Method::POST, "/start_pdf_task/", None, &json!({})))
        .await;
    assert_eq!(submit.status(), StatusCode::UNAUTHORIZED);

    let check = app
        .send(json_request(
            Method::POST,
            "/check_task_status/",
            None,
            &json!({ "task_id": "x" }),
        ))
        .await;
    assert_eq!(check.status(), StatusCode::UNAUTHORIZED);
}

// ============ Health ============

#[tokio::test]
async fn healthz_answers_without_authentication() {
    let app = test_app();
    let response = app.send(get_request("/healthz", None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
