//! HTTP endpoint handlers.
//!
//! Query-driven endpoints either send synchronously (`/emails/send`,
//! `/discord/roles/user`) or dispatch their work to a spawned task and
//! acknowledge straight away. Trigger webhooks run their handler inline and
//! answer with its outcome.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::notify::{
    direct_email, enqueue_cohort_emails, load_nft_recipients, on_cohort_signup,
    on_discord_connect, prepare_role_sweep, NftDelivery, RoleSweep, UserChange,
};
use crate::queue::EmailQueue;
use crate::services::{EmailSender, RoleError, RoleGrantor};
use crate::store::Repository;
use crate::web::signature::{
    is_signature_verification_enabled, verify_trigger_signature, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Repository,
    pub email: Arc<dyn EmailSender>,
    pub roles: Arc<dyn RoleGrantor>,
    pub queue: Arc<dyn EmailQueue>,
}

impl AppState {
    pub fn new(
        config: Config,
        repo: Repository,
        email: Arc<dyn EmailSender>,
        roles: Arc<dyn RoleGrantor>,
        queue: Arc<dyn EmailQueue>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            repo,
            email,
            roles,
            queue,
        }
    }
}

fn missing_params(names: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        format!("missing query parameters: {}", names),
    )
        .into_response()
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Direct Sends
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SendEmailQuery {
    pub template: Option<String>,
    pub subject: Option<String>,
    pub to: Option<String>,
}

/// Send one templated email and return the provider receipt.
pub async fn send_email(
    State(state): State<AppState>,
    Query(query): Query<SendEmailQuery>,
) -> Response {
    let (Some(template), Some(to)) = (present(&query.template), present(&query.to)) else {
        return missing_params("template, to");
    };

    let email = direct_email(template, query.subject.as_deref(), to);
    info!(to = %email.to, template = %email.template, "direct_email_requested");

    match state.email.send(&email).await {
        Ok(receipt) => {
            info!(to = %email.to, id = ?receipt.id, "direct_email_sent");
            Json(receipt).into_response()
        }
        Err(e) => {
            error!(to = %email.to, error = %e, "direct_email_failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Email every NFT holder from the recipients file.
pub async fn send_nft_emails(State(state): State<AppState>) -> Response {
    let recipients = match load_nft_recipients(&state.config.nft_recipients_path).await {
        Ok(recipients) => recipients,
        Err(e) => {
            error!(error = %e, "nft_recipients_load_failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "error").into_response();
        }
    };

    let emails = NftDelivery::from_config(&state.config).emails(&recipients);
    info!(recipients = emails.len(), "nft_delivery_dispatching");

    for email in emails {
        let sender = state.email.clone();
        tokio::spawn(async move {
            match sender.send(&email).await {
                Ok(_) => info!(to = %email.to, nft_id = %email.params["nft_id"], "nft_email_sent"),
                Err(e) => error!(to = %email.to, error = %e, "nft_email_failed"),
            }
        });
    }

    Json(json!({ "ok": 200 })).into_response()
}

// =============================================================================
// Cohort Emails
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CohortEmailQuery {
    pub cohort_id: Option<String>,
    pub template: Option<String>,
}

/// Enqueue a template email for every user in a cohort.
///
/// Answers `OK` as soon as the scan is dispatched.
pub async fn send_cohort_emails(
    State(state): State<AppState>,
    Query(query): Query<CohortEmailQuery>,
) -> Response {
    let (Some(cohort_id), Some(template)) = (present(&query.cohort_id), present(&query.template))
    else {
        return missing_params("cohort_id, template");
    };

    let cohort_id = cohort_id.to_string();
    let template = template.to_string();
    let repo = state.repo.clone();
    let queue = state.queue.clone();

    tokio::spawn(async move {
        match enqueue_cohort_emails(&repo, queue.as_ref(), &cohort_id, &template).await {
            Ok(summary) => info!(
                cohort_id = %cohort_id,
                matched = summary.matched,
                dispatched = summary.dispatched,
                failed = summary.failed,
                "bulk_email_dispatch_complete"
            ),
            Err(e) => error!(cohort_id = %cohort_id, error = %e, "bulk_email_dispatch_failed"),
        }
    });

    "OK".into_response()
}

// =============================================================================
// Discord Roles
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct UserRoleQuery {
    pub user_id: Option<String>,
    pub role_id: Option<String>,
}

/// Grant one role to one Discord account.
pub async fn add_user_to_role(
    State(state): State<AppState>,
    Query(query): Query<UserRoleQuery>,
) -> Response {
    let (Some(user_id), Some(role_id)) = (present(&query.user_id), present(&query.role_id)) else {
        return missing_params("user_id, role_id");
    };

    match state.roles.grant_role(Some(user_id), role_id).await {
        Ok(grant) => {
            info!(user_id = user_id, role_id = role_id, result = ?grant, "user_role_granted");
            "OK".into_response()
        }
        Err(e @ RoleError::InvalidId { .. }) => {
            warn!(user_id = user_id, role_id = role_id, error = %e, "user_role_rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            error!(user_id = user_id, role_id = role_id, error = %e, "user_role_failed");
            (StatusCode::BAD_GATEWAY, "error").into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CohortRoleQuery {
    pub cohort_id: Option<String>,
}

/// Grant a cohort's role to every user whose first enrollment is that cohort.
pub async fn grant_cohort_roles(
    State(state): State<AppState>,
    Query(query): Query<CohortRoleQuery>,
) -> Response {
    let Some(cohort_id) = present(&query.cohort_id) else {
        return missing_params("cohort_id");
    };

    let sweep = match prepare_role_sweep(&state.repo, cohort_id).await {
        Ok(sweep) => sweep,
        Err(e) => {
            error!(cohort_id = cohort_id, error = %e, "role_sweep_store_failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "error").into_response();
        }
    };

    let text = sweep.response_text();

    if let RoleSweep::Ready(plan) = sweep {
        let roles = state.roles.clone();
        tokio::spawn(async move {
            plan.execute(roles.as_ref()).await;
        });
    }

    text.into_response()
}

// =============================================================================
// User Update Triggers
// =============================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Check the trigger signature and parse the change.
fn accept_trigger(
    config: &Config,
    headers: &HeaderMap,
    body: &[u8],
    trigger: &'static str,
) -> Result<UserChange, Response> {
    if is_signature_verification_enabled(&config.trigger_signing_key) {
        let signing_key = config.trigger_signing_key.as_deref().unwrap_or_default();

        if !verify_trigger_signature(
            signing_key,
            header_str(headers, TIMESTAMP_HEADER),
            body,
            header_str(headers, SIGNATURE_HEADER),
            config.trigger_signature_max_age,
        ) {
            warn!(trigger = trigger, "trigger_signature_invalid");
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "status": "unauthorized" })),
            )
                .into_response());
        }
    }

    serde_json::from_slice(body).map_err(|e| {
        warn!(trigger = trigger, error = %e, "trigger_payload_invalid");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "invalid_payload", "message": e.to_string() })),
        )
            .into_response()
    })
}

/// User document updated: notify about newly joined cohorts.
pub async fn cohort_signup_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let change = match accept_trigger(&state.config, &headers, &body, "on_cohort_signup") {
        Ok(change) => change,
        Err(response) => return response,
    };

    let outcome = on_cohort_signup(
        &state.repo,
        state.email.as_ref(),
        state.roles.as_ref(),
        &change,
    )
    .await;

    Json(outcome).into_response()
}

/// User document updated: grant roles to a newly linked Discord account.
pub async fn discord_connect_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let change = match accept_trigger(&state.config, &headers, &body, "on_discord_connect") {
        Ok(change) => change,
        Err(response) => return response,
    };

    let outcome = on_discord_connect(&state.repo, state.roles.as_ref(), &change).await;

    Json(outcome).into_response()
}
