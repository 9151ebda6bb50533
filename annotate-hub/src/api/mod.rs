//! HTTP API layer exposing the sharing operations.

mod error;

use annotate_hub_core::auth::TokenVerifier;
use annotate_hub_core::events::EventBus;
use annotate_hub_core::files::Download;
use annotate_hub_core::invite::{InviteOutcome, PendingInvitation};
use annotate_hub_core::model::{
    AnnotationSnapshot, Document, FilePage, Identity, LinkGrant, SharedUser, ShareLink, SortOrder,
};
use annotate_hub_core::roles::{RoleChange, RoleChangeOutcome};
use annotate_hub_core::{resolve_role, AccessService, Role};
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{
        sse::{self, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

pub use error::{ApiError, ApiResult};

/// Authenticated caller, resolved to a registered identity.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub identity: Identity,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let mut identity_id = None;
        if let Some(auth) = headers.get("Authorization").and_then(|v| v.to_str().ok()) {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                if let Some(claims) = state.verifier.verify(token).await {
                    identity_id = claims.identity_id();
                }
            }
        }
        if identity_id.is_none() && state.trust_user_header {
            identity_id = headers
                .get("X-User-Id")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok());
        }
        let id = identity_id.ok_or_else(ApiError::unauthorized)?;
        let identity = state
            .service
            .get_identity(id)
            .await
            .map_err(|_| ApiError::unauthorized())?;
        Ok(Self { identity })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: AccessService,
    pub events: EventBus,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Fall back to `X-User-Id` when no bearer token is present.
    pub trust_user_header: bool,
}

/// Document as returned to a caller. Ownership and membership details are
/// only included for the owner.
#[derive(Serialize)]
struct DocumentView {
    id: Uuid,
    name: String,
    owner_email: String,
    role: Role,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    viewers: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    editors: Option<BTreeSet<String>>,
}

impl DocumentView {
    fn for_caller(doc: Document, caller: &Identity) -> Self {
        let is_owner = doc.owner_id == caller.id;
        let role = if is_owner {
            Role::Owner
        } else {
            resolve_role(&doc, &caller.email)
        };
        Self {
            id: doc.id,
            name: doc.name,
            owner_email: doc.owner_email,
            role,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            owner_id: is_owner.then_some(doc.owner_id),
            viewers: is_owner.then_some(doc.viewers),
            editors: is_owner.then_some(doc.editors),
        }
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct UploadRequest {
    name: String,
    /// Base64 encoded file bytes.
    content: String,
}

#[derive(Deserialize)]
struct RenameRequest {
    name: String,
}

#[derive(Deserialize, Default)]
struct ListParams {
    page: Option<u32>,
    sort: Option<SortOrder>,
}

#[derive(Deserialize)]
struct InviteRequest {
    emails: Vec<String>,
    role: String,
}

#[derive(Deserialize)]
struct RoleRequest {
    email: String,
    role: String,
}

#[derive(Deserialize)]
struct BatchRoleRequest {
    changes: Vec<RoleChange>,
}

#[derive(Deserialize)]
struct LinkRequest {
    role: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

#[derive(Serialize)]
struct ToggleResponse {
    enabled: bool,
    links: usize,
}

#[derive(Serialize)]
struct RoleResponse {
    role: Role,
}

#[derive(Deserialize)]
struct AnnotationWrite {
    payload: String,
    expected_version: u64,
}

#[derive(Serialize)]
struct VersionResponse {
    version: u64,
}

pub fn router(service: AccessService, events: EventBus, verifier: Arc<dyn TokenVerifier>) -> Router {
    let trust_user_header = service.context().config.trust_user_header;
    let state = AppState {
        service,
        events,
        verifier,
        trust_user_header,
    };
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/identities", post(register))
        .route("/me", get(me))
        .route("/events", get(event_stream))
        .route("/docs", get(list_files).post(create_doc))
        .route("/docs/{id}", get(get_doc).delete(delete_doc))
        .route("/docs/{id}/rename", put(rename_doc))
        .route("/docs/{id}/content", get(download))
        .route("/docs/{id}/role", get(my_role))
        .route("/docs/{id}/users", get(list_users))
        .route("/docs/{id}/roles", put(change_role))
        .route("/docs/{id}/roles/batch", post(change_roles))
        .route(
            "/docs/{id}/invitations",
            get(list_invitations).post(invite),
        )
        .route("/invitations/{token}/redeem", post(redeem))
        .route("/docs/{id}/links", get(list_links).post(create_link))
        .route("/docs/{id}/links/enabled", put(toggle_links))
        .route("/links/{id}", delete(delete_link))
        .route("/shared/{token}", get(resolve_token))
        .route("/shared/{token}/content", get(download_shared))
        .route(
            "/docs/{id}/annotations",
            get(read_annotations).put(write_annotations),
        )
        .layer(middleware)
        .with_state(state)
}

fn parse_role(raw: &str) -> ApiResult<Role> {
    Ok(raw.parse::<Role>()?)
}

fn file_response(download: Download) -> Response {
    let filename: String = download
        .name
        .chars()
        .filter(|c| *c != '"' && !c.is_control())
        .collect();
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        download.bytes,
    )
        .into_response()
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Identity>)> {
    let identity = state
        .service
        .register_identity(&req.email, req.display_name)
        .await?;
    Ok((StatusCode::CREATED, Json(identity)))
}

async fn me(auth: AuthContext) -> Json<Identity> {
    Json(auth.identity)
}

/// Server-sent stream of the notifications addressed to the caller.
async fn event_stream(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let rx = state.events.subscribe();
    let email = auth.identity.email;
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(move |res| {
        let email = email.clone();
        async move {
            match res {
                Ok(notification) if notification.email() == email => sse::Event::default()
                    .json_data(&notification)
                    .ok()
                    .map(Ok),
                _ => None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn create_doc(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UploadRequest>,
) -> ApiResult<(StatusCode, Json<DocumentView>)> {
    let bytes = STANDARD
        .decode(req.content.as_bytes())
        .map_err(|_| ApiError::bad_request("content must be base64"))?;
    let doc = state
        .service
        .files
        .create_document(&auth.identity, &req.name, &bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(DocumentView::for_caller(doc, &auth.identity))))
}

async fn list_files(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<FilePage>> {
    let page = state
        .service
        .files
        .list_files(
            &auth.identity,
            params.page.unwrap_or(1),
            params.sort.unwrap_or_default(),
        )
        .await?;
    Ok(Json(page))
}

async fn get_doc(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentView>> {
    let doc = state.service.files.get_document(id, &auth.identity).await?;
    Ok(Json(DocumentView::for_caller(doc, &auth.identity)))
}

async fn delete_doc(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.service.files.delete_document(id, &auth.identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rename_doc(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<DocumentView>> {
    let doc = state
        .service
        .files
        .rename_document(id, &auth.identity, &req.name)
        .await?;
    Ok(Json(DocumentView::for_caller(doc, &auth.identity)))
}

async fn download(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let download = state.service.files.download(id, &auth.identity).await?;
    Ok(file_response(download))
}

async fn my_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RoleResponse>> {
    let role = state.service.resolve_role(id, &auth.identity).await?;
    Ok(Json(RoleResponse { role }))
}

async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<SharedUser>>> {
    Ok(Json(state.service.files.list_users(id, &auth.identity).await?))
}

async fn change_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<RoleRequest>,
) -> ApiResult<Json<DocumentView>> {
    let role = parse_role(&req.role)?;
    let doc = state
        .service
        .roles
        .change_role(id, &auth.identity, &req.email, role)
        .await?;
    Ok(Json(DocumentView::for_caller(doc, &auth.identity)))
}

async fn change_roles(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<BatchRoleRequest>,
) -> ApiResult<Json<Vec<RoleChangeOutcome>>> {
    Ok(Json(
        state
            .service
            .roles
            .change_roles(id, &auth.identity, &req.changes)
            .await?,
    ))
}

async fn invite(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<InviteRequest>,
) -> ApiResult<Json<Vec<InviteOutcome>>> {
    let role = parse_role(&req.role)?;
    Ok(Json(
        state
            .service
            .invites
            .invite(id, &auth.identity, &req.emails, role)
            .await?,
    ))
}

async fn list_invitations(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PendingInvitation>>> {
    Ok(Json(
        state
            .service
            .invites
            .list_invitations(id, &auth.identity)
            .await?,
    ))
}

async fn redeem(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(token): Path<String>,
) -> ApiResult<Json<DocumentView>> {
    let doc = state
        .service
        .invites
        .redeem_invitation(&token, &auth.identity)
        .await?;
    Ok(Json(DocumentView::for_caller(doc, &auth.identity)))
}

async fn list_links(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ShareLink>>> {
    Ok(Json(state.service.links.list_links(id, &auth.identity).await?))
}

async fn create_link(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<LinkRequest>,
) -> ApiResult<Json<ShareLink>> {
    let role = parse_role(&req.role)?;
    Ok(Json(
        state
            .service
            .links
            .create_or_get_link(id, &auth.identity, role, req.expires_at)
            .await?,
    ))
}

async fn toggle_links(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<Json<ToggleResponse>> {
    let links = state
        .service
        .links
        .toggle_feature(id, &auth.identity, req.enabled)
        .await?;
    Ok(Json(ToggleResponse {
        enabled: req.enabled,
        links,
    }))
}

async fn delete_link(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.service.links.delete_link(id, &auth.identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resolve_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<LinkGrant>> {
    Ok(Json(state.service.links.resolve_by_token(&token).await?))
}

async fn download_shared(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let download = state.service.files.download_via_link(&token).await?;
    Ok(file_response(download))
}

async fn read_annotations(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AnnotationSnapshot>> {
    Ok(Json(state.service.annotations.read(id, &auth.identity).await?))
}

async fn write_annotations(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AnnotationWrite>,
) -> ApiResult<Json<VersionResponse>> {
    let version = state
        .service
        .annotations
        .write(id, &auth.identity, &req.payload, req.expected_version)
        .await?;
    Ok(Json(VersionResponse { version }))
}
