//! Route guards for axum.
//!
//! Each guard is a small state value paired with an async middleware function,
//! mounted with [`axum::middleware::from_fn_with_state`]:
//!
//! ```ignore
//! Router::new()
//!     .route("/admin/roles", get(list_roles))
//!     .route_layer(from_fn_with_state(PermissionGuard::any(&state, ["role:read"]), require_permissions));
//! ```
//!
//! Unauthenticated callers get a 401 JSON body or a redirect to the login page,
//! depending on whether the request expects JSON. Denied callers get a 403 JSON
//! body or an HTML page listing required and held values.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{AppendHeaders, Html, IntoResponse, Redirect, Response};
use axum::Json;
use serde::Serialize;

use crate::app::AppState;
use crate::authz::guard::{authorize_permissions, authorize_roles, authorize_scopes, Decision, Denial, Logic};
use crate::authz::{AuthzMode, Principal};
use crate::errors::AppError;

pub const FLASH_COOKIE: &str = "flash_error";

fn to_strings<I, S>(items: I) -> Arc<[String]>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[derive(Clone)]
pub struct RoleGuard {
    state: AppState,
    roles: Arc<[String]>,
}

impl RoleGuard {
    /// An empty role list admits any authenticated caller.
    pub fn new<I, S>(state: &AppState, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: state.clone(),
            roles: to_strings(roles),
        }
    }
}

#[derive(Clone)]
pub struct PermissionGuard {
    state: AppState,
    permissions: Arc<[String]>,
    logic: Logic,
}

impl PermissionGuard {
    pub fn new<I, S>(state: &AppState, permissions: I, logic: Logic) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: state.clone(),
            permissions: to_strings(permissions),
            logic,
        }
    }

    pub fn any<I, S>(state: &AppState, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(state, permissions, Logic::Or)
    }

    pub fn all<I, S>(state: &AppState, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(state, permissions, Logic::And)
    }
}

#[derive(Clone)]
pub struct ScopeGuard {
    state: AppState,
    scopes: Arc<[String]>,
}

impl ScopeGuard {
    pub fn new<I, S>(state: &AppState, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: state.clone(),
            scopes: to_strings(scopes),
        }
    }
}

pub async fn require_roles(State(guard): State<RoleGuard>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let principal = authenticate(&guard.state, &mut req);

    let decision = match (&principal, guard.state.config.authz_mode) {
        (Some(_), AuthzMode::Off) => Decision::Allowed,
        _ => authorize_roles(principal.as_ref(), &guard.roles, &path),
    };

    finish(&guard.state, decision, principal, req, next, &path).await
}

pub async fn require_permissions(State(guard): State<PermissionGuard>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let principal = authenticate(&guard.state, &mut req);

    let decision = match (&principal, guard.state.config.authz_mode) {
        (Some(_), AuthzMode::Off) => Decision::Allowed,
        _ => {
            authorize_permissions(
                &guard.state.permissions,
                principal.as_ref(),
                &guard.permissions,
                guard.logic,
                &path,
            )
            .await
        }
    };

    finish(&guard.state, decision, principal, req, next, &path).await
}

pub async fn require_scopes(State(guard): State<ScopeGuard>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let principal = authenticate(&guard.state, &mut req);

    let decision = match (&principal, guard.state.config.authz_mode) {
        (Some(_), AuthzMode::Off) => Decision::Allowed,
        _ => authorize_scopes(principal.as_ref(), &guard.scopes, &path),
    };

    finish(&guard.state, decision, principal, req, next, &path).await
}

/// Decode the session and stash both it and the principal in request extensions
/// so handlers and extractors downstream do not decode again.
fn authenticate(state: &AppState, req: &mut Request) -> Option<Principal> {
    if let Some(principal) = req.extensions().get::<Principal>() {
        return Some(principal.clone());
    }

    let claims = state.session(req.headers())?;
    let principal = Principal::from_session(&claims)?;
    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(principal.clone());
    Some(principal)
}

async fn finish(
    state: &AppState,
    decision: Decision,
    principal: Option<Principal>,
    req: Request,
    next: Next,
    path: &str,
) -> Response {
    let subject = principal.as_ref().map(Principal::subject).unwrap_or("anonymous");
    match decision.enforce(state.config.authz_mode, subject, path) {
        Decision::Allowed => next.run(req).await,
        Decision::Unauthenticated => unauthenticated_response(state, req.headers()),
        Decision::Forbidden(denial) => forbidden_response(state, req.headers(), &denial),
    }
}

/// Mirrors the usual "wants JSON" heuristic: an `Accept` header naming JSON, or
/// an XHR marker.
pub fn expects_json(headers: &HeaderMap) -> bool {
    let accepts_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("json"));
    let is_xhr = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    accepts_json || is_xhr
}

fn unauthenticated_response(state: &AppState, headers: &HeaderMap) -> Response {
    if expects_json(headers) {
        return AppError::unauthenticated("Please log in to continue").into_response();
    }

    let flash = format!(
        "{}={}; Path=/; Max-Age=60; HttpOnly; SameSite=Lax",
        FLASH_COOKIE,
        urlencoding::encode("Please log in to continue")
    );
    (
        AppendHeaders([(header::SET_COOKIE, flash)]),
        Redirect::to(&state.config.login_path),
    )
        .into_response()
}

#[derive(Serialize)]
struct ForbiddenBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    held: Option<&'a [String]>,
}

fn forbidden_response(state: &AppState, headers: &HeaderMap, denial: &Denial) -> Response {
    let message = format!("Insufficient {} privileges", denial.guard.as_str());
    // Diagnostic detail is withheld in production.
    let expose = !state.config.production;

    if expects_json(headers) {
        let body = ForbiddenBody {
            error: "forbidden",
            message,
            required: expose.then_some(denial.required.as_slice()),
            held: expose.then_some(denial.held.as_slice()),
        };
        return (StatusCode::FORBIDDEN, Json(body)).into_response();
    }

    (StatusCode::FORBIDDEN, Html(forbidden_page(&message, denial, expose))).into_response()
}

fn forbidden_page(message: &str, denial: &Denial, expose: bool) -> String {
    let mut page = format!(
        "<!doctype html><html><head><title>403 Forbidden</title></head><body><h1>403 Forbidden</h1><p>{}</p>",
        escape_html(message)
    );
    if expose {
        let label = denial.guard.as_str();
        page.push_str(&format!("<h2>Required {label}s</h2>{}", html_list(&denial.required)));
        page.push_str(&format!("<h2>Your {label}s</h2>{}", html_list(&denial.held)));
    }
    page.push_str("</body></html>");
    page
}

fn html_list(items: &[String]) -> String {
    if items.is_empty() {
        return "<p><em>none</em></p>".to_string();
    }
    let entries: String = items
        .iter()
        .map(|item| format!("<li>{}</li>", escape_html(item)))
        .collect();
    format!("<ul>{entries}</ul>")
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    use crate::authz::GuardKind;

    #[test]
    fn detects_json_preference() {
        let mut headers = HeaderMap::new();
        assert!(!expects_json(&headers));

        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(expects_json(&headers));

        let mut headers = HeaderMap::new();
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        assert!(expects_json(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        assert!(!expects_json(&headers));
    }

    #[test]
    fn forbidden_page_escapes_and_hides_details() {
        let denial = Denial {
            guard: GuardKind::Role,
            required: vec!["admin".into()],
            held: vec!["<script>".into()],
        };

        let page = forbidden_page("Insufficient role privileges", &denial, true);
        assert!(page.contains("<li>admin</li>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));

        let page = forbidden_page("Insufficient role privileges", &denial, false);
        assert!(!page.contains("admin"));
    }
}
