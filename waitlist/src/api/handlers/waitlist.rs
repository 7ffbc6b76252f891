use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::HeaderMap,
    response::{Html, Redirect},
};
use url::Url;

use crate::{
    AppState,
    api::models::waitlist::{ConfirmQuery, ResendRequest, ResendResponse, SignupRequest, SignupResponse, StatusQuery},
    config::Config,
    errors::{Error, ErrorResponse},
    service::{ConfirmStatus, RequestMetadata, WaitlistService},
};

/// Client address and user agent as reported by the proxy in front of us
fn request_metadata(headers: &HeaderMap) -> RequestMetadata {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let ip = header("x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .or_else(|| header("x-real-ip"))
        .map(str::to_string);

    RequestMetadata {
        ip,
        user_agent: header("user-agent").map(str::to_string),
    }
}

/// Status page URL with the outcome appended to its query
fn status_redirect(config: &Config, status: ConfirmStatus) -> String {
    let page = config.status_page_url();
    match Url::parse(&page) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("status", status.as_str());
            url.to_string()
        }
        Err(_) => format!("{page}?status={status}"),
    }
}

/// Join the waitlist
///
/// Stores (or replaces) a pending signup and emails a confirmation link. Signing up again
/// with an address that is already confirmed changes nothing.
#[utoipa::path(
    post,
    path = "/waitlist",
    request_body = SignupRequest,
    tag = "waitlist",
    responses(
        (status = 200, description = "Signup stored", body = SignupResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 500, description = "Server error", body = ErrorResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<Json<SignupResponse>, Error> {
    let Json(request) = payload.map_err(|e| Error::validation(format!("Invalid request body: {}", e.body_text())))?;
    let form = request.validate(&state.config.waitlist)?;

    let outcome = WaitlistService::new(&state.db, &state.config, &state.mailer)
        .signup(form, request_metadata(&headers))
        .await?;

    Ok(Json(SignupResponse {
        ok: true,
        stored: outcome.stored,
        email_sent: outcome.email_sent,
    }))
}

/// Confirm an email address
///
/// Target of the link in the confirmation email. Always redirects to the status page with
/// `status` set to `ok`, `expired`, `invalid` or `server_error`.
#[utoipa::path(
    get,
    path = "/confirm",
    params(ConfirmQuery),
    tag = "waitlist",
    responses(
        (status = 303, description = "Redirect to the confirmation status page"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn confirm(State(state): State<AppState>, query: Result<Query<ConfirmQuery>, QueryRejection>) -> Redirect {
    let token = query.ok().and_then(|Query(query)| query.token);

    let status = WaitlistService::new(&state.db, &state.config, &state.mailer)
        .confirm(token.as_deref())
        .await;

    Redirect::to(&status_redirect(&state.config, status))
}

/// Resend the confirmation email
///
/// Issues a fresh link to an address that signed up but hasn't confirmed yet. The response
/// is the same whether or not the address is known, pending or confirmed.
#[utoipa::path(
    post,
    path = "/waitlist/resend",
    request_body = ResendRequest,
    tag = "waitlist",
    responses(
        (status = 200, description = "Request accepted", body = ResendResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn resend(State(state): State<AppState>, payload: Result<Json<ResendRequest>, JsonRejection>) -> Json<ResendResponse> {
    let email = payload.ok().and_then(|Json(request)| request.email);

    WaitlistService::new(&state.db, &state.config, &state.mailer)
        .resend(email.as_deref())
        .await;

    Json(ResendResponse { ok: true })
}

/// Confirmation status page
#[utoipa::path(
    get,
    path = "/confirmed",
    params(StatusQuery),
    tag = "waitlist",
    responses(
        (status = 200, description = "HTML page describing the confirmation outcome", body = String, content_type = "text/html"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn status_page(State(state): State<AppState>, query: Result<Query<StatusQuery>, QueryRejection>) -> Html<String> {
    let status = query.map(|Query(query)| query.status()).unwrap_or(ConfirmStatus::Invalid);
    Html(render_status_page(&state.config, status))
}

fn render_status_page(config: &Config, status: ConfirmStatus) -> String {
    let (title, message) = match status {
        ConfirmStatus::Ok => ("Confirmed", "Your email is confirmed. You're on the early access list."),
        ConfirmStatus::Expired => ("Link expired", "This confirmation link is invalid or expired. Please sign up again."),
        ConfirmStatus::Invalid => ("Invalid link", "This confirmation link is not valid."),
        ConfirmStatus::ServerError => (
            "Something went wrong",
            "We couldn't confirm your email right now. Please try the link again later.",
        ),
    };
    let product_name = &config.waitlist.product_name;
    let home = config.public_base();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title} - {product_name}</title>
</head>
<body style="font-family:system-ui,Segoe UI,Arial,sans-serif;line-height:1.5;max-width:560px;margin:64px auto;padding:0 16px">
    <h1>{title}</h1>
    <p>{message}</p>
    <p><a href="{home}">Back to {product_name}</a></p>
</body>
</html>"#
    )
}
