//! OAuth redirect endpoint.
//!
//! Validates the redirect parameters, hands `state` + `code` to the engine and
//! renders the outcome as a small HTML page. Rejections that are the user's
//! own business (not following the channel) are 200; everything else maps to
//! an error status.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use ttg_core::{engine::LinkOutcome, errors::Error as CoreError, formatting::escape_html};

use crate::CallbackState;

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    /// Set by the provider when the user declined authorization.
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("too many requests")]
    RateLimited,

    #[error("authorization declined: {0}")]
    Declined(String),

    #[error("missing or malformed state")]
    InvalidState,

    #[error("missing authorization code")]
    MissingCode,

    #[error(transparent)]
    Engine(#[from] CoreError),
}

impl CallbackError {
    fn status(&self) -> StatusCode {
        match self {
            CallbackError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            CallbackError::Declined(_) | CallbackError::InvalidState | CallbackError::MissingCode => {
                StatusCode::BAD_REQUEST
            }
            CallbackError::Engine(e) => match e {
                CoreError::SessionExpired => StatusCode::BAD_REQUEST,
                CoreError::AlreadyLinked(_) => StatusCode::CONFLICT,
                e if e.is_upstream() => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> &'static str {
        match self {
            CallbackError::RateLimited => "Too many requests. Please wait a moment and try again.",
            CallbackError::Declined(_) => {
                "Authorization was cancelled. Request a new link with /getlink to try again."
            }
            CallbackError::InvalidState | CallbackError::MissingCode => {
                "This link is invalid. Request a new one with /getlink."
            }
            CallbackError::Engine(e) => match e {
                CoreError::SessionExpired => {
                    "This link has expired. Request a new one with /getlink."
                }
                CoreError::AlreadyLinked(_) => {
                    "This Telegram or Twitch account is already linked."
                }
                CoreError::PermissionChangeFailed { .. } => {
                    "Your account was linked, but updating your rights in the group failed. Please contact the group owner."
                }
                e if e.is_upstream() => "Twitch could not be reached. Please try again later.",
                _ => "Something went wrong. Please try again later.",
            },
        }
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, page("Link failed", self.message())).into_response()
    }
}

pub async fn callback_handler(
    State(state): State<CallbackState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<CallbackParams>,
) -> Result<(StatusCode, Html<String>), CallbackError> {
    if !state.allow(peer.ip()).await {
        warn!(peer = %peer.ip(), "callback rate limited");
        return Err(CallbackError::RateLimited);
    }

    if let Some(reason) = params.error {
        info!(reason = %reason, "authorization declined by user");
        return Err(CallbackError::Declined(reason));
    }

    let token = params
        .state
        .filter(|s| Uuid::parse_str(s).is_ok())
        .ok_or(CallbackError::InvalidState)?;
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(CallbackError::MissingCode)?;

    let outcome = state
        .engine()
        .complete_link(&token, &code)
        .await
        .map_err(|e| {
            match &e {
                CoreError::SessionExpired | CoreError::AlreadyLinked(_) => {
                    info!(error = %e, "link rejected")
                }
                _ => error!(error = %e, "link completion failed"),
            }
            CallbackError::Engine(e)
        })?;

    let body = match outcome {
        LinkOutcome::Linked { display_name } => page(
            "Linked",
            &format!(
                "Hello, {}! Your Twitch account is linked and you can now post in the group.",
                escape_html(&display_name)
            ),
        ),
        LinkOutcome::NotFollower { display_name } => page(
            "Not a follower",
            &format!(
                "{}, you do not follow the channel yet. Follow it on Twitch, then request a new link with /getlink.",
                escape_html(&display_name)
            ),
        ),
    };
    Ok((StatusCode::OK, body))
}

fn page(title: &str, message: &str) -> Html<String> {
    Html(format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
<body><h1>{title}</h1><p>{message}</p></body></html>",
        title = escape_html(title),
    ))
}
