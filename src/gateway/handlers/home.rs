use axum::{
    extract::{Query, rejection::QueryRejection},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

use crate::gateway::session::{CurrentSession, UserSession};

#[derive(Debug, Default, Deserialize)]
pub struct HomeQuery {
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HomeView<'a> {
    authenticated: bool,
    user: Option<&'a UserSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// axum handler for the landing page, no auth required
pub async fn home(
    session: CurrentSession,
    query: Result<Query<HomeQuery>, QueryRejection>,
) -> impl IntoResponse {
    let error = query.ok().and_then(|Query(q)| q.error);

    Json(HomeView {
        authenticated: session.user().is_some(),
        user: session.user(),
        error,
    })
    .into_response()
}
