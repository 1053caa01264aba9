//! GitHub contributors shown on the landing page.

use axum::{extract::State, Json};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::AppError;
use crate::state::AppState;

const CONTRIBUTORS_URL: &str =
    "https://api.github.com/repos/AmruthPillai/Reactive-Resume/contributors";
const MAX_CONTRIBUTORS: usize = 20;

#[derive(Debug, Deserialize)]
pub struct GitHubContributor {
    pub id: u64,
    pub login: String,
    pub html_url: String,
    pub avatar_url: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Contributor {
    pub id: u64,
    pub name: String,
    pub url: String,
    pub avatar: String,
}

pub fn to_contributors(list: Vec<GitHubContributor>) -> Vec<Contributor> {
    list.into_iter()
        .take(MAX_CONTRIBUTORS)
        .map(|c| Contributor {
            id: c.id,
            name: c.login,
            url: c.html_url,
            avatar: c.avatar_url,
        })
        .collect()
}

pub async fn fetch_contributors(http: &reqwest::Client) -> Result<Vec<Contributor>, AppError> {
    let resp = http
        .get(CONTRIBUTORS_URL)
        .header(USER_AGENT, concat!("resume-api/", env!("CARGO_PKG_VERSION")))
        .header(ACCEPT, "application/vnd.github+json")
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("GitHub request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        error!(status = status.as_u16(), "GitHub contributors request failed");
        return Err(AppError::Upstream(format!("GitHub returned {status}")));
    }

    let list: Vec<GitHubContributor> = resp
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("unexpected GitHub response: {e}")))?;
    Ok(to_contributors(list))
}

/// GET /api/contributors/github
pub async fn handle_github_contributors(
    State(state): State<AppState>,
) -> Result<Json<Vec<Contributor>>, AppError> {
    Ok(Json(fetch_contributors(&state.http).await?))
}
