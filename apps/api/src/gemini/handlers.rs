use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::billing::subscriptions::ActiveSubscription;
use crate::errors::AppError;
use crate::gemini::prompts::{change_tone_prompt, fix_grammar_prompt, improve_writing_prompt, Tone};
use crate::gemini::GeminiError;
use crate::state::AppState;

const MAX_TEXT_CHARS: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ToneRequest {
    pub text: String,
    pub tone: Tone,
}

#[derive(Debug, Serialize)]
pub struct TextResponse {
    pub text: String,
}

fn validate_text(text: &str) -> Result<(), AppError> {
    let len = text.chars().count();
    if len == 0 || len > MAX_TEXT_CHARS {
        return Err(AppError::Validation(format!(
            "text must be between 1 and {MAX_TEXT_CHARS} characters"
        )));
    }
    Ok(())
}

async fn run(state: &AppState, prompt: String) -> Result<Json<TextResponse>, AppError> {
    let text = state.assistant.generate(&prompt).await.map_err(|e| {
        error!("Gemini request failed: {e}");
        match e {
            GeminiError::RateLimited { .. } => {
                AppError::ServiceUnavailable("the writing assistant is busy, try again later".into())
            }
            other => AppError::Llm(other.to_string()),
        }
    })?;
    Ok(Json(TextResponse { text }))
}

/// POST /api/gemini/improve-writing
pub async fn handle_improve_writing(
    State(state): State<AppState>,
    _subscription: ActiveSubscription,
    Json(req): Json<TextRequest>,
) -> Result<Json<TextResponse>, AppError> {
    validate_text(&req.text)?;
    run(&state, improve_writing_prompt(&req.text)).await
}

/// POST /api/gemini/fix-grammar
pub async fn handle_fix_grammar(
    State(state): State<AppState>,
    _subscription: ActiveSubscription,
    Json(req): Json<TextRequest>,
) -> Result<Json<TextResponse>, AppError> {
    validate_text(&req.text)?;
    run(&state, fix_grammar_prompt(&req.text)).await
}

/// POST /api/gemini/change-tone
pub async fn handle_change_tone(
    State(state): State<AppState>,
    _subscription: ActiveSubscription,
    Json(req): Json<ToneRequest>,
) -> Result<Json<TextResponse>, AppError> {
    validate_text(&req.text)?;
    run(&state, change_tone_prompt(&req.text, req.tone)).await
}
