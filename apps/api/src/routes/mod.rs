pub mod health;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::auth::handlers as auth;
use crate::billing::subscriptions as subscription;
use crate::click::handlers as click;
use crate::contributors;
use crate::gemini::handlers as gemini;
use crate::payme::handlers as payme;
use crate::payment::handlers as payment;
use crate::resume::handlers as resume;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health::health_handler))
        // Auth
        .route("/auth/register", post(auth::handle_register))
        .route("/auth/login", post(auth::handle_login))
        .route("/auth/refresh", post(auth::handle_refresh))
        .route("/auth/me", get(auth::handle_me))
        // Resumes
        .route(
            "/resume",
            get(resume::handle_list_resumes).post(resume::handle_create_resume),
        )
        .route(
            "/resume/public/:username/:slug",
            get(resume::handle_public_resume),
        )
        .route(
            "/resume/:id",
            get(resume::handle_get_resume)
                .patch(resume::handle_update_resume)
                .delete(resume::handle_delete_resume),
        )
        .route("/resume/:id/lock", patch(resume::handle_lock_resume))
        // Plans, subscriptions and the ledger
        .route(
            "/subscription",
            get(subscription::handle_list_subscriptions)
                .post(subscription::handle_create_subscription),
        )
        .route(
            "/subscription/active",
            get(subscription::handle_active_subscription),
        )
        .route(
            "/subscription/plans",
            get(subscription::handle_list_plans).post(subscription::handle_create_plan),
        )
        .route(
            "/subscription/plans/:id",
            patch(subscription::handle_update_plan).delete(subscription::handle_delete_plan),
        )
        .route(
            "/subscription/transactions",
            get(subscription::handle_list_transactions)
                .post(subscription::handle_create_transaction),
        )
        .route(
            "/subscription/:id/cancel",
            patch(subscription::handle_cancel_subscription),
        )
        // Checkout and provider callbacks
        .route("/payment/create-intent", post(payment::handle_create_intent))
        .route("/payment/webhook", post(payment::handle_stripe_webhook))
        .route("/payme", post(payme::handle_payme))
        .route("/click/prepare", post(click::handle_prepare))
        .route("/click/complete", post(click::handle_complete))
        .route("/click/status", get(click::handle_status))
        // AI text assist
        .route("/gemini/improve-writing", post(gemini::handle_improve_writing))
        .route("/gemini/fix-grammar", post(gemini::handle_fix_grammar))
        .route("/gemini/change-tone", post(gemini::handle_change_tone))
        .route(
            "/contributors/github",
            get(contributors::handle_github_contributors),
        );

    Router::new().nest("/api", api).with_state(state)
}
