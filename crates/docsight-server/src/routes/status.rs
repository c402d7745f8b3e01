use axum::{routing::get, Json, Router};
use docsight::action::{self, Action, OutputShape};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ActionSummary {
    id: Action,
    label: String,
    output: OutputShape,
}

async fn status() -> &'static str {
    "ok"
}

async fn list_actions() -> Json<Vec<ActionSummary>> {
    let actions = action::all()
        .map(|definition| ActionSummary {
            id: definition.id,
            label: definition.id.label().to_string(),
            output: definition.output,
        })
        .collect();
    Json(actions)
}

pub fn routes() -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/api/actions", get(list_actions))
}
