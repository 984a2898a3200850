//
// `GET /healthz` (spec.md §6). Grounded on the teacher's `/alive` liveness
// route in `src/api/core/mod.rs`.
//
use rocket::{get, State};
use serde_json::json;

use crate::error::Error;
use crate::flow::AppState;

#[get("/healthz")]
pub async fn healthz(state: &State<AppState>) -> Result<rocket::serde::json::Json<serde_json::Value>, Error> {
    state.storage.list_connectors().await?;
    Ok(rocket::serde::json::Json(json!({ "status": "ok" })))
}
