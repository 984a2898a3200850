//
// Library root (C13 test harness): the binary and `tests/` integration
// tests both build on this crate rather than duplicating module wiring.
// Grounded on the teacher's own integration-test layout
// (`tests/metrics_integration_test.rs` imports `vaultwarden::api::...`),
// generalized here into an actual `src/lib.rs` since this crate's tests
// need to reach the flow/storage/keys internals the teacher's test file
// only assumed were public.
//
use std::sync::Arc;

pub mod config;
pub mod connector;
pub mod crypto;
pub mod error;
pub mod flow;
pub mod http;
pub mod jwt;
pub mod keys;
pub mod logging;
pub mod model;
pub mod proto;
pub mod storage;
pub mod util;

use flow::AppState;
use http::pages::PageRenderer;

/// Assembles the full route table over `state`/`pages`, shared by
/// `main.rs`'s real launch and `tests/`'s `Client::tracked` fixtures.
pub fn build_rocket(state: AppState, pages: Arc<dyn PageRenderer>) -> rocket::Rocket<rocket::Build> {
    rocket::build().mount("/", http::routes()).manage(state).manage(pages)
}
