//
// Shared response shapes for the browser-facing flow routes (spec.md §6
// `/auth`, `/callback`, `/approval`, `/device`). Grounded on the teacher's
// `JsonResult`/`Redirect` responder mix in `src/api/identity.rs` and
// `src/api/web.rs`.
//
use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder, Response};
use rocket::Request;

use crate::error::Error;
use crate::flow::approval::CodeResponse;
use crate::http::pages::PageRenderer;

pub enum FlowOutcome {
    Redirect(String),
    Html(String),
    Json(serde_json::Value),
}

impl<'r> Responder<'r, 'static> for FlowOutcome {
    fn respond_to(self, _request: &'r Request<'_>) -> response::Result<'static> {
        match self {
            Self::Redirect(location) => Response::build().status(Status::Found).raw_header("Location", location).ok(),
            Self::Html(body) => Response::build().header(ContentType::HTML).sized_body(body.len(), Cursor::new(body)).ok(),
            Self::Json(value) => {
                let body = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
                Response::build().header(ContentType::JSON).sized_body(body.len(), Cursor::new(body)).ok()
            }
        }
    }
}

/// Renders a finished code-flow response through the page renderer rather
/// than a hardcoded template, so the `Oob` ("show the code on a page")
/// branch honors whichever `PageRenderer` is in effect.
pub fn code_response_outcome(pages: &dyn PageRenderer, code: CodeResponse) -> FlowOutcome {
    match code {
        CodeResponse::Redirect { location } | CodeResponse::Fragment { location } => FlowOutcome::Redirect(location),
        CodeResponse::Oob { code } => FlowOutcome::Html(pages.oob_code(&code)),
    }
}

pub fn bad_request(message: impl Into<String>) -> Error {
    Error::display(Status::BadRequest, message)
}

/// Connector-id path segment, restricted to the safe identifier charset
/// at the routing layer rather than trusting an arbitrary `String`.
#[derive(Debug, Clone, macros::IdFromParam)]
pub struct ConnectorId(pub String);

impl ConnectorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// JSON body with the `Cache-Control`/`Pragma` headers the token endpoint
/// must set on every response (spec.md §4.7).
pub struct NoStoreJson(pub serde_json::Value);

impl<'r> Responder<'r, 'static> for NoStoreJson {
    fn respond_to(self, _request: &'r Request<'_>) -> response::Result<'static> {
        let body = serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string());
        Response::build()
            .header(ContentType::JSON)
            .raw_header("Cache-Control", "no-store")
            .raw_header("Pragma", "no-cache")
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}
