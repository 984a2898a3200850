//
// HTML rendering seam (SPEC_FULL.md §6 "[AMBIENT]"): the flow engine and
// routes never build markup themselves, they go through this trait. A
// deployment that wants a real template engine (the teacher links
// `handlebars`) implements `PageRenderer` once and swaps it into
// `AppState` without touching `src/flow/` or `src/http/*.rs`.
//
use crate::model::ConnectorRecord;

pub trait PageRenderer: Send + Sync {
    fn connector_chooser(&self, req_id: &str, connectors: &[ConnectorRecord]) -> String;
    fn password_login(&self, connector_id: &str, req_id: &str, error: Option<&str>) -> String;
    fn consent(&self, req_id: &str, hmac: &str, client_name: &str, scopes: &[String]) -> String;
    fn device_user_code_form(&self, prefill: Option<&str>, error: Option<&str>) -> String;
    fn plain_message(&self, message: &str) -> String;
    fn oob_code(&self, code: &str) -> String;
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Plain, dependency-free markup. Good enough to exercise the flow
/// end-to-end; not meant to be a polished UI.
pub struct DefaultPageRenderer;

impl PageRenderer for DefaultPageRenderer {
    fn connector_chooser(&self, req_id: &str, connectors: &[ConnectorRecord]) -> String {
        let links: String = connectors.iter().map(|c| format!("<li><a href=\"/auth/{}?req={req_id}\">{}</a></li>", c.id, html_escape(&c.name))).collect();
        format!("<!DOCTYPE html><html><body><h1>Choose how to sign in</h1><ul>{links}</ul></body></html>")
    }

    fn password_login(&self, connector_id: &str, req_id: &str, error: Option<&str>) -> String {
        let error_html = error.map(|e| format!("<p class=\"error\">{}</p>", html_escape(e))).unwrap_or_default();
        format!(
            "<!DOCTYPE html><html><body>{error_html}<form method=\"post\" action=\"/auth/{connector_id}/login?req={req_id}\">\
             <input type=\"hidden\" name=\"req\" value=\"{req_id}\">\
             <input name=\"username\" placeholder=\"username\">\
             <input name=\"password\" type=\"password\" placeholder=\"password\">\
             <button type=\"submit\">Sign in</button></form></body></html>"
        )
    }

    fn consent(&self, req_id: &str, hmac: &str, client_name: &str, scopes: &[String]) -> String {
        let scopes = scopes.join(", ");
        format!(
            "<!DOCTYPE html><html><body><h1>Authorize {}?</h1><p>Requested scopes: {}</p>\
             <form method=\"post\" action=\"/approval\">\
             <input type=\"hidden\" name=\"req\" value=\"{req_id}\">\
             <input type=\"hidden\" name=\"hmac\" value=\"{hmac}\">\
             <button type=\"submit\" name=\"decision\" value=\"approve\">Approve</button>\
             <button type=\"submit\" name=\"decision\" value=\"deny\">Deny</button>\
             </form></body></html>",
            html_escape(client_name),
            html_escape(&scopes)
        )
    }

    fn device_user_code_form(&self, prefill: Option<&str>, error: Option<&str>) -> String {
        let error_html = error.map(|e| format!("<p class=\"error\">{}</p>", html_escape(e))).unwrap_or_default();
        let value_attr = prefill.map(|c| format!(" value=\"{}\"", html_escape(c))).unwrap_or_default();
        format!(
            "<!DOCTYPE html><html><body><h1>Device activation</h1>{error_html}\
             <form method=\"post\" action=\"/device\">\
             <input name=\"user_code\" placeholder=\"XXXX-XXXX\" autocapitalize=\"characters\"{value_attr}>\
             <button type=\"submit\">Continue</button></form></body></html>"
        )
    }

    fn plain_message(&self, message: &str) -> String {
        format!("<!DOCTYPE html><html><body><p>{}</p></body></html>", html_escape(message))
    }

    fn oob_code(&self, code: &str) -> String {
        format!("<!DOCTYPE html><html><body><p>Your code:</p><pre>{}</pre></body></html>", html_escape(code))
    }
}
