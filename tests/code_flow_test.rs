//
// End-to-end authorization-code + PKCE happy path (spec.md §8 scenario S1),
// plus the cross-client audience scenario (S5), driven entirely through
// the HTTP surface the way a real client would.
//
mod common;

use rocket::http::{ContentType, Header, Status};
use sha2::{Digest, Sha256};

fn pkce_pair() -> (String, String) {
    let verifier = "a-fixed-test-verifier-with-enough-entropy-123456";
    let challenge = data_encoding::BASE64URL_NOPAD.encode(&Sha256::digest(verifier.as_bytes()));
    (verifier.to_string(), challenge)
}

/// Rocket's local client dispatches against origin-form URIs only; strips
/// `scheme://host` off an absolute redirect target before `.get()`/`.post()`.
fn origin_form(url: &str) -> &str {
    match url.find("://") {
        Some(scheme_end) => {
            let after_scheme = &url[scheme_end + 3..];
            let path_start = after_scheme.find('/').map(|i| scheme_end + 3 + i).unwrap_or(url.len());
            &url[path_start..]
        }
        None => url,
    }
}

fn query_value<'a>(url: &'a str, key: &str) -> &'a str {
    let (_, query) = url.split_once('?').expect("url has a query string");
    let marker = format!("{key}=");
    let start = query.find(&marker).expect("key present in query") + marker.len();
    let rest = &query[start..];
    let end = rest.find('&').unwrap_or(rest.len());
    &rest[..end]
}

#[test]
fn authorization_code_with_pkce_issues_a_verifiable_id_token() {
    let fx = common::build();
    let (verifier, challenge) = pkce_pair();

    let auth_get = fx
        .client
        .get(format!(
            "/auth?response_type=code&client_id=web&redirect_uri=https://client.example/cb&scope=openid+email+audience:server:client_id:peer&state=xyz&code_challenge={challenge}&code_challenge_method=S256"
        ))
        .dispatch();
    assert_eq!(auth_get.status(), Status::Ok);
    let body = auth_get.into_string().unwrap();
    let req_id = common::extract_req_id(&body);

    // Submit credentials against the password connector.
    let login_resp = fx
        .client
        .post("/auth/local/login")
        .header(ContentType::Form)
        .body(format!("req={req_id}&username=alice&password=hunter2"))
        .dispatch();
    assert_eq!(login_resp.status(), Status::Found);
    let approval_location = login_resp.headers().get_one("Location").unwrap().to_string();

    // Consent page renders before approval.
    let consent_get = fx.client.get(origin_form(&approval_location)).dispatch();
    assert_eq!(consent_get.status(), Status::Ok);
    assert!(consent_get.into_string().unwrap().contains("Web Client"));

    let req_param = query_value(&approval_location, "req").to_string();
    let hmac_param = query_value(&approval_location, "hmac").to_string();

    let approve_resp = fx
        .client
        .post("/approval")
        .header(ContentType::Form)
        .body(format!("req={req_param}&hmac={hmac_param}&decision=approve"))
        .dispatch();
    assert_eq!(approve_resp.status(), Status::Found);
    let redirect = approve_resp.headers().get_one("Location").unwrap().to_string();
    assert!(redirect.starts_with("https://client.example/cb"));
    assert_eq!(query_value(&redirect, "state"), "xyz");
    let code = query_value(&redirect, "code").to_string();

    let auth_header = format!("Basic {}", data_encoding::BASE64.encode(b"web:supersecret"));
    let token_resp = fx
        .client
        .post("/token")
        .header(Header::new("Authorization", auth_header))
        .header(ContentType::Form)
        .body(format!("grant_type=authorization_code&code={code}&redirect_uri=https://client.example/cb&code_verifier={verifier}"))
        .dispatch();
    assert_eq!(token_resp.status(), Status::Ok);
    assert_eq!(token_resp.headers().get_one("Cache-Control"), Some("no-store"));

    let body: serde_json::Value = token_resp.into_json().unwrap();
    assert_eq!(body["token_type"], "bearer");
    assert!(body["access_token"].as_str().unwrap().len() > 10);
    // offline_access wasn't requested, so no refresh token is issued.
    assert!(body.get("refresh_token").is_none());

    let id_token = body["id_token"].as_str().unwrap();
    let claims = common::decode_jwt_claims_unverified(id_token);
    // Cross-client audience (S5): the trusted peer rides along as a second
    // `aud` entry.
    let aud = claims["aud"].as_array().expect("aud is a list for a trusted-peer scope");
    assert!(aud.iter().any(|a| a == "web"));
    assert!(aud.iter().any(|a| a == "peer"));
    assert_eq!(claims["email"], "alice@example.test");

    let access_token = body["access_token"].as_str().unwrap();
    let userinfo_resp = fx.client.get("/userinfo").header(Header::new("Authorization", format!("Bearer {access_token}"))).dispatch();
    assert_eq!(userinfo_resp.status(), Status::Ok);
    let userinfo: serde_json::Value = userinfo_resp.into_json().unwrap();
    assert_eq!(userinfo["email"], "alice@example.test");
    assert_eq!(userinfo["preferred_username"], "alice");
}

#[test]
fn wrong_password_redisplays_the_login_form_with_an_error() {
    let fx = common::build();
    let (_, challenge) = pkce_pair();

    let auth_get = fx
        .client
        .get(format!(
            "/auth?response_type=code&client_id=web&redirect_uri=https://client.example/cb&scope=openid&code_challenge={challenge}&code_challenge_method=S256"
        ))
        .dispatch();
    let req_id = common::extract_req_id(&auth_get.into_string().unwrap());

    let login_resp = fx
        .client
        .post("/auth/local/login")
        .header(ContentType::Form)
        .body(format!("req={req_id}&username=alice&password=wrong"))
        .dispatch();
    assert_eq!(login_resp.status(), Status::Ok);
    assert!(login_resp.into_string().unwrap().contains("invalid username or password"));
}

#[test]
fn unknown_client_is_rejected_before_any_redirect() {
    let fx = common::build();
    let resp = fx.client.get("/auth?response_type=code&client_id=ghost&scope=openid").dispatch();
    assert_eq!(resp.status(), Status::BadRequest);
}
