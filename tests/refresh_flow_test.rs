//
// End-to-end refresh-token rotation (spec.md §8 scenarios S2 and S4),
// obtaining the initial refresh token through the ordinary authorization
// code flow and then exercising `/token grant_type=refresh_token` directly.
//
mod common;

use rocket::http::{ContentType, Header, Status};

fn basic_auth(id: &str, secret: &str) -> String {
    format!("Basic {}", data_encoding::BASE64.encode(format!("{id}:{secret}").as_bytes()))
}

fn query_value<'a>(url: &'a str, key: &str) -> &'a str {
    let (_, query) = url.split_once('?').expect("url has a query string");
    let marker = format!("{key}=");
    let start = query.find(&marker).expect("key present in query") + marker.len();
    let rest = &query[start..];
    let end = rest.find('&').unwrap_or(rest.len());
    &rest[..end]
}

/// Drives `/auth` -> login -> `/approval` -> `/token` with the
/// `offline_access` scope and returns the issued refresh token.
fn obtain_refresh_token(fx: &common::Fixture) -> String {
    let auth_get = fx
        .client
        .get("/auth?response_type=code&client_id=web&redirect_uri=https://client.example/cb&scope=openid+offline_access&state=abc")
        .dispatch();
    let req_id = common::extract_req_id(&auth_get.into_string().unwrap());

    let login_resp = fx
        .client
        .post("/auth/local/login")
        .header(ContentType::Form)
        .body(format!("req={req_id}&username=alice&password=hunter2"))
        .dispatch();
    let approval_location = login_resp.headers().get_one("Location").unwrap().to_string();
    let req_param = query_value(&approval_location, "req").to_string();
    let hmac_param = query_value(&approval_location, "hmac").to_string();

    let approve_resp = fx
        .client
        .post("/approval")
        .header(ContentType::Form)
        .body(format!("req={req_param}&hmac={hmac_param}&decision=approve"))
        .dispatch();
    let redirect = approve_resp.headers().get_one("Location").unwrap().to_string();
    let code = query_value(&redirect, "code").to_string();

    let token_resp = fx
        .client
        .post("/token")
        .header(Header::new("Authorization", basic_auth("web", "supersecret")))
        .header(ContentType::Form)
        .body(format!("grant_type=authorization_code&code={code}&redirect_uri=https://client.example/cb"))
        .dispatch();
    assert_eq!(token_resp.status(), Status::Ok);
    let body: serde_json::Value = token_resp.into_json().unwrap();
    body["refresh_token"].as_str().expect("offline_access grants a refresh token").to_string()
}

#[test]
fn rotated_refresh_token_is_accepted_once_more_within_the_reuse_window() {
    let fx = common::build();
    let refresh0 = obtain_refresh_token(&fx);

    let rotate = |token: &str| {
        fx.client
            .post("/token")
            .header(Header::new("Authorization", basic_auth("web", "supersecret")))
            .header(ContentType::Form)
            .body(format!("grant_type=refresh_token&refresh_token={token}"))
            .dispatch()
    };

    let first = rotate(&refresh0);
    assert_eq!(first.status(), Status::Ok);
    let first_body: serde_json::Value = first.into_json().unwrap();
    let refresh1 = first_body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(refresh1, refresh0);

    // Presenting the now-obsolete token again, immediately, is tolerated
    // (spec.md §4.8 step 3's reuse-interval grace) and yields yet another
    // fresh token rather than an error.
    let second = rotate(&refresh0);
    assert_eq!(second.status(), Status::Ok);
    let second_body: serde_json::Value = second.into_json().unwrap();
    let refresh2 = second_body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(refresh2, refresh0);
}

#[test]
fn reuse_past_the_grace_window_revokes_the_session() {
    let fx = common::build();
    let refresh0 = obtain_refresh_token(&fx);

    let rotate = |token: &str| {
        fx.client
            .post("/token")
            .header(Header::new("Authorization", basic_auth("web", "supersecret")))
            .header(ContentType::Form)
            .body(format!("grant_type=refresh_token&refresh_token={token}"))
            .dispatch()
    };

    let first = rotate(&refresh0);
    assert_eq!(first.status(), Status::Ok);
    let first_body: serde_json::Value = first.into_json().unwrap();
    let refresh1 = first_body["refresh_token"].as_str().unwrap().to_string();

    let parsed = openidp::proto::RefreshTokenRef::decode_b64url(&refresh0).unwrap();
    futures::executor::block_on(fx.storage.update_refresh_token(
        &parsed.refresh_id,
        Box::new(|mut r: openidp::model::RefreshToken| {
            r.last_used = chrono::Utc::now() - chrono::Duration::seconds(3600);
            Ok(r)
        }),
    ))
    .unwrap();

    // The stale obsolete token is now a reuse attack: it's rejected and the
    // whole refresh-token lineage is revoked, taking the rotated successor
    // down with it.
    let stale = rotate(&refresh0);
    assert_eq!(stale.status(), Status::BadRequest);
    let stale_body: serde_json::Value = stale.into_json().unwrap();
    assert_eq!(stale_body["error"], "invalid_grant");

    let after_cascade = rotate(&refresh1);
    assert_eq!(after_cascade.status(), Status::BadRequest);
}
