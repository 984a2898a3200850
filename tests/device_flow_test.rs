//
// End-to-end device flow (spec.md §8 scenario S3): `/device/code` issues a
// code pair, the browser leg resolves the `user_code` through `/device` and
// the ordinary login/approval pipeline, and the polling client's `/token`
// calls only succeed once that browser leg lands on `/device/callback`.
//
mod common;

use std::thread::sleep;
use std::time::Duration;

use rocket::http::{ContentType, Status};

/// The default polling interval is 5s (spec.md §4.9's rate limit); every
/// poll in this test waits it out first rather than tripping `slow_down`,
/// which has its own dedicated coverage in `flow::device`'s unit tests
/// (`rapid_repolling_triggers_slow_down`).
const POLL_INTERVAL: Duration = Duration::from_secs(6);

#[test]
fn polling_client_waits_for_the_browser_leg_to_complete() {
    let fx = common::build();

    let code_resp = fx
        .client
        .post("/device/code")
        .header(ContentType::Form)
        .body("client_id=device-client&scope=openid+email")
        .dispatch();
    assert_eq!(code_resp.status(), Status::Ok);
    let code_body: serde_json::Value = code_resp.into_json().unwrap();
    let device_code = code_body["device_code"].as_str().unwrap().to_string();
    let user_code = code_body["user_code"].as_str().unwrap().to_string();
    assert!(code_body["verification_uri_complete"].as_str().unwrap().contains(&user_code));

    // Polling before the browser leg completes reports authorization_pending.
    sleep(POLL_INTERVAL);
    let pending_resp = fx
        .client
        .post("/token")
        .header(ContentType::Form)
        .body(format!("grant_type=urn:ietf:params:oauth:grant-type:device_code&device_code={device_code}&client_id=device-client"))
        .dispatch();
    assert_eq!(pending_resp.status(), Status::BadRequest);
    let pending_body: serde_json::Value = pending_resp.into_json().unwrap();
    assert_eq!(pending_body["error"], "authorization_pending");

    // Browser leg: resolve the human-entered user_code...
    let verify_resp = fx.client.post("/device").header(ContentType::Form).body(format!("user_code={user_code}")).dispatch();
    assert_eq!(verify_resp.status(), Status::Ok);
    let verify_body = verify_resp.into_string().unwrap();
    let req_id = common::extract_req_id(&verify_body);

    // ...log in against the local connector...
    let login_resp = fx
        .client
        .post("/auth/local/login")
        .header(ContentType::Form)
        .body(format!("req={req_id}&username=alice&password=hunter2"))
        .dispatch();
    assert_eq!(login_resp.status(), Status::Found);
    let approval_location = login_resp.headers().get_one("Location").unwrap().to_string();

    let (_, query) = approval_location.split_once('?').unwrap();
    let req_param = query.split('&').find_map(|kv| kv.strip_prefix("req=")).unwrap().to_string();
    let hmac_param = query.split('&').find_map(|kv| kv.strip_prefix("hmac=")).unwrap().to_string();

    // ...and approve, which lands on /device/callback rather than a client
    // redirect_uri since this auth request's redirect_uri is the device
    // callback.
    let approve_resp = fx
        .client
        .post("/approval")
        .header(ContentType::Form)
        .body(format!("req={req_param}&hmac={hmac_param}&decision=approve"))
        .dispatch();
    assert_eq!(approve_resp.status(), Status::Found);
    let callback_location = approve_resp.headers().get_one("Location").unwrap().to_string();
    assert!(callback_location.contains("/device/callback"));

    let callback_resp = fx.client.get(callback_location.replacen(&fx.issuer, "", 1)).dispatch();
    assert_eq!(callback_resp.status(), Status::Ok);
    assert!(callback_resp.into_string().unwrap().contains("activated"));

    // Now the poller's next call succeeds with the stored token payload.
    sleep(POLL_INTERVAL);
    let done_resp = fx
        .client
        .post("/token")
        .header(ContentType::Form)
        .body(format!("grant_type=urn:ietf:params:oauth:grant-type:device_code&device_code={device_code}&client_id=device-client"))
        .dispatch();
    assert_eq!(done_resp.status(), Status::Ok);
    let done_body: serde_json::Value = done_resp.into_json().unwrap();
    assert!(done_body["access_token"].as_str().unwrap().len() > 10);
    assert_eq!(done_body["token_type"], "bearer");
}

#[test]
fn unknown_user_code_is_reported_without_a_crash() {
    let fx = common::build();
    let resp = fx.client.post("/device").header(ContentType::Form).body("user_code=ZZZZ-ZZZZ").dispatch();
    assert_eq!(resp.status(), Status::Ok);
    assert!(resp.into_string().unwrap().contains("unknown or expired code"));
}
