//
// Discovery document, JWKS shape, and the key-rotation grace window
// (spec.md §8 scenario S6): a token minted under the pre-rotation signing
// key must still verify once its key has been retired into the JWKS
// `verification_keys` list.
//
mod common;

use rocket::http::Status;

#[test]
fn discovery_document_advertises_the_endpoints_this_crate_implements() {
    let fx = common::build();
    let resp = fx.client.get("/.well-known/openid-configuration").dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let body: serde_json::Value = resp.into_json().unwrap();
    assert_eq!(body["issuer"], fx.issuer);
    assert_eq!(body["token_endpoint"], format!("{}/token", fx.issuer));
    assert!(body["grant_types_supported"].as_array().unwrap().iter().any(|g| g == "urn:ietf:params:oauth:grant-type:device_code"));
}

#[test]
fn jwks_exposes_the_current_signing_key() {
    let fx = common::build();
    let resp = fx.client.get("/keys").dispatch();
    assert_eq!(resp.status(), Status::Ok);
    assert!(resp.headers().get_one("Cache-Control").unwrap().contains("max-age="));
    let body: serde_json::Value = resp.into_json().unwrap();
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kid"], fx.keys.current().keys.signing_kid);
}

#[test]
fn a_token_minted_before_rotation_still_verifies_after_it() {
    let fx = common::build();
    let old_kid = fx.keys.current().keys.signing_kid.clone();

    let access_token = openidp::jwt::mint_access_token(
        fx.keys.current().as_ref(),
        &fx.issuer,
        "user-alice",
        "local",
        "web",
        &["openid".to_string()],
        chrono::Utc::now(),
        fx.config.access_token_validity(),
    )
    .unwrap();

    // Force the rotation deadline into the past and let the cache catch up,
    // the same way the background rotation loop would on its next tick.
    futures::executor::block_on(fx.storage.update_keys(Box::new(|mut k: openidp::model::Keys| {
        k.next_rotation = chrono::Utc::now() - chrono::Duration::seconds(1);
        Ok(k)
    })))
    .unwrap();
    futures::executor::block_on(fx.keys.refresh_if_stale(fx.storage.as_ref(), fx.config)).unwrap();

    let new_kid = fx.keys.current().keys.signing_kid.clone();
    assert_ne!(old_kid, new_kid);

    let jwks_resp = fx.client.get("/keys").dispatch();
    let jwks_body: serde_json::Value = jwks_resp.into_json().unwrap();
    let kids: Vec<String> = jwks_body["keys"].as_array().unwrap().iter().map(|k| k["kid"].as_str().unwrap().to_string()).collect();
    assert!(kids.contains(&old_kid));
    assert!(kids.contains(&new_kid));

    // The pre-rotation token decodes fine against the now-retired key.
    let claims = openidp::jwt::decode_access_token(fx.keys.current().as_ref(), &access_token, &fx.issuer).unwrap();
    let subject = openidp::proto::SubjectId::decode_b64url(&claims.sub).unwrap();
    assert_eq!(subject.conn_id, "local");
    assert_eq!(subject.user_id, "user-alice");
}
