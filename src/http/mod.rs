//
// HTTP surface (spec.md §6). Each submodule owns one route group; `routes()`
// assembles them for `rocket::build().mount("/", http::routes())`.
//
pub mod approval;
pub mod authorize;
pub mod callback;
pub mod device;
pub mod discovery;
pub mod health;
pub mod pages;
pub mod support;
pub mod token;
pub mod userinfo;

pub fn routes() -> Vec<rocket::Route> {
    rocket::routes![
        discovery::openid_configuration,
        discovery::jwks,
        authorize::auth_get,
        authorize::auth_post,
        authorize::auth_connector_get,
        authorize::auth_connector_post,
        authorize::password_login_form,
        authorize::password_login_submit,
        callback::callback_connector_get,
        callback::callback_get,
        callback::callback_connector_post,
        callback::callback_post,
        approval::approval_get,
        approval::approval_post,
        token::token,
        token::device_token,
        device::device_code,
        device::device_verify_form,
        device::device_verify_submit,
        device::device_callback,
        userinfo::userinfo,
        health::healthz,
    ]
}
