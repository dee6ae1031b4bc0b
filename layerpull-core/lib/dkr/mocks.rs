//! wiremock scaffolding for exercising pulls against a loopback registry.
//!
//! One mock server plays both roles: the index service the pull starts at and
//! the registry endpoint the index hands back via `X-Docker-Endpoints`.

use std::path::Path;

use flate2::{Compression, write::GzEncoder};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

use crate::dkr::session::Pull;

/// A 64-char hex layer id filled with one byte value.
pub(crate) fn hex_id(fill: u8) -> String {
    format!("{:02x}", fill).repeat(32)
}

/// A pull engine wired to the mock server.
pub(crate) fn test_pull(server: &MockServer, image_root: &Path) -> Pull {
    Pull::new(server.uri(), image_root).unwrap()
}

/// The endpoint value the stub index hands out: the mock server itself.
pub(crate) fn endpoint(server: &MockServer) -> String {
    server.address().to_string()
}

/// Builds a gzipped tar archive from `(path, contents)` pairs.
pub(crate) fn gzipped_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (entry_path, data) in entries {
        let mut tar_header = tar::Header::new_gnu();
        tar_header.set_size(data.len() as u64);
        tar_header.set_mode(0o644);
        tar_header.set_cksum();
        builder
            .append_data(&mut tar_header, entry_path, *data)
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Mounts the index `images` endpoint. The bootstrap header must be present;
/// the response hands out the session token and, optionally, the endpoints.
pub(crate) async fn mount_images(
    server: &MockServer,
    name: &str,
    token: &str,
    endpoints: Option<&str>,
) {
    let mut template = ResponseTemplate::new(200)
        .set_body_raw("[]", "application/json")
        .insert_header("X-Docker-Token", token);
    if let Some(endpoints) = endpoints {
        template = template.insert_header("X-Docker-Endpoints", endpoints);
    }

    Mock::given(method("GET"))
        .and(path(format!("/v1/repositories/{name}/images")))
        .and(header("X-Docker-Token", "true"))
        .respond_with(template)
        .mount(server)
        .await;
}

/// Mounts the tag-resolution endpoint; requires the propagated token.
pub(crate) async fn mount_tags(server: &MockServer, name: &str, tag: &str, token: &str, id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/repositories/{name}/tags/{tag}")))
        .and(header("Authorization", format!("Token {token}").as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(format!("\"{id}\""), "application/json"),
        )
        .mount(server)
        .await;
}

/// Mounts the ancestry endpoint with the given tip-first chain.
pub(crate) async fn mount_ancestry(server: &MockServer, id: &str, token: &str, wire_ids: &[String]) {
    let body = serde_json::to_string(wire_ids).unwrap();
    Mock::given(method("GET"))
        .and(path(format!("/v1/images/{id}/ancestry")))
        .and(header("Authorization", format!("Token {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .mount(server)
        .await;
}

/// Mounts the image metadata endpoint with a placeholder document.
pub(crate) async fn mount_json(server: &MockServer, id: &str, token: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/images/{id}/json")))
        .and(header("Authorization", format!("Token {token}").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(format!("{{\"id\": \"{id}\"}}"), "application/json"),
        )
        .mount(server)
        .await;
}

/// Mounts a layer blob endpoint expecting exactly `expect` fetches.
pub(crate) async fn mount_layer(
    server: &MockServer,
    id: &str,
    token: &str,
    body: Vec<u8>,
    expect: u64,
) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/images/{id}/layer")))
        .and(header("Authorization", format!("Token {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/octet-stream"))
        .expect(expect)
        .mount(server)
        .await;
}

/// Mounts a layer blob endpoint that serves `body` exactly once and then goes
/// away, letting a later mount for the same path take over.
pub(crate) async fn mount_layer_once(server: &MockServer, id: &str, token: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/images/{id}/layer")))
        .and(header("Authorization", format!("Token {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/octet-stream"))
        .up_to_n_times(1)
        .mount(server)
        .await;
}
