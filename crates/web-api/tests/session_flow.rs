mod support;

use std::time::Duration;

use domain::{IdentityId, IdentityStore, Role, Snapshot};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::sleep;

use support::*;

#[tokio::test]
async fn test_password_handshake_then_snapshot_greeting() {
    let relay = spawn_relay(|_| {}).await;

    let (_ws, reply, greeting) = login_station(&relay).await;

    assert_eq!(reply["success"], true);
    assert_eq!(reply["role"], "regular");
    assert_eq!(reply["identity"], STATION_ID);
    assert_eq!(reply["username"], "station");
    assert_eq!(reply["server"], "station-relay");
    assert_eq!(reply["protocol"], relay.hub.settings().protocol_version);

    assert_eq!(greeting["type"], "data");
    assert_eq!(greeting["data"]["config"]["revision"], 1);
    relay.wait_for_count(Role::Regular, 1).await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_older_client_protocol_is_rejected_and_never_admitted() {
    let relay = spawn_relay(|_| {}).await;
    let mut ws = connect(&relay).await;
    let protocol = relay.hub.settings().protocol_version;

    send_json(
        &mut ws,
        password_handshake("regular", "station", PASSWORD, protocol - 1),
    )
    .await;
    let reply = recv_json(&mut ws).await.expect("handshake reply");

    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().contains("downgrade"));
    expect_closed(&mut ws).await;
    assert_eq!(relay.hub.audience(Role::Regular).registry.count().await, 0);
    relay.shutdown().await;
}

#[tokio::test]
async fn test_bad_credentials_report_userpass_field() {
    let relay = spawn_relay(|_| {}).await;
    let mut ws = connect(&relay).await;
    let protocol = relay.hub.settings().protocol_version;

    send_json(
        &mut ws,
        password_handshake("regular", "station", "wrong", protocol),
    )
    .await;
    let reply = recv_json(&mut ws).await.expect("handshake reply");

    assert_eq!(
        reply,
        json!({"success": false, "error": "Invalid username or password", "field": "userpass"})
    );
    expect_closed(&mut ws).await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_regular_identity_cannot_connect_as_privileged() {
    let relay = spawn_relay(|_| {}).await;
    let mut ws = connect(&relay).await;
    let protocol = relay.hub.settings().protocol_version;

    send_json(
        &mut ws,
        password_handshake("privileged", "station", PASSWORD, protocol),
    )
    .await;
    let reply = recv_json(&mut ws).await.expect("handshake reply");

    assert_eq!(reply["success"], false);
    assert_eq!(reply["field"], "userpass");
    expect_closed(&mut ws).await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_malformed_handshake_closes_connection() {
    let relay = spawn_relay(|_| {}).await;
    let mut ws = connect(&relay).await;

    send_text(&mut ws, "hello?").await;
    let reply = recv_json(&mut ws).await.expect("handshake reply");

    assert_eq!(reply["success"], false);
    assert!(reply.get("field").is_none());
    expect_closed(&mut ws).await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_admin_session_handshake_receives_hello() {
    let relay = spawn_relay(|_| {}).await;
    let (_station, _, _) = login_station(&relay).await;
    relay.wait_for_count(Role::Regular, 1).await;

    let admin = relay
        .identities
        .find_by_id(IdentityId(ADMIN_ID))
        .await
        .unwrap()
        .unwrap();
    let token = relay.issue_session(&admin, "admin-session").await;
    let protocol = relay.hub.settings().protocol_version;

    let mut ws = connect(&relay).await;
    send_json(&mut ws, session_handshake("privileged", &token, protocol)).await;
    let reply = recv_json(&mut ws).await.expect("handshake reply");
    let hello = recv_json(&mut ws).await.expect("hello");

    assert_eq!(reply["success"], true);
    assert_eq!(reply["role"], "privileged");
    assert_eq!(reply["identity"], ADMIN_ID);
    assert_eq!(
        hello,
        json!({"type": "hello", "data": {"num_connected_users": 1}})
    );
    relay.shutdown().await;
}

#[tokio::test]
async fn test_session_fails_after_password_change() {
    let relay = spawn_relay(|_| {}).await;
    let station = relay
        .identities
        .find_by_id(IdentityId(STATION_ID))
        .await
        .unwrap()
        .unwrap();
    let token = relay.issue_session(&station, "station-session").await;

    // 会话签发后修改密码
    let new_hash = relay.passwords.hash("correct horse").await.unwrap();
    relay
        .identities
        .insert(station.clone().with_password_hash(new_hash))
        .await;

    let mut ws = connect(&relay).await;
    let protocol = relay.hub.settings().protocol_version;
    send_json(&mut ws, session_handshake("regular", &token, protocol)).await;
    let reply = recv_json(&mut ws).await.expect("handshake reply");

    assert_eq!(reply["success"], false);
    expect_closed(&mut ws).await;
    assert_eq!(relay.hub.audience(Role::Regular).registry.count().await, 0);
    relay.shutdown().await;
}

#[tokio::test]
async fn test_single_login_rejects_second_connection() {
    let relay = spawn_relay(|settings| settings.single_login = true).await;
    let (mut first, reply, _) = login_station(&relay).await;
    assert_eq!(reply["success"], true);

    let mut second = connect(&relay).await;
    let protocol = relay.hub.settings().protocol_version;
    send_json(
        &mut second,
        password_handshake("regular", "station", PASSWORD, protocol),
    )
    .await;
    let reply = recv_json(&mut second).await.expect("handshake reply");

    assert_eq!(reply["success"], false);
    expect_closed(&mut second).await;
    let registry = &relay.hub.audience(Role::Regular).registry;
    assert_eq!(registry.connections_for(IdentityId(STATION_ID)).await.len(), 1);

    // 第一个连接不受影响
    send_text(&mut first, "{").await;
    let error = recv_json(&mut first).await.expect("error reply");
    assert_eq!(error["type"], "error");
    relay.shutdown().await;
}

#[tokio::test]
async fn test_malformed_envelope_keeps_connection_open() {
    let relay = spawn_relay(|_| {}).await;
    let (mut ws, _, _) = login_station(&relay).await;

    send_text(&mut ws, "not json").await;
    let error = recv_json(&mut ws).await.expect("error reply");
    assert_eq!(error["type"], "error");
    assert!(error["data"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Malformed message"));

    send_json(&mut ws, json!({"type": "reload-playlist", "data": null})).await;
    let error = recv_json(&mut ws).await.expect("unknown type reply");
    assert_eq!(error["type"], "error");

    let log_id = "4f1c2d7e-8a5b-4c3d-9e2f-1a2b3c4d5e6f";
    send_json(
        &mut ws,
        json!({"type": "log", "data": {"id": log_id, "type": "played_asset", "description": "Song A"}}),
    )
    .await;
    let ack = recv_json(&mut ws).await.expect("ack");
    assert_eq!(ack["type"], "ack-log");
    relay.shutdown().await;
}

#[tokio::test]
async fn test_client_log_is_stored_and_acknowledged() {
    let relay = spawn_relay(|_| {}).await;
    let (mut ws, _, _) = login_station(&relay).await;
    let log_id = "0d8a6f52-3b7e-4a91-8c55-2f0c9e6b1a77";
    let log = json!({"type": "log", "data": {"id": log_id, "type": "played_asset", "description": "Song A"}});

    send_json(&mut ws, log.clone()).await;
    let ack = recv_json(&mut ws).await.expect("ack");
    assert_eq!(
        ack["data"],
        json!({"success": true, "id": log_id, "updated_existing": false, "ignored": false})
    );

    send_json(&mut ws, log).await;
    let ack = recv_json(&mut ws).await.expect("ack");
    assert_eq!(ack["data"]["updated_existing"], true);

    let record = relay
        .client_logs
        .get(log_id.parse().unwrap())
        .await
        .expect("stored record");
    assert_eq!(record.created_by, IdentityId(STATION_ID));
    assert_eq!(record.ip_address.as_deref(), Some("127.0.0.1"));
    relay.shutdown().await;
}

#[tokio::test]
async fn test_admin_reload_playlist_reaches_regular_clients() {
    let relay = spawn_relay(|_| {}).await;
    let (mut station, _, _) = login_station(&relay).await;

    let mut admin = connect(&relay).await;
    let protocol = relay.hub.settings().protocol_version;
    send_json(
        &mut admin,
        password_handshake("privileged", "admin", PASSWORD, protocol),
    )
    .await;
    assert_eq!(recv_json(&mut admin).await.unwrap()["success"], true);
    assert_eq!(recv_json(&mut admin).await.unwrap()["type"], "hello");

    send_json(&mut admin, json!({"type": "reload-playlist", "data": null})).await;
    let reply = recv_json(&mut admin).await.expect("admin reply");
    assert_eq!(
        reply,
        json!({"type": "reload-playlist", "data": {"success": true}})
    );

    let pushed = recv_json(&mut station).await.expect("reload push");
    assert_eq!(pushed["type"], "reload-playlist");
    relay.shutdown().await;
}

#[tokio::test]
async fn test_data_changed_notification_pushes_new_snapshot() {
    let relay = spawn_relay(|_| {}).await;
    let (mut ws, _, _) = login_station(&relay).await;
    while relay.notifications.receiver_count() == 0 {
        sleep(Duration::from_millis(5)).await;
    }

    relay
        .snapshots
        .set(Snapshot::new(
            json!({"assets": [], "rotators": [], "stopsets": [], "config": {"revision": 2}}),
        ))
        .await;
    relay.notifications.publish(r#"["data-changed"]"#);

    let update = recv_json(&mut ws).await.expect("snapshot update");
    assert_eq!(update["type"], "data");
    assert_eq!(update["data"]["config"]["revision"], 2);
    relay.shutdown().await;
}

#[tokio::test]
async fn test_logout_notification_closes_connection() {
    let relay = spawn_relay(|_| {}).await;
    let (mut ws, _, _) = login_station(&relay).await;
    relay.wait_for_count(Role::Regular, 1).await;
    while relay.notifications.receiver_count() == 0 {
        sleep(Duration::from_millis(5)).await;
    }

    relay
        .notifications
        .publish(json!([["logout", {"user_ids": [STATION_ID], "admin_only": false}]]).to_string());

    expect_closed(&mut ws).await;
    relay.wait_for_count(Role::Regular, 0).await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_removes_connection() {
    let relay = spawn_relay(|_| {}).await;
    let (ws, _, _) = login_station(&relay).await;
    relay.wait_for_count(Role::Regular, 1).await;

    drop(ws);

    relay.wait_for_count(Role::Regular, 0).await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_status_endpoint_reports_connections() {
    let relay = spawn_relay(|_| {}).await;
    let (_ws, _, _) = login_station(&relay).await;
    relay.wait_for_count(Role::Regular, 1).await;

    let client = Client::new();
    let status: Value = client
        .get(relay.http_url("/api/status"))
        .send()
        .await
        .expect("status request")
        .json()
        .await
        .expect("status json");

    assert_eq!(status["server"], "station-relay");
    assert_eq!(status["protocol"], relay.hub.settings().protocol_version);
    assert_eq!(status["connections"], json!({"regular": 1, "privileged": 0}));

    let banner = client
        .get(relay.http_url("/"))
        .send()
        .await
        .expect("banner request")
        .text()
        .await
        .expect("banner text");
    assert!(banner.starts_with("station-relay"));
    relay.shutdown().await;
}

#[tokio::test]
async fn test_plain_http_request_to_websocket_endpoint_is_rejected() {
    let relay = spawn_relay(|_| {}).await;

    let response = Client::new()
        .get(relay.http_url("/api"))
        .send()
        .await
        .expect("request");

    assert!(response.status().is_client_error());
    let body: Value = response.json().await.expect("error body");
    assert_eq!(body["code"], "WEBSOCKET_UPGRADE_REQUIRED");
    relay.shutdown().await;
}
