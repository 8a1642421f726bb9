//! Authentication flows against the in-memory transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use ayia_bus::Bus;
use ayia_client::{password_hash, AuthUser, ConnectionManager, Error, StaticResolver};

use common::{config, endpoint, Behavior, MockTransport};

fn user_record(token: &str) -> Value {
    json!({
        "user_name": "ann",
        "token_type": "Bearer",
        "access_token": token,
        "roles": ["admin"],
    })
}

fn manager(transport: &Arc<MockTransport>, bus: &Bus) -> ConnectionManager {
    ConnectionManager::builder(config())
        .resolver(Arc::new(StaticResolver::new(endpoint())))
        .transport(transport.clone())
        .bus(bus)
        .build()
}

fn user_service() -> Arc<MockTransport> {
    let transport = MockTransport::new(Behavior::OpenAfter(Duration::ZERO));
    transport.respond_with(|method, params| match method {
        "user.register" => Ok(json!({
            "user_name": params["user_name"],
            "token_type": "Bearer",
            "access_token": "new",
        })),
        "user.authPassword" if params["password_hash"] == password_hash("secret").as_str() => {
            Ok(user_record("t1"))
        }
        "user.authPassword" => Err(Error::RemoteCall {
            code: -32001,
            message: "invalid credentials".to_string(),
            data: None,
        }),
        "user.authRefresh" => Ok(user_record("t2")),
        "user.authRevoke" => Ok(json!(true)),
        "rpc.on" => Ok(json!({"collection.change": "ok"})),
        "rpc.off" => Ok(json!({"collection.change": "ok"})),
        _ => Ok(Value::Null),
    });
    transport
}

#[tokio::test]
async fn test_auth_password_success() {
    let transport = user_service();
    let bus = Bus::new();
    let manager = manager(&transport, &bus);

    let user = manager
        .auth_password("ann", &password_hash("secret"))
        .await
        .unwrap();
    assert_eq!(user.access_token, "t1");
    assert_eq!(user.extra.get("roles"), Some(&json!(["admin"])));
    assert_eq!(manager.identity().get(), Some(user));

    let conn = manager.get_connection().await.unwrap();
    assert!(conn.changes_subscribed());

    let session = transport.last_session();
    assert_eq!(
        session.calls_to("user.authPassword"),
        vec![json!({"user_name": "ann", "password_hash": password_hash("secret")})]
    );

    // Already authenticated as ann: no second call.
    manager.auth_password("ann", "ignored").await.unwrap();
    assert_eq!(session.calls_to("user.authPassword").len(), 1);
}

#[tokio::test]
async fn test_auth_password_failure_keeps_remote_code() {
    let transport = user_service();
    let bus = Bus::new();
    let manager = manager(&transport, &bus);

    manager
        .auth_password("ann", &password_hash("secret"))
        .await
        .unwrap();

    let err = manager
        .auth_password("bob", &password_hash("wrong"))
        .await
        .unwrap_err();
    assert_eq!(err.code, -32001);
    assert_eq!(err.message, "invalid credentials");
    assert!(manager.identity().get().is_none());

    let conn = manager.get_connection().await.unwrap();
    assert!(!conn.changes_subscribed());
    assert_eq!(transport.last_session().calls_to("rpc.off").len(), 1);
}

#[tokio::test]
async fn test_auth_password_empty_result_is_401() {
    let transport = MockTransport::new(Behavior::OpenAfter(Duration::ZERO));
    let bus = Bus::new();
    let manager = manager(&transport, &bus);

    let err = manager.auth_password("ann", "x").await.unwrap_err();
    assert_eq!(err.code, 401);
    assert!(manager.identity().get().is_none());
}

#[tokio::test]
async fn test_auth_without_connection_is_401() {
    let transport = MockTransport::new(Behavior::GiveUp);
    let bus = Bus::new();
    let manager = manager(&transport, &bus);

    let err = manager.auth_password("ann", "x").await.unwrap_err();
    assert_eq!(err.code, 401);
    assert!(err.message.starts_with("connection failed"));
}

#[tokio::test]
async fn test_auth_refresh() {
    let transport = user_service();
    let bus = Bus::new();
    let manager = manager(&transport, &bus);

    let user = manager
        .auth_refresh(&AuthUser::new("ann", "Bearer", "t1"))
        .await
        .unwrap();
    assert_eq!(user.access_token, "t2");
    assert_eq!(manager.identity().get().unwrap().access_token, "t2");
    assert_eq!(
        transport.last_session().calls_to("user.authRefresh"),
        vec![json!({"token": "Bearer t1"})]
    );
}

#[tokio::test]
async fn test_auth_revoke() {
    let transport = user_service();
    let bus = Bus::new();
    let manager = manager(&transport, &bus);

    assert!(manager.auth_revoke().await.unwrap());
    let session = transport.last_session();
    assert!(session.calls_to("user.authRevoke").is_empty());

    manager
        .auth_password("ann", &password_hash("secret"))
        .await
        .unwrap();
    assert!(manager.auth_revoke().await.unwrap());

    assert_eq!(
        session.calls_to("user.authRevoke"),
        vec![json!({"token": "Bearer t1"})]
    );
    assert!(manager.identity().get().is_none());
    assert!(!manager.get_connection().await.unwrap().changes_subscribed());
}

#[tokio::test]
async fn test_auth_revoke_refused() {
    let transport = MockTransport::new(Behavior::OpenAfter(Duration::ZERO));
    let bus = Bus::new();
    let manager = manager(&transport, &bus);
    manager.get_connection().await.unwrap();
    manager.identity().set(Some(AuthUser::new("ann", "Bearer", "t1")));

    let err = manager.auth_revoke().await.unwrap_err();
    assert_eq!(err.code, 401);
    assert!(manager.identity().get().is_some());
}

#[tokio::test]
async fn test_register_user() {
    let transport = user_service();
    let bus = Bus::new();
    let manager = manager(&transport, &bus);

    let user = manager
        .register_user("cy", &password_hash("pw"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.user_name, "cy");
    assert_eq!(manager.identity().get().unwrap().user_name, "cy");

    let params = transport.last_session().calls_to("user.register");
    assert_eq!(params[0]["password_hash"], json!(password_hash("pw")));
}
