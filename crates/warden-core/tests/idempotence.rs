//! Replaying a committed batch leaves the projection tables unchanged.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde_json::json;
use warden_core::StorageError;
use warden_core::db::Database;
use warden_core::event::{Event, EventType};
use warden_core::executor::StatementExecutor;
use warden_core::projection::{app, default_registry, user_auth_method};
use warden_core::reducer::{Dispatch, Registry};
use warden_core::statement::Mutation;

const INSTANCE: &str = "instance-1";
const ORG: &str = "org-1";
const PROJECT: &str = "project-1";
const USER: &str = "user-1";

#[derive(Debug, Clone)]
enum AppOp {
    Rename(String),
    Deactivate,
    Reactivate,
    AddApi,
    RotateApiSecret,
    AddOidc,
    ChangeOidc(bool),
}

#[derive(Debug, Clone, Copy)]
enum AppRemoval {
    App,
    Project,
    Org,
    Instance,
}

#[derive(Debug, Clone, Copy)]
enum TokenKind {
    Otp,
    U2f,
    Passwordless,
}

#[derive(Debug, Clone, Copy)]
enum AuthOp {
    Add(TokenKind, u8),
    Verify(TokenKind, u8),
    Remove(TokenKind, u8),
}

fn event(event_type: EventType, aggregate_id: &str, sequence: u64, payload: &serde_json::Value) -> Event {
    Event {
        instance_id: INSTANCE.into(),
        aggregate_type: event_type.aggregate_type().as_str().into(),
        aggregate_id: aggregate_id.into(),
        resource_owner: ORG.into(),
        event_type: event_type.as_str().into(),
        sequence,
        previous_sequence: sequence - 1,
        creation_date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + chrono::Duration::seconds(i64::try_from(sequence).unwrap()),
        payload: payload.to_string().into_bytes(),
    }
}

fn app_event(op: &AppOp, app_id: &str, sequence: u64) -> Event {
    let (event_type, payload) = match op {
        AppOp::Rename(name) => (EventType::ApplicationChanged, json!({"appId": app_id, "name": name})),
        AppOp::Deactivate => (EventType::ApplicationDeactivated, json!({"appId": app_id})),
        AppOp::Reactivate => (EventType::ApplicationReactivated, json!({"appId": app_id})),
        AppOp::AddApi => (
            EventType::ApiConfigAdded,
            json!({"appId": app_id, "clientId": format!("{app_id}@api"), "authMethodType": 0}),
        ),
        AppOp::RotateApiSecret => (
            EventType::ApiConfigSecretChanged,
            json!({"appId": app_id, "clientSecret": {"keyId": format!("key-{sequence}")}}),
        ),
        AppOp::AddOidc => (
            EventType::OidcConfigAdded,
            json!({
                "appId": app_id,
                "clientId": format!("{app_id}@oidc"),
                "redirectUris": ["https://example.com/cb"],
                "grantTypes": [0],
            }),
        ),
        AppOp::ChangeOidc(dev_mode) => (
            EventType::OidcConfigChanged,
            json!({"appId": app_id, "devMode": dev_mode, "clockSkew": sequence}),
        ),
    };
    event(event_type, PROJECT, sequence, &payload)
}

fn removal_event(removal: AppRemoval, sequence: u64) -> Event {
    match removal {
        AppRemoval::App => event(
            EventType::ApplicationRemoved,
            PROJECT,
            sequence,
            &json!({"appId": "app-0"}),
        ),
        AppRemoval::Project => event(EventType::ProjectRemoved, PROJECT, sequence, &json!({})),
        AppRemoval::Org => event(EventType::OrgRemoved, ORG, sequence, &json!({})),
        AppRemoval::Instance => event(EventType::InstanceRemoved, INSTANCE, sequence, &json!({})),
    }
}

fn auth_event(op: AuthOp, sequence: u64) -> Event {
    let (kind, token, step) = match op {
        AuthOp::Add(kind, token) => (kind, token, 0),
        AuthOp::Verify(kind, token) => (kind, token, 1),
        AuthOp::Remove(kind, token) => (kind, token, 2),
    };
    let event_type = match (kind, step) {
        (TokenKind::Otp, 0) => EventType::HumanOtpAdded,
        (TokenKind::Otp, 1) => EventType::HumanOtpVerified,
        (TokenKind::Otp, _) => EventType::HumanOtpRemoved,
        (TokenKind::U2f, 0) => EventType::HumanU2fTokenAdded,
        (TokenKind::U2f, 1) => EventType::HumanU2fTokenVerified,
        (TokenKind::U2f, _) => EventType::HumanU2fTokenRemoved,
        (TokenKind::Passwordless, 0) => EventType::HumanPasswordlessTokenAdded,
        (TokenKind::Passwordless, 1) => EventType::HumanPasswordlessTokenVerified,
        (TokenKind::Passwordless, _) => EventType::HumanPasswordlessTokenRemoved,
    };
    let payload = json!({
        "webAuthNTokenId": format!("token-{token}"),
        "webAuthNTokenName": format!("name-{sequence}"),
    });
    event(event_type, USER, sequence, &payload)
}

fn reduce(registry: &Registry, projection: &str, events: &[Event]) -> Vec<Mutation> {
    let mut batch = Vec::new();
    for event in events {
        if let Dispatch::Mutations(mutations) = registry.dispatch(projection, event).unwrap() {
            batch.extend(mutations);
        }
    }
    batch
}

fn dump(registry: &Registry, conn: &Connection) -> Vec<(String, Vec<Vec<SqlValue>>)> {
    registry
        .tables()
        .map(|table| {
            let sql = format!(
                "SELECT * FROM {} ORDER BY {}",
                table.name,
                table.primary_key.join(", ")
            );
            let mut stmt = conn.prepare(&sql).unwrap();
            let width = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    (0..width)
                        .map(|i| row.get::<_, SqlValue>(i))
                        .collect::<rusqlite::Result<Vec<_>>>()
                })
                .unwrap()
                .collect::<rusqlite::Result<Vec<_>>>()
                .unwrap();
            (table.name.to_string(), rows)
        })
        .collect()
}

/// Executes `batch` `times` times on a fresh database and dumps every table.
fn apply(registry: &Registry, batch: &[Mutation], times: usize) -> Vec<(String, Vec<Vec<SqlValue>>)> {
    let executor = StatementExecutor::from_registry(registry);
    let db = Database::in_memory().unwrap();
    db.with_conn(|conn| {
        executor.ensure_tables(conn)?;
        for _ in 0..times {
            executor.execute(conn, batch)?;
        }
        Ok::<_, StorageError>(dump(registry, conn))
    })
    .unwrap()
}

fn arb_app_op() -> impl Strategy<Value = AppOp> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(AppOp::Rename),
        Just(AppOp::Deactivate),
        Just(AppOp::Reactivate),
        Just(AppOp::AddApi),
        Just(AppOp::RotateApiSecret),
        Just(AppOp::AddOidc),
        any::<bool>().prop_map(AppOp::ChangeOidc),
    ]
}

fn arb_removal() -> impl Strategy<Value = Option<AppRemoval>> {
    prop::option::of(prop_oneof![
        Just(AppRemoval::App),
        Just(AppRemoval::Project),
        Just(AppRemoval::Org),
        Just(AppRemoval::Instance),
    ])
}

fn arb_auth_op() -> impl Strategy<Value = AuthOp> {
    let kind = prop_oneof![
        Just(TokenKind::Otp),
        Just(TokenKind::U2f),
        Just(TokenKind::Passwordless),
    ];
    (kind, 0u8..3, 0u8..3).prop_map(|(kind, token, step)| match step {
        0 => AuthOp::Add(kind, token),
        1 => AuthOp::Verify(kind, token),
        _ => AuthOp::Remove(kind, token),
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn app_batches_are_idempotent(
        ops in prop::collection::vec((0usize..3, arb_app_op()), 0..24),
        removal in arb_removal(),
    ) {
        let registry = default_registry().unwrap();

        let mut events = Vec::new();
        for i in 0..3 {
            let app_id = format!("app-{i}");
            events.push(event(
                EventType::ApplicationAdded,
                PROJECT,
                events.len() as u64 + 1,
                &json!({"appId": app_id, "name": app_id}),
            ));
        }
        for (index, op) in &ops {
            let sequence = events.len() as u64 + 1;
            events.push(app_event(op, &format!("app-{index}"), sequence));
        }
        if let Some(removal) = removal {
            let sequence = events.len() as u64 + 1;
            events.push(removal_event(removal, sequence));
        }

        let batch = reduce(&registry, app::PROJECTION_NAME, &events);
        prop_assert_eq!(apply(&registry, &batch, 1), apply(&registry, &batch, 2));
    }

    #[test]
    fn auth_method_batches_are_idempotent(
        ops in prop::collection::vec(arb_auth_op(), 0..24),
        user_removed in any::<bool>(),
    ) {
        let registry = default_registry().unwrap();

        let mut events: Vec<Event> = Vec::new();
        for op in ops {
            let sequence = events.len() as u64 + 1;
            events.push(auth_event(op, sequence));
        }
        if user_removed {
            let sequence = events.len() as u64 + 1;
            events.push(event(EventType::UserRemoved, USER, sequence, &json!({})));
        }

        let batch = reduce(&registry, user_auth_method::PROJECTION_NAME, &events);
        prop_assert_eq!(apply(&registry, &batch, 1), apply(&registry, &batch, 2));
    }
}
