//! Second factors and passwordless tokens of human users.
//!
//! One row per `(user, method type, token)`. OTP has a single secret per
//! user, so its token id is empty.

use crate::domain::{MfaState, UserAuthMethodType};
use crate::event::user::{WebAuthnTokenAdded, WebAuthnTokenRemoved, WebAuthnTokenVerified};
use crate::event::{Event, EventType};
use crate::reducer::{EventReducer, Projection, ReduceError};
use crate::schema::{ColumnDef, ColumnType, OwnerColumns, Table};
use crate::statement::{Column, Mutation, Predicate};

use super::cascade;

/// Projection name and checkpoint key.
pub const PROJECTION_NAME: &str = "projections.user_auth_methods";
/// One row per authentication method.
pub const AUTH_METHOD_TABLE: &str = "user_auth_methods";

const TENANT: &str = "instance_id";
const OTP_TOKEN_ID: &str = "";

/// The user authentication methods projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAuthMethodProjection;

impl Projection for UserAuthMethodProjection {
    fn name(&self) -> &'static str {
        PROJECTION_NAME
    }

    fn tables(&self) -> Vec<Table> {
        tables()
    }

    fn reducers(&self) -> Vec<EventReducer> {
        let mut reducers = vec![
            EventReducer::new(EventType::HumanOtpAdded, |event| {
                reduce_otp(event, EventType::HumanOtpAdded, Step::Added)
            }),
            EventReducer::new(EventType::HumanOtpVerified, |event| {
                reduce_otp(event, EventType::HumanOtpVerified, Step::Verified)
            }),
            EventReducer::new(EventType::HumanOtpRemoved, |event| {
                reduce_otp(event, EventType::HumanOtpRemoved, Step::Removed)
            }),
            EventReducer::new(EventType::HumanU2fTokenAdded, |event| {
                reduce_token_added(event, EventType::HumanU2fTokenAdded, UserAuthMethodType::U2f)
            }),
            EventReducer::new(EventType::HumanU2fTokenVerified, |event| {
                reduce_token_verified(
                    event,
                    EventType::HumanU2fTokenVerified,
                    UserAuthMethodType::U2f,
                )
            }),
            EventReducer::new(EventType::HumanU2fTokenRemoved, |event| {
                reduce_token_removed(
                    event,
                    EventType::HumanU2fTokenRemoved,
                    UserAuthMethodType::U2f,
                )
            }),
            EventReducer::new(EventType::HumanPasswordlessTokenAdded, |event| {
                reduce_token_added(
                    event,
                    EventType::HumanPasswordlessTokenAdded,
                    UserAuthMethodType::Passwordless,
                )
            }),
            EventReducer::new(EventType::HumanPasswordlessTokenVerified, |event| {
                reduce_token_verified(
                    event,
                    EventType::HumanPasswordlessTokenVerified,
                    UserAuthMethodType::Passwordless,
                )
            }),
            EventReducer::new(EventType::HumanPasswordlessTokenRemoved, |event| {
                reduce_token_removed(
                    event,
                    EventType::HumanPasswordlessTokenRemoved,
                    UserAuthMethodType::Passwordless,
                )
            }),
            EventReducer::new(EventType::UserRemoved, reduce_user_removed),
        ];
        reducers.extend(cascade::reducers(tables()));
        reducers
    }
}

fn tables() -> Vec<Table> {
    vec![
        Table::new(
            AUTH_METHOD_TABLE,
            vec![
                ColumnDef::new("token_id", ColumnType::Text),
                ColumnDef::new("creation_date", ColumnType::Timestamp),
                ColumnDef::new("change_date", ColumnType::Timestamp),
                ColumnDef::new("resource_owner", ColumnType::Text),
                ColumnDef::new(TENANT, ColumnType::Text),
                ColumnDef::new("user_id", ColumnType::Text),
                ColumnDef::new("sequence", ColumnType::Int64),
                ColumnDef::new("name", ColumnType::Text),
                ColumnDef::new("state", ColumnType::Int64),
                ColumnDef::new("method_type", ColumnType::Int64),
                ColumnDef::new("owner_removed", ColumnType::Bool).default("0"),
            ],
            vec![TENANT, "user_id", "method_type", "token_id"],
        )
        .with_index("resource_owner", vec![TENANT, "resource_owner"])
        .with_owner(OwnerColumns::default()),
    ]
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Added,
    Verified,
    Removed,
}

fn method(event: &Event, method_type: UserAuthMethodType, token_id: &str) -> Predicate {
    Predicate::tenant(TENANT, &event.instance_id)
        .and("user_id", &event.aggregate_id)
        .and("method_type", method_type)
        .and("token_id", token_id)
}

fn added(event: &Event, method_type: UserAuthMethodType, token_id: String) -> Mutation {
    Mutation::insert(
        AUTH_METHOD_TABLE,
        vec![
            Column::new("token_id", token_id),
            Column::new("creation_date", event.creation_date),
            Column::new("change_date", event.creation_date),
            Column::new("resource_owner", &event.resource_owner),
            Column::new(TENANT, &event.instance_id),
            Column::new("user_id", &event.aggregate_id),
            Column::new("sequence", event.sequence),
            Column::new("state", MfaState::NotReady),
            Column::new("method_type", method_type),
            Column::new("name", ""),
        ],
    )
}

fn verified(
    event: &Event,
    method_type: UserAuthMethodType,
    token_id: &str,
    name: Option<String>,
) -> Mutation {
    let mut columns = vec![
        Column::new("change_date", event.creation_date),
        Column::new("sequence", event.sequence),
    ];
    if let Some(name) = name {
        columns.push(Column::new("name", name));
    }
    columns.push(Column::new("state", MfaState::Ready));
    Mutation::update(
        AUTH_METHOD_TABLE,
        columns,
        method(event, method_type, token_id),
    )
}

fn reduce_otp(event: &Event, expected: EventType, step: Step) -> Result<Vec<Mutation>, ReduceError> {
    event.expect_type(expected)?;
    let mutation = match step {
        Step::Added => added(event, UserAuthMethodType::Totp, OTP_TOKEN_ID.into()),
        Step::Verified => verified(event, UserAuthMethodType::Totp, OTP_TOKEN_ID, None),
        Step::Removed => Mutation::delete(
            AUTH_METHOD_TABLE,
            method(event, UserAuthMethodType::Totp, OTP_TOKEN_ID),
        ),
    };
    Ok(vec![mutation])
}

fn reduce_token_added(
    event: &Event,
    expected: EventType,
    method_type: UserAuthMethodType,
) -> Result<Vec<Mutation>, ReduceError> {
    let payload: WebAuthnTokenAdded = event.decode(expected)?;
    Ok(vec![added(event, method_type, payload.token_id)])
}

fn reduce_token_verified(
    event: &Event,
    expected: EventType,
    method_type: UserAuthMethodType,
) -> Result<Vec<Mutation>, ReduceError> {
    let payload: WebAuthnTokenVerified = event.decode(expected)?;
    Ok(vec![verified(
        event,
        method_type,
        &payload.token_id,
        payload.token_name,
    )])
}

fn reduce_token_removed(
    event: &Event,
    expected: EventType,
    method_type: UserAuthMethodType,
) -> Result<Vec<Mutation>, ReduceError> {
    let payload: WebAuthnTokenRemoved = event.decode(expected)?;
    Ok(vec![Mutation::delete(
        AUTH_METHOD_TABLE,
        method(event, method_type, &payload.token_id),
    )])
}

fn reduce_user_removed(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    event.expect_type(EventType::UserRemoved)?;
    Ok(vec![Mutation::delete(
        AUTH_METHOD_TABLE,
        Predicate::tenant(TENANT, &event.instance_id).and("user_id", &event.aggregate_id),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AggregateType;
    use crate::testing::{base_event, creation_date, test_event};

    fn reduce(event_type: EventType, payload: &str) -> Vec<Mutation> {
        let reducers = UserAuthMethodProjection.reducers();
        let reducer = reducers
            .iter()
            .find(|reducer| reducer.event_type() == event_type)
            .unwrap();

        assert!(matches!(
            reducer.reduce(&base_event()),
            Err(ReduceError::InvalidArgument { .. })
        ));

        let aggregate = event_type.aggregate_type();
        reducer
            .reduce(&test_event(event_type, aggregate, payload.as_bytes()))
            .unwrap()
    }

    fn added_row(token_id: &str, method_type: UserAuthMethodType) -> Mutation {
        Mutation::insert(
            "user_auth_methods",
            vec![
                Column::new("token_id", token_id),
                Column::new("creation_date", creation_date()),
                Column::new("change_date", creation_date()),
                Column::new("resource_owner", "ro-id"),
                Column::new("instance_id", "instance-id"),
                Column::new("user_id", "agg-id"),
                Column::new("sequence", 15u64),
                Column::new("state", MfaState::NotReady),
                Column::new("method_type", method_type),
                Column::new("name", ""),
            ],
        )
    }

    fn row(token_id: &str, method_type: UserAuthMethodType) -> Predicate {
        Predicate::tenant("instance_id", "instance-id")
            .and("user_id", "agg-id")
            .and("method_type", method_type)
            .and("token_id", token_id)
    }

    #[test]
    fn otp_lifecycle() {
        assert_eq!(
            reduce(EventType::HumanOtpAdded, "{}"),
            vec![added_row("", UserAuthMethodType::Totp)]
        );
        assert_eq!(
            reduce(EventType::HumanOtpVerified, ""),
            vec![Mutation::update(
                "user_auth_methods",
                vec![
                    Column::new("change_date", creation_date()),
                    Column::new("sequence", 15u64),
                    Column::new("state", MfaState::Ready),
                ],
                row("", UserAuthMethodType::Totp),
            )]
        );
        assert_eq!(
            reduce(EventType::HumanOtpRemoved, ""),
            vec![Mutation::delete(
                "user_auth_methods",
                row("", UserAuthMethodType::Totp)
            )]
        );
    }

    #[test]
    fn webauthn_token_lifecycle() {
        for (added, verified, removed, method_type) in [
            (
                EventType::HumanU2fTokenAdded,
                EventType::HumanU2fTokenVerified,
                EventType::HumanU2fTokenRemoved,
                UserAuthMethodType::U2f,
            ),
            (
                EventType::HumanPasswordlessTokenAdded,
                EventType::HumanPasswordlessTokenVerified,
                EventType::HumanPasswordlessTokenRemoved,
                UserAuthMethodType::Passwordless,
            ),
        ] {
            assert_eq!(
                reduce(added, r#"{"webAuthNTokenId": "token-id"}"#),
                vec![added_row("token-id", method_type)]
            );
            assert_eq!(
                reduce(
                    verified,
                    r#"{"webAuthNTokenId": "token-id", "webAuthNTokenName": "key"}"#
                ),
                vec![Mutation::update(
                    "user_auth_methods",
                    vec![
                        Column::new("change_date", creation_date()),
                        Column::new("sequence", 15u64),
                        Column::new("name", "key"),
                        Column::new("state", MfaState::Ready),
                    ],
                    row("token-id", method_type),
                )]
            );
            assert_eq!(
                reduce(removed, r#"{"webAuthNTokenId": "token-id"}"#),
                vec![Mutation::delete(
                    "user_auth_methods",
                    row("token-id", method_type)
                )]
            );
        }
    }

    #[test]
    fn user_removed_deletes_all_methods() {
        assert_eq!(
            reduce(EventType::UserRemoved, ""),
            vec![Mutation::delete(
                "user_auth_methods",
                Predicate::tenant("instance_id", "instance-id").and("user_id", "agg-id"),
            )]
        );
    }

    #[test]
    fn token_events_require_token_id() {
        let event = test_event(EventType::HumanU2fTokenAdded, AggregateType::User, b"{}");

        let err = reduce_token_added(&event, EventType::HumanU2fTokenAdded, UserAuthMethodType::U2f)
            .unwrap_err();

        assert!(matches!(err, ReduceError::MalformedEvent { .. }));
    }

    #[test]
    fn org_removal_flags_owned_methods() {
        assert_eq!(
            reduce(EventType::OrgRemoved, ""),
            vec![Mutation::update(
                "user_auth_methods",
                vec![
                    Column::new("change_date", creation_date()),
                    Column::new("sequence", 15u64),
                    Column::new("owner_removed", true),
                ],
                Predicate::tenant("instance_id", "instance-id").and("resource_owner", "agg-id"),
            )]
        );
    }
}
