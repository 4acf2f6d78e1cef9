//! Applications of projects and their API and OIDC client configurations.

use crate::domain::{AppState, int_array};
use crate::event::project::{
    ApiConfigAdded, ApiConfigChanged, ApplicationAdded, ApplicationChanged, ApplicationRef,
    ClientSecretChanged, OidcConfigAdded, OidcConfigChanged,
};
use crate::event::{Event, EventType};
use crate::reducer::{EventReducer, Projection, ReduceError};
use crate::schema::{ColumnDef, ColumnType, OwnerColumns, Table};
use crate::statement::{Column, Mutation, Predicate};

use super::cascade;

/// Projection name and checkpoint key.
pub const PROJECTION_NAME: &str = "projections.apps";
/// One row per application.
pub const APP_TABLE: &str = "apps";
/// API configuration of an application, at most one.
pub const API_CONFIG_TABLE: &str = "apps_api_configs";
/// OIDC configuration of an application, at most one.
pub const OIDC_CONFIG_TABLE: &str = "apps_oidc_configs";

const TENANT: &str = "instance_id";

/// The applications projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppProjection;

impl Projection for AppProjection {
    fn name(&self) -> &'static str {
        PROJECTION_NAME
    }

    fn tables(&self) -> Vec<Table> {
        tables()
    }

    fn reducers(&self) -> Vec<EventReducer> {
        let mut reducers = vec![
            EventReducer::new(EventType::ApplicationAdded, reduce_app_added),
            EventReducer::new(EventType::ApplicationChanged, reduce_app_changed),
            EventReducer::new(EventType::ApplicationDeactivated, reduce_app_deactivated),
            EventReducer::new(EventType::ApplicationReactivated, reduce_app_reactivated),
            EventReducer::new(EventType::ApplicationRemoved, reduce_app_removed),
            EventReducer::new(EventType::ProjectRemoved, reduce_project_removed),
            EventReducer::new(EventType::ApiConfigAdded, reduce_api_config_added),
            EventReducer::new(EventType::ApiConfigChanged, reduce_api_config_changed),
            EventReducer::new(
                EventType::ApiConfigSecretChanged,
                reduce_api_config_secret_changed,
            ),
            EventReducer::new(EventType::OidcConfigAdded, reduce_oidc_config_added),
            EventReducer::new(EventType::OidcConfigChanged, reduce_oidc_config_changed),
            EventReducer::new(
                EventType::OidcConfigSecretChanged,
                reduce_oidc_config_secret_changed,
            ),
        ];
        reducers.extend(cascade::reducers(tables()));
        reducers
    }
}

fn tables() -> Vec<Table> {
    let apps = Table::new(
        APP_TABLE,
        vec![
            ColumnDef::new("id", ColumnType::Text),
            ColumnDef::new("name", ColumnType::Text),
            ColumnDef::new("project_id", ColumnType::Text),
            ColumnDef::new("creation_date", ColumnType::Timestamp),
            ColumnDef::new("change_date", ColumnType::Timestamp),
            ColumnDef::new("resource_owner", ColumnType::Text),
            ColumnDef::new(TENANT, ColumnType::Text),
            ColumnDef::new("state", ColumnType::Int64),
            ColumnDef::new("sequence", ColumnType::Int64),
            ColumnDef::new("owner_removed", ColumnType::Bool).default("0"),
        ],
        vec![TENANT, "id"],
    )
    .with_index("project_id", vec![TENANT, "project_id"])
    .with_index("resource_owner", vec![TENANT, "resource_owner"])
    .with_owner(OwnerColumns::default());

    let api = Table::new(
        API_CONFIG_TABLE,
        vec![
            ColumnDef::new("app_id", ColumnType::Text),
            ColumnDef::new(TENANT, ColumnType::Text),
            ColumnDef::new("client_id", ColumnType::Text),
            ColumnDef::new("client_secret", ColumnType::Json).nullable(),
            ColumnDef::new("auth_method", ColumnType::Int64),
        ],
        vec![TENANT, "app_id"],
    )
    .with_foreign_key(vec![TENANT, "app_id"], APP_TABLE, vec![TENANT, "id"]);

    let oidc = Table::new(
        OIDC_CONFIG_TABLE,
        vec![
            ColumnDef::new("app_id", ColumnType::Text),
            ColumnDef::new(TENANT, ColumnType::Text),
            ColumnDef::new("version", ColumnType::Int64),
            ColumnDef::new("client_id", ColumnType::Text),
            ColumnDef::new("client_secret", ColumnType::Json).nullable(),
            ColumnDef::new("redirect_uris", ColumnType::TextArray),
            ColumnDef::new("response_types", ColumnType::IntArray),
            ColumnDef::new("grant_types", ColumnType::IntArray),
            ColumnDef::new("application_type", ColumnType::Int64),
            ColumnDef::new("auth_method_type", ColumnType::Int64),
            ColumnDef::new("post_logout_redirect_uris", ColumnType::TextArray),
            ColumnDef::new("is_dev_mode", ColumnType::Bool),
            ColumnDef::new("access_token_type", ColumnType::Int64),
            ColumnDef::new("access_token_role_assertion", ColumnType::Bool),
            ColumnDef::new("id_token_role_assertion", ColumnType::Bool),
            ColumnDef::new("id_token_userinfo_assertion", ColumnType::Bool),
            ColumnDef::new("clock_skew", ColumnType::Interval),
            ColumnDef::new("additional_origins", ColumnType::TextArray),
            ColumnDef::new("skip_native_app_success_page", ColumnType::Bool),
        ],
        vec![TENANT, "app_id"],
    )
    .with_foreign_key(vec![TENANT, "app_id"], APP_TABLE, vec![TENANT, "id"]);

    vec![apps, api, oidc]
}

fn app(event: &Event, app_id: &str) -> Predicate {
    Predicate::tenant(TENANT, &event.instance_id).and("id", app_id)
}

fn config(event: &Event, app_id: &str) -> Predicate {
    Predicate::tenant(TENANT, &event.instance_id).and("app_id", app_id)
}

// Every config change also bumps the owning application.
fn touch_app(event: &Event, app_id: &str) -> Mutation {
    Mutation::update(
        APP_TABLE,
        vec![
            Column::new("change_date", event.creation_date),
            Column::new("sequence", event.sequence),
        ],
        app(event, app_id),
    )
}

fn set_state(
    event: &Event,
    expected: EventType,
    state: AppState,
) -> Result<Vec<Mutation>, ReduceError> {
    let payload: ApplicationRef = event.decode(expected)?;
    Ok(vec![Mutation::update(
        APP_TABLE,
        vec![
            Column::new("state", state),
            Column::new("change_date", event.creation_date),
            Column::new("sequence", event.sequence),
        ],
        app(event, &payload.app_id),
    )])
}

fn reduce_app_added(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    let payload: ApplicationAdded = event.decode(EventType::ApplicationAdded)?;
    Ok(vec![Mutation::insert(
        APP_TABLE,
        vec![
            Column::new("id", payload.app_id),
            Column::new("name", payload.name),
            Column::new("project_id", &event.aggregate_id),
            Column::new("creation_date", event.creation_date),
            Column::new("change_date", event.creation_date),
            Column::new("resource_owner", &event.resource_owner),
            Column::new(TENANT, &event.instance_id),
            Column::new("state", AppState::Active),
            Column::new("sequence", event.sequence),
        ],
    )])
}

fn reduce_app_changed(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    let payload: ApplicationChanged = event.decode(EventType::ApplicationChanged)?;
    let Some(name) = payload.name else {
        return Ok(Vec::new());
    };
    Ok(vec![Mutation::update(
        APP_TABLE,
        vec![
            Column::new("name", name),
            Column::new("change_date", event.creation_date),
            Column::new("sequence", event.sequence),
        ],
        app(event, &payload.app_id),
    )])
}

fn reduce_app_deactivated(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    set_state(event, EventType::ApplicationDeactivated, AppState::Inactive)
}

fn reduce_app_reactivated(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    set_state(event, EventType::ApplicationReactivated, AppState::Active)
}

fn reduce_app_removed(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    let payload: ApplicationRef = event.decode(EventType::ApplicationRemoved)?;
    Ok(vec![Mutation::delete(
        APP_TABLE,
        app(event, &payload.app_id),
    )])
}

fn reduce_project_removed(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    event.expect_type(EventType::ProjectRemoved)?;
    Ok(vec![Mutation::delete(
        APP_TABLE,
        Predicate::tenant(TENANT, &event.instance_id).and("project_id", &event.aggregate_id),
    )])
}

fn reduce_api_config_added(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    let payload: ApiConfigAdded = event.decode(EventType::ApiConfigAdded)?;
    Ok(vec![
        Mutation::insert(
            API_CONFIG_TABLE,
            vec![
                Column::new("app_id", &payload.app_id),
                Column::new(TENANT, &event.instance_id),
                Column::new("client_id", payload.client_id),
                Column::new("client_secret", payload.client_secret),
                Column::new("auth_method", payload.auth_method_type),
            ],
        ),
        touch_app(event, &payload.app_id),
    ])
}

fn reduce_api_config_changed(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    let payload: ApiConfigChanged = event.decode(EventType::ApiConfigChanged)?;
    let mut columns = Vec::with_capacity(2);
    if let Some(secret) = payload.client_secret {
        columns.push(Column::new("client_secret", secret));
    }
    if let Some(method) = payload.auth_method_type {
        columns.push(Column::new("auth_method", method));
    }
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![
        Mutation::update(API_CONFIG_TABLE, columns, config(event, &payload.app_id)),
        touch_app(event, &payload.app_id),
    ])
}

fn reduce_api_config_secret_changed(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    let payload: ClientSecretChanged = event.decode(EventType::ApiConfigSecretChanged)?;
    Ok(vec![
        Mutation::update(
            API_CONFIG_TABLE,
            vec![Column::new("client_secret", payload.client_secret)],
            config(event, &payload.app_id),
        ),
        touch_app(event, &payload.app_id),
    ])
}

fn reduce_oidc_config_added(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    let payload: OidcConfigAdded = event.decode(EventType::OidcConfigAdded)?;
    Ok(vec![
        Mutation::insert(
            OIDC_CONFIG_TABLE,
            vec![
                Column::new("app_id", &payload.app_id),
                Column::new(TENANT, &event.instance_id),
                Column::new("version", payload.oidc_version),
                Column::new("client_id", payload.client_id),
                Column::new("client_secret", payload.client_secret),
                Column::new("redirect_uris", payload.redirect_uris),
                Column::new("response_types", int_array(&payload.response_types)),
                Column::new("grant_types", int_array(&payload.grant_types)),
                Column::new("application_type", payload.application_type),
                Column::new("auth_method_type", payload.auth_method_type),
                Column::new(
                    "post_logout_redirect_uris",
                    payload.post_logout_redirect_uris,
                ),
                Column::new("is_dev_mode", payload.dev_mode),
                Column::new("access_token_type", payload.access_token_type),
                Column::new(
                    "access_token_role_assertion",
                    payload.access_token_role_assertion,
                ),
                Column::new("id_token_role_assertion", payload.id_token_role_assertion),
                Column::new(
                    "id_token_userinfo_assertion",
                    payload.id_token_userinfo_assertion,
                ),
                Column::new("clock_skew", payload.clock_skew),
                Column::new("additional_origins", payload.additional_origins),
                Column::new(
                    "skip_native_app_success_page",
                    payload.skip_native_app_success_page,
                ),
            ],
        ),
        touch_app(event, &payload.app_id),
    ])
}

fn reduce_oidc_config_changed(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    let payload: OidcConfigChanged = event.decode(EventType::OidcConfigChanged)?;
    let mut columns = Vec::new();
    if let Some(version) = payload.oidc_version {
        columns.push(Column::new("version", version));
    }
    if let Some(uris) = payload.redirect_uris {
        columns.push(Column::new("redirect_uris", uris));
    }
    if let Some(types) = payload.response_types {
        columns.push(Column::new("response_types", int_array(&types)));
    }
    if let Some(types) = payload.grant_types {
        columns.push(Column::new("grant_types", int_array(&types)));
    }
    if let Some(kind) = payload.application_type {
        columns.push(Column::new("application_type", kind));
    }
    if let Some(method) = payload.auth_method_type {
        columns.push(Column::new("auth_method_type", method));
    }
    if let Some(uris) = payload.post_logout_redirect_uris {
        columns.push(Column::new("post_logout_redirect_uris", uris));
    }
    if let Some(dev_mode) = payload.dev_mode {
        columns.push(Column::new("is_dev_mode", dev_mode));
    }
    if let Some(kind) = payload.access_token_type {
        columns.push(Column::new("access_token_type", kind));
    }
    if let Some(assert) = payload.access_token_role_assertion {
        columns.push(Column::new("access_token_role_assertion", assert));
    }
    if let Some(assert) = payload.id_token_role_assertion {
        columns.push(Column::new("id_token_role_assertion", assert));
    }
    if let Some(assert) = payload.id_token_userinfo_assertion {
        columns.push(Column::new("id_token_userinfo_assertion", assert));
    }
    if let Some(skew) = payload.clock_skew {
        columns.push(Column::new("clock_skew", skew));
    }
    if let Some(origins) = payload.additional_origins {
        columns.push(Column::new("additional_origins", origins));
    }
    if let Some(skip) = payload.skip_native_app_success_page {
        columns.push(Column::new("skip_native_app_success_page", skip));
    }
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![
        Mutation::update(OIDC_CONFIG_TABLE, columns, config(event, &payload.app_id)),
        touch_app(event, &payload.app_id),
    ])
}

fn reduce_oidc_config_secret_changed(event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    let payload: ClientSecretChanged = event.decode(EventType::OidcConfigSecretChanged)?;
    Ok(vec![
        Mutation::update(
            OIDC_CONFIG_TABLE,
            vec![Column::new("client_secret", payload.client_secret)],
            config(event, &payload.app_id),
        ),
        touch_app(event, &payload.app_id),
    ])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::domain::{
        ApiAuthMethodType, OidcApplicationType, OidcAuthMethodType, OidcTokenType, OidcVersion,
    };
    use crate::event::AggregateType;
    use crate::statement::Value;
    use crate::testing::{base_event, creation_date, test_event};

    struct Case {
        name: &'static str,
        event_type: EventType,
        aggregate_type: AggregateType,
        payload: &'static str,
        want: Vec<Mutation>,
    }

    fn app_predicate() -> Predicate {
        Predicate::tenant("instance_id", "instance-id").and("id", "app-id")
    }

    fn config_predicate() -> Predicate {
        Predicate::tenant("instance_id", "instance-id").and("app_id", "app-id")
    }

    fn touch() -> Mutation {
        Mutation::update(
            "apps",
            vec![
                Column::new("change_date", creation_date()),
                Column::new("sequence", 15u64),
            ],
            app_predicate(),
        )
    }

    fn oidc_payload() -> &'static str {
        r#"{
            "oidcVersion": 0,
            "appId": "app-id",
            "clientId": "client-id",
            "clientSecret": {},
            "redirectUris": ["redirect.one.ch", "redirect.two.ch"],
            "responseTypes": [1, 2],
            "grantTypes": [1, 2],
            "applicationType": 2,
            "authMethodType": 2,
            "postLogoutRedirectUris": ["logout.one.ch", "logout.two.ch"],
            "devMode": true,
            "accessTokenType": 1,
            "accessTokenRoleAssertion": true,
            "idTokenRoleAssertion": true,
            "idTokenUserinfoAssertion": true,
            "clockSkew": 1000,
            "additionalOrigins": ["origin.one.ch", "origin.two.ch"],
            "skipNativeAppSuccessPage": true
        }"#
    }

    fn strings(values: &[&str]) -> Value {
        Value::TextArray(values.iter().map(ToString::to_string).collect())
    }

    #[allow(clippy::too_many_lines)]
    fn cases() -> Vec<Case> {
        vec![
            Case {
                name: "application added",
                event_type: EventType::ApplicationAdded,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id", "name": "my-app"}"#,
                want: vec![Mutation::insert(
                    "apps",
                    vec![
                        Column::new("id", "app-id"),
                        Column::new("name", "my-app"),
                        Column::new("project_id", "agg-id"),
                        Column::new("creation_date", creation_date()),
                        Column::new("change_date", creation_date()),
                        Column::new("resource_owner", "ro-id"),
                        Column::new("instance_id", "instance-id"),
                        Column::new("state", AppState::Active),
                        Column::new("sequence", 15u64),
                    ],
                )],
            },
            Case {
                name: "application changed",
                event_type: EventType::ApplicationChanged,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id", "name": "my-app"}"#,
                want: vec![Mutation::update(
                    "apps",
                    vec![
                        Column::new("name", "my-app"),
                        Column::new("change_date", creation_date()),
                        Column::new("sequence", 15u64),
                    ],
                    app_predicate(),
                )],
            },
            Case {
                name: "application changed without name",
                event_type: EventType::ApplicationChanged,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id"}"#,
                want: vec![],
            },
            Case {
                name: "application deactivated",
                event_type: EventType::ApplicationDeactivated,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id"}"#,
                want: vec![Mutation::update(
                    "apps",
                    vec![
                        Column::new("state", AppState::Inactive),
                        Column::new("change_date", creation_date()),
                        Column::new("sequence", 15u64),
                    ],
                    app_predicate(),
                )],
            },
            Case {
                name: "application reactivated",
                event_type: EventType::ApplicationReactivated,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id"}"#,
                want: vec![Mutation::update(
                    "apps",
                    vec![
                        Column::new("state", AppState::Active),
                        Column::new("change_date", creation_date()),
                        Column::new("sequence", 15u64),
                    ],
                    app_predicate(),
                )],
            },
            Case {
                name: "application removed",
                event_type: EventType::ApplicationRemoved,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id"}"#,
                want: vec![Mutation::delete("apps", app_predicate())],
            },
            Case {
                name: "project removed",
                event_type: EventType::ProjectRemoved,
                aggregate_type: AggregateType::Project,
                payload: "{}",
                want: vec![Mutation::delete(
                    "apps",
                    Predicate::tenant("instance_id", "instance-id").and("project_id", "agg-id"),
                )],
            },
            Case {
                name: "api config added",
                event_type: EventType::ApiConfigAdded,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id", "clientId": "client-id", "clientSecret": {}, "authMethodType": 1}"#,
                want: vec![
                    Mutation::insert(
                        "apps_api_configs",
                        vec![
                            Column::new("app_id", "app-id"),
                            Column::new("instance_id", "instance-id"),
                            Column::new("client_id", "client-id"),
                            Column::new("client_secret", json!({})),
                            Column::new("auth_method", ApiAuthMethodType::PrivateKeyJwt),
                        ],
                    ),
                    touch(),
                ],
            },
            Case {
                name: "api config changed",
                event_type: EventType::ApiConfigChanged,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id", "clientId": "client-id", "clientSecret": {}, "authMethodType": 1}"#,
                want: vec![
                    Mutation::update(
                        "apps_api_configs",
                        vec![
                            Column::new("client_secret", json!({})),
                            Column::new("auth_method", ApiAuthMethodType::PrivateKeyJwt),
                        ],
                        config_predicate(),
                    ),
                    touch(),
                ],
            },
            Case {
                name: "api config changed without changes",
                event_type: EventType::ApiConfigChanged,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id"}"#,
                want: vec![],
            },
            Case {
                name: "api config secret changed",
                event_type: EventType::ApiConfigSecretChanged,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id", "client_secret": {}}"#,
                want: vec![
                    Mutation::update(
                        "apps_api_configs",
                        vec![Column::new("client_secret", json!({}))],
                        config_predicate(),
                    ),
                    touch(),
                ],
            },
            Case {
                name: "oidc config added",
                event_type: EventType::OidcConfigAdded,
                aggregate_type: AggregateType::Project,
                payload: oidc_payload(),
                want: vec![
                    Mutation::insert(
                        "apps_oidc_configs",
                        vec![
                            Column::new("app_id", "app-id"),
                            Column::new("instance_id", "instance-id"),
                            Column::new("version", OidcVersion::V1),
                            Column::new("client_id", "client-id"),
                            Column::new("client_secret", json!({})),
                            Column::new(
                                "redirect_uris",
                                strings(&["redirect.one.ch", "redirect.two.ch"]),
                            ),
                            Column::new("response_types", vec![1i64, 2]),
                            Column::new("grant_types", vec![1i64, 2]),
                            Column::new("application_type", OidcApplicationType::Native),
                            Column::new("auth_method_type", OidcAuthMethodType::None),
                            Column::new(
                                "post_logout_redirect_uris",
                                strings(&["logout.one.ch", "logout.two.ch"]),
                            ),
                            Column::new("is_dev_mode", true),
                            Column::new("access_token_type", OidcTokenType::Jwt),
                            Column::new("access_token_role_assertion", true),
                            Column::new("id_token_role_assertion", true),
                            Column::new("id_token_userinfo_assertion", true),
                            Column::new("clock_skew", Duration::from_micros(1)),
                            Column::new(
                                "additional_origins",
                                strings(&["origin.one.ch", "origin.two.ch"]),
                            ),
                            Column::new("skip_native_app_success_page", true),
                        ],
                    ),
                    touch(),
                ],
            },
            Case {
                name: "oidc config changed",
                event_type: EventType::OidcConfigChanged,
                aggregate_type: AggregateType::Project,
                payload: oidc_payload(),
                want: vec![
                    Mutation::update(
                        "apps_oidc_configs",
                        vec![
                            Column::new("version", OidcVersion::V1),
                            Column::new(
                                "redirect_uris",
                                strings(&["redirect.one.ch", "redirect.two.ch"]),
                            ),
                            Column::new("response_types", vec![1i64, 2]),
                            Column::new("grant_types", vec![1i64, 2]),
                            Column::new("application_type", OidcApplicationType::Native),
                            Column::new("auth_method_type", OidcAuthMethodType::None),
                            Column::new(
                                "post_logout_redirect_uris",
                                strings(&["logout.one.ch", "logout.two.ch"]),
                            ),
                            Column::new("is_dev_mode", true),
                            Column::new("access_token_type", OidcTokenType::Jwt),
                            Column::new("access_token_role_assertion", true),
                            Column::new("id_token_role_assertion", true),
                            Column::new("id_token_userinfo_assertion", true),
                            Column::new("clock_skew", Duration::from_micros(1)),
                            Column::new(
                                "additional_origins",
                                strings(&["origin.one.ch", "origin.two.ch"]),
                            ),
                            Column::new("skip_native_app_success_page", true),
                        ],
                        config_predicate(),
                    ),
                    touch(),
                ],
            },
            Case {
                name: "oidc config changed without changes",
                event_type: EventType::OidcConfigChanged,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id"}"#,
                want: vec![],
            },
            Case {
                name: "oidc config secret changed",
                event_type: EventType::OidcConfigSecretChanged,
                aggregate_type: AggregateType::Project,
                payload: r#"{"appId": "app-id", "client_secret": {}}"#,
                want: vec![
                    Mutation::update(
                        "apps_oidc_configs",
                        vec![Column::new("client_secret", json!({}))],
                        config_predicate(),
                    ),
                    touch(),
                ],
            },
            Case {
                name: "org removed",
                event_type: EventType::OrgRemoved,
                aggregate_type: AggregateType::Org,
                payload: "",
                want: vec![Mutation::update(
                    "apps",
                    vec![
                        Column::new("change_date", creation_date()),
                        Column::new("sequence", 15u64),
                        Column::new("owner_removed", true),
                    ],
                    Predicate::tenant("instance_id", "instance-id")
                        .and("resource_owner", "agg-id"),
                )],
            },
            Case {
                name: "instance removed",
                event_type: EventType::InstanceRemoved,
                aggregate_type: AggregateType::Instance,
                payload: "",
                want: vec![
                    Mutation::delete(
                        "apps_oidc_configs",
                        Predicate::tenant("instance_id", "instance-id"),
                    ),
                    Mutation::delete(
                        "apps_api_configs",
                        Predicate::tenant("instance_id", "instance-id"),
                    ),
                    Mutation::delete("apps", Predicate::tenant("instance_id", "instance-id")),
                ],
            },
        ]
    }

    #[test]
    fn reduces() {
        let reducers = AppProjection.reducers();

        for case in cases() {
            let reducer = reducers
                .iter()
                .find(|reducer| reducer.event_type() == case.event_type)
                .unwrap_or_else(|| panic!("{}: no reducer", case.name));

            let err = reducer.reduce(&base_event()).unwrap_err();
            assert!(
                matches!(err, ReduceError::InvalidArgument { .. }),
                "{}: wrong event type accepted: {err}",
                case.name
            );

            let event = test_event(case.event_type, case.aggregate_type, case.payload.as_bytes());
            let got = reducer.reduce(&event).unwrap();
            assert_eq!(got, case.want, "{}", case.name);
        }
    }

    #[test]
    fn every_handled_type_has_a_case() {
        let covered: Vec<EventType> = cases().iter().map(|case| case.event_type).collect();
        for reducer in AppProjection.reducers() {
            assert!(
                covered.contains(&reducer.event_type()),
                "{} has no golden case",
                reducer.event_type()
            );
        }
    }

    #[test]
    fn malformed_payload_is_not_invalid_argument() {
        let event = test_event(
            EventType::ApplicationAdded,
            AggregateType::Project,
            br#"{"appId": "app-id", "name": 3}"#,
        );

        let err = reduce_app_added(&event).unwrap_err();

        assert!(matches!(
            err,
            ReduceError::MalformedEvent {
                event_type: EventType::ApplicationAdded,
                ..
            }
        ));
    }

    #[test]
    fn config_tables_reference_apps() {
        let tables = AppProjection.tables();
        assert_eq!(tables[0].name, APP_TABLE);
        for child in &tables[1..] {
            assert_eq!(child.foreign_keys[0].references, APP_TABLE);
            assert!(child.owner.is_none());
        }
    }
}
