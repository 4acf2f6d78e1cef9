//! Read-side queries over the projection tables.
//!
//! Every query is scoped to one instance and hides rows whose owning
//! organisation was removed.

// SQLite stores sequences as i64; event sequences never exceed i64::MAX.
#![allow(clippy::cast_sign_loss)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::de::DeserializeOwned;

use crate::db::{Database, decode_timestamp};
use crate::domain::{
    ApiAuthMethodType, AppState, MfaState, OidcApplicationType, OidcAuthMethodType,
    OidcGrantType, OidcResponseType, OidcTokenType, OidcVersion, UnknownVariant,
    UserAuthMethodType,
};
use crate::error::StorageError;
use crate::projection::app::{API_CONFIG_TABLE, APP_TABLE, OIDC_CONFIG_TABLE};
use crate::projection::user_auth_method::AUTH_METHOD_TABLE;

fn enum_value<T>(table: &str, raw: i64) -> Result<T, StorageError>
where
    T: TryFrom<i64, Error = UnknownVariant>,
{
    T::try_from(raw).map_err(|e| StorageError::corrupt(table, e.to_string()))
}

fn json_array<T: DeserializeOwned>(table: &str, raw: &str) -> Result<Vec<T>, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::corrupt(table, format!("invalid array {raw:?}: {e}")))
}

// ============================================================================
// Applications
// ============================================================================

/// An application with its client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    /// Application id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning project.
    pub project_id: String,
    /// When the application was added.
    pub creation_date: DateTime<Utc>,
    /// Last change to the application or its configuration.
    pub change_date: DateTime<Utc>,
    /// Owning organisation.
    pub resource_owner: String,
    /// Lifecycle state.
    pub state: AppState,
    /// Sequence of the last applied event.
    pub sequence: u64,
    /// Client configuration, if one was added.
    pub config: Option<AppConfig>,
}

/// Client configuration of an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppConfig {
    /// API client.
    Api(ApiConfig),
    /// OIDC client.
    Oidc(Box<OidcConfig>),
}

/// API client configuration. The secret is never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// OAuth client id.
    pub client_id: String,
    /// Client authentication method.
    pub auth_method_type: ApiAuthMethodType,
}

/// OIDC client configuration. The secret is never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcConfig {
    /// Configuration version.
    pub version: OidcVersion,
    /// OAuth client id.
    pub client_id: String,
    /// Allowed redirect URIs.
    pub redirect_uris: Vec<String>,
    /// Allowed response types.
    pub response_types: Vec<OidcResponseType>,
    /// Allowed grant types.
    pub grant_types: Vec<OidcGrantType>,
    /// Client application type.
    pub application_type: OidcApplicationType,
    /// Client authentication method.
    pub auth_method_type: OidcAuthMethodType,
    /// Allowed post-logout redirect URIs.
    pub post_logout_redirect_uris: Vec<String>,
    /// Relaxed redirect URI validation.
    pub dev_mode: bool,
    /// Access token format.
    pub access_token_type: OidcTokenType,
    /// Roles in the access token.
    pub access_token_role_assertion: bool,
    /// Roles in the id token.
    pub id_token_role_assertion: bool,
    /// Userinfo claims in the id token.
    pub id_token_userinfo_assertion: bool,
    /// Tolerated clock skew.
    pub clock_skew: Duration,
    /// Additional allowed CORS origins.
    pub additional_origins: Vec<String>,
    /// Skip the success page after native app login.
    pub skip_native_app_success_page: bool,
}

const APP_SELECT: &str = "
SELECT a.id, a.name, a.project_id, a.creation_date, a.change_date, a.resource_owner,
       a.state, a.sequence,
       api.client_id, api.auth_method,
       oidc.client_id, oidc.version, oidc.redirect_uris, oidc.response_types,
       oidc.grant_types, oidc.application_type, oidc.auth_method_type,
       oidc.post_logout_redirect_uris, oidc.is_dev_mode, oidc.access_token_type,
       oidc.access_token_role_assertion, oidc.id_token_role_assertion,
       oidc.id_token_userinfo_assertion, oidc.clock_skew, oidc.additional_origins,
       oidc.skip_native_app_success_page
FROM apps a
LEFT JOIN apps_api_configs api ON api.instance_id = a.instance_id AND api.app_id = a.id
LEFT JOIN apps_oidc_configs oidc ON oidc.instance_id = a.instance_id AND oidc.app_id = a.id
WHERE a.instance_id = ?1 AND a.owner_removed = 0";

/// Columns as stored; decoded by [`AppRow::decode`].
struct AppRow {
    id: String,
    name: String,
    project_id: String,
    creation_date: String,
    change_date: String,
    resource_owner: String,
    state: i64,
    sequence: i64,
    api: Option<(String, i64)>,
    oidc: Option<OidcRow>,
}

struct OidcRow {
    client_id: String,
    version: i64,
    redirect_uris: String,
    response_types: String,
    grant_types: String,
    application_type: i64,
    auth_method_type: i64,
    post_logout_redirect_uris: String,
    dev_mode: bool,
    access_token_type: i64,
    access_token_role_assertion: bool,
    id_token_role_assertion: bool,
    id_token_userinfo_assertion: bool,
    clock_skew: i64,
    additional_origins: String,
    skip_native_app_success_page: bool,
}

impl AppRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        let api = match row.get::<_, Option<String>>(8)? {
            Some(client_id) => Some((client_id, row.get(9)?)),
            None => None,
        };
        let oidc = match row.get::<_, Option<String>>(10)? {
            Some(client_id) => Some(OidcRow {
                client_id,
                version: row.get(11)?,
                redirect_uris: row.get(12)?,
                response_types: row.get(13)?,
                grant_types: row.get(14)?,
                application_type: row.get(15)?,
                auth_method_type: row.get(16)?,
                post_logout_redirect_uris: row.get(17)?,
                dev_mode: row.get(18)?,
                access_token_type: row.get(19)?,
                access_token_role_assertion: row.get(20)?,
                id_token_role_assertion: row.get(21)?,
                id_token_userinfo_assertion: row.get(22)?,
                clock_skew: row.get(23)?,
                additional_origins: row.get(24)?,
                skip_native_app_success_page: row.get(25)?,
            }),
            None => None,
        };

        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            project_id: row.get(2)?,
            creation_date: row.get(3)?,
            change_date: row.get(4)?,
            resource_owner: row.get(5)?,
            state: row.get(6)?,
            sequence: row.get(7)?,
            api,
            oidc,
        })
    }

    fn decode(self) -> Result<App, StorageError> {
        let config = match (self.api, self.oidc) {
            (Some((client_id, auth_method)), _) => Some(AppConfig::Api(ApiConfig {
                client_id,
                auth_method_type: enum_value(API_CONFIG_TABLE, auth_method)?,
            })),
            (None, Some(oidc)) => Some(AppConfig::Oidc(Box::new(oidc.decode()?))),
            (None, None) => None,
        };

        Ok(App {
            id: self.id,
            name: self.name,
            project_id: self.project_id,
            creation_date: decode_timestamp(APP_TABLE, &self.creation_date)?,
            change_date: decode_timestamp(APP_TABLE, &self.change_date)?,
            resource_owner: self.resource_owner,
            state: enum_value(APP_TABLE, self.state)?,
            sequence: self.sequence as u64,
            config,
        })
    }
}

impl OidcRow {
    fn decode(self) -> Result<OidcConfig, StorageError> {
        let table = OIDC_CONFIG_TABLE;
        Ok(OidcConfig {
            version: enum_value(table, self.version)?,
            client_id: self.client_id,
            redirect_uris: json_array(table, &self.redirect_uris)?,
            response_types: json_array(table, &self.response_types)?,
            grant_types: json_array(table, &self.grant_types)?,
            application_type: enum_value(table, self.application_type)?,
            auth_method_type: enum_value(table, self.auth_method_type)?,
            post_logout_redirect_uris: json_array(table, &self.post_logout_redirect_uris)?,
            dev_mode: self.dev_mode,
            access_token_type: enum_value(table, self.access_token_type)?,
            access_token_role_assertion: self.access_token_role_assertion,
            id_token_role_assertion: self.id_token_role_assertion,
            id_token_userinfo_assertion: self.id_token_userinfo_assertion,
            clock_skew: Duration::from_nanos(self.clock_skew.max(0) as u64),
            additional_origins: json_array(table, &self.additional_origins)?,
            skip_native_app_success_page: self.skip_native_app_success_page,
        })
    }
}

/// Queries over the applications projection.
#[derive(Debug, Clone)]
pub struct AppQueries {
    db: Database,
}

impl AppQueries {
    /// Creates the queries over `db`.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Looks up one application.
    pub async fn app_by_id(
        &self,
        instance_id: &str,
        app_id: &str,
    ) -> Result<Option<App>, StorageError> {
        let instance_id = instance_id.to_owned();
        let app_id = app_id.to_owned();
        self.db
            .run(move |conn| {
                conn.prepare_cached(&format!("{APP_SELECT} AND a.id = ?2"))?
                    .query_row(params![instance_id, app_id], AppRow::read)
                    .optional()?
                    .map(AppRow::decode)
                    .transpose()
            })
            .await
    }

    /// Applications of a project, ordered by name.
    pub async fn apps_by_project(
        &self,
        instance_id: &str,
        project_id: &str,
    ) -> Result<Vec<App>, StorageError> {
        let instance_id = instance_id.to_owned();
        let project_id = project_id.to_owned();
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "{APP_SELECT} AND a.project_id = ?2 ORDER BY a.name, a.id"
                ))?;
                let rows = stmt
                    .query_map(params![instance_id, project_id], AppRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(AppRow::decode).collect()
            })
            .await
    }
}

// ============================================================================
// User authentication methods
// ============================================================================

/// One second factor or passwordless token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMethod {
    /// Token id, empty for OTP.
    pub token_id: String,
    /// When enrolment started.
    pub creation_date: DateTime<Utc>,
    /// Last change.
    pub change_date: DateTime<Utc>,
    /// Owning organisation.
    pub resource_owner: String,
    /// Owning user.
    pub user_id: String,
    /// Sequence of the last applied event.
    pub sequence: u64,
    /// Token name given at verification.
    pub name: String,
    /// Enrolment state.
    pub state: MfaState,
    /// Method kind.
    pub method_type: UserAuthMethodType,
}

/// Result of [`AuthMethodQueries::user_auth_methods`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthMethods {
    /// Number of methods returned.
    pub count: u64,
    /// Methods, oldest first.
    pub methods: Vec<AuthMethod>,
}

/// Queries over the user authentication methods projection.
#[derive(Debug, Clone)]
pub struct AuthMethodQueries {
    db: Database,
}

impl AuthMethodQueries {
    /// Creates the queries over `db`.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Methods of a user, optionally restricted to one kind.
    pub async fn user_auth_methods(
        &self,
        instance_id: &str,
        user_id: &str,
        method_type: Option<UserAuthMethodType>,
    ) -> Result<AuthMethods, StorageError> {
        let instance_id = instance_id.to_owned();
        let user_id = user_id.to_owned();
        let method_type = method_type.map(i64::from);
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT token_id, creation_date, change_date, resource_owner, user_id,
                            sequence, name, state, method_type
                     FROM user_auth_methods
                     WHERE instance_id = ?1 AND user_id = ?2 AND owner_removed = 0
                       AND (?3 IS NULL OR method_type = ?3)
                     ORDER BY creation_date, method_type, token_id",
                )?;
                let rows = stmt
                    .query_map(params![instance_id, user_id, method_type], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, i64>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, i64>(7)?,
                            row.get::<_, i64>(8)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let methods = rows
                    .into_iter()
                    .map(
                        |(token_id, created, changed, owner, user_id, sequence, name, state, kind)| {
                            Ok(AuthMethod {
                                token_id,
                                creation_date: decode_timestamp(AUTH_METHOD_TABLE, &created)?,
                                change_date: decode_timestamp(AUTH_METHOD_TABLE, &changed)?,
                                resource_owner: owner,
                                user_id,
                                sequence: sequence as u64,
                                name,
                                state: enum_value(AUTH_METHOD_TABLE, state)?,
                                method_type: enum_value(AUTH_METHOD_TABLE, kind)?,
                            })
                        },
                    )
                    .collect::<Result<Vec<_>, StorageError>>()?;

                Ok(AuthMethods {
                    count: methods.len() as u64,
                    methods,
                })
            })
            .await
    }

    /// Kinds of method the user has completed enrolment for, ascending.
    pub async fn active_auth_method_types(
        &self,
        instance_id: &str,
        user_id: &str,
    ) -> Result<Vec<UserAuthMethodType>, StorageError> {
        let instance_id = instance_id.to_owned();
        let user_id = user_id.to_owned();
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT DISTINCT method_type FROM user_auth_methods
                     WHERE instance_id = ?1 AND user_id = ?2 AND owner_removed = 0 AND state = ?3
                     ORDER BY method_type",
                )?;
                let kinds = stmt
                    .query_map(
                        params![instance_id, user_id, i64::from(MfaState::Ready)],
                        |row| row.get::<_, i64>(0),
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                kinds
                    .into_iter()
                    .map(|kind| enum_value(AUTH_METHOD_TABLE, kind))
                    .collect()
            })
            .await
    }
}
