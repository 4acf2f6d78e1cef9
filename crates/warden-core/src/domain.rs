//! Domain enumerations persisted as integers in events and projection rows.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::statement::Value;

/// An integer that does not name any variant of the target enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown {kind} value {value}")]
pub struct UnknownVariant {
    /// Enumeration name.
    pub kind: &'static str,
    /// Rejected value.
    pub value: i64,
}

/// Declares a `#[repr(i64)]`-style enum that (de)serialises as an integer
/// and binds as [`Value::Int`]. The first variant is the default.
macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(#[$first_meta:meta])*
            $first:ident = $first_value:literal,
            $( $(#[$variant_meta:meta])* $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub enum $name {
            $(#[$first_meta])*
            #[default]
            $first = $first_value,
            $( $(#[$variant_meta])* $variant = $value, )*
        }

        impl TryFrom<i64> for $name {
            type Error = UnknownVariant;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                match value {
                    $first_value => Ok(Self::$first),
                    $( $value => Ok(Self::$variant), )*
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other,
                    }),
                }
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                value as Self
            }
        }

        impl From<$name> for Value {
            fn from(value: $name) -> Self {
                Self::Int(value.into())
            }
        }
    };
}

int_enum! {
    /// Lifecycle state of an application.
    pub enum AppState {
        Unspecified = 0,
        Active = 1,
        Inactive = 2,
        Removed = 3,
    }
}

int_enum! {
    /// Client authentication method of an API application.
    pub enum ApiAuthMethodType {
        Basic = 0,
        PrivateKeyJwt = 1,
    }
}

int_enum! {
    /// OIDC configuration version.
    pub enum OidcVersion {
        V1 = 0,
    }
}

int_enum! {
    /// OAuth response type.
    pub enum OidcResponseType {
        Code = 0,
        IdToken = 1,
        IdTokenToken = 2,
    }
}

int_enum! {
    /// OAuth grant type.
    pub enum OidcGrantType {
        AuthorizationCode = 0,
        Implicit = 1,
        RefreshToken = 2,
        DeviceCode = 3,
        TokenExchange = 4,
    }
}

int_enum! {
    /// OIDC client application type.
    pub enum OidcApplicationType {
        Web = 0,
        UserAgent = 1,
        Native = 2,
    }
}

int_enum! {
    /// OIDC client authentication method.
    pub enum OidcAuthMethodType {
        Basic = 0,
        Post = 1,
        None = 2,
        PrivateKeyJwt = 3,
    }
}

int_enum! {
    /// Access token format.
    pub enum OidcTokenType {
        Bearer = 0,
        Jwt = 1,
    }
}

int_enum! {
    /// Verification state of a second factor or passwordless token.
    pub enum MfaState {
        Unspecified = 0,
        NotReady = 1,
        Ready = 2,
        Removed = 3,
    }
}

int_enum! {
    /// Kind of user authentication method.
    pub enum UserAuthMethodType {
        Unspecified = 0,
        Totp = 1,
        U2f = 2,
        Passwordless = 3,
        Password = 4,
        Idp = 5,
    }
}

/// Converts a list of enumeration values into an integer array value.
pub fn int_array<T: Copy + Into<i64>>(values: &[T]) -> Value {
    Value::IntArray(values.iter().map(|value| (*value).into()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_from_integers() {
        let state: AppState = serde_json::from_str("2").unwrap();
        assert_eq!(state, AppState::Inactive);
        assert_eq!(
            serde_json::to_string(&OidcTokenType::Jwt).unwrap(),
            "1".to_string()
        );
    }

    #[test]
    fn rejects_unknown_values() {
        let err = OidcApplicationType::try_from(9).unwrap_err();
        assert_eq!(err.kind, "OidcApplicationType");
        assert!(serde_json::from_str::<OidcApplicationType>("9").is_err());
    }

    #[test]
    fn first_variant_is_default() {
        assert_eq!(OidcVersion::default(), OidcVersion::V1);
        assert_eq!(MfaState::default(), MfaState::Unspecified);
    }

    #[test]
    fn binds_as_integer_values() {
        assert_eq!(Value::from(AppState::Active), Value::Int(1));
        assert_eq!(
            int_array(&[OidcGrantType::Implicit, OidcGrantType::RefreshToken]),
            Value::IntArray(vec![1, 2])
        );
    }
}
