//! Domain events as read from the event store.
//!
//! Events are immutable facts. Each belongs to one aggregate (a project, a
//! user, an organisation or an instance) inside one instance, the tenant. The
//! event store assigns `sequence`, which strictly increases within an
//! instance, and links every event to the previous event of the same
//! aggregate through `previous_sequence` (0 for the first event).
//!
//! The event type arrives as a wire string. [`EventType::parse`] maps it onto
//! the closed set of types this engine understands; anything else is
//! unregistered and ignored by every projection.

pub mod project;
pub mod user;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::reducer::ReduceError;

/// Kind of aggregate an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateType {
    /// A project and its applications.
    Project,
    /// A user and its authentication methods.
    User,
    /// An organisation, the resource owner of projects and users.
    Org,
    /// The instance (tenant) itself.
    Instance,
}

impl AggregateType {
    /// All aggregate types.
    pub const ALL: [Self; 4] = [Self::Project, Self::User, Self::Org, Self::Instance];

    /// Wire name of the aggregate type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::User => "user",
            Self::Org => "org",
            Self::Instance => "instance",
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! event_types {
    ($( $(#[$meta:meta])* $variant:ident => ($wire:literal, $aggregate:ident), )*) => {
        /// Every event type the engine understands.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventType {
            $( $(#[$meta])* $variant, )*
        }

        impl EventType {
            /// All known event types.
            pub const ALL: &'static [Self] = &[$( Self::$variant, )*];

            /// Wire name of the event type.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $wire, )*
                }
            }

            /// Aggregate type that emits this event type.
            #[must_use]
            pub const fn aggregate_type(self) -> AggregateType {
                match self {
                    $( Self::$variant => AggregateType::$aggregate, )*
                }
            }

            /// Parses a wire name. Unknown names are unregistered and map to
            /// `None`.
            #[must_use]
            pub fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $( $wire => Some(Self::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

event_types! {
    /// A project and all its applications were removed.
    ProjectRemoved => ("project.removed", Project),
    /// An application was added to a project.
    ApplicationAdded => ("project.application.added", Project),
    /// An application was renamed.
    ApplicationChanged => ("project.application.changed", Project),
    /// An application was deactivated.
    ApplicationDeactivated => ("project.application.deactivated", Project),
    /// An application was reactivated.
    ApplicationReactivated => ("project.application.reactivated", Project),
    /// An application was removed.
    ApplicationRemoved => ("project.application.removed", Project),
    /// An API configuration was attached to an application.
    ApiConfigAdded => ("project.application.config.api.added", Project),
    /// An API configuration changed.
    ApiConfigChanged => ("project.application.config.api.changed", Project),
    /// An API client secret was rotated.
    ApiConfigSecretChanged => ("project.application.config.api.secret.changed", Project),
    /// An OIDC configuration was attached to an application.
    OidcConfigAdded => ("project.application.config.oidc.added", Project),
    /// An OIDC configuration changed.
    OidcConfigChanged => ("project.application.config.oidc.changed", Project),
    /// An OIDC client secret was rotated.
    OidcConfigSecretChanged => ("project.application.config.oidc.secret.changed", Project),
    /// A user started OTP enrolment.
    HumanOtpAdded => ("user.human.mfa.otp.added", User),
    /// A user completed OTP enrolment.
    HumanOtpVerified => ("user.human.mfa.otp.verified", User),
    /// A user's OTP was removed.
    HumanOtpRemoved => ("user.human.mfa.otp.removed", User),
    /// A user started U2F token enrolment.
    HumanU2fTokenAdded => ("user.human.u2f.token.added", User),
    /// A user completed U2F token enrolment.
    HumanU2fTokenVerified => ("user.human.u2f.token.verified", User),
    /// A user's U2F token was removed.
    HumanU2fTokenRemoved => ("user.human.u2f.token.removed", User),
    /// A user started passwordless token enrolment.
    HumanPasswordlessTokenAdded => ("user.human.passwordless.token.added", User),
    /// A user completed passwordless token enrolment.
    HumanPasswordlessTokenVerified => ("user.human.passwordless.token.verified", User),
    /// A user's passwordless token was removed.
    HumanPasswordlessTokenRemoved => ("user.human.passwordless.token.removed", User),
    /// A user was removed.
    UserRemoved => ("user.removed", User),
    /// An organisation was removed.
    OrgRemoved => ("org.removed", Org),
    /// An instance was removed.
    InstanceRemoved => ("instance.removed", Instance),
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event read from the event store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Owning instance.
    pub instance_id: String,
    /// Wire name of the aggregate type.
    pub aggregate_type: String,
    /// Aggregate identifier.
    pub aggregate_id: String,
    /// Organisation owning the aggregate.
    pub resource_owner: String,
    /// Wire name of the event type.
    pub event_type: String,
    /// Instance-wide position assigned by the event store.
    pub sequence: u64,
    /// Sequence of the previous event of the same aggregate, 0 for the first.
    pub previous_sequence: u64,
    /// When the event was stored.
    pub creation_date: DateTime<Utc>,
    /// JSON payload. May be empty.
    pub payload: Vec<u8>,
}

impl Event {
    /// The event's type, if it is one this engine understands.
    #[must_use]
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    /// The event's aggregate type, if known.
    #[must_use]
    pub fn aggregate_kind(&self) -> Option<AggregateType> {
        AggregateType::parse(&self.aggregate_type)
    }

    /// Fails with [`ReduceError::InvalidArgument`] unless the event has type
    /// `expected`.
    pub fn expect_type(&self, expected: EventType) -> Result<(), ReduceError> {
        if self.event_type == expected.as_str() {
            Ok(())
        } else {
            Err(ReduceError::InvalidArgument {
                expected,
                received: self.event_type.clone(),
            })
        }
    }

    /// Checks the event type and decodes the payload.
    ///
    /// An empty payload decodes as `{}`.
    ///
    /// # Errors
    ///
    /// [`ReduceError::InvalidArgument`] on a type mismatch,
    /// [`ReduceError::MalformedEvent`] if the payload does not decode.
    pub fn decode<T: DeserializeOwned>(&self, expected: EventType) -> Result<T, ReduceError> {
        self.expect_type(expected)?;
        let payload: &[u8] = if self.payload.is_empty() {
            b"{}"
        } else {
            &self.payload
        };
        serde_json::from_slice(payload).map_err(|e| ReduceError::MalformedEvent {
            event_type: expected,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::project::ApplicationAdded;
    use crate::testing::{base_event, test_event};

    #[test]
    fn wire_names_round_trip() {
        for kind in EventType::ALL {
            assert_eq!(EventType::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(EventType::parse("project.application.renamed"), None);
    }

    #[test]
    fn wire_names_are_prefixed_by_aggregate() {
        for kind in EventType::ALL {
            assert!(
                kind.as_str().starts_with(kind.aggregate_type().as_str()),
                "{kind} does not belong to {}",
                kind.aggregate_type()
            );
        }
    }

    #[test]
    fn decode_rejects_wrong_type() {
        let err = base_event()
            .decode::<ApplicationAdded>(EventType::ApplicationAdded)
            .unwrap_err();

        assert!(matches!(
            err,
            ReduceError::InvalidArgument {
                expected: EventType::ApplicationAdded,
                ..
            }
        ));
    }

    #[test]
    fn decode_reports_malformed_payload() {
        let event = test_event(
            EventType::ApplicationAdded,
            AggregateType::Project,
            br#"{"appId": 7}"#,
        );

        let err = event
            .decode::<ApplicationAdded>(EventType::ApplicationAdded)
            .unwrap_err();

        assert!(matches!(err, ReduceError::MalformedEvent { .. }));
    }

    #[test]
    fn empty_payload_decodes_as_empty_object() {
        #[derive(serde::Deserialize)]
        struct Empty {}

        let event = test_event(EventType::OrgRemoved, AggregateType::Org, b"");
        assert!(event.decode::<Empty>(EventType::OrgRemoved).is_ok());
    }
}
