//! Tenant-wide removal reducers shared by all projections.
//!
//! `instance.removed` hard-deletes every row of the instance. `org.removed`
//! soft-deletes: rows owned by the organisation stay in place with
//! `owner_removed` set, and read-side queries filter them out.

use std::sync::Arc;

use crate::event::{Event, EventType};
use crate::reducer::{EventReducer, ReduceError};
use crate::schema::Table;
use crate::statement::{Column, Mutation, Predicate};

/// Deletes every row of the removed instance, children before parents.
///
/// Rows are matched on the event's own instance, never on its aggregate id.
pub fn instance_removed(
    tables: &[Table],
    event: &Event,
) -> Result<Vec<Mutation>, ReduceError> {
    event.expect_type(EventType::InstanceRemoved)?;
    Ok(tables
        .iter()
        .rev()
        .map(|table| {
            Mutation::delete(
                table.name,
                Predicate::tenant(table.tenant_column, &event.instance_id),
            )
        })
        .collect())
}

/// Flags every row owned by the removed organisation.
///
/// Only tables enrolled through [`Table::with_owner`] take part.
pub fn owner_removed(tables: &[Table], event: &Event) -> Result<Vec<Mutation>, ReduceError> {
    event.expect_type(EventType::OrgRemoved)?;
    Ok(tables
        .iter()
        .filter_map(|table| {
            let owner = table.owner?;
            Some(Mutation::update(
                table.name,
                vec![
                    Column::new(owner.change_date, event.creation_date),
                    Column::new(owner.sequence, event.sequence),
                    Column::new(owner.removed_flag, true),
                ],
                Predicate::tenant(table.tenant_column, &event.instance_id)
                    .and(owner.owner, &event.aggregate_id),
            ))
        })
        .collect())
}

/// Both cascade reducers, bound to `tables`.
pub fn reducers(tables: Vec<Table>) -> Vec<EventReducer> {
    let tables = Arc::new(tables);
    let owned = Arc::clone(&tables);
    vec![
        EventReducer::new(EventType::InstanceRemoved, move |event| {
            instance_removed(&tables, event)
        }),
        EventReducer::new(EventType::OrgRemoved, move |event| {
            owner_removed(&owned, event)
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AggregateType;
    use crate::schema::{ColumnDef, ColumnType, OwnerColumns};
    use crate::testing::{base_event, creation_date, test_event};

    fn tables() -> Vec<Table> {
        vec![
            Table::new(
                "parents",
                vec![
                    ColumnDef::new("instance_id", ColumnType::Text),
                    ColumnDef::new("id", ColumnType::Text),
                ],
                vec!["instance_id", "id"],
            )
            .with_owner(OwnerColumns::default()),
            Table::new(
                "children",
                vec![
                    ColumnDef::new("tenant", ColumnType::Text),
                    ColumnDef::new("id", ColumnType::Text),
                ],
                vec!["tenant", "id"],
            )
            .with_owner(OwnerColumns {
                owner: "org",
                removed_flag: "org_gone",
                change_date: "changed_at",
                sequence: "seq",
            }),
            Table::new(
                "unowned",
                vec![ColumnDef::new("instance_id", ColumnType::Text)],
                vec!["instance_id"],
            ),
        ]
    }

    #[test]
    fn instance_removed_deletes_children_first() {
        let event = test_event(EventType::InstanceRemoved, AggregateType::Instance, b"");

        let got = instance_removed(&tables(), &event).unwrap();

        assert_eq!(
            got,
            vec![
                Mutation::delete("unowned", Predicate::tenant("instance_id", "instance-id")),
                Mutation::delete("children", Predicate::tenant("tenant", "instance-id")),
                Mutation::delete("parents", Predicate::tenant("instance_id", "instance-id")),
            ]
        );
    }

    #[test]
    fn instance_removed_ignores_foreign_aggregate_id() {
        let event = Event {
            aggregate_id: "other-instance".into(),
            ..test_event(EventType::InstanceRemoved, AggregateType::Instance, b"")
        };

        let got = instance_removed(&tables(), &event).unwrap();

        assert_eq!(
            got,
            vec![
                Mutation::delete("unowned", Predicate::tenant("instance_id", "instance-id")),
                Mutation::delete("children", Predicate::tenant("tenant", "instance-id")),
                Mutation::delete("parents", Predicate::tenant("instance_id", "instance-id")),
            ]
        );
    }

    #[test]
    fn owner_removed_uses_each_tables_columns() {
        let event = test_event(EventType::OrgRemoved, AggregateType::Org, b"");

        let got = owner_removed(&tables(), &event).unwrap();

        assert_eq!(
            got,
            vec![
                Mutation::update(
                    "parents",
                    vec![
                        Column::new("change_date", creation_date()),
                        Column::new("sequence", 15u64),
                        Column::new("owner_removed", true),
                    ],
                    Predicate::tenant("instance_id", "instance-id")
                        .and("resource_owner", "agg-id"),
                ),
                Mutation::update(
                    "children",
                    vec![
                        Column::new("changed_at", creation_date()),
                        Column::new("seq", 15u64),
                        Column::new("org_gone", true),
                    ],
                    Predicate::tenant("tenant", "instance-id").and("org", "agg-id"),
                ),
            ]
        );
    }

    #[test]
    fn cascades_reject_other_event_types() {
        assert!(matches!(
            instance_removed(&tables(), &base_event()),
            Err(ReduceError::InvalidArgument {
                expected: EventType::InstanceRemoved,
                ..
            })
        ));
        assert!(matches!(
            owner_removed(&tables(), &base_event()),
            Err(ReduceError::InvalidArgument {
                expected: EventType::OrgRemoved,
                ..
            })
        ));
    }
}
