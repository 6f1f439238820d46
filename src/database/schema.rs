use std::sync::Arc;

use super::{
    ColumnField, ColumnKind, Database, DatabaseField, ExpressionField, LazyJoin, Table,
    lazy::{PersonDistinctIdsSource, PersonsSource, SessionsSource}
};
use crate::{
    ast::{Chain, Expr},
    context::HogQLQueryModifiers
};

use super::ColumnKind::{Boolean, DateTime, Integer, Json, String as Str, Uuid};

fn chain(parts: &[&str]) -> Chain {
    parts.iter().map(|p| (*p).into()).collect()
}

fn col(name: &str, kind: ColumnKind) -> DatabaseField {
    DatabaseField::column(name, kind)
}

fn hidden_col(name: &str, kind: ColumnKind) -> DatabaseField {
    DatabaseField::Column(ColumnField {
        name: name.to_string(),
        kind,
        nullable: false,
        hidden: true
    })
}

fn raw_person_distinct_ids() -> Table {
    Table::stored("raw_person_distinct_ids", "person_distinct_id2")
        .with_field("team_id", col("team_id", Integer))
        .with_field("distinct_id", col("distinct_id", Str))
        .with_field("person_id", col("person_id", Uuid))
        .with_field("is_deleted", col("is_deleted", Integer))
        .with_field("version", col("version", Integer))
}

fn raw_persons() -> Table {
    Table::stored("raw_persons", "person")
        .with_field("id", col("id", Uuid))
        .with_field("team_id", col("team_id", Integer))
        .with_field("properties", col("properties", Json))
        .with_field("created_at", col("created_at", DateTime))
        .with_field("is_identified", col("is_identified", Boolean))
        .with_field("is_deleted", col("is_deleted", Integer))
        .with_field("version", col("version", Integer))
}

fn raw_sessions() -> Table {
    Table::stored("raw_sessions", "sessions")
        .with_field("session_id", col("session_id", Str))
        .with_field("team_id", col("team_id", Integer))
        .with_field("distinct_id", col("distinct_id", Str))
        .with_field("min_timestamp", col("min_timestamp", DateTime))
        .with_field("max_timestamp", col("max_timestamp", DateTime))
        .with_field("pageview_count", col("pageview_count", Integer))
        .with_field("entry_url", DatabaseField::nullable_column("entry_url", Str))
}

fn persons() -> Table {
    Table::lazy("persons", Arc::new(PersonsSource))
        .with_field("id", col("id", Uuid))
        .with_field("properties", col("properties", Json))
        .with_field("created_at", col("created_at", DateTime))
        .with_field("is_identified", col("is_identified", Boolean))
}

fn person_distinct_ids(persons: &Arc<Table>) -> Table {
    Table::lazy("person_distinct_ids", Arc::new(PersonDistinctIdsSource))
        .with_field("distinct_id", col("distinct_id", Str))
        .with_field("person_id", col("person_id", Uuid))
        .with_field(
            "person",
            DatabaseField::LazyJoin(Arc::new(LazyJoin::new(
                chain(&["person_id"]),
                "id",
                Arc::clone(persons),
                "LEFT JOIN"
            )))
        )
}

fn sessions() -> Table {
    Table::lazy("sessions", Arc::new(SessionsSource))
        .with_field("session_id", col("session_id", Str))
        .with_field("distinct_id", col("distinct_id", Str))
        .with_field("$start_timestamp", col("$start_timestamp", DateTime))
        .with_field("$end_timestamp", col("$end_timestamp", DateTime))
        .with_field("$session_duration", col("$session_duration", Integer))
        .with_field("duration", col("duration", Integer))
        .with_field("$pageview_count", col("$pageview_count", Integer))
        .with_field("$entry_current_url", DatabaseField::nullable_column("$entry_current_url", Str))
}

/// Person columns denormalized onto events.
fn events_person_columns() -> Table {
    Table::virtual_table("poe")
        .with_field("id", col("person_id", Uuid))
        .with_field("properties", col("person_properties", Json))
        .with_field("created_at", col("person_created_at", DateTime))
}

fn events(
    pdi: &Arc<Table>,
    sessions: &Arc<Table>,
    modifiers: &HogQLQueryModifiers
) -> Table {
    let mut table = Table::stored("events", "events")
        .with_field("uuid", col("uuid", Uuid))
        .with_field("event", col("event", Str))
        .with_field("properties", col("properties", Json))
        .with_field("timestamp", col("timestamp", DateTime))
        .with_field("team_id", col("team_id", Integer))
        .with_field("distinct_id", col("distinct_id", Str))
        .with_field("elements_chain", col("elements_chain", Str))
        .with_field("created_at", col("created_at", DateTime))
        .with_field("$session_id", col("$session_id", Str))
        .with_field("$window_id", col("$window_id", Str))
        .with_field(
            "date",
            DatabaseField::Expression(ExpressionField {
                expr:          Expr::call("toDate", vec![Expr::field(&["timestamp"])]),
                isolate_scope: true,
                hidden:        true
            })
        )
        .with_field(
            "pdi",
            DatabaseField::LazyJoin(Arc::new(LazyJoin::new(
                chain(&["distinct_id"]),
                "distinct_id",
                Arc::clone(pdi),
                "INNER JOIN"
            )))
        )
        .with_field("poe", DatabaseField::VirtualTable(Arc::new(events_person_columns())))
        .with_field(
            "session",
            DatabaseField::LazyJoin(Arc::new(LazyJoin::new(
                chain(&["$session_id"]),
                "session_id",
                Arc::clone(sessions),
                "LEFT JOIN"
            )))
        );
    if modifiers.persons_on_events {
        table = table
            .with_field("person_id", hidden_col("person_id", Uuid))
            .with_field("person", DatabaseField::traverser(&["poe"]));
    } else {
        table = table
            .with_field("person_id", DatabaseField::traverser(&["pdi", "person_id"]))
            .with_field("person", DatabaseField::traverser(&["pdi", "person"]));
    }
    table
}

fn cohort_people() -> Table {
    Table::stored("cohort_people", "cohortpeople")
        .with_field("team_id", col("team_id", Integer))
        .with_field("person_id", col("person_id", Uuid))
        .with_field("cohort_id", col("cohort_id", Integer))
        .with_field("sign", col("sign", Integer))
        .with_field("version", col("version", Integer))
}

fn static_cohort_people() -> Table {
    Table::stored("static_cohort_people", "person_static_cohort")
        .with_field("team_id", col("team_id", Integer))
        .with_field("person_id", col("person_id", Uuid))
        .with_field("cohort_id", col("cohort_id", Integer))
}

fn event_properties() -> Table {
    Table::stored("event_properties", "event_properties")
        .with_field("team_id", col("team_id", Integer))
        .with_field("timestamp", col("timestamp", ColumnKind::Date))
        .with_field("event", col("event", Str))
        .with_field("distinct_id_hash", col("distinct_id_hash", Integer))
        .with_field("uuid_hash", col("uuid_hash", Integer))
        .with_field("key", col("key", Str))
        .with_field("value", DatabaseField::nullable_column("value", Str))
}

fn preaggregated_event_stats() -> Table {
    Table::stored("preaggregated_event_stats", "event_stats_daily")
        .with_field("team_id", col("team_id", Integer))
        .with_field("day_bucket", col("day_bucket", DateTime))
        .with_field("event", col("event", Str))
        .with_field("browser", col("browser", Str))
        .with_field("os", col("os", Str))
        .with_field("pathname", col("pathname", Str))
        .with_field("count_state", col("count_state", Str))
        .with_field("persons_uniq_state", col("persons_uniq_state", Str))
        .with_field("sessions_uniq_state", col("sessions_uniq_state", Str))
}

fn numbers() -> Table {
    Table::function("numbers", 1, 2).with_field("number", col("number", Integer))
}

impl Database {
    /// Default catalog for one team.
    pub fn create_for(team_id: Option<i64>, modifiers: &HogQLQueryModifiers) -> Self {
        let persons = Arc::new(persons());
        let pdi = Arc::new(person_distinct_ids(&persons));
        let sessions = Arc::new(sessions());
        let events = Arc::new(events(&pdi, &sessions, modifiers));

        let mut database = Self::new(team_id);
        for table in [
            events,
            persons,
            pdi,
            sessions,
            Arc::new(raw_persons()),
            Arc::new(raw_person_distinct_ids()),
            Arc::new(raw_sessions()),
            Arc::new(cohort_people()),
            Arc::new(static_cohort_people()),
            Arc::new(event_properties()),
            Arc::new(preaggregated_event_stats()),
            Arc::new(numbers())
        ] {
            database.add_table(table);
        }
        tracing::debug!(team_id = ?team_id, "created default HogQL database");
        database
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::TableKind;

    #[test]
    fn test_default_catalog_tables() {
        let db = Database::create_for(Some(1), &HogQLQueryModifiers::default());
        for name in ["events", "persons", "person_distinct_ids", "sessions", "numbers"] {
            assert!(db.has_table(name), "missing {}", name);
        }
        assert!(db.get_table("nope").is_err());
    }

    #[test]
    fn test_events_asterisk_skips_team_and_joins() {
        let db = Database::create_for(Some(1), &HogQLQueryModifiers::default());
        let events = db.get_table("events").expect("events table");
        let asterisk = events.get_asterisk();
        assert!(asterisk.contains(&"event"));
        assert!(!asterisk.contains(&"team_id"));
        assert!(!asterisk.contains(&"pdi"));
        assert!(!asterisk.contains(&"poe"));
        assert!(!asterisk.contains(&"person"));
        assert!(!asterisk.contains(&"date"));
    }

    #[test]
    fn test_persons_on_events_mode() {
        let modifiers = HogQLQueryModifiers {
            persons_on_events: true,
            ..Default::default()
        };
        let db = Database::create_for(Some(1), &modifiers);
        let events = db.get_table("events").expect("events table");
        assert!(matches!(events.get_field("person_id"), Some(DatabaseField::Column(_))));
        let persons = db.get_table("persons").expect("persons table");
        assert!(matches!(persons.kind, TableKind::Lazy(_)));
    }
}
