//! Statement text for one entity table.
//!
//! Identifiers come from `Entity` constants and are always quoted. Bind
//! order is `KEY_COLUMN` first for inserts and last for updates.

use crate::model::entity::Entity;

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_list<T: Entity>() -> String {
    std::iter::once(T::KEY_COLUMN)
        .chain(T::COLUMNS.iter().copied())
        .map(quote)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn select_all<T: Entity>() -> String {
    format!(
        "SELECT {} FROM {} ORDER BY {} ASC;",
        column_list::<T>(),
        quote(T::TABLE),
        quote(T::KEY_COLUMN)
    )
}

/// `condition` is caller SQL over the entity's own columns.
pub(crate) fn select_where<T: Entity>(condition: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE ({}) ORDER BY {} ASC;",
        column_list::<T>(),
        quote(T::TABLE),
        condition,
        quote(T::KEY_COLUMN)
    )
}

pub(crate) fn select_by_key<T: Entity>() -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?1;",
        column_list::<T>(),
        quote(T::TABLE),
        quote(T::KEY_COLUMN)
    )
}

pub(crate) fn insert<T: Entity>() -> String {
    let placeholders = (1..=T::COLUMNS.len() + 1)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote(T::TABLE),
        column_list::<T>(),
        placeholders
    )
}

/// Full-row update. A table with no value columns gets a self-assignment so
/// the statement still reports whether the row exists.
pub(crate) fn update<T: Entity>() -> String {
    let key = quote(T::KEY_COLUMN);
    if T::COLUMNS.is_empty() {
        return format!(
            "UPDATE {} SET {key} = {key} WHERE {key} = ?1;",
            quote(T::TABLE)
        );
    }

    let assignments = T::COLUMNS
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{} = ?{}", quote(column), index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {key} = ?{};",
        quote(T::TABLE),
        assignments,
        T::COLUMNS.len() + 1
    )
}

pub(crate) fn delete<T: Entity>() -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?1;",
        quote(T::TABLE),
        quote(T::KEY_COLUMN)
    )
}

#[cfg(test)]
mod tests {
    use super::{delete, insert, select_all, select_by_key, select_where, update};
    use crate::model::entity::{Entity, EntityKey};
    use rusqlite::types::Value;
    use rusqlite::Row;

    #[derive(Debug, Clone)]
    struct Tag;

    impl Entity for Tag {
        const TABLE: &'static str = "tags";
        const KEY_COLUMN: &'static str = "id";
        const COLUMNS: &'static [&'static str] = &["label", "color"];

        fn key(&self) -> EntityKey {
            EntityKey::Integer(1)
        }

        fn values(&self) -> Vec<Value> {
            Vec::new()
        }

        fn from_row(_row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Tag)
        }
    }

    #[derive(Debug, Clone)]
    struct Marker;

    impl Entity for Marker {
        const TABLE: &'static str = "markers";
        const KEY_COLUMN: &'static str = "id";
        const COLUMNS: &'static [&'static str] = &[];

        fn key(&self) -> EntityKey {
            EntityKey::Integer(1)
        }

        fn values(&self) -> Vec<Value> {
            Vec::new()
        }

        fn from_row(_row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Marker)
        }
    }

    #[test]
    fn select_lists_key_first_and_orders_by_key() {
        assert_eq!(
            select_all::<Tag>(),
            "SELECT \"id\", \"label\", \"color\" FROM \"tags\" ORDER BY \"id\" ASC;"
        );
        assert!(select_by_key::<Tag>().ends_with("WHERE \"id\" = ?1;"));
    }

    #[test]
    fn select_where_wraps_the_condition() {
        assert_eq!(
            select_where::<Tag>("label = ? OR color = ?"),
            "SELECT \"id\", \"label\", \"color\" FROM \"tags\" WHERE (label = ? OR color = ?) ORDER BY \"id\" ASC;"
        );
    }

    #[test]
    fn insert_binds_every_column() {
        assert_eq!(
            insert::<Tag>(),
            "INSERT INTO \"tags\" (\"id\", \"label\", \"color\") VALUES (?1, ?2, ?3);"
        );
    }

    #[test]
    fn update_binds_key_last() {
        assert_eq!(
            update::<Tag>(),
            "UPDATE \"tags\" SET \"label\" = ?1, \"color\" = ?2 WHERE \"id\" = ?3;"
        );
    }

    #[test]
    fn update_without_value_columns_is_still_valid() {
        assert_eq!(
            update::<Marker>(),
            "UPDATE \"markers\" SET \"id\" = \"id\" WHERE \"id\" = ?1;"
        );
        assert_eq!(delete::<Marker>(), "DELETE FROM \"markers\" WHERE \"id\" = ?1;");
    }
}
