//! Composable query inputs: predicate, ordering and eager includes.
//!
//! All parts are optional. A SQL condition narrows the rows read from the
//! store, the predicate narrows them further in memory, the ordering sorts the
//! resolved handles and includes run on every returned entity.
//!
//! Without a SQL condition every query reads the whole table and filters it
//! in memory.

use super::error::RepoResult;
use crate::model::entity::{Entity, EntityKey};
use crate::session::Session;
use rusqlite::types::Value;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};

type Predicate<T> = Box<dyn Fn(&T) -> bool>;
type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering>;
type IncludeFn<T> = Box<dyn Fn(&mut T, &Includer<'_>) -> RepoResult<()>>;

/// Query over one entity type.
///
/// ```ignore
/// let adults = users.list(
///     Query::new()
///         .filter(|u: &User| u.age >= 18)
///         .order_by_key(|u| u.name.clone())
///         .include(|u, inc| {
///             let id = u.id;
///             u.posts = inc.collection(move |p: &Post| p.user_id == id)?;
///             Ok(())
///         }),
/// )?;
/// ```
pub struct Query<T> {
    condition: Option<String>,
    params: Vec<Value>,
    predicate: Option<Predicate<T>>,
    ordering: Vec<Comparator<T>>,
    includes: Vec<IncludeFn<T>>,
}

impl<T: 'static> Query<T> {
    /// Matches every row, key order, no includes.
    pub fn new() -> Self {
        Self {
            condition: None,
            params: Vec::new(),
            predicate: None,
            ordering: Vec::new(),
            includes: Vec::new(),
        }
    }

    /// Narrows the rows read from the store with a SQL condition over the
    /// entity's columns, bound to `params` through anonymous `?` placeholders.
    /// Repeated calls are combined with logical AND, parameters in call order.
    pub fn where_sql(
        mut self,
        condition: impl Into<String>,
        params: impl IntoIterator<Item = Value>,
    ) -> Self {
        let condition = condition.into();
        self.condition = Some(match self.condition.take() {
            Some(previous) => format!("({previous}) AND ({condition})"),
            None => condition,
        });
        self.params.extend(params);
        self
    }

    /// Adds a filter. Repeated calls are combined with logical AND.
    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        let combined: Predicate<T> = match self.predicate.take() {
            Some(previous) => Box::new(move |entity: &T| previous(entity) && predicate(entity)),
            None => Box::new(predicate),
        };
        self.predicate = Some(combined);
        self
    }

    /// Replaces the ordering with `compare`.
    pub fn order_by(mut self, compare: impl Fn(&T, &T) -> Ordering + 'static) -> Self {
        self.ordering.clear();
        self.ordering.push(Box::new(compare));
        self
    }

    /// Adds a tie-breaker after the current ordering.
    pub fn then_by(mut self, compare: impl Fn(&T, &T) -> Ordering + 'static) -> Self {
        self.ordering.push(Box::new(compare));
        self
    }

    /// Orders ascending by a derived key.
    pub fn order_by_key<K: Ord>(self, key: impl Fn(&T) -> K + 'static) -> Self {
        self.order_by(move |left, right| key(left).cmp(&key(right)))
    }

    /// Orders descending by a derived key.
    pub fn order_by_key_desc<K: Ord>(self, key: impl Fn(&T) -> K + 'static) -> Self {
        self.order_by(move |left, right| key(right).cmp(&key(left)))
    }

    /// Adds an eager-loading step run on each returned entity.
    pub fn include(
        mut self,
        include: impl Fn(&mut T, &Includer<'_>) -> RepoResult<()> + 'static,
    ) -> Self {
        self.includes.push(Box::new(include));
        self
    }

    pub(crate) fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub(crate) fn params(&self) -> &[Value] {
        &self.params
    }

    pub(crate) fn matches(&self, entity: &T) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate(entity))
    }

    pub(crate) fn is_ordered(&self) -> bool {
        !self.ordering.is_empty()
    }

    pub(crate) fn compare(&self, left: &T, right: &T) -> Ordering {
        self.ordering
            .iter()
            .map(|compare| compare(left, right))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    pub(crate) fn has_includes(&self) -> bool {
        !self.includes.is_empty()
    }

    pub(crate) fn run_includes(&self, entity: &mut T, includer: &Includer<'_>) -> RepoResult<()> {
        for include in &self.includes {
            include(entity, includer)?;
        }
        Ok(())
    }
}

impl<T: 'static> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for Query<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("condition", &self.condition)
            .field("filtered", &self.predicate.is_some())
            .field("order_keys", &self.ordering.len())
            .field("includes", &self.includes.len())
            .finish()
    }
}

/// Loads related entities for `Query::include` steps.
///
/// Loaded rows join the session's identity map as `Unchanged`; the values
/// handed back are snapshots of the tracked instances.
pub struct Includer<'s> {
    session: &'s Session,
}

impl<'s> Includer<'s> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Related rows of `R` matching `predicate`, in key order.
    pub fn collection<R: Entity>(&self, predicate: impl Fn(&R) -> bool) -> RepoResult<Vec<R>> {
        let rows = self
            .session
            .fetch_all::<R>()?
            .into_iter()
            .filter(|row| predicate(row))
            .collect::<Vec<_>>();
        let tracked = self.session.resolve_all(rows)?;
        Ok(tracked.iter().map(|handle| handle.snapshot()).collect())
    }

    /// Related rows of `R` matching a SQL condition, in key order. Only the
    /// matching rows are read from the store.
    pub fn collection_where<R: Entity>(
        &self,
        condition: &str,
        params: impl IntoIterator<Item = Value>,
    ) -> RepoResult<Vec<R>> {
        let params = params.into_iter().collect::<Vec<_>>();
        let rows = self.session.fetch_where::<R>(Some(condition), &params)?;
        let tracked = self.session.resolve_all(rows)?;
        Ok(tracked.iter().map(|handle| handle.snapshot()).collect())
    }

    /// One related `R` by key.
    pub fn reference<R: Entity>(&self, key: impl Into<EntityKey>) -> RepoResult<Option<R>> {
        let key = key.into();
        if let Some(handle) = self.session.lookup::<R>(&key)? {
            return Ok(Some(handle.snapshot()));
        }
        match self.session.fetch_by_key::<R>(&key)? {
            Some(row) => {
                let tracked = self.session.resolve_all(vec![row])?;
                Ok(tracked.first().map(|handle| handle.snapshot()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Query;
    use rusqlite::types::Value;
    use std::cmp::Ordering;

    #[test]
    fn empty_query_matches_everything_unordered() {
        let query = Query::<i32>::new();
        assert!(query.matches(&1));
        assert!(!query.is_ordered());
        assert!(!query.has_includes());
    }

    #[test]
    fn filters_compose_with_and() {
        let query = Query::<i32>::new().filter(|v| *v > 1).filter(|v| *v < 5);
        assert!(query.matches(&3));
        assert!(!query.matches(&1));
        assert!(!query.matches(&7));
    }

    #[test]
    fn then_by_breaks_ties() {
        let query = Query::<(i32, i32)>::new()
            .order_by_key(|pair| pair.0)
            .then_by(|left, right| right.1.cmp(&left.1));
        assert_eq!(query.compare(&(1, 9), &(2, 0)), Ordering::Less);
        assert_eq!(query.compare(&(1, 9), &(1, 3)), Ordering::Less);
        assert_eq!(query.compare(&(1, 3), &(1, 3)), Ordering::Equal);
    }

    #[test]
    fn sql_conditions_compose_with_and_in_call_order() {
        let query = Query::<i32>::new()
            .where_sql("a = ?", [Value::Integer(1)])
            .where_sql("b = ? OR c = ?", [Value::Integer(2), Value::Integer(3)]);
        assert_eq!(query.condition(), Some("(a = ?) AND (b = ? OR c = ?)"));
        assert_eq!(
            query.params(),
            [Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
    }

    #[test]
    fn order_by_replaces_previous_ordering() {
        let query = Query::<i32>::new()
            .order_by_key(|v| *v)
            .order_by_key_desc(|v| *v);
        assert_eq!(query.compare(&1, &2), Ordering::Greater);
    }
}
