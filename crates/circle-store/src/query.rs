//! Backend-neutral query model.
//!
//! Accessors describe what they want with [`Select`] and [`Filter`]; each
//! gateway translates that into its own dialect (SQL for the embedded
//! backend, PostgREST query parameters for the REST gateway).

use serde_json::{Map, Value};

/// A row as exchanged with the backend: a JSON object keyed by column name.
pub type Row = Map<String, Value>;

/// Logical tables of the remote data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Messages,
    Friends,
    Posts,
    Likes,
    Comments,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Messages => "messages",
            Table::Friends => "friends",
            Table::Posts => "posts",
            Table::Likes => "likes",
            Table::Comments => "comments",
        }
    }
}

/// Row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    /// Conjunction; nested conjunctions are flattened.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), right) => {
                left.push(right);
                Filter::And(left)
            }
            (left, Filter::And(mut right)) => {
                right.insert(0, left);
                Filter::And(right)
            }
            (left, right) => Filter::And(vec![left, right]),
        }
    }

    /// Disjunction; nested disjunctions are flattened.
    pub fn or(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::Or(mut left), Filter::Or(right)) => {
                left.extend(right);
                Filter::Or(left)
            }
            (Filter::Or(mut left), right) => {
                left.push(right);
                Filter::Or(left)
            }
            (left, right) => Filter::Or(vec![left, right]),
        }
    }

    /// Evaluate the predicate against an in-memory row.
    ///
    /// A missing column never matches.  An empty `And` matches everything
    /// and an empty `Or` / `In` matches nothing.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq(column, value) => row.get(column) == Some(value),
            Filter::In(column, values) => row
                .get(column)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }

    /// PostgREST query parameters for this predicate.
    ///
    /// Top-level conjunctions become one parameter per operand; a
    /// disjunction becomes a single `or=(...)` parameter.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        match self {
            Filter::Eq(column, value) => {
                vec![(column.clone(), format!("eq.{}", render_scalar(value)))]
            }
            Filter::In(column, values) => {
                vec![(column.clone(), format!("in.({})", render_list(values)))]
            }
            Filter::And(filters) => filters.iter().flat_map(|f| f.to_query_pairs()).collect(),
            Filter::Or(filters) => vec![("or".to_string(), format!("({})", render_nested(filters)))],
        }
    }

    fn render_inline(&self) -> String {
        match self {
            Filter::Eq(column, value) => format!("{column}.eq.{}", render_value(value)),
            Filter::In(column, values) => format!("{column}.in.({})", render_list(values)),
            Filter::And(filters) => format!("and({})", render_nested(filters)),
            Filter::Or(filters) => format!("or({})", render_nested(filters)),
        }
    }
}

fn render_nested(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::render_inline)
        .collect::<Vec<_>>()
        .join(",")
}

fn render_list(values: &[Value]) -> String {
    values.iter().map(render_value).collect::<Vec<_>>().join(",")
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a scalar inside a list or logical group, quoting values that
/// contain PostgREST reserved characters.
fn render_value(value: &Value) -> String {
    let raw = render_scalar(value);
    if raw.contains([',', '.', ':', '(', ')', '"']) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A denormalised profile reference resolved through a foreign key, e.g.
/// `sender_profile` via `messages.sender_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Embed {
    pub alias: &'static str,
    pub foreign_key: &'static str,
}

impl Embed {
    pub const fn profile(alias: &'static str, foreign_key: &'static str) -> Self {
        Self { alias, foreign_key }
    }

    /// PostgREST select fragment, e.g.
    /// `sender_profile:profiles!messages_sender_id_fkey(*)`.
    pub fn to_select_fragment(&self, table: Table) -> String {
        format!(
            "{}:{}!{}_{}_fkey(*)",
            self.alias,
            Table::Profiles.name(),
            table.name(),
            self.foreign_key
        )
    }
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: Table,
    pub filter: Option<Filter>,
    pub order: Vec<Order>,
    pub embeds: Vec<Embed>,
    pub limit: Option<u32>,
}

impl Select {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filter: None,
            order: Vec::new(),
            embeds: Vec::new(),
            limit: None,
        }
    }

    /// Add a predicate, AND-ed with any previous one.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn embeds(mut self, embeds: &[Embed]) -> Self {
        self.embeds.extend_from_slice(embeds);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The PostgREST `select=` parameter value.
    pub fn select_clause(&self) -> String {
        let mut parts = vec!["*".to_string()];
        parts.extend(self.embeds.iter().map(|e| e.to_select_fragment(self.table)));
        parts.join(",")
    }
}
