use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Users,
    Teams,
    TeamMembers,
    Projects,
    Sections,
    Tasks,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Users,
        Collection::Teams,
        Collection::TeamMembers,
        Collection::Projects,
        Collection::Sections,
        Collection::Tasks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Teams => "teams",
            Collection::TeamMembers => "team_members",
            Collection::Projects => "projects",
            Collection::Sections => "sections",
            Collection::Tasks => "tasks",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|collection| collection.as_str() == s)
            .ok_or_else(|| BackendError::validation(format!("unknown collection '{s}'")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.insert(column.into(), value);
        self
    }

    pub fn by_id(id: impl Serialize) -> Self {
        Self::new().eq("id", id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// A missing field on the record compares equal to `null`.
    pub fn matches(&self, record: &Value) -> bool {
        self.0.iter().all(|(column, expected)| {
            record.get(column).unwrap_or(&Value::Null) == expected
        })
    }

    pub fn validate(&self, collection: Collection, columns: &[&str]) -> Result<(), BackendError> {
        for column in self.0.keys() {
            if !columns.contains(&column.as_str()) {
                return Err(BackendError::validation(format!(
                    "column '{column}' does not exist on {collection}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Columns {
    #[default]
    All,
    Only(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// The parent row holds the foreign key; embeds a single object or null.
    One,
    /// The child rows hold the foreign key; embeds an array.
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub local: String,
    pub foreign: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub alias: String,
    pub collection: Collection,
    pub join: Join,
    pub cardinality: Cardinality,
    /// Drop parent rows that have no related row.
    #[serde(default)]
    pub inner: bool,
    #[serde(default)]
    pub projection: Projection,
}

impl Embed {
    pub fn one(
        alias: impl Into<String>,
        collection: Collection,
        local: impl Into<String>,
        foreign: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            collection,
            join: Join {
                local: local.into(),
                foreign: foreign.into(),
            },
            cardinality: Cardinality::One,
            inner: false,
            projection: Projection::all(),
        }
    }

    pub fn many(
        alias: impl Into<String>,
        collection: Collection,
        local: impl Into<String>,
        foreign: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::one(alias, collection, local, foreign)
        }
    }

    pub fn inner(mut self) -> Self {
        self.inner = true;
        self
    }

    pub fn with(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Column on the child table that disambiguates the relationship.
    pub fn hint(&self) -> &str {
        match self.cardinality {
            Cardinality::One => &self.join.local,
            Cardinality::Many => &self.join.foreign,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(default)]
    pub columns: Columns,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

impl Projection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn columns(columns: &[&str]) -> Self {
        Self {
            columns: Columns::Only(columns.iter().map(|c| c.to_string()).collect()),
            embeds: Vec::new(),
        }
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataRequest {
    Select {
        collection: Collection,
        #[serde(default)]
        filter: Filter,
        #[serde(default)]
        projection: Projection,
    },
    Insert {
        collection: Collection,
        rows: Vec<Value>,
    },
    Update {
        collection: Collection,
        filter: Filter,
        patch: Value,
    },
    Delete {
        collection: Collection,
        filter: Filter,
    },
}

impl DataRequest {
    pub fn collection(&self) -> Collection {
        match self {
            DataRequest::Select { collection, .. }
            | DataRequest::Insert { collection, .. }
            | DataRequest::Update { collection, .. }
            | DataRequest::Delete { collection, .. } => *collection,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            DataRequest::Select { .. } => "SELECT",
            DataRequest::Insert { .. } => "INSERT",
            DataRequest::Update { .. } => "UPDATE",
            DataRequest::Delete { .. } => "DELETE",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, DataRequest::Select { .. })
    }
}
