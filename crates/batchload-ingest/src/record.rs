//! Student record model

use serde::{Deserialize, Serialize};
use std::fmt;

/// One imported row
///
/// `id` is whatever the input carried; it is cleared before persistence so
/// storage always inserts a new row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Student {
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
}

impl Student {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            age,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Attach a storage-assigned identifier
    pub fn into_persisted(self, id: i64) -> PersistedStudent {
        PersistedStudent {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            age: self.age,
        }
    }
}

/// JSON-style rendering used in log lines
impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{\"id\":")?;
        match self.id {
            Some(id) => write!(f, "{}", id)?,
            None => write!(f, "null")?,
        }
        write!(
            f,
            ",\"firstname\":{:?},\"lastname\":{:?},\"age\":{}}}",
            self.first_name, self.last_name, self.age
        )
    }
}

/// A student row as stored, with its storage-assigned id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedStudent {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
}

impl PersistedStudent {
    /// The data fields, without the identifier
    pub fn fields(&self) -> (&str, &str, i32) {
        (&self.first_name, &self.last_name, self.age)
    }
}
