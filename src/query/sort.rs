//! Result ordering

use std::fmt;
use std::str::FromStr;

use crate::store::{keys, SortSpec};

/// Entry field a result page can be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Server,
    Name,
    Size,
    Date,
}

impl SortField {
    /// Field of the entry record holding the sort value
    fn record_field(&self) -> &'static str {
        match self {
            SortField::Server => "server",
            SortField::Name => "name",
            SortField::Size => "size",
            SortField::Date => "mtime",
        }
    }

    fn is_alpha(&self) -> bool {
        matches!(self, SortField::Server | SortField::Name)
    }

    fn as_str(&self) -> &'static str {
        match self {
            SortField::Date => "date",
            other => other.record_field(),
        }
    }
}

/// Field and direction, written `field[.asc|.desc]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub field: SortField,
    pub descending: bool,
}

impl SortOrder {
    pub fn ascending(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    /// Keyspace sort request; ties fall back to the entry path
    pub fn spec(&self) -> SortSpec {
        SortSpec::by(keys::entry_field(self.field.record_field()))
            .alpha(self.field.is_alpha())
            .descending(self.descending)
            .tiebreak(keys::entry_field("path"))
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::ascending(SortField::Server)
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (field, direction) = match lowered.split_once('.') {
            Some((field, direction)) => (field, Some(direction)),
            None => (lowered.as_str(), None),
        };

        let field = match field {
            "server" => SortField::Server,
            "name" => SortField::Name,
            "size" => SortField::Size,
            "date" => SortField::Date,
            other => return Err(format!("unknown sort field '{}'", other)),
        };
        let descending = match direction {
            None | Some("asc") | Some("ascending") => false,
            Some("desc") | Some("descending") => true,
            Some(other) => return Err(format!("unknown sort direction '{}'", other)),
        };

        Ok(Self { field, descending })
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.descending { "desc" } else { "asc" };
        write!(f, "{}.{}", self.field.as_str(), direction)
    }
}
