//! Queue entry identifiers, raw entries, and the commands they carry.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{MalformedEntry, QueueError};

/// Stream entry id: `<milliseconds>-<sequence>`, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    /// The start-of-stream id, also the cursor value that ends a sweep.
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: Option<&str>| part.and_then(|p| p.parse::<u64>().ok());
        let mut parts = s.splitn(2, '-');
        match (parse(parts.next()), parse(parts.next())) {
            (Some(ms), Some(seq)) => Ok(Self { ms, seq }),
            _ => Err(QueueError::Protocol(format!("invalid entry id '{s}'"))),
        }
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A delivered entry: its id plus the raw flat field map.
///
/// Decoding is deferred to [`QueueEntry::command`] so that malformed
/// entries still surface (and can be acknowledged) instead of failing the
/// whole read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: EntryId,
    pub fields: BTreeMap<String, String>,
}

impl QueueEntry {
    pub fn command(&self) -> Result<QueueCommand, MalformedEntry> {
        QueueCommand::from_fields(&self.fields)
    }

    /// The job this entry refers to, if the field is present at all.
    pub fn external_id(&self) -> Option<&str> {
        self.fields
            .get(FIELD_EXTERNAL_ID)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

const FIELD_ACTION: &str = "action";
const FIELD_EXTERNAL_ID: &str = "externalId";
const FIELD_SECTION_ID: &str = "sectionId";

const ACTION_START: &str = "start";
const ACTION_RETRY: &str = "retry";

/// Work requested by a queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    /// Run every selected section of the job in order.
    Start { external_id: String },
    /// Regenerate one section out of band.
    Retry {
        external_id: String,
        section_id: String,
    },
}

impl QueueCommand {
    pub fn start(external_id: impl Into<String>) -> Self {
        Self::Start {
            external_id: external_id.into(),
        }
    }

    pub fn retry(external_id: impl Into<String>, section_id: impl Into<String>) -> Self {
        Self::Retry {
            external_id: external_id.into(),
            section_id: section_id.into(),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Start { .. } => ACTION_START,
            Self::Retry { .. } => ACTION_RETRY,
        }
    }

    pub fn external_id(&self) -> &str {
        match self {
            Self::Start { external_id } | Self::Retry { external_id, .. } => external_id,
        }
    }

    /// Flat field/value pairs as written to the stream.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            (FIELD_ACTION, self.action().to_string()),
            (FIELD_EXTERNAL_ID, self.external_id().to_string()),
        ];
        if let Self::Retry { section_id, .. } = self {
            fields.push((FIELD_SECTION_ID, section_id.clone()));
        }
        fields
    }

    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, MalformedEntry> {
        let field = |name: &'static str| {
            fields
                .get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or(MalformedEntry::MissingField(name))
        };

        let external_id = field(FIELD_EXTERNAL_ID)?;
        let action = field(FIELD_ACTION)?;

        match action.as_str() {
            ACTION_START => Ok(Self::Start { external_id }),
            ACTION_RETRY => Ok(Self::Retry {
                external_id,
                section_id: field(FIELD_SECTION_ID)?,
            }),
            other => Err(MalformedEntry::UnknownAction(other.to_string())),
        }
    }
}
