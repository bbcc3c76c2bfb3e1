use crate::types::{EventId, FieldValue, LogLevel, Timestamp};
use internment::Intern;
use serde::{Deserialize, Serialize};

/// One decoded event record.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: Intern<String>,
    /// Extended timestamp, when the event header carries one.
    pub timestamp: Option<Timestamp>,
    pub log_level: Option<LogLevel>,
    /// Items of the stream-declared event context.
    pub common_context: Vec<(Intern<String>, FieldValue)>,
    /// Items of the event-declared context.
    pub specific_context: Vec<(Intern<String>, FieldValue)>,
    pub payload: Vec<(Intern<String>, FieldValue)>,
}
