use serde::{Deserialize, Serialize};

/// Access mode requested when opening a trace.
///
/// Only [`OpenMode::ReadOnly`] is implemented; asking for
/// [`OpenMode::ReadWrite`] fails with
/// [`Error::UnsupportedWriteMode`](crate::Error::UnsupportedWriteMode).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Clock rendering options, carried by the trace for display layers.
///
/// These affect how outer layers print timestamps (raw cycles vs seconds,
/// date formatting, GMT vs local, a fixed offset); they do not change how
/// events are decoded.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub struct ClockOptions {
    /// Print timestamps in the raw clock unit instead of nanoseconds.
    pub raw: bool,
    /// Print timestamps as plain seconds rather than wall-clock time.
    pub seconds: bool,
    /// Include the date when printing wall-clock time.
    pub date: bool,
    /// Use GMT rather than the local time zone.
    pub gmt: bool,
    /// Offset, in seconds, added to every printed timestamp.
    pub offset_seconds: u64,
}
