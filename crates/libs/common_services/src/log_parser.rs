//! Maps one record of the upload tool's JSON log onto a [`LogEvent`].
//!
//! The tool's vocabulary is free text, so every phrase this importer understands
//! lives in the tables below. When the tool changes its wording, update the tables
//! and bump [`VOCABULARY_VERSION`].
use common_types::{FileStatus, LogEvent, MediaKind, file_name_of};
use serde_json::{Map, Value};
use tracing::debug;

/// The upload tool release line the phrase tables were recorded against.
pub const VOCABULARY_VERSION: &str = "immich-go 0.2x";

/// Exact messages that report the outcome of one file.
pub const FILE_OUTCOME_PHRASES: &[(&str, FileStatus)] = &[
    ("uploaded successfully", FileStatus::Uploaded),
    ("server has duplicate", FileStatus::ServerDuplicate),
    ("local duplicate", FileStatus::LocalDuplicate),
    ("discarded local duplicate", FileStatus::LocalDuplicate),
    ("server has a better asset", FileStatus::ServerBetter),
    ("discarded server better", FileStatus::ServerBetter),
    ("upgraded", FileStatus::Upgraded),
    ("server asset upgraded", FileStatus::Upgraded),
];

pub const ALBUM_ASSOCIATION_PHRASE: &str = "added to album";
pub const TAG_ASSOCIATION_PHRASE: &str = "tagged";
pub const ALBUM_SIDECAR_PHRASE: &str = "discovered sidecar";
pub const ALBUM_SIDECAR_TYPE: &str = "album metadata";

/// File-scoped messages that are known and carry nothing the importer tracks.
pub const INFORMATIONAL_FILE_PHRASES: &[&str] = &[
    "discovered sidecar",
    "discovered unsupported file",
    "discovered banned file",
    "discovered useless file",
    "file not selected",
    "associated metadata",
];

/// A decoded log line: the record's own timestamp and the event it maps to, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub time: Option<String>,
    pub event: Option<LogEvent>,
}

/// Decodes one raw line. Returns `None` for blank lines and anything that is not a
/// JSON object.
#[must_use]
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Ok(Value::Object(record)) = serde_json::from_str::<Value>(line) else {
        return None;
    };
    let event = parse_record(&record);
    if event.is_none()
        && let Some(msg) = unrecognized_file_message(&record)
    {
        debug!("Unrecognized file message from upload tool: {msg:?}");
    }
    Some(ParsedLine {
        time: str_field(&record, "time").map(str::to_owned),
        event,
    })
}

fn str_field<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Splits `archive.zip:inner/path.jpg` into the inner path and its basename.
#[must_use]
pub fn split_file_field(file: &str) -> (String, String) {
    let inner = file.split_once(':').map_or(file, |(_, inner)| inner);
    (inner.to_owned(), file_name_of(inner).to_owned())
}

fn message_of(record: &Map<String, Value>) -> &str {
    str_field(record, "msg").unwrap_or_default()
}

fn is_error_level(record: &Map<String, Value>) -> bool {
    str_field(record, "level").is_some_and(|level| level.eq_ignore_ascii_case("ERROR"))
}

fn file_of(record: &Map<String, Value>) -> Option<&str> {
    str_field(record, "file").filter(|f| !f.is_empty())
}

fn file_event(record: &Map<String, Value>, file: &str, msg: &str) -> Option<LogEvent> {
    let (path, filename) = split_file_field(file);
    if let Some((_, status)) = FILE_OUTCOME_PHRASES.iter().find(|(phrase, _)| *phrase == msg) {
        return Some(LogEvent::FileOutcome {
            path,
            filename,
            status: *status,
            reason: status.default_reason().map(str::to_owned),
        });
    }
    if msg == ALBUM_ASSOCIATION_PHRASE {
        let album = str_field(record, "album")?.to_owned();
        return Some(LogEvent::AlbumAssociation {
            path,
            filename,
            album,
        });
    }
    if msg == TAG_ASSOCIATION_PHRASE {
        let tag = str_field(record, "tag")?.to_owned();
        return Some(LogEvent::TagAssociation {
            path,
            filename,
            tag,
        });
    }
    if is_error_level(record) || msg.to_lowercase().contains("error") {
        let reason = str_field(record, "error").unwrap_or(msg).to_owned();
        return Some(LogEvent::FileOutcome {
            path,
            filename,
            status: FileStatus::Error,
            reason: Some(reason),
        });
    }
    None
}

fn general_event(record: &Map<String, Value>, msg: &str) -> Option<LogEvent> {
    let lower = msg.to_lowercase();
    if lower.contains("scanned image") || msg == "discovered image" {
        return Some(LogEvent::Discovery {
            media_kind: MediaKind::Image,
        });
    }
    if lower.contains("scanned video") || msg == "discovered video" {
        return Some(LogEvent::Discovery {
            media_kind: MediaKind::Video,
        });
    }
    if lower.contains("album created") {
        return Some(LogEvent::AlbumCreated {
            album: str_field(record, "album").unwrap_or_default().to_owned(),
        });
    }
    if msg == ALBUM_SIDECAR_PHRASE
        && str_field(record, "type") == Some(ALBUM_SIDECAR_TYPE)
        && let Some(title) = str_field(record, "title")
    {
        return Some(LogEvent::AlbumDiscovered {
            album: title.to_owned(),
        });
    }
    if msg == "stacked" || lower.contains("stacked with") {
        return Some(LogEvent::Stacked);
    }
    None
}

/// Classifies one decoded record. Uninteresting records map to `None`.
#[must_use]
pub fn parse_record(record: &Map<String, Value>) -> Option<LogEvent> {
    let msg = message_of(record);
    if let Some(file) = file_of(record)
        && let Some(event) = file_event(record, file, msg)
    {
        return Some(event);
    }
    if let Some(event) = general_event(record, msg) {
        return Some(event);
    }
    if let Some(version) = str_field(record, "version") {
        return Some(LogEvent::ToolInfo {
            version: version.to_owned(),
        });
    }
    if is_error_level(record) && file_of(record).is_none() {
        let message = str_field(record, "error").unwrap_or(msg).to_owned();
        return Some(LogEvent::GenericError { message });
    }
    None
}

fn is_known_file_phrase(msg: &str) -> bool {
    msg == ALBUM_ASSOCIATION_PHRASE
        || msg == TAG_ASSOCIATION_PHRASE
        || INFORMATIONAL_FILE_PHRASES.contains(&msg)
}

/// The message of a file-scoped record that matches nothing in the phrase tables.
/// A `Some` here is vocabulary drift: the tool said something about a file that
/// the importer silently ignores.
#[must_use]
pub fn unrecognized_file_message(record: &Map<String, Value>) -> Option<&str> {
    file_of(record)?;
    let msg = message_of(record);
    if is_known_file_phrase(msg) || parse_record(record).is_some() {
        return None;
    }
    Some(msg)
}
