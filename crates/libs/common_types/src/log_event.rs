use serde::{Deserialize, Serialize};

/// Per-file outcome reported by the upload tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Uploaded,
    ServerDuplicate,
    LocalDuplicate,
    ServerBetter,
    Upgraded,
    Error,
}

impl FileStatus {
    /// The tool took responsibility for the file: it is on the server now, one way or another.
    #[must_use]
    pub const fn is_absorbed(self) -> bool {
        !matches!(self, Self::Error)
    }

    #[must_use]
    pub const fn is_duplicate(self) -> bool {
        matches!(
            self,
            Self::ServerDuplicate | Self::LocalDuplicate | Self::ServerBetter
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::ServerDuplicate => "server_duplicate",
            Self::LocalDuplicate => "local_duplicate",
            Self::ServerBetter => "server_better",
            Self::Upgraded => "upgraded",
            Self::Error => "error",
        }
    }

    /// Reason stored alongside the status when the log line carries none.
    #[must_use]
    pub const fn default_reason(self) -> Option<&'static str> {
        match self {
            Self::Uploaded | Self::Error => None,
            Self::ServerDuplicate => Some("Already exists on server"),
            Self::LocalDuplicate => Some("Duplicate in upload batch"),
            Self::ServerBetter => Some("Server has better quality"),
            Self::Upgraded => Some("Replaced server version"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// A normalized event extracted from one line of the tool's structured log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    FileOutcome {
        path: String,
        filename: String,
        status: FileStatus,
        reason: Option<String>,
    },
    AlbumAssociation {
        path: String,
        filename: String,
        album: String,
    },
    TagAssociation {
        path: String,
        filename: String,
        tag: String,
    },
    AlbumCreated {
        album: String,
    },
    /// Album title read from an album description sidecar.
    AlbumDiscovered {
        album: String,
    },
    Discovery {
        media_kind: MediaKind,
    },
    Stacked,
    ToolInfo {
        version: String,
    },
    GenericError {
        message: String,
    },
}

impl LogEvent {
    /// Events that change a manifest entry and are worth persisting right away.
    #[must_use]
    pub const fn touches_manifest(&self) -> bool {
        matches!(
            self,
            Self::FileOutcome { .. } | Self::AlbumAssociation { .. } | Self::TagAssociation { .. }
        )
    }
}
