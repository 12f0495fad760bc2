use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type PageId = i64;
pub type RevisionId = i64;

pub const NS_MAIN: i32 = 0;
pub const NS_FILE: i32 = 6;
pub const NS_TEMPLATE: i32 = 10;

/// Canonical namespace names. The main namespace has no prefix.
const NAMESPACES: &[(i32, &str)] = &[
    (-2, "Media"),
    (-1, "Special"),
    (1, "Talk"),
    (2, "User"),
    (3, "User talk"),
    (4, "Project"),
    (5, "Project talk"),
    (6, "File"),
    (7, "File talk"),
    (8, "MediaWiki"),
    (9, "MediaWiki talk"),
    (10, "Template"),
    (11, "Template talk"),
    (12, "Help"),
    (13, "Help talk"),
    (14, "Category"),
    (15, "Category talk"),
];

pub fn namespace_name(namespace: i32) -> Option<&'static str> {
    NAMESPACES
        .iter()
        .find(|(id, _)| *id == namespace)
        .map(|(_, name)| *name)
}

/// A page identity: namespace plus the title text in its display form
/// (spaces, not underscores).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Title {
    pub namespace: i32,
    pub text: String,
}

impl Title {
    pub fn new(namespace: i32, text: impl Into<String>) -> Self {
        let text = text.into().replace('_', " ");
        Self {
            namespace,
            text: text.trim().to_string(),
        }
    }

    /// Parse a prefixed title such as `Template:Foo bar`. Unknown prefixes
    /// stay part of a main-namespace title.
    pub fn parse(prefixed: &str) -> Self {
        if let Some((prefix, rest)) = prefixed.split_once(':') {
            let wanted = prefix.replace('_', " ");
            if let Some((id, _)) = NAMESPACES
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(wanted.trim()))
            {
                return Self::new(*id, rest);
            }
        }
        Self::new(NS_MAIN, prefixed)
    }

    pub fn is_file(&self) -> bool {
        self.namespace == NS_FILE
    }

    pub fn db_key(&self) -> String {
        self.text.replace(' ', "_")
    }

    pub fn prefixed_db_key(&self) -> String {
        match namespace_name(self.namespace) {
            Some(name) => format!("{}:{}", name.replace(' ', "_"), self.db_key()),
            None => self.db_key(),
        }
    }

    pub fn prefixed_text(&self) -> String {
        match namespace_name(self.namespace) {
            Some(name) => format!("{}:{}", name, self.text),
            None => self.text.clone(),
        }
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed_text())
    }
}

/// Link table whose backlinks must be refreshed after a dependency changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DependencyTable {
    Templatelinks,
    Imagelinks,
}

impl DependencyTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyTable::Templatelinks => "templatelinks",
            DependencyTable::Imagelinks => "imagelinks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "templatelinks" => Some(DependencyTable::Templatelinks),
            "imagelinks" => Some(DependencyTable::Imagelinks),
            _ => None,
        }
    }

    /// Value of the `X-Restbase-Mode` header for batch refreshes.
    pub fn restbase_mode(&self) -> &'static str {
        match self {
            DependencyTable::Templatelinks => "templates",
            DependencyTable::Imagelinks => "files",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    Edit,
    Delete,
    File,
}

impl EditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditMode::Edit => "edit",
            EditMode::Delete => "delete",
            EditMode::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "edit" => Some(EditMode::Edit),
            "delete" => Some(EditMode::Delete),
            "file" => Some(EditMode::File),
            _ => None,
        }
    }
}

/// The page an event is about, with its latest revision at event time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub title: Title,
    pub latest_revision: Option<RevisionId>,
}

impl Subject {
    pub fn new(title: Title, latest_revision: Option<RevisionId>) -> Self {
        Self {
            title,
            latest_revision,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Edit,
    Delete,
    Undelete,
    Move {
        to: Subject,
        old_revision: RevisionId,
        new_revision: RevisionId,
    },
    RevisionVisibility {
        revisions: Vec<RevisionId>,
    },
    Upload,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Edit => "edit",
            EventKind::Delete => "delete",
            EventKind::Undelete => "undelete",
            EventKind::Move { .. } => "move",
            EventKind::RevisionVisibility { .. } => "rev_visibility",
            EventKind::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub subject: Subject,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(subject: Subject, kind: EventKind) -> Self {
        Self {
            subject,
            kind,
            occurred_at: Utc::now(),
        }
    }
}
