//! Enforceable policy values. Each enum parses strictly: anything outside the
//! accepted spellings is an error, never a silent default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::extension_of;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("unknown {setting} value '{value}' (expected one of: {expected})")]
    Unknown {
        setting: &'static str,
        value: String,
        expected: &'static str,
    },
}

fn normalized(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect::<String>()
        .to_ascii_lowercase()
}

macro_rules! policy_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $setting:literal, $expected:literal {
            $($variant:ident => $display:literal [$($alias:literal),+]),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $display),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PolicyError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match normalized(value).as_str() {
                    $($($alias)|+ => Ok($name::$variant),)+
                    _ => Err(PolicyError::Unknown {
                        setting: $setting,
                        value: value.to_string(),
                        expected: $expected,
                    }),
                }
            }
        }
    };
}

policy_enum! {
    /// What to do when an upload or copy lands on an existing file name.
    FileConflictPolicy, "file conflict policy", "Reject, Overwrite, Rename" {
        Reject => "Reject" ["reject"],
        Overwrite => "Overwrite" ["overwrite"],
        Rename => "Rename" ["rename"],
    }
}

policy_enum! {
    DirectoryDeletePolicy, "directory delete policy", "ForbidNonEmpty, RecursiveDelete" {
        ForbidNonEmpty => "ForbidNonEmpty" ["forbidnonempty", "forbid"],
        RecursiveDelete => "RecursiveDelete" ["recursivedelete", "recursive"],
    }
}

policy_enum! {
    /// Only depth-first pre-order traversal is supported.
    TraversalMode, "traversal mode", "DepthFirst" {
        DepthFirstPreOrder => "DepthFirst" ["depthfirst", "depthfirstpreorder", "dfs"],
    }
}

policy_enum! {
    /// Only creation-time sibling order is supported.
    SiblingOrder, "sibling order", "CreationTime" {
        CreationTime => "CreationTime" ["creationtime", "createdtime", "creationorder"],
    }
}

policy_enum! {
    LogLevel, "logging level", "Info, Debug" {
        Info => "Info" ["info", "information"],
        Debug => "Debug" ["debug"],
    }
}

policy_enum! {
    ExportTarget, "export target", "Console, File" {
        Console => "Console" ["console", "stdout"],
        File => "File" ["file"],
    }
}

policy_enum! {
    StorageProvider, "storage provider", "Sqlite, SqlServer" {
        Sqlite => "Sqlite" ["sqlite", "sqlite3"],
        SqlServer => "SqlServer" ["sqlserver", "mssql"],
    }
}

/// Resolved policies consulted by the gateway on every mutating command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicySet {
    pub file_conflict: FileConflictPolicy,
    pub directory_delete: DirectoryDeletePolicy,
    pub max_upload_bytes: u64,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            file_conflict: FileConflictPolicy::Reject,
            directory_delete: DirectoryDeletePolicy::ForbidNonEmpty,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

/// First free `name(n).ext` (or `name(n)` without extension), probing
/// from n = 1.
pub fn next_available_name(name: &str, exists: impl Fn(&str) -> bool) -> String {
    let (stem, ext) = match extension_of(name) {
        Some(ext) => (&name[..name.len() - ext.len() - 1], Some(ext)),
        None => (name, None),
    };
    let mut n = 1u64;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem}({n}).{ext}"),
            None => format!("{stem}({n})"),
        };
        if !exists(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
