//! Maps fine-grained data paths onto the mirror that owns them.
//!
//! Three families are recognised:
//!
//! * `holidays/...`
//! * `config/...`
//! * `sections/{id}/students/...` and `sections/{id}/attendance/...`
//!
//! Whatever follows the mirror key is the relative path inside the mirror's
//! document.

use crate::error::InvalidPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const HOLIDAYS: &str = "holidays";
pub const CONFIG: &str = "config";
pub const SECTIONS: &str = "sections";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind {
    Students,
    Attendance,
}

impl SectionKind {
    pub const ALL: [SectionKind; 2] = [SectionKind::Students, SectionKind::Attendance];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Students => "students",
            SectionKind::Attendance => "attendance",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "students" => Some(SectionKind::Students),
            "attendance" => Some(SectionKind::Attendance),
            _ => None,
        }
    }
}

/// Identifier of one mirror document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MirrorKey {
    Holidays,
    Config,
    Section { id: String, kind: SectionKind },
}

impl MirrorKey {
    pub fn section(id: impl Into<String>, kind: SectionKind) -> Self {
        MirrorKey::Section {
            id: id.into(),
            kind,
        }
    }

    /// Remote path the whole mirror document lives at.
    pub fn remote_path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MirrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorKey::Holidays => f.write_str(HOLIDAYS),
            MirrorKey::Config => f.write_str(CONFIG),
            MirrorKey::Section { id, kind } => {
                write!(f, "{}/{}/{}", SECTIONS, id, kind.as_str())
            }
        }
    }
}

impl FromStr for MirrorKey {
    type Err = InvalidPath;

    /// Parse an exact mirror key; paths reaching below a mirror are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let route = route(s)?;
        if !route.relative.is_empty() {
            return Err(InvalidPath::new(s));
        }
        Ok(route.key)
    }
}

impl TryFrom<String> for MirrorKey {
    type Error = InvalidPath;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MirrorKey> for String {
    fn from(key: MirrorKey) -> Self {
        key.to_string()
    }
}

/// A routed path: the owning mirror plus the location inside its document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub key: MirrorKey,
    pub relative: Vec<String>,
}

impl Route {
    /// Canonical fine-grained path, used when pushing to the remote.
    pub fn full_path(&self) -> String {
        if self.relative.is_empty() {
            self.key.to_string()
        } else {
            format!("{}/{}", self.key, self.relative.join("/"))
        }
    }
}

/// Split a path into segments. Surrounding slashes are ignored; empty inner
/// segments are not.
pub fn segments(path: &str) -> Result<Vec<&str>, InvalidPath> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(InvalidPath::new(path));
    }
    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(InvalidPath::new(path));
    }
    Ok(parts)
}

pub fn route(path: &str) -> Result<Route, InvalidPath> {
    let parts = segments(path)?;
    let (key, rest) = match parts.as_slice() {
        [HOLIDAYS, rest @ ..] => (MirrorKey::Holidays, rest),
        [CONFIG, rest @ ..] => (MirrorKey::Config, rest),
        [SECTIONS, id, kind, rest @ ..] => match SectionKind::parse(kind) {
            Some(kind) => (MirrorKey::section(*id, kind), rest),
            None => return Err(InvalidPath::new(path)),
        },
        _ => return Err(InvalidPath::new(path)),
    };
    Ok(Route {
        key,
        relative: rest.iter().map(|s| s.to_string()).collect(),
    })
}

/// Mirror key for `path`, or `None` when no family matches.
pub fn route_key(path: &str) -> Option<MirrorKey> {
    route(path).ok().map(|r| r.key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_attendance_path() {
        let r = route("sections/101/attendance/2026-01-05/42").unwrap();
        assert_eq!(r.key, MirrorKey::section("101", SectionKind::Attendance));
        assert_eq!(r.key.to_string(), "sections/101/attendance");
        assert_eq!(r.relative, vec!["2026-01-05", "42"]);
        assert_eq!(r.full_path(), "sections/101/attendance/2026-01-05/42");
    }

    #[test]
    fn routes_roots() {
        assert_eq!(route_key("holidays"), Some(MirrorKey::Holidays));
        assert_eq!(route_key("holidays/abc"), Some(MirrorKey::Holidays));
        assert_eq!(route_key("config/termDates"), Some(MirrorKey::Config));
        assert_eq!(
            route_key("/sections/7/students/"),
            Some(MirrorKey::section("7", SectionKind::Students))
        );
        assert!(route("config").unwrap().relative.is_empty());
    }

    #[test]
    fn rejects_everything_else() {
        for bad in [
            "",
            "/",
            "holidaysX",
            "configs/a",
            "sections",
            "sections/101",
            "sections/101/grades",
            "sections/101/grades/x",
            "students/1",
            "holidays//x",
            "sections//students",
        ] {
            assert_eq!(route_key(bad), None, "{bad:?} should not route");
        }
    }

    #[test]
    fn mirror_key_parses_exact_keys_only() {
        let key: MirrorKey = "sections/3/attendance".parse().unwrap();
        assert_eq!(key, MirrorKey::section("3", SectionKind::Attendance));
        assert!("sections/3/attendance/2026-01-01".parse::<MirrorKey>().is_err());
        assert_eq!("config".parse::<MirrorKey>().unwrap(), MirrorKey::Config);
    }

    #[test]
    fn mirror_key_serializes_as_string() {
        let key = MirrorKey::section("9", SectionKind::Students);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"sections/9/students\"");
        let back: MirrorKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
