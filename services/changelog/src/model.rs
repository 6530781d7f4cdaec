//! Registry data model
//!
//! The registry document is a JSON array of projects. Field names and order
//! match the document written by the other tools sharing it, so a document
//! survives a load/save cycle unchanged.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The full set of projects, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    projects: Vec<Project>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.projects.iter().position(|p| p.version_name == name)
    }

    /// Find a project by name.
    pub fn find(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.version_name == name)
    }

    /// Find a project by name, for modification.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut Project> {
        self.projects.iter_mut().find(|p| p.version_name == name)
    }

    /// Find a project by name, appending a new maintained project if there is none.
    pub fn find_or_create(&mut self, name: &str) -> &mut Project {
        let index = match self.position(name) {
            Some(index) => index,
            None => {
                self.projects.push(Project::new(name));
                self.projects.len() - 1
            }
        };
        &mut self.projects[index]
    }

    /// Append a project. Returns the project back if the name is taken.
    pub fn insert(&mut self, project: Project) -> Result<(), Project> {
        if self.position(&project.version_name).is_some() {
            return Err(project);
        }
        self.projects.push(project);
        Ok(())
    }

    /// Remove a project by name.
    pub fn remove(&mut self, name: &str) -> Option<Project> {
        self.position(name).map(|index| self.projects.remove(index))
    }

    /// The projects, in document order.
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Iterate over the projects.
    pub fn iter(&self) -> std::slice::Iter<'_, Project> {
        self.projects.iter()
    }

    /// Number of projects.
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Whether there are no projects.
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

impl From<Vec<Project>> for Registry {
    fn from(projects: Vec<Project>) -> Self {
        Self { projects }
    }
}

impl IntoIterator for Registry {
    type Item = Project;
    type IntoIter = std::vec::IntoIter<Project>;

    fn into_iter(self) -> Self::IntoIter {
        self.projects.into_iter()
    }
}

impl<'r> IntoIterator for &'r Registry {
    type Item = &'r Project;
    type IntoIter = std::slice::Iter<'r, Project>;

    fn into_iter(self) -> Self::IntoIter {
        self.projects.iter()
    }
}

fn maintained_default() -> bool {
    true
}

/// A named artifact lineage with its build history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique, case-sensitive project name.
    pub version_name: String,

    /// Whether the project is still maintained.
    #[serde(default = "maintained_default")]
    pub maintained: bool,

    /// Single download path of projects created before per-build artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_path: Option<Utf8PathBuf>,

    /// Highest build number ever allocated, kept so numbers are not reused
    /// after the newest changelog is removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_build_number: Option<u64>,

    /// Changelogs, newest first.
    #[serde(default)]
    pub changelogs: Vec<Changelog>,
}

impl Project {
    /// A new maintained project with no history.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version_name: name.into(),
            maintained: true,
            download_path: None,
            last_build_number: None,
            changelogs: Vec::new(),
        }
    }

    /// Find a changelog by build number.
    pub fn changelog(&self, build: u64) -> Option<&Changelog> {
        self.changelogs.iter().find(|c| c.build_number == build)
    }

    /// The newest changelog.
    pub fn latest(&self) -> Option<&Changelog> {
        self.changelogs.first()
    }

    /// Download path of the newest build, falling back to the legacy
    /// project-level path.
    pub fn latest_download_path(&self) -> Option<&Utf8Path> {
        self.changelogs
            .iter()
            .find_map(|c| c.download_path.as_deref())
            .or(self.download_path.as_deref())
    }

    /// Number of recorded builds.
    pub fn build_count(&self) -> usize {
        self.changelogs.len()
    }

    /// Highest build number among the current changelogs.
    pub fn highest_build(&self) -> Option<u64> {
        self.changelogs.iter().map(|c| c.build_number).max()
    }

    /// Record a new changelog as the newest entry.
    pub fn push_changelog(&mut self, changelog: Changelog) {
        let last = self.last_build_number.unwrap_or(0);
        self.last_build_number = Some(last.max(changelog.build_number));
        self.changelogs.insert(0, changelog);
    }

    /// Remove a changelog by build number, keeping the order of the rest.
    ///
    /// The high-water mark is recorded first, so documents which never
    /// carried one still remember the removed number.
    pub fn remove_changelog(&mut self, build: u64) -> Option<Changelog> {
        let index = self.changelogs.iter().position(|c| c.build_number == build)?;
        let highest = self.highest_build().unwrap_or(0);
        let last = self.last_build_number.unwrap_or(0);
        self.last_build_number = Some(last.max(highest));
        Some(self.changelogs.remove(index))
    }
}

/// One recorded build of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changelog {
    /// Build number, unique within the project.
    pub build_number: u64,

    /// Commits included in this build, in the order they were supplied.
    #[serde(default)]
    pub commits: Vec<Commit>,

    /// When the build was recorded.
    pub timestamp: Timestamp,

    /// Root-relative path of the artifact. Absent on entries written before
    /// artifacts were tracked per build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_path: Option<Utf8PathBuf>,
}

/// A commit annotation on a changelog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    /// Short commit identifier.
    pub hash: String,
    /// Commit message.
    pub message: String,
}

/// UTC time with second precision, written as `2024-05-01T12:00:00Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current time, truncated to whole seconds.
    pub fn now() -> Self {
        Self(Utc::now().trunc_subsecs(0))
    }

    /// The underlying date and time.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.trunc_subsecs(0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let parsed = DateTime::parse_from_rfc3339(&text).map_err(serde::de::Error::custom)?;
        Ok(Self(parsed.with_timezone(&Utc).trunc_subsecs(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"[
  {
    "versionName": "LobbySystem",
    "maintained": true,
    "changelogs": [
      {
        "buildNumber": 2,
        "commits": [
          {
            "hash": "a1b2c3d",
            "message": "Fix für Spawn"
          }
        ],
        "timestamp": "2024-05-02T08:30:00Z",
        "downloadPath": "downloads/LobbySystem/LobbySystem-2.jar"
      },
      {
        "buildNumber": 1,
        "commits": [],
        "timestamp": "2024-05-01T12:00:00Z",
        "downloadPath": "downloads/LobbySystem/LobbySystem-1.jar"
      }
    ]
  },
  {
    "versionName": "1.22.0",
    "maintained": false,
    "downloadPath": "downloads/main.jar",
    "changelogs": [
      {
        "buildNumber": 1,
        "commits": [
          {
            "hash": "abc123",
            "message": "initial"
          }
        ],
        "timestamp": "2023-01-01T00:00:00Z"
      }
    ]
  }
]"#;

    #[test]
    fn document_round_trips() {
        let registry: Registry = serde_json::from_str(DOCUMENT).unwrap();
        assert_eq!(registry.len(), 2);

        let encoded = serde_json::to_string_pretty(&registry).unwrap();
        assert_eq!(encoded, DOCUMENT);
    }

    #[test]
    fn legacy_paths() {
        let registry: Registry = serde_json::from_str(DOCUMENT).unwrap();

        let lobby = registry.find("LobbySystem").unwrap();
        assert_eq!(
            lobby.latest_download_path().unwrap().as_str(),
            "downloads/LobbySystem/LobbySystem-2.jar"
        );

        let legacy = registry.find("1.22.0").unwrap();
        assert!(!legacy.maintained);
        assert_eq!(
            legacy.latest_download_path().unwrap().as_str(),
            "downloads/main.jar"
        );
    }

    #[test]
    fn maintained_defaults_to_true() {
        let registry: Registry =
            serde_json::from_str(r#"[{"versionName": "Foo", "changelogs": []}]"#).unwrap();
        assert!(registry.find("Foo").unwrap().maintained);
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let mut registry = Registry::new();
        registry.find_or_create("Foo");
        assert!(registry.find("foo").is_none());
        registry.find_or_create("foo");
        assert_eq!(registry.len(), 2);
        assert!(registry.insert(Project::new("Foo")).is_err());
    }

    #[test]
    fn changelogs_are_newest_first() {
        let mut project = Project::new("Foo");
        for build in 1..=3 {
            project.push_changelog(Changelog {
                build_number: build,
                commits: Vec::new(),
                timestamp: Timestamp::now(),
                download_path: None,
            });
        }
        let order: Vec<_> = project.changelogs.iter().map(|c| c.build_number).collect();
        assert_eq!(order, vec![3, 2, 1]);

        project.remove_changelog(2).unwrap();
        let order: Vec<_> = project.changelogs.iter().map(|c| c.build_number).collect();
        assert_eq!(order, vec![3, 1]);
        assert_eq!(project.last_build_number, Some(3));
    }

    #[test]
    fn removal_records_high_water_mark() {
        let mut registry: Registry = serde_json::from_str(DOCUMENT).unwrap();
        let lobby = registry.find_mut("LobbySystem").unwrap();
        assert_eq!(lobby.last_build_number, None);

        lobby.remove_changelog(2).unwrap();
        assert_eq!(lobby.last_build_number, Some(2));
        assert!(lobby.remove_changelog(2).is_none());
        assert_eq!(lobby.last_build_number, Some(2));
    }

    #[test]
    fn timestamps_use_second_precision() {
        let ts: Timestamp = serde_json::from_str(r#""2024-05-01T12:00:00.250Z""#).unwrap();
        assert_eq!(ts.to_string(), "2024-05-01T12:00:00Z");

        let ts: Timestamp = serde_json::from_str(r#""2024-05-01T14:00:00+02:00""#).unwrap();
        assert_eq!(
            serde_json::to_string(&ts).unwrap(),
            r#""2024-05-01T12:00:00Z""#
        );
    }
}
