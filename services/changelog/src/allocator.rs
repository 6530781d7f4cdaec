//! Build number allocation

use crate::model::Project;

/// The build number for the next changelog of `project`.
///
/// One more than the highest build the project has ever had, counting both
/// the current changelogs and the recorded high-water mark, so a removed
/// build number is never handed out again. A project without history (or
/// one that does not exist yet) starts at 1.
///
/// The result is only meaningful while the caller holds the project lock
/// through to saving the new changelog.
pub fn next_build_number(project: Option<&Project>) -> u64 {
    let Some(project) = project else {
        return 1;
    };

    let highest = project.highest_build().unwrap_or(0);
    let recorded = project.last_build_number.unwrap_or(0);
    highest.max(recorded) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Changelog, Timestamp};

    fn changelog(build: u64) -> Changelog {
        Changelog {
            build_number: build,
            commits: Vec::new(),
            timestamp: Timestamp::now(),
            download_path: None,
        }
    }

    #[test]
    fn first_build_is_one() {
        assert_eq!(next_build_number(None), 1);
        assert_eq!(next_build_number(Some(&Project::new("Foo"))), 1);
    }

    #[test]
    fn uses_highest_existing_build() {
        let mut project = Project::new("Foo");
        // Legacy documents are not necessarily in order.
        project.changelogs = vec![changelog(2), changelog(7), changelog(3)];
        assert_eq!(next_build_number(Some(&project)), 8);
    }

    #[test]
    fn removed_builds_are_not_reused() {
        let mut project = Project::new("Foo");
        for build in 1..=3 {
            project.push_changelog(changelog(build));
        }
        project.remove_changelog(3);
        assert_eq!(next_build_number(Some(&project)), 4);

        project.remove_changelog(2);
        project.remove_changelog(1);
        assert_eq!(next_build_number(Some(&project)), 4);
    }

    #[test]
    fn removal_without_recorded_mark() {
        let mut project = Project::new("Foo");
        project.changelogs = vec![changelog(3), changelog(2), changelog(1)];
        project.last_build_number = None;

        project.remove_changelog(3);
        assert_eq!(next_build_number(Some(&project)), 4);
    }
}
