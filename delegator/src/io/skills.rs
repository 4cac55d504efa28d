//! Skill bodies attached to task prompts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

/// A skill whose content was found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skill {
    pub name: String,
    pub content: String,
}

/// Result of resolving a list of skill names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadedSkills {
    pub found: Vec<Skill>,
    /// Names with no file; still named in the prompt.
    pub missing: Vec<String>,
}

/// Skill files under one directory: `<dir>/<name>/SKILL.md` or `<dir>/<name>.md`.
#[derive(Debug, Clone, Default)]
pub struct SkillLibrary {
    dir: Option<PathBuf>,
}

impl SkillLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn load(&self, names: &[String]) -> Result<LoadedSkills> {
        let mut loaded = LoadedSkills::default();
        for name in names {
            match self.find(name) {
                Some(path) => {
                    let content = fs::read_to_string(&path)
                        .with_context(|| format!("read skill {}", path.display()))?;
                    debug!(skill = %name, path = %path.display(), "loaded skill");
                    loaded.found.push(Skill {
                        name: name.clone(),
                        content: content.trim().to_string(),
                    });
                }
                None => {
                    warn!(skill = %name, "skill not found");
                    loaded.missing.push(name.clone());
                }
            }
        }
        Ok(loaded)
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        let dir = self.dir.as_deref()?;
        if name.contains("..") || Path::new(name).is_absolute() {
            return None;
        }
        [dir.join(name).join("SKILL.md"), dir.join(format!("{name}.md"))]
            .into_iter()
            .find(|path| path.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_both_layouts_and_reports_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("ui-kit")).expect("mkdir");
        fs::write(temp.path().join("ui-kit/SKILL.md"), "Use tokens.\n").expect("write");
        fs::write(temp.path().join("testing.md"), "Write tests.").expect("write");

        let library = SkillLibrary::new(Some(temp.path().to_path_buf()));
        let names = ["ui-kit", "testing", "absent"].map(str::to_string);
        let loaded = library.load(&names).expect("load");
        assert_eq!(
            loaded.found,
            vec![
                Skill {
                    name: "ui-kit".to_string(),
                    content: "Use tokens.".to_string()
                },
                Skill {
                    name: "testing".to_string(),
                    content: "Write tests.".to_string()
                },
            ]
        );
        assert_eq!(loaded.missing, vec!["absent".to_string()]);
    }

    #[test]
    fn no_directory_means_everything_missing() {
        let loaded = SkillLibrary::default()
            .load(&["ui-kit".to_string()])
            .expect("load");
        assert!(loaded.found.is_empty());
        assert_eq!(loaded.missing, vec!["ui-kit".to_string()]);
    }

    #[test]
    fn traversal_names_are_not_resolved() {
        let temp = tempfile::tempdir().expect("tempdir");
        let library = SkillLibrary::new(Some(temp.path().join("skills")));
        fs::write(temp.path().join("secret.md"), "x").expect("write");
        let loaded = library.load(&["../secret".to_string()]).expect("load");
        assert_eq!(loaded.missing, vec!["../secret".to_string()]);
    }
}
