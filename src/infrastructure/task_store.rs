use crate::domain::models::TaskRecord;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::frontmatter::set_frontmatter_field;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const DURATION_KEY: &str = "duration";
const NOTE_EXTENSION: &str = "md";

/// Task notes and folders addressed by vault-relative paths; `""` and `"/"` are the root.
pub trait TaskStore: Send + Sync {
    fn directory_exists(&self, directory: &str) -> Result<bool, InfraError>;
    /// Markdown notes directly inside `directory`, sorted by base name.
    fn list_tasks(&self, directory: &str) -> Result<Vec<TaskRecord>, InfraError>;
    fn write_duration(&self, task: &TaskRecord, duration: &str) -> Result<(), InfraError>;
    /// Sub-folders of the folder typed so far, sorted.
    fn suggest_directories(&self, input: &str) -> Result<Vec<String>, InfraError>;
}

fn normalized_directory(directory: &str) -> Result<PathBuf, InfraError> {
    let trimmed = directory.trim().trim_start_matches('/').trim_end_matches('/');
    let path = PathBuf::from(trimmed);
    if path
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(InfraError::TaskNote(format!(
            "directory '{directory}' is outside the vault"
        )));
    }
    Ok(path)
}

fn base_name(path: &Path) -> Option<String> {
    let is_note = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case(NOTE_EXTENSION));
    if !is_note {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(ToOwned::to_owned)
}

fn relative_display(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone)]
pub struct FsTaskStore {
    vault_root: PathBuf,
}

impl FsTaskStore {
    pub fn new(vault_root: impl Into<PathBuf>) -> Self {
        Self {
            vault_root: vault_root.into(),
        }
    }

    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    fn resolve(&self, directory: &str) -> Result<PathBuf, InfraError> {
        Ok(self.vault_root.join(normalized_directory(directory)?))
    }
}

impl TaskStore for FsTaskStore {
    fn directory_exists(&self, directory: &str) -> Result<bool, InfraError> {
        Ok(self.resolve(directory)?.is_dir())
    }

    fn list_tasks(&self, directory: &str) -> Result<Vec<TaskRecord>, InfraError> {
        let relative = normalized_directory(directory)?;
        let mut tasks = Vec::new();
        for entry in fs::read_dir(self.vault_root.join(&relative))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = PathBuf::from(entry.file_name());
            let Some(base_name) = base_name(&file_name) else {
                tracing::debug!(file = ?file_name, "skipping non-note file");
                continue;
            };
            tasks.push(TaskRecord {
                base_name,
                path: relative.join(&file_name),
            });
        }
        tasks.sort_by(|left, right| left.base_name.cmp(&right.base_name));
        Ok(tasks)
    }

    fn write_duration(&self, task: &TaskRecord, duration: &str) -> Result<(), InfraError> {
        let path = self.vault_root.join(&task.path);
        let content = fs::read_to_string(&path)?;
        let updated = set_frontmatter_field(&content, DURATION_KEY, duration)?;
        fs::write(&path, updated)?;
        Ok(())
    }

    fn suggest_directories(&self, input: &str) -> Result<Vec<String>, InfraError> {
        let relative = normalized_directory(input)?;
        let base = self.vault_root.join(&relative);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut suggestions = Vec::new();
        for entry in fs::read_dir(&base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            suggestions.push(relative_display(&relative.join(name)));
        }
        suggestions.sort();
        Ok(suggestions)
    }
}

/// Vault held in memory; notes are keyed by vault-relative path.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    directories: Mutex<BTreeSet<String>>,
    notes: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directory(self, directory: &str) -> Self {
        if let Ok(mut directories) = self.directories.lock() {
            directories.insert(directory.trim_matches('/').to_string());
        }
        self
    }

    pub fn with_note(self, path: &str, content: &str) -> Self {
        let path = path.trim_start_matches('/').to_string();
        if let Some(parent) = Path::new(&path).parent() {
            let parent = relative_display(parent);
            if let Ok(mut directories) = self.directories.lock() {
                directories.insert(parent);
            }
        }
        if let Ok(mut notes) = self.notes.lock() {
            notes.insert(path, content.to_string());
        }
        self
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn note(&self, path: &str) -> Option<String> {
        self.notes.lock().ok()?.get(path).cloned()
    }

    fn lock_error(name: &str) -> InfraError {
        InfraError::TaskNote(format!("{name} lock poisoned"))
    }

    fn key(directory: &str) -> Result<String, InfraError> {
        Ok(relative_display(&normalized_directory(directory)?))
    }
}

impl TaskStore for InMemoryTaskStore {
    fn directory_exists(&self, directory: &str) -> Result<bool, InfraError> {
        let key = Self::key(directory)?;
        if key.is_empty() {
            return Ok(true);
        }
        let directories = self
            .directories
            .lock()
            .map_err(|_| Self::lock_error("directories"))?;
        Ok(directories.contains(&key))
    }

    fn list_tasks(&self, directory: &str) -> Result<Vec<TaskRecord>, InfraError> {
        let key = Self::key(directory)?;
        let notes = self.notes.lock().map_err(|_| Self::lock_error("notes"))?;
        let mut tasks = notes
            .keys()
            .map(PathBuf::from)
            .filter(|path| {
                path.parent()
                    .is_some_and(|parent| relative_display(parent) == key)
            })
            .filter_map(|path| {
                let base_name = base_name(&path)?;
                Some(TaskRecord { base_name, path })
            })
            .collect::<Vec<_>>();
        tasks.sort_by(|left, right| left.base_name.cmp(&right.base_name));
        Ok(tasks)
    }

    fn write_duration(&self, task: &TaskRecord, duration: &str) -> Result<(), InfraError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(InfraError::TaskNote(format!(
                "write rejected for {}",
                task.path.display()
            )));
        }
        let key = relative_display(&task.path);
        let mut notes = self.notes.lock().map_err(|_| Self::lock_error("notes"))?;
        let content = notes
            .get(&key)
            .ok_or_else(|| InfraError::TaskNote(format!("note {key} not found")))?;
        let updated = set_frontmatter_field(content, DURATION_KEY, duration)?;
        notes.insert(key, updated);
        Ok(())
    }

    fn suggest_directories(&self, input: &str) -> Result<Vec<String>, InfraError> {
        let key = Self::key(input)?;
        let directories = self
            .directories
            .lock()
            .map_err(|_| Self::lock_error("directories"))?;
        Ok(directories
            .iter()
            .filter(|directory| {
                Path::new(directory.as_str())
                    .parent()
                    .is_some_and(|parent| relative_display(parent) == key)
                    && !directory.is_empty()
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::frontmatter::read_frontmatter_field;

    fn vault() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir_all(dir.path().join("Tasks/archive")).expect("create tasks");
        fs::create_dir_all(dir.path().join("Projects")).expect("create projects");
        fs::create_dir_all(dir.path().join(".obsidian")).expect("create hidden");
        fs::write(dir.path().join("Tasks/review.md"), "# Review\n").expect("write note");
        fs::write(dir.path().join("Tasks/deploy.MD"), "").expect("write note");
        fs::write(dir.path().join("Tasks/image.png"), "png").expect("write file");
        fs::write(dir.path().join("Tasks/archive/old.md"), "").expect("write nested");
        dir
    }

    #[test]
    fn lists_direct_markdown_children_only() {
        let dir = vault();
        let store = FsTaskStore::new(dir.path());

        let tasks = store.list_tasks("/Tasks/").expect("list succeeds");
        let names = tasks.iter().map(|task| task.base_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["deploy", "review"]);
        assert_eq!(tasks[1].path, PathBuf::from("Tasks/review.md"));
    }

    #[test]
    fn directory_checks_and_escape_rejection() {
        let dir = vault();
        let store = FsTaskStore::new(dir.path());

        assert!(store.directory_exists("Tasks").expect("check succeeds"));
        assert!(store.directory_exists("/").expect("check succeeds"));
        assert!(!store.directory_exists("Missing").expect("check succeeds"));
        assert!(!store.directory_exists("Tasks/review.md").expect("check succeeds"));
        assert!(store.directory_exists("../outside").is_err());
    }

    #[test]
    fn writes_duration_into_front_matter() {
        let dir = vault();
        let store = FsTaskStore::new(dir.path());
        let task = TaskRecord {
            base_name: "review".to_string(),
            path: PathBuf::from("Tasks/review.md"),
        };

        store.write_duration(&task, "1h 30m").expect("write succeeds");

        let content = fs::read_to_string(dir.path().join("Tasks/review.md")).expect("read note");
        assert_eq!(
            read_frontmatter_field(&content, DURATION_KEY).expect("readable"),
            Some("1h 30m".to_string())
        );
        assert!(content.ends_with("# Review\n"));
    }

    #[test]
    fn suggests_visible_subdirectories() {
        let dir = vault();
        let store = FsTaskStore::new(dir.path());

        assert_eq!(
            store.suggest_directories("").expect("suggest succeeds"),
            vec!["Projects".to_string(), "Tasks".to_string()]
        );
        assert_eq!(
            store.suggest_directories("/Tasks").expect("suggest succeeds"),
            vec!["Tasks/archive".to_string()]
        );
        assert!(store.suggest_directories("Nope").expect("suggest succeeds").is_empty());
    }

    #[test]
    fn in_memory_store_mirrors_filesystem_behavior() {
        let store = InMemoryTaskStore::new()
            .with_directory("Empty")
            .with_note("Tasks/review.md", "# Review\n")
            .with_note("Tasks/notes.txt", "")
            .with_note("Tasks/archive/old.md", "");

        assert!(store.directory_exists("/Tasks").expect("check succeeds"));
        assert!(store.directory_exists("Empty").expect("check succeeds"));
        assert!(!store.directory_exists("Missing").expect("check succeeds"));

        let tasks = store.list_tasks("Tasks").expect("list succeeds");
        assert_eq!(tasks.len(), 1);
        store.write_duration(&tasks[0], "5m").expect("write succeeds");
        let content = store.note("Tasks/review.md").expect("note exists");
        assert_eq!(
            read_frontmatter_field(&content, DURATION_KEY).expect("readable"),
            Some("5m".to_string())
        );

        assert_eq!(
            store.suggest_directories("").expect("suggest succeeds"),
            vec!["Empty".to_string(), "Tasks".to_string()]
        );

        store.fail_writes(true);
        assert!(store.write_duration(&tasks[0], "6m").is_err());
    }
}
