//! Per-file project workspaces.
//!
//! Each translated file gets `<projects_dir>/<stem>_<YYYYmmdd_HHMMSS>/` with
//! `original/`, `chunks/` and `translated/` subfolders.

use crate::chunk::Chunk;
use crate::document::write_atomic;
use crate::error::{Result, TranslateError};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SUBFOLDERS: [&str; 3] = ["original", "chunks", "translated"];

/// An existing project directory.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
}

impl Project {
    pub fn original_dir(&self) -> PathBuf {
        self.path.join("original")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.path.join("chunks")
    }

    pub fn translated_dir(&self) -> PathBuf {
        self.path.join("translated")
    }

    pub fn translated_path(&self, file_name: &str) -> PathBuf {
        self.translated_dir().join(file_name)
    }

    /// Copy the input file into `original/`.
    pub fn copy_original(&self, input: &Path) -> Result<PathBuf> {
        let file_name = input
            .file_name()
            .ok_or_else(|| TranslateError::FileNotFound(input.display().to_string()))?;
        let dest = self.original_dir().join(file_name);
        std::fs::copy(input, &dest)?;
        Ok(dest)
    }

    /// Write each chunk as `chunks/chunk_000.json`, a JSON object of key to text.
    pub fn save_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let dir = self.chunks_dir();
        for chunk in chunks {
            let path = dir.join(format!("chunk_{:03}.json", chunk.index));
            let json = serde_json::to_string_pretty(&chunk.to_json_object())?;
            write_atomic(&path, json.as_bytes())?;
        }
        debug!("Saved {} chunk file(s) to {}", chunks.len(), dir.display());
        Ok(())
    }
}

/// Summary of a project for listings.
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Local>,
    pub original_files: usize,
    pub chunk_files: usize,
    pub translated_files: usize,
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .count()
        })
        .unwrap_or(0)
}

pub struct ProjectManager {
    root: PathBuf,
}

impl ProjectManager {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: projects_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh project for a file stem.
    ///
    /// Two projects created for the same stem within one second get a
    /// numeric suffix instead of sharing a directory.
    pub fn create(&self, stem: &str) -> Result<Project> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{}_{}", stem, timestamp);

        let mut name = base.clone();
        let mut suffix = 2;
        while self.root.join(&name).exists() {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }

        let path = self.root.join(&name);
        for sub in SUBFOLDERS {
            std::fs::create_dir_all(path.join(sub))?;
        }
        debug!("Created project {}", path.display());

        Ok(Project { name, path })
    }

    /// All projects, newest first.
    pub fn list(&self) -> Result<Vec<ProjectInfo>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut projects = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let modified: DateTime<Local> = entry.metadata()?.modified()?.into();
            projects.push(ProjectInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                original_files: count_files(&path.join("original")),
                chunk_files: count_files(&path.join("chunks")),
                translated_files: count_files(&path.join("translated")),
                path,
                modified,
            });
        }

        projects.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(projects)
    }

    /// Delete one project by directory name.
    pub fn delete(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(TranslateError::Config(format!(
                "Invalid project name: {:?}",
                name
            )));
        }
        let path = self.root.join(name);
        if !path.is_dir() {
            return Err(TranslateError::FileNotFound(path.display().to_string()));
        }
        std::fs::remove_dir_all(&path)?;
        info!("Deleted project {}", name);
        Ok(())
    }

    /// Delete every project, returning how many were removed.
    pub fn delete_all(&self) -> Result<usize> {
        let projects = self.list()?;
        for project in &projects {
            std::fs::remove_dir_all(&project.path)?;
        }
        info!("Deleted {} project(s)", projects.len());
        Ok(projects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TextUnit;

    #[test]
    fn test_create_project_layout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(dir.path());
        let project = manager.create("strings").unwrap();

        assert!(project.name.starts_with("strings_"));
        assert!(project.original_dir().is_dir());
        assert!(project.chunks_dir().is_dir());
        assert!(project.translated_dir().is_dir());
    }

    #[test]
    fn test_same_stem_gets_unique_directories() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(dir.path());
        let a = manager.create("app").unwrap();
        let b = manager.create("app").unwrap();
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn test_save_chunks_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(dir.path());
        let project = manager.create("ui").unwrap();

        let input = dir.path().join("ui.json");
        std::fs::write(&input, "{}").unwrap();
        project.copy_original(&input).unwrap();
        project
            .save_chunks(&[
                Chunk {
                    index: 0,
                    units: vec![TextUnit::new("a", "Hello")],
                },
                Chunk {
                    index: 1,
                    units: vec![TextUnit::new("b", "World")],
                },
            ])
            .unwrap();

        let saved = std::fs::read_to_string(project.chunks_dir().join("chunk_001.json")).unwrap();
        assert_eq!(saved, "{\n  \"b\": \"World\"\n}");

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].original_files, 1);
        assert_eq!(listed[0].chunk_files, 2);
        assert_eq!(listed[0].translated_files, 0);
    }

    #[test]
    fn test_delete_and_delete_all() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(dir.path());
        let a = manager.create("a").unwrap();
        manager.create("b").unwrap();
        manager.create("c").unwrap();

        manager.delete(&a.name).unwrap();
        assert!(!a.path.exists());
        assert!(manager.delete(&a.name).is_err());
        assert!(manager.delete("../escape").is_err());

        assert_eq!(manager.delete_all().unwrap(), 2);
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_missing_root() {
        let manager = ProjectManager::new("/definitely/not/a/projects/dir");
        assert!(manager.list().unwrap().is_empty());
    }
}
