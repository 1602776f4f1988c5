use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::FileRef;

/// Directory holding uploaded job scripts.
///
/// The master stores scripts under a server-generated unique name and the
/// node stores them under whatever unique name the master hands it, so the
/// same name correlates the upload with the later job push.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Stores a new upload, generating its unique name.
    pub async fn put(&self, original_name: &str, content: &[u8]) -> Result<FileRef> {
        let original = base_name(original_name)?;
        let unique_name = format!("{}_{}", Uuid::new_v4().simple(), original);
        self.put_named(&unique_name, content).await?;
        Ok(FileRef {
            filename: original.to_string(),
            unique_name,
            size: content.len() as u64,
            uploaded_at: Utc::now(),
        })
    }

    /// Stores content under a name chosen by the caller, replacing any previous file.
    pub async fn put_named(&self, unique_name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.path(unique_name)?;
        self.ensure_dir().await?;
        fs::write(&path, content).await?;
        Ok(path)
    }

    pub async fn read(&self, unique_name: &str) -> Result<Vec<u8>> {
        let path = self.path(unique_name)?;
        match fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotExist(unique_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, unique_name: &str) -> bool {
        self.path(unique_name).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn path(&self, unique_name: &str) -> Result<PathBuf> {
        validate_name(unique_name)?;
        Ok(self.dir.join(unique_name))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(Error::InvalidFileName(name.to_string()));
    }
    Ok(())
}

// Clients may send a full path as the multipart file name.
fn base_name(name: &str) -> Result<&str> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    validate_name(base)?;
    Ok(base)
}
