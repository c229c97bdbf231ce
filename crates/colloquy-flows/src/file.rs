//! Filesystem flow storage.
//!
//! Files live under `<root>/bots/<bot>/<dir>/<file>`.

use async_trait::async_trait;
use colloquy_core::{BotId, CoreError, FlowFileStorage};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Flow storage on the local filesystem
#[derive(Debug, Clone)]
pub struct FsFlowStorage {
    root: PathBuf,
}

impl FsFlowStorage {
    /// Storage rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir_path(&self, bot_id: &BotId, dir: &str) -> Result<PathBuf, CoreError> {
        let bot = checked(&bot_id.0)?;
        let dir = checked(dir)?;
        Ok(self.root.join("bots").join(bot).join(dir))
    }

    fn file_path(&self, bot_id: &BotId, dir: &str, file: &str) -> Result<PathBuf, CoreError> {
        Ok(self.dir_path(bot_id, dir)?.join(checked(file)?))
    }
}

/// Reject absolute paths and `..` so callers cannot leave the storage root
fn checked(part: &str) -> Result<&Path, CoreError> {
    let path = Path::new(part);
    if path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Ok(path)
    } else {
        Err(CoreError::ValidationError(format!("Invalid storage path: {}", part)))
    }
}

async fn ensure_parent(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl FlowFileStorage for FsFlowStorage {
    async fn read(&self, bot_id: &BotId, dir: &str, file: &str) -> Result<Option<String>, CoreError> {
        match fs::read_to_string(self.file_path(bot_id, dir, file)?).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(
        &self,
        bot_id: &BotId,
        dir: &str,
        file: &str,
        content: &str,
    ) -> Result<(), CoreError> {
        let path = self.file_path(bot_id, dir, file)?;
        ensure_parent(&path).await?;
        fs::write(&path, content).await?;
        Ok(())
    }

    async fn delete(&self, bot_id: &BotId, dir: &str, file: &str) -> Result<(), CoreError> {
        match fs::remove_file(self.file_path(bot_id, dir, file)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&self, bot_id: &BotId, dir: &str, from: &str, to: &str) -> Result<(), CoreError> {
        let target = self.file_path(bot_id, dir, to)?;
        ensure_parent(&target).await?;
        fs::rename(self.file_path(bot_id, dir, from)?, &target).await?;
        Ok(())
    }

    async fn exists(&self, bot_id: &BotId, dir: &str, file: &str) -> Result<bool, CoreError> {
        Ok(fs::try_exists(self.file_path(bot_id, dir, file)?).await?)
    }

    async fn list(&self, bot_id: &BotId, dir: &str, suffix: &str) -> Result<Vec<String>, CoreError> {
        let mut names = Vec::new();
        let mut pending = vec![(self.dir_path(bot_id, dir)?, String::new())];

        while let Some((path, prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(|n| format!("{}{}", prefix, n)) else {
                    continue;
                };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{}/", name)));
                } else if file_type.is_file() && name.ends_with(suffix) {
                    names.push(name);
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot() -> BotId {
        BotId("bot-1".to_string())
    }

    #[tokio::test]
    async fn test_file_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let storage = FsFlowStorage::new(root.path());

        assert_eq!(storage.read(&bot(), "flows", "main.flow.json").await.unwrap(), None);
        assert!(storage.list(&bot(), "flows", ".flow.json").await.unwrap().is_empty());

        storage.upsert(&bot(), "flows", "main.flow.json", "{}").await.unwrap();
        storage.upsert(&bot(), "flows", "main.ui.json", "{}").await.unwrap();
        storage.upsert(&bot(), "flows", "help.flow.json", "{}").await.unwrap();
        assert!(root.path().join("bots/bot-1/flows/main.flow.json").is_file());

        assert_eq!(
            storage.list(&bot(), "flows", ".flow.json").await.unwrap(),
            vec!["help.flow.json".to_string(), "main.flow.json".to_string()]
        );

        storage
            .rename(&bot(), "flows", "help.flow.json", "faq.flow.json")
            .await
            .unwrap();
        assert!(!storage.exists(&bot(), "flows", "help.flow.json").await.unwrap());
        assert_eq!(
            storage.read(&bot(), "flows", "faq.flow.json").await.unwrap().as_deref(),
            Some("{}")
        );

        storage.delete(&bot(), "flows", "faq.flow.json").await.unwrap();
        storage.delete(&bot(), "flows", "faq.flow.json").await.unwrap();
        assert!(!storage.exists(&bot(), "flows", "faq.flow.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_includes_subdirectories() {
        let root = tempfile::tempdir().unwrap();
        let storage = FsFlowStorage::new(root.path());

        storage.upsert(&bot(), "flows", "main.flow.json", "{}").await.unwrap();
        storage.upsert(&bot(), "flows", "skills/help.flow.json", "{}").await.unwrap();
        storage.upsert(&bot(), "flows", "skills/help.ui.json", "{}").await.unwrap();
        storage
            .upsert(&bot(), "flows", "skills/deep/faq.flow.json", "{}")
            .await
            .unwrap();

        assert_eq!(
            storage.list(&bot(), "flows", ".flow.json").await.unwrap(),
            vec![
                "main.flow.json".to_string(),
                "skills/deep/faq.flow.json".to_string(),
                "skills/help.flow.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_root() {
        let root = tempfile::tempdir().unwrap();
        let storage = FsFlowStorage::new(root.path());

        let result = storage.upsert(&bot(), "flows", "../../escape.json", "{}").await;
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }
}
