use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of [`KeywordStore::add`]; carries the normalized keyword
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(String),
    AlreadyExists(String),
}

/// Result of [`KeywordStore::remove`]; carries the normalized keyword
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed(String),
    NotFound(String),
}

/// Lower-case and trim a user-supplied keyword.
///
/// `None` if nothing remains or the keyword spans several lines, since the
/// file stores exactly one keyword per line.
pub fn normalize(raw: &str) -> Option<String> {
    let keyword = raw.trim().to_lowercase();
    if keyword.is_empty() || keyword.contains(['\n', '\r']) {
        None
    } else {
        Some(keyword)
    }
}

/// Flat text file of keywords, one per line.
///
/// Every mutation is a load-modify-save round trip over the whole file.
#[derive(Debug, Clone)]
pub struct KeywordStore {
    path: PathBuf,
}

impl KeywordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the keyword list, creating an empty file if none exists yet.
    pub async fn load(&self) -> Result<Vec<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Keyword file {} not found, creating it", self.path.display());
                self.save(&[]).await?;
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read keyword file: {}", self.path.display())
                })
            }
        };

        let mut keywords: Vec<String> = Vec::new();
        for keyword in content.lines().filter_map(normalize) {
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        debug!("Keywords loaded: {:?}", keywords);
        Ok(keywords)
    }

    pub async fn save(&self, keywords: &[String]) -> Result<()> {
        let mut content = String::new();
        for keyword in keywords {
            content.push_str(keyword);
            content.push('\n');
        }
        super::write_atomic(&self.path, content.as_bytes())
            .await
            .with_context(|| format!("Failed to save keyword file: {}", self.path.display()))?;
        info!("Keywords saved: {:?}", keywords);
        Ok(())
    }

    pub async fn add(&self, raw: &str) -> Result<AddOutcome> {
        let keyword = normalize(raw).context("Keyword is empty or spans several lines")?;
        let mut keywords = self.load().await?;
        if keywords.contains(&keyword) {
            return Ok(AddOutcome::AlreadyExists(keyword));
        }
        keywords.push(keyword.clone());
        self.save(&keywords).await?;
        Ok(AddOutcome::Added(keyword))
    }

    pub async fn remove(&self, raw: &str) -> Result<RemoveOutcome> {
        let keyword = normalize(raw).context("Keyword is empty or spans several lines")?;
        let mut keywords = self.load().await?;
        let before = keywords.len();
        keywords.retain(|k| k != &keyword);
        if keywords.len() == before {
            return Ok(RemoveOutcome::NotFound(keyword));
        }
        self.save(&keywords).await?;
        Ok(RemoveOutcome::Removed(keyword))
    }

    pub async fn reset(&self) -> Result<()> {
        self.save(&[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> KeywordStore {
        KeywordStore::new(dir.path().join("keywords.txt"))
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Pixel \n"), Some("pixel".to_string()));
        assert_eq!(normalize("   "), None);
    }

    #[tokio::test]
    async fn test_missing_file_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.load().await.unwrap().is_empty());
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_load_normalizes_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "Drone\n\n  xiaomi\nDRONE\n").unwrap();

        assert_eq!(store.load().await.unwrap(), vec!["drone", "xiaomi"]);
    }

    #[tokio::test]
    async fn test_add_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(
            store.add("Pixel").await.unwrap(),
            AddOutcome::Added("pixel".to_string())
        );
        assert_eq!(
            store.add("pixel").await.unwrap(),
            AddOutcome::AlreadyExists("pixel".to_string())
        );
        assert_eq!(store.load().await.unwrap(), vec!["pixel"]);
    }

    #[tokio::test]
    async fn test_add_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add("zeta").await.unwrap();
        store.add("alpha").await.unwrap();
        assert_eq!(store.load().await.unwrap(), vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_remove_missing_leaves_list_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("drone").await.unwrap();

        assert_eq!(
            store.remove("camera").await.unwrap(),
            RemoveOutcome::NotFound("camera".to_string())
        );
        assert_eq!(store.load().await.unwrap(), vec!["drone"]);

        assert_eq!(
            store.remove("DRONE").await.unwrap(),
            RemoveOutcome::Removed("drone".to_string())
        );
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("a").await.unwrap();
        store.add("b").await.unwrap();

        store.reset().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[test]
    fn test_normalize_rejects_line_breaks() {
        assert_eq!(normalize("drone\nsale"), None);
        assert_eq!(normalize("drone\r\nsale"), None);
        assert_eq!(normalize("  drone sale \n"), Some("drone sale".to_string()));
    }

    #[tokio::test]
    async fn test_multi_line_keyword_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("pixel").await.unwrap();

        assert!(store.add("drone\nsale").await.is_err());
        assert!(store.remove("drone\nsale").await.is_err());
        assert_eq!(store.load().await.unwrap(), vec!["pixel"]);
    }

    #[tokio::test]
    async fn test_add_rejects_blank() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).add("   ").await.is_err());
    }
}
