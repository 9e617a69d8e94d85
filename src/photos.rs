use anyhow::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const PHOTOS_DIR: &str = "photos";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoCategory {
    Student,
    Contact,
}

impl PhotoCategory {
    pub fn dir(self) -> &'static str {
        match self {
            Self::Student => "student_photos",
            Self::Contact => "contact_photos",
        }
    }
}

/// Narrow blob-store contract used by the submission workflow. `put` returns
/// the stored key (`<category>_photos/<ts>_<filename>`); turning a key into a
/// retrieval URL is the caller's concern. `Sync` because contact uploads fan
/// out across scoped threads sharing one store.
pub trait ObjectStore: Sync {
    fn put(&self, category: PhotoCategory, original_name: &str, bytes: &[u8])
        -> anyhow::Result<String>;
}

/// Filesystem store rooted at `<workspace>/photos`.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
}

impl PhotoStore {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        let root = workspace.join(PHOTOS_DIR);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create photo root {}", root.to_string_lossy()))?;
        Ok(Self { root })
    }

    /// Maps a retrieval URL back to the on-disk path of a stored blob. Only
    /// the trailing `<category>_photos/<file>` part of the URL is trusted;
    /// whatever base preceded it (including a reconfigured one) is ignored.
    pub fn resolve_url(&self, url: &str) -> Option<PathBuf> {
        let key = extract_key(url)?;
        let mut parts = key.splitn(2, '/');
        let dir = parts.next()?;
        let file = parts.next()?;
        if file.is_empty() || file.contains('/') || file.contains("..") {
            return None;
        }
        let path = self.root.join(dir).join(file);
        path.is_file().then_some(path)
    }

    /// Every stored key, in no particular order.
    pub fn list_keys(&self) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        for category in [PhotoCategory::Student, PhotoCategory::Contact] {
            let dir = self.root.join(category.dir());
            if !dir.is_dir() {
                continue;
            }
            for ent in std::fs::read_dir(&dir)
                .with_context(|| format!("failed to read {}", dir.to_string_lossy()))?
            {
                let ent = ent?;
                if !ent.path().is_file() {
                    continue;
                }
                if let Some(name) = ent.file_name().to_str() {
                    keys.push(format!("{}/{}", category.dir(), name));
                }
            }
        }
        Ok(keys)
    }
}

impl ObjectStore for PhotoStore {
    fn put(
        &self,
        category: PhotoCategory,
        original_name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<String> {
        let key = make_key(category, original_name, chrono::Utc::now().timestamp_millis());
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
        // create_new: a same-millisecond collision on the same filename fails
        // this one upload instead of overwriting an earlier blob.
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("failed to create blob {}", path.to_string_lossy()))?;
        f.write_all(bytes)
            .with_context(|| format!("failed to write blob {}", path.to_string_lossy()))?;
        Ok(key)
    }
}

pub fn make_key(category: PhotoCategory, original_name: &str, timestamp_ms: i64) -> String {
    format!(
        "{}/{}_{}",
        category.dir(),
        timestamp_ms,
        sanitize_filename(original_name)
    )
}

pub fn build_url(public_base: &str, key: &str) -> String {
    format!("{}/{}", public_base.trim_end_matches('/'), key)
}

/// Pulls the `<category>_photos/<file>` key back out of a retrieval URL.
pub fn extract_key(url: &str) -> Option<String> {
    for dir in [PhotoCategory::Student.dir(), PhotoCategory::Contact.dir()] {
        let marker = format!("{}/", dir);
        if let Some(pos) = url.find(&marker) {
            let key = &url[pos..];
            if key.len() > marker.len() {
                return Some(key.to_string());
            }
        }
    }
    None
}

/// Uploaded names come from the submitter's machine; keep only a plain file
/// name. Path separators and control characters are replaced, and an empty
/// result falls back to "photo".
pub fn sanitize_filename(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(['.', ' ']).to_string();
    if cleaned.is_empty() {
        "photo".to_string()
    } else {
        cleaned
    }
}

/// Test double used by the submission-workflow tests: fails uploads whose
/// original filename matches, stores the rest in memory.
#[cfg(test)]
pub struct FlakyStore {
    pub fail_names: Vec<String>,
    pub stored: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl FlakyStore {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            fail_names: names.iter().map(|s| s.to_string()).collect(),
            stored: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl ObjectStore for FlakyStore {
    fn put(
        &self,
        category: PhotoCategory,
        original_name: &str,
        _bytes: &[u8],
    ) -> anyhow::Result<String> {
        if self.fail_names.iter().any(|n| n == original_name) {
            return Err(anyhow::anyhow!(
                "injected upload failure for {}",
                original_name
            ));
        }
        let key = make_key(category, original_name, 1_700_000_000_000);
        self.stored.lock().expect("store lock").push(key.clone());
        Ok(key)
    }
}
