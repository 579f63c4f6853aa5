//! ビルドの永続化
//!
//! 楽観的排他制御: 保存済みのものと `resource_version` が異なるビルドの
//! 保存は競合になる。

use crate::error::{BuildError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podforge_core::Build;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait BuildStore: Send + Sync {
    /// 存在しないビルドは [`BuildError::NotFound`]
    async fn load(&self, namespace: &str, name: &str) -> Result<Build>;

    /// Write `build` and return it with its new `resource_version`
    async fn save(&self, build: &Build) -> Result<Build>;
}

/// 未保存のビルドはバージョン 0 でなければならない
fn check_version(key: &str, stored: Option<u64>, given: u64) -> Result<()> {
    let stored = stored.unwrap_or(0);
    if stored != given {
        return Err(BuildError::Conflict {
            key: key.to_string(),
            stored,
            given,
        });
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryBuildStore {
    builds: Mutex<HashMap<String, Build>>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.builds.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn load(&self, namespace: &str, name: &str) -> Result<Build> {
        let key = format!("{}/{}", namespace, name);
        self.builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or(BuildError::NotFound(key))
    }

    async fn save(&self, build: &Build) -> Result<Build> {
        let key = build.reference.object_key();
        let mut builds = self.builds.lock().unwrap_or_else(PoisonError::into_inner);
        check_version(
            &key,
            builds.get(&key).map(|b| b.resource_version),
            build.resource_version,
        )?;

        let mut stored = build.clone();
        stored.resource_version += 1;
        builds.insert(key, stored.clone());
        Ok(stored)
    }
}

/// ビルドごとに1つの JSON ファイル: `<root>/<namespace>/<name>.json`。
/// 直前のバージョンは `<name>.json.backup` に残す。
///
/// 書き込みはプロセス内では [`tokio::sync::Mutex`] で、プロセス間では
/// `<name>.json.lock` ファイルで直列化する。
pub struct FileBuildStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

/// これより古いロックファイルは放棄されたものとみなす
const STALE_LOCK_SECS: i64 = 60;

impl FileBuildStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn build_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{}.json", name))
    }

    fn sibling_path(&self, namespace: &str, name: &str, suffix: &str) -> PathBuf {
        self.root
            .join(namespace)
            .join(format!("{}.json.{}", name, suffix))
    }

    async fn read(&self, path: &Path) -> Result<Option<Build>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// ロックファイルを排他的に作成する
    async fn acquire_lock(&self, key: &str, lock_path: PathBuf) -> Result<BuildLock> {
        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    let lock = BuildLock {
                        lock_path,
                        released: false,
                    };
                    file.write_all(content.as_bytes()).await?;
                    file.flush().await?;
                    tracing::debug!("Acquired lock on build {}", key);
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            // 書き込み途中のロックは読めないので保持中として扱う
            let holder = fs::read_to_string(&lock_path)
                .await
                .ok()
                .and_then(|raw| serde_json::from_str::<LockInfo>(&raw).ok());
            match holder {
                Some(existing)
                    if Utc::now()
                        .signed_duration_since(existing.acquired_at)
                        .num_seconds()
                        >= STALE_LOCK_SECS =>
                {
                    tracing::warn!(
                        "Removing stale lock on build {} held by {} since {}",
                        key,
                        existing.holder,
                        existing.acquired_at
                    );
                    match fs::remove_file(&lock_path).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                existing => {
                    return Err(BuildError::Locked {
                        key: key.to_string(),
                        holder: existing.map_or_else(|| "unknown".to_string(), |l| l.holder),
                    });
                }
            }
        }

        Err(BuildError::Locked {
            key: key.to_string(),
            holder: "unknown".to_string(),
        })
    }
}

/// ロック情報
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// ビルドファイルのロック (Drop でも解放される)
struct BuildLock {
    lock_path: PathBuf,
    released: bool,
}

impl BuildLock {
    async fn release(mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            match fs::remove_file(&self.lock_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[async_trait]
impl BuildStore for FileBuildStore {
    async fn load(&self, namespace: &str, name: &str) -> Result<Build> {
        self.read(&self.build_path(namespace, name))
            .await?
            .ok_or_else(|| BuildError::NotFound(format!("{}/{}", namespace, name)))
    }

    async fn save(&self, build: &Build) -> Result<Build> {
        let (namespace, name) = (build.namespace(), build.name());
        let key = build.reference.object_key();
        let path = self.build_path(namespace, name);

        if let Some(dir) = path.parent()
            && !dir.exists()
        {
            fs::create_dir_all(dir).await?;
            tracing::debug!("Created build store directory: {}", dir.display());
        }

        let _guard = self.write_lock.lock().await;
        let lock = self
            .acquire_lock(&key, self.sibling_path(namespace, name, "lock"))
            .await?;

        let current = self.read(&path).await?;
        check_version(
            &key,
            current.as_ref().map(|b| b.resource_version),
            build.resource_version,
        )?;

        let mut stored = build.clone();
        stored.resource_version += 1;

        // 一時ファイルに書いてから置き換える
        let tmp = self.sibling_path(namespace, name, "tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&stored)?).await?;
        if current.is_some() {
            fs::copy(&path, self.sibling_path(namespace, name, "backup")).await?;
        }
        fs::rename(&tmp, &path).await?;
        lock.release().await?;

        tracing::debug!(
            "Saved build {} (version {})",
            stored.reference,
            stored.resource_version
        );
        Ok(stored)
    }
}
