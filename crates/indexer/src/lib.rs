use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::time::UNIX_EPOCH;

use lansync_config::CHUNK_SIZE;
use lansync_core::entities::FileMeta;
use lansync_core::helpers::create_buffer;
use lansync_core::utils::Logger;
use sha2::{Digest, Sha256};
use threadpool::ThreadPool;
use walkdir::WalkDir;

static LOGGER: Logger = Logger::verbose("Indexer");

#[derive(Debug, Clone)]
struct CacheEntry {
    size: u64,
    mtime: i64,
    hash: String,
}

/// Scans one folder and hands out its index. The hash cache is keyed by
/// absolute path and validated against (size, mtime), so repeated scans only
/// re-hash files that actually changed.
pub struct Indexer {
    root: PathBuf,
    cache: Arc<RwLock<HashMap<PathBuf, CacheEntry>>>,
}

impl Indexer {
    pub fn new(root: PathBuf) -> Self {
        Indexer {
            root,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the root and return every regular file as a FileMeta, sorted
    /// ascending by relative path. Hashing runs on a worker pool sized to
    /// the hardware; a file that fails to stat or hash is skipped and the
    /// scan carries on.
    pub fn scan(&self) -> io::Result<Vec<FileMeta>> {
        struct Task {
            path: PathBuf,
            relative_path: String,
            size: u64,
            mtime: i64,
        }

        let mut tasks: Vec<Task> = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    LOGGER.error(format!("scan: walk error: {}", e));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    LOGGER.error(format!("scan: stat {:?} failed: {}", entry.path(), e));
                    continue;
                }
            };
            let relative_path = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            tasks.push(Task {
                path: entry.path().to_path_buf(),
                relative_path,
                size: meta.len(),
                mtime: unix_mtime(&meta),
            });
        }

        let pool = ThreadPool::new(num_cpus::get());
        let (tx, rx) = mpsc::channel::<FileMeta>();
        let total = tasks.len();

        for task in tasks {
            let tx = tx.clone();
            let cache = self.cache.clone();
            pool.execute(move || {
                match cached_hash(&cache, &task.path, task.size, task.mtime) {
                    Ok(hash) => {
                        // The receiver only hangs up if scan() already
                        // returned, so a failed send just drops the meta.
                        let _ = tx.send(FileMeta {
                            relative_path: task.relative_path,
                            size: task.size,
                            mtime: task.mtime,
                            hash,
                        });
                    }
                    Err(e) => {
                        LOGGER.error(format!("scan: hash {:?} failed: {}", task.path, e));
                    }
                }
            });
        }
        drop(tx);

        let mut files: Vec<FileMeta> = rx.into_iter().collect();
        pool.join();

        LOGGER.debug(format!("scan: {} of {} files indexed", files.len(), total));
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    /// Rename a file inside the root, creating destination directories as
    /// needed. Equal paths are a no-op.
    pub fn rename(&self, old_rel: &str, new_rel: &str) -> io::Result<()> {
        let old_path = self.root.join(old_rel);
        let new_path = self.root.join(new_rel);

        if old_path == new_path {
            return Ok(());
        }
        // Double check source exists
        fs::metadata(&old_path)?;

        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&old_path, &new_path)
    }
}

fn unix_mtime(meta: &fs::Metadata) -> i64 {
    match meta.modified() {
        Ok(t) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => 0,
        },
        Err(_) => 0,
    }
}

fn cached_hash(
    cache: &RwLock<HashMap<PathBuf, CacheEntry>>,
    path: &Path,
    size: u64,
    mtime: i64,
) -> io::Result<String> {
    {
        let cache = cache.read().unwrap();
        if let Some(entry) = cache.get(path) {
            if entry.size == size && entry.mtime == mtime {
                return Ok(entry.hash.clone());
            }
        }
    }

    let hash = hash_file(path)?;
    {
        let mut cache = cache.write().unwrap();
        cache.insert(
            path.to_path_buf(),
            CacheEntry {
                size,
                mtime,
                hash: hash.clone(),
            },
        );
    }
    Ok(hash)
}

/// SHA-256 of a file's bytes, lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = create_buffer(CHUNK_SIZE);
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
