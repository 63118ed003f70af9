use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{LabexecError, Result};

/// Longest accepted session id.
const MAX_SESSION_ID_LEN: usize = 128;

/// A session and its scratch directory.
#[derive(Debug)]
pub struct Session {
    id: String,
    dir: PathBuf,
    created_at: DateTime<Utc>,
    last_used: Mutex<DateTime<Utc>>,
    exec_lock: Arc<tokio::sync::Mutex<()>>,
    retired: AtomicBool,
}

impl Session {
    fn new(id: String, dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            dir,
            created_at: now,
            last_used: Mutex::new(now),
            exec_lock: Arc::new(tokio::sync::Mutex::new(())),
            retired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update last activity timestamp
    pub fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Wait for exclusive use of the session directory.
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.exec_lock).lock_owned().await
    }

    fn try_acquire(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.exec_lock).try_lock_owned().ok()
    }

    /// True once the session has been evicted; its directory may be gone.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_used() < cutoff
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            dir: self.dir.clone(),
            created_at: self.created_at,
            last_used: self.last_used(),
        }
    }
}

/// Snapshot of a registered session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// Maps session ids to scratch directories.
///
/// Directories are created on first use and reused afterwards. Nothing is
/// removed unless the host calls one of the cleanup hooks (`remove`,
/// `evict_idle`, `purge`).
#[derive(Debug)]
pub struct SessionRegistry {
    root: PathBuf,
    namespace: String,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.scratch_root(), config.namespace.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `id`. Depends only on the root, namespace and id.
    pub fn dir_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}{}", self.namespace, id))
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a session without touching the filesystem.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.map().get(id).cloned()
    }

    /// Resolve `session_id` to a session, creating its directory on first use.
    ///
    /// An absent or blank id gets a freshly generated one.
    pub async fn resolve(&self, session_id: Option<&str>) -> Result<Arc<Session>> {
        let id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => generate_session_id(),
        };

        if let Some(session) = self.get(&id) {
            session.touch();
            debug!(session = %id, "Reusing session");
            return Ok(session);
        }

        // Register the entry while holding its lock so nobody runs in, or
        // removes, the directory before it exists.
        let fresh = Arc::new(Session::new(id.clone(), self.dir_for(&id)));
        let _creating = fresh.try_acquire();
        let session = Arc::clone(
            self.map()
                .entry(id.clone())
                .or_insert_with(|| Arc::clone(&fresh)),
        );
        if !Arc::ptr_eq(&session, &fresh) {
            session.touch();
            return Ok(session);
        }

        if let Err(e) = fs::create_dir_all(session.dir()).await {
            session.retired.store(true, Ordering::SeqCst);
            self.unregister(&session);
            return Err(LabexecError::DirectoryCreation {
                path: session.dir().display().to_string(),
                message: e.to_string(),
            });
        }

        info!(session = %id, dir = %session.dir().display(), "Session ready");
        Ok(session)
    }

    /// List all registered sessions (newest first)
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.map().values().map(|s| s.info()).collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Remove a session and its directory, waiting for any running command.
    ///
    /// Returns false if the id is unknown.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let Some(session) = self.get(id) else {
            return Ok(false);
        };

        let _guard = session.acquire().await;
        if session.is_retired() {
            return Ok(false);
        }
        self.retire(&session).await?;

        info!(session = %id, "Removed session");
        Ok(true)
    }

    /// Remove sessions unused for longer than `max_idle`.
    ///
    /// Sessions with a command in flight are skipped. Returns the number of
    /// sessions removed.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let candidates: Vec<Arc<Session>> = self
            .map()
            .values()
            .filter(|s| s.is_idle_since(cutoff))
            .cloned()
            .collect();

        let mut evicted = 0;
        for session in candidates {
            let Some(_guard) = session.try_acquire() else {
                debug!(session = %session.id(), "Session busy, not evicting");
                continue;
            };
            // Re-check under the lock, the session may have been used meanwhile.
            if session.is_retired() || !session.is_idle_since(cutoff) {
                continue;
            }

            if let Err(e) = self.retire(&session).await {
                warn!(session = %session.id(), error = %e, "Failed to remove session directory");
            }
            evicted += 1;
        }

        if evicted > 0 {
            info!(count = evicted, "Evicted idle sessions");
        }
        evicted
    }

    /// Remove every session and its directory. Intended for host shutdown.
    pub async fn purge(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self.map().values().cloned().collect();

        let mut purged = 0;
        for session in sessions {
            let _guard = session.acquire().await;
            if session.is_retired() {
                continue;
            }
            if let Err(e) = self.retire(&session).await {
                warn!(session = %session.id(), error = %e, "Failed to remove session directory");
            }
            purged += 1;
        }

        if purged > 0 {
            info!(count = purged, "Purged sessions");
        }
        purged
    }

    /// Delete the session directory, then drop the registry entry.
    ///
    /// Callers hold the session lock. The entry stays registered while the
    /// directory is deleted, so concurrent callers queue on this session's
    /// lock and re-resolve once they see it retired. The entry is dropped even
    /// if deletion fails.
    async fn retire(&self, session: &Arc<Session>) -> Result<()> {
        session.retired.store(true, Ordering::SeqCst);
        let removed = remove_dir(session.dir()).await;
        self.unregister(session);
        removed
    }

    fn unregister(&self, session: &Arc<Session>) {
        let mut map = self.map();
        if map
            .get(session.id())
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            map.remove(session.id());
        }
    }
}

async fn remove_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Scratch directories under `root` whose name starts with `namespace`.
pub async fn scratch_dirs(root: &Path, namespace: &str) -> Result<Vec<PathBuf>> {
    if namespace.is_empty() {
        return Err(LabexecError::Config(
            "refusing to scan the scratch root with an empty namespace".to_string(),
        ));
    }

    let mut dirs = Vec::new();
    let mut entries = fs::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(namespace) && entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }

    dirs.sort();
    Ok(dirs)
}

/// Remove every scratch directory under `root`.
///
/// Meant for leftovers of earlier processes; directories of sessions still
/// registered in a live process are removed too.
pub async fn sweep_scratch_root(root: &Path, namespace: &str) -> Result<usize> {
    let mut removed = 0;

    for dir in scratch_dirs(root, namespace).await? {
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(path = %dir.display(), "Removed scratch directory");
                removed += 1;
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }

    info!(count = removed, root = %root.display(), "Swept scratch directories");
    Ok(removed)
}

/// Session ids become part of a directory name, so only a conservative
/// character set is accepted.
pub fn validate_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(LabexecError::InvalidSessionId { id: id.to_string() })
    }
}

/// Generate a short, unique session ID
pub fn generate_session_id() -> String {
    use std::sync::atomic::AtomicU64;
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    // Timestamp + pid + counter, base36 for compactness
    format!(
        "{}-{}-{}",
        format_base36(timestamp),
        format_base36(u64::from(std::process::id())),
        format_base36(counter)
    )
}

/// Format a number as base36 string
fn format_base36(mut n: u64) -> String {
    const CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if n == 0 {
        return "0".to_string();
    }

    let mut result = Vec::new();
    while n > 0 {
        result.push(CHARS[(n % 36) as usize]);
        n /= 36;
    }
    result.reverse();
    String::from_utf8(result).unwrap_or_else(|_| "error".to_string())
}

/// Parse TTL string (e.g., "5m", "1h", "30s")
pub fn parse_ttl(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    if s.is_empty() {
        return Err(LabexecError::Config("Empty TTL value".to_string()));
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60u64)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600u64)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86400u64)
    } else {
        // Assume seconds if no suffix
        (s.as_str(), 1u64)
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| LabexecError::Config(format!("Invalid TTL value: {}", s)))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| LabexecError::Config(format!("TTL value too large: {}", s)))
}
