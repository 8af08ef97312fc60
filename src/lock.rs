//! Host-scoped named locks for provisioning
//!
//! Serializes base-instance setup across unrelated kiln processes. One lock
//! file per key, held via `flock(LOCK_EX | LOCK_NB)` polled with backoff.
//! The OS drops a flock when the holding process dies, so a crashed holder
//! never blocks later acquirers indefinitely.

use crate::error::{KilnError, KilnResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// How often a blocked acquirer re-tries the flock
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Owner metadata written into the lock file after acquisition.
///
/// Purely diagnostic for other processes; mutual exclusion comes from the
/// flock itself, which the OS releases when the owner dies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOwner {
    /// PID of the owning process
    pub pid: u32,
    /// Unique token for this acquisition
    pub token: Uuid,
    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    /// Whether the owning process is still running
    pub fn is_alive(&self) -> bool {
        is_pid_alive(self.pid)
    }
}

/// An exclusively-held named lock.
///
/// The flock is released when the handle is dropped or passed to
/// [`LockManager::release`].
pub struct LockHandle {
    file: File,
    key: String,
    token: Uuid,
}

impl LockHandle {
    /// The key this handle locks
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Named, host-scoped mutual exclusion backed by lock files.
#[derive(Debug, Clone)]
pub struct LockManager {
    lock_dir: PathBuf,
}

impl LockManager {
    /// Create a lock manager rooted at the given directory
    pub fn new(lock_dir: PathBuf) -> Self {
        Self { lock_dir }
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.lock_dir.join(format!("{key}.lock"))
    }

    /// Try to acquire the lock for `key` without blocking.
    ///
    /// Returns `Ok(None)` if another process holds it.
    pub fn try_acquire(&self, key: &str) -> KilnResult<Option<LockHandle>> {
        fs::create_dir_all(&self.lock_dir)
            .map_err(|e| KilnError::io(format!("creating lock dir {}", self.lock_dir.display()), e))?;

        let path = self.lock_path(key);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| KilnError::io(format!("opening lock file {}", path.display()), e))?;

        if !try_flock_exclusive(&file)
            .map_err(|e| KilnError::io(format!("locking {}", path.display()), e))?
        {
            return Ok(None);
        }

        let owner = LockOwner {
            pid: std::process::id(),
            token: Uuid::new_v4(),
            acquired_at: Utc::now(),
        };
        write_owner(&file, &owner)
            .map_err(|e| KilnError::io(format!("writing lock owner to {}", path.display()), e))?;

        debug!("Acquired lock {} (token {})", key, owner.token);
        Ok(Some(LockHandle {
            file,
            key: key.to_string(),
            token: owner.token,
        }))
    }

    /// Acquire the lock for `key`, polling with backoff up to `timeout`.
    ///
    /// Fails with [`KilnError::ProvisioningContention`] rather than blocking
    /// forever. A lock left behind by a crashed process is reclaimed on the
    /// first poll, since the OS already dropped its flock.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> KilnResult<LockHandle> {
        let started = Instant::now();
        loop {
            if let Some(handle) = self.try_acquire(key)? {
                return Ok(handle);
            }

            if started.elapsed() >= timeout {
                if let Ok(Some(owner)) = self.holder(key) {
                    debug!(
                        "Lock {} held by pid {} (alive: {})",
                        key,
                        owner.pid,
                        owner.is_alive()
                    );
                }
                return Err(KilnError::ProvisioningContention {
                    key: key.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            tokio::time::sleep(POLL_INTERVAL.min(timeout.saturating_sub(started.elapsed()))).await;
        }
    }

    /// Release a held lock, verifying ownership first.
    ///
    /// If the owner recorded in the lock file does not match the handle, the
    /// lock belongs to someone else and is left untouched.
    pub fn release(&self, mut handle: LockHandle) -> KilnResult<()> {
        let recorded = read_owner(&mut handle.file)
            .map_err(|e| KilnError::io(format!("reading lock owner for {}", handle.key), e))?;

        match recorded {
            Some(owner) if owner.token == handle.token => {
                debug!("Released lock {}", handle.key);
                // flock drops with the file descriptor.
                drop(handle);
                Ok(())
            }
            _ => {
                let key = handle.key.clone();
                // Leak the handle's lock state back untouched: closing the fd
                // would release an flock we no longer own the record for.
                std::mem::forget(handle);
                warn!("Refusing to release lock {key}: owner mismatch");
                Err(KilnError::LockOwnership { key })
            }
        }
    }

    /// Read the recorded owner of a lock, if any
    pub fn holder(&self, key: &str) -> KilnResult<Option<LockOwner>> {
        let path = self.lock_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&path)
            .map_err(|e| KilnError::io(format!("opening lock file {}", path.display()), e))?;
        read_owner(&mut file)
            .map_err(|e| KilnError::io(format!("reading lock owner for {key}"), e))
    }
}

fn write_owner(mut file: &File, owner: &LockOwner) -> io::Result<()> {
    let json = serde_json::to_string(owner).map_err(io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.sync_all()
}

fn read_owner(file: &mut File) -> io::Result<Option<LockOwner>> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut content)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(serde_json::from_str(&content).ok())
}

/// Try to acquire an exclusive flock on a file (non-blocking).
///
/// Returns `Ok(false)` if another process holds the lock.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: flock on a valid fd owned by `file`; LOCK_EX | LOCK_NB is
        // a non-blocking exclusive lock.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

/// Check whether a given PID is alive.
///
/// Uses `kill(pid, 0)`, which checks for process existence without sending
/// a signal. EPERM means the process exists but belongs to another user;
/// treat it as alive.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: kill with signal 0 only probes for existence.
        let result = unsafe { libc::kill(pid_i32, 0) };
        if result == 0 {
            return true;
        }
        let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
        errno == libc::EPERM
    }
    #[cfg(not(unix))]
    {
        let _ = pid_i32;
        true
    }
}
