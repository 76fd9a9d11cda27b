// SPDX-License-Identifier: MIT

use std::fs;
use std::io;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SingleInstanceError {
    #[error("another guild-hall instance is already running (pid {0})")]
    AlreadyRunning(i32),
    #[error("binding instance socket at {0:?}: {1}")]
    Bind(PathBuf, io::Error),
}

/// Enforces the single-instance guarantee (spec §5): a Unix domain socket
/// plus PID file under the home directory. Held for the process lifetime;
/// `Drop` removes both. A bound-but-dead previous instance's files are
/// stale and get cleaned up rather than blocking startup.
pub struct SingleInstanceGuard {
    socket_path: PathBuf,
    pid_path: PathBuf,
    _listener: UnixListener,
}

impl SingleInstanceGuard {
    pub fn acquire(home: &Path) -> Result<Self, SingleInstanceError> {
        let _ = fs::create_dir_all(home);
        let socket_path = home.join("guild-hall.sock");
        let pid_path = home.join("guild-hall.pid");

        match UnixListener::bind(&socket_path) {
            Ok(listener) => {
                write_pid(&pid_path);
                Ok(Self { socket_path, pid_path, _listener: listener })
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                if let Some(pid) = read_pid(&pid_path) {
                    if process_alive(pid) {
                        return Err(SingleInstanceError::AlreadyRunning(pid));
                    }
                }
                let _ = fs::remove_file(&socket_path);
                let _ = fs::remove_file(&pid_path);
                let listener = UnixListener::bind(&socket_path)
                    .map_err(|e| SingleInstanceError::Bind(socket_path.clone(), e))?;
                write_pid(&pid_path);
                Ok(Self { socket_path, pid_path, _listener: listener })
            }
            Err(e) => Err(SingleInstanceError::Bind(socket_path, e)),
        }
    }
}

impl SingleInstanceGuard {
    /// Read-only check for `guild-hall status`: is a live instance holding
    /// the lock under `home`? Does not bind the socket itself.
    pub fn running_pid(home: &Path) -> Option<i32> {
        let pid = read_pid(&home.join("guild-hall.pid"))?;
        process_alive(pid).then_some(pid)
    }
}

impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
        let _ = fs::remove_file(&self.pid_path);
    }
}

fn write_pid(path: &Path) {
    let _ = fs::write(path, std::process::id().to_string());
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs no action beyond existence/permission checks.
    unsafe { libc::kill(pid, 0) == 0 }
}
