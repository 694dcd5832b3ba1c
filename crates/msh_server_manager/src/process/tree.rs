//! Signals delivered to the backing server together with all its descendants.

/// Handle on a spawned process group.
#[derive(Debug)]
pub struct ProcessTree {
    root_pid: u32,
    #[cfg(windows)]
    suspended: std::sync::Mutex<std::collections::HashSet<u32>>,
}

impl ProcessTree {
    pub fn new(root_pid: u32) -> Self {
        Self {
            root_pid,
            #[cfg(windows)]
            suspended: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn root_pid(&self) -> u32 {
        self.root_pid
    }
}

#[cfg(unix)]
mod imp {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    use tracing::debug;

    use super::ProcessTree;
    use crate::error::ServerManagerError;

    impl ProcessTree {
        // the child was started with process_group(0), so its pid is the pgid
        fn signal(&self, signal: Signal) -> Result<(), ServerManagerError> {
            debug!(
                log_type = "server_manager",
                "Sending {:?} to process group {}", signal, self.root_pid
            );
            killpg(Pid::from_raw(self.root_pid as i32), signal).map_err(|e| {
                ServerManagerError::ProcessError(format!(
                    "failed to send {:?} to process group {}: {}",
                    signal, self.root_pid, e
                ))
            })
        }

        pub fn suspend(&self) -> Result<(), ServerManagerError> {
            self.signal(Signal::SIGSTOP)
        }

        pub fn resume(&self) -> Result<(), ServerManagerError> {
            self.signal(Signal::SIGCONT)
        }

        pub fn kill(&self) -> Result<(), ServerManagerError> {
            self.signal(Signal::SIGKILL)
        }
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
mod imp {
    use std::collections::HashSet;

    use sysinfo::{ProcessesToUpdate, System};
    use tracing::debug;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PROCESS_SUSPEND_RESUME, PROCESS_TERMINATE, TerminateProcess,
    };

    use super::ProcessTree;
    use crate::error::ServerManagerError;

    #[link(name = "ntdll")]
    unsafe extern "system" {
        fn NtSuspendProcess(handle: HANDLE) -> i32;
        fn NtResumeProcess(handle: HANDLE) -> i32;
    }

    /// Root plus every descendant, found by adding layers of children of
    /// known parents until a pass finds nothing new.
    fn collect_tree(root_pid: u32) -> Vec<u32> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut tree: Vec<u32> = vec![root_pid];
        let mut known: HashSet<u32> = tree.iter().copied().collect();
        loop {
            let layer: Vec<u32> = system
                .processes()
                .iter()
                .filter_map(|(pid, process)| {
                    let parent = process.parent()?.as_u32();
                    let pid = pid.as_u32();
                    (known.contains(&parent) && !known.contains(&pid)).then_some(pid)
                })
                .collect();
            if layer.is_empty() {
                break;
            }
            known.extend(layer.iter().copied());
            tree.extend(layer);
        }
        tree
    }

    fn with_handle<F>(pid: u32, access: u32, f: F) -> Result<(), ServerManagerError>
    where
        F: FnOnce(HANDLE) -> bool,
    {
        let handle = unsafe { OpenProcess(access, 0, pid) };
        if handle.is_null() {
            return Err(ServerManagerError::ProcessError(format!(
                "cannot open process {}",
                pid
            )));
        }
        let ok = f(handle);
        unsafe { CloseHandle(handle) };
        if ok {
            Ok(())
        } else {
            Err(ServerManagerError::ProcessError(format!(
                "operation on process {} failed",
                pid
            )))
        }
    }

    impl ProcessTree {
        /// Suspends members not already suspended, so calling it again after
        /// the tree grew only catches the new processes.
        pub fn suspend(&self) -> Result<(), ServerManagerError> {
            let mut suspended = self
                .suspended
                .lock()
                .map_err(|_| ServerManagerError::ProcessError("suspend set poisoned".into()))?;
            for pid in collect_tree(self.root_pid) {
                if suspended.contains(&pid) {
                    continue;
                }
                debug!(log_type = "server_manager", "Suspending process {}", pid);
                with_handle(pid, PROCESS_SUSPEND_RESUME, |h| unsafe {
                    NtSuspendProcess(h) >= 0
                })?;
                suspended.insert(pid);
            }
            Ok(())
        }

        pub fn resume(&self) -> Result<(), ServerManagerError> {
            let mut suspended = self
                .suspended
                .lock()
                .map_err(|_| ServerManagerError::ProcessError("suspend set poisoned".into()))?;
            for pid in suspended.drain() {
                debug!(log_type = "server_manager", "Resuming process {}", pid);
                // a member may have exited while suspended
                let _ = with_handle(pid, PROCESS_SUSPEND_RESUME, |h| unsafe {
                    NtResumeProcess(h) >= 0
                });
            }
            Ok(())
        }

        pub fn kill(&self) -> Result<(), ServerManagerError> {
            let tree = collect_tree(self.root_pid);
            // children first so nothing is reparented mid-walk
            for pid in tree.into_iter().rev() {
                debug!(log_type = "server_manager", "Terminating process {}", pid);
                with_handle(pid, PROCESS_TERMINATE, |h| unsafe {
                    TerminateProcess(h, 1) != 0
                })?;
            }
            if let Ok(mut suspended) = self.suspended.lock() {
                suspended.clear();
            }
            Ok(())
        }
    }
}

#[cfg(not(any(unix, windows)))]
use crate::error::ServerManagerError;

#[cfg(not(any(unix, windows)))]
impl ProcessTree {
    pub fn suspend(&self) -> Result<(), ServerManagerError> {
        Err(ServerManagerError::ProcessError(
            "process tree control is not supported on this platform".into(),
        ))
    }

    pub fn resume(&self) -> Result<(), ServerManagerError> {
        self.suspend()
    }

    pub fn kill(&self) -> Result<(), ServerManagerError> {
        self.suspend()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signals_reach_the_group() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let tree = ProcessTree::new(child.id().unwrap());

        tree.suspend().unwrap();
        tree.suspend().unwrap();
        tree.resume().unwrap();
        tree.kill().unwrap();

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}
