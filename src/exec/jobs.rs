use super::ExitReason;
use crate::log::user_warn;
use crate::system::interface::ProcessId;
use crate::system::kill;
use crate::system::signal::consts::SIGTERM;
use crate::system::wait::{Wait, WaitError, WaitOptions, WaitStatus};

const MAX_JOBS: usize = 20;

/// Fixed-capacity table of the background pids the shell has launched and not
/// yet reaped.
///
/// A pid lives in at most one slot and is cleared exactly once, after its
/// termination has been collected. No ordering is implied among slots.
pub struct JobTable {
    slots: [Option<ProcessId>; MAX_JOBS],
}

impl JobTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_JOBS],
        }
    }

    /// Record a freshly launched background pid in the first free slot.
    ///
    /// Returns `false` when the table is full; the pid then runs untracked
    /// and will never be reported by [`JobTable::reap`].
    pub fn add(&mut self, pid: ProcessId) -> bool {
        debug_assert!(!self.contains(pid));

        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(pid);
                return true;
            }
        }

        false
    }

    fn contains(&self, pid: ProcessId) -> bool {
        self.slots.contains(&Some(pid))
    }

    /// Sweep every tracked pid without blocking; report and release the ones
    /// that have terminated. A job that is still running is skipped and
    /// re-checked on the next sweep.
    pub fn reap(&mut self) {
        for slot in self.slots.iter_mut() {
            let Some(pid) = *slot else {
                continue;
            };

            match pid.wait(WaitOptions::new().no_hang()) {
                Ok((_, status)) => {
                    if let Some(message) = completion_message(pid, &status) {
                        println_ignore_io_error!("{message}");
                    }
                    *slot = None;
                }
                // still running; skip this sweep
                Err(WaitError::NotReady) => {}
                Err(WaitError::Io(err)) => {
                    // the pid is gone in a way we cannot classify; release
                    // the slot so the table does not fill up with corpses
                    user_warn!("cannot wait for background pid {pid}: {err}");
                    *slot = None;
                }
            }
        }
    }

    /// Send `SIGTERM` to every tracked job and release its slot. Used when
    /// the interpreter shuts down so no background child outlives it.
    pub fn terminate_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(pid) = slot.take() {
                kill(pid, SIGTERM).ok();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The line reported for a background job whose termination has been
/// collected.
fn completion_message(pid: ProcessId, status: &WaitStatus) -> Option<String> {
    let reason = ExitReason::from_status(status)?;
    Some(format!("background pid {pid} is done: {reason}"))
}
