//! The signals subsystem for drive passes.
//!
//! Progress is reported on demand: SIGUSR1 asks for a snapshot of the
//! current pass, SIGINT (when armed) asks for a final snapshot and an
//! orderly death. Both signals are blocked in every thread before any
//! worker spawns, and a single dedicated watcher thread collects them
//! with `sigwait`. Workers never observe a signal at all.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::thread;

use tracing::warn;

use crate::drivers::progress::ProgressBoard;
use crate::error::Error;
use crate::record::SetRecord;

/// What the watcher thread does when a signal arrives.
pub struct Watcher {
    /// Where snapshot payloads go; ideally a FIFO.
    pub progress_path: Option<PathBuf>,
    /// The pass's progress cells.
    pub board: Arc<ProgressBoard>,
    /// Produces the third snapshot word at snapshot time.
    pub third: Box<dyn Fn() -> u64 + Send + Sync>,
    /// Re-export this record to this path on every snapshot.
    pub export: Option<(PathBuf, Arc<SetRecord>)>,
    /// Whether SIGINT is collected too, ending the process after one
    /// last snapshot.
    pub handle_interrupt: bool,
}

/// Blocks the drive-pass signals in the calling thread.
///
/// Call this from the main thread before spawning workers or the
/// watcher so that every later thread inherits the blocked mask.
pub fn block_signals(handle_interrupt: bool) -> Result<(), Error> {
    let set = build_sigset(handle_interrupt);
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(Error::Storage(std::io::Error::from_raw_os_error(rc)));
    }
    Ok(())
}

impl Watcher {
    /// Spawns the watcher thread. It runs detached for the rest of the
    /// process; the signals it waits on must already be blocked via
    /// [`block_signals`].
    pub fn spawn(self) -> Result<(), Error> {
        thread::Builder::new()
            .name("signals".into())
            .spawn(move || self.run())
            .map_err(Error::Storage)?;
        Ok(())
    }

    fn run(self) {
        let set = build_sigset(self.handle_interrupt);
        loop {
            let mut sig: libc::c_int = 0;
            let rc = unsafe { libc::sigwait(&set, &mut sig) };
            if rc != 0 {
                warn!(rc, "sigwait failed, signal watcher exiting");
                return;
            }
            self.snapshot();
            if sig == libc::SIGINT {
                exit_once(1);
            }
        }
    }

    fn snapshot(&self) {
        if let Some(path) = &self.progress_path {
            let third = (self.third)();
            if let Err(e) = self.board.snapshot_to_path(path, third) {
                warn!(error = %e, "could not write progress snapshot");
            }
        }
        if let Some((path, rec)) = &self.export {
            let result = File::create(path)
                .map_err(Error::Storage)
                .and_then(|mut f| rec.export(&mut f));
            if let Err(e) = result {
                warn!(error = %e, "could not export record on signal");
            }
        }
    }
}

/// Terminates the process with `code`, letting exactly one caller
/// through. Any thread racing in behind the winner parks until the
/// process dies.
pub fn exit_once(code: i32) -> ! {
    static EXIT: Once = Once::new();
    EXIT.call_once(|| std::process::exit(code));
    loop {
        thread::park();
    }
}

fn build_sigset(with_interrupt: bool) -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGUSR1);
        if with_interrupt {
            libc::sigaddset(&mut set, libc::SIGINT);
        }
        set
    }
}
