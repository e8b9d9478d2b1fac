//! SIGTERM/SIGHUP handling.
//!
//! Grounded on the reference daemon's `Sigterm`/`Sighup` handlers, which do
//! nothing but flip a flag the main loop observes — the same
//! async-signal-safety constraint applies here: a handler may only touch a
//! `sig_atomic_t`-equivalent, never allocate, lock, or log.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static HUP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigterm(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_sighup(_sig: libc::c_int) {
    HUP_REQUESTED.store(true, Ordering::SeqCst);
}

fn install(signum: libc::c_int, handler: extern "C" fn(libc::c_int)) -> std::io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;

        if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Installs the process-wide SIGTERM/SIGHUP handlers. Call once, before any
/// reader or writer thread starts.
pub fn install_handlers() -> std::io::Result<()> {
    install(libc::SIGTERM, handle_sigterm)?;
    install(libc::SIGHUP, handle_sighup)?;
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Returns whether SIGHUP arrived since the last call, clearing the flag.
pub fn take_hup_requested() -> bool {
    HUP_REQUESTED.swap(false, Ordering::SeqCst)
}
