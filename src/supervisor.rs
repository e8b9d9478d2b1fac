//! Process orchestration: configuration, daemonization, signal handlers,
//! the buffer pool, reader/writer threads, and shutdown.
//!
//! Grounded on the reference daemon's `main()`/`Ourdaemon()` and on §4.G.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};

use crate::config::Config;
use crate::netflow5::MAX_DATAGRAM_SIZE;
use crate::pool::BufferPool;
use crate::reader::{self, PortConfig};
use crate::signals;
use crate::writer::Writer;

/// How often the signal-monitor thread polls the flags `signals` maintains.
const SIGNAL_POLL: Duration = Duration::from_millis(200);

pub fn run() {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("netflowd: {}", e);
            std::process::exit(1);
        }
    };

    crate::logger::init(config.log_level);

    if !config.nodaemon {
        if let Err(e) = daemonize() {
            error!("failed to daemonize: {}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = signals::install_handlers() {
        error!("failed to install signal handlers: {}", e);
        std::process::exit(1);
    }

    let pool = Arc::new(BufferPool::init(
        config.buffer_count,
        MAX_DATAGRAM_SIZE,
        "netflow",
    ));

    if let Some(user) = &config.new_user {
        if let Err(e) = drop_privileges(user) {
            error!("failed to drop privileges to user {}: {}", user, e);
            std::process::exit(1);
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_monitor(Arc::clone(&shutdown));

    for port in &config.ports {
        let pool = Arc::clone(&pool);
        let port_config = PortConfig {
            port: port.port,
            drop_detection: port.drop_detection,
        };
        thread::spawn(move || reader::run(port_config, pool));
    }

    let writer_handle = {
        let pool = Arc::clone(&pool);
        let shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            let mut writer = Writer::new(pool, shutdown, &config);
            writer.run();
        })
    };

    if writer_handle.join().is_err() {
        error!("write thread panicked");
        std::process::exit(1);
    }

    info!("netflowd exiting.");
}

/// Polls the flags the signal handlers set and translates them into the
/// writer's shutdown request and a log line on SIGHUP. Async-signal-unsafe
/// work (logging, setting an `Arc`-shared flag) happens here rather than in
/// the handler itself.
fn spawn_signal_monitor(shutdown: Arc<AtomicBool>) {
    thread::spawn(move || loop {
        if signals::take_hup_requested() {
            info!("contacted by SIGHUP.");
        }
        if signals::shutdown_requested() {
            info!("contacted by SIGTERM, shutting down.");
            shutdown.store(true, Ordering::Relaxed);
            return;
        }
        thread::sleep(SIGNAL_POLL);
    });
}

#[cfg(unix)]
fn daemonize() -> std::io::Result<()> {
    unsafe {
        match libc::fork() {
            pid if pid < 0 => return Err(std::io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }

        if libc::setsid() < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let root = std::ffi::CString::new("/").unwrap();
        libc::chdir(root.as_ptr());
        libc::umask(0);

        let devnull = std::ffi::CString::new("/dev/null").unwrap();
        let fd = libc::open(devnull.as_ptr(), libc::O_RDWR);
        if fd >= 0 {
            libc::dup2(fd, libc::STDIN_FILENO);
            libc::dup2(fd, libc::STDOUT_FILENO);
            if fd > 2 {
                libc::close(fd);
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn drop_privileges(user: &str) -> std::io::Result<()> {
    let cname = std::ffi::CString::new(user).unwrap();
    unsafe {
        let pw = libc::getpwnam(cname.as_ptr());
        if pw.is_null() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such user: {}", user),
            ));
        }
        if libc::setgid((*pw).pw_gid) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::setuid((*pw).pw_uid) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn drop_privileges(_user: &str) -> std::io::Result<()> {
    Ok(())
}
