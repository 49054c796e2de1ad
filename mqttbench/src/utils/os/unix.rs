use std::{io, mem};

use rama::telemetry::tracing;

pub use libc::rlim_t;

/// Raise the soft limit of open file descriptors to `target`,
/// capped by the hard limit. Every client holds at least one socket.
pub fn raise_nofile(target: rlim_t) -> io::Result<()> {
    // SAFETY: `rlimit` is plain old data and the libc calls only
    // read or write the struct we own.
    unsafe {
        let mut lim: libc::rlimit = mem::zeroed();
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) != 0 {
            return Err(io::Error::last_os_error());
        }

        let new_soft = target.min(lim.rlim_max);
        if lim.rlim_cur >= new_soft {
            tracing::debug!(
                "ulimit: current soft limit ({}) covers requested limit ({new_soft})",
                lim.rlim_cur,
            );
            return Ok(());
        }

        let previous = lim.rlim_cur;
        lim.rlim_cur = new_soft;
        if libc::setrlimit(libc::RLIMIT_NOFILE, &lim) != 0 {
            return Err(io::Error::last_os_error());
        }
        tracing::info!("ulimit: raised soft limit of open files from {previous} to {new_soft}");
    }

    Ok(())
}
