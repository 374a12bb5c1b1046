#![forbid(unsafe_code)]

//! Process privilege checks for the tubelink server.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start when invoked as root.
///
/// The server spawns a resolver binary and a transcoder against
/// caller-supplied URLs and reads browser cookie stores, none of which
/// should ever happen with root privileges.
pub fn ensure_not_root(process: &str) -> Result<()> {
    refuse_root(Uid::current(), process)
}

fn refuse_root(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("refusing to start {process} as root: run it under an unprivileged account");
    }
    Ok(())
}
