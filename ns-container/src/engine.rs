//! Namespace base preparation and the per-job creation/join/delete
//! lifecycle: a fork/semaphore handshake pins a private mount namespace
//! to a holder file before the child exits.

use std::fs::{self, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::BorrowedFd;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use nix::mount::{mount, umount, umount2, MntFlags, MsFlags};
use nix::sched::{setns, unshare, CloneFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chown, fork, ForkResult, Gid, Uid};

use crate::cleanup::remove_tree;
use crate::config::NamespaceConfig;
use crate::error::NsError;
use crate::paths::JobPaths;
use crate::sem::AnonSemaphore;

const INITSCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Prepare the shared base directory as a private recursive bind mount.
/// Call once per node at startup, before any per-job creation.
pub fn prepare_base(config: &NamespaceConfig) -> Result<(), NsError> {
    if config.cray_native {
        return Ok(());
    }

    if config.auto_basepath {
        create_dir_all_0755(&config.basepath)?;
    }

    // The fstype argument is ignored by the kernel whenever MS_BIND is
    // set; only the source/target/flags matter here.
    mount(
        Some(&config.basepath),
        &config.basepath,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| NsError::BaseMountFailed(format!("initial bind mount: {e}")))?;

    mount(
        Some(&config.basepath),
        &config.basepath,
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| NsError::BaseMountFailed(format!("private remount: {e}")))?;

    tracing::debug!(basepath = %config.basepath.display(), "base namespace created");
    Ok(())
}

/// Detach-unmount the base directory and discard the configuration.
pub fn teardown_base(config: &NamespaceConfig) -> Result<(), NsError> {
    if config.cray_native {
        return Ok(());
    }
    umount2(&config.basepath, MntFlags::MNT_DETACH)
        .map_err(|e| NsError::BaseMountFailed(format!("teardown: {e}")))
}

fn create_dir_all_0755(path: &Path) -> Result<(), NsError> {
    // umask is process-global; narrow it for the duration of this mkdir
    // so group/other write bits never sneak onto the created directory.
    let old_mask = unsafe { libc::umask(0o022) };
    let result = (|| -> Result<(), NsError> {
        fs::create_dir_all(path).map_err(|e| NsError::Io { path: path.to_path_buf(), source: e })?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .map_err(|e| NsError::Io { path: path.to_path_buf(), source: e })
    })();
    unsafe { libc::umask(old_mask) };
    result
}

/// Create the per-job namespace. Idempotent: a second call observes the
/// existing directory and returns success iff `.active` is present.
pub fn create(config: &NamespaceConfig, job_id: u32) -> Result<(), NsError> {
    if config.cray_native {
        return Ok(());
    }

    let paths = JobPaths::build(config, job_id);

    match fs::create_dir(&paths.job_mount) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return if paths.active.exists() {
                Ok(())
            } else {
                Err(NsError::NamespaceBroken(job_id))
            };
        }
        Err(e) => return Err(NsError::Io { path: paths.job_mount.clone(), source: e }),
    }
    if let Err(e) = fs::set_permissions(&paths.job_mount, fs::Permissions::from_mode(0o700)) {
        let _ = remove_tree(&paths.job_mount);
        return Err(NsError::Io { path: paths.job_mount.clone(), source: e });
    }

    if let Err(e) = create_and_run(config, &paths, job_id) {
        let _ = remove_tree(&paths.job_mount);
        return Err(e);
    }

    Ok(())
}

fn create_and_run(config: &NamespaceConfig, paths: &JobPaths, job_id: u32) -> Result<(), NsError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .mode(0o700)
        .open(&paths.ns_holder)
        .map_err(|e| NsError::Io { path: paths.ns_holder.clone(), source: e })?;

    if let Some(script) = &config.initscript {
        run_initscript(script)?;
    }

    fs::create_dir(&paths.src_bind).map_err(|e| NsError::Io { path: paths.src_bind.clone(), source: e })?;
    fs::set_permissions(&paths.src_bind, fs::Permissions::from_mode(0o700))
        .map_err(|e| NsError::Io { path: paths.src_bind.clone(), source: e })?;

    let sem1 = AnonSemaphore::new()?;
    let sem2 = AnonSemaphore::new()?;

    // Safety: the child immediately either execs nothing further and only
    // calls async-signal-safe-ish syscalls before touching shared memory
    // it owns exclusively, or exits; it never returns into shared Rust
    // state with the parent.
    match unsafe { fork() }.map_err(NsError::from)? {
        ForkResult::Child => {
            let rc = run_child(&sem1, &sem2, &paths.src_bind, &config.basepath);
            std::process::exit(if rc.is_ok() { 0 } else { 1 });
        }
        ForkResult::Parent { child } => {
            let result = run_parent(&sem1, &sem2, child, &paths.ns_holder);
            let wait_result = waitpid(child, None);
            result?;
            match wait_result {
                Ok(WaitStatus::Exited(_, 0)) => Ok(()),
                Ok(status) => Err(NsError::ChildFailed(format!("{status:?}"))),
                Err(e) => Err(NsError::from(e)),
            }
        }
    }
}

fn run_child(sem1: &AnonSemaphore, sem2: &AnonSemaphore, src_bind: &Path, basepath: &Path) -> Result<(), NsError> {
    unshare(CloneFlags::CLONE_NEWNS).map_err(NsError::from)?;
    sem1.post()?;
    sem2.wait()?;

    mount(None::<&str>, "/", None::<&str>, MsFlags::MS_PRIVATE | MsFlags::MS_REC, None::<&str>)
        .map_err(|e| NsError::ChildFailed(format!("making root private: {e}")))?;
    mount(Some(src_bind), "/tmp", None::<&str>, MsFlags::MS_BIND | MsFlags::MS_REC, None::<&str>)
        .map_err(|e| NsError::ChildFailed(format!("/tmp mount failed: {e}")))?;

    umount2(basepath, MntFlags::MNT_DETACH)
        .map_err(|e| NsError::ChildFailed(format!("detaching basepath: {e}")))?;

    mount_private_shm()
}

fn mount_private_shm() -> Result<(), NsError> {
    match umount("/dev/shm") {
        Ok(()) => {}
        Err(nix::Error::EINVAL) => {}
        Err(e) => return Err(NsError::ChildFailed(format!("umount /dev/shm: {e}"))),
    }
    mount(Some("tmpfs"), "/dev/shm", Some("tmpfs"), MsFlags::empty(), None::<&str>)
        .map_err(|e| NsError::ChildFailed(format!("mounting private /dev/shm: {e}")))
}

fn run_parent(
    sem1: &AnonSemaphore,
    sem2: &AnonSemaphore,
    child: nix::unistd::Pid,
    ns_holder: &Path,
) -> Result<(), NsError> {
    sem1.wait()?;

    let proc_path = format!("/proc/{child}/ns/mnt");
    let bind_result = mount(Some(Path::new(&proc_path)), ns_holder, None::<&str>, MsFlags::MS_BIND, None::<&str>)
        .map_err(|e| NsError::BaseMountFailed(format!("ns base mount failed: {e}")));

    // The child must be released from sem2 regardless of whether the bind
    // above succeeded, or it blocks forever.
    sem2.post()?;
    bind_result
}

fn run_initscript(script: &Path) -> Result<(), NsError> {
    let mut child = Command::new(script)
        .spawn()
        .map_err(|e| NsError::Io { path: script.to_path_buf(), source: e })?;

    let deadline = Instant::now() + INITSCRIPT_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return if status.success() {
                    Ok(())
                } else {
                    Err(NsError::ChildFailed(format!("init script exited with {status}")))
                };
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(NsError::ChildFailed("init script timed out after 10s".to_string()));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(NsError::Io { path: script.to_path_buf(), source: e }),
        }
    }
}

/// Join the job's namespace as `uid`. Job id 0 is reserved for "not a real
/// job" and succeeds as a no-op.
pub fn join(config: &NamespaceConfig, job_id: u32, uid: u32) -> Result<(), NsError> {
    if config.cray_native || job_id == 0 {
        return Ok(());
    }

    let paths = JobPaths::build(config, job_id);

    chown(&paths.src_bind, Some(Uid::from_raw(uid)), None::<Gid>).map_err(NsError::from)?;

    let fd = OpenOptions::new()
        .read(true)
        .open(&paths.ns_holder)
        .map_err(|e| NsError::Io { path: paths.ns_holder.clone(), source: e })?;

    let borrowed: BorrowedFd = unsafe { BorrowedFd::borrow_raw(fd.as_raw_fd()) };
    setns(borrowed, CloneFlags::CLONE_NEWNS).map_err(NsError::from)?;
    drop(fd);

    OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .mode(0o700)
        .open(&paths.active)
        .map(|_| ())
        .map_err(|e| NsError::Io { path: paths.active.clone(), source: e })
}

/// Return the namespace file descriptor for a caller that wants to attach
/// a process-tracking container without entering the namespace itself.
/// Refuses if `.active` is missing.
pub fn join_external(config: &NamespaceConfig, job_id: u32) -> Result<std::fs::File, NsError> {
    let paths = JobPaths::build(config, job_id);
    if !paths.active.exists() {
        return Err(NsError::NamespaceBroken(job_id));
    }
    OpenOptions::new()
        .read(true)
        .open(&paths.ns_holder)
        .map_err(|e| NsError::Io { path: paths.ns_holder.clone(), source: e })
}

/// Detach-unmount `ns_holder` and recursively remove the job directory.
/// Both steps are attempted even if one fails.
pub fn delete(config: &NamespaceConfig, job_id: u32) -> Result<(), NsError> {
    if config.cray_native {
        return Ok(());
    }

    let paths = JobPaths::build(config, job_id);
    if !paths.job_mount.exists() {
        return Err(NsError::NamespaceBroken(job_id));
    }

    let umount_result = umount2(&paths.ns_holder, MntFlags::MNT_DETACH)
        .map_err(|e| NsError::BaseMountFailed(format!("umount2 {}: {e}", paths.ns_holder.display())));

    let remove_result = remove_tree(&paths.job_mount);

    umount_result?;
    remove_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config(basepath: &Path) -> NamespaceConfig {
        let mut map = HashMap::new();
        map.insert("namespace.basepath".to_string(), basepath.display().to_string());
        NamespaceConfig::from_map(&map).unwrap()
    }

    #[test]
    fn delete_on_unknown_job_is_namespace_broken() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let err = delete(&config, 999).unwrap_err();
        assert!(matches!(err, NsError::NamespaceBroken(999)));
    }

    #[test]
    fn cray_native_create_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let mut map = HashMap::new();
        map.insert("namespace.basepath".to_string(), tmp.path().display().to_string());
        map.insert("namespace.cray_native".to_string(), "true".to_string());
        let config = NamespaceConfig::from_map(&map).unwrap();
        assert!(create(&config, 1).is_ok());
        assert!(!config.job_mount(1).exists());
    }
}
