use std::fs::{self, File};
use std::io;
use std::path::Path;

#[cfg(target_os = "linux")]
use std::sync::atomic::{AtomicBool, Ordering};

/// Cleared on the first EPERM; every shard and merge producer shares it.
#[cfg(target_os = "linux")]
static NOATIME_SUPPORTED: AtomicBool = AtomicBool::new(true);

/// Open a record file read-only without updating its access time.
/// Batch files are read exactly once, so atime writes are pure overhead.
/// Files we don't own reject O_NOATIME; those fall back to a plain open.
#[cfg(target_os = "linux")]
fn open_noatime(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    if NOATIME_SUPPORTED.load(Ordering::Relaxed) {
        match fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOATIME)
            .open(path)
        {
            Ok(f) => return Ok(f),
            Err(ref e) if e.raw_os_error() == Some(libc::EPERM) => {
                // O_NOATIME requires file ownership or CAP_FOWNER
                NOATIME_SUPPORTED.store(false, Ordering::Relaxed);
            }
            Err(e) => return Err(e),
        }
    }
    File::open(path)
}

#[cfg(not(target_os = "linux"))]
fn open_noatime(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// Open a record file for reading on the calling runtime.
///
/// The open itself runs on the blocking pool, like every `tokio::fs` call.
pub async fn open_input(path: &Path) -> io::Result<tokio::fs::File> {
    let path = path.to_path_buf();
    let file = tokio::task::spawn_blocking(move || open_noatime(&path))
        .await
        .map_err(io::Error::other)??;
    Ok(tokio::fs::File::from_std(file))
}

/// Hint the kernel that `[offset, offset + len)` will be read front to back.
/// Purely advisory: failures are ignored.
#[cfg(target_os = "linux")]
pub fn advise_sequential(file: &tokio::fs::File, offset: u64, len: u64) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            len as libc::off_t,
            libc::POSIX_FADV_SEQUENTIAL,
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn advise_sequential(_file: &tokio::fs::File, _offset: u64, _len: u64) {}

/// Reserve `len` bytes of disk space for a freshly created file so batch
/// writes never grow the file piecemeal.
///
/// Uses posix_fallocate on Linux; filesystems that refuse it (and other
/// platforms) fall back to extending the file with `set_len`.
pub async fn preallocate(file: &tokio::fs::File, len: u64) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }

    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `file` and no write is in flight
        // on it yet, the file was just created.
        let ret = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, len as libc::off_t) };
        match ret {
            0 => return Ok(()),
            libc::EOPNOTSUPP | libc::EINVAL => {}
            errno => return Err(io::Error::from_raw_os_error(errno)),
        }
    }

    file.set_len(len).await
}

/// fsync a directory so renames and unlinks inside it are durable.
pub async fn sync_directory(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let handle = tokio::fs::File::open(dir).await?;
        handle.sync_all().await?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// True when a rename failed only because source and target live on
/// different filesystems.
pub fn is_cross_device(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

/// Get file size without reading it.
pub fn file_size(path: &Path) -> io::Result<u64> {
    Ok(fs::metadata(path)?.len())
}
