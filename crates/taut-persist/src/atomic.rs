use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Replace `dst` with `src` in a single observable step.
///
/// Tries the portable rename first. On Windows the rename can be refused
/// while another process holds the destination open; the fallback replays
/// the replace with copy semantics, matching `MoveFileExW` with
/// `REPLACE_EXISTING | COPY_ALLOWED`. Callers never see which path was
/// taken.
///
/// # Errors
///
/// Returns the underlying I/O error when both strategies fail.
pub fn atomic_replace(src: &Path, dst: &Path) -> io::Result<()> {
    replace_with(|s, d| fs::rename(s, d), platform_fallback, src, dst)
}

/// Seam between the portable rename and the platform fallback, split out so
/// the fallback selection is testable with an injected failing primary.
fn replace_with<P, F>(primary: P, fallback: F, src: &Path, dst: &Path) -> io::Result<()>
where
    P: FnOnce(&Path, &Path) -> io::Result<()>,
    F: FnOnce(&Path, &Path, io::Error) -> io::Result<()>,
{
    match primary(src, dst) {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(
                src = %src.display(),
                dst = %dst.display(),
                error = %err,
                "portable rename failed, trying platform fallback"
            );
            fallback(src, dst, err)
        }
    }
}

#[cfg(windows)]
fn platform_fallback(src: &Path, dst: &Path, _primary: io::Error) -> io::Result<()> {
    fs::copy(src, dst)?;
    fs::remove_file(src)
}

#[cfg(not(windows))]
fn platform_fallback(_src: &Path, _dst: &Path, primary: io::Error) -> io::Result<()> {
    Err(primary)
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map_or_else(Default::default, std::ffi::OsStr::to_os_string);
    name.push(".tmp");
    target.with_file_name(name)
}

fn open_tmp(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

/// Write `payload` to `target` so that a crash at any point leaves `target`
/// either absent (first write) or holding its previous contents.
///
/// Protocol: create the parent directory, write the full payload to
/// `<target>.tmp`, fsync, close, then [`atomic_replace`] over the target.
/// The tmp file is removed (best effort) on any failure.
///
/// # Errors
///
/// Returns the first I/O error encountered; `target` is untouched in that
/// case.
pub fn write_atomic(target: &Path, payload: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(target);
    let result = write_payload(&tmp, payload).and_then(|()| atomic_replace(&tmp, target));
    if result.is_err()
        && let Err(cleanup) = fs::remove_file(&tmp)
        && cleanup.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %tmp.display(), error = %cleanup, "failed to remove stray tmp file");
    }
    result
}

fn write_payload(tmp: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = open_tmp(tmp)?;
    file.write_all(payload)?;
    file.sync_all()?;
    Ok(())
}
