//! Archive production for completed multi-file torrents.
//!
//! Entry names are the payload-relative paths; compression is deflate. Only
//! regular files that resolve inside the download root are included, so an
//! engine-supplied path can never drag outside bytes into an archive.

use std::fs::File;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use torva_core::fsname::{join_within, sanitize_file_name};
use tracing::warn;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Outcome of a packaging run.
#[derive(Debug, Clone)]
pub struct Archive {
    /// Archive filename relative to the download root.
    pub file_name: String,
    /// Archive size in bytes.
    pub size: u64,
}

/// Create `<sanitised-name>.zip` at the download root from the listed
/// payload-relative files.
///
/// # Errors
///
/// Fails when the archive cannot be created or written; individual missing
/// or out-of-root entries are skipped with a warning instead.
pub fn create_archive(
    download_dir: &Path,
    torrent_name: &str,
    files: &[String],
) -> Result<Archive> {
    let file_name = format!("{}.zip", sanitize_file_name(torrent_name));
    let archive_path = download_dir.join(&file_name);

    let file = File::create(&archive_path)
        .with_context(|| format!("failed to create archive {}", archive_path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for relative in files {
        let Some(full) = join_within(download_dir, relative) else {
            warn!(path = %relative, "skipping archive entry outside the download root");
            continue;
        };
        let Ok(metadata) = std::fs::metadata(&full) else {
            warn!(path = %full.display(), "skipping missing archive entry");
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        writer
            .start_file(relative.replace('\\', "/"), options)
            .with_context(|| format!("failed to start archive entry {relative}"))?;
        let mut input = File::open(&full)
            .with_context(|| format!("failed to open {}", full.display()))?;
        io::copy(&mut input, &mut writer)
            .with_context(|| format!("failed to write archive entry {relative}"))?;
    }

    let file = writer.finish().context("failed to finalise archive")?;
    let size = file
        .metadata()
        .context("failed to stat finished archive")?
        .len();
    Ok(Archive { file_name, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use zip::ZipArchive;

    fn seed(dir: &Path, relative: &str, contents: &[u8]) {
        let full = dir.join(relative);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(full, contents).expect("write fixture");
    }

    #[test]
    fn packages_listed_files_with_relative_entry_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "show/a.txt", b"alpha");
        seed(dir.path(), "show/sub/b.txt", b"beta-beta");

        let archive = create_archive(
            dir.path(),
            "show",
            &["show/a.txt".to_string(), "show/sub/b.txt".to_string()],
        )
        .expect("package");

        assert_eq!(archive.file_name, "show.zip");
        assert!(archive.size > 0);

        let file = File::open(dir.path().join(&archive.file_name)).expect("open zip");
        let mut zip = ZipArchive::new(file).expect("read zip");
        assert_eq!(zip.len(), 2);
        let mut entry = zip.by_name("show/a.txt").expect("entry present");
        let mut contents = String::new();
        entry.read_to_string(&mut contents).expect("read entry");
        assert_eq!(contents, "alpha");
    }

    #[test]
    fn skips_entries_outside_the_download_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "ok.txt", b"fine");

        let archive = create_archive(
            dir.path(),
            "mixed",
            &[
                "ok.txt".to_string(),
                "../escape.txt".to_string(),
                "/etc/passwd".to_string(),
            ],
        )
        .expect("package");

        let file = File::open(dir.path().join(&archive.file_name)).expect("open zip");
        let zip = ZipArchive::new(file).expect("read zip");
        assert_eq!(zip.len(), 1);
    }

    #[test]
    fn sanitises_the_archive_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "x.txt", b"x");

        let archive = create_archive(dir.path(), "bad:name?", &["x.txt".to_string()])
            .expect("package");
        assert_eq!(archive.file_name, "bad_name_.zip");
    }

    #[test]
    fn missing_files_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "present.txt", b"here");

        let archive = create_archive(
            dir.path(),
            "partial",
            &["present.txt".to_string(), "absent.txt".to_string()],
        )
        .expect("package");

        let file = File::open(dir.path().join(&archive.file_name)).expect("open zip");
        let zip = ZipArchive::new(file).expect("read zip");
        assert_eq!(zip.len(), 1);
    }
}
