//! Code archival: copy the protocol source into the session raw folder, zip
//! it (plus anything else that landed there as a directory), then delete the
//! copied trees. The session ends up with a single
//! `_vole_codeFiles.raw.zip` describing exactly what code produced it.

use anyhow::{ensure, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::CompressionMethod;

/// Recursive copy; returns the number of files copied.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<u64> {
    ensure!(src.is_dir(), "source {} is not a directory", src.display());
    let mut copied = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.context("Failed to walk source tree")?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .context("Walked outside the source tree")?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Zip the given directories into one deflate archive. Entry names are
/// relative to each directory's parent, so the directory name itself heads
/// every entry.
pub fn zip_dirs(dirs: &[PathBuf], zip_path: &Path) -> Result<()> {
    let file = File::create(zip_path)
        .with_context(|| format!("Failed to create {}", zip_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for dir in dirs {
        let base = dir.parent().unwrap_or_else(|| Path::new(""));
        for entry in WalkDir::new(dir) {
            let entry = entry.context("Failed to walk directory for zipping")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(base)
                .context("Walked outside the zip base")?;
            writer.start_file(entry_name(rel), options)?;
            let mut src = File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?;
            std::io::copy(&mut src, &mut writer)?;
        }
    }
    writer.finish().context("Failed to finish archive")?;
    Ok(())
}

fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// The full archival pass over a session raw folder: copy each source tree
/// in, zip every immediate subdirectory into `archive`, then remove the
/// zipped directories. Returns the removed paths.
pub fn archive_code(raw_folder: &Path, sources: &[PathBuf], archive: &Path) -> Result<Vec<PathBuf>> {
    for source in sources {
        let name = source
            .file_name()
            .with_context(|| format!("Source {} has no name", source.display()))?;
        copy_dir(source, &raw_folder.join(name))?;
    }

    let mut to_zip = Vec::new();
    for entry in std::fs::read_dir(raw_folder)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            to_zip.push(entry.path());
        }
    }
    to_zip.sort();

    zip_dirs(&to_zip, archive)?;
    for dir in &to_zip {
        std::fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove {}", dir.display()))?;
    }
    tracing::info!(
        archived = to_zip.len(),
        "code archived to {}",
        archive.display()
    );
    Ok(to_zip)
}
