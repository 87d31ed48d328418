//! Zip helpers for model bundles.

use crate::error::ArchiveError;
use std::fs::File;
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Extract `archive` into `dest`. Entries that would land outside `dest`
/// are rejected by the zip reader.
pub fn unpack(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)?;
    std::fs::create_dir_all(dest)?;
    zip.extract(dest)?;
    Ok(())
}

/// Archive the contents of `src` (not `src` itself) into `archive`.
///
/// Returns the number of files written.
pub fn pack_dir(src: &Path, archive: &Path) -> Result<usize, ArchiveError> {
    let file = File::create(archive)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0;

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| ArchiveError::OutsideRoot(entry.path().to_path_buf()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut input = File::open(entry.path())?;
            std::io::copy(&mut input, &mut writer)?;
            files += 1;
        }
    }

    writer.finish()?;
    Ok(files)
}
