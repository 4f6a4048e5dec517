//! Zip packaging of result directories.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{MediaError, MediaResult};

/// Archive every file under `dir` into a deflate zip at `bundle_path`.
///
/// Entries are stored flat under their bare file names, in sorted path order.
/// On failure the partial bundle is removed and `dir` is left untouched.
pub fn package_directory(dir: &Path, bundle_path: &Path) -> MediaResult<PathBuf> {
    if !dir.is_dir() {
        return Err(MediaError::packaging(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    match write_bundle(dir, bundle_path) {
        Ok(entries) => {
            debug!(
                dir = %dir.display(),
                bundle = %bundle_path.display(),
                entries,
                "Packaged result directory"
            );
            Ok(bundle_path.to_path_buf())
        }
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_file(bundle_path) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(bundle = %bundle_path.display(), "Failed to remove partial bundle: {}", cleanup);
                }
            }
            Err(e)
        }
    }
}

fn write_bundle(dir: &Path, bundle_path: &Path) -> MediaResult<usize> {
    let file = File::create(bundle_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        zip.start_file(name, options)?;
        let mut source = File::open(entry.path())?;
        io::copy(&mut source, &mut zip)?;
        entries += 1;
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer)?;
    Ok(entries)
}
