use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{Error, Result};
use crate::save::{Layout, prepare_path};
use crate::transport::Transport;

/// What was left on disk by [`fetch_archive`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ArchiveOutcome {
    /// The archive itself, unless it was removed after extraction.
    pub(crate) archive: Option<PathBuf>,
    /// Every regular file written by extraction.
    pub(crate) extracted: Vec<PathBuf>,
}

/// Downloads `url` to `file_name` under `layout`, optionally extracts it
/// into `extract_into`, and optionally removes the archive afterwards.
pub(crate) fn fetch_archive<T: Transport + ?Sized>(
    transport: &T,
    url: &str,
    layout: &Layout,
    file_name: &str,
    extract_into: Option<&Path>,
    remove: bool,
    progress: bool,
) -> Result<ArchiveOutcome> {
    let target = layout.prepare(file_name)?;
    let bytes = transport.download(url, &target, progress)?;
    log::debug!("downloaded {} ({bytes} bytes)", target.display());

    let Some(dir) = extract_into else {
        return Ok(ArchiveOutcome {
            archive: Some(target),
            extracted: Vec::new(),
        });
    };

    let extracted = extract(&target, dir, layout.clobber())?;
    if remove {
        std::fs::remove_file(&target).map_err(|e| Error::io(&target, e))?;
        return Ok(ArchiveOutcome {
            archive: None,
            extracted,
        });
    }
    Ok(ArchiveOutcome {
        archive: Some(target),
        extracted,
    })
}

/// Unpacks a tar or tar.gz archive into `dir`.
pub(crate) fn extract(archive: &Path, dir: &Path, clobber: bool) -> Result<Vec<PathBuf>> {
    let mut file = File::open(archive).map_err(|e| Error::io(archive, e))?;
    let mut magic = [0u8; 2];
    let gzipped = matches!(file.read(&mut magic), Ok(2) if magic == [0x1f, 0x8b]);
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::io(archive, e))?;

    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let mut tar = tar::Archive::new(reader);
    let mut written = Vec::new();
    let entries = tar.entries().map_err(|e| Error::io(archive, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::io(archive, e))?;
        let rel = entry.path().map_err(|e| Error::io(archive, e))?.into_owned();
        let rel_str = rel.to_string_lossy();
        if !crate::util::is_contained(&rel_str) {
            log::warn!("skipping archive member outside the target: {rel_str}");
            continue;
        }

        let dest = dir.join(&rel);
        let is_file = entry.header().entry_type().is_file();
        if is_file {
            prepare_path(&dest, clobber)?;
        }
        entry.unpack_in(dir).map_err(|e| Error::io(&dest, e))?;
        if is_file {
            written.push(dest);
        }
    }
    Ok(written)
}
