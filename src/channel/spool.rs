//! Envelopes that could not be sent before the channel closed, stored as newline-delimited JSON.
//!
//! Files are named `<unix-millis>-<8 hex>.jsonl`. They are written under a `.tmp` name and renamed
//! when complete, so a crash while spilling never leaves a partial file behind to be reloaded.

use crate::{
    diagnostics::Diagnostics,
    models::Envelope,
    uploader::encode,
    Error,
};
use rand::Rng;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

const EXTENSION: &str = "jsonl";

fn spool_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Spool {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes `items` to a new file in `dir`.
pub(crate) fn write(
    dir: &Path,
    items: &[Envelope],
    diagnostics: &Diagnostics,
) -> Result<PathBuf, Error> {
    fs::create_dir_all(dir).map_err(spool_error(dir))?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix: u32 = rand::rng().random();
    let path = dir.join(format!("{}-{:08x}.{}", millis, suffix, EXTENSION));
    let tmp_path = path.with_extension(format!("{}.tmp", EXTENSION));

    let mut encoded = encode(items, diagnostics);
    encoded.body.push(b'\n');
    let mut file = fs::File::create(&tmp_path).map_err(spool_error(&tmp_path))?;
    file.write_all(&encoded.body)
        .and_then(|_| file.sync_all())
        .map_err(spool_error(&tmp_path))?;
    fs::rename(&tmp_path, &path).map_err(spool_error(&path))?;
    Ok(path)
}

/// Reads every complete spool file in `dir`, oldest first. Lines that fail to parse are skipped.
pub(crate) fn load(dir: &Path) -> Result<Vec<(PathBuf, Vec<Envelope>)>, Error> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(spool_error(dir))? {
        let path = entry.map_err(spool_error(dir))?.path();
        if path.extension().map_or(false, |ext| ext == EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read_to_string(&path).map_err(spool_error(&path))?;
        let envelopes = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Envelope>(line) {
                Ok(envelope) => Some(envelope),
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "skipping malformed spool line");
                    None
                }
            })
            .collect();
        files.push((path, envelopes));
    }
    Ok(files)
}

pub(crate) fn remove(path: &Path) -> Result<(), Error> {
    fs::remove_file(path).map_err(spool_error(path))
}
