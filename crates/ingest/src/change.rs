use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::parser::Parser;

/// Fingerprint of one candidate source, or the I/O error that prevented it.
pub(crate) struct Fingerprinted {
    pub(crate) path: PathBuf,
    pub(crate) hash: io::Result<String>,
}

/// Fingerprints every candidate in parallel. Output order matches input.
pub(crate) fn fingerprint_all(parser: &dyn Parser, paths: Vec<PathBuf>) -> Vec<Fingerprinted> {
    paths
        .into_par_iter()
        .map(|path| {
            let hash = parser.fingerprint(&path);
            Fingerprinted { path, hash }
        })
        .collect()
}

/// Change-tracker key for `path`. Paths that are not valid UTF-8 have no key;
/// a lossy conversion could map two of them onto one row.
pub(crate) fn source_key(path: &Path) -> Option<String> {
    path.to_str().map(str::to_string)
}

/// Human-readable form of `path` for progress reports and issues.
pub(crate) fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) fn unkeyable(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("path is not valid UTF-8: {}", path.display()),
    )
}
