use std::{io::Write, path};

use log::{debug, error, info, warn};
use ptcop::Engine;

use crate::{
    args::{FileSet, RunConfig},
    pipeline::decode,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Renders every file in order. A file that fails never stops the rest.
pub fn run_all<E, F, W>(
    files: &FileSet,
    config: &RunConfig,
    new_engine: F,
    stdout: &mut W,
) -> BatchReport
where
    E: Engine,
    F: Fn() -> E,
    W: Write,
{
    let mut report = BatchReport::default();
    for file in files {
        let path = match path::absolute(file) {
            Ok(path) => path,
            Err(e) => {
                warn!("Could not resolve {}: {e}", file.display());
                report.skipped += 1;
                continue;
            }
        };
        if !path.exists() {
            warn!("File {} not found.", path.display());
            report.skipped += 1;
            continue;
        }
        match decode(&path, config, new_engine(), stdout) {
            Ok(summary) => {
                debug!(
                    "{} frames rendered from {} bytes",
                    summary.frames, summary.bytes_read
                );
                report.processed += 1;
            }
            Err(e) => {
                error!("Failed to render {}: {e}", path.display());
                report.failed += 1;
            }
        }
    }
    info!(
        "Processed: {}, skipped: {}, failed: {}",
        report.processed, report.skipped, report.failed
    );
    report
}
