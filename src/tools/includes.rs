use std::path::{Path, PathBuf};

use log::warn;

use tacit::{IncludeHost, ResolvedInclude};

/// Filesystem include host: targets resolve relative to the including
/// source, canonical paths drive the pragma-once guard.
pub struct FileIncludeHost;

impl IncludeHost for FileIncludeHost {
    fn resolve_include(
        &self,
        target: &str,
        current: Option<&str>,
    ) -> Option<ResolvedInclude> {
        let mut path = PathBuf::from(target);
        if path.is_relative() {
            if let Some(dir) =
                current.and_then(|cur| Path::new(cur).parent())
            {
                path = dir.join(path);
            }
        }
        let canonical = match std::fs::canonicalize(&path) {
            Ok(canonical) => canonical,
            Err(err) => {
                warn!("include {target}: {err}");
                return None;
            }
        };
        let source = match std::fs::read_to_string(&canonical) {
            Ok(source) => source,
            Err(err) => {
                warn!("include {target}: {err}");
                return None;
            }
        };
        Some(ResolvedInclude {
            canonical: canonical.to_string_lossy().into_owned(),
            source,
        })
    }
}
