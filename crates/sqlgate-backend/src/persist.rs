//! Durable server sections.
//!
//! Runtime changes to a server are written to `<dir>/<name>.cnf`. The file is
//! first written to `<name>.cnf.tmp` and then renamed over the final path,
//! so a reader sees either the old or the new section, never a partial one.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{ServerError, ServerResult};

/// Path of the persisted section for server `name`.
pub fn config_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.cnf"))
}

/// Atomically replace `<dir>/<name>.cnf` with `content`.
pub fn write_config(dir: &Path, name: &str, content: &str) -> ServerResult<PathBuf> {
    let final_path = config_path(dir, name);
    let temp_path = dir.join(format!("{name}.cnf.tmp"));

    let fail = |action: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ServerError::Persistence {
            action,
            path,
            source,
        }
    };

    // Leftover from an earlier failed attempt.
    match fs::remove_file(&temp_path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(fail("remove temporary server configuration", &temp_path)(e)),
    }

    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(fail("create temporary server configuration", &temp_path))
        .and_then(|mut file| {
            file.write_all(content.as_bytes())
                .and_then(|()| file.sync_all())
                .map_err(fail("write temporary server configuration", &temp_path))
        });

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, &final_path)
        .map_err(fail("rename temporary server configuration", &temp_path))?;

    Ok(final_path)
}
