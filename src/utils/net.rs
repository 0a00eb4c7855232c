use std::fs;
use std::os::unix::fs::FileTypeExt;

use crate::ContainerError;

/// Fails unless `path` exists and is a unix domain socket
pub(crate) fn ensure_unix_socket(path: &str) -> Result<(), ContainerError> {
    let metadata =
        fs::metadata(path).map_err(|e| ContainerError::InvalidSocket(format!("{path}: {e}")))?;
    if !metadata.file_type().is_socket() {
        return Err(ContainerError::InvalidSocket(format!("{path} is not a unix socket")));
    }
    Ok(())
}
