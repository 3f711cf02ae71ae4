//! Content fingerprinting
//!
//! The exact-duplicate key is the MD5 of the full file bytes, lowercase hex.
//! Files are read in fixed-size chunks so memory stays flat for multi-GB
//! assets; the blocking read loop runs on the blocking pool.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{VaultError, VaultResult};

/// MD5 of the empty input, the fingerprint of a zero-byte file
#[allow(dead_code)]
pub const EMPTY_FINGERPRINT: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Compute the content fingerprint of a file
///
/// Output is identical regardless of `chunk_bytes`; the chunk size only
/// bounds the read buffer.
pub async fn fingerprint_file(path: &Path, chunk_bytes: usize) -> VaultResult<String> {
    let path_buf: PathBuf = path.to_path_buf();
    let chunk = chunk_bytes.max(4096);

    let digest = tokio::task::spawn_blocking(move || fingerprint_blocking(&path_buf, chunk))
        .await
        .map_err(|e| VaultError::Dependency(format!("fingerprint task panicked: {}", e)))??;

    debug!(path = %path.display(), fingerprint = %digest, "Computed content fingerprint");
    Ok(digest)
}

fn fingerprint_blocking(path: &Path, chunk_bytes: usize) -> VaultResult<String> {
    let mut file =
        File::open(path).map_err(|e| VaultError::io(path.to_string_lossy(), e))?;

    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; chunk_bytes];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| VaultError::io(path.to_string_lossy(), e))?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }

    Ok(format!("{:x}", context.finalize()))
}
