//! Durable writes of the enrolled trust material.
//!
//! Both writers replace whatever is at the destination: the old file is
//! removed first (a missing file is a no-op, any other removal error is
//! fatal), then the new content is created with the stated mode.

use keygate_core::KeygateError;
use std::fs;
use std::io;
use std::path::Path;

/// Write the private key, readable by the owning user only.
pub fn write_private_key(path: &Path, pem: &str) -> Result<(), KeygateError> {
    replace_file(path, pem.as_bytes(), 0o400)
}

/// Write the certificate with standard non-secret permissions.
pub fn write_certificate(path: &Path, pem: &str) -> Result<(), KeygateError> {
    replace_file(path, pem.as_bytes(), 0o644)
}

/// Remove a file, treating "does not exist" as success.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn replace_file(path: &Path, bytes: &[u8], mode: u32) -> Result<(), KeygateError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    remove_if_exists(path)?;
    write_with_mode(path, bytes, mode)?;
    Ok(())
}

#[cfg(unix)]
fn write_with_mode(path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_with_mode(path: &Path, bytes: &[u8], _mode: u32) -> io::Result<()> {
    fs::write(path, bytes)
}
