// src/exec/ident.rs

//! Local user and host identity, used to refuse tasks addressed elsewhere.

use std::env;
use std::ffi::CStr;

use crate::errors::{QrunError, Result};

/// Name of the user the runner is executing as. Falls back to the numeric
/// uid when the environment does not say.
pub fn current_user() -> String {
    env::var("USER").or_else(|_| env::var("LOGNAME")).unwrap_or_else(|_| {
        // SAFETY: getuid cannot fail.
        format!("uid{}", unsafe { libc::getuid() })
    })
}

/// Short hostname of this machine.
pub fn local_host() -> Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid writable buffer of the stated length.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let name = CStr::from_bytes_until_nul(&buf)
        .map_err(|_| QrunError::Config("hostname is not NUL-terminated".into()))?
        .to_string_lossy()
        .into_owned();
    Ok(name)
}
