//! Who this agent says it is in heartbeats.

use std::{ffi::CStr, fs, io, path::Path};

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub hostname: String,
}

impl Identity {
    /// Gathers the machine id and hostname, preferring `id_override` to the
    /// machine id when given.
    ///
    /// # Errors
    ///
    /// If neither the machine id nor the hostname can be read.
    pub fn gather(id_override: Option<&str>) -> io::Result<Self> {
        let id = match id_override {
            Some(id) => id.to_string(),
            None => machine_id(MACHINE_ID_PATHS.iter().map(Path::new))?,
        };

        Ok(Self {
            id,
            hostname: hostname()?,
        })
    }
}

fn machine_id<'a>(candidates: impl IntoIterator<Item = &'a Path>) -> io::Result<String> {
    let mut last = io::Error::new(io::ErrorKind::NotFound, "no machine id file");

    for path in candidates {
        match fs::read_to_string(path) {
            Ok(contents) if !contents.trim().is_empty() => return Ok(contents.trim().to_string()),
            Ok(_) => {
                last = io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} is empty", path.display()),
                );
            }
            Err(e) => last = e,
        }
    }

    Err(last)
}

fn hostname() -> io::Result<String> {
    let mut buf = [0u8; 256];

    // SAFETY: `buf` is valid for writes of `buf.len()` bytes, and the last byte
    // is never handed to gethostname so the result stays NUL terminated.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len() - 1) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let name = CStr::from_bytes_until_nul(&buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(name.to_string_lossy().into_owned())
}
