use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ClientError, ClientResult};

/// Session cookies plus the email they were issued for, optionally persisted
/// between runs.
#[derive(Clone, Debug, Default)]
pub struct CookieJar {
    path: Option<PathBuf>,
    state: JarState,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct JarState {
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default)]
    email: Option<String>,
}

impl CookieJar {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load a persisted jar. A missing file is an empty jar.
    pub fn open(path: &Path) -> ClientResult<Self> {
        let state = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                ClientError::InvalidState(format!(
                    "cookie file {} is corrupt: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => JarState::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            state,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.state.cookies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.state.cookies.get(name).map(String::as_str)
    }

    pub fn email(&self) -> Option<&str> {
        self.state.email.as_deref()
    }

    pub fn set_email(&mut self, email: Option<String>) {
        self.state.email = email;
    }

    /// Apply one `Set-Cookie` header value. Returns true if the jar changed.
    pub fn absorb(&mut self, set_cookie: &str) -> bool {
        let mut parts = set_cookie.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return false;
        };
        let name = name.trim();
        let value = value.trim().trim_matches('"');
        if name.is_empty() {
            return false;
        }
        let expired = parts.any(|attr| {
            let attr = attr.trim().to_ascii_lowercase();
            attr == "max-age=0" || attr.starts_with("max-age=-")
        });
        if expired || value.is_empty() {
            return self.state.cookies.remove(name).is_some();
        }
        self.state.cookies.insert(name.to_string(), value.to_string()) != Some(value.to_string())
    }

    /// `Cookie` request header value, if there is anything to send.
    pub fn header(&self) -> Option<String> {
        if self.state.cookies.is_empty() {
            return None;
        }
        Some(
            self.state
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn clear(&mut self) {
        self.state = JarState::default();
    }

    /// Write the jar to its file, if it has one.
    pub fn save(&self) -> ClientResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&self.state)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }
        Ok(())
    }
}
