//! Runtime Config editor
//!
//! The workload reads its database connection from a PHP include,
//! `<sites_root>/default/sqlconf.php`, whose five managed assignments look
//! like:
//!
//! ```php
//! $host   = 'db.internal';
//! $port   = '3306';
//! $login  = 'openemr_a';
//! $pass   = '...';
//! $dbase  = 'openemr';
//! ```
//!
//! [`parse`] reads them, [`render`] rewrites them and leaves every other byte
//! alone, and [`atomic_write`] replaces the file so a concurrent reader sees
//! either the old or the new content, never a mix.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::RuntimeConfigError;
use crate::secret::SecretString;
use crate::slots::{DEFAULT_PORT, Slot};

/// File mode applied to the config file
pub const FILE_MODE: u32 = 0o644;

/// File mode applied to the two directories above the config file
pub const DIR_MODE: u32 = 0o755;

/// Owner given to the config file so the web server can keep reading it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOwner {
    /// Numeric user id
    pub uid: u32,
    /// Numeric group id
    pub gid: u32,
}

impl Default for FileOwner {
    fn default() -> Self {
        Self {
            uid: 1000,
            gid: 101,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Host,
    Port,
    Username,
    Password,
    Dbname,
}

impl Field {
    const ALL: [Self; 5] = [
        Self::Host,
        Self::Port,
        Self::Username,
        Self::Password,
        Self::Dbname,
    ];

    fn var(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Port => "port",
            Self::Username => "login",
            Self::Password => "pass",
            Self::Dbname => "dbase",
        }
    }

    fn pattern(self) -> &'static Regex {
        &PATTERNS[self as usize]
    }
}

// Capture groups: 1 = `$var = '`, 2 = value, 3 = `';`
static PATTERNS: LazyLock<[Regex; 5]> = LazyLock::new(|| {
    Field::ALL.map(|field| {
        Regex::new(&format!(
            r#"(?m)^(\${}\s*=\s*['"])([^'"]+)(['"]\s*;)"#,
            field.var()
        ))
        .expect("assignment pattern is a valid regex")
    })
});

/// Connection fields currently deployed, each absent if not found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfigSnapshot {
    /// `$host`
    pub host: Option<String>,
    /// `$port`
    pub port: Option<String>,
    /// `$login`
    pub username: Option<String>,
    /// `$pass`
    pub password: Option<SecretString>,
    /// `$dbase`
    pub dbname: Option<String>,
}

impl RuntimeConfigSnapshot {
    /// Port as compared against slots, `3306` when unset
    pub fn port_or_default(&self) -> &str {
        self.port.as_deref().unwrap_or(DEFAULT_PORT)
    }

    /// Whether all five fields equal `slot`'s exactly
    pub fn matches(&self, slot: &Slot) -> bool {
        self.host.as_deref() == Some(slot.host.as_str())
            && self.port_or_default() == slot.port
            && self.username.as_deref() == Some(slot.username.as_str())
            && self.password.as_ref() == Some(&slot.password)
            && self.dbname.as_deref() == Some(slot.dbname.as_str())
    }

    /// The deployed credential as a slot, `None` if a field is missing
    pub fn to_slot(&self) -> Option<Slot> {
        Some(Slot {
            username: self.username.clone()?,
            password: self.password.clone()?,
            host: self.host.clone()?,
            port: self.port_or_default().to_owned(),
            dbname: self.dbname.clone()?,
        })
    }
}

/// Locate the live config file under `sites_root`
pub fn discover(sites_root: &Path) -> Result<PathBuf, RuntimeConfigError> {
    let path = sites_root.join("default").join("sqlconf.php");
    if path.is_file() {
        Ok(path)
    } else {
        Err(RuntimeConfigError::NotFound { path })
    }
}

/// Read the config file as UTF-8
pub fn read(path: &Path) -> Result<String, RuntimeConfigError> {
    std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            RuntimeConfigError::NotFound {
                path: path.to_owned(),
            }
        } else {
            RuntimeConfigError::Io {
                path: path.to_owned(),
                source,
            }
        }
    })
}

/// Extract the managed fields; the first assignment of each wins
pub fn parse(content: &str) -> RuntimeConfigSnapshot {
    let find = |field: Field| {
        field
            .pattern()
            .captures(content)
            .map(|caps| caps[2].to_owned())
    };

    RuntimeConfigSnapshot {
        host: find(Field::Host),
        port: find(Field::Port),
        username: find(Field::Username),
        password: find(Field::Password).map(SecretString::new),
        dbname: find(Field::Dbname),
    }
}

/// Rewrite the five managed assignments to `slot`'s values
///
/// Only the value between the quotes of the first matching assignment of each
/// field changes. Fails without partial output if any assignment is missing
/// or a value cannot be represented between quotes.
///
/// # Examples
///
/// ```
/// use dualslot_rotation::{Slot, runtime_config};
///
/// let content = "$host = 'old';\n$port = '3306';\n$login = 'u';\n$pass = 'p';\n$dbase = 'db';\n";
/// let slot = Slot {
///     username: "openemr_b".into(),
///     password: "s3cret".into(),
///     host: "new".into(),
///     port: "3306".into(),
///     dbname: "db".into(),
/// };
/// let rendered = runtime_config::render(content, &slot).unwrap();
/// assert!(rendered.starts_with("$host = 'new';"));
/// ```
pub fn render(content: &str, slot: &Slot) -> Result<String, RuntimeConfigError> {
    let mut updated = content.to_owned();
    for field in Field::ALL {
        let value = match field {
            Field::Host => slot.host.clone(),
            Field::Port => slot.port.clone(),
            Field::Username => slot.username.clone(),
            Field::Password => slot.password.expose_secret(str::to_owned),
            Field::Dbname => slot.dbname.clone(),
        };
        if value.is_empty() || value.contains(['\'', '"', '\\', '\n', '\r']) {
            return Err(RuntimeConfigError::InvalidValue { field: field.var() });
        }

        let pattern = field.pattern();
        if !pattern.is_match(&updated) {
            return Err(RuntimeConfigError::FieldNotFound { field: field.var() });
        }
        updated = pattern
            .replacen(&updated, 1, |caps: &Captures<'_>| {
                format!("{}{}{}", &caps[1], value, &caps[3])
            })
            .into_owned();
    }
    Ok(updated)
}

/// Replace `path` with `content` atomically
///
/// Writes a temp file in the same directory, flushes and syncs it, sets mode
/// `0644` and the given owner, then renames it over `path`. The file's
/// directory and its parent are set to `0755` (and the owner) best effort.
/// Any failure of the write or rename itself is returned and the temp file is
/// removed.
pub fn atomic_write(
    path: &Path,
    content: &str,
    owner: Option<FileOwner>,
) -> Result<(), RuntimeConfigError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;
    normalize_parents(dir, owner);

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("sqlconf.php");
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .tempfile_in(dir)
        .map_err(io_error(dir))?;

    tmp.write_all(content.as_bytes()).map_err(io_error(tmp.path()))?;
    tmp.flush().map_err(io_error(tmp.path()))?;
    tmp.as_file().sync_all().map_err(io_error(tmp.path()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(FILE_MODE))
            .map_err(io_error(tmp.path()))?;
        if let Some(owner) = owner {
            std::os::unix::fs::fchown(tmp.as_file(), Some(owner.uid), Some(owner.gid))
                .map_err(io_error(tmp.path()))?;
        }
    }

    tmp.persist(path).map_err(|e| RuntimeConfigError::Io {
        path: path.to_owned(),
        source: e.error,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE))
            .map_err(io_error(path))?;
        if let Some(owner) = owner {
            std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid))
                .map_err(io_error(path))?;
        }
    }

    tracing::info!(path = %path.display(), bytes = content.len(), "Wrote runtime config");
    Ok(())
}

/// Set the config file back to mode `0644`
pub fn relax_permissions(path: &Path) -> Result<(), RuntimeConfigError> {
    if !path.is_file() {
        return Err(RuntimeConfigError::NotFound {
            path: path.to_owned(),
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE))
            .map_err(io_error(path))?;
    }
    tracing::info!(path = %path.display(), "Relaxed runtime config permissions");
    Ok(())
}

fn normalize_parents(dir: &Path, owner: Option<FileOwner>) {
    for parent in [Some(dir), dir.parent()].into_iter().flatten() {
        if !parent.is_dir() {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(error) =
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(DIR_MODE))
            {
                tracing::debug!(path = %parent.display(), %error, "Could not chmod directory");
            }
            if let Some(owner) = owner
                && let Err(error) =
                    std::os::unix::fs::chown(parent, Some(owner.uid), Some(owner.gid))
            {
                tracing::debug!(path = %parent.display(), %error, "Could not chown directory");
            }
        }
        #[cfg(not(unix))]
        let _ = owner;
    }
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> RuntimeConfigError + '_ {
    move |source| RuntimeConfigError::Io {
        path: path.to_owned(),
        source,
    }
}
