//! `.netrc`-backed credentials.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::CredentialProvider;

/// Machine entry looked up when none is configured.
pub const DEFAULT_MACHINE: &str = "urs.earthdata.nasa.gov";

/// A login/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credential provider reading a `.netrc` file.
///
/// The file is resolved from, in order: the explicit path given at
/// construction, the `NETRC` environment variable, then `~/.netrc`.
#[derive(Debug)]
pub struct NetrcCredentials {
    path: Option<PathBuf>,
    machine: String,
    current: RwLock<Option<Credentials>>,
}

impl NetrcCredentials {
    /// Create a provider for the default machine.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self::for_machine(path, DEFAULT_MACHINE)
    }

    /// Create a provider for a specific machine entry.
    pub fn for_machine(path: Option<PathBuf>, machine: impl Into<String>) -> Self {
        Self {
            path,
            machine: machine.into(),
            current: RwLock::new(None),
        }
    }

    /// The resolved `.netrc` location, if one can be determined.
    pub fn netrc_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| std::env::var_os("NETRC").map(PathBuf::from))
            .or_else(|| dirs::home_dir().map(|home| home.join(".netrc")))
    }

    /// The machine entry this provider looks up.
    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// The credentials acquired by the last successful `authenticate`.
    pub fn credentials(&self) -> Option<Credentials> {
        self.current.read().clone()
    }
}

impl CredentialProvider for NetrcCredentials {
    fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    fn authenticate(&self) -> bool {
        let Some(path) = self.netrc_path() else {
            tracing::error!("Cannot locate a .netrc file (no home directory)");
            return false;
        };

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read .netrc");
                return false;
            }
        };
        warn_if_shared(&path);

        match find_machine(&contents, &self.machine) {
            Some(credentials) => {
                tracing::info!(
                    machine = %self.machine,
                    login = %credentials.login,
                    "Authenticated from .netrc"
                );
                *self.current.write() = Some(credentials);
                true
            }
            None => {
                tracing::error!(
                    path = %path.display(),
                    machine = %self.machine,
                    "No usable .netrc entry for machine"
                );
                false
            }
        }
    }
}

#[cfg(unix)]
fn warn_if_shared(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            tracing::warn!(
                path = %path.display(),
                mode = format!("{:o}", mode & 0o777),
                "Credentials file is accessible by other users; chmod 600 is recommended"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_shared(_path: &Path) {}

/// Find the login/password for `machine`, falling back to a `default` entry.
fn find_machine(contents: &str, machine: &str) -> Option<Credentials> {
    let mut tokens = contents.split_whitespace();
    let mut fallback = None;

    while let Some(token) = tokens.next() {
        let matches = match token {
            "machine" => tokens.next() == Some(machine),
            "default" => {
                if let Some(credentials) = read_entry(&mut tokens.clone()) {
                    fallback.get_or_insert(credentials);
                }
                continue;
            }
            _ => continue,
        };

        if matches {
            if let Some(credentials) = read_entry(&mut tokens) {
                return Some(credentials);
            }
        }
    }

    fallback
}

/// Read `login`/`password` pairs up to the next entry.
fn read_entry<'a, I>(tokens: &mut I) -> Option<Credentials>
where
    I: Iterator<Item = &'a str> + Clone,
{
    let mut login = None;
    let mut password = None;

    loop {
        let mut lookahead = tokens.clone();
        match lookahead.next() {
            Some("login") => {
                login = lookahead.next().map(str::to_string);
            }
            Some("password") => {
                password = lookahead.next().map(str::to_string);
            }
            Some("account") => {
                lookahead.next();
            }
            Some("machine") | Some("default") | Some("macdef") | None => break,
            Some(_) => {}
        }
        *tokens = lookahead;
    }

    Some(Credentials {
        login: login?,
        password: password?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETRC: &str = "\
machine example.com login other password secret1
machine urs.earthdata.nasa.gov
    login alice
    password hunter2
default login anon password guest
";

    #[test]
    fn test_find_machine_multiline_entry() {
        let credentials = find_machine(NETRC, DEFAULT_MACHINE).unwrap();
        assert_eq!(credentials.login, "alice");
        assert_eq!(credentials.password, "hunter2");
    }

    #[test]
    fn test_find_machine_single_line_entry() {
        let credentials = find_machine(NETRC, "example.com").unwrap();
        assert_eq!(credentials.login, "other");
    }

    #[test]
    fn test_find_machine_falls_back_to_default() {
        let credentials = find_machine(NETRC, "unknown.org").unwrap();
        assert_eq!(credentials.login, "anon");
    }

    #[test]
    fn test_find_machine_incomplete_entry() {
        assert!(find_machine("machine h login only", "h").is_none());
    }

    #[test]
    fn test_authenticate_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("netrc");
        std::fs::write(&path, NETRC).unwrap();

        let provider = NetrcCredentials::new(Some(path));
        assert!(!provider.is_authenticated());
        assert!(provider.authenticate());
        assert!(provider.is_authenticated());
        assert_eq!(provider.credentials().unwrap().login, "alice");
    }

    #[test]
    fn test_authenticate_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let provider = NetrcCredentials::new(Some(temp.path().join("absent")));

        assert!(!provider.authenticate());
        assert!(!provider.is_authenticated());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            login: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }
}
