//! Credential resolution: username and private key loading

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::{PrivateKey, load_secret_key};
use tracing::{debug, instrument};

use crate::error::ExecError;

/// Conventional private key location relative to the home directory
pub const DEFAULT_KEY_FILE: &str = ".ssh/id_rsa";

/// Raw credential inputs as handed over by the driver
///
/// Empty strings mean "apply the default".
#[derive(Debug, Clone, Default)]
pub struct CredentialInputs {
    /// Login name on the remote hosts
    pub username: String,
    /// Path to the private key
    pub key_path: String,
}

impl CredentialInputs {
    /// Create inputs from username and key path
    pub fn new(username: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            key_path: key_path.into(),
        }
    }
}

/// Process-level facts the defaults are derived from
///
/// Captured once and passed in explicitly so resolution stays pure.
#[derive(Debug, Clone, Default)]
pub struct UserEnv {
    /// Home directory of the current user
    pub home_dir: Option<PathBuf>,
    /// Login name of the current user
    pub login_name: Option<String>,
    /// Port override (the `PORT` environment variable)
    pub port_override: Option<String>,
}

impl UserEnv {
    /// Snapshot the current process environment
    #[must_use]
    pub fn from_process() -> Self {
        let login_name = ["USER", "LOGNAME"]
            .iter()
            .filter_map(|var| env::var(var).ok())
            .find(|name| !name.is_empty());

        Self {
            home_dir: dirs::home_dir(),
            login_name,
            port_override: env::var("PORT").ok().filter(|p| !p.is_empty()),
        }
    }

    /// Set home directory
    #[must_use]
    pub fn with_home_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(path.into());
        self
    }

    /// Set login name
    #[must_use]
    pub fn with_login_name(mut self, name: impl Into<String>) -> Self {
        self.login_name = Some(name.into());
        self
    }

    /// Set port override
    #[must_use]
    pub fn with_port_override(mut self, port: impl Into<String>) -> Self {
        self.port_override = Some(port.into());
        self
    }
}

/// Username plus signing key, shared read-only by every host task
#[derive(Clone)]
pub struct Credential {
    username: String,
    key: Arc<PrivateKey>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("algorithm", &self.key.algorithm())
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Resolve defaults and load the signing key
    ///
    /// # Errors
    /// Returns `ExecError::Credential` if a default cannot be derived from `env`,
    /// or `ExecError::KeyLoad` if the key file is unreadable or unparsable
    #[instrument(skip_all)]
    pub fn build(inputs: &CredentialInputs, env: &UserEnv) -> Result<Self, ExecError> {
        let key_path = resolve_key_path(&inputs.key_path, env)?;
        let key = load_key(&key_path)?;
        let username = resolve_username(&inputs.username, env)?;

        debug!(user = %username, key = %key_path.display(), "credential ready");

        Ok(Self::from_key(username, key))
    }

    /// Build a credential from an already loaded key
    pub fn from_key(username: impl Into<String>, key: PrivateKey) -> Self {
        Self {
            username: username.into(),
            key: Arc::new(key),
        }
    }

    /// Remote login name
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Signing key
    #[must_use]
    pub fn key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.key)
    }
}

/// Pick the key path, falling back to `~/.ssh/id_rsa`
///
/// # Errors
/// Returns `ExecError::Credential` if no path was given and no home directory is known
pub fn resolve_key_path(key_path: &str, env: &UserEnv) -> Result<PathBuf, ExecError> {
    if !key_path.is_empty() {
        return Ok(PathBuf::from(key_path));
    }

    env.home_dir
        .as_ref()
        .map(|home| home.join(DEFAULT_KEY_FILE))
        .ok_or_else(|| ExecError::Credential("cannot determine home directory".to_string()))
}

/// Pick the username, falling back to the current login name
///
/// # Errors
/// Returns `ExecError::Credential` if no username was given and no login name is known
pub fn resolve_username(username: &str, env: &UserEnv) -> Result<String, ExecError> {
    if !username.is_empty() {
        return Ok(username.to_string());
    }

    env.login_name
        .clone()
        .ok_or_else(|| ExecError::Credential("cannot determine current user".to_string()))
}

fn load_key(path: &Path) -> Result<PrivateKey, ExecError> {
    load_secret_key(path, None).map_err(|e| ExecError::KeyLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::ssh_key::LineEnding;
    use russh::keys::ssh_key::private::{Ed25519Keypair, KeypairData};

    fn test_key() -> PrivateKey {
        let keypair = Ed25519Keypair::from_seed(&[7u8; 32]);
        PrivateKey::new(KeypairData::from(keypair), "hostmap-test").unwrap()
    }

    #[test]
    fn test_explicit_key_path_wins() {
        let env = UserEnv::default().with_home_dir("/home/ops");
        let path = resolve_key_path("/keys/deploy", &env).unwrap();
        assert_eq!(path, PathBuf::from("/keys/deploy"));
    }

    #[test]
    fn test_default_key_path() {
        let env = UserEnv::default().with_home_dir("/home/ops");
        let path = resolve_key_path("", &env).unwrap();
        assert_eq!(path, PathBuf::from("/home/ops/.ssh/id_rsa"));
    }

    #[test]
    fn test_default_key_path_without_home() {
        let err = resolve_key_path("", &UserEnv::default()).unwrap_err();
        assert!(matches!(err, ExecError::Credential(_)));
    }

    #[test]
    fn test_username_defaults() {
        let env = UserEnv::default().with_login_name("ops");
        assert_eq!(resolve_username("deploy", &env).unwrap(), "deploy");
        assert_eq!(resolve_username("", &env).unwrap(), "ops");
        assert!(resolve_username("", &UserEnv::default()).is_err());
    }

    #[test]
    fn test_missing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let inputs = CredentialInputs::new("ops", path.to_string_lossy());

        let err = Credential::build(&inputs, &UserEnv::default()).unwrap_err();
        assert!(matches!(err, ExecError::KeyLoad { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_garbage_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa");
        std::fs::write(&path, "not a key").unwrap();
        let inputs = CredentialInputs::new("ops", path.to_string_lossy());

        let err = Credential::build(&inputs, &UserEnv::default()).unwrap_err();
        assert!(matches!(err, ExecError::KeyLoad { .. }));
    }

    #[test]
    fn test_build_from_default_location() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir(home.path().join(".ssh")).unwrap();
        let encoded = test_key().to_openssh(LineEnding::LF).unwrap();
        std::fs::write(home.path().join(DEFAULT_KEY_FILE), encoded.as_bytes()).unwrap();

        let env = UserEnv::default()
            .with_home_dir(home.path())
            .with_login_name("ops");
        let credential = Credential::build(&CredentialInputs::default(), &env).unwrap();

        assert_eq!(credential.username(), "ops");
        assert_eq!(credential.key().public_key(), test_key().public_key());
    }
}
