use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const IDENTITY_VERSION: u32 = 1;
pub const X509_TYPE: &str = "X.509";

const IDENTITY_EXT: &str = "id";

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("identity file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("identity {0} not found in wallet")]
    NotFound(String),
    #[error("keystore folder should have contain one file, found {found} in {path}")]
    Keystore { path: PathBuf, found: usize },
    #[error("signing certificate {0} is missing")]
    MissingCertificate(PathBuf),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> WalletError + '_ {
    move |source| WalletError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub certificate: String,
    pub private_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("certificate", &self.certificate)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// X.509 identity as stored in a wallet file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Identity {
    pub version: u32,
    pub msp_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub credentials: Credentials,
}

impl X509Identity {
    pub fn new(
        msp_id: impl Into<String>,
        certificate: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            version: IDENTITY_VERSION,
            msp_id: msp_id.into(),
            kind: X509_TYPE.to_string(),
            credentials: Credentials {
                certificate: certificate.into(),
                private_key: private_key.into(),
            },
        }
    }

    /// Public half of the identity, as attached to every proposal.
    pub fn serialized(&self) -> SerializedIdentity {
        SerializedIdentity {
            mspid: self.msp_id.clone(),
            id_bytes: self.credentials.certificate.clone(),
        }
    }
}

/// Creator of a transaction: membership service provider plus certificate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SerializedIdentity {
    pub mspid: String,
    pub id_bytes: String,
}

/// Directory of `<label>.id` identity files.
pub struct FileSystemWallet {
    dir: PathBuf,
}

impl FileSystemWallet {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, WalletError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.{IDENTITY_EXT}"))
    }

    pub fn exists(&self, label: &str) -> bool {
        self.path_for(label).is_file()
    }

    pub fn put(&self, label: &str, identity: &X509Identity) -> Result<(), WalletError> {
        let path = self.path_for(label);
        let bytes = serde_json::to_vec_pretty(identity).map_err(|source| {
            WalletError::Malformed {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, bytes).map_err(io_error(&path))?;
        debug!(label, msp_id = %identity.msp_id, "stored identity");
        Ok(())
    }

    pub fn get(&self, label: &str) -> Result<X509Identity, WalletError> {
        let path = self.path_for(label);
        if !path.is_file() {
            return Err(WalletError::NotFound(label.to_string()));
        }
        let bytes = fs::read(&path).map_err(io_error(&path))?;
        serde_json::from_slice(&bytes).map_err(|source| WalletError::Malformed { path, source })
    }

    pub fn list(&self) -> Result<Vec<String>, WalletError> {
        let mut labels = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
            let entry = entry.map_err(io_error(&self.dir))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(IDENTITY_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                labels.push(stem.to_string());
            }
        }
        labels.sort();
        Ok(labels)
    }

    pub fn remove(&self, label: &str) -> Result<(), WalletError> {
        let path = self.path_for(label);
        if !path.is_file() {
            return Err(WalletError::NotFound(label.to_string()));
        }
        fs::remove_file(&path).map_err(io_error(&path))
    }
}

/// Loads the signing certificate and the single keystore file of an MSP
/// credential directory (`signcerts/cert.pem`, `keystore/*`) and stores
/// them in `wallet` under `label`.
pub fn populate_wallet(
    wallet: &FileSystemWallet,
    label: &str,
    msp_id: &str,
    cred_path: &Path,
) -> Result<X509Identity, WalletError> {
    let cert_path = cred_path.join("signcerts").join("cert.pem");
    if !cert_path.is_file() {
        return Err(WalletError::MissingCertificate(cert_path));
    }
    let cert = fs::read_to_string(&cert_path).map_err(io_error(&cert_path))?;

    let key_dir = cred_path.join("keystore");
    let mut files = Vec::new();
    for entry in fs::read_dir(&key_dir).map_err(io_error(&key_dir))? {
        files.push(entry.map_err(io_error(&key_dir))?.path());
    }
    if files.len() != 1 {
        return Err(WalletError::Keystore {
            path: key_dir,
            found: files.len(),
        });
    }
    let key = fs::read_to_string(&files[0]).map_err(io_error(&files[0]))?;

    let identity = X509Identity::new(msp_id, cert, key);
    wallet.put(label, &identity)?;
    info!(label, msp_id, "populated wallet from {}", cred_path.display());
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential_dir(keys: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("signcerts")).unwrap();
        fs::create_dir_all(dir.path().join("keystore")).unwrap();
        fs::write(dir.path().join("signcerts/cert.pem"), "-----CERT-----").unwrap();
        for i in 0..keys {
            fs::write(dir.path().join(format!("keystore/{i}_sk")), "-----KEY-----").unwrap();
        }
        dir
    }

    #[test]
    fn put_get_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path().join("wallet")).unwrap();
        assert!(!wallet.exists("appUser"));

        let identity = X509Identity::new("Org1MSP", "cert", "key");
        wallet.put("appUser", &identity).unwrap();
        wallet.put("admin", &identity).unwrap();
        assert!(wallet.exists("appUser"));
        assert_eq!(wallet.get("appUser").unwrap(), identity);
        assert_eq!(wallet.list().unwrap(), ["admin", "appUser"]);

        wallet.remove("admin").unwrap();
        assert!(matches!(wallet.get("admin"), Err(WalletError::NotFound(_))));
    }

    #[test]
    fn identity_file_uses_wallet_layout() {
        let identity = X509Identity::new("Org1MSP", "cert", "key");
        let json: serde_json::Value = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["mspId"], "Org1MSP");
        assert_eq!(json["type"], "X.509");
        assert_eq!(json["credentials"]["privateKey"], "key");
        assert!(!format!("{identity:?}").contains("\"key\""));
    }

    #[test]
    fn populate_reads_single_key() {
        let creds = credential_dir(1);
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path()).unwrap();
        let identity = populate_wallet(&wallet, "appUser", "Org1MSP", creds.path()).unwrap();
        assert_eq!(identity.credentials.certificate, "-----CERT-----");
        assert_eq!(identity.credentials.private_key, "-----KEY-----");
        assert_eq!(wallet.get("appUser").unwrap(), identity);
        assert_eq!(identity.serialized().mspid, "Org1MSP");
    }

    #[test]
    fn populate_rejects_ambiguous_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path()).unwrap();
        for keys in [0, 2] {
            let creds = credential_dir(keys);
            let err = populate_wallet(&wallet, "appUser", "Org1MSP", creds.path()).unwrap_err();
            assert!(matches!(err, WalletError::Keystore { found, .. } if found == keys));
        }
        assert!(!wallet.exists("appUser"));
    }

    #[test]
    fn populate_requires_certificate() {
        let creds = credential_dir(1);
        let cert = creds.path().join("signcerts/cert.pem");
        fs::remove_file(&cert).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path()).unwrap();
        let err = populate_wallet(&wallet, "appUser", "Org1MSP", creds.path()).unwrap_err();
        assert!(matches!(err, WalletError::MissingCertificate(ref path) if *path == cert));
        assert!(!wallet.exists("appUser"));
    }
}
