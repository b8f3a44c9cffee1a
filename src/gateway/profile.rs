use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use super::GatewayError;

const LOCALHOST: &str = "127.0.0.1";

/// Network topology as seen by one client organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub client: ClientSection,
    pub organizations: BTreeMap<String, Organization>,
    pub peers: BTreeMap<String, PeerEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSection {
    pub organization: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub mspid: String,
    #[serde(default)]
    pub peers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    /// `host:port`, optionally prefixed with a `grpc://`-style scheme.
    pub url: String,
}

impl ConnectionProfile {
    pub fn from_file(path: &Path) -> Result<Self, GatewayError> {
        let bytes = fs::read(path).map_err(|source| GatewayError::ProfileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| GatewayError::ProfileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn client_organization(&self) -> Result<&Organization, GatewayError> {
        let org = &self.client.organization;
        self.organizations
            .get(org)
            .ok_or_else(|| GatewayError::UnknownOrganization(org.clone()))
    }

    /// First peer of the client organization as `(name, socket address)`.
    ///
    /// With `as_localhost` the peer host is replaced by the loopback address,
    /// for networks whose peers advertise container host names.
    pub fn resolve_peer(&self, as_localhost: bool) -> Result<(String, String), GatewayError> {
        let org = self.client_organization()?;
        let name = org
            .peers
            .first()
            .ok_or_else(|| GatewayError::NoPeers(self.client.organization.clone()))?;
        let endpoint = self
            .peers
            .get(name)
            .ok_or_else(|| GatewayError::UnknownPeer(name.clone()))?;
        let addr = endpoint_address(&endpoint.url, as_localhost)?;
        Ok((name.clone(), addr))
    }
}

fn endpoint_address(url: &str, as_localhost: bool) -> Result<String, GatewayError> {
    let hostport = url.split_once("://").map_or(url, |(_, rest)| rest);
    let (host, port) = hostport
        .rsplit_once(':')
        .filter(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .ok_or_else(|| GatewayError::PeerUrl(url.to_string()))?;
    let host = if as_localhost { LOCALHOST } else { host };
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"{
        "name": "test-network-org1",
        "version": "1.0.0",
        "client": { "organization": "Org1" },
        "organizations": {
            "Org1": { "mspid": "Org1MSP", "peers": ["peer0.org1.example.com"] }
        },
        "peers": {
            "peer0.org1.example.com": { "url": "grpcs://peer0.org1.example.com:7051" }
        }
    }"#;

    fn profile() -> ConnectionProfile {
        serde_json::from_str(PROFILE).unwrap()
    }

    #[test]
    fn resolves_first_peer_of_client_org() {
        let profile = profile();
        assert_eq!(profile.client_organization().unwrap().mspid, "Org1MSP");
        let (name, addr) = profile.resolve_peer(false).unwrap();
        assert_eq!(name, "peer0.org1.example.com");
        assert_eq!(addr, "peer0.org1.example.com:7051");
        let (_, addr) = profile.resolve_peer(true).unwrap();
        assert_eq!(addr, "127.0.0.1:7051");
    }

    #[test]
    fn reports_broken_topology() {
        let mut profile = profile();
        profile.client.organization = "Org2".into();
        assert!(matches!(
            profile.resolve_peer(false),
            Err(GatewayError::UnknownOrganization(_))
        ));

        let mut profile = self::profile();
        profile.peers.clear();
        assert!(matches!(
            profile.resolve_peer(false),
            Err(GatewayError::UnknownPeer(_))
        ));

        let mut profile = self::profile();
        profile
            .peers
            .get_mut("peer0.org1.example.com")
            .unwrap()
            .url = "peer0:notaport".into();
        assert!(matches!(
            profile.resolve_peer(false),
            Err(GatewayError::PeerUrl(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection-org1.json");
        fs::write(&path, PROFILE).unwrap();
        assert_eq!(ConnectionProfile::from_file(&path).unwrap(), profile());
        assert!(matches!(
            ConnectionProfile::from_file(&dir.path().join("missing.json")),
            Err(GatewayError::ProfileRead { .. })
        ));
    }
}
