//! Wire types for the DigitalOcean v2 REST API.
//!
//! Only the fields the backend reads are modelled; serde ignores the rest.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct Snapshot {
    pub(crate) id: String,
    pub(crate) name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotList {
    #[serde(default)]
    pub(crate) snapshots: Vec<Snapshot>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct SshKey {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) fingerprint: String,
    #[serde(default)]
    pub(crate) public_key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SshKeyEnvelope {
    pub(crate) ssh_key: SshKey,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SshKeyList {
    #[serde(default)]
    pub(crate) ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateKeyRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) public_key: &'a str,
}

/// Droplets boot from either a snapshot id or a distribution slug.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub(crate) enum ImageRef {
    Snapshot(u64),
    Slug(String),
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateDropletRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) region: &'a str,
    pub(crate) size: &'a str,
    pub(crate) image: ImageRef,
    pub(crate) ssh_keys: Vec<u64>,
    pub(crate) tags: Vec<&'a str>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct NetworkV4 {
    pub(crate) ip_address: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub(crate) struct Networks {
    #[serde(default)]
    pub(crate) v4: Vec<NetworkV4>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct Droplet {
    pub(crate) id: u64,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) locked: bool,
    #[serde(default)]
    pub(crate) networks: Networks,
}

impl Droplet {
    /// Public IPv4 address once the droplet is unlocked and networked.
    pub(crate) fn ready_address(&self) -> Option<&str> {
        if self.locked {
            return None;
        }
        self.networks
            .v4
            .iter()
            .find(|network| network.kind == "public")
            .map(|network| network.ip_address.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DropletEnvelope {
    pub(crate) droplet: Droplet,
}

#[derive(Debug, Serialize)]
pub(crate) struct ActionRequest<'a> {
    #[serde(rename = "type")]
    pub(crate) kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<&'a str>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct Action {
    pub(crate) id: u64,
    pub(crate) status: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionEnvelope {
    pub(crate) action: Action,
}
