//! Session-service lookup and identity derivation.

use anyhow::{Context, ensure};
use md5::{Digest as _, Md5};
use num_bigint::BigInt;
use serde::Deserialize;
use sha1::Sha1;
use uuid::Uuid;

const SESSION_SERVER: &str = "https://sessionserver.mojang.com/session/minecraft/hasJoined";

/// Profile returned by the session service for an authenticated player.
#[derive(Clone, Debug, Deserialize)]
pub struct GameProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub signature: Option<String>,
}

impl GameProfile {
    /// The `id` field arrives without dashes.
    pub fn uuid(&self) -> anyhow::Result<Uuid> {
        Uuid::parse_str(&self.id).context("session service returned a malformed uuid")
    }
}

/// Single outbound GET the online-mode login performs. Non-200 or a
/// mismatched name fails the login.
pub async fn has_joined(
    http: &reqwest::Client,
    username: &str,
    server_hash: &str,
) -> anyhow::Result<GameProfile> {
    let response = http
        .get(SESSION_SERVER)
        .query(&[("username", username), ("serverId", server_hash)])
        .send()
        .await
        .context("session service request failed")?;

    let status = response.status();
    ensure!(status.is_success(), "session service answered {status}");

    let profile: GameProfile = response
        .json()
        .await
        .context("session service returned malformed json")?;

    ensure!(
        profile.name == username,
        "session service resolved '{}' but '{username}' logged in",
        profile.name
    );

    Ok(profile)
}

/// The login hash: sha1(server_id ‖ shared_secret ‖ public_key_der),
/// hex-encoded as a signed two's-complement big integer.
#[must_use]
pub fn server_hash(server_id: &str, shared_secret: &[u8], public_key_der: &[u8]) -> String {
    let digest = Sha1::new()
        .chain_update(server_id.as_bytes())
        .chain_update(shared_secret)
        .chain_update(public_key_der)
        .finalize();
    twos_complement_hex(&digest)
}

fn twos_complement_hex(bytes: &[u8]) -> String {
    BigInt::from_signed_bytes_be(bytes).to_str_radix(16)
}

/// Deterministic uuid the offline-mode backend assigns for a username:
/// md5 of `OfflinePlayer:<name>` with the version-3 and RFC-4122 variant
/// bits set.
#[must_use]
pub fn offline_uuid(username: &str) -> Uuid {
    let mut digest: [u8; 16] = Md5::new()
        .chain_update(b"OfflinePlayer:")
        .chain_update(username.as_bytes())
        .finalize()
        .into();
    digest[6] = (digest[6] & 0x0F) | 0x30;
    digest[8] = (digest[8] & 0x3F) | 0x80;
    Uuid::from_bytes(digest)
}
