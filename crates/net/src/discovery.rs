//! Host discovery: LAN broadcast plus a remote plaintext directory.
//!
//! Both sources run concurrently under one wall-clock budget. Whatever has
//! arrived when the budget runs out is returned; neither source failing is
//! an error for the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, trace, warn};

/// Default UDP port hosts listen on for discovery queries.
pub const DEFAULT_DISCOVERY_PORT: u16 = 5565;

/// Default game port. The QUIC endpoint cannot share the discovery socket.
pub const DEFAULT_GAME_PORT: u16 = 5566;

/// Protocol tag expected in the third directory field.
pub const DIRECTORY_PROTOCOL_TAG: &str = "DEEPMINE";

/// Default discovery budget.
pub const DEFAULT_DISCOVERY_BUDGET: Duration = Duration::from_millis(500);

/// Magic prefix of a LAN discovery query.
pub const LAN_QUERY_MAGIC: &[u8; 4] = b"DMQ1";

/// Magic prefix of a LAN discovery answer.
pub const LAN_ANSWER_MAGIC: &[u8; 4] = b"DMA1";

/// Maximum LAN answer size accepted.
const MAX_ANSWER_LEN: usize = 1024;

/// A candidate host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Display name.
    pub name: String,
    /// Game endpoint.
    pub endpoint: SocketAddr,
    /// Connected players.
    pub current_players: u32,
    /// Player cap.
    pub max_players: u32,
    /// Free-form host text.
    pub extra: String,
    /// Found on the local network rather than the directory.
    pub lan: bool,
}

impl ServerInfo {
    /// One-line description for a host list.
    pub fn describe(&self) -> String {
        let mut desc = format!(
            "{} ({}/{})",
            self.name, self.current_players, self.max_players
        );
        if !self.extra.is_empty() {
            desc.push_str(" - ");
            desc.push_str(&self.extra);
        }
        if self.lan {
            desc.push_str(" [LAN]");
        }
        desc
    }
}

/// Body of a LAN discovery answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanAnnouncement {
    /// Display name.
    pub name: String,
    /// Port the game listens on.
    pub game_port: u16,
    /// Connected players.
    pub current_players: u32,
    /// Player cap.
    pub max_players: u32,
    /// Free-form host text.
    pub extra: String,
}

/// Encode a LAN answer datagram.
pub fn encode_announcement(announcement: &LanAnnouncement) -> anyhow::Result<Vec<u8>> {
    let mut datagram = LAN_ANSWER_MAGIC.to_vec();
    datagram.extend(postcard::to_allocvec(announcement)?);
    Ok(datagram)
}

/// Decode a LAN answer datagram received from `from`.
pub fn decode_announcement(datagram: &[u8], from: SocketAddr) -> Option<ServerInfo> {
    let body = datagram.strip_prefix(LAN_ANSWER_MAGIC.as_slice())?;
    let announcement: LanAnnouncement = postcard::from_bytes(body).ok()?;
    Some(ServerInfo {
        name: announcement.name,
        endpoint: SocketAddr::new(from.ip(), announcement.game_port),
        current_players: announcement.current_players,
        max_players: announcement.max_players,
        extra: announcement.extra,
        lan: true,
    })
}

/// Whether `datagram` is a discovery query.
pub fn is_query(datagram: &[u8]) -> bool {
    datagram == LAN_QUERY_MAGIC.as_slice()
}

/// Parse one directory line: `name;ipv4;TAG;current;max;extra`.
///
/// Returns `None` for any line that does not have exactly six fields, the
/// expected tag, an IPv4 address and numeric counts.
pub fn parse_directory_line(line: &str, tag: &str, game_port: u16) -> Option<ServerInfo> {
    let fields: Vec<&str> = line.split(';').collect();
    let [name, ip, line_tag, current, max, extra] = fields.as_slice() else {
        return None;
    };
    if *line_tag != tag {
        return None;
    }
    let ip: Ipv4Addr = ip.trim().parse().ok()?;
    Some(ServerInfo {
        name: name.to_string(),
        endpoint: SocketAddr::new(IpAddr::V4(ip), game_port),
        current_players: current.trim().parse().ok()?,
        max_players: max.trim().parse().ok()?,
        extra: extra.to_string(),
        lan: false,
    })
}

/// Parse a whole directory listing, skipping malformed lines.
pub fn parse_directory(text: &str, tag: &str, game_port: u16) -> Vec<ServerInfo> {
    text.split(['\r', '\n'])
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parsed = parse_directory_line(line, tag, game_port);
            if parsed.is_none() {
                trace!(line, "skipping malformed directory line");
            }
            parsed
        })
        .collect()
}

/// Directory fetch failure. Callers treat it as an empty listing.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// HTTP request failed.
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Request outlived the budget.
    #[error("directory request timed out")]
    Timeout,
}

/// Fetch the raw directory listing.
pub async fn fetch_directory(url: &str, budget: Duration) -> Result<String, DirectoryError> {
    let client = reqwest::Client::builder().timeout(budget).build()?;
    let fetch = async {
        let response = client.get(url).send().await?.error_for_status()?;
        Ok::<_, DirectoryError>(response.text().await?)
    };
    timeout(budget, fetch)
        .await
        .map_err(|_| DirectoryError::Timeout)?
}

/// Discovery inputs.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Hard wall-clock budget for the whole operation.
    pub budget: Duration,
    /// Where to send the LAN query; `None` skips LAN discovery.
    pub lan_target: Option<SocketAddr>,
    /// Directory URL; `None` skips the directory.
    pub directory_url: Option<String>,
    /// Tag expected in directory lines.
    pub protocol_tag: String,
    /// Port assumed for directory entries.
    pub game_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_DISCOVERY_BUDGET,
            lan_target: Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                DEFAULT_DISCOVERY_PORT,
            )),
            directory_url: None,
            protocol_tag: DIRECTORY_PROTOCOL_TAG.to_string(),
            game_port: DEFAULT_GAME_PORT,
        }
    }
}

/// Broadcast a query and collect answers until `deadline`.
///
/// Answers are deduplicated by endpoint. Socket failures end collection early
/// with whatever was gathered.
pub async fn discover_lan(target: SocketAddr, deadline: Instant) -> Vec<ServerInfo> {
    let mut found = Vec::new();
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(err) => {
            warn!("LAN discovery bind failed: {err}");
            tokio::time::sleep_until(deadline).await;
            return found;
        }
    };
    if let Err(err) = socket.set_broadcast(true) {
        warn!("LAN discovery could not enable broadcast: {err}");
    }
    if let Err(err) = socket.send_to(LAN_QUERY_MAGIC, target).await {
        debug!("LAN discovery query to {target} failed: {err}");
    }

    let mut seen = HashSet::new();
    let mut buf = [0u8; MAX_ANSWER_LEN];
    loop {
        match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(err)) => {
                // Some platforms surface ICMP port-unreachable here; keep waiting.
                trace!("LAN discovery recv error: {err}");
            }
            Ok(Ok((len, from))) => match decode_announcement(&buf[..len], from) {
                Some(info) if seen.insert(info.endpoint) => {
                    debug!(endpoint = %info.endpoint, name = %info.name, "LAN host found");
                    found.push(info);
                }
                Some(_) => {}
                None => trace!(%from, "ignoring non-discovery datagram"),
            },
        }
    }
    found
}

/// Run LAN and directory discovery concurrently within `config.budget`.
///
/// LAN hosts come first; directory entries whose endpoint was already found
/// on the LAN are dropped.
pub async fn discover(config: &DiscoveryConfig) -> Vec<ServerInfo> {
    let deadline = Instant::now() + config.budget;

    let lan = async {
        match config.lan_target {
            Some(target) => discover_lan(target, deadline).await,
            None => {
                tokio::time::sleep_until(deadline).await;
                Vec::new()
            }
        }
    };

    let remote = async {
        let Some(url) = config.directory_url.as_deref() else {
            return Vec::new();
        };
        match fetch_directory(url, config.budget).await {
            Ok(text) => parse_directory(&text, &config.protocol_tag, config.game_port),
            Err(err) => {
                warn!("{err}; continuing without remote hosts");
                Vec::new()
            }
        }
    };

    let (lan, remote) = tokio::join!(lan, remote);

    let mut seen: HashSet<SocketAddr> = lan.iter().map(|s| s.endpoint).collect();
    let mut servers = lan;
    servers.extend(remote.into_iter().filter(|s| seen.insert(s.endpoint)));
    info!(count = servers.len(), "discovery finished");
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let info = parse_directory_line("MyServer;127.0.0.1;GAME;3;16;x", "GAME", 5565)
            .expect("line parses");
        assert_eq!(info.name, "MyServer");
        assert_eq!(info.endpoint, "127.0.0.1:5565".parse().unwrap());
        assert_eq!(info.current_players, 3);
        assert_eq!(info.max_players, 16);
        assert_eq!(info.extra, "x");
        assert!(!info.lan);
    }

    #[test]
    fn skips_bad_lines_without_aborting() {
        let text = "Broken;127.0.0.1;GAME;3;16\r\n\
                    Good;10.0.0.2;GAME;1;8;hi\r\n\
                    Wrong;10.0.0.3;OTHER;1;8;x\n\
                    NoIp;not-an-ip;GAME;1;8;x\n\
                    BadCount;10.0.0.4;GAME;many;8;x\n\
                    Also;10.0.0.5;GAME;0;4;";
        let servers = parse_directory(text, "GAME", 5565);
        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Good", "Also"]);
    }

    #[test]
    fn extra_field_count_is_skipped() {
        assert!(parse_directory_line("a;1.2.3.4;GAME;1;2;x;y", "GAME", 1).is_none());
    }

    #[test]
    fn announcement_roundtrip() {
        let announcement = LanAnnouncement {
            name: "Basement".into(),
            game_port: 6000,
            current_players: 2,
            max_players: 16,
            extra: "sandbox".into(),
        };
        let datagram = encode_announcement(&announcement).expect("encode");
        let from: SocketAddr = "192.168.1.20:5566".parse().unwrap();
        let info = decode_announcement(&datagram, from).expect("decode");
        assert_eq!(info.endpoint, "192.168.1.20:6000".parse().unwrap());
        assert_eq!(info.name, "Basement");
        assert!(info.lan);
        assert!(decode_announcement(b"junk", from).is_none());
    }

    #[test]
    fn describe_includes_counts() {
        let info = ServerInfo {
            name: "Pit".into(),
            endpoint: "10.0.0.1:5565".parse().unwrap(),
            current_players: 3,
            max_players: 16,
            extra: String::new(),
            lan: true,
        };
        assert_eq!(info.describe(), "Pit (3/16) [LAN]");
    }

    #[tokio::test]
    async fn discovery_without_responders_waits_for_budget() {
        // Nothing listens on this freshly released port.
        let port = {
            let scratch = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            scratch.local_addr().unwrap().port()
        };
        let config = DiscoveryConfig {
            budget: Duration::from_millis(500),
            lan_target: Some(SocketAddr::from(([127, 0, 0, 1], port))),
            directory_url: None,
            ..DiscoveryConfig::default()
        };
        let started = std::time::Instant::now();
        let servers = discover(&config).await;
        let elapsed = started.elapsed();
        assert!(servers.is_empty());
        assert!(elapsed >= Duration::from_millis(450), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "overran budget: {elapsed:?}");
    }

    #[tokio::test]
    async fn unreachable_directory_counts_as_empty() {
        let config = DiscoveryConfig {
            budget: Duration::from_millis(300),
            lan_target: None,
            directory_url: Some("http://127.0.0.1:9/servers.txt".into()),
            ..DiscoveryConfig::default()
        };
        let servers = discover(&config).await;
        assert!(servers.is_empty());
    }

    #[tokio::test]
    async fn lan_answers_are_collected_and_deduplicated() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = responder.local_addr().unwrap();
        let answer = encode_announcement(&LanAnnouncement {
            name: "Local".into(),
            game_port: 5565,
            current_players: 0,
            max_players: 8,
            extra: String::new(),
        })
        .unwrap();

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            assert!(is_query(&buf[..len]));
            // Answer twice; the client must keep only one entry.
            responder.send_to(&answer, from).await.unwrap();
            responder.send_to(&answer, from).await.unwrap();
        });

        let deadline = Instant::now() + Duration::from_millis(400);
        let found = discover_lan(target, deadline).await;
        task.await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Local");
        assert_eq!(found[0].endpoint, "127.0.0.1:5565".parse().unwrap());
    }
}
