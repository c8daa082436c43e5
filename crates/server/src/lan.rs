//! Answers LAN discovery queries with the host's current announcement.

use anyhow::{Context, Result};
use deepmine_net::discovery::{encode_announcement, is_query, LanAnnouncement};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// UDP responder for discovery queries.
pub struct LanResponder {
    socket: UdpSocket,
}

impl LanResponder {
    /// Bind the discovery socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("binding LAN discovery socket on {addr}"))?;
        info!(addr = %socket.local_addr()?, "LAN discovery listening");
        Ok(Self { socket })
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Answer queries until the announcement channel closes. Every answer
    /// carries the latest announcement.
    pub async fn run(self, mut announcement: watch::Receiver<LanAnnouncement>) -> Result<()> {
        let mut buf = [0u8; 64];
        loop {
            tokio::select! {
                changed = announcement.changed() => {
                    if changed.is_err() {
                        debug!("announcement channel closed; LAN responder stopping");
                        return Ok(());
                    }
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(received) => received,
                        Err(err) => {
                            warn!("LAN discovery receive failed: {err}");
                            continue;
                        }
                    };
                    if !is_query(&buf[..len]) {
                        continue;
                    }
                    let answer = encode_announcement(&announcement.borrow())?;
                    if let Err(err) = self.socket.send_to(&answer, from).await {
                        warn!(%from, "LAN discovery answer failed: {err}");
                    } else {
                        debug!(%from, "answered LAN discovery query");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepmine_net::discovery::discover_lan;
    use std::time::Duration;
    use tokio::time::Instant;

    fn announcement(players: u32) -> LanAnnouncement {
        LanAnnouncement {
            name: "cavern".into(),
            game_port: 5566,
            current_players: players,
            max_players: 8,
            extra: String::new(),
        }
    }

    #[tokio::test]
    async fn answers_with_latest_announcement() {
        let responder = LanResponder::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let target = responder.local_addr().unwrap();
        let (tx, rx) = watch::channel(announcement(0));
        let task = tokio::spawn(responder.run(rx));

        tx.send(announcement(3)).unwrap();
        let found = discover_lan(target, Instant::now() + Duration::from_millis(300)).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "cavern");
        assert_eq!(found[0].current_players, 3);
        assert_eq!(found[0].endpoint, "127.0.0.1:5566".parse().unwrap());

        drop(tx);
        task.await.unwrap().unwrap();
    }
}
