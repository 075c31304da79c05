//! The UDP tracker server: one socket, one receive loop.
//!
//! Each datagram is handled on its own task so a slow swarm (or a slow
//! external peer store) never blocks the receive loop. The connection-id map
//! lives with the server; its cleanup runs on a timer task.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection_id::ConnectionIdMap;
use super::handlers::handle_packet;
use super::MAX_PACKET_SIZE;
use crate::config::UdpTracker;
use crate::core::Tracker;
use crate::shared::clock::Time;
use crate::CurrentClock;

/// How often expired connection ids are collected.
const CONNECTION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// It binds the UDP socket and starts the receive loop and the connection-id
/// cleanup timer.
///
/// # Errors
///
/// Will return an `std::io::Error` if the socket cannot be bound. This is
/// fatal at startup.
pub async fn start(config: &UdpTracker, tracker: Arc<Tracker>) -> Result<Option<(SocketAddr, JoinHandle<()>)>, std::io::Error> {
    let Some(port) = config.udp_port else {
        return Ok(None);
    };

    let socket = Arc::new(UdpSocket::bind(SocketAddr::new(config.bind_ip, port)).await?);
    let bound_addr = socket.local_addr()?;

    let connections = Arc::new(ConnectionIdMap::new(Duration::from_secs(config.udp_connection_timeout)));

    {
        let connections = connections.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CONNECTION_CLEANUP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = connections.cleanup(CurrentClock::now());
                if removed > 0 {
                    debug!("udp tracker: dropped {removed} expired connection ids");
                }
            }
        });
    }

    let handle = tokio::spawn(run_receive_loop(socket, tracker, connections));

    info!("udp tracker listening on udp://{bound_addr}");

    Ok(Some((bound_addr, handle)))
}

async fn run_receive_loop(socket: Arc<UdpSocket>, tracker: Arc<Tracker>, connections: Arc<ConnectionIdMap>) {
    let mut buffer = [0u8; MAX_PACKET_SIZE];

    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((length, from)) => {
                let payload = buffer[..length].to_vec();
                let socket = socket.clone();
                let tracker = tracker.clone();
                let connections = connections.clone();

                tokio::spawn(async move {
                    let response = handle_packet(&payload, from, &tracker, &connections).await;
                    let bytes = response.to_bytes();

                    if let Err(err) = socket.send_to(&bytes, from).await {
                        debug!("udp tracker: failed to respond to {from}: {err}");
                    }
                });
            }
            Err(err) => {
                // Transient receive errors (e.g. ICMP port unreachable
                // surfacing on some platforms) must not kill the loop.
                warn!("udp tracker: recv error: {err}");
            }
        }
    }
}
