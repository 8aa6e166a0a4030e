//! Small diagnostic client: joins a world, steers toward a few targets,
//! prints the frames it receives, then leaves.

use bincode::{deserialize, serialize};
use clap::Parser;
use shared::Packet;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Duration};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// World to join
    #[clap(short, long, default_value = "1")]
    world_id: u64,
    /// Player name
    #[clap(short, long, default_value = "probe")]
    name: String,
    /// Request token
    #[clap(long, default_value = "")]
    token: String,
    /// Seconds to stay joined
    #[clap(short, long, default_value = "10")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let server_addr = args.server.parse::<SocketAddr>()?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("probe bound to {}", socket.local_addr()?);

    let list = serialize(&Packet::ListWorlds {
        token: args.token.clone(),
    })?;
    socket.send_to(&list, server_addr).await?;

    let mut buf = vec![0u8; 65_507];
    let (len, _) = socket.recv_from(&mut buf).await?;
    if let Ok(Packet::WorldList(worlds)) = deserialize::<Packet>(&buf[..len]) {
        for w in &worlds {
            println!(
                "world {} '{}': {} player(s) at {} Hz",
                w.id, w.name, w.player_count, w.tick_rate
            );
        }
    }

    let join = serialize(&Packet::Join {
        token: args.token.clone(),
        world_id: args.world_id,
        name: args.name.clone(),
    })?;
    println!("joining world {} as '{}'", args.world_id, args.name);
    socket.send_to(&join, server_addr).await?;

    let mut player_id = None;
    let deadline = Duration::from_secs(args.duration);
    let started = tokio::time::Instant::now();
    let mut frames_seen = 0u64;
    let mut next_turn = tokio::time::Instant::now();

    while started.elapsed() < deadline {
        let received = match timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                println!("no traffic for 2s, giving up");
                break;
            }
        };
        let (len, _) = received;

        match deserialize::<Packet>(&buf[..len]) {
            Ok(Packet::Joined {
                world_id,
                player_id: id,
            }) => {
                println!("joined world {} as player {}", world_id, id);
                player_id = Some(id);
            }
            Ok(Packet::Frame(frame)) => {
                frames_seen += 1;
                if frames_seen % 30 == 1 {
                    println!(
                        "tick {}: {} player(s), {} pellet(s), {} event(s)",
                        frame.tick,
                        frame.players.len(),
                        frame.pellets.len(),
                        frame.events.len()
                    );
                    if let Some(id) = player_id {
                        if let Some(me) = frame.players.iter().find(|p| p.id == id) {
                            println!(
                                "  me: ({:.1}, {:.1}) mass {:.1}",
                                me.x, me.y, me.mass
                            );
                        } else {
                            println!("  eliminated");
                        }
                    }
                }
            }
            Ok(Packet::Error { message }) => {
                println!("server error: {}", message);
                return Ok(());
            }
            Ok(other) => println!("unexpected packet: {:?}", other),
            Err(e) => println!("undecodable datagram: {}", e),
        }

        // Steer somewhere new every couple of seconds
        if player_id.is_some() && tokio::time::Instant::now() >= next_turn {
            let t = started.elapsed().as_secs_f32();
            let target = Packet::SetTarget {
                x: 500.0 + 400.0 * t.sin(),
                y: 500.0 + 400.0 * t.cos(),
            };
            socket.send_to(&serialize(&target)?, server_addr).await?;
            next_turn = tokio::time::Instant::now() + Duration::from_secs(2);
        }
    }

    println!("leaving after {} frame(s)", frames_seen);
    socket.send_to(&serialize(&Packet::Leave)?, server_addr).await?;
    sleep(Duration::from_millis(100)).await;
    Ok(())
}
