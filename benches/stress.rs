//! Load driver for a running roomd instance. Point it at a server with
//! ROOMD_HOST / ROOMD_PORT / ROOMD_TOKEN and run with `cargo bench`.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use roomd::proto::Response;

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(host: &str, port: u16, token: &str) -> Self {
        let stream = TcpStream::connect((host, port)).await.expect("connect failed");
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(64 * 1024));
        framed
            .send(format!(r#"{{"op":"hello","token":"{token}"}}"#))
            .await
            .expect("send failed");
        let line = framed.next().await.expect("closed").expect("framing");
        let resp: Response = serde_json::from_str(&line).expect("bad json");
        assert!(matches!(resp, Response::Ok), "handshake failed: {resp:?}");
        Self { framed }
    }

    async fn request(&mut self, json: String) -> Response {
        self.framed.send(json).await.expect("send failed");
        let line = self.framed.next().await.expect("closed").expect("framing");
        serde_json::from_str(&line).expect("bad json")
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn setup(client: &mut Client, n_rooms: usize) -> Vec<Ulid> {
    let floor = match client
        .request(format!(
            r#"{{"op":"create_floor","number":{},"name":"Bench floor","actor":"bench"}}"#,
            rand_number()
        ))
        .await
    {
        Response::Floor { floor } => floor,
        other => panic!("create_floor failed: {other:?}"),
    };

    let mut rooms = Vec::with_capacity(n_rooms);
    for i in 0..n_rooms {
        match client
            .request(format!(
                r#"{{"op":"create_room","floor_id":"{}","name":"Bench-{i}","capacity":8,"actor":"bench"}}"#,
                floor.id
            ))
            .await
        {
            Response::Room { room } => rooms.push(room.id),
            other => panic!("create_room failed: {other:?}"),
        }
    }
    println!("  created {} rooms", rooms.len());
    rooms
}

// Unique-ish floor number per run so repeated bench runs don't collide.
fn rand_number() -> i16 {
    (std::time::UNIX_EPOCH.elapsed().unwrap().subsec_nanos() % 30000) as i16
}

/// Dates far enough apart that sequential writes never conflict.
fn date_for(i: usize) -> String {
    let day = 1 + (i % 28);
    let month = 1 + (i / 28) % 12;
    format!("2026-{month:02}-{day:02}")
}

async fn phase1_sequential_writes(host: &str, port: u16, token: &str, room: Ulid) {
    let mut client = Client::connect(host, port, token).await;

    // 12 one-hour slots per day, cycling through dates
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let slot = i % 12;
        let s = 420 + slot * 60;
        let e = s + 60;
        let date = date_for(i / 12);
        let t = Instant::now();
        let resp = client
            .request(format!(
                r#"{{"op":"create_booking","room_id":"{room}","date":"{date}","start":{s},"end":{e},"title":"bench","requester":"bench"}}"#
            ))
            .await;
        assert!(matches!(resp, Response::Booking { .. }), "write failed: {resp:?}");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_conflict_storm(host: &str, port: u16, token: &str, room: Ulid) {
    // Many clients fight over the same 12 slots on one date; exactly 12 can win.
    let n_tasks = 10;
    let n_per_task = 100;

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let host = host.to_string();
        let token = token.to_string();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port, &token).await;
            let mut won = 0usize;
            let mut lost = 0usize;
            for i in 0..n_per_task {
                let slot = (task + i) % 12;
                let s = 420 + slot * 60;
                let e = s + 60;
                let resp = client
                    .request(format!(
                        r#"{{"op":"create_booking","room_id":"{room}","date":"2027-01-15","start":{s},"end":{e},"title":"storm","requester":"task{task}"}}"#
                    ))
                    .await;
                match resp {
                    Response::Booking { .. } => won += 1,
                    Response::Err { error } if error.code == "conflict" => lost += 1,
                    other => panic!("unexpected: {other:?}"),
                }
            }
            (won, lost)
        }));
    }

    let mut won = 0;
    let mut lost = 0;
    for h in handles {
        let (w, l) = h.await.unwrap();
        won += w;
        lost += l;
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {total} contended requests in {:.2}s: {won} won, {lost} conflicted",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, 12, "exactly one booking per slot must win");
}

async fn phase3_read_storm(host: &str, port: u16, token: &str, room: Ulid) {
    let n_tasks = 10;
    let n_per_task = 500;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let token = token.to_string();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port, &token).await;
            let mut latencies = Vec::with_capacity(n_per_task);
            for _ in 0..n_per_task {
                let t = Instant::now();
                let resp = client
                    .request(format!(
                        r#"{{"op":"get_room_availability","room_id":"{room}","date":"2027-01-15"}}"#
                    ))
                    .await;
                assert!(matches!(resp, Response::RoomDay { .. }));
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    let ops = all.len() as f64 / elapsed.as_secs_f64();
    println!("  {} availability reads = {ops:.0} ops/sec", all.len());
    print_latency("read latency", &mut all);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMD_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(7411);
    let token = std::env::var("ROOMD_TOKEN").unwrap_or_else(|_| "roomd".into());

    println!("roomd stress against {host}:{port}");

    let mut admin = Client::connect(&host, port, &token).await;
    let rooms = setup(&mut admin, 4).await;

    println!("phase 1: sequential writes");
    phase1_sequential_writes(&host, port, &token, rooms[0]).await;

    println!("phase 2: conflict storm");
    phase2_conflict_storm(&host, port, &token, rooms[1]).await;

    println!("phase 3: availability reads");
    phase3_read_storm(&host, port, &token, rooms[1]).await;

    println!("done");
}
