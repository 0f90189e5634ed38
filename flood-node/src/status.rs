//! Status HTTP endpoints: a minimal JSON API the dashboard polls.

use flood_core::{Clock, NetworkStatus, SharedNetwork, Transport};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::stations::{self, SharedStations};

/// Run the status server: accept connections and answer each request from
/// a fresh engine snapshot.
pub async fn run_status_server<T: Transport + 'static>(
    port: u16,
    network: SharedNetwork<T>,
    stations: SharedStations,
    clock: Clock,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "status server listening");
    loop {
        let (stream, _) = listener.accept().await?;
        let network = network.clone();
        let stations = stations.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            let _ = handle_client(stream, network, stations, clock).await;
        });
    }
}

async fn handle_client<T: Transport + 'static>(
    mut stream: TcpStream,
    network: SharedNetwork<T>,
    stations: SharedStations,
    clock: Clock,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 2048];
    let n = stream.read(&mut buf).await?;

    let response = match parse_request(&buf[..n]) {
        Some((method, path)) if method.eq_ignore_ascii_case("GET") => {
            let now_ms = clock();
            let snapshot = network.status_snapshot();
            match path.as_str() {
                "/api/status" => json_response(200, &status_json(&snapshot, now_ms)),
                "/api/sensors" => {
                    let body = {
                        let table = stations::lock(&stations);
                        sensors_json(&snapshot, &table, now_ms)
                    };
                    json_response(200, &body)
                }
                _ => json_response(404, &json!({ "error": "not found" })),
            }
        }
        Some(_) => json_response(405, &json!({ "error": "method not allowed" })),
        None => json_response(400, &json!({ "error": "bad request" })),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn parse_request(buf: &[u8]) -> Option<(String, String)> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    if !req.parse(buf).ok()?.is_complete() {
        return None;
    }
    Some((req.method?.to_string(), req.path?.to_string()))
}

fn json_response(code: u16, body: &serde_json::Value) -> String {
    let reason = match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Method Not Allowed",
    };
    let body = body.to_string();
    format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Device and network summary, one object.
fn status_json(snapshot: &NetworkStatus, now_ms: u64) -> serde_json::Value {
    json!({
        "deviceName": snapshot.device_name,
        "deviceMac": snapshot.address,
        "role": snapshot.role,
        "uptime": now_ms / 1000,
        "networkReady": snapshot.ready,
        "connectedPeers": snapshot.peer_count,
        "minPeers": snapshot.min_peers,
        "coordinator": snapshot.coordinator,
    })
}

/// Per-station readings plus the network summary the dashboard shows.
fn sensors_json(
    snapshot: &NetworkStatus,
    table: &crate::stations::StationTable,
    now_ms: u64,
) -> serde_json::Value {
    let sensors: Vec<serde_json::Value> = table
        .iter()
        .map(|station| {
            json!({
                "name": station.name,
                "mac": station.address.to_string(),
                "waterLevel": station.water_level_cm,
                "temperature": station.temperature_c,
                "category": station.alert_level,
                "status": crate::alerts::label(station.alert_level),
                "lastSeenSeconds": now_ms.saturating_sub(station.last_seen_ms) / 1000,
            })
        })
        .collect();
    json!({
        "sensors": sensors,
        "networkReady": snapshot.ready,
        "connectedPeers": snapshot.peer_count,
        "timestamp": now_ms / 1000,
    })
}
