//! End-to-end tests of the HTTP server backed by a fixture file.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const FIXTURE: &str = r#"
version: "1.0"
domains:
  - name: web01
    devices:
      - device: vda
        read_bytes: 4096
        write_bytes: 8192
      - device: vdb
        read_bytes: 1
  - name: broken
    fetch_error: "monitor not responding"
"#;

/// Kills the server when the test ends, even on assertion failure.
struct Server {
    child: Child,
    port: u16,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("Failed to find a free port")
}

fn fixture_file() -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create fixture file");
    file.write_all(FIXTURE.as_bytes())
        .expect("Failed to write fixture");
    file
}

fn start_server(fixture: &NamedTempFile, extra: &[&str]) -> Server {
    let port = free_port();
    let port_arg = port.to_string();
    let child = Command::new(env!("CARGO_BIN_EXE_herakles-qemu-exporter"))
        .args([
            "--no-config",
            "--log-level",
            "off",
            "--bind",
            "127.0.0.1",
            "--port",
            &port_arg,
            "--test-data-file",
            fixture.path().to_str().unwrap(),
        ])
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start server");

    let server = Server { child, port };

    let deadline = Instant::now() + Duration::from_secs(10);
    while TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(Instant::now() < deadline, "server did not start listening");
        thread::sleep(Duration::from_millis(50));
    }
    server
}

/// Sends a GET request and returns `(status, raw response)`.
fn get(server: &Server, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(("127.0.0.1", server.port)).expect("Failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("Failed to set timeout");
    write!(
        stream,
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    )
    .expect("Failed to send request");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .expect("Failed to read response");

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("Malformed status line");
    (status, response)
}

#[test]
fn test_metrics_and_health_endpoints() {
    let fixture = fixture_file();
    let server = start_server(&fixture, &[]);

    let (status, body) = get(&server, "/health");
    assert_eq!(status, 503, "{}", body);
    assert!(body.contains("No scrape yet"));

    let (status, body) = get(&server, "/metrics");
    assert_eq!(status, 200, "{}", body);
    assert!(body.contains("qemu_domains 2"), "{}", body);
    assert!(body.contains("qemu_domains_block_read_bytes_total{"));
    assert!(body.contains("device=\"vdb\""));
    assert!(!body.contains("domain=\"broken\""));
    assert!(body.contains("qemu_exporter_last_scrape_success 1"));
    assert!(body.contains("qemu_exporter_domain_fetch_errors_total 1"));
    assert!(!body.contains("qemu_exporter_collect_error"));

    let (status, body) = get(&server, "/health");
    assert_eq!(status, 200, "{}", body);
    assert!(body.contains("COLLECTION CYCLES"));
    assert!(body.contains("number of done cycles: 1"));
}

#[test]
fn test_root_redirects_to_metrics_path() {
    let fixture = fixture_file();
    let server = start_server(&fixture, &["--metrics-path", "/qemu"]);

    let (status, body) = get(&server, "/");
    assert_eq!(status, 308, "{}", body);
    assert!(body.to_lowercase().contains("location: /qemu"), "{}", body);

    let (status, body) = get(&server, "/qemu");
    assert_eq!(status, 200, "{}", body);
    assert!(body.contains("qemu_domains 2"));

    let (status, _) = get(&server, "/metrics");
    assert_eq!(status, 404);
}

#[test]
fn test_health_can_be_disabled() {
    let fixture = fixture_file();
    let server = start_server(&fixture, &["--disable-health"]);

    let (status, _) = get(&server, "/health");
    assert_eq!(status, 404);

    let (status, _) = get(&server, "/metrics");
    assert_eq!(status, 200);
}
