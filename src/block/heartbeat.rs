//! Heartbeat sender: every `interval`, connect to the coordinator and
//! send `heartbeat <self>`, with a per-attempt timeout and a
//! retry-with-backoff wrapper around the whole cycle. After five
//! consecutive heartbeat cycles fail outright, send `register` instead,
//! so a coordinator restart (or a long network partition) self-heals
//! without operator intervention. Grounded on
//! `datanode.py::send_heartbeat`/`register_with_namenode`'s
//! `retry_with_backoff(max_retries=3, base_delay=1.0, max_delay=10.0)`
//! wrapped around a 5s-timeout socket attempt.
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 3;
const BASE_DELAY_SECS: f64 = 1.0;
const MAX_DELAY_SECS: f64 = 10.0;

pub async fn run(self_addr: String, coordinator_addr: SocketAddr, interval: Duration) {
	let mut consecutive_failures: u32 = 0;

	loop {
		let result = if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
			let outcome = send_with_retry(coordinator_addr, format!("register {}", self_addr)).await;
			if outcome.is_ok() {
				info!("Re-registered with coordinator after repeated heartbeat failures");
			}
			outcome
		} else {
			send_with_retry(coordinator_addr, format!("heartbeat {}", self_addr)).await
		};

		match result {
			Ok(_) => consecutive_failures = 0,
			Err(e) => {
				consecutive_failures += 1;
				warn!(
					"Heartbeat failed ({}/{}): {}",
					consecutive_failures, MAX_CONSECUTIVE_FAILURES, e
				);
			}
		}

		tokio::time::sleep(interval).await;
	}
}

/// Up to `MAX_RETRIES` attempts, each bounded by `PER_ATTEMPT_TIMEOUT`,
/// with exponential backoff between attempts capped at `MAX_DELAY_SECS`.
async fn send_with_retry(addr: SocketAddr, message: String) -> std::io::Result<String> {
	let mut last_err = None;
	for attempt in 0..MAX_RETRIES {
		match tokio::time::timeout(PER_ATTEMPT_TIMEOUT, send_request(addr, &message)).await {
			Ok(Ok(response)) => return Ok(response),
			Ok(Err(e)) => last_err = Some(e),
			Err(_) => last_err = Some(std::io::Error::new(std::io::ErrorKind::TimedOut, "heartbeat attempt timed out")),
		}

		if attempt + 1 < MAX_RETRIES {
			let delay = (BASE_DELAY_SECS * 2f64.powi(attempt as i32)).min(MAX_DELAY_SECS);
			tokio::time::sleep(Duration::from_secs_f64(delay)).await;
		}
	}
	Err(last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "retry loop exited with no attempts")))
}

async fn send_request(addr: SocketAddr, message: &str) -> std::io::Result<String> {
	let mut stream = TcpStream::connect(addr).await?;
	stream.write_all(message.as_bytes()).await?;
	stream.shutdown().await.ok();

	let mut buf = Vec::new();
	stream.read_to_end(&mut buf).await?;
	Ok(String::from_utf8_lossy(&buf).into_owned())
}
