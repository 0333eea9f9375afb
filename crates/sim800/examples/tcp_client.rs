//! Fetch a web page over GPRS.
//!
//! Brings up the bearer, opens a TCP connection, sends an HTTP request,
//! and prints whatever comes back until the server closes the connection
//! or nothing arrives for a while.
//!
//! # Requirements
//!
//! - A SIM800 module with an active SIM, wired to a serial port
//! - The serial port path and APN adjusted for your setup
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=sim800_gprs=debug cargo run -p sim800 --example tcp_client
//! ```

use std::time::Duration;

use sim800::{Error, Sim800Builder};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Adjust these to match your hardware and carrier.
    let serial_port = "/dev/ttyS1";
    let apn = "internet";

    let modem = Sim800Builder::new()
        .serial_port(serial_port)
        .baud_rate(9600)
        .build()
        .await?;

    modem.connect(apn, "", "").await?;
    info!(address = ?modem.local_address().await, "bearer up");

    let conn = modem.dial("tcp", "93.184.216.34:80").await?;
    let request = b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n";
    let sent = conn.write(request).await?;
    info!(sent, "request sent");

    let mut buf = [0u8; 512];
    let mut idle = 0;
    while idle < 50 {
        match conn.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                idle = 0;
                print!("{}", String::from_utf8_lossy(&buf[..n]));
            }
            Err(Error::WouldBlock) => {
                idle += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    println!();

    conn.close().await?;
    modem.disconnect().await?;
    modem.close().await?;
    Ok(())
}
