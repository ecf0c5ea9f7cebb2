//! Two exchanges wired back-to-back over a socket pair.
//!
//! Run with:
//!   cargo run --example duplex-fanout
//!
//! The "host" side sends a few messages; the "client" side fans each one out
//! to two consumers and echoes it back.

use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::time::Duration;

use wirebus_exchange::{Envelope, Exchange};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host_stream, client_stream) = UnixStream::pair()?;
    let host_read = host_stream.try_clone()?;
    let client_read = client_stream.try_clone()?;

    let host = Exchange::new();
    let client = Exchange::new();

    // Client: log every message and echo it back to the host.
    client.register("logger", |envelope: Envelope| {
        eprintln!("client/logger: {}", String::from_utf8_lossy(&envelope.payload));
    });
    let echo_handle = client.clone();
    client.register("echo", move |envelope: Envelope| {
        echo_handle.send(&envelope);
    });
    client.attach_inbound(client_read, || eprintln!("client: inbound closed"));
    client.attach_outbound(client_stream, || eprintln!("client: outbound closed"));

    // Host: collect echoes.
    let (echo_tx, echo_rx) = mpsc::channel();
    host.register("echo-sink", move |envelope: Envelope| {
        let _ = echo_tx.send(envelope.payload);
    });
    host.attach_inbound(host_read, || eprintln!("host: inbound closed"));
    host.attach_outbound(host_stream, || eprintln!("host: outbound closed"));

    for text in ["hello", "from", "wirebus"] {
        host.send(&Envelope::new(text));
        let echoed = echo_rx.recv_timeout(Duration::from_secs(2))?;
        eprintln!("host: echoed back {}", String::from_utf8_lossy(&echoed));
    }

    Ok(())
}
