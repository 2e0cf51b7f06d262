//! Two H5 transports negotiating over an in-process byte pipe.
//!
//! Run with: cargo run --example loopback

use bytes::Bytes;
use h5_tokio::{
    H5Config, H5Transport, LogSeverity, Transport, TransportCallbacks, TransportFuture,
};
use std::sync::{Arc, Mutex, Weak};

/// Minimal in-memory serial port: bytes written to one end come out of the
/// peer's data callback.
struct PipePort {
    name: &'static str,
    peer: Mutex<Weak<PipePort>>,
    callbacks: Mutex<Option<TransportCallbacks>>,
}

impl PipePort {
    fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self {
            name: "port-a",
            peer: Mutex::new(Weak::new()),
            callbacks: Mutex::new(None),
        });
        let b = Arc::new(Self {
            name: "port-b",
            peer: Mutex::new(Weak::new()),
            callbacks: Mutex::new(None),
        });
        *a.peer.lock().unwrap() = Arc::downgrade(&b);
        *b.peer.lock().unwrap() = Arc::downgrade(&a);
        (a, b)
    }
}

impl Transport for PipePort {
    fn open(&self, callbacks: TransportCallbacks) -> TransportFuture<'_> {
        Box::pin(async move {
            println!("[{}] open", self.name);
            *self.callbacks.lock().unwrap() = Some(callbacks);
            Ok(())
        })
    }

    fn close(&self) -> TransportFuture<'_> {
        Box::pin(async move {
            println!("[{}] close", self.name);
            *self.callbacks.lock().unwrap() = None;
            Ok(())
        })
    }

    fn send(&self, data: Bytes) -> TransportFuture<'_> {
        Box::pin(async move {
            if let Some(peer) = self.peer.lock().unwrap().upgrade() {
                let cb = peer
                    .callbacks
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|callbacks| callbacks.data.clone());
                if let Some(cb) = cb {
                    cb(&data);
                }
            }
            Ok(())
        })
    }
}

fn callbacks(name: &'static str) -> TransportCallbacks {
    TransportCallbacks::new(
        Arc::new(move |code, message| println!("[{name}] status {code}: {message}")),
        Arc::new(move |bytes| println!("[{name}] received {bytes:02x?}")),
        Arc::new(move |severity, message| {
            if severity >= LogSeverity::Debug {
                println!("[{name}] {message}");
            }
        }),
    )
}

#[tokio::main]
async fn main() -> h5_tokio::Result<()> {
    let (port_a, port_b) = PipePort::pair();

    let a = H5Transport::new(port_a, H5Config::new())?;
    let b = H5Transport::new(port_b, H5Config::new())?;

    let (opened_a, opened_b) = tokio::join!(a.open(callbacks("h5-a")), b.open(callbacks("h5-b")));
    opened_a?;
    opened_b?;

    println!("both links active: a={} b={}", a.state(), b.state());

    a.send(Bytes::from_static(b"hello from a")).await?;
    b.send(Bytes::from_static(b"hello from b")).await?;

    a.close().await?;
    b.close().await?;

    println!("done: a={} b={}", a.state(), b.state());
    Ok(())
}
