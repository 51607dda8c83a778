//! TCP accept loop (spec §1: "TCP listener/accept loop" is consumed as an
//! out-of-scope collaborator by the pipeline, but a default implementation
//! is still provided here so the crate runs standalone, the way the
//! teacher's `accept_loop` shipped a default alongside its handler trait).
//!
//! Grounded on the teacher's non-blocking `TcpListener::accept` poll loop;
//! the per-connection thread-per-client model is replaced by handing each
//! accepted socket to the [`Scheduler`](crate::pipeline::scheduler::Scheduler)
//! as an [`RTSPConnection`] task (spec §5/§9).

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::pipeline::scheduler::Scheduler;
use crate::pipeline::{RTSPConnection, Services};

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval so
/// that [`crate::server::Server::stop`] can terminate it promptly. Each
/// accepted connection becomes a scheduler task; this loop itself never
/// blocks on a client.
pub fn accept_loop(listener: TcpListener, services: Services, scheduler: Arc<Scheduler>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => match RTSPConnection::new(stream, peer_addr, services.clone()) {
                Ok(connection) => {
                    tracing::info!(%peer_addr, "client connected");
                    scheduler.spawn(Box::new(connection));
                }
                Err(e) => tracing::warn!(%peer_addr, error = %e, "failed to initialize connection"),
            },
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}
