//! The per-session channel bundle.
//!
//! Every participant of a session talks through this bundle and nothing
//! else: the multiplexer writes keystrokes into the stdin pipe and drains
//! backend output, the driver does the reverse, and the admin close path
//! only ever touches the close channel. Receiver ends are split out at
//! construction so each one has exactly one owner.

use std::time::Duration;

use tokio::{
    io::DuplexStream,
    sync::{mpsc, oneshot, watch},
    time::timeout,
};

use crate::error::BrokerError;
use tg_types::ServerResp;

/// Close-channel sends are guarded so the admin path never blocks on a
/// session whose multiplexer is already gone.
pub const CLOSE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

const PIPE_CAPACITY: usize = 4096;
const CHAN_CAPACITY: usize = 64;

/// Outcome of a driver's connect + handshake, resolved exactly once.
pub type HandshakeRx = oneshot::Receiver<Result<ServerResp, BrokerError>>;

/// Terminal driver outcome; `None` is a clean end-of-session.
pub type DriverExit = Option<BrokerError>;

/// Shared sender ends, held by the live session while it is ONLINE.
pub struct SessionChans {
    /// Raw client-to-broker WebSocket text frames, in arrival order.
    pub in_tx: mpsc::Sender<Vec<u8>>,
    /// `"w,h[,dpi]"` resize hints for the shell driver.
    pub window_tx: mpsc::Sender<String>,
    close_tx: mpsc::Sender<String>,
}

impl SessionChans {
    /// Deliver the closing admin's username to the multiplexer. Returns
    /// false when nobody received it within [`CLOSE_SEND_TIMEOUT`].
    pub async fn send_close(&self, closer: String) -> bool {
        matches!(timeout(CLOSE_SEND_TIMEOUT, self.close_tx.send(closer)).await, Ok(Ok(())))
    }
}

/// Receiver ends moved into the backend driver task.
pub struct DriverEnds {
    /// Read end of the stdin byte pipe.
    pub rin: DuplexStream,
    pub window_rx: mpsc::Receiver<String>,
    /// Flipped once by the multiplexer's exit path; a closed sender counts
    /// as gone too.
    pub away_rx: watch::Receiver<bool>,
    pub handshake_tx: oneshot::Sender<Result<ServerResp, BrokerError>>,
    pub out_tx: mpsc::Sender<Vec<u8>>,
    pub err_tx: mpsc::Sender<DriverExit>,
}

/// Receiver ends parked on the live session and taken exactly once by the
/// client endpoint when it attaches.
pub struct MuxEnds {
    /// Write end of the stdin byte pipe.
    pub win: DuplexStream,
    pub in_rx: mpsc::Receiver<Vec<u8>>,
    pub out_rx: mpsc::Receiver<Vec<u8>>,
    pub err_rx: mpsc::Receiver<DriverExit>,
    pub close_rx: mpsc::Receiver<String>,
    away_tx: watch::Sender<bool>,
}

impl MuxEnds {
    /// Signal the driver that the client side is gone. Idempotent.
    pub fn leave(&self) {
        let _ = self.away_tx.send(true);
    }
}

/// Allocate the bundle for one session and split it into its participants'
/// ends.
pub fn make_chans() -> (SessionChans, DriverEnds, MuxEnds, HandshakeRx) {
    let (win, rin) = tokio::io::duplex(PIPE_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel(CHAN_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel(CHAN_CAPACITY);
    let (window_tx, window_rx) = mpsc::channel(CHAN_CAPACITY);
    let (close_tx, close_rx) = mpsc::channel(1);
    let (err_tx, err_rx) = mpsc::channel(1);
    let (handshake_tx, handshake_rx) = oneshot::channel();
    let (away_tx, away_rx) = watch::channel(false);

    let chans = SessionChans {
        in_tx,
        window_tx,
        close_tx,
    };
    let driver = DriverEnds {
        rin,
        window_rx,
        away_rx,
        handshake_tx,
        out_tx,
        err_tx,
    };
    let mux = MuxEnds {
        win,
        in_rx,
        out_rx,
        err_rx,
        close_rx,
        away_tx,
    };
    (chans, driver, mux, handshake_rx)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn close_send_completes_within_a_second_without_receiver() {
        let (chans, driver, mux, _handshake_rx) = make_chans();
        // Fill the capacity-1 close channel, then drop every receiver.
        assert!(chans.send_close("admin".into()).await);
        drop(mux);
        drop(driver);

        let started = Instant::now();
        assert!(!chans.send_close("admin".into()).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn stdin_pipe_delivers_in_order() {
        let (_chans, mut driver, mut mux, _handshake_rx) = make_chans();
        mux.win.write_all(b"ls -la\r").await.unwrap();

        let mut buf = [0u8; 16];
        let n = driver.rin.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ls -la\r");
    }

    #[tokio::test]
    async fn leave_wakes_the_driver_side() {
        let (_chans, mut driver, mux, _handshake_rx) = make_chans();
        let waiter = tokio::spawn(async move {
            driver.away_rx.changed().await.unwrap();
            *driver.away_rx.borrow()
        });
        mux.leave();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn dropping_mux_ends_reads_as_away() {
        let (_chans, mut driver, mux, _handshake_rx) = make_chans();
        drop(mux);
        assert!(driver.away_rx.changed().await.is_err());
    }
}
