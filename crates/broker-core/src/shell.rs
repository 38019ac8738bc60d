//! Shell driver: owns one SSH connection to the internal shell gateway.
//!
//! The gateway speaks an in-band control protocol: right after the shell
//! starts, the driver writes a JSON request terminated by `\r` into the
//! session's stdin and the gateway answers with one JSON line, also
//! `\r`-terminated, carrying the assigned session id. Everything after that
//! line is terminal output.

use std::sync::Arc;

use russh::{ChannelMsg, Pty, client, keys};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::{
    chans::DriverEnds,
    error::{BrokerError, BrokerResult},
    unicode::Utf8Carry,
};
use tg_types::{GatewayReq, ServerResp, SshGatewayConfig};

/// Parameters of one shell driver run. The same shape serves NEW, MONITOR
/// and CLOSE actions; only `req.action` differs.
#[derive(Debug, Clone)]
pub struct ShellParams {
    pub gateway: SshGatewayConfig,
    pub req: GatewayReq,
    pub width: u32,
    pub height: u32,
}

/// The gateway is an internal trusted service; any host key is accepted.
struct GatewayHandler;

impl client::Handler for GatewayHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        async { Ok(true) }
    }
}

type ShellChannel = russh::Channel<client::Msg>;

/// Run one shell driver to completion. Handshake outcome goes out on the
/// handshake channel; the terminal result on the error channel.
pub async fn run_shell_driver(params: ShellParams, ends: DriverEnds) {
    let DriverEnds {
        rin,
        window_rx,
        away_rx,
        handshake_tx,
        out_tx,
        err_tx,
    } = ends;

    let mut channel = match open_gateway_session(&params).await {
        Ok(channel) => channel,
        Err(err) => {
            let _ = handshake_tx.send(Err(err));
            return;
        }
    };

    let (resp, leftover) = match handshake(&mut channel, &params.req).await {
        Ok(parts) => parts,
        Err(err) => {
            let _ = channel.close().await;
            let _ = handshake_tx.send(Err(err));
            return;
        }
    };
    debug!(session_id = %resp.session_id, code = resp.code, "gateway handshake reply");

    if handshake_tx.send(Ok(resp)).is_err() {
        // The HTTP caller abandoned the request before the rendezvous.
        let _ = channel.close().await;
        return;
    }

    let result = pump(channel, leftover, rin, window_rx, away_rx, &out_tx).await;
    let _ = err_tx.send(result.err()).await;
}

async fn open_gateway_session(params: &ShellParams) -> BrokerResult<ShellChannel> {
    let gateway = &params.gateway;
    let cfg = Arc::new(client::Config::default());
    let mut handle = client::connect(cfg, (gateway.host.as_str(), gateway.port), GatewayHandler).await?;

    let auth = handle
        .authenticate_password(gateway.account.clone(), gateway.password.clone())
        .await?;
    if !matches!(auth, client::AuthResult::Success) {
        return Err(BrokerError::handshake("gateway authentication rejected"));
    }

    let channel = handle.channel_open_session().await?;
    let modes = [
        (Pty::ECHO, 0),
        (Pty::TTY_OP_ISPEED, 14400),
        (Pty::TTY_OP_OSPEED, 14400),
    ];
    channel
        .request_pty(true, "xterm", params.width, params.height, 0, 0, &modes)
        .await?;
    channel.request_shell(true).await?;
    Ok(channel)
}

/// Write the JSON request, then read exactly up to the first `\r` and parse
/// the gateway's reply. Bytes past the terminator are terminal output and
/// are handed back to the pump.
async fn handshake(channel: &mut ShellChannel, req: &GatewayReq) -> BrokerResult<(ServerResp, Vec<u8>)> {
    let mut frame = serde_json::to_vec(req)?;
    frame.push(b'\r');
    channel.data(&frame[..]).await?;

    let mut line: Vec<u8> = Vec::new();
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. } => {
                line.extend_from_slice(&data);
                if let Some(pos) = line.iter().position(|b| *b == b'\r') {
                    let resp: ServerResp = serde_json::from_slice(&line[..pos])?;
                    return Ok((resp, line[pos + 1..].to_vec()));
                }
            }
            ChannelMsg::Eof | ChannelMsg::Close | ChannelMsg::ExitStatus { .. } => break,
            _ => {}
        }
    }
    Err(BrokerError::handshake("gateway closed before handshake reply"))
}

async fn pump(
    mut channel: ShellChannel,
    leftover: Vec<u8>,
    mut rin: tokio::io::DuplexStream,
    mut window_rx: tokio::sync::mpsc::Receiver<String>,
    mut away_rx: tokio::sync::watch::Receiver<bool>,
    out_tx: &tokio::sync::mpsc::Sender<Vec<u8>>,
) -> BrokerResult<()> {
    let mut carry = Utf8Carry::new();
    if !forward_output(&mut carry, &leftover, out_tx).await {
        return Ok(());
    }

    let mut stdin_buf = [0u8; 4096];
    let mut window_open = true;
    loop {
        tokio::select! {
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                        if !forward_output(&mut carry, &data, out_tx).await {
                            return Ok(());
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!(exit_status, "gateway shell exited");
                        return Ok(());
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(()),
                    _ => {}
                }
            }
            read = rin.read(&mut stdin_buf) => {
                match read {
                    Ok(0) | Err(_) => {
                        let _ = channel.eof().await;
                        return Ok(());
                    }
                    Ok(n) => channel.data(&stdin_buf[..n]).await?,
                }
            }
            hint = window_rx.recv(), if window_open => {
                match hint {
                    Some(hint) => {
                        if let Some((w, h)) = parse_window_hint(&hint)
                            && let Err(err) = channel.window_change(w, h, 0, 0).await
                        {
                            warn!(%err, "window change request failed");
                        }
                    }
                    None => window_open = false,
                }
            }
            res = away_rx.changed() => {
                if res.is_err() || *away_rx.borrow() {
                    let _ = channel.close().await;
                    return Ok(());
                }
            }
        }
    }
}

/// Rune-chunk `data` and push it downstream. Returns false once the
/// multiplexer side is gone.
async fn forward_output(carry: &mut Utf8Carry, data: &[u8], out_tx: &tokio::sync::mpsc::Sender<Vec<u8>>) -> bool {
    let chunk = carry.push(data);
    if chunk.is_empty() {
        return true;
    }
    out_tx.send(chunk).await.is_ok()
}

/// Parse a `"w,h[,dpi]"` hint. Hints with a non-positive dimension are
/// dropped.
pub fn parse_window_hint(hint: &str) -> Option<(u32, u32)> {
    let mut parts = hint.split(',');
    let w: i64 = parts.next()?.trim().parse().ok()?;
    let h: i64 = parts.next()?.trim().parse().ok()?;
    if w <= 0 || h <= 0 {
        return None;
    }
    Some((w as u32, h as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_hint_parses_first_two_integers() {
        assert_eq!(parse_window_hint("120,40"), Some((120, 40)));
        assert_eq!(parse_window_hint("120,40,96"), Some((120, 40)));
    }

    #[test]
    fn window_hint_rejects_non_positive_dimensions() {
        assert_eq!(parse_window_hint("0,40"), None);
        assert_eq!(parse_window_hint("120,-1"), None);
    }

    #[test]
    fn window_hint_rejects_garbage() {
        assert_eq!(parse_window_hint(""), None);
        assert_eq!(parse_window_hint("120"), None);
        assert_eq!(parse_window_hint("a,b"), None);
    }
}
