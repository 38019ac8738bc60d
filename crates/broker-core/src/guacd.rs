//! guacd tunnel client and the remote-desktop driver.
//!
//! The tunnel speaks length-prefixed instructions, `LEN.VALUE,...;` with
//! lengths counted in Unicode characters. The broker only understands the
//! connect handshake; after `ready` it relays instructions byte-for-byte in
//! both directions.

use chrono::{Local, Utc};
use sqlx::SqlitePool;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::{debug, warn};

use crate::{
    chans::DriverEnds,
    error::{BrokerError, BrokerResult},
};
use tg_types::{
    Account, Asset, Gateway, GuacdConfig, ServerResp, SessionRecord, SessionStatus, SessionType,
};

/// One guacd instruction, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: String,
    pub args: Vec<String>,
}

impl Instruction {
    pub fn new(opcode: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args,
        }
    }

    /// Encode to the wire form. Lengths count characters, not bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        for (i, element) in std::iter::once(&self.opcode).chain(self.args.iter()).enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&element.chars().count().to_string());
            out.push('.');
            out.push_str(element);
        }
        out.push(';');
        out.into_bytes()
    }

    /// Decode one complete raw instruction (as returned by
    /// [`TunnelReader::read_one`]).
    pub fn parse(raw: &[u8]) -> BrokerResult<Self> {
        let text = std::str::from_utf8(raw).map_err(|_| BrokerError::tunnel("instruction is not UTF-8"))?;
        let mut chars = text.chars().peekable();
        let mut elements: Vec<String> = Vec::new();

        loop {
            let mut len: usize = 0;
            loop {
                match chars.next() {
                    Some(c @ '0'..='9') => len = len * 10 + (c as usize - '0' as usize),
                    Some('.') => break,
                    _ => return Err(BrokerError::tunnel("malformed element length")),
                }
            }
            let mut value = String::new();
            for _ in 0..len {
                value.push(chars.next().ok_or_else(|| BrokerError::tunnel("truncated element value"))?);
            }
            elements.push(value);
            match chars.next() {
                Some(',') => continue,
                Some(';') => break,
                _ => return Err(BrokerError::tunnel("missing element terminator")),
            }
        }

        let mut iter = elements.into_iter();
        let opcode = iter.next().ok_or_else(|| BrokerError::tunnel("empty instruction"))?;
        Ok(Self {
            opcode,
            args: iter.collect(),
        })
    }
}

fn utf8_len(first: u8) -> BrokerResult<usize> {
    match first {
        0x00..=0x7f => Ok(1),
        0xc0..=0xdf => Ok(2),
        0xe0..=0xef => Ok(3),
        0xf0..=0xf7 => Ok(4),
        _ => Err(BrokerError::tunnel("invalid UTF-8 leading byte")),
    }
}

/// Streaming reader that yields one raw instruction at a time. Values are
/// length-prefixed, so `;` inside a value never terminates early.
pub struct TunnelReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> TunnelReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Read one full instruction and return its raw bytes, terminator
    /// included.
    pub async fn read_one(&mut self) -> BrokerResult<Vec<u8>> {
        let mut raw = Vec::new();
        loop {
            // element length
            let mut len: usize = 0;
            loop {
                let b = self.inner.read_u8().await?;
                raw.push(b);
                match b {
                    b'0'..=b'9' => len = len * 10 + usize::from(b - b'0'),
                    b'.' => break,
                    _ => return Err(BrokerError::tunnel("malformed instruction length")),
                }
            }
            // element value: `len` characters
            for _ in 0..len {
                let b = self.inner.read_u8().await?;
                raw.push(b);
                for _ in 1..utf8_len(b)? {
                    raw.push(self.inner.read_u8().await?);
                }
            }
            // separator or terminator
            let b = self.inner.read_u8().await?;
            raw.push(b);
            match b {
                b',' => continue,
                b';' => return Ok(raw),
                _ => return Err(BrokerError::tunnel("malformed instruction separator")),
            }
        }
    }
}

/// Connection target resolved from the directory.
#[derive(Debug, Clone)]
pub struct TunnelParams {
    pub protocol: String,
    pub hostname: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub gateway: Option<Gateway>,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl TunnelParams {
    /// Build connection parameters from directory records. The protocol may
    /// carry an explicit port after `:`.
    pub fn from_target(
        protocol: &str,
        asset: &Asset,
        account: &Account,
        gateway: Option<Gateway>,
        width: u32,
        height: u32,
        dpi: u32,
    ) -> Self {
        let mut parts = protocol.splitn(2, ':');
        let family = parts.next().unwrap_or(protocol).to_string();
        let port = parts
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| default_port(&family).to_string());
        Self {
            protocol: family,
            hostname: asset.ip.clone(),
            port,
            username: account.account.clone(),
            password: account.password.clone(),
            gateway,
            width,
            height,
            dpi,
        }
    }

    /// Value for a connection parameter requested by guacd's `args`
    /// instruction. Unknown parameters are sent empty.
    fn value_for(&self, name: &str) -> String {
        match name {
            "hostname" => self.hostname.clone(),
            "port" => self.port.clone(),
            "username" => self.username.clone(),
            "password" => self.password.clone(),
            "width" => self.width.to_string(),
            "height" => self.height.to_string(),
            "dpi" => self.dpi.to_string(),
            "gateway-hostname" => self.gateway.as_ref().map(|g| g.host.clone()).unwrap_or_default(),
            "gateway-port" => self
                .gateway
                .as_ref()
                .map(|g| g.port.to_string())
                .unwrap_or_default(),
            "gateway-username" => self.gateway.as_ref().map(|g| g.account.clone()).unwrap_or_default(),
            "gateway-password" => self.gateway.as_ref().map(|g| g.password.clone()).unwrap_or_default(),
            _ => String::new(),
        }
    }
}

pub fn default_port(family: &str) -> u16 {
    match family {
        "rdp" => 3389,
        _ => 5900,
    }
}

/// An established tunnel whose uuid doubles as the session id.
pub struct GuacdTunnel {
    pub uuid: String,
    reader: TunnelReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl GuacdTunnel {
    /// Connect to guacd and run the connect handshake:
    /// `select` → `args` → `size`/`audio`/`video`/`image` → `connect` →
    /// `ready`, whose first argument is the tunnel uuid.
    pub async fn connect(cfg: &GuacdConfig, params: &TunnelParams) -> BrokerResult<Self> {
        let stream = TcpStream::connect((cfg.host.as_str(), cfg.port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = TunnelReader::new(read_half);
        let mut writer = write_half;

        send(&mut writer, &Instruction::new("select", vec![params.protocol.clone()])).await?;

        let args = Instruction::parse(&reader.read_one().await?)?;
        if args.opcode != "args" {
            return Err(BrokerError::tunnel(format!("expected args, got {}", args.opcode)));
        }

        send(
            &mut writer,
            &Instruction::new(
                "size",
                vec![
                    params.width.to_string(),
                    params.height.to_string(),
                    params.dpi.to_string(),
                ],
            ),
        )
        .await?;
        send(&mut writer, &Instruction::new("audio", vec![])).await?;
        send(&mut writer, &Instruction::new("video", vec![])).await?;
        send(&mut writer, &Instruction::new("image", vec![])).await?;

        let mut connect_args = Vec::with_capacity(args.args.len());
        for (i, name) in args.args.iter().enumerate() {
            // Protocol 1.1.0+ leads with a VERSION_* pseudo-argument that is
            // echoed back verbatim.
            if i == 0 && name.starts_with("VERSION") {
                connect_args.push(name.clone());
            } else {
                connect_args.push(params.value_for(name));
            }
        }
        send(&mut writer, &Instruction::new("connect", connect_args)).await?;

        let ready = Instruction::parse(&reader.read_one().await?)?;
        if ready.opcode != "ready" {
            return Err(BrokerError::tunnel(format!("tunnel refused: {}", ready.opcode)));
        }
        let uuid = ready
            .args
            .first()
            .cloned()
            .ok_or_else(|| BrokerError::tunnel("ready carried no uuid"))?;

        Ok(Self { uuid, reader, writer })
    }

    fn into_parts(self) -> (String, TunnelReader<OwnedReadHalf>, OwnedWriteHalf) {
        (self.uuid, self.reader, self.writer)
    }
}

async fn send(writer: &mut OwnedWriteHalf, instruction: &Instruction) -> BrokerResult<()> {
    writer.write_all(&instruction.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Parameters of one desktop driver run.
#[derive(Debug, Clone)]
pub struct DesktopParams {
    pub cfg: GuacdConfig,
    pub protocol: String,
    pub asset_id: i64,
    pub account_id: i64,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub uid: i64,
    pub user_name: String,
    pub client_ip: String,
}

/// Run one desktop driver to completion: resolve the target, gate on the
/// access window, open the tunnel, persist the session record, then relay
/// instructions until the tunnel or the client side goes away.
pub async fn run_desktop_driver(pool: SqlitePool, params: DesktopParams, ends: DriverEnds) {
    let DriverEnds {
        mut rin,
        window_rx: _,
        mut away_rx,
        handshake_tx,
        out_tx,
        err_tx,
    } = ends;

    let (tunnel, record) = match connect_target(&pool, &params).await {
        Ok(parts) => parts,
        Err(err) => {
            let _ = handshake_tx.send(Err(err));
            return;
        }
    };

    let resp = ServerResp {
        code: 0,
        message: String::new(),
        session_id: tunnel.uuid.clone(),
        uid: params.uid,
        user_name: params.user_name.clone(),
    };
    if handshake_tx.send(Ok(resp)).is_err() {
        return;
    }

    let (uuid, mut reader, mut writer) = tunnel.into_parts();
    debug!(session_id = %uuid, protocol = %record.protocol, "desktop tunnel established");

    // Client frames arrive whole on the stdin pipe and are already
    // tunnel-framed; relay them verbatim.
    let relay = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut rin, &mut writer).await;
    });

    let result = loop {
        tokio::select! {
            read = reader.read_one() => {
                match read {
                    Ok(instruction) => {
                        if out_tx.send(instruction).await.is_err() {
                            break Ok(());
                        }
                    }
                    Err(err) => {
                        debug!(%err, session_id = %uuid, "tunnel read ended");
                        break Err(err);
                    }
                }
            }
            res = away_rx.changed() => {
                if res.is_err() || *away_rx.borrow() {
                    break Ok(());
                }
            }
        }
    };
    relay.abort();

    if let Err(err) = state_store::mark_session_offline(&pool, &uuid, Utc::now()).await {
        warn!(%err, session_id = %uuid, "failed to mark desktop session offline");
    }
    let _ = err_tx.send(result.err()).await;
}

async fn connect_target(pool: &SqlitePool, params: &DesktopParams) -> BrokerResult<(GuacdTunnel, SessionRecord)> {
    let asset = state_store::fetch_asset_by_id(pool, params.asset_id)
        .await?
        .ok_or(BrokerError::NotFound {
            entity: "asset",
            id: params.asset_id,
        })?;

    if let Some(auth) = &asset.access_auth
        && !auth.permits(Local::now())
    {
        return Err(BrokerError::InvalidAccessTime);
    }

    let account = state_store::fetch_account_by_id(pool, params.account_id)
        .await?
        .ok_or(BrokerError::NotFound {
            entity: "account",
            id: params.account_id,
        })?;

    let gateway = if asset.gateway_id != 0 {
        Some(
            state_store::fetch_gateway_by_id(pool, asset.gateway_id)
                .await?
                .ok_or(BrokerError::NotFound {
                    entity: "gateway",
                    id: asset.gateway_id,
                })?,
        )
    } else {
        None
    };

    let tunnel_params = TunnelParams::from_target(
        &params.protocol,
        &asset,
        &account,
        gateway.clone(),
        params.width,
        params.height,
        params.dpi,
    );
    let tunnel = GuacdTunnel::connect(&params.cfg, &tunnel_params).await?;

    let record = SessionRecord {
        id: 0,
        session_type: SessionType::Web,
        session_id: tunnel.uuid.clone(),
        uid: params.uid,
        user_name: params.user_name.clone(),
        asset_id: asset.id,
        asset_info: format!("{}({})", asset.name, asset.ip),
        account_id: account.id,
        account_info: format!("{}({})", account.name, account.account),
        gateway_id: gateway.as_ref().map(|g| g.id).unwrap_or_default(),
        gateway_info: gateway.as_ref().map(|g| format!("{}:{}", g.host, g.port)).unwrap_or_default(),
        client_ip: params.client_ip.clone(),
        protocol: params.protocol.clone(),
        status: SessionStatus::Online,
        created_at: Utc::now(),
        closed_at: None,
        cmd_count: 0,
        duration: 0,
    };
    state_store::upsert_session(pool, &record).await?;

    Ok((tunnel, record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_wire_format() {
        let instruction = Instruction::new("select", vec!["vnc".to_string()]);
        assert_eq!(instruction.encode(), b"6.select,3.vnc;");

        let empty_args = Instruction::new("audio", vec![]);
        assert_eq!(empty_args.encode(), b"5.audio;");
    }

    #[test]
    fn parse_round_trips() {
        let original = Instruction::new("connect", vec!["host".into(), "".into(), "p;ss,word".into()]);
        let parsed = Instruction::parse(&original.encode()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        let original = Instruction::new("name", vec!["终端".to_string()]);
        let encoded = original.encode();
        assert_eq!(std::str::from_utf8(&encoded).unwrap(), "4.name,2.终端;");
        assert_eq!(Instruction::parse(&encoded).unwrap(), original);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(Instruction::parse(b"x.select;").is_err());
        assert!(Instruction::parse(b"6.select").is_err());
        assert!(Instruction::parse(b"9.select;").is_err());
    }

    #[tokio::test]
    async fn reader_splits_instruction_stream() {
        let stream: &[u8] = b"4.sync,8.12345678;3.img,1.2;";
        let mut reader = TunnelReader::new(stream);

        assert_eq!(reader.read_one().await.unwrap(), b"4.sync,8.12345678;");
        assert_eq!(reader.read_one().await.unwrap(), b"3.img,1.2;");
        assert!(reader.read_one().await.is_err());
    }

    #[tokio::test]
    async fn reader_keeps_semicolons_inside_values() {
        let stream: &[u8] = b"3.arg,5.ab;cd;";
        let raw = TunnelReader::new(stream).read_one().await.unwrap();
        let parsed = Instruction::parse(&raw).unwrap();
        assert_eq!(parsed.args, vec!["ab;cd".to_string()]);
    }

    #[test]
    fn tunnel_params_resolve_port_and_gateway() {
        let asset = Asset {
            id: 1,
            name: "web-1".into(),
            ip: "10.0.0.5".into(),
            gateway_id: 3,
            access_auth: None,
        };
        let account = Account {
            id: 2,
            name: "root".into(),
            account: "root".into(),
            password: "secret".into(),
        };
        let gateway = Gateway {
            id: 3,
            name: "jump".into(),
            host: "jump.internal".into(),
            port: 443,
            account: "svc".into(),
            password: "gw".into(),
        };

        let params = TunnelParams::from_target("rdp:3390", &asset, &account, Some(gateway), 1280, 720, 96);
        assert_eq!(params.protocol, "rdp");
        assert_eq!(params.port, "3390");
        assert_eq!(params.value_for("hostname"), "10.0.0.5");
        assert_eq!(params.value_for("gateway-hostname"), "jump.internal");
        assert_eq!(params.value_for("gateway-port"), "443");
        assert_eq!(params.value_for("no-such-parameter"), "");

        let params = TunnelParams::from_target("vnc", &asset, &account, None, 1280, 720, 96);
        assert_eq!(params.port, "5900");
        assert_eq!(params.value_for("gateway-hostname"), "");
    }
}
