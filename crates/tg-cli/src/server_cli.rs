use std::path::PathBuf;

use clap::Parser;
use tg_types::{BrokerConfig, GuacdConfig, SshGatewayConfig};

#[derive(Debug, Parser)]
#[command(name = "tg-server", about = "Bastion session broker")]
pub struct ServerArgs {
    /// Address to bind the HTTP listener to
    #[arg(long, env = "TG_BIND", default_value = "0.0.0.0")]
    pub bind: String,
    /// Port to serve on
    #[arg(short = 'P', long, env = "TG_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Hostname of the internal SSH shell gateway
    #[arg(long = "ssh-gateway-host", env = "TG_SSH_GATEWAY_HOST", default_value = "127.0.0.1")]
    pub ssh_gateway_host: String,
    /// Port of the shell gateway
    #[arg(long = "ssh-gateway-port", env = "TG_SSH_GATEWAY_PORT", default_value_t = 2222)]
    pub ssh_gateway_port: u16,
    /// Service account used to log in to the shell gateway
    #[arg(long = "ssh-gateway-account", env = "TG_SSH_GATEWAY_ACCOUNT", default_value = "termgate")]
    pub ssh_gateway_account: String,
    /// Password for the service account
    #[arg(long = "ssh-gateway-password", env = "TG_SSH_GATEWAY_PASSWORD", default_value = "")]
    pub ssh_gateway_password: String,

    /// Hostname of the guacd tunnel daemon
    #[arg(long = "guacd-host", env = "TG_GUACD_HOST", default_value = "127.0.0.1")]
    pub guacd_host: String,
    /// Port of the guacd tunnel daemon
    #[arg(long = "guacd-port", env = "TG_GUACD_PORT", default_value_t = 4822)]
    pub guacd_port: u16,

    /// Directory session replay files are stored in
    #[arg(long = "replay-dir", env = "TG_REPLAY_DIR", default_value = "/replay")]
    pub replay_dir: PathBuf,

    /// Log level (error|warn|info|debug|trace); RUST_LOG takes precedence
    #[arg(long = "log-level", env = "TG_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl ServerArgs {
    pub fn into_config(self) -> BrokerConfig {
        BrokerConfig {
            bind: self.bind,
            port: self.port,
            ssh_gateway: SshGatewayConfig {
                host: self.ssh_gateway_host,
                port: self.ssh_gateway_port,
                account: self.ssh_gateway_account,
                password: self.ssh_gateway_password,
            },
            guacd: GuacdConfig {
                host: self.guacd_host,
                port: self.guacd_port,
            },
            replay_dir: self.replay_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_the_config() {
        let args = ServerArgs::try_parse_from(["tg-server"]).unwrap();
        let config = args.into_config();
        assert_eq!(config.port, 8080);
        assert_eq!(config.ssh_gateway.port, 2222);
        assert_eq!(config.guacd.port, 4822);
        assert_eq!(config.replay_dir, PathBuf::from("/replay"));
    }

    #[test]
    fn flags_override_defaults() {
        let args = ServerArgs::try_parse_from([
            "tg-server",
            "--bind",
            "127.0.0.1",
            "-P",
            "9090",
            "--ssh-gateway-host",
            "gw.internal",
            "--replay-dir",
            "/var/lib/termgate/replay",
        ])
        .unwrap();
        let config = args.into_config();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.ssh_gateway.host, "gw.internal");
        assert_eq!(config.replay_dir, PathBuf::from("/var/lib/termgate/replay"));
    }
}
