use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// Server settings. Environment variables (and a `.env` file) provide the
/// defaults; command-line flags win.
#[derive(Debug, Clone, Parser)]
#[command(name = "relique-server", version, about = "HTTP front for the relique backup orchestrator")]
pub struct AppConfig {
    /// Root configuration file of the relique core
    #[arg(long = "config", env = "RELIQUE_CONFIG", default_value = "/etc/relique/relique.toml")]
    pub config_file: PathBuf,

    #[arg(long, env = "PORT", default_value_t = 8433)]
    pub port: u16,

    #[arg(long = "bind", env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        AppConfig::parse()
    }

    pub fn listen_address(&self) -> std::net::SocketAddr {
        (self.bind_address, self.port).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = AppConfig::parse_from([
            "relique-server",
            "--config",
            "/tmp/relique.toml",
            "--port",
            "9000",
            "--bind",
            "127.0.0.1",
        ]);
        assert_eq!(config.config_file, PathBuf::from("/tmp/relique.toml"));
        assert_eq!(config.listen_address().to_string(), "127.0.0.1:9000");
    }
}
