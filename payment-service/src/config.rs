//! # Configuration
//!
//! Every setting is a command-line flag with an environment variable fallback, so the
//! service runs unchanged from a shell or a container manifest.
use std::path::PathBuf;

use clap::Parser;
use tracebridge_core::schema::DEFAULT_SCHEMA_PATH;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "payment-service",
    version,
    about = "Payment service with a cross-language gRPC bridge"
)]
pub struct Config {
    /// Deployment environment, attached to the startup record
    #[arg(long, env = "APP_ENV", default_value = "dev")]
    pub env: String,

    /// Application version, attached to the startup record
    #[arg(long = "app-version", id = "app_version", env = "APP_VERSION", default_value = "1.0.0")]
    pub app_version: String,

    /// Port of the HTTP API
    #[arg(long, env = "HTTP_PORT", default_value_t = 8081)]
    pub http_port: u16,

    /// Port of the gRPC bridge server
    #[arg(long, env = "GRPC_PORT", default_value_t = 9091)]
    pub grpc_port: u16,

    /// Base URL of the peer's HTTP API (e.g. http://localhost:8080)
    #[arg(long, env = "PEER_HTTP_BASE_URL", default_value = "http://localhost:8080")]
    pub peer_http_base_url: String,

    /// Address of the peer's gRPC bridge (host, host:port or URL)
    #[arg(long, env = "PEER_GRPC_ADDR", default_value = "localhost:9090")]
    pub peer_grpc_addr: String,

    /// Logical name of the peer, logged as remoteService
    #[arg(long, env = "PEER_SERVICE_NAME", default_value = "java-service")]
    pub peer_service_name: String,

    /// Path to the bridge descriptor set (.binpb)
    #[arg(long, env = "BRIDGE_DESCRIPTOR_SET", default_value = DEFAULT_SCHEMA_PATH)]
    pub descriptor_set: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "payment-service",
            "--http-port",
            "18081",
            "--peer-grpc-addr",
            "java:9090",
            "--descriptor-set",
            "/etc/bridge.binpb",
            "--app-version",
            "2.3.1",
        ])
        .unwrap();

        assert_eq!(config.app_version, "2.3.1");
        assert_eq!(config.http_port, 18081);
        assert_eq!(config.peer_grpc_addr, "java:9090");
        assert_eq!(config.descriptor_set, PathBuf::from("/etc/bridge.binpb"));
    }

    #[test]
    fn test_version_flag_prints_the_binary_version() {
        let err = Config::try_parse_from(["payment-service", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_rejects_invalid_port() {
        let result = Config::try_parse_from(["payment-service", "--grpc-port", "not-a-port"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_is_consistent() {
        use clap::CommandFactory;
        Config::command().debug_assert();
    }
}
