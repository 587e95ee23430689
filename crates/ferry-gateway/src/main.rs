use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ferry-gateway", version, about = "chat front-end to agent backend bridge")]
struct Cli {
    #[arg(long, global = true)]
    conf_dir: Option<std::path::PathBuf>,
    #[command(subcommand)]
    command: GatewaySubcommand,
}

#[derive(Subcommand, Debug, Clone)]
enum GatewaySubcommand {
    /// Run the gateway in the foreground.
    Serve,
    /// Validate the configuration and print the resolved runtime summary.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    ferry_gateway::init_conf_dir(cli.conf_dir.clone());
    let result = match cli.command {
        GatewaySubcommand::Serve => {
            ferry_gateway::init_tracing();
            ferry_gateway::run_gateway_serve().await
        }
        GatewaySubcommand::Check => ferry_gateway::run_gateway_check(),
    };
    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_serve_command() {
        let parsed = Cli::try_parse_from(["ferry-gateway", "serve"]);
        assert!(parsed.is_ok(), "serve should parse");
    }

    #[test]
    fn cli_parses_check_command() {
        let parsed = Cli::try_parse_from(["ferry-gateway", "check"]);
        assert!(parsed.is_ok(), "check should parse");
    }

    #[test]
    fn cli_parses_conf_dir_global_flag() {
        let parsed = Cli::try_parse_from(["ferry-gateway", "--conf-dir", "/tmp/ferry-conf", "serve"]);
        assert!(parsed.is_ok(), "--conf-dir should parse as global flag");
    }
}
