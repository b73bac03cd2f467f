//! CLI command implementations

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

use bulwark_agent::Bridge;
use bulwark_core::{CommandResponse, Parameters, Request, DEFAULT_SOCKET_PATH};

/// Bulwark CLI - run a single daemon request and print the response
#[derive(Parser, Debug)]
#[command(name = "bulwark")]
#[command(about = "Run a bulwark-rootd request and print the JSON response")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to daemon socket
    #[arg(long, global = true, env = "BULWARK_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Pretty-print the response
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a module action
    Execute {
        /// Module name, e.g. firewall
        module: String,

        /// Action name, e.g. list_zones
        action: String,

        /// Parameter as KEY=VALUE; VALUE is read as JSON when it parses
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// All parameters as one JSON object; --param entries override it
        #[arg(long, value_name = "JSON")]
        json_params: Option<String>,
    },

    /// List loaded modules
    ListModules,

    /// Describe a module and its actions
    ModuleInfo {
        /// Module name
        name: String,
    },

    /// Summary of the host
    SystemInfo,

    /// Check that the daemon answers
    Ping,
}

/// Parse one `KEY=VALUE` parameter
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Merge `--json-params` and `--param` into one parameter map
pub fn build_parameters(
    params: Vec<(String, Value)>,
    json_params: Option<&str>,
) -> anyhow::Result<Parameters> {
    let mut parameters = match json_params {
        Some(raw) => match serde_json::from_str(raw).context("--json-params is not valid JSON")? {
            Value::Object(map) => map,
            other => bail!("--json-params must be a JSON object, got {other}"),
        },
        None => Parameters::new(),
    };
    parameters.extend(params);
    Ok(parameters)
}

impl Commands {
    /// The daemon request this command stands for
    pub fn to_request(&self) -> anyhow::Result<Request> {
        Ok(match self {
            Commands::Execute {
                module,
                action,
                params,
                json_params,
            } => Request::execute(
                module.clone(),
                action.clone(),
                build_parameters(params.clone(), json_params.as_deref())?,
            ),
            Commands::ListModules => Request::list_modules(),
            Commands::ModuleInfo { name } => Request::module_info(name.clone()),
            Commands::SystemInfo => Request::system_info(),
            Commands::Ping => Request::ping(),
        })
    }
}

/// Run the CLI
///
/// `Err` means no response was obtained; a failed action is still `Ok`.
pub async fn run(cli: &Cli) -> anyhow::Result<CommandResponse> {
    debug!("Using daemon socket {:?}", cli.socket);
    send(&Bridge::connect(&cli.socket), &cli.command).await
}

/// Send one command through the bridge
///
/// Module actions take the same `dispatch_one` path as the pull and push
/// modes; discovery commands go out as-is.
pub async fn send(bridge: &Bridge, command: &Commands) -> anyhow::Result<CommandResponse> {
    let response = match command {
        Commands::Execute {
            module,
            action,
            params,
            json_params,
        } => {
            let parameters = build_parameters(params.clone(), json_params.as_deref())?;
            bridge.dispatch_one(module, action, parameters).await?
        }
        other => {
            let request = other.to_request()?;
            debug!("Sending {}", request.kind());
            bridge.request(&request).await?
        }
    };
    Ok(response)
}

/// Serialize a response for stdout
pub fn render(response: &CommandResponse, pretty: bool) -> String {
    let rendered = if pretty {
        serde_json::to_string_pretty(response)
    } else {
        serde_json::to_string(response)
    };
    rendered.unwrap_or_else(|e| format!("{{\"type\":\"error\",\"message\":\"{e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bulwark_agent::DaemonLink;
    use bulwark_daemon::ClientError;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Daemon stand-in that records what it receives
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Request>>,
    }

    #[async_trait]
    impl DaemonLink for Recorder {
        async fn call(&self, request: &Request) -> Result<CommandResponse, ClientError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(CommandResponse::success(request.request_id(), json!({"ok": true})))
        }
    }

    #[test]
    fn test_parse_param_json_or_string() {
        assert_eq!(parse_param("permanent=true").unwrap(), ("permanent".into(), json!(true)));
        assert_eq!(parse_param("count=3").unwrap(), ("count".into(), json!(3)));
        assert_eq!(parse_param("zone=public").unwrap(), ("zone".into(), json!("public")));
        assert_eq!(
            parse_param("rule=rule family=ipv4 accept").unwrap(),
            ("rule".into(), json!("rule family=ipv4 accept"))
        );
        assert_eq!(parse_param("empty=").unwrap(), ("empty".into(), json!("")));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_param_overrides_json_params() {
        let params = vec![("zone".to_string(), json!("dmz"))];
        let merged =
            build_parameters(params, Some(r#"{"zone":"public","port":"80/tcp"}"#)).unwrap();
        assert_eq!(merged["zone"], "dmz");
        assert_eq!(merged["port"], "80/tcp");

        assert!(build_parameters(vec![], Some("[1,2]")).is_err());
        assert!(build_parameters(vec![], Some("{oops")).is_err());
    }

    #[test]
    fn test_execute_command_line() {
        let cli = Cli::try_parse_from([
            "bulwark",
            "--socket",
            "/tmp/test.sock",
            "execute",
            "firewall",
            "add_port",
            "-p",
            "zone=public",
            "--param",
            "port=8080/tcp",
            "-p",
            "permanent=true",
        ])
        .unwrap();

        assert_eq!(cli.socket, PathBuf::from("/tmp/test.sock"));
        let Request::ExecuteCommand(command) = cli.command.to_request().unwrap() else {
            panic!("expected execute_command");
        };
        assert_eq!(command.module, "firewall");
        assert_eq!(command.action, "add_port");
        assert_eq!(command.parameters["permanent"], json!(true));
        assert_eq!(command.parameters["port"], "8080/tcp");
    }

    #[test]
    fn test_discovery_commands() {
        let cli = Cli::try_parse_from(["bulwark", "module-info", "firewall"]).unwrap();
        assert_eq!(
            cli.command.to_request().unwrap().kind(),
            Request::module_info("firewall").kind()
        );

        let cli = Cli::try_parse_from(["bulwark", "ping", "--pretty"]).unwrap();
        assert!(cli.pretty);
        assert!(matches!(cli.command, Commands::Ping));
    }

    #[test]
    fn test_render_single_line() {
        let response = CommandResponse::success("r1", json!({"pong": true}));
        let line = render(&response, false);
        assert!(!line.contains('\n'));
        let parsed: CommandResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, response);
    }

    #[tokio::test]
    async fn test_execute_goes_through_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let bridge = Bridge::new(recorder.clone());
        let cli = Cli::try_parse_from([
            "bulwark",
            "execute",
            "firewall",
            "get_zone",
            "--json-params",
            r#"{"zone":"public"}"#,
        ])
        .unwrap();

        let response = send(&bridge, &cli.command).await.unwrap();
        assert!(response.is_success());

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let Request::ExecuteCommand(command) = &seen[0] else {
            panic!("expected execute_command");
        };
        assert_eq!(command.module, "firewall");
        assert_eq!(command.action, "get_zone");
        assert_eq!(command.parameters["zone"], "public");
        assert_eq!(response.request_id, seen[0].request_id());
    }

    #[tokio::test]
    async fn test_bad_json_params_never_reach_daemon() {
        let recorder = Arc::new(Recorder::default());
        let bridge = Bridge::new(recorder.clone());
        let cli = Cli::try_parse_from([
            "bulwark",
            "execute",
            "firewall",
            "get_zone",
            "--json-params",
            "[1]",
        ])
        .unwrap();

        assert!(send(&bridge, &cli.command).await.is_err());
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_without_daemon_is_error() {
        let dir = std::env::temp_dir().join(format!("bulwark-cli-{}", std::process::id()));
        let cli = Cli::try_parse_from([
            "bulwark",
            "--socket",
            dir.join("missing.sock").to_str().unwrap(),
            "ping",
        ])
        .unwrap();

        let err = run(&cli).await.unwrap_err();
        assert!(err.to_string().contains("daemon not running"));
    }
}
