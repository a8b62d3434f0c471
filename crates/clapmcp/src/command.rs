//! The `mcp` subcommand.
//!
//! [`McpArgs`] carries the flags and can be flattened into a derive-based CLI;
//! [`McpCommand::command`] builds the same subcommand with the builder API.
//! Either way, [`McpCommand::execute`] starts the server on the chosen
//! transport and blocks until it stops.

use crate::config::Config;
use crate::error::{ServeError, ServeResult};
use crate::server::McpServer;
use crate::transport::{HttpTransport, StdioTransport, Transport};
use clap::{ArgMatches, Args, Command, FromArgMatches};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info};

/// Name of the subcommand.
pub const COMMAND_NAME: &str = "mcp";

/// Modes accepted by `--mode`, as shown in error logs.
pub const VALID_MODES: &str = "stdio, http";

/// Flags of the `mcp` subcommand.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct McpArgs {
    /// stdio|http
    #[arg(short, long, default_value = "stdio")]
    pub mode: String,

    /// Port to listen on for HTTP mode
    ///
    /// Defaults to the port configured for the server, 8216 unless changed.
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl Default for McpArgs {
    fn default() -> Self {
        Self {
            mode: Mode::Stdio.to_string(),
            port: None,
        }
    }
}

/// Transport selected by `--mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Stdio,
    Http,
}

impl FromStr for Mode {
    type Err = ServeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Mode::Stdio),
            "http" => Ok(Mode::Http),
            other => Err(ServeError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Stdio => write!(f, "stdio"),
            Mode::Http => write!(f, "http"),
        }
    }
}

/// Runs an [`McpServer`] from parsed `mcp` flags.
#[derive(Debug, Clone)]
pub struct McpCommand {
    server: McpServer,
    version: String,
    default_port: u16,
    keep_alive: Duration,
}

impl McpCommand {
    pub fn new(server: McpServer, config: &Config) -> Self {
        Self {
            version: config.version.clone(),
            default_port: config.port(),
            keep_alive: server.options().keep_alive,
            server,
        }
    }

    /// The `mcp` subcommand for builder-style clap trees.
    pub fn command(&self) -> Command {
        self.apply_defaults(McpArgs::augment_args(Command::new(COMMAND_NAME)))
            .about("Start MCP server")
            .long_about("Start MCP server to handle requests from clients")
    }

    /// Set the server's default port on an `mcp` command built from
    /// [`McpArgs`], e.g. one generated by `#[derive(Subcommand)]`.
    ///
    /// ```no_run
    /// # use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
    /// # use clapmcp::{server_and_command, Config, McpArgs};
    /// #[derive(Parser)]
    /// struct Cli {
    ///     #[command(subcommand)]
    ///     command: Commands,
    /// }
    ///
    /// #[derive(Subcommand)]
    /// enum Commands {
    ///     Mcp(McpArgs),
    /// }
    ///
    /// let (_, mcp) = server_and_command(Config::new("myapp", "0.1.0"));
    /// let matches = Cli::command()
    ///     .mut_subcommand("mcp", |cmd| mcp.apply_defaults(cmd))
    ///     .get_matches();
    /// let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
    /// # let _ = cli;
    /// ```
    pub fn apply_defaults(&self, command: Command) -> Command {
        command.mut_arg("port", |arg| arg.default_value(self.default_port.to_string()))
    }

    /// Extract the flags from the matches of [`McpCommand::command`].
    pub fn args_from(matches: &ArgMatches) -> Result<McpArgs, clap::Error> {
        McpArgs::from_arg_matches(matches)
    }

    /// Start the server on the transport selected by `args` and wait for it.
    pub async fn run(&self, args: &McpArgs) -> ServeResult<()> {
        self.run_with(args, |mode, port, keep_alive| -> Box<dyn Transport> {
            match mode {
                Mode::Stdio => Box::new(StdioTransport),
                Mode::Http => Box::new(HttpTransport::new(port, keep_alive)),
            }
        })
        .await
    }

    /// Like [`McpCommand::run`] with a caller-supplied transport factory.
    ///
    /// `connect` receives the parsed mode, the effective port and the
    /// keep-alive interval. It is not called when the mode is invalid.
    pub async fn run_with<F>(&self, args: &McpArgs, connect: F) -> ServeResult<()>
    where
        F: FnOnce(Mode, u16, Duration) -> Box<dyn Transport>,
    {
        info!(mode = %args.mode, version = %self.version, "starting MCP server");

        let mode: Mode = args.mode.parse()?;
        let port = args.port.unwrap_or(self.default_port);
        let transport = connect(mode, port, self.keep_alive);
        debug!(transport = transport.name(), port, "transport selected");
        transport.serve(self.server.clone()).await
    }

    /// Run the command, exiting the process with status 1 on failure.
    pub async fn execute(&self, args: &McpArgs) {
        if let Err(e) = self.run(args).await {
            report_failure(&args.mode, &e);
            std::process::exit(1);
        }
    }
}

/// Log why the server could not run.
pub fn report_failure(mode: &str, err: &ServeError) {
    match err {
        ServeError::InvalidMode(_) => {
            error!(mode = %mode, valid_modes = VALID_MODES, "invalid mode");
        }
        other => {
            error!(error = %other, mode = %mode, "starting server failed");
        }
    }
}

/// Build the server and its `mcp` command from one configuration.
pub fn server_and_command(config: Config) -> (McpServer, McpCommand) {
    let server = McpServer::new(&config);
    let command = McpCommand::new(server.clone(), &config);
    (server, command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_logs() -> (Capture, tracing::subscriber::DefaultGuard) {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// Records the served port and returns immediately.
    struct Recording {
        served: Arc<Mutex<Vec<u16>>>,
        port: u16,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn serve(&self, _server: McpServer) -> ServeResult<()> {
            self.served.lock().unwrap().push(self.port);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn defaults(arg: &clap::Arg) -> Vec<&str> {
        arg.get_default_values().iter().filter_map(|v| v.to_str()).collect()
    }

    fn command() -> McpCommand {
        server_and_command(Config::new("myapp", "0.1.0")).1
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("stdio".parse::<Mode>().unwrap(), Mode::Stdio);
        assert_eq!("http".parse::<Mode>().unwrap(), Mode::Http);
        assert!(matches!(
            "HTTP".parse::<Mode>(),
            Err(ServeError::InvalidMode(m)) if m == "HTTP"
        ));
        assert_eq!(Mode::Http.to_string(), "http");
    }

    #[test]
    fn test_command_shape() {
        let cmd = command().command();
        assert_eq!(cmd.get_name(), "mcp");
        assert_eq!(cmd.get_about().map(|s| s.to_string()).as_deref(), Some("Start MCP server"));

        let mode = cmd.get_arguments().find(|a| a.get_long() == Some("mode")).unwrap();
        assert_eq!(mode.get_short(), Some('m'));
        assert_eq!(defaults(mode), ["stdio"]);

        let port = cmd.get_arguments().find(|a| a.get_long() == Some("port")).unwrap();
        assert_eq!(port.get_short(), Some('p'));
        assert_eq!(defaults(port), ["8216"]);
    }

    #[test]
    fn test_command_help_text() {
        let mut cmd = command().command();
        assert_eq!(
            cmd.get_long_about().map(|s| s.to_string()).as_deref(),
            Some("Start MCP server to handle requests from clients")
        );
        let help = cmd.render_help().to_string();
        assert!(help.starts_with("Start MCP server"));
        assert!(help.contains("[default: 8216]"));
    }

    #[test]
    fn test_apply_defaults_on_derived_subcommand() {
        #[derive(clap::Parser)]
        struct Cli {
            #[command(subcommand)]
            command: Commands,
        }

        #[derive(clap::Subcommand)]
        enum Commands {
            Mcp(McpArgs),
        }

        let (_, mcp) = server_and_command(Config::new("myapp", "0.1.0").with_default_port(7000));
        let matches = <Cli as clap::CommandFactory>::command()
            .mut_subcommand("mcp", |cmd| mcp.apply_defaults(cmd))
            .try_get_matches_from(["myapp", "mcp"])
            .unwrap();
        let Commands::Mcp(args) = Cli::from_arg_matches(&matches).unwrap().command;
        assert_eq!(args.port, Some(7000));
    }

    #[test]
    fn test_args_from_matches() {
        let cmd = command().command();

        let matches = cmd.clone().try_get_matches_from(["mcp"]).unwrap();
        let args = McpCommand::args_from(&matches).unwrap();
        assert_eq!(args.mode, "stdio");
        assert_eq!(args.port, Some(8216));

        let matches = cmd
            .try_get_matches_from(["mcp", "-m", "http", "-p", "9000"])
            .unwrap();
        let args = McpCommand::args_from(&matches).unwrap();
        assert_eq!(args.mode, "http");
        assert_eq!(args.port, Some(9000));
    }

    #[test]
    fn test_custom_default_port() {
        let (_, command) = server_and_command(Config::new("myapp", "0.1.0").with_default_port(7000));
        let matches = command.command().try_get_matches_from(["mcp"]).unwrap();
        assert_eq!(McpCommand::args_from(&matches).unwrap().port, Some(7000));
    }

    #[tokio::test]
    async fn test_http_scenario_logs_before_binding() {
        let (logs, _guard) = capture_logs();
        let served = Arc::new(Mutex::new(Vec::new()));
        let args = McpArgs {
            mode: "http".to_string(),
            port: Some(8080),
        };

        let seen = served.clone();
        let log_view = logs.clone();
        command()
            .run_with(&args, move |mode, port, keep_alive| -> Box<dyn Transport> {
                assert_eq!(mode, Mode::Http);
                assert_eq!(keep_alive, Duration::from_secs(13));
                assert!(log_view.contents().contains("starting MCP server"));
                Box::new(Recording { served: seen, port })
            })
            .await
            .unwrap();

        assert_eq!(*served.lock().unwrap(), vec![8080]);
        let out = logs.contents();
        assert!(out.contains("mode=http"));
        assert!(out.contains("version=0.1.0"));
        assert!(out.contains("transport=\"recording\""));
    }

    #[tokio::test]
    async fn test_default_port_used_when_unset() {
        let served = Arc::new(Mutex::new(Vec::new()));
        let seen = served.clone();
        let args = McpArgs {
            mode: "http".to_string(),
            port: None,
        };

        command()
            .run_with(&args, move |_, port, _| -> Box<dyn Transport> {
                Box::new(Recording { served: seen, port })
            })
            .await
            .unwrap();

        assert_eq!(*served.lock().unwrap(), vec![8216]);
    }

    #[tokio::test]
    async fn test_invalid_mode_never_connects() {
        let (logs, _guard) = capture_logs();
        let args = McpArgs {
            mode: "grpc".to_string(),
            port: None,
        };

        let err = command()
            .run_with(&args, |_, _, _| -> Box<dyn Transport> {
                panic!("transport must not be created for an invalid mode")
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ServeError::InvalidMode(ref m) if m == "grpc"));
        assert!(logs.contents().contains("starting MCP server"));
    }

    #[test]
    fn test_report_failure_messages() {
        let (logs, _guard) = capture_logs();

        report_failure("grpc", &ServeError::InvalidMode("grpc".to_string()));
        report_failure("http", &ServeError::transport("boom"));

        let out = logs.contents();
        assert!(out.contains("invalid mode"));
        assert!(out.contains("valid_modes=\"stdio, http\""));
        assert!(out.contains("starting server failed"));
        assert!(out.contains("transport error: boom"));
    }
}
