//! Server configuration and default resolution.

use std::time::Duration;

/// Page size used for list operations when none is configured.
pub const DEFAULT_PAGE_SIZE: usize = 99;

/// Keep-alive interval used when none is configured.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(13);

/// Port used for HTTP mode when none is configured.
pub const DEFAULT_PORT: u16 = 8216;

/// Settings used to create the MCP server and its `mcp` command.
///
/// Zero-valued fields fall back to the defaults above.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Implementation name reported to clients (e.g. the CLI's name).
    pub name: String,

    /// Implementation version reported to clients.
    pub version: String,

    /// Short description of the server's purpose, sent on initialize.
    pub instructions: String,

    /// Pagination size for list operations.
    pub page_size: usize,

    /// Keep-alive interval for streaming connections.
    pub keep_alive: Duration,

    /// Default port for HTTP mode.
    pub default_port: u16,

    /// Full server options. When set, `instructions`, `page_size` and
    /// `keep_alive` are ignored.
    pub server_options: Option<ServerOptions>,
}

impl Config {
    /// Create a configuration with a name and version and defaults elsewhere.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Set the instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the keep-alive interval.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the default HTTP port.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Replace the resolved server options wholesale.
    pub fn with_server_options(mut self, options: ServerOptions) -> Self {
        self.server_options = Some(options);
        self
    }

    /// Resolve the effective server options.
    pub fn server_options(&self) -> ServerOptions {
        if let Some(options) = &self.server_options {
            return options.clone();
        }

        let page_size = if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        };
        let keep_alive = if self.keep_alive.is_zero() {
            DEFAULT_KEEP_ALIVE
        } else {
            self.keep_alive
        };

        ServerOptions {
            instructions: self.instructions.clone(),
            page_size,
            keep_alive,
            capabilities: Capabilities::default(),
        }
    }

    /// The default port for HTTP mode.
    pub fn port(&self) -> u16 {
        if self.default_port == 0 {
            DEFAULT_PORT
        } else {
            self.default_port
        }
    }
}

/// Effective options of a server instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    /// Instructions sent on initialize. Empty means none.
    pub instructions: String,
    /// Items per page for list operations. Zero disables pagination.
    pub page_size: usize,
    /// Keep-alive interval for streaming connections. Zero disables it.
    pub keep_alive: Duration,
    /// Capabilities advertised to clients.
    pub capabilities: Capabilities,
}

/// Server capabilities advertised on initialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub logging: bool,
    pub resources: Option<ResourceCapabilities>,
    pub tools: Option<ToolCapabilities>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            logging: true,
            resources: Some(ResourceCapabilities {
                list_changed: true,
                subscribe: true,
            }),
            tools: Some(ToolCapabilities { list_changed: true }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCapabilities {
    pub list_changed: bool,
    pub subscribe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolCapabilities {
    pub list_changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_zero_fields() {
        let config = Config::new("myapp", "0.1.0");
        let options = config.server_options();

        assert_eq!(options.page_size, 99);
        assert_eq!(options.keep_alive, Duration::from_secs(13));
        assert_eq!(options.instructions, "");
        assert_eq!(config.port(), 8216);
    }

    #[test]
    fn test_explicit_values_pass_through() {
        let config = Config::new("myapp", "0.1.0")
            .with_instructions("Manage widgets")
            .with_page_size(10)
            .with_keep_alive(Duration::from_secs(30))
            .with_default_port(9000);
        let options = config.server_options();

        assert_eq!(options.instructions, "Manage widgets");
        assert_eq!(options.page_size, 10);
        assert_eq!(options.keep_alive, Duration::from_secs(30));
        assert_eq!(config.port(), 9000);
    }

    #[test]
    fn test_default_capabilities() {
        let options = Config::default().server_options();
        let caps = options.capabilities;

        assert!(caps.logging);
        assert_eq!(
            caps.resources,
            Some(ResourceCapabilities {
                list_changed: true,
                subscribe: true
            })
        );
        assert_eq!(caps.tools, Some(ToolCapabilities { list_changed: true }));
    }

    #[test]
    fn test_override_is_used_verbatim() {
        let custom = ServerOptions {
            instructions: "custom".to_string(),
            page_size: 0,
            keep_alive: Duration::ZERO,
            capabilities: Capabilities {
                logging: false,
                resources: None,
                tools: Some(ToolCapabilities {
                    list_changed: false,
                }),
            },
        };

        let configs = [
            Config::new("a", "1").with_server_options(custom.clone()),
            Config::new("b", "2")
                .with_instructions("ignored")
                .with_page_size(5)
                .with_keep_alive(Duration::from_secs(1))
                .with_server_options(custom.clone()),
        ];

        for config in configs {
            assert_eq!(config.server_options(), custom);
            // Resolving twice gives the same answer.
            assert_eq!(config.server_options(), config.server_options());
        }
    }

    #[test]
    fn test_override_does_not_affect_port() {
        let config = Config::new("a", "1")
            .with_default_port(7000)
            .with_server_options(Config::default().server_options());
        assert_eq!(config.port(), 7000);
    }
}
