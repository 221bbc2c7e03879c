use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::response::Response;
use clap::{Parser, Subcommand};
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use switchyard::application::dispatch::{
    AllowListMiddleware, CommandParser, DispatchContext, DispatchMetrics, Inbound, LoggingMiddleware,
    MetricsMiddleware, MiddlewareChain, Outcome, RateLimitMiddleware,
};
use switchyard::application::errors::{BoxError, ConfigError, DispatchError};
use switchyard::application::services::{FindUser, NewUser, UserService};
use switchyard::domain::entities::Message;
use switchyard::domain::traits::ChatSession;
use switchyard::infrastructure::adapters::{ConsoleAdapter, TelegramAdapter};
use switchyard::infrastructure::config::{Config, LoggingConfig};
use switchyard::infrastructure::database::Database;
use switchyard::infrastructure::server::{spawn_signal_watcher, App};
use switchyard::infrastructure::transport::{command, endpoint, raw_command, ChatRouter, HttpRequest, HttpTransport};

const HELP_TEXT: &str = "Commands:\n/find {\"userid\": 1} or {\"email\": \"...\"}\n/adduser {\"name\": \"...\", \"email\": \"...\"}\n/help";

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Typed request dispatch over HTTP and chat commands", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Telegram bot token (overrides config)
    #[arg(short, long)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve HTTP routes, and Telegram commands when a token is configured
    Serve,
    /// Run chat commands from the console
    Chat,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("switchyard v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            if let Err(e) = init_config(&cli.config) {
                eprintln!("failed to write config: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Serve | Commands::Chat => {
            let console = matches!(cli.command, Commands::Chat);
            let config = match load_config(&cli.config, cli.token) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("invalid configuration: {}", e);
                    std::process::exit(1);
                }
            };
            init_tracing(&config.logging);

            let result = tokio::runtime::Runtime::new()
                .map_err(BoxError::from)
                .and_then(|rt| {
                    if console {
                        rt.block_on(run_chat(config))
                    } else {
                        rt.block_on(run_server(config))
                    }
                });

            if let Err(e) = result {
                tracing::error!(error = %e, "switchyard stopped with an error");
                std::process::exit(1);
            }
        }
    }
}

fn load_config(path: &str, token_override: Option<String>) -> Result<Config, ConfigError> {
    let mut config = if std::path::Path::new(path).exists() {
        Config::load(path)?
    } else {
        Config::default()
    };
    config.apply_env();

    if let Some(token) = token_override {
        config.chat.telegram.token = Some(token);
        config.chat.telegram.enabled = true;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_config(path: &str) -> Result<(), ConfigError> {
    if std::path::Path::new(path).exists() {
        return Err(ConfigError::InvalidValue(format!("{} already exists", path)));
    }
    std::fs::write(path, Config::default().to_yaml()?)?;
    println!("Wrote default config to {}", path);
    Ok(())
}

/// Shared collaborators for both run modes
struct Services {
    config: Config,
    users: Arc<UserService>,
    metrics: Arc<DispatchMetrics>,
    rate_limit: Arc<RateLimitMiddleware>,
    shutdown: CancellationToken,
}

impl Services {
    async fn new(config: Config, registry: &Registry) -> Result<Self, BoxError> {
        let database = config.database.clone();
        let users = tokio::task::spawn_blocking(move || -> Result<UserService, BoxError> {
            let db = Arc::new(Database::open(&database)?);
            Ok(UserService::new(db)?)
        })
        .await??;
        let users = Arc::new(users);
        let metrics = Arc::new(DispatchMetrics::new(registry)?);
        let rate_limit = Arc::new(RateLimitMiddleware::new(
            config.security.rate_limit.max_requests,
            config.security.rate_limit.window_seconds,
        ));

        Ok(Self {
            config,
            users,
            metrics,
            rate_limit,
            shutdown: CancellationToken::new(),
        })
    }

    /// Middleware shared by every route of one transport, outermost first
    fn chain<Req: Inbound, Resp: Outcome>(&self) -> MiddlewareChain<Req, Resp> {
        let mut chain = MiddlewareChain::new()
            .add(LoggingMiddleware)
            .add(MetricsMiddleware::new(Arc::clone(&self.metrics)));

        if self.config.security.rate_limit.enabled {
            chain = chain.add_shared(Arc::clone(&self.rate_limit) as _);
        }
        if self.config.security.allowlist.enabled {
            chain = chain.add(AllowListMiddleware::new(self.config.security.allowlist.users.clone()));
        }
        chain
    }

    fn http_transport(&self) -> Result<HttpTransport, ConfigError> {
        let timeout = match self.config.http.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let mut transport = HttpTransport::new(self.chain::<HttpRequest, Response>())
            .with_body_limit(self.config.http.body_limit_bytes)
            .with_request_timeout(timeout)
            .with_shutdown(self.shutdown.clone());

        let users = Arc::clone(&self.users);
        transport.add_route(
            endpoint(Method::GET, "/users", move |_ctx: DispatchContext, query: FindUser| {
                let users = Arc::clone(&users);
                async move { users.find(query).await }
            })
            .build()?,
        )?;

        let users = Arc::clone(&self.users);
        transport.add_route(
            endpoint(Method::POST, "/users", move |ctx: DispatchContext, user: NewUser| {
                let users = Arc::clone(&users);
                async move {
                    ctx.check()?;
                    users.create(user).await
                }
            })
            .build()?,
        )?;

        let users = Arc::clone(&self.users);
        transport.add_route(
            endpoint(Method::DELETE, "/users", move |_ctx: DispatchContext, query: FindUser| {
                let users = Arc::clone(&users);
                async move { users.delete(query).await }
            })
            .build()?,
        )?;

        Ok(transport)
    }

    fn chat_router(&self, session: Arc<dyn ChatSession>) -> Result<ChatRouter, ConfigError> {
        let parser = CommandParser::new(self.config.chat.prefix.clone())?;
        let mut router = ChatRouter::new(parser, self.chain::<Message, String>(), session)
            .with_shutdown(self.shutdown.clone());

        let users = Arc::clone(&self.users);
        router.add_command(
            command("/find", move |_ctx: DispatchContext, query: FindUser| {
                let users = Arc::clone(&users);
                async move { users.find(query).await }
            })
            .build()?,
        )?;

        let users = Arc::clone(&self.users);
        router.add_command(
            command("/adduser", move |_ctx: DispatchContext, user: NewUser| {
                let users = Arc::clone(&users);
                async move { users.create(user).await }
            })
            .build()?,
        )?;

        router.add_command(
            raw_command("/help", |_ctx: DispatchContext, _input: ()| async move {
                Ok::<_, DispatchError>(HELP_TEXT)
            })
            .build()?,
        )?;

        Ok(router)
    }
}

async fn run_server(config: Config) -> Result<(), BoxError> {
    let registry = Registry::new();
    let services = Services::new(config, &registry).await?;
    let watcher = spawn_signal_watcher(services.shutdown.clone());

    tracing::info!(app = %services.config.app.name, "starting switchyard");

    let mut app = App::new(services.http_transport()?.into_router(), services.shutdown.clone());
    if services.config.metrics.enabled {
        app = app.with_metrics(&services.config.metrics.path, Arc::clone(&services.metrics));
    }

    let telegram = match services.config.chat.telegram.token.clone() {
        Some(token) if services.config.chat.telegram.enabled => {
            let poll_timeout = Duration::from_secs(services.config.chat.telegram.poll_timeout_secs);
            let mut adapter = TelegramAdapter::new(&token, poll_timeout)?;
            adapter.fetch_bot_info().await?;
            let adapter = Arc::new(adapter);

            let router = Arc::new(services.chat_router(Arc::clone(&adapter) as Arc<dyn ChatSession>)?);
            if let Err(e) = adapter.register_commands(&router.commands()).await {
                tracing::warn!(error = %e, "failed to register bot commands");
            }

            let shutdown = services.shutdown.clone();
            Some(tokio::spawn(async move { adapter.poll(router, shutdown).await }))
        }
        _ => None,
    };

    let served = app.serve(&services.config.http.addr).await;
    services.shutdown.cancel();

    if let Some(handle) = telegram {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Telegram polling failed"),
            Err(e) => tracing::error!(error = %e, "Telegram polling task panicked"),
        }
    }
    watcher.abort();

    served?;
    tracing::info!("switchyard stopped");
    Ok(())
}

async fn run_chat(config: Config) -> Result<(), BoxError> {
    let registry = Registry::new();
    let services = Services::new(config, &registry).await?;
    let watcher = spawn_signal_watcher(services.shutdown.clone());

    let router = Arc::new(services.chat_router(Arc::new(ConsoleAdapter::new()))?);
    println!("switchyard console. Type /help, Ctrl+D to quit.");

    ConsoleAdapter::run(router, services.shutdown.clone()).await?;
    watcher.abort();
    Ok(())
}
