use std::{process, sync::Arc};

use murmur::{
    application::{
        accounts::AccountError,
        error::AppError,
        groups::{GroupError, NewGroup},
    },
    config::{self, GroupsCommand, SessionsCommand, UsersCommand},
    domain::error::DomainError,
    infra::{
        bootstrap::{ApplicationContext, ServiceOptions, build_application_context},
        db::PostgresRepositories,
        error::InfraError,
        http,
        memory::InMemoryRepositories,
        telemetry,
    },
};
use tokio::{net::TcpListener, sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Users(args) => run_users(settings, args.command).await,
        config::Command::Groups(args) => run_groups(settings, args.command).await,
        config::Command::Sessions(args) => run_sessions(settings, args.command).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let options = ServiceOptions::from(&settings);
    match settings.database.url.as_deref() {
        Some(url) => {
            let repositories = connect_postgres(&settings, url).await?;
            let context = build_application_context(repositories, options)?;
            serve_http(&settings, context).await
        }
        None => {
            warn!(
                target = "murmur::serve",
                "no database url configured, serving from a volatile in-memory store"
            );
            let repositories = Arc::new(InMemoryRepositories::new());
            let context = build_application_context(repositories, options)?;
            serve_http(&settings, context).await
        }
    }
}

async fn run_users(settings: config::Settings, command: UsersCommand) -> Result<(), AppError> {
    let context = management_context(&settings).await?;
    match command {
        UsersCommand::Add { username } => {
            let user = context
                .accounts
                .register(&username)
                .await
                .map_err(account_error)?;
            println!("created user {} (id {})", user.username, user.id);
        }
        UsersCommand::Delete { username } => {
            context
                .accounts
                .remove(&username)
                .await
                .map_err(account_error)?;
            println!("deleted user {username}");
        }
    }
    Ok(())
}

async fn run_groups(settings: config::Settings, command: GroupsCommand) -> Result<(), AppError> {
    let context = management_context(&settings).await?;
    match command {
        GroupsCommand::Add {
            title,
            slug,
            description,
        } => {
            let group = context
                .groups
                .create(NewGroup {
                    title,
                    slug,
                    description,
                })
                .await
                .map_err(group_error)?;
            println!("created group {} at /group/{}/", group.title, group.slug);
        }
        GroupsCommand::Delete { slug } => {
            context.groups.delete(&slug).await.map_err(group_error)?;
            println!("deleted group {slug}");
        }
    }
    Ok(())
}

async fn run_sessions(
    settings: config::Settings,
    command: SessionsCommand,
) -> Result<(), AppError> {
    let context = management_context(&settings).await?;
    match command {
        SessionsCommand::Issue { username, days } => {
            let lifetime = days.map(|days| time::Duration::days(i64::from(days)));
            let issued = context
                .accounts
                .issue_session(&username, lifetime)
                .await
                .map_err(account_error)?;
            match issued.record.expires_at {
                Some(expires_at) => println!("session expires at {expires_at}"),
                None => println!("session does not expire"),
            }
            println!("{}", issued.token);
        }
    }
    Ok(())
}

async fn management_context(settings: &config::Settings) -> Result<ApplicationContext, AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| {
            InfraError::configuration("management commands require `database.url` to be set")
        })
        .map_err(AppError::from)?;
    let repositories = connect_postgres(settings, url).await?;
    build_application_context(repositories, ServiceOptions::from(settings)).map_err(AppError::from)
}

async fn connect_postgres(
    settings: &config::Settings,
    url: &str,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn account_error(err: AccountError) -> AppError {
    match err {
        AccountError::InvalidUsername(reason) => {
            AppError::from(DomainError::validation(format!("invalid username: {reason}")))
        }
        AccountError::UsernameTaken(username) => {
            AppError::validation(format!("username `{username}` is already taken"))
        }
        AccountError::UnknownUser(_) => AppError::from(DomainError::not_found("user")),
        AccountError::Repo(err) => AppError::from(err),
    }
}

fn group_error(err: GroupError) -> AppError {
    match err {
        GroupError::UnknownGroup(_) => AppError::from(DomainError::not_found("group")),
        GroupError::Repo(err) => AppError::from(err),
        other => AppError::from(DomainError::validation(other.to_string())),
    }
}

async fn serve_http(
    settings: &config::Settings,
    context: ApplicationContext,
) -> Result<(), AppError> {
    let public_router = http::build_router(context.http);
    let admin_router = http::build_admin_router(context.admin);

    let public_listener = TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "murmur::serve",
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = async { try_join!(public_server, admin_server) } => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
            info!(target = "murmur::serve", "listeners stopped");
        }
        () = deadline => {
            warn!(
                target = "murmur::serve",
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out, dropping open connections"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown(mut signal: watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "murmur::serve", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = "murmur::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!(target = "murmur::serve", "shutdown signal received");
}
