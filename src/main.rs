mod cli;
mod session;

use std::io::Write;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use novacal_auth::{google_access_token, GoogleOAuth2Provider, SecureStorage, GOOGLE_SERVICE};
use novacal_core::Config;

use crate::cli::{parse_shell_line, Action, Cli, Command, ShellCommand};
use crate::session::Session;

/// Token JSON seeded into storage when none is stored yet.
const TOKEN_ENV: &str = "NOVACAL_GOOGLE_TOKEN";

#[tokio::main]
async fn main() -> Result<()> {
    novacal_core::init()?;

    let cli = Cli::parse();
    let (config, _validation) = Config::load_validated()?;

    let access_token = match access_token(&config).await {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::warn!("No usable Google token: {:#}", e);
            None
        }
    };

    let mut session = Session::new(config, access_token);

    match cli.command {
        Command::Action(action) => {
            let text = session.run(&action).await?;
            println!("{}", text.trim_end());
        }
        Command::Shell => shell(&mut session).await?,
    }

    Ok(())
}

async fn access_token(config: &Config) -> Result<String> {
    let storage = SecureStorage::new(config.tokens_dir());

    if let Ok(raw) = std::env::var(TOKEN_ENV) {
        if storage.import_if_missing(GOOGLE_SERVICE, &raw)? {
            tracing::info!("Imported Google token from {}", TOKEN_ENV);
        }
    }

    let provider = config.google.is_configured().then(|| {
        GoogleOAuth2Provider::new(
            config.google.client_id.clone(),
            config.google.client_secret.clone(),
        )
    });

    Ok(google_access_token(&storage, provider.as_ref()).await?)
}

async fn shell(session: &mut Session) -> Result<()> {
    println!("NovaCal - type 'help' for commands, 'quit' to leave\n");

    match session.run(&Action::Agenda { from: None, to: None }).await {
        Ok(agenda) => println!("{}\n", agenda.trim_end()),
        Err(e) => println!("Could not load today's agenda: {}\n", e),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let command = match parse_shell_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message.trim_end());
                continue;
            }
        };

        match command {
            ShellCommand::Action(action) => match session.handle(line.trim(), &action).await {
                Ok(reply) => println!("{}", reply.trim_end()),
                Err(e) => println!("{}", e),
            },
            ShellCommand::Clear => {
                session.clear_display();
                println!("Screen cleared. Context retained.");
            }
            ShellCommand::Reset => {
                session.reset();
                println!("Session reset. Memory and connection wiped.");
            }
            ShellCommand::SetToken { token } => {
                session.set_access_token(token);
                println!("Token updated. Session reset.");
            }
            ShellCommand::Quit => break,
        }
    }

    tracing::info!("Shell closed after {} turns", session.transcript().len());
    Ok(())
}
