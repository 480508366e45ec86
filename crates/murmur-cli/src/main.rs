//! CLI entry point for murmur.
//!
//! This binary provides the `murmur` command with subcommands for running
//! the Telegram gateway, checking status, and managing user roles.

mod bot;
mod bot_config;
mod cli;
mod helpers;
mod messages;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use murmur_store::{ChatStore, MessageStore, UserRole, UserStore};

use crate::bot_config::load_config;
use crate::cli::{Cli, Commands, UserAction};
use crate::helpers::{api_keys_from_env, env_non_empty, init_tracing, open_database};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Bot { poll_timeout } => bot::cmd_bot(&cli.config, poll_timeout).await,
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Users { action } => cmd_users(&cli.config, action).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

async fn cmd_status(config_path: &Path) -> Result<()> {
    init_tracing("warn");

    println!();
    println!("  murmur Status");
    println!("  =============");
    println!();

    if config_path.exists() {
        println!("  Config:           OK ({})", config_path.display());
    } else {
        println!("  Config:           MISSING, using defaults");
    }
    let config = load_config(config_path)?;
    println!("  Model:            {}", config.bot.model);
    println!("  Persona:          {}", config.persona.name);

    match env_non_empty("TELEGRAM_BOT_TOKEN") {
        Some(_) => println!("  Telegram token:   CONFIGURED"),
        None => println!("  Telegram token:   NOT SET"),
    }
    let keys = api_keys_from_env();
    if keys.is_empty() {
        println!("  Gemini keys:      NOT SET");
    } else {
        println!("  Gemini keys:      {}", keys.len());
    }

    let db_path = &config.bot.database;
    if db_path.exists() {
        let db = open_database(db_path).await?;
        let users = UserStore::new(db.clone()).list().await?.len();
        let chats = ChatStore::new(db.clone()).count().await?;
        let messages = MessageStore::new(db).count().await?;
        println!("  Database:         OK ({})", db_path.display());
        println!("    users:          {users}");
        println!("    chats:          {chats}");
        println!("    messages:       {messages}");
    } else {
        println!("  Database:         NOT INITIALIZED ({})", db_path.display());
    }

    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: users
// ---------------------------------------------------------------------------

async fn cmd_users(config_path: &Path, action: UserAction) -> Result<()> {
    init_tracing("warn");

    let config = load_config(config_path)?;
    let db = open_database(&config.bot.database).await?;
    let users = UserStore::new(db);

    match action {
        UserAction::List => {
            let all = users.list().await?;
            if all.is_empty() {
                println!("  No users yet.");
                return Ok(());
            }
            println!();
            println!("  {:<14} {:<10} NAME", "TELEGRAM ID", "ROLE");
            for user in all {
                println!("  {:<14} {:<10} {}", user.telegram_id, user.role.as_str(), user.name);
            }
            println!();
        }
        UserAction::Role { telegram_id, role } => {
            let role: UserRole = role.parse().context("invalid role")?;
            let user = users
                .set_role(telegram_id, role)
                .await
                .with_context(|| format!("failed to update user {telegram_id}"))?;
            println!("  {} ({}) is now {}", user.name, user.telegram_id, user.role);
        }
    }

    Ok(())
}
