//! CLI argument definitions for murmur.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// murmur -- a Telegram chat companion backed by Gemini.
#[derive(Parser)]
#[command(
    name = "murmur",
    version,
    about = "murmur -- Telegram chat companion backed by Gemini",
    long_about = "Streams Gemini replies into Telegram chats as a sequence of paced, \
                  human-looking messages, with per-chat history kept in SQLite."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Telegram bot gateway.
    Bot {
        /// Telegram long-polling timeout in seconds. Overrides the config file.
        #[arg(long)]
        poll_timeout: Option<u64>,
    },

    /// Show configuration, credentials and database status.
    Status,

    /// Manage known Telegram users.
    Users {
        #[command(subcommand)]
        action: UserAction,
    },
}

/// Actions for managing users.
#[derive(Subcommand)]
pub enum UserAction {
    /// List all users.
    List,
    /// Change a user's role.
    Role {
        /// Telegram user id.
        telegram_id: i64,
        /// Role: user, developer, or admin.
        role: String,
    },
}
