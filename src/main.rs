// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use message_signer::config::{self, ConfigError, StorageConfig};
use message_signer::logging;
use message_signer::pipeline::{MessagePipeline, PipelineError, SignRequest};
use message_signer::signature::{verify, LocalWalletSigner};
use message_signer::storage::{PersistenceProvider, StorageError, StorageRouter};

#[derive(Parser)]
#[command(name = "message-signer")]
#[command(about = "Sign messages, verify EIP-191 signatures and manage signed-message history")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a message with the configured key, verify it and store the record
    Sign {
        message: String,
        /// Owner the record is filed under (defaults to the signer address)
        #[arg(long)]
        owner: Option<String>,
        /// Address the signature must recover to (defaults to the owner)
        #[arg(long, conflicts_with = "any_signer")]
        expect: Option<String>,
        /// Accept whichever address the signature recovers to
        #[arg(long)]
        any_signer: bool,
    },
    /// Verify a signature over a message
    Verify {
        message: String,
        signature: String,
        /// Address the signature must recover to
        expected: Option<String>,
    },
    /// Show stored history
    History {
        /// Owner address (defaults to the signer address)
        #[arg(long)]
        owner: Option<String>,
    },
    /// Delete stored history
    Clear {
        /// Owner address (defaults to the signer address)
        #[arg(long)]
        owner: Option<String>,
    },
    /// Probe every configured storage provider
    Health,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

/// Run one command. `Ok(false)` means the command ran but the answer was
/// negative (rejected signature, unhealthy storage).
async fn run(command: Commands) -> Result<bool, CliError> {
    match command {
        Commands::Sign {
            message,
            owner,
            expect,
            any_signer,
        } => {
            let signer = config::signer_from_env()?;
            let router = build_router()?;
            let owner = owner.unwrap_or_else(|| signer.address());

            let mut request = SignRequest::new(owner, message);
            request = match (expect, any_signer) {
                (Some(expected), _) => request.expecting(expected),
                (None, true) => request,
                (None, false) => request.bound_to_owner(),
            };

            let pipeline = MessagePipeline::new(Arc::new(signer), router);
            let outcome = pipeline.sign_and_verify(request).await?;
            if let Some(err) = &outcome.persist_error {
                eprintln!("warning: record not persisted: {err}");
            }
            print_json(&outcome)?;
            Ok(outcome.is_verified())
        }
        Commands::Verify {
            message,
            signature,
            expected,
        } => {
            let result = verify(&message, &signature, expected.as_deref());
            print_json(&result)?;
            Ok(result.is_valid)
        }
        Commands::History { owner } => {
            let owner = resolve_owner(owner)?;
            let records = build_router()?.list(&owner).await?;
            print_json(&records)?;
            Ok(true)
        }
        Commands::Clear { owner } => {
            let owner = resolve_owner(owner)?;
            build_router()?.delete_all(&owner).await?;
            tracing::info!(owner = %owner, "history deleted");
            Ok(true)
        }
        Commands::Health => {
            let report = build_router()?.health_report().await;
            print_json(&report)?;
            Ok(report.iter().any(|status| status.healthy))
        }
    }
}

fn build_router() -> Result<Arc<StorageRouter>, ConfigError> {
    let config = StorageConfig::from_env()?;
    Ok(Arc::new(StorageRouter::from_config(&config)?))
}

fn resolve_owner(owner: Option<String>) -> Result<String, ConfigError> {
    match owner {
        Some(owner) => Ok(owner),
        None => config::signer_from_env().map(|signer: LocalWalletSigner| signer.address()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
