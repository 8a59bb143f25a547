// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use ephemeral_broker::aws::AwsPlatform;
use ephemeral_broker::configuration::BrokerOptions;
use ephemeral_broker::models::{CredentialSet, Principal};
use ephemeral_broker::policy::PolicyDocument;
use ephemeral_broker::{Broker, IdentityPlatform};
use tokio::process::Command;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        .with_ansi(false)
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // get configuration options from arguments and environment variables
    let options = BrokerOptions::parse();

    tracing::info!("[broker] {:?}", &options);

    match run(options).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("[broker] {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(options: BrokerOptions) -> Result<ExitCode> {
    let config = options.broker_config()?;

    let policy = std::fs::read_to_string(&options.policy_file)
        .with_context(|| format!("unable to read {}", options.policy_file.display()))?;
    let policy = PolicyDocument::from_json(&policy)?;

    let platform = Arc::new(AwsPlatform::load(options.region.clone(), options.profile.clone()).await);

    let caller = match &options.caller_arn {
        Some(arn) => Principal::new(arn),
        None => platform.caller_principal().await?,
    };
    tracing::info!("[broker] caller principal: {}", caller);

    let broker = Broker::new(platform.clone(), config.clone())?;
    let session_duration = config.session_duration;
    let command = options.command.clone();

    let result = broker
        .with_temporary_credentials_until(
            &caller,
            &policy,
            session_duration,
            interrupted(),
            |credentials| {
                let platform = platform.clone();
                async move {
                    if command.is_empty() {
                        let arn = platform.verify_credentials(&credentials).await?;
                        tracing::info!("[broker] temporary credentials resolve to {}", arn);
                        Ok(ExitCode::SUCCESS)
                    } else {
                        exec(&command, &credentials).await
                    }
                }
            },
        )
        .await;

    let leftover = platform.list_identities(&config.name_prefix).await;
    match leftover {
        Ok(names) if names.is_empty() => tracing::info!("[broker] no temporary roles remain"),
        Ok(names) => tracing::warn!("[broker] roles with prefix still present: {:?}", names),
        Err(err) => tracing::warn!("[broker] unable to list roles: {}", err),
    }

    Ok(result?)
}

/// Completes on Ctrl-C. Never completes if the handler cannot be installed.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::warn!("[broker] interrupted"),
        Err(err) => {
            tracing::warn!("[broker] unable to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

/// Runs `command` with the credentials exported. Dropping the returned future
/// kills the child.
async fn exec(command: &[String], credentials: &CredentialSet) -> Result<ExitCode> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;

    let status = Command::new(program)
        .args(args)
        .envs(credentials.env_vars())
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("unable to start {program}"))?;

    tracing::info!("[broker] {} exited with {}", program, status);
    Ok(status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from))
}
