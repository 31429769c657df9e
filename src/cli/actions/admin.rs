use crate::{
    api::{self, Storage},
    cli::commands::admin::Task,
    email::LogEmailDispatcher,
    model::Role,
    service::{AdminSeed, AuthConfig, Secrets, Services},
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub storage: Storage,
    pub auth_config: AuthConfig,
    pub secrets: Secrets,
    pub task: Task,
}

/// Execute an admin maintenance task against the configured storage.
/// # Errors
/// Returns an error if storage cannot be opened or the task fails.
pub async fn execute(args: Args) -> Result<()> {
    if args.storage == Storage::Memory {
        warn!("Admin task runs against in-memory storage, changes are discarded on exit");
    }
    let (backends, _) = api::connect(args.storage, Arc::new(LogEmailDispatcher)).await?;
    let services = Services::build(args.auth_config, backends, args.secrets)?;
    run(&services, args.task).await
}

async fn run(services: &Services, task: Task) -> Result<()> {
    match task {
        Task::Create {
            email,
            username,
            display_name,
            password,
        } => {
            let admin = services
                .auth
                .create_admin(AdminSeed {
                    email,
                    username,
                    display_name,
                    password: password.expose_secret().to_string(),
                })
                .await
                .context("Failed to create admin")?;
            info!(principal_id = %admin.id, "admin created");
            println!("{}\t{}\t{}", admin.id, admin.email, admin.username);
        }
        Task::List => {
            let admins = services
                .registry
                .list_by_role(Role::Admin)
                .await
                .context("Failed to list admins")?;
            for admin in admins {
                let last_login = admin
                    .last_login_at
                    .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
                println!(
                    "{}\t{}\t{}\t{}",
                    admin.id, admin.email, admin.username, last_login
                );
            }
        }
        Task::ResetChallenge { email } => {
            let principal = services
                .auth
                .reset_challenge(&email)
                .await
                .with_context(|| format!("Failed to reset challenge for {email}"))?;
            println!("challenge cleared for {}", principal.email);
        }
    }
    Ok(())
}
