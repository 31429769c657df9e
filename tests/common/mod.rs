//! Shared wiring for the flow tests: in-memory storage, a recording mail
//! dispatcher and a clock the test moves by hand.

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use turnstile::{
    clock::ManualClock,
    credential::HashCost,
    email::MemoryEmailDispatcher,
    model::Principal,
    registry::MemoryAccountRegistry,
    rewards::MemoryRewardLedger,
    service::{AdminSeed, AuthConfig, AuthService, Backends, Registration, Secrets, Services},
};

pub const FRONTEND: &str = "https://shop.example";
pub const PASSWORD: &str = "correct horse";
pub const ADMIN_PASSWORD: &str = "admin password";

pub struct TestContext {
    pub services: Services,
    pub mail: Arc<MemoryEmailDispatcher>,
    pub clock: Arc<ManualClock>,
}

impl TestContext {
    pub fn new() -> Result<Self> {
        Self::with_config(AuthConfig::new(FRONTEND.to_string()))
    }

    pub fn with_config(config: AuthConfig) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(start()));
        let mail = Arc::new(MemoryEmailDispatcher::new());
        let services = Services::build(
            config.with_hash_cost(HashCost::fast()),
            Backends {
                registry: Arc::new(MemoryAccountRegistry::with_clock(clock.clone())),
                ledger: Arc::new(MemoryRewardLedger::new()),
                dispatcher: mail.clone(),
                clock: clock.clone(),
            },
            Secrets {
                pepper: SecretString::from("integration-pepper"),
                token_seed: None,
            },
        )?;
        Ok(Self {
            services,
            mail,
            clock,
        })
    }

    pub fn auth(&self) -> &AuthService {
        &self.services.auth
    }

    /// Six-digit code from the newest mail sent to `email`.
    pub fn last_code(&self, email: &str) -> Result<String> {
        let sent = self.mail.sent_to(email);
        let body = &sent.last().context("no mail sent")?.html_body;
        let start = body.find("<strong>").context("mail carries no code")? + "<strong>".len();
        body.get(start..start + 6)
            .map(str::to_string)
            .context("code too short")
    }

    pub async fn register(&self, email: &str, username: &str, vendor_track: bool) -> Result<()> {
        self.auth()
            .register(Registration {
                email: email.to_string(),
                username: username.to_string(),
                password: PASSWORD.to_string(),
                display_name: "Ada Lovelace".to_string(),
                mobile_number: None,
                vendor_track,
            })
            .await?;
        Ok(())
    }

    /// Register and confirm the mailed code, returning the session token.
    pub async fn verified_user(
        &self,
        email: &str,
        username: &str,
        vendor_track: bool,
    ) -> Result<String> {
        self.register(email, username, vendor_track).await?;
        let code = self.last_code(email)?;
        let grant = self.auth().verify_registration(email, &code).await?;
        Ok(grant.token)
    }

    pub async fn admin(&self, email: &str) -> Result<Principal> {
        let username = email.split('@').next().unwrap_or("admin").to_string();
        Ok(self
            .auth()
            .create_admin(AdminSeed {
                email: email.to_string(),
                username,
                display_name: "Operator".to_string(),
                password: ADMIN_PASSWORD.to_string(),
            })
            .await?)
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}
