pub mod admin;
pub mod server;

// Internal "interpreter" for `Action`.
mod run;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Admin(admin::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
