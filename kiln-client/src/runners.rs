//! Runner-related API endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use kiln_core::dto::runner::{RunnerInfo, VerifiedRunner, VerifyRunner};

impl CoordinatorClient {
    // =============================================================================
    // Runner Verification
    // =============================================================================

    /// Check a runner credential
    ///
    /// Runners call this once at startup to fail fast on a bad or paused
    /// credential.
    ///
    /// # Example
    /// ```no_run
    /// # use kiln_client::CoordinatorClient;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = CoordinatorClient::new("http://localhost:8080");
    /// let runner = client.verify_runner("my-runner-token", None).await?;
    /// println!("authenticated as {}", runner.description);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn verify_runner(
        &self,
        token: &str,
        info: Option<RunnerInfo>,
    ) -> Result<VerifiedRunner> {
        let url = format!("{}/api/v1/runners/verify", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&VerifyRunner {
                token: token.to_string(),
                info,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
