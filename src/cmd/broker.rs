//! Standalone lock broker process.

use anyhow::Result;

pub async fn cmd_broker(port: u16) -> Result<()> {
    foreman::coordination::serve_standalone(port).await
}
