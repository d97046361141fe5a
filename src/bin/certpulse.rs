use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    certpulse::cli::start().await
}
