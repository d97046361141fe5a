use super::{commands, dispatch, telemetry};
use anyhow::Result;

/// Main orchestrator - Pure orchestration with no business logic
///
/// 1. Parse: Extract CLI arguments
/// 2. Initialize Telemetry: `-v` count picks the log level
/// 3. Dispatch: Convert `ArgMatches` into typed Action enum
/// 4. Execute: Run the action's business logic
///
/// # Errors
///
/// Returns an error if any step in the flow fails
pub async fn start() -> Result<()> {
    let matches = commands::new().get_matches();

    telemetry::init(matches.get_count("verbose"))?;

    let action = dispatch::dispatch(&matches)?;

    action.execute().await?;

    Ok(())
}
