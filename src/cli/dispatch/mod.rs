use crate::{checker::CheckerConfig, cli::actions::Action, monitor::MonitorSettings};
use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use std::{net::IpAddr, path::PathBuf, time::Duration};

fn many(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

/// Build the checker configuration for the flags sharing `prefix`
fn checker_config(matches: &ArgMatches, prefix: &str, period: Duration) -> Result<CheckerConfig> {
    CheckerConfig {
        period,
        label_selectors: many(matches, &format!("{prefix}-label-selector")),
        annotation_selectors: many(matches, &format!("{prefix}-annotation-selector")),
        namespaces: many(matches, &format!("{prefix}-namespace")),
        include_globs: many(matches, &format!("{prefix}-include-glob")),
        exclude_globs: many(matches, &format!("{prefix}-exclude-glob")),
        resource_type_allowlist: if prefix == "secrets" {
            many(matches, "secrets-include-type")
        } else {
            Vec::new()
        },
    }
    .validate()
    .with_context(|| format!("Invalid {prefix} configuration"))
}

/// Convert `ArgMatches` into typed Action enum with validation
///
/// # Errors
///
/// Returns an error if an argument is invalid or no checker is enabled
pub fn dispatch(matches: &ArgMatches) -> Result<Action> {
    let kubeconfig = matches.get_one::<PathBuf>("kubeconfig").cloned();

    let period = Duration::from_secs(
        matches
            .get_one::<u64>("polling-period")
            .copied()
            .unwrap_or(3600),
    );

    // Extract and validate listen address
    let listen = matches
        .get_one::<String>("listen")
        .map(|addr| {
            addr.parse::<IpAddr>()
                .with_context(|| format!("Invalid IP address: {addr}"))
        })
        .transpose()?;

    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let metrics_path = matches
        .get_one::<String>("metrics-path")
        .map_or_else(|| "/metrics".to_string(), |path| path.trim().to_string());
    if !metrics_path.starts_with('/') {
        bail!("Invalid metrics path '{metrics_path}': must start with '/'");
    }

    let secrets = checker_config(matches, "secrets", period)?;
    let config_maps = checker_config(matches, "configmaps", period)?;

    if !secrets.is_enabled() && !config_maps.is_enabled() {
        bail!(
            "nothing to monitor: set --secrets-include-glob and/or --configmaps-include-glob"
        );
    }

    Ok(Action::Monitor(MonitorSettings {
        kubeconfig,
        listen,
        port,
        metrics_path,
        secrets,
        config_maps,
    }))
}
