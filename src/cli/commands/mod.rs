use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

/// Flag accepting repeats as well as comma-separated values
fn list_arg(id: &'static str, env: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .action(ArgAction::Append)
        .env(env)
        .help(help)
        .long(id)
        .value_delimiter(',')
        .value_name("VALUE")
}

/// Pure clap command definitions with zero business logic
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("kubeconfig")
                .env("CERTPULSE_KUBECONFIG")
                .help("Path to a kubeconfig file (default: in-cluster config, $KUBECONFIG or ~/.kube/config)")
                .long("kubeconfig")
                .short('k')
                .value_name("PATH")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new("polling-period")
                .default_value("3600")
                .env("CERTPULSE_POLLING_PERIOD")
                .help("number of seconds between checks")
                .long("polling-period")
                .short('i')
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("listen")
                .env("CERTPULSE_LISTEN")
                .help("IP address to bind to (default: [::]:port, accepts both IPv6 and IPv4)")
                .long("listen")
                .long_help(
                    "IP address to bind to:\n\
                    Not specified (default) binds to [::]:port which accepts both IPv6 and IPv4 connections.\n\
                    Falls back to 0.0.0.0:port if IPv6 is unavailable.\n\n\
                    Specific IPv4 examples: '0.0.0.0', '127.0.0.1'\n\
                    Specific IPv6: '::', '::1'"
                )
                .short('l')
                .value_name("IP"),
        )
        .arg(
            Arg::new("port")
                .default_value("8080")
                .env("CERTPULSE_PORT")
                .help("listening port for the metrics endpoint")
                .long("port")
                .short('p')
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("metrics-path")
                .default_value("/metrics")
                .env("CERTPULSE_METRICS_PATH")
                .help("HTTP path serving the metrics")
                .long("metrics-path")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("verbose")
                .action(ArgAction::Count)
                .help("increase log verbosity (-v info, -vv debug, -vvv trace)")
                .long("verbose")
                .short('v'),
        )
        .arg(list_arg(
            "secrets-include-glob",
            "CERTPULSE_SECRETS_INCLUDE_GLOB",
            "glob of Secret data keys to export, e.g. '*.crt' (Secrets are not checked without one)",
        ))
        .arg(list_arg(
            "secrets-exclude-glob",
            "CERTPULSE_SECRETS_EXCLUDE_GLOB",
            "glob of Secret data keys to skip, e.g. '*.key'",
        ))
        .arg(list_arg(
            "secrets-label-selector",
            "CERTPULSE_SECRETS_LABEL_SELECTOR",
            "label selector for Secrets; one list call is made per selector",
        ))
        .arg(list_arg(
            "secrets-annotation-selector",
            "CERTPULSE_SECRETS_ANNOTATION_SELECTOR",
            "only check Secrets carrying at least one of these annotation keys",
        ))
        .arg(list_arg(
            "secrets-namespace",
            "CERTPULSE_SECRETS_NAMESPACE",
            "namespaces to list Secrets in (default: all)",
        ))
        .arg(list_arg(
            "secrets-include-type",
            "CERTPULSE_SECRETS_INCLUDE_TYPE",
            "only check Secrets of these types, e.g. 'kubernetes.io/tls'",
        ))
        .arg(list_arg(
            "configmaps-include-glob",
            "CERTPULSE_CONFIGMAPS_INCLUDE_GLOB",
            "glob of ConfigMap data keys to export (ConfigMaps are not checked without one)",
        ))
        .arg(list_arg(
            "configmaps-exclude-glob",
            "CERTPULSE_CONFIGMAPS_EXCLUDE_GLOB",
            "glob of ConfigMap data keys to skip",
        ))
        .arg(list_arg(
            "configmaps-label-selector",
            "CERTPULSE_CONFIGMAPS_LABEL_SELECTOR",
            "label selector for ConfigMaps; one list call is made per selector",
        ))
        .arg(list_arg(
            "configmaps-annotation-selector",
            "CERTPULSE_CONFIGMAPS_ANNOTATION_SELECTOR",
            "only check ConfigMaps carrying at least one of these annotation keys",
        ))
        .arg(list_arg(
            "configmaps-namespace",
            "CERTPULSE_CONFIGMAPS_NAMESPACE",
            "namespaces to list ConfigMaps in (default: all)",
        ))
}
