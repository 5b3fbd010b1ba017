// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use std::collections::HashSet;

use opcc_config::{load_config, ClientConfig};

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Loads and validates the configuration, then prints a summary.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;
    let config = load_config(config_path)
        .map_err(|e| BinError::from(e).with_context(format!("{} is invalid", config_path.display())))?;
    let warnings = collect_warnings(&config);

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Client ID:     {}", config.client.id);
            println!(
                "  Servers:       {} ({} enabled)",
                config.servers.len(),
                config.enabled_servers().count()
            );
            println!("  Tags:          {}", config.tags.len());
            println!("  Subscriptions: {}", config.subscriptions.len());
            println!(
                "  Rate limit:    {}",
                if config.write.rate_limit.enabled { "enabled" } else { "disabled" }
            );
            println!("  Buffer:        {} records", config.buffer.capacity);

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!("{}", to_json(&config)?);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "client_id": config.client.id,
                    "servers": config.servers.len(),
                    "enabled_servers": config.enabled_servers().count(),
                    "tags": config.tags.len(),
                    "subscriptions": config.subscriptions.len(),
                    "rate_limit_enabled": config.write.rate_limit.enabled,
                    "buffer_capacity": config.buffer.capacity,
                },
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            println!("{}", to_json(&output)?);
        }
    }

    Ok(())
}

fn to_json(value: &impl serde::Serialize) -> BinResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| BinError::output(format!("failed to render JSON: {}", e)))
}

/// Problems that do not make the configuration invalid.
pub(crate) fn collect_warnings(config: &ClientConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.servers.is_empty() {
        warnings.push("No servers configured".to_string());
    }
    for server in config.servers.iter().filter(|s| !s.enabled) {
        warnings.push(format!("Server '{}' is disabled", server.id));
    }
    for (server_id, issue) in config.server_issues() {
        warnings.push(format!("Server '{}' will fail to connect: {}", server_id, issue));
    }

    let subscribed: HashSet<_> = config
        .subscriptions
        .iter()
        .flat_map(|s| s.items.iter().map(|i| &i.tag_id))
        .collect();
    let unused = config
        .tags
        .iter()
        .filter(|t| !t.writable && !subscribed.contains(&t.id))
        .count();
    if unused > 0 {
        warnings.push(format!("{} read-only tag(s) are not subscribed", unused));
    }

    let critical = config.tags.iter().filter(|t| t.critical).count();
    if critical > 0 && !config.write.rate_limit.enabled {
        warnings.push(format!(
            "{} critical tag(s) are writable without rate limiting",
            critical
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    const CONFIG: &str = r#"
[client]
id = "line-1"

[[servers]]
id = "plc"
protocol = "ua"
endpoint = "opc.tcp://plc:4840"

[[servers]]
id = "spare"
protocol = "ua"
endpoint = "opc.tcp://spare:4840"
enabled = false

[[tags]]
id = "temp"
server_id = "plc"
address = "ns=2;s=Temp"
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_validate_valid_file() {
        let file = write_config(CONFIG);
        let cli = Cli::parse_from(["opcc", "-c", file.path().to_str().unwrap(), "validate"]);
        assert!(validate(&cli, ValidateArgs::default()).is_ok());
    }

    #[test]
    fn test_validate_reports_invalid_file() {
        let file = write_config("[[tags]]\nid = \"t\"\nserver_id = \"nowhere\"\naddress = \"x\"\n");
        let cli = Cli::parse_from(["opcc", "-c", file.path().to_str().unwrap(), "validate"]);
        let err = validate(&cli, ValidateArgs::default()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_warnings() {
        let file = write_config(CONFIG);
        let config = load_config(file.path()).unwrap();
        let warnings = collect_warnings(&config);
        assert!(warnings.iter().any(|w| w.contains("'spare' is disabled")));
        assert!(warnings.iter().any(|w| w.contains("1 read-only tag(s)")));
    }
}
