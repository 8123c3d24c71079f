//! Command implementations.
//!
//! Each handler returns the text it prints so the rendering can be tested
//! without capturing stdout. Logs go to stderr, keeping stdout pipeable
//! into a database client.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use dbsync_model::{BridgeRegistry, EventModelInfo, ModelDeclaration};
use dbsync_triggers::{dialect_for, TriggerSetup};
use dbsync_types::{Settings, SqlDialectKind};

use crate::cli::{Cli, Commands, SqlCommands};

/// Load layered settings and apply CLI overrides.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Parse and validate the model file given on the command line, falling
/// back to `model_path` from settings.
pub fn load_model(model: Option<&str>, settings: &Settings) -> Result<Vec<EventModelInfo>> {
    let Some(path) = model.or(settings.model_path.as_deref()) else {
        bail!("No model file given; pass --model or set model_path");
    };
    let declaration = ModelDeclaration::load(path)
        .with_context(|| format!("Failed to read model file {}", path))?;
    let infos = declaration
        .parse(&BridgeRegistry::with_builtins())
        .with_context(|| format!("Invalid event model in {}", path))?;
    info!(path, tables = infos.len(), "Loaded event model");
    Ok(infos)
}

/// Human readable summary of validated log tables.
pub fn describe_model(infos: &[EventModelInfo]) -> String {
    let mut out = String::new();
    for info in infos {
        let _ = writeln!(
            out,
            "{} -> {} (log id: {}, event type: {})",
            info.update_table_name(),
            info.original_table_name(),
            info.update_id_column(),
            info.event_type_column()
        );
        for id_info in info.id_infos() {
            let _ = writeln!(
                out,
                "  {} [{}] <- {} via {}",
                id_info.entity_class(),
                id_info.columns_in_update_table().join(", "),
                id_info.columns_in_original().join(", "),
                id_info.bridge().name()
            );
        }
    }
    let _ = write!(out, "{} log table(s) valid", infos.len());
    out
}

/// Setup or teardown statements, one per line, terminated with `;`.
pub fn render_sql(
    infos: &[EventModelInfo],
    settings: &Settings,
    dialect: Option<&str>,
    setup: bool,
) -> Result<String> {
    let kind = match dialect {
        Some(name) => name
            .parse::<SqlDialectKind>()
            .map_err(anyhow::Error::msg)
            .context("Invalid --dialect")?,
        None => settings.dialect,
    };
    let trigger_setup = TriggerSetup::new(
        Arc::from(dialect_for(kind, &settings.table_prefix)),
        settings.trigger_strategy,
    );
    let statements = if setup {
        trigger_setup
            .setup_statements(infos)
            .context("Failed to generate setup SQL")?
    } else {
        trigger_setup.teardown_statements(infos)
    };
    Ok(statements
        .iter()
        .map(|sql| format!("{};", sql))
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn render_settings(settings: &Settings) -> Result<String> {
    toml::to_string_pretty(settings).context("Failed to serialize settings")
}

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref())?;
    init_logging(&settings)?;

    let output = match cli.command {
        Commands::Validate { model } => describe_model(&load_model(model.as_deref(), &settings)?),
        Commands::Sql { command } => {
            let (model, dialect, setup) = match command {
                SqlCommands::Setup { model, dialect } => (model, dialect, true),
                SqlCommands::Teardown { model, dialect } => (model, dialect, false),
            };
            let infos = load_model(model.as_deref(), &settings)?;
            render_sql(&infos, &settings, dialect.as_deref(), setup)?
        }
        Commands::Settings => render_settings(&settings)?,
    };
    println!("{}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MODEL: &str = r#"
[[log_table]]
update_table = "place_updates"
original_table = "place"

[[log_table.members]]
name = "event_type"
event = true

[[log_table.members]]
name = "place_id"
id_for = { entity_class = "Place", columns_in_original = ["id"] }
"#;

    fn model_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_validate_describes_tables() {
        let file = model_file(MODEL);
        let infos = load_model(file.path().to_str(), &Settings::default()).unwrap();
        let summary = describe_model(&infos);
        assert!(summary.contains("place_updates -> place (log id: update_id, event type: event_type)"));
        assert!(summary.contains("Place [place_id] <- id via integer"));
        assert!(summary.ends_with("1 log table(s) valid"));
    }

    #[test]
    fn test_missing_model_path() {
        let err = load_model(None, &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("No model file given"));
    }

    #[test]
    fn test_invalid_model_rejected() {
        let file = model_file(
            r#"
[[log_table]]
update_table = "place"
original_table = "place"

[[log_table.members]]
name = "event_type"
event = true

[[log_table.members]]
name = "place_id"
id_for = { entity_class = "Place" }
"#,
        );
        let err = load_model(file.path().to_str(), &Settings::default()).unwrap_err();
        assert!(err.to_string().starts_with("Invalid event model"));
    }

    #[test]
    fn test_render_setup_sql_with_dialect_override() {
        let file = model_file(MODEL);
        let settings = Settings::default();
        let infos = load_model(file.path().to_str(), &settings).unwrap();

        let sql = render_sql(&infos, &settings, Some("postgres"), true).unwrap();
        let lines: Vec<&str> = sql.lines().collect();
        assert_eq!(lines[0], "CREATE SEQUENCE \"dbsync_unique_id_seq\";");
        assert!(lines.iter().all(|l| l.ends_with(';')));

        let sql = render_sql(&infos, &settings, None, false).unwrap();
        assert!(sql.ends_with("DROP TABLE IF EXISTS `dbsync_unique_id`;"));

        assert!(render_sql(&infos, &settings, Some("oracle"), true).is_err());
    }

    #[test]
    fn test_render_settings_as_toml() {
        let rendered = render_settings(&Settings::default()).unwrap();
        assert!(rendered.contains("poll_interval_ms = "));
        assert!(rendered.contains("dialect = \"mysql\""));
    }
}
