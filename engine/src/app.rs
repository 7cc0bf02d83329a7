//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::data::{self, QueryConnection};
use crate::domain::execution::{FilterStatus, ProgressReporter};
use crate::domain::expression::{
    BoundingBox, ProviderType, sanitize_subset_string, to_sql, validate,
};
use crate::domain::optimizer::{QueryOptimizer, TableRef};

/// Arguments of the `filter` command
struct FilterArgs {
    table: TableRef,
    attribute: Option<String>,
    spatial: Option<String>,
    bbox: Option<BoundingBox>,
    limit: Option<u64>,
}

pub struct CoreApp {
    pub config: AppConfig,
    pub connection: Arc<dyn QueryConnection>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Translate {
                expression,
                provider,
                geometry_column,
            }) => Self::translate(&expression, &provider, &geometry_column),
            Some(Commands::Validate { expression }) => Self::validate(&expression),
            Some(Commands::Filter {
                table,
                schema,
                geometry_column,
                primary_key,
                attribute,
                spatial,
                bbox,
                srid,
                limit,
            }) => {
                let mut table = TableRef::new(table, geometry_column, primary_key);
                if let Some(schema) = schema {
                    table = table.with_schema(schema);
                }
                let args = FilterArgs {
                    table,
                    attribute,
                    spatial,
                    bbox: bbox.map(|b| match srid {
                        Some(srid) => b.with_srid(srid),
                        None => b,
                    }),
                    limit,
                };
                let app = Self::init(&cli_config).await?;
                app.filter(args).await
            }
            None => {
                cli::print_help()?;
                Ok(())
            }
        }
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let connection = data::connect(&config.database).await.with_context(|| {
            format!("Failed to open {} database", config.database.backend.name())
        })?;
        tracing::debug!(backend = connection.backend().name(), "Database connected");
        Ok(Self { config, connection })
    }

    fn translate(expression: &str, provider: &str, geometry_column: &str) -> Result<()> {
        let provider_type = ProviderType::from_host_provider(provider);
        if provider_type == ProviderType::Unknown {
            anyhow::bail!(
                "Unknown provider '{}'. Valid options: postgresql, spatialite, ogr, memory",
                provider
            );
        }

        let validation = validate(expression);
        let sql = if validation.is_valid {
            Some(to_sql(expression, provider_type, geometry_column)?)
        } else {
            None
        };
        let output = json!({
            "expression": expression,
            "provider": provider_type.as_str(),
            "sql": sql,
            "validation": validation,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    fn validate(expression: &str) -> Result<()> {
        let validation = validate(expression);
        println!("{}", serde_json::to_string_pretty(&validation)?);
        if !validation.is_valid {
            anyhow::bail!(
                "{}",
                validation
                    .error_message
                    .unwrap_or_else(|| "Expression is invalid".to_string())
            );
        }
        Ok(())
    }

    async fn filter(&self, args: FilterArgs) -> Result<()> {
        let provider = ProviderType::from(self.connection.backend());
        let attribute = args
            .attribute
            .as_deref()
            .map(sanitize_subset_string)
            .filter(|e| !e.trim().is_empty())
            .map(|expression| -> Result<String> {
                validate(&expression)
                    .into_result()
                    .with_context(|| format!("Invalid attribute expression: {}", expression))?;
                Ok(to_sql(&expression, provider, &args.table.geometry_column)?)
            })
            .transpose()?;

        let optimizer = QueryOptimizer::new(
            self.connection.clone(),
            args.table,
            self.config.optimizer.clone(),
        );

        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling filter");
                on_ctrl_c.cancel();
            }
        });

        let progress = if self.config.debug {
            ProgressReporter::new(|percent, message| {
                tracing::debug!(percent, step = message, "Filter progress");
            })
        } else {
            ProgressReporter::none()
        };

        let result = optimizer
            .filter_with_limit(
                attribute.as_deref(),
                args.spatial.as_deref(),
                args.bbox.as_ref(),
                args.limit,
                &progress,
                &cancel,
            )
            .await;
        println!("{}", serde_json::to_string_pretty(&result)?);

        match result.status {
            FilterStatus::Success => Ok(()),
            FilterStatus::Cancelled => anyhow::bail!("Filter cancelled"),
            FilterStatus::Error => anyhow::bail!(
                "{}",
                result
                    .error_message
                    .unwrap_or_else(|| "Filter failed".to_string())
            ),
        }
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }
}
