use clap::{CommandFactory, Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_CONFIG, ENV_DATABASE_BACKEND, ENV_DEBUG, ENV_POSTGRES_URL, ENV_SPATIALITE_EXTENSION,
    ENV_SQLITE_PATH,
};
use crate::data::Backend;
use crate::domain::expression::BoundingBox;

#[derive(Parser)]
#[command(name = "geofilter")]
#[command(version, about = "Attribute and spatial filtering for vector layers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Enable debug logging and plan summaries
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Database backend (sqlite or postgres)
    #[arg(long, global = true, env = ENV_DATABASE_BACKEND, value_parser = parse_backend)]
    pub backend: Option<Backend>,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = ENV_POSTGRES_URL)]
    pub postgres_url: Option<String>,

    /// SQLite / GeoPackage / SpatiaLite file
    #[arg(long, global = true, env = ENV_SQLITE_PATH)]
    pub sqlite_path: Option<PathBuf>,

    /// SpatiaLite extension to load (empty to skip)
    #[arg(long, global = true, env = ENV_SPATIALITE_EXTENSION)]
    pub spatialite_extension: Option<String>,
}

fn parse_backend(s: &str) -> Result<Backend, String> {
    match s.to_lowercase().as_str() {
        "sqlite" | "spatialite" | "gpkg" => Ok(Backend::Sqlite),
        "postgres" | "postgresql" | "postgis" => Ok(Backend::Postgres),
        _ => Err(format!(
            "Invalid database backend '{}'. Valid options: sqlite, postgres",
            s
        )),
    }
}

/// Parse `xmin,ymin,xmax,ymax`
pub fn parse_bbox(s: &str) -> Result<BoundingBox, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("Invalid bbox '{}': expected four numbers", s))?;
    let [xmin, ymin, xmax, ymax] = parts[..] else {
        return Err(format!(
            "Invalid bbox '{}': expected xmin,ymin,xmax,ymax",
            s
        ));
    };
    if xmin > xmax || ymin > ymax {
        return Err(format!("Invalid bbox '{}': min exceeds max", s));
    }
    Ok(BoundingBox::new(xmin, ymin, xmax, ymax))
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Translate a QGIS-style expression into SQL
    Translate {
        /// Expression to translate
        expression: String,

        /// Target provider (postgresql, spatialite, ogr, memory)
        #[arg(long, short = 'p', default_value = "postgresql")]
        provider: String,

        /// Geometry column substituted for $geometry
        #[arg(long, short = 'g', default_value = "geom")]
        geometry_column: String,
    },
    /// Check an expression for syntax errors
    Validate {
        /// Expression to check
        expression: String,
    },
    /// Plan and run a filter against a table, printing matching ids
    Filter {
        /// Table name
        #[arg(long, short = 't')]
        table: String,

        /// Schema (PostgreSQL only)
        #[arg(long)]
        schema: Option<String>,

        /// Geometry column
        #[arg(long, default_value = "geom")]
        geometry_column: String,

        /// Primary key column
        #[arg(long, default_value = "fid")]
        primary_key: String,

        /// Attribute expression (QGIS syntax)
        #[arg(long, short = 'a')]
        attribute: Option<String>,

        /// Spatial SQL predicate, used as given
        #[arg(long, short = 's')]
        spatial: Option<String>,

        /// Source extent for the bbox pre-filter: xmin,ymin,xmax,ymax
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Option<BoundingBox>,

        /// SRID of the bbox
        #[arg(long)]
        srid: Option<i32>,

        /// Return at most this many ids
        #[arg(long, short = 'l')]
        limit: Option<u64>,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub debug: bool,
    pub database_backend: Option<Backend>,
    pub postgres_url: Option<String>,
    pub sqlite_path: Option<PathBuf>,
    pub spatialite_extension: Option<String>,
}

/// Print top-level usage to stdout
pub fn print_help() -> std::io::Result<()> {
    Cli::command().print_help()
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        config: cli.config,
        debug: cli.debug,
        database_backend: cli.backend,
        postgres_url: cli.postgres_url,
        sqlite_path: cli.sqlite_path,
        spatialite_extension: cli.spatialite_extension,
    };
    (config, cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_aliases() {
        assert_eq!(parse_backend("SQLite").unwrap(), Backend::Sqlite);
        assert_eq!(parse_backend("gpkg").unwrap(), Backend::Sqlite);
        assert_eq!(parse_backend("postgis").unwrap(), Backend::Postgres);
        assert!(parse_backend("oracle").unwrap_err().contains("oracle"));
    }

    #[test]
    fn test_parse_bbox() {
        let bbox = parse_bbox("-10, -5.5, 10, 5.5").unwrap();
        assert_eq!(bbox.xmin, -10.0);
        assert_eq!(bbox.ymax, 5.5);
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
        assert!(parse_bbox("5,0,1,1").is_err());
    }

    #[test]
    fn test_filter_command_args() {
        let cli = Cli::try_parse_from([
            "geofilter",
            "--backend",
            "sqlite",
            "filter",
            "--table",
            "roads",
            "--attribute",
            "\"kind\" = 'primary'",
            "--bbox",
            "-1,-1,1,1",
            "--limit",
            "10",
        ])
        .unwrap();
        assert_eq!(cli.backend, Some(Backend::Sqlite));
        match cli.command {
            Some(Commands::Filter {
                table,
                attribute,
                bbox,
                limit,
                primary_key,
                ..
            }) => {
                assert_eq!(table, "roads");
                assert_eq!(attribute.as_deref(), Some("\"kind\" = 'primary'"));
                assert_eq!(bbox.unwrap().xmin, -1.0);
                assert_eq!(limit, Some(10));
                assert_eq!(primary_key, "fid");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
