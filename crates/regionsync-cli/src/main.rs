use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "regionsync",
    about = "regionsync: dashboard region layout sync tooling",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or edit a durable offline queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Scaffold or inspect a sync configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Check grid geometry
    Geometry {
        #[command(subcommand)]
        action: GeometryAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Print pending mutations as JSON lines, oldest first
    List {
        /// Queue database file
        #[arg(short, long)]
        queue: PathBuf,
        /// Only show mutations for this layout
        #[arg(short, long)]
        layout: Option<String>,
    },
    /// Remove one pending mutation by sequence number
    Drop {
        #[arg(short, long)]
        queue: PathBuf,
        seq: u64,
    },
    /// Remove every pending mutation
    Purge {
        #[arg(short, long)]
        queue: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file with every default spelled out
    Init {
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show {
        /// Config file; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum GeometryAction {
    /// Clamp a placement into the grid and print the result
    Clamp {
        #[arg(long, allow_negative_numbers = true)]
        row: i32,
        #[arg(long, allow_negative_numbers = true)]
        col: i32,
        /// Defaults to the configured default span
        #[arg(long, allow_negative_numbers = true)]
        row_span: Option<i32>,
        #[arg(long, allow_negative_numbers = true)]
        col_span: Option<i32>,
        /// Config file supplying default spans
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("regionsync=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Queue { action } => match action {
            QueueAction::List { queue, layout } => {
                commands::queue::list(&queue, layout.as_deref())
            }
            QueueAction::Drop { queue, seq } => commands::queue::drop_entry(&queue, seq),
            QueueAction::Purge { queue } => commands::queue::purge(&queue),
        },
        Commands::Config { action } => match action {
            ConfigAction::Init { out, force } => commands::config::init(out.as_deref(), force),
            ConfigAction::Show { config } => commands::config::show(config.as_deref()),
        },
        Commands::Geometry { action } => match action {
            GeometryAction::Clamp {
                row,
                col,
                row_span,
                col_span,
                config,
            } => commands::geometry::clamp(row, col, row_span, col_span, config.as_deref()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_queue_list() {
        let cli = Cli::try_parse_from([
            "regionsync", "queue", "list", "--queue", "/tmp/q.redb", "--layout", "layout-1",
        ])
        .unwrap();
        let Commands::Queue {
            action: QueueAction::List { queue, layout },
        } = cli.command
        else {
            panic!("expected queue list");
        };
        assert_eq!(queue, PathBuf::from("/tmp/q.redb"));
        assert_eq!(layout.as_deref(), Some("layout-1"));
    }

    #[test]
    fn geometry_accepts_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "regionsync", "geometry", "clamp", "--row", "-2", "--col", "-5", "--col-span", "3",
        ])
        .unwrap();
        let Commands::Geometry {
            action: GeometryAction::Clamp { row, col, row_span, col_span, .. },
        } = cli.command
        else {
            panic!("expected geometry clamp");
        };
        assert_eq!((row, col), (-2, -5));
        assert_eq!(row_span, None);
        assert_eq!(col_span, Some(3));
    }

    #[test]
    fn queue_drop_requires_seq() {
        assert!(Cli::try_parse_from(["regionsync", "queue", "drop", "--queue", "q.redb"]).is_err());
    }
}
