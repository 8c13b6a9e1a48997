use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "plasmabridge",
    about = "Move tensors between a shared object store and device memory",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Session configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upload raw files as one sealed object
    Put(PutArgs),
    /// Download an object as a tensor
    Get(GetArgs),
    /// Show an object's header
    Inspect(InspectArgs),
    /// Compute the header size for a dtype and shape
    HeaderSize(HeaderSizeArgs),
    /// Print the object id derived from a name
    Id(IdArgs),
}

#[derive(Args)]
pub struct PutArgs {
    /// Store directory
    #[arg(long)]
    pub store: Option<String>,
    /// Object name or 40-digit hex id
    #[arg(long)]
    pub id: String,
    #[arg(long, default_value = "float32")]
    pub dtype: String,
    /// Files holding raw little-endian elements, concatenated in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args)]
pub struct GetArgs {
    #[arg(long)]
    pub store: Option<String>,
    #[arg(long)]
    pub id: String,
    /// Output dtype
    #[arg(long, default_value = "float32")]
    pub dtype: String,
    /// Lookup timeout; negative waits forever
    #[arg(long, allow_hyphen_values = true)]
    pub timeout_ms: Option<i64>,
    /// Write the payload bytes here instead of printing a preview
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct InspectArgs {
    #[arg(long)]
    pub store: Option<String>,
    #[arg(long)]
    pub id: String,
}

#[derive(Args)]
pub struct HeaderSizeArgs {
    #[arg(long)]
    pub dtype: String,
    /// Comma-separated dimensions, e.g. 4,8
    #[arg(long, default_value = "")]
    pub shape: String,
}

#[derive(Args)]
pub struct IdArgs {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_put() {
        let cli = Cli::try_parse_from([
            "plasmabridge", "put", "--store", "/tmp/s", "--id", "x", "--dtype", "int32", "a.bin", "b.bin",
        ])
        .unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.store.as_deref(), Some("/tmp/s"));
            assert_eq!(args.dtype, "int32");
            assert_eq!(args.files.len(), 2);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn put_requires_files() {
        assert!(Cli::try_parse_from(["plasmabridge", "put", "--id", "x"]).is_err());
    }

    #[test]
    fn parse_get_with_negative_timeout() {
        let cli =
            Cli::try_parse_from(["plasmabridge", "get", "--id", "x", "--timeout-ms", "-1"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.timeout_ms, Some(-1));
            assert_eq!(args.dtype, "float32");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from(["plasmabridge", "-vv", "id", "weights", "--format", "json"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Id(_)));
    }

    #[test]
    fn parse_header_size() {
        let cli = Cli::try_parse_from(["plasmabridge", "header-size", "--dtype", "f64", "--shape", "4,8"])
            .unwrap();
        if let Command::HeaderSize(args) = cli.command {
            assert_eq!(args.shape, "4,8");
        } else {
            panic!("wrong command");
        }
    }
}
