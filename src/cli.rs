use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "packetfill",
    version,
    about = "Extract, validate and overlay subscription packets onto template PDFs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process one case per packet against a template.
    Run(RunArgs),
    /// Inspect and edit content-addressed template configurations.
    Template(TemplateArgs),
    /// Summarise recorded cases.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long = "packet", required = true)]
    pub packets: Vec<PathBuf>,

    #[arg(long)]
    pub template: PathBuf,

    /// Only valid with a single packet.
    #[arg(long)]
    pub case_id: Option<String>,

    #[arg(long, default_value = "artifacts")]
    pub artifacts_root: PathBuf,

    #[arg(long)]
    pub outbox: Option<PathBuf>,

    /// Command that reads a packet on stdin and prints the extraction JSON.
    #[arg(long, env = "PACKETFILL_EXTRACTOR_CMD")]
    pub extractor_cmd: Option<String>,

    /// Replay a stored extraction response; takes precedence over the command.
    #[arg(long)]
    pub extracted_json: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct TemplateArgs {
    #[arg(long, default_value = "artifacts", global = true)]
    pub artifacts_root: PathBuf,

    #[command(subcommand)]
    pub command: TemplateCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TemplateCommands {
    List,
    Show {
        #[arg(long)]
        template_id: String,
    },
    SetFields {
        #[arg(long)]
        template_id: String,

        /// JSON array of field mappings.
        #[arg(long)]
        fields_json: PathBuf,
    },
    Hints {
        #[arg(long)]
        template: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "artifacts")]
    pub artifacts_root: PathBuf,

    #[arg(long)]
    pub case_id: Option<String>,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
