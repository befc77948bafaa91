use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SourceKind {
    /// One filesystem image (raw or split parts ingested separately)
    Image,
    /// A folder's worth of image files; non-filesystem inputs fall back to
    /// a logical file set
    ImageSet,
    /// A raw memory image
    Memory,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Case database file (created when missing)
    #[arg(short, long)]
    pub case_db: PathBuf,

    /// Input image or evidence files, in order (order matters for multi-part images)
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<PathBuf>,

    /// Kind of acquisition being ingested
    #[arg(long, value_enum, default_value_t = SourceKind::Image)]
    pub kind: SourceKind,

    /// Device identifier, unique across cases (generated when omitted)
    #[arg(long)]
    pub device_id: Option<String>,

    /// IANA time zone id used for timestamps inside the acquisition
    #[arg(long)]
    pub time_zone: Option<String>,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Analysis plugins to run after a memory image is added (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub plugins: Option<Vec<String>>,

    /// Skip filesystem detection and stage inputs as raw images
    #[arg(long)]
    pub no_detect_filesystems: bool,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
