use crate::project::updater::UpdateOptions;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, about, bin_name = "cov", disable_version_flag = true)]
pub struct Arguments {
    /// Path to the .csproj/.vbproj file holding the ClickOnce settings
    pub project_file: PathBuf,
    /// Explicit version to apply, as Major.Minor.Build[.Revision]
    #[arg(long, short = 'V')]
    pub version: Option<String>,
    /// CI build number: Build becomes id / 65536 and Revision id % 65536
    #[arg(long, short, conflicts_with = "increment_revision")]
    pub build_id: Option<u64>,
    #[arg(long, short)]
    pub increment_revision: bool,
    /// Also set MinimumRequiredVersion to the new version and force clients to update
    #[arg(long, short = 'm')]
    pub update_min_version: bool,
    #[arg(long)]
    pub publish_url: Option<String>,
    #[arg(long)]
    pub install_url: Option<String>,
    /// Resolve and report the new versions without writing the file
    #[arg(long, short = 'n')]
    pub dry_run: bool,
    #[arg(long, short)]
    pub verbose: bool,
}

impl Arguments {
    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            version: self.version.clone(),
            build_system_id: self.build_id,
            increment_revision: self.increment_revision,
            update_minimum_required_version: self.update_min_version,
            publish_url: self.publish_url.clone(),
            install_url: self.install_url.clone(),
            dry_run: self.dry_run,
        }
    }
}
