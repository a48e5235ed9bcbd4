use anyhow::Result;
use clap::Parser;
use clickonce_version::{arguments::Arguments, project::updater};
use log::LevelFilter;

fn main() -> Result<()> {
    let args = Arguments::parse();
    pretty_env_logger::env_logger::builder()
        .filter_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .format_timestamp(None)
        .init();

    updater::update_file(&args.project_file, &args.update_options())?;
    Ok(())
}
