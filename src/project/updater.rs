use crate::project::{
    APPLICATION_REVISION, APPLICATION_VERSION, ClickOnceBlock, INSTALL_URL,
    MINIMUM_REQUIRED_VERSION, ProjectError, ProjectFile, PUBLISH_URL, UPDATE_ENABLED,
    UPDATE_REQUIRED, ensure_file,
};
use crate::version::{self, BaselineVersion, ClickOnceVersion, Overflow, ResolveRequest, VersionPart};
use anyhow::Result;
use log::{debug, info, warn};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Explicit `Major.Minor.Build[.Revision]` replacing the stored version.
    pub version: Option<String>,
    pub build_system_id: Option<u64>,
    pub increment_revision: bool,
    /// Copy the new version into `MinimumRequiredVersion` and force updates on.
    pub update_minimum_required_version: bool,
    pub publish_url: Option<String>,
    pub install_url: Option<String>,
    pub dry_run: bool,
}

impl UpdateOptions {
    pub fn is_noop(&self) -> bool {
        self.version.is_none()
            && self.build_system_id.is_none()
            && !self.increment_revision
            && !self.update_minimum_required_version
            && self.publish_url.is_none()
            && self.install_url.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUpdate {
    pub block: usize,
    pub label: String,
    pub version: ClickOnceVersion,
    pub minimum_required_version: Option<ClickOnceVersion>,
    pub overflows: Vec<Overflow>,
}

/// Loads `path`, applies `options` to each ClickOnce block and saves the result.
///
/// Any error leaves the file untouched. Without any mutating option the file is
/// not even read.
pub fn update_file(path: impl AsRef<Path>, options: &UpdateOptions) -> Result<Vec<BlockUpdate>> {
    let path = path.as_ref();
    ensure_file(path)?;

    if options.is_noop() {
        warn!(
            "No version, build id, revision increment, minimum version or URL given; '{}' left unchanged",
            path.display()
        );
        return Ok(Vec::new());
    }

    let mut project = ProjectFile::open(path)?;
    let updates = apply(&mut project, options)?;

    if options.dry_run {
        info!("Dry run: '{}' was not written", path.display());
    } else {
        project.save()?;
    }
    Ok(updates)
}

/// Applies `options` to every ClickOnce block of `project`, in document order.
///
/// Each block is resolved against its own stored version and revision.
pub fn apply(project: &mut ProjectFile, options: &UpdateOptions) -> Result<Vec<BlockUpdate>> {
    let blocks = project.clickonce_blocks()?;
    if blocks.is_empty() {
        return Err(ProjectError::NoClickOnceSettings(project.describe()).into());
    }
    warn_discarded_revision(options)?;

    let mut updates = Vec::with_capacity(blocks.len());
    for block in &blocks {
        updates.push(apply_block(project, block, options)?);
    }
    Ok(updates)
}

fn apply_block(
    project: &mut ProjectFile,
    block: &ClickOnceBlock,
    options: &UpdateOptions,
) -> Result<BlockUpdate> {
    let label = block.label();
    debug!(
        "{label}: ApplicationVersion='{}', ApplicationRevision={:?}, MinimumRequiredVersion={:?}",
        block.application_version, block.application_revision, block.minimum_required_version
    );

    let resolution = version::resolve(&ResolveRequest {
        current_version: &block.application_version,
        current_revision: block.application_revision.as_deref(),
        explicit_version: options.version.as_deref(),
        build_system_id: options.build_system_id,
        increment_revision: options.increment_revision,
    })?;
    for overflow in &resolution.overflows {
        warn_overflow(&label, overflow);
    }
    let version = resolution.version;

    if let Some(url) = &options.publish_url {
        project.upsert(block.index, PUBLISH_URL, url)?;
    }
    if let Some(url) = &options.install_url {
        project.upsert(block.index, INSTALL_URL, url)?;
    }

    project.upsert(block.index, APPLICATION_VERSION, &version.wildcard())?;
    project.upsert(block.index, APPLICATION_REVISION, &version.revision.to_string())?;

    let minimum_required_version = options.update_minimum_required_version.then_some(version);
    match minimum_required_version {
        Some(minimum) => {
            project.upsert(block.index, MINIMUM_REQUIRED_VERSION, &minimum.to_string())?;
            project.upsert(block.index, UPDATE_REQUIRED, "true")?;
            project.upsert(block.index, UPDATE_ENABLED, "true")?;
            info!("{label}: updated version to {version}, minimum required version to {minimum}");
        }
        None => info!("{label}: updated version to {version}"),
    }

    Ok(BlockUpdate {
        block: block.index,
        label,
        version,
        minimum_required_version,
        overflows: resolution.overflows,
    })
}

fn warn_overflow(label: &str, overflow: &Overflow) {
    match overflow.part {
        VersionPart::Revision => warn!(
            "{label}: Revision {} exceeds 65535 and was wrapped to {}; bump the Build number to keep versions increasing",
            overflow.value, overflow.wrapped
        ),
        VersionPart::Build => warn!(
            "{label}: Build {} exceeds 65535 and was wrapped to {}",
            overflow.value, overflow.wrapped
        ),
    }
}

/// A build-system id replaces Build and Revision, so a fourth part in the
/// explicit version is dropped.
fn warn_discarded_revision(options: &UpdateOptions) -> Result<()> {
    if let (Some(explicit), Some(id)) = (options.version.as_deref(), options.build_system_id) {
        if let Some(revision) = BaselineVersion::parse_explicit(explicit)?.revision {
            warn!("Build id {id} overrides the Build and Revision of '{explicit}'; revision {revision} is discarded");
        }
    }
    Ok(())
}
