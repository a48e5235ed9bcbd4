use anyhow::{Context, Result, anyhow};
use log::debug;
use quick_xml::escape::escape;
use roxmltree::{Document, Node};
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod updater;

pub const PROPERTY_GROUP: &str = "PropertyGroup";
pub const APPLICATION_VERSION: &str = "ApplicationVersion";
pub const APPLICATION_REVISION: &str = "ApplicationRevision";
pub const MINIMUM_REQUIRED_VERSION: &str = "MinimumRequiredVersion";
pub const UPDATE_REQUIRED: &str = "UpdateRequired";
pub const UPDATE_ENABLED: &str = "UpdateEnabled";
pub const PUBLISH_URL: &str = "PublishUrl";
pub const INSTALL_URL: &str = "InstallUrl";

const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project file not found: '{}'", .0.display())]
    FileNotFound(PathBuf),
    #[error("No PropertyGroup with ClickOnce settings (an <ApplicationVersion> element) found in {0}")]
    NoClickOnceSettings(String),
    #[error("Cannot set <{name}>: ClickOnce PropertyGroup #{block} does not exist")]
    MissingParentElement { name: String, block: usize },
}

/// Fails with [`ProjectError::FileNotFound`] unless `path` is an existing regular file.
pub fn ensure_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(ProjectError::FileNotFound(path.to_path_buf()).into());
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickOnceBlock {
    pub index: usize,
    pub condition: Option<String>,
    pub application_version: String,
    pub application_revision: Option<String>,
    pub minimum_required_version: Option<String>,
}

impl ClickOnceBlock {
    pub fn label(&self) -> String {
        match self.condition.as_deref().map(str::trim) {
            Some(condition) if !condition.is_empty() => format!("PropertyGroup [{condition}]"),
            _ => format!("PropertyGroup #{}", self.index),
        }
    }
}

/// An MSBuild project document held as its raw text.
///
/// Every edit is a byte splice located through a fresh `roxmltree` parse, so
/// whitespace, comments, line endings and attribute order outside the edited
/// elements stay exactly as they were. Nothing reaches the disk until
/// [`ProjectFile::save`] is called.
#[derive(Debug, Clone)]
pub struct ProjectFile {
    path: Option<PathBuf>,
    source: String,
    bom: bool,
}

impl ProjectFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure_file(path)?;
        debug!("Reading project file: '{}'", path.display());

        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project file '{}'", path.display()))?;
        let mut project = Self::parse(source)
            .with_context(|| format!("Failed to parse project file '{}'", path.display()))?;
        project.path = Some(path.to_path_buf());
        Ok(project)
    }

    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let mut source = source.into();
        let bom = source.starts_with(UTF8_BOM);
        if bom {
            source.replace_range(..UTF8_BOM.len_utf8(), "");
        }
        Document::parse(&source)?;
        Ok(Self { path: None, source, bom })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Writes the document back to the path it was opened from.
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| anyhow!("Project was not opened from a file; use save_to"))?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut contents = String::with_capacity(self.source.len() + UTF8_BOM.len_utf8());
        if self.bom {
            contents.push(UTF8_BOM);
        }
        contents.push_str(&self.source);
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write project file '{}'", path.display()))?;
        debug!("Saved project file: '{}'", path.display());
        Ok(())
    }

    /// Lists every `<PropertyGroup>` that has an `<ApplicationVersion>` child.
    pub fn clickonce_blocks(&self) -> Result<Vec<ClickOnceBlock>> {
        let document = Document::parse(&self.source)?;
        let blocks: Vec<ClickOnceBlock> = clickonce_nodes(&document)
            .enumerate()
            .map(|(index, node)| ClickOnceBlock {
                index,
                condition: node.attribute("Condition").map(str::to_string),
                application_version: child_text(node, APPLICATION_VERSION).unwrap_or_default(),
                application_revision: child_text(node, APPLICATION_REVISION),
                minimum_required_version: child_text(node, MINIMUM_REQUIRED_VERSION),
            })
            .collect();
        debug!("Found {} ClickOnce PropertyGroup(s)", blocks.len());
        Ok(blocks)
    }

    /// Sets the text of the `name` child of ClickOnce block `block`.
    ///
    /// An existing element has its content replaced in place. A missing one is
    /// appended after the block's last child element, in the block's namespace
    /// and with that child's indentation.
    pub fn upsert(&mut self, block: usize, name: &str, value: &str) -> Result<()> {
        let text = escape(value);
        let (range, replacement) = {
            let document = Document::parse(&self.source)?;
            let parent = clickonce_nodes(&document).nth(block).ok_or_else(|| {
                ProjectError::MissingParentElement { name: name.to_string(), block }
            })?;

            match find_child(parent, name) {
                Some(element) => {
                    debug!("Setting <{name}> to '{value}' in PropertyGroup #{block}");
                    replace_content(&self.source, element, &text)
                }
                None => {
                    debug!("Creating <{name}> with '{value}' in PropertyGroup #{block}");
                    append_child(&self.source, parent, name, &text)
                }
            }
        };
        self.source.replace_range(range, &replacement);
        Ok(())
    }

    pub fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("'{}'", path.display()),
            None => "<in-memory project>".to_string(),
        }
    }
}

/// ClickOnce blocks in document order. Only `PropertyGroup`s in the root
/// element's namespace count, which covers both the MSBuild 2003 namespace and
/// SDK-style projects without one.
fn clickonce_nodes<'a, 'input>(
    document: &'a Document<'input>,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    let namespace = document.root_element().tag_name().namespace();
    document.descendants().filter(move |node| {
        is_element(node, PROPERTY_GROUP, namespace) && find_child(*node, APPLICATION_VERSION).is_some()
    })
}

fn is_element(node: &Node<'_, '_>, name: &str, namespace: Option<&str>) -> bool {
    node.is_element() && node.tag_name().name() == name && node.tag_name().namespace() == namespace
}

fn find_child<'a, 'input>(parent: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    let namespace = parent.tag_name().namespace();
    parent.children().find(|child| is_element(child, name, namespace))
}

fn child_text(parent: Node<'_, '_>, name: &str) -> Option<String> {
    find_child(parent, name)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// The tag name as written in the source, prefix included.
fn qualified_name(raw: &str) -> &str {
    let name = raw.trim_start_matches('<');
    let end = name
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(name.len());
    &name[..end]
}

fn replace_content(source: &str, element: Node<'_, '_>, text: &str) -> (Range<usize>, String) {
    if let (Some(first), Some(last)) = (element.first_child(), element.last_child()) {
        return (first.range().start..last.range().end, text.to_string());
    }

    let range = element.range();
    let raw = &source[range.clone()];
    match raw.strip_suffix("/>") {
        Some(start_tag) => {
            let tag = qualified_name(raw);
            (range, format!("{}>{text}</{tag}>", start_tag.trim_end()))
        }
        None => {
            // <Name></Name>
            let at = range.start + raw.rfind("</").unwrap_or(raw.len());
            (at..at, text.to_string())
        }
    }
}

fn append_child(
    source: &str,
    parent: Node<'_, '_>,
    name: &str,
    text: &str,
) -> (Range<usize>, String) {
    let raw = &source[parent.range()];
    let qualified = match qualified_name(raw).split_once(':') {
        Some((prefix, _)) => format!("{prefix}:{name}"),
        None => name.to_string(),
    };
    let element = format!("<{qualified}>{text}</{qualified}>");

    match parent.children().filter(|child| child.is_element()).last() {
        Some(last) => {
            let indent = last
                .prev_sibling()
                .filter(|sibling| sibling.is_text())
                // raw text, roxmltree normalizes \r\n
                .map(|sibling| &source[sibling.range()])
                .filter(|whitespace| whitespace.trim().is_empty())
                .map(line_indent)
                .unwrap_or_default();
            let at = last.range().end;
            (at..at, format!("{indent}{element}"))
        }
        None => {
            let at = parent.range().start + raw.rfind("</").unwrap_or(raw.len());
            (at..at, element)
        }
    }
}

/// The final line break of `whitespace` and the indentation after it.
fn line_indent(whitespace: &str) -> String {
    match whitespace.rfind('\n') {
        Some(newline) if whitespace[..newline].ends_with('\r') => whitespace[newline - 1..].to_string(),
        Some(newline) => whitespace[newline..].to_string(),
        None => whitespace.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Project ToolsVersion="15.0" xmlns="http://schemas.microsoft.com/developer/msbuild/2003">
  <PropertyGroup>
    <OutputType>WinExe</OutputType>
  </PropertyGroup>
  <PropertyGroup Condition=" '$(Configuration)|$(Platform)' == 'Release|AnyCPU' ">
    <ApplicationRevision>7</ApplicationRevision>
    <ApplicationVersion>1.0.0.%2a</ApplicationVersion>
    <!-- keep me -->
    <PublishUrl>publish\</PublishUrl>
  </PropertyGroup>
</Project>
"#;

    #[test]
    fn test_finds_only_blocks_with_application_version() {
        let project = ProjectFile::parse(PROJECT).unwrap();
        let blocks = project.clickonce_blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].index, 0);
        assert_eq!(blocks[0].application_version, "1.0.0.%2a");
        assert_eq!(blocks[0].application_revision.as_deref(), Some("7"));
        assert_eq!(blocks[0].minimum_required_version, None);
        assert_eq!(blocks[0].label(), "PropertyGroup ['$(Configuration)|$(Platform)' == 'Release|AnyCPU']");
    }

    #[test]
    fn test_upsert_replaces_existing_text() {
        let mut project = ProjectFile::parse(PROJECT).unwrap();
        project.upsert(0, APPLICATION_REVISION, "8").unwrap();
        project.upsert(0, APPLICATION_VERSION, "1.0.0.*").unwrap();

        let expected = PROJECT
            .replace("<ApplicationRevision>7<", "<ApplicationRevision>8<")
            .replace("1.0.0.%2a", "1.0.0.*");
        assert_eq!(project.source(), expected);
    }

    #[test]
    fn test_upsert_appends_missing_element_with_indentation() {
        let mut project = ProjectFile::parse(PROJECT).unwrap();
        project.upsert(0, UPDATE_REQUIRED, "true").unwrap();

        assert!(project.source().contains(
            "    <PublishUrl>publish\\</PublishUrl>\n    <UpdateRequired>true</UpdateRequired>\n  </PropertyGroup>"
        ));
        let blocks = project.clickonce_blocks().unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_appended_element_is_in_block_namespace() {
        let mut project = ProjectFile::parse(PROJECT).unwrap();
        project.upsert(0, MINIMUM_REQUIRED_VERSION, "1.0.0.8").unwrap();

        let blocks = project.clickonce_blocks().unwrap();
        assert_eq!(blocks[0].minimum_required_version.as_deref(), Some("1.0.0.8"));
    }

    #[test]
    fn test_upsert_uses_block_prefix() {
        let source = r#"<m:Project xmlns:m="http://schemas.microsoft.com/developer/msbuild/2003"><m:PropertyGroup><m:ApplicationVersion>1.0.0.*</m:ApplicationVersion></m:PropertyGroup></m:Project>"#;
        let mut project = ProjectFile::parse(source).unwrap();
        project.upsert(0, UPDATE_ENABLED, "true").unwrap();

        assert!(project.source().contains(
            "</m:ApplicationVersion><m:UpdateEnabled>true</m:UpdateEnabled></m:PropertyGroup>"
        ));
    }

    #[test]
    fn test_sdk_style_project_without_namespace() {
        let source = "<Project Sdk=\"Microsoft.NET.Sdk\">\r\n  <PropertyGroup>\r\n    <ApplicationVersion>2.1.0.*</ApplicationVersion>\r\n  </PropertyGroup>\r\n</Project>\r\n";
        let mut project = ProjectFile::parse(source).unwrap();
        assert_eq!(project.clickonce_blocks().unwrap().len(), 1);

        project.upsert(0, APPLICATION_REVISION, "3").unwrap();
        assert!(project.source().contains(
            "</ApplicationVersion>\r\n    <ApplicationRevision>3</ApplicationRevision>\r\n  </PropertyGroup>"
        ));
    }

    #[test]
    fn test_foreign_namespace_property_group_is_ignored() {
        let source = r#"<Project xmlns="http://schemas.microsoft.com/developer/msbuild/2003"><x:PropertyGroup xmlns:x="urn:other"><x:ApplicationVersion>1.0.0</x:ApplicationVersion></x:PropertyGroup></Project>"#;
        let project = ProjectFile::parse(source).unwrap();
        assert!(project.clickonce_blocks().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_fills_empty_and_self_closing_elements() {
        let source = r#"<Project><PropertyGroup><ApplicationVersion>1.0.0.*</ApplicationVersion><ApplicationRevision /><PublishUrl></PublishUrl></PropertyGroup></Project>"#;
        let mut project = ProjectFile::parse(source).unwrap();
        project.upsert(0, APPLICATION_REVISION, "4").unwrap();
        project.upsert(0, PUBLISH_URL, "http://example.com/").unwrap();

        assert_eq!(
            project.source(),
            r#"<Project><PropertyGroup><ApplicationVersion>1.0.0.*</ApplicationVersion><ApplicationRevision>4</ApplicationRevision><PublishUrl>http://example.com/</PublishUrl></PropertyGroup></Project>"#
        );
    }

    #[test]
    fn test_upsert_escapes_text() {
        let mut project = ProjectFile::parse(PROJECT).unwrap();
        project.upsert(0, INSTALL_URL, "http://example.com/?a=1&b=<2>").unwrap();

        assert!(project.source().contains("http://example.com/?a=1&amp;b=&lt;2&gt;"));
        let document = Document::parse(project.source()).unwrap();
        let install = document
            .descendants()
            .find(|node| node.tag_name().name() == INSTALL_URL)
            .unwrap();
        assert_eq!(install.text(), Some("http://example.com/?a=1&b=<2>"));
    }

    #[test]
    fn test_upsert_missing_block() {
        let mut project = ProjectFile::parse(PROJECT).unwrap();
        let err = project.upsert(3, APPLICATION_REVISION, "1").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProjectError>(),
            Some(ProjectError::MissingParentElement { block: 3, .. })
        ));
        assert_eq!(project.source(), PROJECT);
    }

    #[test]
    fn test_bom_is_preserved() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("App.csproj");
        std::fs::write(&path, format!("{UTF8_BOM}{PROJECT}")).unwrap();

        let project = ProjectFile::open(&path).unwrap();
        assert_eq!(project.source(), PROJECT);
        project.save().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{UTF8_BOM}{PROJECT}"));
    }

    #[test]
    fn test_open_missing_file() {
        let err = ProjectFile::open("does/not/exist.csproj").unwrap_err();
        assert!(matches!(err.downcast_ref::<ProjectError>(), Some(ProjectError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_rejects_invalid_xml() {
        assert!(ProjectFile::parse("<Project><PropertyGroup></Project>").is_err());
    }

    #[test]
    fn test_empty_revision_reads_as_absent() {
        let source = r#"<Project><PropertyGroup><ApplicationVersion>1.0.0.*</ApplicationVersion><ApplicationRevision>  </ApplicationRevision></PropertyGroup><PropertyGroup><ApplicationVersion>1.0.0.*</ApplicationVersion><ApplicationRevision/></PropertyGroup></Project>"#;
        let blocks = ProjectFile::parse(source).unwrap().clickonce_blocks().unwrap();
        assert_eq!(blocks[0].application_revision, None);
        assert_eq!(blocks[1].application_revision, None);
    }

    #[test]
    fn test_line_indent() {
        assert_eq!(line_indent("\n\n    "), "\n    ");
        assert_eq!(line_indent("\r\n  "), "\r\n  ");
        assert_eq!(line_indent("  "), "  ");
    }
}
