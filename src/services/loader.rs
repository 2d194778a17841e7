//! Document loading for domain and template libraries.

use crate::models::{DomainConfig, RawTemplate};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// A template document: either a bare list of templates or a mapping with a
/// `templates` key.
#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateDocument {
    List(Vec<RawTemplate>),
    Wrapped {
        #[serde(default)]
        templates: Vec<RawTemplate>,
    },
}

/// Loads the domain configuration document.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the domain
/// name is missing.
pub fn load_domain(path: &Path) -> Result<DomainConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
        operation: "load_domain".to_string(),
        cause: format!("{}: {e}", path.display()),
    })?;
    let domain: DomainConfig =
        serde_yaml_ng::from_str(&content).map_err(|e| Error::OperationFailed {
            operation: "parse_domain".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
    if domain.domain_name.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "{}: domain document is missing 'domain_name'",
            path.display()
        )));
    }
    tracing::info!(
        domain = %domain.domain_name,
        domain_type = domain.domain_type.as_str(),
        entities = domain.entities.len(),
        "Loaded domain configuration"
    );
    Ok(domain)
}

/// Loads and merges template documents from one or more paths.
///
/// # Errors
///
/// Returns an error if any file cannot be read or parsed.
pub fn load_templates(paths: &[impl AsRef<Path>]) -> Result<Vec<RawTemplate>> {
    let mut templates = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "load_templates".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let document: TemplateDocument =
            serde_yaml_ng::from_str(&content).map_err(|e| Error::OperationFailed {
                operation: "parse_templates".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        let mut loaded = match document {
            TemplateDocument::List(list) => list,
            TemplateDocument::Wrapped { templates } => templates,
        };
        tracing::debug!(path = %path.display(), count = loaded.len(), "Loaded template document");
        templates.append(&mut loaded);
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_templates_bare_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r"
- id: a
  description: first
  sql_template: 'SELECT 1'
- id: b
  description: second
  sql_template: 'SELECT 2'
"
        )
        .unwrap();
        let templates = load_templates(&[file.path()]).unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].id, "a");
    }

    #[test]
    fn test_load_templates_wrapped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r"
templates:
  - id: wrapped
    description: wrapped doc
    sql_template: 'SELECT 1'
"
        )
        .unwrap();
        let templates = load_templates(&[file.path()]).unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].id, "wrapped");
    }

    #[test]
    fn test_load_templates_merges_paths() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        write!(first, "- id: one\n  sql_template: 'SELECT 1'\n").unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        write!(second, "- id: two\n  sql_template: 'SELECT 2'\n").unwrap();
        let templates = load_templates(&[first.path(), second.path()]).unwrap();
        assert_eq!(templates.len(), 2);
    }

    #[test]
    fn test_load_domain_requires_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "description: nameless\n").unwrap();
        assert!(load_domain(file.path()).is_err());
    }

    #[test]
    fn test_load_domain_missing_file() {
        let err = load_domain(Path::new("/nonexistent/domain.yaml")).unwrap_err();
        assert!(err.to_string().contains("load_domain"));
    }
}
