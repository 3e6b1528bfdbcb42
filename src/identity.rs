//! Artifact coordinates
//!
//! An [`ArtifactIdentity`] names exactly one file in a repository: the
//! module it belongs to plus the artifact name, classifier and extension
//! that pick a single file out of that module version. The module's own
//! descriptor (a `.pom` or `ivy.xml`) gets an identity of its own through
//! [`ArtifactIdentity::module_metadata`].

use std::fmt;

use crate::error::ConfigError;

/// Extension used when coordinates don't name one.
pub const DEFAULT_EXTENSION: &str = "jar";

/// Immutable coordinates of a single artifact.
///
/// Used both as the cache key and as the input to pattern substitution.
/// Builder-style methods consume `self` and return a new value, so an
/// identity can't change once it has been handed to a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactIdentity {
    group: String,
    module: String,
    version: String,
    name: String,
    classifier: Option<String>,
    extension: String,
    metadata: bool,
}

impl ArtifactIdentity {
    /// Create an identity whose artifact name is the module name.
    pub fn new(
        group: impl Into<String>,
        module: impl Into<String>,
        version: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        let module = module.into();
        Self {
            group: group.into(),
            name: module.clone(),
            module,
            version: version.into(),
            classifier: None,
            extension: extension.into(),
            metadata: false,
        }
    }

    /// Parse `group:module:version[:classifier][@ext]`.
    ///
    /// # Example
    /// ```
    /// use levitate_depot::ArtifactIdentity;
    ///
    /// let id = ArtifactIdentity::parse("org.acme:widget:1.0:sources@zip").unwrap();
    /// assert_eq!(id.classifier(), Some("sources"));
    /// assert_eq!(id.extension(), "zip");
    /// ```
    pub fn parse(coordinates: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidCoordinates(coordinates.to_string());

        let (coords, extension) = match coordinates.split_once('@') {
            Some((coords, ext)) if !ext.is_empty() => (coords, ext),
            Some(_) => return Err(invalid()),
            None => (coordinates, DEFAULT_EXTENSION),
        };

        let parts: Vec<&str> = coords.split(':').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid());
        }

        match parts.as_slice() {
            [group, module, version] => Ok(Self::new(*group, *module, *version, extension)),
            [group, module, version, classifier] => {
                Ok(Self::new(*group, *module, *version, extension).with_classifier(*classifier))
            }
            _ => Err(invalid()),
        }
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    /// Override the artifact name (defaults to the module name).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The descriptor of this identity's module version. Never equal to
    /// any artifact identity, whatever the extension.
    pub fn module_metadata(&self, extension: impl Into<String>) -> Self {
        Self {
            group: self.group.clone(),
            module: self.module.clone(),
            version: self.version.clone(),
            name: self.module.clone(),
            classifier: None,
            extension: extension.into(),
            metadata: true,
        }
    }

    pub fn is_metadata(&self) -> bool {
        self.metadata
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Conventional file name: `name-version[-classifier].ext`.
    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(classifier) => format!(
                "{}-{}-{}.{}",
                self.name, self.version, classifier, self.extension
            ),
            None => format!("{}-{}.{}", self.name, self.version, self.extension),
        }
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.module, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        if self.name != self.module {
            write!(f, "!{}", self.name)?;
        }
        write!(f, "@{}", self.extension)?;
        if self.metadata {
            f.write_str(" (metadata)")?;
        }
        Ok(())
    }
}
