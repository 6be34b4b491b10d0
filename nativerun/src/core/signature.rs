//! Function signatures and the compiled artifacts that export them.
//!
//! Both are produced by the build subsystem and only read here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::types::TypeTag;

/// One named, typed parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeTag,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: TypeTag) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered parameters and return type of one exported function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    /// `None` for `void`.
    pub return_type: Option<TypeTag>,
    pub parameters: Vec<Parameter>,
}

impl FunctionSignature {
    pub fn new(
        name: impl Into<String>,
        return_type: Option<TypeTag>,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self {
            name: name.into(),
            return_type,
            parameters,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// A compiled shared library plus the signatures of its exported functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executable {
    pub library_path: PathBuf,
    pub build_directory: PathBuf,
    /// Source the library was built from; names the measurement sink.
    #[serde(default)]
    pub source_file: Option<PathBuf>,
    pub functions: BTreeMap<String, FunctionSignature>,
    /// Opaque description of the toolchain that produced the library.
    #[serde(default)]
    pub toolchain: BTreeMap<String, String>,
}

impl Executable {
    pub fn new(library_path: impl Into<PathBuf>, build_directory: impl Into<PathBuf>) -> Self {
        Self {
            library_path: library_path.into(),
            build_directory: build_directory.into(),
            source_file: None,
            functions: BTreeMap::new(),
            toolchain: BTreeMap::new(),
        }
    }

    pub fn with_function(mut self, signature: FunctionSignature) -> Self {
        self.functions.insert(signature.name.clone(), signature);
        self
    }

    pub fn with_source_file(mut self, source_file: impl Into<PathBuf>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    pub fn signature(&self, function: &str) -> Option<&FunctionSignature> {
        self.functions.get(function)
    }

    /// Space-separated function names, for "did you mean" style messages.
    pub fn function_names(&self) -> String {
        self.functions
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Files a remote environment needs to run this artifact.
    pub fn compute_input_files(&self) -> Vec<PathBuf> {
        vec![self.library_path.clone()]
    }

    /// File name the measurement sink is derived from.
    pub fn sink_stem(&self) -> String {
        self.source_file
            .as_deref()
            .unwrap_or(&self.library_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "executable".to_string())
    }

    /// Copy of this executable with its paths re-expressed relative to `root`.
    ///
    /// Returns `None` if a path lies outside `root`.
    pub fn rebased(&self, root: &Path) -> Option<Executable> {
        Some(Executable {
            library_path: relative_to(&self.library_path, root)?,
            build_directory: relative_to(&self.build_directory, root)?,
            ..self.clone()
        })
    }
}

fn relative_to(path: &Path, root: &Path) -> Option<PathBuf> {
    if path.is_relative() {
        return Some(path.to_path_buf());
    }
    path.strip_prefix(root).ok().map(Path::to_path_buf)
}
