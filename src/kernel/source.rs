//! Kernel Source Preparation
//!
//! Turns a kernel file on disk into validated WGSL ready for a backend:
//!
//! 1. read the file,
//! 2. expand preprocessor definitions with the template engine,
//! 3. parse and validate with strict flags against the device capabilities,
//! 4. locate the compute entry point.
//!
//! ## Definitions
//!
//! Definitions are name/value pairs exposed to the source as template
//! variables. The syntax matches the engine's shader templates:
//!
//! ```wgsl
//! const SCALE: f32 = {{ SCALE }};
//! $$ if USE_CLAMP
//! let v = clamp(x, 0.0, 1.0);
//! $$ else
//! let v = x;
//! $$ endif
//! ```
//!
//! Numeric values become numbers (so `"0"` is falsy in a condition); every
//! other value stays a string. Printing an undefined name is an error, testing
//! one in a condition is not.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior, Value};
use naga::valid::Capabilities;
use xxhash_rust::xxh3::xxh3_128;

use crate::errors::CompileError;

/// Shader stage every kernel is compiled for.
pub const KERNEL_STAGE: naga::ShaderStage = naga::ShaderStage::Compute;

/// Fixed validation strictness applied to every kernel.
#[must_use]
pub fn validation_flags() -> naga::valid::ValidationFlags {
    naga::valid::ValidationFlags::all()
}

/// Preprocessor definitions for a kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelDefines {
    pairs: Vec<(String, String)>,
}

impl KernelDefines {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds definitions from parallel name/value lists.
    ///
    /// Both lists must be present and of equal length; otherwise the
    /// definitions are treated as absent.
    #[must_use]
    pub fn from_parallel(names: Option<&[&str]>, values: Option<&[&str]>) -> Self {
        match (names, values) {
            (Some(names), Some(values)) if names.len() == values.len() => Self {
                pairs: names
                    .iter()
                    .zip(values)
                    .map(|(n, v)| ((*n).to_string(), (*v).to_string()))
                    .collect(),
            },
            (Some(names), Some(values)) => {
                log::warn!(
                    "Ignoring kernel definitions: {} names but {} values",
                    names.len(),
                    values.len()
                );
                Self::default()
            }
            _ => Self::default(),
        }
    }

    /// Adds or replaces a definition.
    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.pairs.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_string();
        } else {
            self.pairs.push((name.to_string(), value.to_string()));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn context(&self) -> BTreeMap<&str, Value> {
        self.pairs
            .iter()
            .map(|(name, value)| (name.as_str(), define_value(value)))
            .collect()
    }
}

fn define_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        Value::from(int)
    } else if let Ok(float) = trimmed.parse::<f64>() {
        Value::from(float)
    } else {
        Value::from(raw)
    }
}

fn template_env() -> Result<Environment<'static>, String> {
    let mut env = Environment::new();

    let syntax = SyntaxConfig::builder()
        .block_delimiters("{$", "$}")
        .variable_delimiters("{{", "}}")
        .line_statement_prefix("$$")
        .build()
        .map_err(|e| e.to_string())?;

    env.set_syntax(syntax);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_undefined_behavior(UndefinedBehavior::SemiStrict);
    Ok(env)
}

/// Expands definitions in `source`.
pub fn expand_defines(source: &str, defines: &KernelDefines) -> Result<String, String> {
    let env = template_env()?;
    env.render_str(source, defines.context())
        .map_err(|e| e.to_string())
}

/// A buffer binding declared by the kernel source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredBinding {
    pub group: u32,
    pub binding: u32,
    /// Smallest byte size a buffer bound here may have.
    pub min_size: u64,
}

/// A validated kernel ready for [`ComputeBackend::compile`](crate::backend::ComputeBackend::compile).
#[derive(Debug, Clone)]
pub struct PreparedKernel {
    /// Where the source came from (used in labels and diagnostics).
    pub path: PathBuf,
    pub entry_point: String,
    /// Source after definition expansion.
    pub source: String,
    /// xxh3-128 of `source`; identical sources share one shader module.
    pub source_hash: u128,
    /// `@workgroup_size` declared by the entry point.
    pub workgroup_size: [u32; 3],
    /// Uniform and storage buffer bindings in the module, by group then binding.
    pub bindings: Vec<DeclaredBinding>,
}

fn declared_bindings(module: &naga::Module) -> Vec<DeclaredBinding> {
    let mut bindings: Vec<DeclaredBinding> = module
        .global_variables
        .iter()
        .filter(|(_, var)| {
            matches!(
                var.space,
                naga::AddressSpace::Uniform | naga::AddressSpace::Storage { .. }
            )
        })
        .filter_map(|(_, var)| {
            let rb = var.binding.as_ref()?;
            let size = module.types[var.ty].inner.try_size(module.to_ctx())?;
            Some(DeclaredBinding {
                group: rb.group,
                binding: rb.binding,
                min_size: u64::from(size),
            })
        })
        .collect();
    bindings.sort_by_key(|b| (b.group, b.binding));
    bindings
}

impl PreparedKernel {
    /// Reads and prepares the kernel at `path`, validating against
    /// `capabilities`.
    pub fn load(
        path: impl AsRef<Path>,
        entry_point: &str,
        defines: &KernelDefines,
        capabilities: Capabilities,
    ) -> Result<Self, CompileError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_source(path, &source, entry_point, defines, capabilities)
    }

    /// Prepares in-memory source; `path` only labels diagnostics.
    pub fn from_source(
        path: impl AsRef<Path>,
        source: &str,
        entry_point: &str,
        defines: &KernelDefines,
        capabilities: Capabilities,
    ) -> Result<Self, CompileError> {
        let path = path.as_ref().to_path_buf();

        let expanded =
            expand_defines(source, defines).map_err(|message| CompileError::Preprocess {
                path: path.clone(),
                message,
            })?;

        let module =
            naga::front::wgsl::parse_str(&expanded).map_err(|e| CompileError::Parse {
                path: path.clone(),
                message: e.emit_to_string(&expanded),
            })?;

        naga::valid::Validator::new(validation_flags(), capabilities)
            .validate(&module)
            .map_err(|e| CompileError::Validation {
                path: path.clone(),
                message: e.into_inner().to_string(),
            })?;

        let Some(entry) = module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry_point && ep.stage == KERNEL_STAGE)
        else {
            return Err(CompileError::EntryPointNotFound {
                path,
                entry_point: entry_point.to_string(),
            });
        };

        Ok(Self {
            workgroup_size: entry.workgroup_size,
            bindings: declared_bindings(&module),
            entry_point: entry_point.to_string(),
            source_hash: xxh3_128(expanded.as_bytes()),
            source: expanded,
            path,
        })
    }

    /// Label used for backend objects built from this kernel.
    #[must_use]
    pub fn label(&self) -> String {
        let file = self
            .path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |f| f.to_string_lossy().into_owned());
        format!("{file}::{}", self.entry_point)
    }
}
