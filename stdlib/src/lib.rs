//! Extended instruction libraries for the shdbg interpreter.

pub mod glsl;


use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use shdbg_core::extinst::ExtInstRegistry;
use tracing::error;

pub use glsl::{GLSL_STD_450, Glsl450};

/// Register every bundled library with the given registry
pub fn register_stdlib_sets(registry: &mut ExtInstRegistry) -> Result<()> {
    registry.register_library(&Glsl450)?;
    Ok(())
}

static DEFAULT_REGISTRY: Lazy<Arc<ExtInstRegistry>> = Lazy::new(|| {
    let mut registry = ExtInstRegistry::new();
    if let Err(err) = register_stdlib_sets(&mut registry) {
        error!(target: "shdbg::exec", "failed to register bundled libraries: {err:#}");
    }
    Arc::new(registry)
});

/// Shared registry holding every bundled library, built on first use.
pub fn default_registry() -> Arc<ExtInstRegistry> {
    Arc::clone(&DEFAULT_REGISTRY)
}
