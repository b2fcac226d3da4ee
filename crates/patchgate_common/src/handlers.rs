//! Action handlers.
//!
//! One handler per patch type. Concrete device mutation belongs to platform
//! modules; the handlers here are stubs that resolve and report what they
//! would touch. Every handler re-checks that the action destination stays
//! inside the target before doing anything.

use crate::error::{PatchgateError, SecurityBlock};
use crate::patch::{PatchAction, PatchType};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Result of one handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    pub success: bool,
    pub log: Vec<String>,
}

impl HandlerOutcome {
    pub fn success(log: Vec<String>) -> Self {
        Self { success: true, log }
    }

    pub fn failed(log: Vec<String>) -> Self {
        Self {
            success: false,
            log,
        }
    }
}

/// Contract for platform-specific patch application.
///
/// `target` is the canonical path accepted by the Destination Gate. An `Err`
/// is an unexpected fault; the engine turns it into a failed report.
pub trait ActionHandler: Send + Sync {
    fn patch_type(&self) -> PatchType;

    fn apply(&self, action: &PatchAction, target: &Path) -> Result<HandlerOutcome, PatchgateError>;
}

/// Join `destination` onto `target` and prove the result stays inside it.
///
/// Absolute destinations are taken relative to the target. `..` is resolved
/// lexically. The deepest part of the result that already exists is then
/// canonicalized and must still lie under the target, so a symlink anywhere
/// along the way cannot lead outside.
pub fn resolve_destination(action: &PatchAction, target: &Path) -> Result<PathBuf, SecurityBlock> {
    let escape = |destination: PathBuf| SecurityBlock::DestinationEscape {
        action_id: action.id.clone(),
        destination,
    };

    let relative = action.destination.as_deref().unwrap_or("");
    let mut resolved = target.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err(escape(target.join(relative)));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    // Walk up to the deepest entry that exists, without following it
    let mut existing = resolved.as_path();
    let mut missing: Vec<&OsStr> = Vec::new();
    while existing.symlink_metadata().is_err() {
        if existing == target {
            return Ok(resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return Ok(resolved),
        }
    }

    let root = target
        .canonicalize()
        .unwrap_or_else(|_| target.to_path_buf());
    let mut canonical = existing
        .canonicalize()
        .map_err(|_| escape(existing.to_path_buf()))?;
    if !canonical.starts_with(&root) {
        return Err(escape(canonical));
    }

    for name in missing.into_iter().rev() {
        canonical.push(name);
    }
    Ok(canonical)
}

fn describe_sources(action: &PatchAction) -> String {
    if action.source_files.is_empty() {
        "no source files".to_string()
    } else {
        action.source_files.join(", ")
    }
}

/// macOS kernel extension injection
#[derive(Debug, Default)]
pub struct KextHandler;

impl ActionHandler for KextHandler {
    fn patch_type(&self) -> PatchType {
        PatchType::KextInjection
    }

    fn apply(&self, action: &PatchAction, target: &Path) -> Result<HandlerOutcome, PatchgateError> {
        let dest = resolve_destination(action, target)?;
        debug!("kext {} -> {}", action.id, dest.display());
        Ok(HandlerOutcome::success(vec![
            format!("Injecting kext {} into {}", describe_sources(action), dest.display()),
            format!("Kext injection staged: {}", action.name),
        ]))
    }
}

/// EFI partition patching
#[derive(Debug, Default)]
pub struct EfiHandler;

impl ActionHandler for EfiHandler {
    fn patch_type(&self) -> PatchType {
        PatchType::EfiPatch
    }

    fn apply(&self, action: &PatchAction, target: &Path) -> Result<HandlerOutcome, PatchgateError> {
        let dest = resolve_destination(action, target)?;
        Ok(HandlerOutcome::success(vec![
            format!("Patching EFI at {}", dest.display()),
            format!("EFI patch staged: {}", action.name),
        ]))
    }
}

/// Windows driver injection
#[derive(Debug, Default)]
pub struct DriverHandler;

impl ActionHandler for DriverHandler {
    fn patch_type(&self) -> PatchType {
        PatchType::DriverInjection
    }

    fn apply(&self, action: &PatchAction, target: &Path) -> Result<HandlerOutcome, PatchgateError> {
        let dest = resolve_destination(action, target)?;
        Ok(HandlerOutcome::success(vec![
            format!("Injecting driver {} into {}", describe_sources(action), dest.display()),
            format!("Driver injection staged: {}", action.name),
        ]))
    }
}

/// Custom scripts never run
#[derive(Debug, Default)]
pub struct RejectScriptHandler;

impl ActionHandler for RejectScriptHandler {
    fn patch_type(&self) -> PatchType {
        PatchType::CustomScript
    }

    fn apply(
        &self,
        action: &PatchAction,
        _target: &Path,
    ) -> Result<HandlerOutcome, PatchgateError> {
        Ok(HandlerOutcome::failed(vec![
            SecurityBlock::CustomScript(action.id.clone()).to_string(),
        ]))
    }
}

/// Handlers keyed by patch type. The custom-script slot is fixed.
pub struct HandlerRegistry {
    handlers: HashMap<PatchType, Box<dyn ActionHandler>>,
}

impl HandlerRegistry {
    /// Registry with no handlers besides the custom-script rejector
    pub fn empty() -> Self {
        let mut handlers: HashMap<PatchType, Box<dyn ActionHandler>> = HashMap::new();
        handlers.insert(PatchType::CustomScript, Box::new(RejectScriptHandler));
        Self { handlers }
    }

    /// Registry with the kext, EFI and driver stubs
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for handler in [
            Box::new(KextHandler) as Box<dyn ActionHandler>,
            Box::new(EfiHandler),
            Box::new(DriverHandler),
        ] {
            registry.handlers.insert(handler.patch_type(), handler);
        }
        registry
    }

    /// Install or replace the handler for its patch type
    pub fn register(&mut self, handler: Box<dyn ActionHandler>) -> Result<(), SecurityBlock> {
        let patch_type = handler.patch_type();
        if patch_type == PatchType::CustomScript {
            warn!("Refusing to replace the custom script handler");
            return Err(SecurityBlock::CustomScript(
                "handler replacement".to_string(),
            ));
        }
        self.handlers.insert(patch_type, handler);
        Ok(())
    }

    pub fn get(&self, patch_type: PatchType) -> Option<&dyn ActionHandler> {
        self.handlers.get(&patch_type).map(|h| h.as_ref())
    }

    pub fn supports(&self, patch_type: PatchType) -> bool {
        self.handlers.contains_key(&patch_type)
    }

    pub fn supported_types(&self) -> Vec<PatchType> {
        let mut types: Vec<PatchType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.supported_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{PatchPhase, PatchPriority};

    fn action(t: PatchType, dest: Option<&str>) -> PatchAction {
        let a = PatchAction::new("a1", "Action", t, PatchPhase::Install, PatchPriority::High);
        match dest {
            Some(d) => a.with_destination(d),
            None => a,
        }
    }

    #[test]
    fn test_destination_inside_target() {
        let target = Path::new("/mnt/usb");
        let a = action(PatchType::KextInjection, Some("EFI/OC/Kexts"));
        assert_eq!(
            resolve_destination(&a, target).unwrap(),
            PathBuf::from("/mnt/usb/EFI/OC/Kexts")
        );

        let a = action(PatchType::KextInjection, Some("/Library/Extensions"));
        assert_eq!(
            resolve_destination(&a, target).unwrap(),
            PathBuf::from("/mnt/usb/Library/Extensions")
        );

        let a = action(PatchType::KextInjection, Some("EFI/../EFI/BOOT"));
        assert_eq!(
            resolve_destination(&a, target).unwrap(),
            PathBuf::from("/mnt/usb/EFI/BOOT")
        );
    }

    #[test]
    fn test_destination_escape_rejected() {
        let target = Path::new("/mnt/usb");
        let a = action(PatchType::DriverInjection, Some("../../etc/passwd"));
        let err = resolve_destination(&a, target).unwrap_err();
        assert!(matches!(err, SecurityBlock::DestinationEscape { .. }));

        let outcome = DriverHandler.apply(&a, target);
        assert!(matches!(
            outcome,
            Err(PatchgateError::Security(SecurityBlock::DestinationEscape { .. }))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_cannot_escape() {
        use std::os::unix::fs::symlink;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let target = root.join("USB");
        let outside = root.join("outside");
        std::fs::create_dir_all(target.join("EFI")).unwrap();
        std::fs::create_dir(&outside).unwrap();
        symlink(&outside, target.join("link")).unwrap();
        symlink(root.join("nowhere"), target.join("dangling")).unwrap();

        for dest in ["link/new.kext", "link", "link/deep/er/new.kext", "dangling/x"] {
            let a = action(PatchType::KextInjection, Some(dest));
            let err = resolve_destination(&a, &target).unwrap_err();
            assert!(matches!(err, SecurityBlock::DestinationEscape { .. }), "{}", dest);
        }

        let a = action(PatchType::KextInjection, Some("EFI/OC/Kexts/new.kext"));
        assert_eq!(
            resolve_destination(&a, &target).unwrap(),
            target.join("EFI/OC/Kexts/new.kext")
        );
    }

    #[test]
    fn test_custom_script_handler_always_fails() {
        let a = action(PatchType::CustomScript, None);
        let outcome = RejectScriptHandler.apply(&a, Path::new("/mnt/usb")).unwrap();
        assert!(!outcome.success);
        assert!(outcome.log[0].starts_with("SECURITY BLOCK"));
    }

    #[test]
    fn test_custom_script_slot_cannot_be_replaced() {
        struct Permissive;
        impl ActionHandler for Permissive {
            fn patch_type(&self) -> PatchType {
                PatchType::CustomScript
            }
            fn apply(&self, _: &PatchAction, _: &Path) -> Result<HandlerOutcome, PatchgateError> {
                Ok(HandlerOutcome::success(vec![]))
            }
        }

        let mut registry = HandlerRegistry::with_defaults();
        assert!(registry.register(Box::new(Permissive)).is_err());
        let a = action(PatchType::CustomScript, None);
        let handler = registry.get(PatchType::CustomScript).unwrap();
        assert!(!handler.apply(&a, Path::new("/mnt/usb")).unwrap().success);
    }

    #[test]
    fn test_default_registry_types() {
        let registry = HandlerRegistry::with_defaults();
        assert!(registry.supports(PatchType::KextInjection));
        assert!(registry.supports(PatchType::EfiPatch));
        assert!(registry.supports(PatchType::DriverInjection));
        assert!(!registry.supports(PatchType::RegistryPatch));
    }
}
