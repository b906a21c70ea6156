//! URI-scheme registration contract.
//!
//! Join and spectate flows require the OS to know how to launch the game
//! from a `discord-<app_id>://` link. Actually writing that registration is
//! platform work (registry keys, `.desktop` files, Info.plist entries) that
//! lives outside this crate; the client only needs to know whether it
//! happened. Callers plug in a registrar and the client records the boolean.

use std::path::Path;

/// Registers the `discord-<app_id>` URI scheme with the operating system.
pub trait SchemeRegistrar {
    /// Register the scheme for `app_id`.
    ///
    /// `steam_app_id` routes the launch through Steam; `executable`
    /// overrides the binary the scheme starts (defaults to the current
    /// executable). Returns `true` on success.
    fn register(
        &self,
        app_id: &str,
        steam_app_id: Option<&str>,
        executable: Option<&Path>,
    ) -> bool;
}

/// Registrar for environments where the scheme is managed externally
/// (installers, packaging) and the client should simply trust it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternallyManagedScheme;

impl SchemeRegistrar for ExternallyManagedScheme {
    fn register(&self, app_id: &str, _: Option<&str>, _: Option<&Path>) -> bool {
        log::debug!("uri scheme for {app_id} assumed externally registered");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn externally_managed_always_succeeds() {
        assert!(ExternallyManagedScheme.register("123", None, None));
        assert!(ExternallyManagedScheme.register("123", Some("480"), Some(Path::new("/bin/game"))));
    }
}
